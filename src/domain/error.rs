// ============================================================
// Layer 3 — Error Types
// ============================================================
// Typed failures raised by the data, ML and infra layers.
// The application and CLI layers wrap these in anyhow with
// extra context; the variants exist so callers (and tests)
// can tell a configuration mistake from a diverging run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    /// Rejected before the first computation step.
    #[error("invalid configuration for '{option}': {reason}")]
    Config { option: String, reason: String },

    /// NaN or infinite loss. Always fatal.
    #[error("training diverged at step {step}: loss = {value}")]
    Divergence { step: usize, value: f64 },

    /// A sample failed to load twice in a row.
    #[error("dataset sample {index} could not be loaded: {reason}")]
    Dataset { index: usize, reason: String },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("malformed flow file: {0}")]
    FlowFormat(String),
}

impl FlowError {
    pub fn config(option: impl Into<String>, reason: impl Into<String>) -> Self {
        FlowError::Config { option: option.into(), reason: reason.into() }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, FlowError::Config { .. })
    }
}

/// Result type for domain, data and ML operations
pub type FlowResult<T> = std::result::Result<T, FlowError>;
