use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::domain::error::FlowError;

/// Flow network variant. Parsed once from the CLI and stored in
/// every checkpoint so inference can refuse a mismatched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    FlowNetS,
    PwcNet,
}

impl Architecture {
    pub fn name(&self) -> &'static str {
        match self {
            Architecture::FlowNetS => "flownets",
            Architecture::PwcNet   => "pwcnet",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Architecture {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flownets" => Ok(Architecture::FlowNetS),
            "pwcnet" | "pwc" => Ok(Architecture::PwcNet),
            other => Err(FlowError::config(
                "arch",
                format!("unknown architecture '{other}' (expected flownets or pwcnet)"),
            )),
        }
    }
}
