// ============================================================
// Layer 6 — Graceful Stop
// ============================================================
// Ctrl-C sets a shared flag. The training loop polls it
// between batches, flushes a checkpoint and returns, so an
// interrupted run can be resumed with --resume.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context, Result};

#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    inner: Arc<AtomicBool>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a Ctrl-C handler that raises this flag.
    /// A second Ctrl-C while the flag is already set exits at once.
    pub fn install_ctrlc(&self) -> Result<()> {
        let flag = self.inner.clone();
        ctrlc::set_handler(move || {
            if flag.swap(true, Ordering::SeqCst) {
                std::process::exit(130);
            }
            tracing::warn!("Interrupt received, stopping after the current batch");
        })
        .context("Cannot install Ctrl-C handler")
    }

    pub fn request_stop(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let flag  = StopFlag::new();
        let other = flag.clone();
        assert!(!other.is_set());
        flag.request_stop();
        assert!(other.is_set());
    }
}
