// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// Runs a trained checkpoint over a dataset:
//
//   Step 1: Enumerate samples        (Layer 4 - data)
//   Step 2: Load the checkpoint      (Layer 5 - ml, Layer 6)
//   Step 3: Predict, score, persist  (Layer 5 - ml)
//
// The --bidirectional flag is taken as given. When it differs
// from the mode the checkpoint was trained in, the evaluator
// logs a warning and carries on.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::data::loader::DatasetKind;
use crate::domain::architecture::Architecture;
use crate::infra::device::{CpuBackend, DeviceSpec, GpuBackend};
use crate::ml::evaluator::{EvaluationReport, Evaluator};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateConfig {
    pub data_dir:      PathBuf,
    pub checkpoint:    PathBuf,
    pub dataset:       DatasetKind,
    /// Expected architecture; None accepts whatever was saved
    pub arch:          Option<Architecture>,
    pub device:        DeviceSpec,
    pub output_dir:    PathBuf,
    pub bidirectional: bool,
    pub workers:       usize,
}

pub struct EvaluateUseCase {
    config: EvaluateConfig,
}

impl EvaluateUseCase {
    pub fn new(config: EvaluateConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<EvaluationReport> {
        let cfg = &self.config;

        // ── Step 1: Enumerate samples ─────────────────────────────────────────
        let samples = cfg.dataset.source(&cfg.data_dir).samples()?;
        if samples.is_empty() {
            anyhow::bail!("No samples found in '{}'", cfg.data_dir.display());
        }
        tracing::info!("Evaluating {} {} samples", samples.len(), cfg.dataset);

        // ── Steps 2-3: Load and run on the selected backend ───────────────────
        let report = match cfg.device {
            DeviceSpec::Cpu => {
                let device = cfg.device.ndarray();
                Evaluator::<CpuBackend>::from_checkpoint(&cfg.checkpoint, cfg.arch, &device)?
                    .evaluate(samples, &cfg.output_dir, cfg.bidirectional, cfg.workers)?
            }
            DeviceSpec::Gpu(_) => {
                let device = cfg.device.wgpu();
                Evaluator::<GpuBackend>::from_checkpoint(&cfg.checkpoint, cfg.arch, &device)?
                    .evaluate(samples, &cfg.output_dir, cfg.bidirectional, cfg.workers)?
            }
        };

        let summary = serde_json::to_string_pretty(&report)?;
        std::fs::write(cfg.output_dir.join("evaluation.json"), summary)?;
        Ok(report)
    }
}
