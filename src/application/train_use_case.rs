// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Validate the configuration  (loss + network, before
//                                        any tensor is built)
//           and settle the network      (a resumed or pretrained
//                                        checkpoint's wins; its
//                                        factor sizes the crops)
//   Step 2: Enumerate samples           (Layer 4 - data)
//   Step 3: Split train/validation      (Layer 4 - data)
//   Step 4: Build datasets              (Layer 4 - data)
//   Step 5: Save config                 (Layer 6 - infra)
//   Step 6: Run training loop           (Layer 5 - ml) on the
//                                        backend --device picks
//
// Reference: Burn Book §5 (Training)

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::{
    augment::{Augmentation, GeometricJitter, DEFAULT_CROP},
    dataset::FlowDataset,
    loader::DatasetKind,
    splitter::SplitPolicy,
};
use crate::domain::{
    architecture::Architecture,
    error::{FlowError, FlowResult},
};
use crate::infra::{
    checkpoint::CheckpointManager,
    device::{CpuTrainBackend, DeviceSpec, GpuTrainBackend},
    shutdown::StopFlag,
};
use crate::ml::{
    loss::{
        supervised::{SupervisedLoss, DEFAULT_SCALE_WEIGHTS},
        LossComposer, LossConfig,
    },
    network::FlowNetConfig,
    trainer::{resolve_network, run_training, Objective, Solver, TrainingSummary},
};

// ─── Training Configuration ──────────────────────────────────────────────────
// All options for a training run, built once from the CLI.
// Serialisable so it is saved next to the checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub data_dir:      PathBuf,
    pub dataset:       DatasetKind,
    pub arch:          Architecture,
    pub device:        DeviceSpec,
    pub bidirectional: bool,
    pub output_dir:    PathBuf,
    pub epochs:        usize,
    /// Batches per epoch, 0 = the whole training split
    pub epoch_size:    usize,
    pub batch_size:    usize,
    pub lr:            f64,
    pub solver:        Solver,
    /// Adam β1 or SGD momentum
    pub momentum:      f64,
    /// Adam β2
    pub beta:          f64,
    pub weight_decay:  f64,
    pub milestones:    Vec<usize>,
    pub split:         SplitPolicy,
    pub workers:       usize,
    pub seed:          u64,
    pub div_flow:      f64,
    pub levels:        usize,
    /// Training crop (height, width)
    pub crop:          (usize, usize),
    pub pretrained:    Option<PathBuf>,
    /// Continue from the checkpoint in `output_dir`
    pub resume:        bool,
    pub loss:          LossConfig,
    /// Train on multiscale EPE against groundtruth instead of `loss`
    #[serde(default)]
    pub supervised:    bool,
    /// Supervised weight per scale, finest first
    #[serde(default = "default_scale_weights")]
    pub multiscale_weights: Vec<f64>,
    /// Groundtruth has unknown pixels; also turns off geometric jitter
    #[serde(default)]
    pub sparse:        bool,
}

fn default_scale_weights() -> Vec<f64> {
    DEFAULT_SCALE_WEIGHTS.to_vec()
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_dir:      PathBuf::from("data"),
            dataset:       DatasetKind::FlyingChairs,
            arch:          Architecture::FlowNetS,
            device:        DeviceSpec::default(),
            bidirectional: false,
            output_dir:    PathBuf::from("checkpoints"),
            epochs:        1000,
            epoch_size:    1000,
            batch_size:    8,
            lr:            1e-4,
            solver:        Solver::Adam,
            momentum:      0.9,
            beta:          0.999,
            weight_decay:  4e-4,
            milestones:    vec![100, 150, 200],
            split:         SplitPolicy::default(),
            workers:       8,
            seed:          42,
            div_flow:      20.0,
            levels:        5,
            crop:          DEFAULT_CROP,
            pretrained:    None,
            resume:        false,
            loss:          LossConfig::default(),
            supervised:    false,
            multiscale_weights: default_scale_weights(),
            sparse:        false,
        }
    }
}

impl TrainConfig {
    pub fn network(&self) -> FlowNetConfig {
        FlowNetConfig::new(self.arch)
            .with_levels(self.levels)
            .with_div_flow(self.div_flow)
    }

    /// What each step minimises.
    pub fn objective(&self, div_flow: f64) -> FlowResult<Objective> {
        if self.supervised {
            let loss = SupervisedLoss::new(self.multiscale_weights.clone(), self.sparse, div_flow)?;
            Ok(Objective::Supervised(loss))
        } else {
            Ok(Objective::SelfSupervised(LossComposer::new(self.loss.clone(), self.bidirectional)?))
        }
    }

    /// Sparse groundtruth is never rotated or shifted.
    pub fn jitter(&self) -> Option<GeometricJitter> {
        (!self.sparse).then(GeometricJitter::default)
    }

    /// Everything that can be rejected without touching data.
    pub fn validate(&self) -> FlowResult<()> {
        let network = self.network();
        network.validate()?;
        self.objective(self.div_flow)?;
        if self.supervised && self.dataset == DatasetKind::Frames {
            return Err(FlowError::config(
                "supervised",
                format!("the {} dataset has no groundtruth flow", self.dataset),
            ));
        }

        if self.epochs == 0 {
            return Err(FlowError::config("epochs", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(FlowError::config("batch-size", "must be at least 1"));
        }
        if !(self.lr >= 0.0 && self.lr.is_finite()) {
            return Err(FlowError::config("lr", format!("must be a non-negative number, got {}", self.lr)));
        }
        if !(0.0..1.0).contains(&self.beta) || !(0.0..1.0).contains(&self.momentum) {
            return Err(FlowError::config("momentum/beta", "must lie in [0, 1)"));
        }
        if self.weight_decay < 0.0 {
            return Err(FlowError::config("weight-decay", "must be non-negative"));
        }
        if let SplitPolicy::Fraction(f) = self.split {
            if !(f > 0.0 && f <= 1.0) {
                return Err(FlowError::config("split-value", format!("must lie in (0, 1], got {f}")));
            }
        }
        if self.resume && self.pretrained.is_some() {
            return Err(FlowError::config("resume", "cannot be combined with --pretrained"));
        }
        Ok(())
    }

    /// The crop has to hold at least one tile of the trained network.
    pub fn check_crop(&self, factor: usize) -> FlowResult<()> {
        if self.crop.0 < factor || self.crop.1 < factor {
            return Err(FlowError::config(
                "crop",
                format!("{:?} is smaller than the pyramid factor {}", self.crop, factor),
            ));
        }
        Ok(())
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
    stop:   StopFlag,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config, stop: StopFlag::new() }
    }

    /// Flag polled between batches; the CLI wires it to Ctrl-C.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<TrainingSummary> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        // SSIM/consistency without --bidirectional fails here, before
        // any network is built.
        cfg.validate()?;
        let checkpoints = CheckpointManager::new(&cfg.output_dir)?;
        let network     = resolve_network(cfg, &checkpoints)?;
        let objective   = cfg.objective(network.div_flow)?;
        let factor      = network.factor();
        cfg.check_crop(factor)?;

        // ── Step 2: Enumerate samples ─────────────────────────────────────────
        tracing::info!("Reading {} samples from '{}'", cfg.dataset, cfg.data_dir.display());
        let samples = cfg.dataset.source(&cfg.data_dir).samples()?;
        if samples.is_empty() {
            anyhow::bail!("No samples found in '{}'", cfg.data_dir.display());
        }
        tracing::info!("Found {} frame pairs", samples.len());

        // ── Step 3: Train / validation split ──────────────────────────────────
        let (train_samples, val_samples) = cfg.split.apply(samples, cfg.seed)?;
        if train_samples.is_empty() {
            anyhow::bail!("The split leaves no training samples");
        }
        tracing::info!("Split: {} train, {} validation", train_samples.len(), val_samples.len());

        // ── Step 4: Build Burn datasets ───────────────────────────────────────
        let train_dataset = FlowDataset::new(
            train_samples,
            Augmentation::Train { crop: cfg.crop, factor, jitter: cfg.jitter() },
            cfg.seed,
        );
        let val_dataset = FlowDataset::new(val_samples, Augmentation::Eval { factor }, cfg.seed);

        // ── Step 5: Save config next to the checkpoints ───────────────────────
        checkpoints.save_config(cfg)?;

        // ── Step 6: Run training loop (Layer 5) ───────────────────────────────
        tracing::info!("Training on {}", cfg.device);
        let summary = match cfg.device {
            DeviceSpec::Cpu => run_training::<CpuTrainBackend>(
                cfg, &network, &objective, train_dataset, val_dataset, &checkpoints, &self.stop,
                &cfg.device.ndarray(),
            ),
            DeviceSpec::Gpu(_) => run_training::<GpuTrainBackend>(
                cfg, &network, &objective, train_dataset, val_dataset, &checkpoints, &self.stop,
                &cfg.device.wgpu(),
            ),
        }
        .with_context(|| format!("Training run in '{}' failed", cfg.output_dir.display()))?;

        Ok(summary)
    }
}
