// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores training state using Burn's CompactRecorder.
//
// What gets saved:
//   1. model_epoch_N.mpk.gz  — network weights after epoch N
//   2. optim_epoch_N.mpk.gz  — optimizer state (Adam moments,
//                              SGD momentum) for --resume
//   3. model_best.mpk.gz     — weights with the lowest val EPE
//   4. checkpoint.json       — CheckpointMeta: architecture,
//                              network config, epoch, best EPE,
//                              bidirectional flag
//   5. train_config.json     — the full training configuration
//
// The network config is stored so inference can rebuild the
// exact module before loading weights into it; the architecture
// tag lets it refuse a checkpoint of the wrong variant.
//
// An interrupted run writes its current weights under the epoch
// it was in and marks the metadata `interrupted`, so --resume
// repeats that epoch instead of skipping it.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use burn::{
    optim::Optimizer,
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::domain::{
    architecture::Architecture,
    error::{FlowError, FlowResult},
};
use crate::ml::network::{FlowNet, FlowNetConfig};

const META_FILE:   &str = "checkpoint.json";
const CONFIG_FILE: &str = "train_config.json";
const BEST_MODEL:  &str = "model_best";
const RECORD_EXT:  &str = "mpk.gz";

/// Everything needed to rebuild and judge a saved network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub arch:          Architecture,
    pub network:       FlowNetConfig,
    /// Epoch of the most recent weights (1-based)
    pub epoch:         usize,
    /// True when `epoch` was cut short by an interrupt
    #[serde(default)]
    pub interrupted:   bool,
    pub bidirectional: bool,
    pub best_epe:      Option<f64>,
    pub best_epoch:    Option<usize>,
}

impl CheckpointMeta {
    /// Refuse to load weights into a different network variant.
    pub fn ensure_arch(&self, requested: Architecture) -> FlowResult<()> {
        if self.arch != requested {
            return Err(FlowError::config(
                "arch",
                format!("checkpoint holds a {} network but {} was requested", self.arch, requested),
            ));
        }
        Ok(())
    }

    /// First epoch a resumed run should train.
    pub fn resume_epoch(&self) -> usize {
        if self.interrupted { self.epoch } else { self.epoch + 1 }
    }
}

/// Manages saving and loading of checkpoints in one directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create the manager, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Resolve a user-supplied checkpoint path: either a checkpoint
    /// directory or a weights file inside one (with or without the
    /// .mpk.gz suffix). Returns the manager and the weights to load.
    pub fn locate(path: &Path) -> Result<(Self, PathBuf)> {
        if path.is_dir() {
            let manager = Self { dir: path.to_path_buf() };
            let weights = manager.default_weights()?;
            return Ok((manager, weights));
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Invalid checkpoint path '{}'", path.display()))?;
        let stem = name.strip_suffix(".mpk.gz").unwrap_or(name);
        let dir  = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let weights = dir.join(stem);
        if !Self::record_exists(&weights) {
            anyhow::bail!("No checkpoint at '{}'", path.display());
        }
        Ok((Self { dir }, weights))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("model_epoch_{epoch}"))
    }

    pub fn optimizer_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("optim_epoch_{epoch}"))
    }

    pub fn best_model_path(&self) -> PathBuf {
        self.dir.join(BEST_MODEL)
    }

    fn record_exists(stem: &Path) -> bool {
        stem.with_extension(RECORD_EXT).is_file()
    }

    /// Best weights when validation ran, otherwise the latest epoch.
    pub fn default_weights(&self) -> Result<PathBuf> {
        let best = self.best_model_path();
        if Self::record_exists(&best) {
            return Ok(best);
        }
        let meta = self.load_meta()?;
        Ok(self.model_path(meta.epoch))
    }

    // ─── Weights ──────────────────────────────────────────────────────────────

    pub fn save_model<B: Backend>(&self, model: &FlowNet<B>, stem: &Path) -> Result<()> {
        CompactRecorder::new()
            .record(model.clone().into_record(), stem.to_path_buf())
            .with_context(|| format!("Failed to save weights to '{}'", stem.display()))?;
        tracing::debug!("Saved weights: '{}'", stem.display());
        Ok(())
    }

    pub fn load_model<B: Backend>(
        &self,
        model:  FlowNet<B>,
        stem:   &Path,
        device: &B::Device,
    ) -> Result<FlowNet<B>> {
        let record = CompactRecorder::new()
            .load(stem.to_path_buf(), device)
            .with_context(|| {
                format!("Cannot load weights '{}'. Does it match the network config?", stem.display())
            })?;
        Ok(model.load_record(record))
    }

    pub fn save_optimizer<B, O>(&self, optim: &O, epoch: usize) -> Result<()>
    where
        B: AutodiffBackend,
        O: Optimizer<FlowNet<B>, B>,
    {
        let path = self.optimizer_path(epoch);
        CompactRecorder::new()
            .record(optim.to_record(), path.clone())
            .with_context(|| format!("Failed to save optimizer state to '{}'", path.display()))?;
        Ok(())
    }

    pub fn load_optimizer<B, O>(&self, optim: O, epoch: usize, device: &B::Device) -> Result<O>
    where
        B: AutodiffBackend,
        O: Optimizer<FlowNet<B>, B>,
    {
        let path   = self.optimizer_path(epoch);
        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load optimizer state '{}'", path.display()))?;
        Ok(optim.load_record(record))
    }

    // ─── Metadata ─────────────────────────────────────────────────────────────

    pub fn save_meta(&self, meta: &CheckpointMeta) -> Result<()> {
        self.write_json(META_FILE, meta)
    }

    pub fn load_meta(&self) -> Result<CheckpointMeta> {
        self.read_json(META_FILE).with_context(|| {
            format!("'{}' is not a checkpoint directory. Have you run 'train' first?", self.dir.display())
        })
    }

    /// Written once before training starts.
    pub fn save_config<T: Serialize>(&self, cfg: &T) -> Result<()> {
        self.write_json(CONFIG_FILE, cfg)
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).with_context(|| format!("Cannot write '{}'", path.display()))?;
        tracing::debug!("Saved '{}'", path.display());
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Malformed '{}'", path.display()))
    }
}
