// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Two sinks for training scalars:
//
//   metrics.csv   — one row per epoch (loss, EPE, learning rate)
//                   easy to open in a spreadsheet or plot
//   events.jsonl  — one JSON object per scalar per step:
//                   {"step": 120, "tag": "train/census", "value": 0.41}
//                   read by dashboards and plotting scripts
//
// Example CSV output:
//   epoch,train_loss,train_epe,val_epe,lr
//   1,0.412300,8.120000,7.930000,0.000100
//   2,0.388100,7.540000,7.410000,0.000100
//
// EPE columns are empty when the dataset has no groundtruth.

use anyhow::Result;
use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
};
use serde::{Deserialize, Serialize};

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    /// Mean total self-supervised loss over the epoch's batches
    pub train_loss: f64,

    /// Mean EPE of the forward flow on training batches with groundtruth
    pub train_epe: Option<f64>,

    /// Mean EPE on the held-out split
    pub val_epe: Option<f64>,

    /// Learning rate used during this epoch
    pub lr: f64,
}

impl EpochMetrics {
    /// True when this epoch's validation EPE beats `best`.
    pub fn is_improvement(&self, best: Option<f64>) -> bool {
        match (self.val_epe, best) {
            (Some(epe), Some(best)) => epe < best,
            (Some(_), None)         => true,
            (None, _)               => false,
        }
    }
}

fn optional(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.6}")).unwrap_or_default()
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet,
    /// so resumed runs append to the same log.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = File::create(&csv_path)?;
            writeln!(f, "epoch,train_loss,train_epe,val_epe,lr")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }
        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;
        writeln!(
            f,
            "{},{:.6},{},{},{:.6}",
            m.epoch,
            m.train_loss,
            optional(m.train_epe),
            optional(m.val_epe),
            m.lr,
        )?;
        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_epe={:?}",
            m.epoch, m.train_loss, m.val_epe,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

/// One scalar sample in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub step:  usize,
    pub tag:   String,
    pub value: f64,
}

/// Append-only JSON-lines scalar log.
pub struct EventLog {
    path:   PathBuf,
    writer: BufWriter<File>,
}

impl EventLog {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let path = dir.join("events.jsonl");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, writer: BufWriter::new(file) })
    }

    pub fn scalar(&mut self, step: usize, tag: &str, value: f64) -> Result<()> {
        let event = ScalarEvent { step, tag: tag.to_string(), value };
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}
