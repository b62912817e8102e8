// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Epoch/batch loop over Burn's DataLoader:
//
//   forward pass (plus swapped-input pass when bidirectional)
//   → multiscale self-supervised loss, or multiscale EPE
//     against groundtruth in supervised mode
//   → backward → optimizer step
//   → scalars to events.jsonl
//
// and at every epoch end: validation EPE on the held-out split,
// metrics.csv row, model/optimizer checkpoint, best model.
//
// Key Burn insight:
//   - Training runs on B (an Autodiff backend) for gradients
//   - model.valid() returns the network on B::InnerBackend, so
//     the validation loader batches for the inner backend too
//
// A NaN or infinite loss aborts the run with
// FlowError::Divergence after logging the offending samples.
// Ctrl-C is honoured between batches: the current weights are
// checkpointed and the run returns normally. A stop that lands
// after an epoch's last batch lets the epoch finish.
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use std::{fmt, str::FromStr};

use anyhow::Result;
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, AdamConfig, GradientsParams,
        Optimizer, SgdConfig,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::{BatchResult, FlowBatch, FlowBatcher},
    dataset::{FlowDataset, FlowItem},
};
use crate::domain::{
    error::{FlowError, FlowResult},
    flow_field::EpeStats,
};
use crate::infra::{
    checkpoint::{CheckpointManager, CheckpointMeta},
    metrics::{EpochMetrics, EventLog, MetricsLogger},
    shutdown::StopFlag,
};
use crate::ml::{
    evaluator::{batch_epe, flow_fields},
    loss::{supervised::SupervisedLoss, LossBreakdown, LossComposer, LossOutput},
    network::{FlowNet, FlowNetConfig},
};

// ─── Solver ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Solver {
    Adam,
    Sgd,
}

impl fmt::Display for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Solver::Adam => "adam",
            Solver::Sgd  => "sgd",
        })
    }
}

impl FromStr for Solver {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adam" => Ok(Solver::Adam),
            "sgd"  => Ok(Solver::Sgd),
            other  => Err(FlowError::config("solver", format!("unknown solver '{other}' (adam or sgd)"))),
        }
    }
}

/// Multi-step schedule: the rate halves once each milestone
/// epoch has completed.
pub fn lr_for_epoch(base: f64, milestones: &[usize], epoch: usize) -> f64 {
    let passed = milestones.iter().filter(|&&m| m < epoch).count();
    base * 0.5f64.powi(passed as i32)
}

// ─── Objective ────────────────────────────────────────────────────────────────

/// What a training step minimises.
#[derive(Debug, Clone)]
pub enum Objective {
    SelfSupervised(LossComposer),
    /// Multiscale EPE against groundtruth; its breakdown is empty
    Supervised(SupervisedLoss),
}

impl Objective {
    pub fn bidirectional(&self) -> bool {
        match self {
            Objective::SelfSupervised(composer) => composer.bidirectional(),
            Objective::Supervised(_)            => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Objective::SelfSupervised(composer) => format!("terms {:?}", composer.terms()),
            Objective::Supervised(loss) => format!(
                "supervised EPE, scale weights {:?}{}",
                loss.scale_weights,
                if loss.sparse { ", sparse" } else { "" }
            ),
        }
    }

    pub fn compute<B: Backend>(
        &self,
        batch:    &FlowBatch<B>,
        forward:  &[Tensor<B, 4>],
        backward: Option<&[Tensor<B, 4>]>,
    ) -> FlowResult<LossOutput<B>> {
        match self {
            Objective::SelfSupervised(composer) => composer.compute_multiscale(
                batch.reference.clone(),
                batch.target.clone(),
                forward,
                backward,
            ),
            Objective::Supervised(loss) => {
                let (ground_truth, known) = batch.ground_truth_tensor()?;
                loss.compute(forward, ground_truth, known)
            }
        }
    }
}

// ─── Single Step ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct StepReport {
    pub loss:      f64,
    pub breakdown: LossBreakdown,
    /// Forward-flow EPE over the batch's groundtruth, if any
    pub epe:       EpeStats,
}

/// One optimisation step on one batch.
pub fn train_step<B, O>(
    model:     FlowNet<B>,
    optim:     &mut O,
    objective: &Objective,
    batch:     FlowBatch<B>,
    lr:        f64,
    step:      usize,
) -> Result<(FlowNet<B>, StepReport)>
where
    B: AutodiffBackend,
    O: Optimizer<FlowNet<B>, B>,
{
    model.check_input(batch.reference.dims())?;
    let (forward, backward) = model.forward_pair(
        batch.reference.clone(),
        batch.target.clone(),
        objective.bidirectional(),
    );
    let output = objective.compute(&batch, &forward, backward.as_deref())?;

    if !output.total_value.is_finite() {
        tracing::error!(
            "Loss is {} at step {} (samples {:?}): {:?}",
            output.total_value, step, batch.indices, output.breakdown
        );
        return Err(FlowError::Divergence { step, value: output.total_value }.into());
    }

    let epe = if batch.ground_truth.iter().any(Option::is_some) {
        batch_epe(&flow_fields(forward[0].clone())?, &batch.ground_truth)?
    } else {
        EpeStats::default()
    };

    // Backward pass + optimizer update
    let grads = output.total.backward();
    let grads = GradientsParams::from_grads(grads, &model);
    let model = optim.step(lr, model, grads);

    Ok((model, StepReport { loss: output.total_value, breakdown: output.breakdown, epe }))
}

// ─── Validation ───────────────────────────────────────────────────────────────

/// Mean forward-flow EPE over every batch that has groundtruth.
fn validate<B: Backend>(
    model:   &FlowNet<B>,
    batches: impl Iterator<Item = BatchResult<B>>,
) -> Result<Option<f64>> {
    let mut stats = EpeStats::default();
    for batch in batches {
        let batch = batch.map_err(FlowError::from)?;
        if !batch.has_ground_truth() {
            continue;
        }
        model.check_input(batch.reference.dims())?;
        let flows = model.forward(batch.reference, batch.target);
        stats.merge(batch_epe(&flow_fields(flows[0].clone())?, &batch.ground_truth)?);
    }
    Ok(stats.mean())
}

// ─── Run ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSummary {
    /// Last epoch with saved weights
    pub last_epoch:  usize,
    pub interrupted: bool,
    pub final_loss:  Option<f64>,
    pub best_epe:    Option<f64>,
    pub best_epoch:  Option<usize>,
}

/// Whether the epoch stopped before its planned last batch.
fn epoch_cut_short(done: usize, planned: usize, stop: &StopFlag) -> bool {
    done < planned && stop.is_set()
}

/// Network a run trains: the checkpoint's when resuming, or when
/// the pretrained weights carry metadata; otherwise the one `cfg`
/// describes. Crops must be sized for this network's factor.
pub fn resolve_network(cfg: &TrainConfig, checkpoints: &CheckpointManager) -> Result<FlowNetConfig> {
    let meta = if cfg.resume {
        Some(checkpoints.load_meta()?)
    } else if let Some(path) = &cfg.pretrained {
        CheckpointManager::locate(path)?.0.load_meta().ok()
    } else {
        None
    };
    let Some(meta) = meta else {
        return Ok(cfg.network());
    };
    meta.ensure_arch(cfg.arch)?;
    if meta.network.levels != cfg.levels {
        tracing::warn!(
            "Checkpoint network has {} levels, not the requested {}; keeping the checkpoint's",
            meta.network.levels, cfg.levels
        );
    }
    Ok(meta.network)
}

/// Where the first epoch starts from.
struct StartPoint<B: Backend> {
    model:  FlowNet<B>,
    resume: Option<CheckpointMeta>,
}

fn start_point<B: Backend>(
    cfg:         &TrainConfig,
    network:     &FlowNetConfig,
    checkpoints: &CheckpointManager,
    device:      &B::Device,
) -> Result<StartPoint<B>> {
    if cfg.resume {
        let meta    = checkpoints.load_meta()?;
        let weights = checkpoints.model_path(meta.epoch);
        let model   = checkpoints.load_model(network.init::<B>(device), &weights, device)?;
        tracing::info!("Resuming from '{}' (epoch {})", weights.display(), meta.epoch);
        return Ok(StartPoint { model, resume: Some(meta) });
    }

    let model = match &cfg.pretrained {
        Some(path) => {
            let (source, weights) = CheckpointManager::locate(path)?;
            let model = source.load_model(network.init::<B>(device), &weights, device)?;
            tracing::info!("Initialised from pretrained weights '{}'", weights.display());
            model
        }
        None => network.init::<B>(device),
    };
    Ok(StartPoint { model, resume: None })
}

/// Train `network` with the solver named in `cfg`.
#[allow(clippy::too_many_arguments)]
pub fn run_training<B: AutodiffBackend>(
    cfg:           &TrainConfig,
    network:       &FlowNetConfig,
    objective:     &Objective,
    train_dataset: FlowDataset,
    val_dataset:   FlowDataset,
    checkpoints:   &CheckpointManager,
    stop:          &StopFlag,
    device:        &B::Device,
) -> Result<TrainingSummary> {
    let weight_decay = (cfg.weight_decay > 0.0).then(|| WeightDecayConfig::new(cfg.weight_decay as f32));
    match cfg.solver {
        Solver::Adam => {
            // m = β1*m + (1-β1)*g        (mean)
            // v = β2*v + (1-β2)*g²       (variance)
            // θ = θ - lr * m / (√v + ε)  (update)
            let optim = AdamConfig::new()
                .with_beta_1(cfg.momentum as f32)
                .with_beta_2(cfg.beta as f32)
                .with_epsilon(1e-8)
                .with_weight_decay(weight_decay)
                .init::<B, FlowNet<B>>();
            train_loop(cfg, network, objective, optim, train_dataset, val_dataset, checkpoints, stop, device)
        }
        Solver::Sgd => {
            let optim = SgdConfig::new()
                .with_momentum(Some(MomentumConfig::new().with_momentum(cfg.momentum).with_dampening(0.0)))
                .with_weight_decay(weight_decay)
                .init::<B, FlowNet<B>>();
            train_loop(cfg, network, objective, optim, train_dataset, val_dataset, checkpoints, stop, device)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn train_loop<B, O>(
    cfg:           &TrainConfig,
    network:       &FlowNetConfig,
    objective:     &Objective,
    mut optim:     O,
    train_dataset: FlowDataset,
    val_dataset:   FlowDataset,
    checkpoints:   &CheckpointManager,
    stop:          &StopFlag,
    device:        &B::Device,
) -> Result<TrainingSummary>
where
    B: AutodiffBackend,
    O: Optimizer<FlowNet<B>, B>,
{
    // ── Build or restore the network ──────────────────────────────────────────
    let start = start_point::<B>(cfg, network, checkpoints, device)?;
    let mut model = start.model;
    let (first_epoch, mut best_epe, mut best_epoch) = match &start.resume {
        Some(meta) => {
            optim = checkpoints.load_optimizer::<B, O>(optim, meta.epoch, device)?;
            (meta.resume_epoch(), meta.best_epe, meta.best_epoch)
        }
        None => (1, None, None),
    };
    tracing::info!(
        "{} network, {} levels, solver {}, {}",
        network.arch, network.levels, cfg.solver, objective.describe()
    );

    let metrics    = MetricsLogger::new(checkpoints.dir())?;
    let mut events = EventLog::new(checkpoints.dir())?;

    // ── Data loaders ──────────────────────────────────────────────────────────
    let train_len = train_dataset.sample_count();
    let train_loader = DataLoaderBuilder::<B, FlowItem, BatchResult<B>>::new(FlowBatcher::new())
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(cfg.workers.max(1))
        .set_device(device.clone())
        .build(train_dataset);

    // Validation crops keep each frame's own size, so batch one at a time
    let val_loader = (val_dataset.sample_count() > 0).then(|| {
        DataLoaderBuilder::<B::InnerBackend, FlowItem, BatchResult<B::InnerBackend>>::new(FlowBatcher::new())
            .batch_size(1)
            .num_workers(cfg.workers.max(1))
            .set_device(device.clone())
            .build(val_dataset)
    });

    let mut batches_per_epoch = train_len.div_ceil(cfg.batch_size.max(1));
    if cfg.epoch_size > 0 {
        batches_per_epoch = batches_per_epoch.min(cfg.epoch_size);
    }
    let mut step = (first_epoch - 1) * batches_per_epoch;
    let mut summary = TrainingSummary { best_epe, best_epoch, ..Default::default() };

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in first_epoch..=cfg.epochs {
        let lr = lr_for_epoch(cfg.lr, &cfg.milestones, epoch);
        let mut loss_sum    = 0.0f64;
        let mut batches     = 0usize;
        let mut train_epe   = EpeStats::default();

        for batch in train_loader.iter().take(batches_per_epoch) {
            if stop.is_set() {
                break;
            }
            let batch = batch.map_err(FlowError::from)?;
            let (next, report) = train_step(model, &mut optim, objective, batch, lr, step)?;
            model = next;

            events.scalar(step, "train/loss", report.loss)?;
            for entry in &report.breakdown.entries {
                events.scalar(step, &format!("train/{}", entry.term), entry.unweighted)?;
            }
            if let Some(epe) = report.epe.mean() {
                events.scalar(step, "train/epe", epe)?;
            }
            loss_sum += report.loss;
            batches  += 1;
            step     += 1;
            train_epe.merge(report.epe);
            tracing::debug!("epoch {} batch {} loss {:.5}", epoch, batches, report.loss);
        }
        let interrupted = epoch_cut_short(batches, batches_per_epoch, stop);

        let avg_loss = (batches > 0).then(|| loss_sum / batches as f64);
        summary.final_loss = avg_loss.or(summary.final_loss);

        if interrupted {
            // Partial epoch: keep the weights, repeat the epoch on --resume
            checkpoints.save_model(&model, &checkpoints.model_path(epoch))?;
            checkpoints.save_optimizer::<B, O>(&optim, epoch)?;
            checkpoints.save_meta(&CheckpointMeta {
                arch:          network.arch,
                network:       network.clone(),
                epoch,
                interrupted:   true,
                bidirectional: objective.bidirectional(),
                best_epe,
                best_epoch,
            })?;
            events.flush()?;
            tracing::warn!("Interrupted during epoch {}; checkpoint saved", epoch);
            summary.last_epoch  = epoch;
            summary.interrupted = true;
            return Ok(summary);
        }

        // ── Validation phase ──────────────────────────────────────────────────
        // model.valid() → FlowNet<B::InnerBackend>, no autodiff graph
        let val_epe = match &val_loader {
            Some(loader) => validate(&model.valid(), loader.iter())?,
            None         => None,
        };

        let row = EpochMetrics {
            epoch,
            train_loss: avg_loss.unwrap_or(f64::NAN),
            train_epe:  train_epe.mean(),
            val_epe,
            lr,
        };
        metrics.log(&row)?;
        if let Some(epe) = val_epe {
            events.scalar(step, "val/epe", epe)?;
        }
        events.scalar(step, "train/lr", lr)?;
        events.flush()?;

        println!(
            "Epoch {:>3}/{} | loss={:.4} | train_epe={} | val_epe={} | lr={:.2e}",
            epoch, cfg.epochs, row.train_loss,
            row.train_epe.map(|v| format!("{v:.3}")).unwrap_or_else(|| "-".into()),
            val_epe.map(|v| format!("{v:.3}")).unwrap_or_else(|| "-".into()),
            lr,
        );

        // ── Checkpoint ────────────────────────────────────────────────────────
        if row.is_improvement(best_epe) {
            best_epe   = val_epe;
            best_epoch = Some(epoch);
            checkpoints.save_model(&model, &checkpoints.best_model_path())?;
            tracing::info!("New best EPE {:.4} at epoch {}", val_epe.unwrap_or_default(), epoch);
        }
        checkpoints.save_model(&model, &checkpoints.model_path(epoch))?;
        checkpoints.save_optimizer::<B, O>(&optim, epoch)?;
        checkpoints.save_meta(&CheckpointMeta {
            arch:          network.arch,
            network:       network.clone(),
            epoch,
            interrupted:   false,
            bidirectional: objective.bidirectional(),
            best_epe,
            best_epoch,
        })?;
        tracing::info!("Checkpoint saved for epoch {}", epoch);

        summary.last_epoch = epoch;
        summary.best_epe   = best_epe;
        summary.best_epoch = best_epoch;
    }

    events.flush()?;
    tracing::info!("Training complete!");
    Ok(summary)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{architecture::Architecture, flow_field::FlowField};
    use crate::ml::loss::LossConfig;
    use burn::{
        backend::{Autodiff, NdArray},
        record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
        tensor::Distribution,
    };

    type TB = Autodiff<NdArray<f32>>;

    fn tiny_net() -> FlowNet<TB> {
        FlowNetConfig::new(Architecture::FlowNetS)
            .with_levels(2)
            .with_base_channels(2)
            .init(&Default::default())
    }

    fn batch(reference: Tensor<TB, 4>, gt: bool) -> FlowBatch<TB> {
        let [_, _, h, w] = reference.dims();
        let target = Tensor::random([1, 3, h, w], Distribution::Uniform(0.0, 1.0), &Default::default());
        FlowBatch {
            reference,
            target,
            ground_truth: vec![gt.then(|| FlowField::zeros(h, w))],
            indices:      vec![5],
            frame_sizes:  vec![(h, w)],
        }
    }

    fn self_supervised() -> Objective {
        Objective::SelfSupervised(LossComposer::new(LossConfig::default(), false).unwrap())
    }

    fn weights(model: &FlowNet<TB>) -> Vec<u8> {
        BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(model.clone().into_record(), ())
            .unwrap()
    }

    #[test]
    fn test_lr_halves_after_each_milestone() {
        let ms = [2, 4];
        assert_eq!(lr_for_epoch(1e-4, &ms, 1), 1e-4);
        assert_eq!(lr_for_epoch(1e-4, &ms, 2), 1e-4);
        assert_eq!(lr_for_epoch(1e-4, &ms, 3), 5e-5);
        assert_eq!(lr_for_epoch(1e-4, &ms, 5), 2.5e-5);
        assert_eq!(lr_for_epoch(1e-4, &[], 100), 1e-4);
    }

    #[test]
    fn test_parse_solver() {
        assert_eq!("Adam".parse::<Solver>().unwrap(), Solver::Adam);
        assert_eq!("sgd".parse::<Solver>().unwrap(), Solver::Sgd);
        assert!("rmsprop".parse::<Solver>().unwrap_err().is_config());
    }

    #[test]
    fn test_zero_learning_rate_leaves_weights_identical() {
        let device   = Default::default();
        let model    = tiny_net();
        let before   = weights(&model);
        let objective = self_supervised();
        let mut optim = AdamConfig::new().init::<TB, FlowNet<TB>>();

        let reference = Tensor::random([1, 3, 8, 12], Distribution::Uniform(0.0, 1.0), &device);
        let (model, report) =
            train_step(model, &mut optim, &objective, batch(reference, true), 0.0, 0).unwrap();

        assert!(report.loss.is_finite());
        assert!(report.epe.mean().is_some());
        assert_eq!(before, weights(&model));
    }

    #[test]
    fn test_nan_loss_is_divergence() {
        let objective = self_supervised();
        let mut optim = SgdConfig::new().init::<TB, FlowNet<TB>>();
        let reference = Tensor::full([1, 3, 8, 12], f32::NAN, &Default::default());

        let err = train_step(tiny_net(), &mut optim, &objective, batch(reference, false), 1e-3, 42)
            .err()
            .unwrap();
        match err.downcast_ref::<FlowError>() {
            Some(FlowError::Divergence { step, value }) => {
                assert_eq!(*step, 42);
                assert!(value.is_nan());
            }
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn test_batch_not_divisible_by_network_factor_is_config_error() {
        let mut optim = SgdConfig::new().init::<TB, FlowNet<TB>>();
        let reference = Tensor::random([1, 3, 8, 10], Distribution::Uniform(0.0, 1.0), &Default::default());

        let err = train_step(tiny_net(), &mut optim, &self_supervised(), batch(reference, false), 1e-3, 0)
            .err()
            .unwrap();
        assert!(err.downcast_ref::<FlowError>().unwrap().is_config());
    }

    #[test]
    fn test_supervised_step_scores_groundtruth() {
        let objective = Objective::Supervised(SupervisedLoss::new(vec![0.32, 0.08], false, 20.0).unwrap());
        let mut optim = AdamConfig::new().init::<TB, FlowNet<TB>>();
        let device    = Default::default();

        let reference = Tensor::random([1, 3, 8, 12], Distribution::Uniform(0.0, 1.0), &device);
        let (_, report) =
            train_step(tiny_net(), &mut optim, &objective, batch(reference, true), 1e-3, 0).unwrap();
        assert!(report.loss.is_finite() && report.loss > 0.0);
        assert!(report.breakdown.entries.is_empty());
        assert!(!objective.bidirectional());

        let reference = Tensor::random([1, 3, 8, 12], Distribution::Uniform(0.0, 1.0), &device);
        let err = train_step(tiny_net(), &mut optim, &objective, batch(reference, false), 1e-3, 1)
            .err()
            .unwrap();
        assert!(err.downcast_ref::<FlowError>().unwrap().is_config());
    }

    #[test]
    fn test_stop_after_last_batch_keeps_the_epoch() {
        let stop = StopFlag::new();
        assert!(!epoch_cut_short(3, 4, &stop));
        stop.request_stop();
        assert!(!epoch_cut_short(4, 4, &stop));
        assert!(epoch_cut_short(3, 4, &stop));
        assert!(epoch_cut_short(0, 4, &stop));
    }

    #[test]
    fn test_resume_trains_the_checkpoint_network() {
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let saved   = FlowNetConfig::new(Architecture::FlowNetS).with_levels(3);
        manager.save_meta(&CheckpointMeta {
            arch:          Architecture::FlowNetS,
            network:       saved,
            epoch:         1,
            interrupted:   false,
            bidirectional: false,
            best_epe:      None,
            best_epoch:    None,
        }).unwrap();

        let mut cfg = TrainConfig { levels: 2, output_dir: dir.path().to_path_buf(), ..Default::default() };
        assert_eq!(resolve_network(&cfg, &manager).unwrap().levels, 2);
        cfg.resume = true;
        let network = resolve_network(&cfg, &manager).unwrap();
        assert_eq!(network.levels, 3);
        assert_eq!(network.factor(), 8);

        cfg.arch = Architecture::PwcNet;
        assert!(resolve_network(&cfg, &manager).is_err());
    }
}
