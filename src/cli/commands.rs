// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `infer`, and all
// their configurable flags.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → usize, f64, Architecture, ...)
//     through each type's FromStr
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{builder::BoolishValueParser, ArgAction, Args, Subcommand};

use crate::application::{
    evaluate_use_case::EvaluateConfig,
    train_use_case::TrainConfig,
};
use crate::data::{loader::DatasetKind, splitter::SplitPolicy};
use crate::domain::architecture::Architecture;
use crate::infra::device::DeviceSpec;
use crate::ml::{
    loss::{supervised::DEFAULT_SCALE_WEIGHTS, LossConfig, LossTerm},
    trainer::Solver,
};

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a flow network with self-supervised (or supervised EPE) losses
    Train(TrainArgs),

    /// Run a trained checkpoint over a dataset and score EPE
    Infer(InferArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Dataset root directory
    pub data: PathBuf,

    /// Dataset layout: flying_chairs, sintel_clean, sintel_final or frames
    #[arg(long, default_value = "flying_chairs")]
    pub dataset: DatasetKind,

    /// Network architecture: flownets or pwcnet
    #[arg(long, short = 'a', default_value = "flownets")]
    pub arch: Architecture,

    /// cpu, gpu or gpu:N
    #[arg(long, default_value = "gpu")]
    pub device: DeviceSpec,

    /// Also estimate backward flow (needed by consistency and SSIM)
    #[arg(long)]
    pub bidirectional: bool,

    /// Where checkpoints, metrics.csv and events.jsonl go
    #[arg(long, default_value = "checkpoints")]
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = 1000)]
    pub epochs: usize,

    /// Batches per epoch, 0 for the whole training split
    #[arg(long, default_value_t = 1000)]
    pub epoch_size: usize,

    #[arg(long, short = 'b', default_value_t = 8)]
    pub batch_size: usize,

    #[arg(long, alias = "learning-rate", default_value_t = 1e-4)]
    pub lr: f64,

    /// adam or sgd
    #[arg(long, default_value = "adam")]
    pub solver: Solver,

    /// SGD momentum, or Adam beta1
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,

    /// Adam beta2
    #[arg(long, default_value_t = 0.999)]
    pub beta: f64,

    #[arg(long, alias = "wd", default_value_t = 4e-4)]
    pub weight_decay: f64,

    /// Epochs after which the learning rate is halved
    #[arg(long, num_args = 0.., value_delimiter = ',', default_values_t = [100, 150, 200])]
    pub milestones: Vec<usize>,

    /// Train/validation split file ("1" = train, "2" = validation per sample)
    #[arg(long, short = 's', conflicts_with = "split_value")]
    pub split_file: Option<PathBuf>,

    /// Fraction of samples used for training (default 0.8)
    #[arg(long)]
    pub split_value: Option<f64>,

    /// Data loading threads
    #[arg(long, short = 'j', default_value_t = 8)]
    pub workers: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Value the raw network output is divided by
    #[arg(long, default_value_t = 20.0)]
    pub div_flow: f64,

    /// Pyramid levels; frames are cropped to a multiple of 2^levels
    #[arg(long, default_value_t = 5)]
    pub levels: usize,

    #[arg(long, default_value_t = 320)]
    pub crop_height: usize,

    #[arg(long, default_value_t = 448)]
    pub crop_width: usize,

    /// Checkpoint directory or weights file to start from
    #[arg(long)]
    pub pretrained: Option<PathBuf>,

    /// Continue the run saved in --output-dir
    #[arg(long)]
    pub resume: bool,

    /// YAML file with loss options; the weight flags below override it
    #[arg(long)]
    pub loss_config: Option<PathBuf>,

    #[arg(long)]
    pub photometric_weight: Option<f64>,

    #[arg(long)]
    pub smoothness_weight: Option<f64>,

    #[arg(long)]
    pub consistency_weight: Option<f64>,

    #[arg(long)]
    pub census_weight: Option<f64>,

    #[arg(long)]
    pub ssim_weight: Option<f64>,

    /// Plain L1 photometric penalty instead of Charbonnier
    #[arg(long)]
    pub use_l1: bool,

    /// Second-order smoothness
    #[arg(long)]
    pub second_order: bool,

    /// false trains on multiscale EPE against groundtruth instead
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "true",
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
    )]
    pub self_supervised_loss: bool,

    /// Supervised weight per scale, finest first
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_SCALE_WEIGHTS)]
    pub multiscale_weights: Vec<f64>,

    /// Groundtruth with unknown pixels (KITTI-style); disables rotation and translation
    #[arg(long)]
    pub sparse: bool,
}

impl TrainArgs {
    fn loss(&self) -> anyhow::Result<LossConfig> {
        let mut loss = match &self.loss_config {
            Some(path) => LossConfig::load(path)?,
            None => LossConfig::default(),
        };
        let overrides = [
            (LossTerm::Photometric, self.photometric_weight),
            (LossTerm::Smoothness,  self.smoothness_weight),
            (LossTerm::Consistency, self.consistency_weight),
            (LossTerm::Census,      self.census_weight),
            (LossTerm::Ssim,        self.ssim_weight),
        ];
        for (term, weight) in overrides {
            if let Some(w) = weight {
                loss.set_weight(term, w);
            }
        }
        loss.use_l1       |= self.use_l1;
        loss.second_order |= self.second_order;
        Ok(loss)
    }
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// This is the boundary between Layer 1 and Layer 2;
/// the application layer never sees clap types.
impl TryFrom<TrainArgs> for TrainConfig {
    type Error = anyhow::Error;

    fn try_from(a: TrainArgs) -> anyhow::Result<Self> {
        let loss  = a.loss()?;
        let split = match (a.split_file, a.split_value) {
            (Some(file), _)     => SplitPolicy::File(file),
            (None, Some(value)) => SplitPolicy::Fraction(value),
            (None, None)        => SplitPolicy::default(),
        };
        Ok(TrainConfig {
            data_dir:      a.data,
            dataset:       a.dataset,
            arch:          a.arch,
            device:        a.device,
            bidirectional: a.bidirectional,
            output_dir:    a.output_dir,
            epochs:        a.epochs,
            epoch_size:    a.epoch_size,
            batch_size:    a.batch_size,
            lr:            a.lr,
            solver:        a.solver,
            momentum:      a.momentum,
            beta:          a.beta,
            weight_decay:  a.weight_decay,
            milestones:    a.milestones,
            split,
            workers:       a.workers,
            seed:          a.seed,
            div_flow:      a.div_flow,
            levels:        a.levels,
            crop:          (a.crop_height, a.crop_width),
            pretrained:    a.pretrained,
            resume:        a.resume,
            loss,
            supervised:    !a.self_supervised_loss,
            multiscale_weights: a.multiscale_weights,
            sparse:        a.sparse,
        })
    }
}

/// All arguments for the `infer` command
#[derive(Args, Debug)]
pub struct InferArgs {
    /// Dataset root directory
    pub data: PathBuf,

    /// Checkpoint directory or weights file
    pub pretrained: PathBuf,

    /// Directory for predicted .flo and .png files
    #[arg(long, short = 'o', default_value = "flow_output")]
    pub output: PathBuf,

    /// Also predict and save backward flow (true/false)
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
    )]
    pub bidirectional: bool,

    #[arg(long, default_value = "flying_chairs")]
    pub dataset: DatasetKind,

    /// Expected architecture; refuse checkpoints of another kind
    #[arg(long, short = 'a')]
    pub arch: Option<Architecture>,

    #[arg(long, default_value = "gpu")]
    pub device: DeviceSpec,

    #[arg(long, short = 'j', default_value_t = 4)]
    pub workers: usize,
}

impl From<InferArgs> for EvaluateConfig {
    fn from(a: InferArgs) -> Self {
        EvaluateConfig {
            data_dir:      a.data,
            checkpoint:    a.pretrained,
            dataset:       a.dataset,
            arch:          a.arch,
            device:        a.device,
            output_dir:    a.output,
            bidirectional: a.bidirectional,
            workers:       a.workers,
        }
    }
}
