// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train <DATA>`              — trains a flow network
//   2. `infer <DATA> <PRETRAINED>` — predicts and scores flow
//                                    with a saved checkpoint
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, InferArgs, TrainArgs};

use crate::application::{
    evaluate_use_case::EvaluateUseCase,
    train_use_case::{TrainConfig, TrainUseCase},
};

#[derive(Parser, Debug)]
#[command(
    name = "selfsup-flow",
    version = "0.1.0",
    about = "Train optical flow networks with self-supervised losses, then evaluate them."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route to the matching use case; the CLI layer never computes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
            Commands::Infer(args) => run_infer(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = TrainConfig::try_from(args)?;
    tracing::info!("Training {} on '{}'", config.arch, config.data_dir.display());
    let output_dir = config.output_dir.clone();

    let use_case = TrainUseCase::new(config);
    use_case.stop_flag().install_ctrlc()?;
    let summary = use_case.execute()?;

    if summary.interrupted {
        println!(
            "Interrupted in epoch {}. Checkpoint saved to '{}'; continue with --resume.",
            summary.last_epoch,
            output_dir.display()
        );
    } else {
        println!("Training complete. Checkpoints in '{}'.", output_dir.display());
    }
    if let (Some(epe), Some(epoch)) = (summary.best_epe, summary.best_epoch) {
        println!("Best validation EPE {epe:.4} at epoch {epoch}");
    }
    Ok(())
}

fn run_infer(args: InferArgs) -> Result<()> {
    let output_dir = args.output.clone();
    let report = EvaluateUseCase::new(args.into()).execute()?;

    match report.mean_epe {
        Some(epe) => println!("\nMean EPE: {epe:.4} ({} samples scored)", report.evaluated),
        None      => println!("\nNo groundtruth available; EPE not computed"),
    }
    if report.skipped > 0 {
        println!("{} samples without groundtruth were skipped", report.skipped);
    }
    println!("Predictions written to '{}'", output_dir.display());
    Ok(())
}
