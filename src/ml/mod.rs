// ============================================================
// Layer 5 — ML Layer (Burn)
// ============================================================
// All tensor code lives here. The other layers hand in host
// data (FlowSample, SamplePaths) and get back host data
// (FlowField, reports); only this layer and the batcher touch
// Burn tensors.
//
//   warp.rs      — differentiable bilinear warping built from
//                  gather + arithmetic, plus the in-bounds mask
//
//   loss/        — photometric, smoothness, census, SSIM and
//                  forward-backward consistency terms, and the
//                  LossComposer that weights them over scales
//
//   network/     — FlowNetS and PWC-Net behind the FlowNet enum
//                  module, both emitting a flow pyramid
//
//   trainer.rs   — the training loop: forward, loss, backward,
//                  optimizer step, validation, checkpoints
//
//   evaluator.rs — loads a checkpoint, predicts flow over a
//                  dataset, scores EPE and writes .flo/.png
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Meister et al. (2018) UnFlow
//            Jonschkowski et al. (2020) What Matters in Unsupervised Optical Flow

/// Bilinear warping
pub mod warp;

/// Self-supervised loss terms and their composition
pub mod loss;

/// FlowNetS / PWC-Net flow estimators
pub mod network;

/// Full training loop with validation and checkpointing
pub mod trainer;

/// Checkpoint evaluation and prediction output
pub mod evaluator;
