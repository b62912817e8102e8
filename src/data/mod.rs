// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between files on disk and tensor batches on the
// training device.
//
// The pipeline flows in this order:
//
//   dataset directory
//       │
//       ▼
//   loader.rs     → layout discovery (chairs / sintel / frames),
//                   image + .flo decoding
//       │
//       ▼
//   splitter.rs   → train / validation split (file or fraction)
//       │
//       ▼
//   dataset.rs    → Burn Dataset, lazy loading, retry-once
//       │
//       ▼
//   augment.rs    → jitter + random crop + flips (train), edge padding (eval)
//       │
//       ▼
//   batcher.rs    → Burn Batcher, [N, 3, H, W] frame tensors
//       │
//       ▼
//   DataLoader    → shuffled, prefetched by worker threads
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Dataset layouts and frame/flow decoding
pub mod loader;

/// Geometric co-transforms for frames and groundtruth
pub mod augment;

/// Burn Dataset over sample paths
pub mod dataset;

/// Burn Batcher producing frame-pair tensors
pub mod batcher;

/// Train/validation split policies
pub mod splitter;
