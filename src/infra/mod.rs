// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by the application and ML layers:
//
//   checkpoint.rs  — network/optimizer records (CompactRecorder)
//                    plus checkpoint.json metadata and the
//                    training config, so inference can rebuild
//                    the exact network
//
//   flow_store.rs  — Middlebury .flo read/write and colour-coded
//                    PNG output for predictions
//
//   metrics.rs     — per-epoch CSV and per-step JSON-lines
//                    scalar log
//
//   device.rs      — --device parsing (cpu, gpu, gpu:N)
//
//   shutdown.rs    — Ctrl-C stop flag polled between batches
//
// Reference: Burn Book §5 (Checkpointing)

/// Model and optimizer checkpoint saving and loading
pub mod checkpoint;

/// .flo files and flow visualisations
pub mod flow_store;

/// Training metrics CSV and event log
pub mod metrics;

/// Compute device selection
pub mod device;

/// Graceful interruption
pub mod shutdown;
