// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types that describe what the system works on:
// frame pairs, flow fields, the network variants and the
// errors the pipeline can raise.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O (decoding lives in data/, .flo files in infra/)
//   - Only plain structs, enums, traits and pure pixel math
//
// Keeping this layer framework-free means the EPE metric,
// augmentation geometry and flow colour coding are testable
// without a tensor backend.

// Error type shared by every layer below the CLI
pub mod error;

// Reference/target image pair and per-sample bundle
pub mod frame_pair;

// Dense 2-channel displacement field with EPE and colour coding
pub mod flow_field;

// Network variant tag selected once at configuration time
pub mod architecture;

// Core abstractions (traits) that other layers implement
pub mod traits;
