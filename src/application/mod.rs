// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// one goal (training or evaluating a flow network).
//
// Rules for this layer:
//   - No tensor math or network code here
//   - No argument parsing here (that's Layer 1)
//   - Picks the Burn backend from the --device option, once
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The training workflow
pub mod train_use_case;

// The checkpoint evaluation workflow
pub mod evaluate_use_case;
