// ============================================================
// Layer 5 — Forward-Backward Consistency
// ============================================================
// Following a pixel forward and then back should land where it
// started:
//
//   d(p) = fw(p) + bw(p + fw(p))
//
// Pixels where that fails badly are treated as occluded:
//
//   |d|² ≥ a1 · (|fw|² + |bw_warped|²) + a2
//
// The loss is mean rho(d) over in-bounds, non-occluded pixels.
// The same mask (without gradient) is handed to the photometric
// and census terms so occluded pixels stop pulling on them.

use burn::prelude::*;

use crate::ml::loss::robust::{masked_mean, RobustPenalty};
use crate::ml::warp::{in_bounds_mask, warp};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcclusionThresholds {
    pub alpha1: f32,
    pub alpha2: f32,
}

impl Default for OcclusionThresholds {
    fn default() -> Self {
        Self { alpha1: 0.01, alpha2: 0.5 }
    }
}

pub struct Consistency<B: Backend> {
    pub loss: Tensor<B, 1>,
    /// 1 where the pixel is visible in both frames, [N, 1, H, W]
    pub mask: Tensor<B, 4>,
}

fn squared_norm<B: Backend>(flow: Tensor<B, 4>) -> Tensor<B, 4> {
    (flow.clone() * flow).sum_dim(1)
}

/// Consistency of `forward` against `backward`, measured on the
/// forward flow's pixel grid.
pub fn consistency<B: Backend>(
    forward:    Tensor<B, 4>,
    backward:   Tensor<B, 4>,
    penalty:    &RobustPenalty,
    thresholds: &OcclusionThresholds,
) -> Consistency<B> {
    let bw_warped = warp(backward, forward.clone());
    let diff      = forward.clone() + bw_warped.clone();

    let mismatch = squared_norm(diff.clone());
    let scale    = squared_norm(forward.clone()) + squared_norm(bw_warped);
    let limit    = scale * thresholds.alpha1 + thresholds.alpha2;

    let visible = mismatch.clone().detach().lower(limit.detach()).float();
    let mask    = (visible * in_bounds_mask(forward.detach())).detach();

    Consistency {
        loss: masked_mean(penalty.apply(diff), mask.clone()),
        mask,
    }
}
