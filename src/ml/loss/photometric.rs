// ============================================================
// Layer 5 — Photometric Loss
// ============================================================
// Brightness constancy: the target frame warped back by the
// forward flow should reproduce the reference frame.
//
//   L = mean_p rho( I_ref(p) − I_tgt(p + flow(p)) )

use burn::prelude::*;

use crate::ml::loss::robust::{masked_mean, RobustPenalty};
use crate::ml::warp::warp;

pub fn photometric_loss<B: Backend>(
    reference: Tensor<B, 4>,
    target:    Tensor<B, 4>,
    flow:      Tensor<B, 4>,
    penalty:   &RobustPenalty,
    mask:      Option<Tensor<B, 4>>,
) -> Tensor<B, 1> {
    let reconstructed = warp(target, flow);
    let residual      = penalty.apply(reference - reconstructed);
    match mask {
        Some(mask) => masked_mean(residual, mask),
        None       => residual.mean(),
    }
}
