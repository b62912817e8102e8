// ============================================================
// Layer 5 — Ternary Census Loss
// ============================================================
// Compares local intensity *patterns* instead of raw values, so
// the loss survives brightness and contrast changes between
// frames.
//
// For each pixel and each neighbour within `radius`:
//   n = I(neighbour) − I(centre)         (greyscale, 0..255 range)
//   t = n / sqrt(0.81 + n²)              soft sign
// Distance between two transforms at a pixel:
//   d = Σ (t1 − t2)² / (0.1 + (t1 − t2)²)
// and the loss is mean rho(d) over the interior (pixels whose
// full neighbourhood is inside the frame).

use burn::prelude::*;

use crate::ml::loss::robust::{masked_mean, RobustPenalty};
use crate::ml::warp::warp;

const SOFT_SIGN_EPS: f32 = 0.81;
const DISTANCE_EPS:  f32 = 0.1;

/// Smallest spatial side the census transform can run on.
pub fn min_side(radius: usize) -> usize {
    2 * radius + 1
}

fn greyscale<B: Backend>(image: Tensor<B, 4>) -> Tensor<B, 4> {
    image.mean_dim(1) * 255.0
}

/// Soft-signed neighbour differences, one [N,1,H-2r,W-2r] tensor
/// per offset.
fn census_transform<B: Backend>(grey: &Tensor<B, 4>, radius: usize) -> Vec<Tensor<B, 4>> {
    let [_, _, h, w] = grey.dims();
    let (ih, iw) = (h - 2 * radius, w - 2 * radius);
    let centre   = grey.clone().narrow(2, radius, ih).narrow(3, radius, iw);

    let side = min_side(radius);
    let mut out = Vec::with_capacity(side * side - 1);
    for oy in 0..side {
        for ox in 0..side {
            if oy == radius && ox == radius {
                continue;
            }
            let n = grey.clone().narrow(2, oy, ih).narrow(3, ox, iw) - centre.clone();
            let soft = n.clone() / (n.clone() * n + SOFT_SIGN_EPS).sqrt();
            out.push(soft);
        }
    }
    out
}

fn hamming_like<B: Backend>(a: Vec<Tensor<B, 4>>, b: Vec<Tensor<B, 4>>) -> Tensor<B, 4> {
    let zeros = a[0].zeros_like();
    a.into_iter()
        .zip(b)
        .map(|(ta, tb)| {
            let diff = ta - tb;
            let sq   = diff.clone() * diff;
            sq.clone() / (sq + DISTANCE_EPS)
        })
        .fold(zeros, |acc, t| acc + t)
}

pub fn census_loss<B: Backend>(
    reference: Tensor<B, 4>,
    target:    Tensor<B, 4>,
    flow:      Tensor<B, 4>,
    radius:    usize,
    penalty:   &RobustPenalty,
    mask:      Option<Tensor<B, 4>>,
) -> Tensor<B, 1> {
    let warped = warp(target, flow);
    let ref_t  = census_transform(&greyscale(reference), radius);
    let tgt_t  = census_transform(&greyscale(warped), radius);
    let cost   = penalty.apply(hamming_like(ref_t, tgt_t));

    let [_, _, ih, iw] = cost.dims();
    match mask {
        Some(mask) => masked_mean(cost, mask.narrow(2, radius, ih).narrow(3, radius, iw)),
        None       => cost.mean(),
    }
}
