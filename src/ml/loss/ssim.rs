// ============================================================
// Layer 5 — SSIM Loss
// ============================================================
// Structural similarity between the target frame and the
// reference frame warped forward by the backward flow:
//
//   L = mean clamp((1 − SSIM(I_tgt, warp(I_ref, flow_bw))) / 2, 0, 1)
//
// Local statistics use a 3x3 mean filter without padding, so
// the SSIM map is two pixels smaller than the input per axis.

use burn::{nn::pool::AvgPool2dConfig, prelude::*};

use crate::ml::warp::warp;

const C1: f32 = 0.01 * 0.01;
const C2: f32 = 0.03 * 0.03;

/// Side of the mean filter; inputs smaller than this are skipped.
pub const WINDOW: usize = 3;

pub fn ssim_map<B: Backend>(x: Tensor<B, 4>, y: Tensor<B, 4>) -> Tensor<B, 4> {
    let pool = AvgPool2dConfig::new([WINDOW, WINDOW])
        .with_strides([1, 1])
        .init();

    let mu_x = pool.forward(x.clone());
    let mu_y = pool.forward(y.clone());

    let sigma_x  = pool.forward(x.clone() * x.clone()) - mu_x.clone() * mu_x.clone();
    let sigma_y  = pool.forward(y.clone() * y.clone()) - mu_y.clone() * mu_y.clone();
    let sigma_xy = pool.forward(x * y) - mu_x.clone() * mu_y.clone();

    let numerator = (mu_x.clone() * mu_y.clone() * 2.0 + C1) * (sigma_xy * 2.0 + C2);
    let denominator =
        (mu_x.clone() * mu_x + mu_y.clone() * mu_y + C1) * (sigma_x + sigma_y + C2);
    numerator / denominator
}

pub fn ssim_loss<B: Backend>(
    reference:     Tensor<B, 4>,
    target:        Tensor<B, 4>,
    backward_flow: Tensor<B, 4>,
) -> Tensor<B, 1> {
    let reconstructed = warp(reference, backward_flow);
    let similarity    = ssim_map(target, reconstructed);
    ((similarity.neg() + 1.0) * 0.5).clamp(0.0, 1.0).mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::warp::constant_flow;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TB = NdArray<f32>;

    #[test]
    fn test_identical_frames_are_fully_similar() {
        let device = Default::default();
        let img    = Tensor::<TB, 4>::random([1, 3, 6, 6], Distribution::Default, &device);
        let flow   = constant_flow::<TB>(1, 6, 6, 0.0, 0.0, &device);
        let loss: f32 = ssim_loss(img.clone(), img, flow).into_scalar();
        approx::assert_abs_diff_eq!(loss, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_unrelated_frames_are_penalised() {
        let device = Default::default();
        let a    = Tensor::<TB, 4>::random([1, 3, 6, 6], Distribution::Default, &device);
        // inverted contrast: every local correlation is negative
        let b    = a.clone().neg() + 1.0;
        let flow = constant_flow::<TB>(1, 6, 6, 0.0, 0.0, &device);
        let loss: f32 = ssim_loss(a, b, flow).into_scalar();
        assert!(loss > 0.3, "loss {loss}");
    }

    #[test]
    fn test_map_shrinks_by_window() {
        let device = Default::default();
        let x = Tensor::<TB, 4>::ones([2, 1, 5, 7], &device);
        assert_eq!(ssim_map(x.clone(), x).dims(), [2, 1, 3, 5]);
    }
}
