// ============================================================
// Layer 5 — Supervised Multiscale EPE
// ============================================================
// Baseline objective for datasets with groundtruth flow:
//
//   L = Σ_k w_k · mean_p ‖ 2^k · flow_k(p) − gt_k(p) ‖ / div_flow
//
// gt_k is the groundtruth average-pooled to scale k, still in
// full-resolution pixels, and 2^k · flow_k brings the prediction
// to the same units. Dividing by div_flow puts the weights on
// the scale of the raw network output. Scales past the end of
// the weight list, or weighted 0, are skipped.
//
// Sparse mode pools known pixels only and averages the error
// over the scale pixels that covered at least one of them.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use super::{accumulate, downsample, robust::masked_mean, scalar, LossBreakdown, LossOutput};
use crate::domain::error::{FlowError, FlowResult};

/// Finest scale first.
pub const DEFAULT_SCALE_WEIGHTS: [f64; 5] = [0.005, 0.01, 0.02, 0.08, 0.32];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisedLoss {
    pub scale_weights: Vec<f64>,
    /// Groundtruth has unknown pixels
    pub sparse:        bool,
    pub div_flow:      f64,
}

/// Per-pixel endpoint error, [N, 1, H, W].
fn epe_map<B: Backend>(prediction: Tensor<B, 4>, ground_truth: Tensor<B, 4>) -> Tensor<B, 4> {
    let diff = prediction - ground_truth;
    // offset keeps the gradient of sqrt finite at zero error
    ((diff.clone() * diff).sum_dim(1) + 1e-12).sqrt()
}

impl SupervisedLoss {
    pub fn new(scale_weights: Vec<f64>, sparse: bool, div_flow: f64) -> FlowResult<Self> {
        if let Some(w) = scale_weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(FlowError::config(
                "multiscale-weights",
                format!("weights must be finite and non-negative, got {w}"),
            ));
        }
        if !scale_weights.iter().any(|w| *w > 0.0) {
            return Err(FlowError::config("multiscale-weights", "no scale has a positive weight"));
        }
        if !(div_flow > 0.0 && div_flow.is_finite()) {
            return Err(FlowError::config("div-flow", format!("must be positive, got {div_flow}")));
        }
        Ok(Self { scale_weights, sparse, div_flow })
    }

    /// `flows` is the pyramid in pixel units of each scale, `known`
    /// is 1 where `ground_truth` holds a real value.
    pub fn compute<B: Backend>(
        &self,
        flows:        &[Tensor<B, 4>],
        ground_truth: Tensor<B, 4>,
        known:        Tensor<B, 4>,
    ) -> FlowResult<LossOutput<B>> {
        let mut total: Option<Tensor<B, 1>> = None;
        for (k, (flow, &weight)) in flows.iter().zip(&self.scale_weights).enumerate() {
            if weight == 0.0 {
                continue;
            }
            let [_, _, h, w] = flow.dims();
            let prediction = flow.clone() * (1u64 << k) as f32;
            let error = if self.sparse {
                let coverage = downsample(known.clone(), h, w);
                let pooled   = downsample(ground_truth.clone() * known.clone(), h, w)
                    / coverage.clone().clamp_min(1e-6);
                let mask     = coverage.greater_elem(0.0).float();
                masked_mean(epe_map(prediction, pooled), mask)
            } else {
                epe_map(prediction, downsample(ground_truth.clone(), h, w)).mean()
            };
            total = accumulate(total, error * (weight / self.div_flow) as f32);
        }
        let total = total.ok_or_else(|| {
            FlowError::config(
                "multiscale-weights",
                format!("no positive weight among the first {} scales", flows.len()),
            )
        })?;
        Ok(LossOutput { total_value: scalar(&total), total, breakdown: LossBreakdown::default() })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::warp::constant_flow;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TB = NdArray<f32>;

    fn ones(h: usize, w: usize) -> Tensor<TB, 4> {
        Tensor::ones([1, 1, h, w], &Default::default())
    }

    #[test]
    fn test_rejects_unusable_weights() {
        assert!(SupervisedLoss::new(vec![], false, 20.0).unwrap_err().is_config());
        assert!(SupervisedLoss::new(vec![0.0, 0.0], false, 20.0).is_err());
        assert!(SupervisedLoss::new(vec![0.1, -1.0], false, 20.0).is_err());
        assert!(SupervisedLoss::new(vec![0.1], false, 0.0).is_err());
        assert!(SupervisedLoss::new(DEFAULT_SCALE_WEIGHTS.to_vec(), false, 20.0).is_ok());
    }

    #[test]
    fn test_perfect_prediction_costs_nothing() {
        let device = Default::default();
        let gt     = constant_flow::<TB>(1, 8, 8, 1.5, -2.0, &device);
        let loss   = SupervisedLoss::new(vec![1.0], false, 1.0).unwrap();
        let out    = loss.compute(&[gt.clone()], gt, ones(8, 8)).unwrap();
        assert!(out.total_value < 1e-5);
        assert!(out.breakdown.entries.is_empty());
    }

    #[test]
    fn test_scales_compare_in_full_resolution_pixels() {
        let device = Default::default();
        let gt     = constant_flow::<TB>(1, 8, 8, 2.0, 0.0, &device);
        let pyramid = vec![
            constant_flow::<TB>(1, 8, 8, 0.0, 0.0, &device),
            // 1 px at half resolution is 2 px at full resolution
            constant_flow::<TB>(1, 4, 4, 1.0, 0.0, &device),
        ];
        let loss = SupervisedLoss::new(vec![0.5, 1.0], false, 2.0).unwrap();
        let out  = loss.compute(&pyramid, gt, ones(8, 8)).unwrap();
        // 0.5 * 2 / 2 + 1.0 * 0 / 2
        approx::assert_abs_diff_eq!(out.total_value, 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_sparse_mode_ignores_unknown_pixels() {
        let device = Default::default();
        // left half known with flow (1, 0); right half unknown (zeroed)
        let mut gt_data = vec![0.0f32; 2 * 16];
        let mut known   = vec![0.0f32; 16];
        for y in 0..4 {
            for x in 0..2 {
                gt_data[y * 4 + x] = 1.0;
                known[y * 4 + x]   = 1.0;
            }
        }
        let gt    = Tensor::<TB, 4>::from_data(TensorData::new(gt_data, [1, 2, 4, 4]), &device);
        let known = Tensor::<TB, 4>::from_data(TensorData::new(known, [1, 1, 4, 4]), &device);
        let pred  = constant_flow::<TB>(1, 4, 4, 1.0, 0.0, &device);

        let sparse = SupervisedLoss::new(vec![1.0], true, 1.0).unwrap()
            .compute(&[pred.clone()], gt.clone(), known.clone()).unwrap();
        let dense  = SupervisedLoss::new(vec![1.0], false, 1.0).unwrap()
            .compute(&[pred], gt, known).unwrap();

        assert!(sparse.total_value < 1e-5);
        approx::assert_abs_diff_eq!(dense.total_value, 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_weights_past_the_pyramid_are_ignored() {
        let device = Default::default();
        let gt     = constant_flow::<TB>(1, 4, 4, 3.0, 4.0, &device);
        let pred   = constant_flow::<TB>(1, 4, 4, 0.0, 0.0, &device);
        let loss   = SupervisedLoss::new(vec![1.0, 9.0, 9.0], false, 1.0).unwrap();
        let out    = loss.compute(&[pred.clone()], gt.clone(), ones(4, 4)).unwrap();
        approx::assert_abs_diff_eq!(out.total_value, 5.0, epsilon = 1e-4);

        let only_coarse = SupervisedLoss::new(vec![0.0, 1.0], false, 1.0).unwrap();
        assert!(only_coarse.compute(&[pred], gt, ones(4, 4)).err().unwrap().is_config());
    }
}
