// ============================================================
// Layer 5 — Robust Penalty
// ============================================================
// Generalised Charbonnier, shifted so that rho(0) == 0:
//
//   rho(x) = (x² + ε²)^α − (ε²)^α
//
// α < 0.5 makes it sub-linear for large residuals, which keeps
// occlusions and outliers from dominating the loss. With
// `use_l1` the penalty is plain |x|.

use burn::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustPenalty {
    pub exponent: f32,
    pub epsilon:  f32,
    pub use_l1:   bool,
}

impl RobustPenalty {
    pub fn charbonnier(exponent: f64, epsilon: f64) -> Self {
        Self { exponent: exponent as f32, epsilon: epsilon as f32, use_l1: false }
    }

    pub fn l1() -> Self {
        Self { exponent: 0.5, epsilon: 0.0, use_l1: true }
    }

    /// Element-wise penalty.
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        if self.use_l1 {
            return x.abs();
        }
        let eps2   = self.epsilon * self.epsilon;
        // the anchor goes through the same kernel so rho(0) is exactly 0
        let anchor = (x.zeros_like() + eps2).powf_scalar(self.exponent);
        (x.clone() * x + eps2).powf_scalar(self.exponent) - anchor
    }
}

/// Mean of `penalty * mask` over the pixels the mask keeps.
///
/// `penalty` is [N, C, H, W], `mask` is [N, 1, H, W] with values
/// in {0, 1}. An all-zero mask gives 0.
pub fn masked_mean<B: Backend>(penalty: Tensor<B, 4>, mask: Tensor<B, 4>) -> Tensor<B, 1> {
    let channels = penalty.dims()[1] as f32;
    let kept     = mask.clone().sum() * channels;
    (penalty * mask).sum() / kept.clamp_min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TB = NdArray<f32>;

    fn t(data: Vec<f32>) -> Tensor<TB, 1> {
        let n = data.len();
        Tensor::from_data(TensorData::new(data, [n]), &Default::default())
    }

    #[test]
    fn test_charbonnier_is_zero_at_zero() {
        let rho = RobustPenalty::charbonnier(0.45, 0.001);
        let out = rho.apply(t(vec![0.0, 0.0])).into_data().to_vec::<f32>().unwrap();
        assert_eq!(out, vec![0.0, 0.0]);
    }

    #[test]
    fn test_charbonnier_is_sublinear() {
        let rho = RobustPenalty::charbonnier(0.25, 0.001);
        let out = rho.apply(t(vec![1.0, 16.0])).into_data().to_vec::<f32>().unwrap();
        // 16^(2 * 0.25) = 4
        approx::assert_abs_diff_eq!(out[1], 4.0, epsilon = 1e-2);
        assert!(out[1] / out[0] < 16.0);
    }

    #[test]
    fn test_l1() {
        let out = RobustPenalty::l1()
            .apply(t(vec![-2.0, 3.0]))
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(out, vec![2.0, 3.0]);
    }

    #[test]
    fn test_masked_mean_ignores_masked_pixels() {
        let device = Default::default();
        let pen  = Tensor::<TB, 4>::from_data(TensorData::new(vec![1.0f32, 100.0], [1, 1, 1, 2]), &device);
        let mask = Tensor::<TB, 4>::from_data(TensorData::new(vec![1.0f32, 0.0], [1, 1, 1, 2]), &device);
        let v: f32 = masked_mean(pen, mask).into_scalar();
        assert_eq!(v, 1.0);
    }
}
