// ============================================================
// Layer 5 — Smoothness Loss
// ============================================================
// Penalises spatial variation of the flow.
//
//   first order:   rho(f(x+1) − f(x)) along x and y
//   second order:  rho(f(x+1) − 2 f(x) + f(x−1)) along x and y
//
// Edge-aware mode scales each difference by exp(−λ |∇I|) taken
// from the reference image, so motion boundaries that coincide
// with image edges are cheap.

use burn::prelude::*;

use crate::ml::loss::robust::RobustPenalty;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothnessOptions {
    pub second_order: bool,
    pub edge_aware:   bool,
    /// λ in exp(−λ |∇I|)
    pub edge_weight:  f32,
}

#[derive(Clone, Copy)]
enum Axis {
    X,
    Y,
}

impl Axis {
    fn dim(self) -> usize {
        match self {
            Axis::X => 3,
            Axis::Y => 2,
        }
    }
}

fn shifted<B: Backend>(t: &Tensor<B, 4>, axis: Axis, start: usize, len: usize) -> Tensor<B, 4> {
    t.clone().narrow(axis.dim(), start, len)
}

/// f(x+1) − f(x), one element shorter along `axis`.
fn first_diff<B: Backend>(t: &Tensor<B, 4>, axis: Axis) -> Tensor<B, 4> {
    let len = t.dims()[axis.dim()] - 1;
    shifted(t, axis, 1, len) - shifted(t, axis, 0, len)
}

/// f(x+1) − 2 f(x) + f(x−1), two elements shorter along `axis`.
fn second_diff<B: Backend>(t: &Tensor<B, 4>, axis: Axis) -> Tensor<B, 4> {
    let len = t.dims()[axis.dim()] - 2;
    shifted(t, axis, 2, len) - shifted(t, axis, 1, len) * 2.0 + shifted(t, axis, 0, len)
}

/// exp(−λ · mean_c |∇I|), shape [N, 1, ...] matching `grad`.
fn edge_weights<B: Backend>(grad: Tensor<B, 4>, lambda: f32) -> Tensor<B, 4> {
    (grad.abs().mean_dim(1) * (-lambda)).exp()
}

fn directional<B: Backend>(
    flow:    &Tensor<B, 4>,
    image:   &Tensor<B, 4>,
    axis:    Axis,
    order:   usize,
    penalty: &RobustPenalty,
    opts:    &SmoothnessOptions,
) -> Option<Tensor<B, 1>> {
    if flow.dims()[axis.dim()] <= order {
        return None;
    }
    let (diff, img_grad) = if order == 1 {
        (first_diff(flow, axis), first_diff(image, axis))
    } else {
        // central image difference aligned with the second derivative
        let len  = image.dims()[axis.dim()] - 2;
        let grad = (shifted(image, axis, 2, len) - shifted(image, axis, 0, len)) * 0.5;
        (second_diff(flow, axis), grad)
    };
    let cost = penalty.apply(diff);
    let cost = if opts.edge_aware {
        cost * edge_weights(img_grad, opts.edge_weight)
    } else {
        cost
    };
    Some(cost.mean())
}

pub fn smoothness_loss<B: Backend>(
    flow:    Tensor<B, 4>,
    image:   Tensor<B, 4>,
    penalty: &RobustPenalty,
    opts:    &SmoothnessOptions,
) -> Tensor<B, 1> {
    let mut orders = vec![1];
    if opts.second_order {
        orders.push(2);
    }
    let mut total: Option<Tensor<B, 1>> = None;
    for order in orders {
        for axis in [Axis::X, Axis::Y] {
            if let Some(term) = directional(&flow, &image, axis, order, penalty, opts) {
                total = Some(match total {
                    Some(acc) => acc + term,
                    None      => term,
                });
            }
        }
    }
    // a 1x1 field has nothing to smooth
    total.unwrap_or_else(|| Tensor::zeros([1], &flow.device()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::warp::constant_flow;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TB = NdArray<f32>;

    fn opts(second_order: bool, edge_aware: bool) -> SmoothnessOptions {
        SmoothnessOptions { second_order, edge_aware, edge_weight: 10.0 }
    }

    #[test]
    fn test_constant_flow_is_perfectly_smooth() {
        let device = Default::default();
        let flow   = constant_flow::<TB>(1, 4, 4, 3.0, -2.0, &device);
        let img    = Tensor::<TB, 4>::random([1, 3, 4, 4], burn::tensor::Distribution::Default, &device);
        let loss   = smoothness_loss(flow, img, &RobustPenalty::charbonnier(0.38, 0.001), &opts(true, true));
        assert_eq!(loss.into_scalar(), 0.0);
    }

    #[test]
    fn test_linear_ramp_has_no_second_order_cost() {
        let device = Default::default();
        let ramp: Vec<f32> = (0..2 * 4 * 4).map(|i| (i % 4) as f32).collect();
        let flow = Tensor::<TB, 4>::from_data(TensorData::new(ramp, [1, 2, 4, 4]), &device);
        let img  = Tensor::<TB, 4>::zeros([1, 3, 4, 4], &device);
        let pen  = RobustPenalty::l1();

        let d1 = smoothness_loss(flow.clone(), img.clone(), &pen, &opts(false, false));
        let d2 = smoothness_loss(flow, img, &pen, &opts(true, false));
        // second-order terms add exactly nothing on a ramp
        assert_eq!(d1.into_scalar(), d2.into_scalar());
    }

    #[test]
    fn test_edges_discount_flow_discontinuities() {
        let device = Default::default();
        // flow jumps between columns 1 and 2, image has an edge there too
        let step: Vec<f32> = (0..4 * 4).map(|i| if i % 4 < 2 { 0.0 } else { 1.0 }).collect();
        let mut two = step.clone();
        two.extend_from_slice(&step);
        let flow = Tensor::<TB, 4>::from_data(TensorData::new(two, [1, 2, 4, 4]), &device);
        let img  = Tensor::<TB, 4>::from_data(TensorData::new(step, [1, 1, 4, 4]), &device);
        let pen  = RobustPenalty::l1();

        let plain: f32 = smoothness_loss(flow.clone(), img.clone(), &pen, &opts(false, false)).into_scalar();
        let aware: f32 = smoothness_loss(flow, img, &pen, &opts(false, true)).into_scalar();
        assert!(aware < plain);
    }
}
