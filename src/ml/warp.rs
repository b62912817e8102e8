// ============================================================
// Layer 5 — Warping Operator
// ============================================================
// warp(image, flow)(p) = image sampled at p + flow(p)
//
// Bilinear interpolation built from gather + arithmetic, so the
// result is differentiable w.r.t. both the image values and the
// flow (through the interpolation weights). Taps that land
// outside the image contribute zero.
//
// Shapes:
//   image: [N, C, H, W]
//   flow:  [N, 2, H, W]   channel 0 = dx, channel 1 = dy (pixels)
//   out:   [N, C, H, W]
//
// With this convention warp(target, forward_flow) reconstructs
// the reference frame.

use burn::prelude::*;

/// Absolute sampling coordinates (x, y), each [N, 1, H, W].
fn sample_coords<B: Backend>(flow: &Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
    let [_, _, h, w] = flow.dims();
    let device = flow.device();

    let grid_x = Tensor::<B, 1, Int>::arange(0..w as i64, &device)
        .float()
        .reshape([1, 1, 1, w]);
    let grid_y = Tensor::<B, 1, Int>::arange(0..h as i64, &device)
        .float()
        .reshape([1, 1, h, 1]);

    let dx = flow.clone().narrow(1, 0, 1);
    let dy = flow.clone().narrow(1, 1, 1);

    // [N,1,H,W] + [1,1,1,W] broadcasts over batch and rows
    (dx + grid_x, dy + grid_y)
}

/// 1.0 where `coord` lies in [0, max], else 0.0
fn inside<B: Backend>(coord: Tensor<B, 4>, max: f32) -> Tensor<B, 4> {
    let lo = coord.clone().greater_equal_elem(0.0).float();
    let hi = coord.lower_equal_elem(max).float();
    lo * hi
}

/// Pick `flat[n, c, y * W + x]` for integer-valued coordinate tensors.
fn gather_corner<B: Backend>(
    flat: Tensor<B, 3>,
    x:    Tensor<B, 4>,
    y:    Tensor<B, 4>,
    dims: [usize; 4],
) -> Tensor<B, 4> {
    let [n, c, h, w] = dims;
    let xc = x.clamp(0.0, (w - 1) as f32);
    let yc = y.clamp(0.0, (h - 1) as f32);
    let index = (yc * w as f32 + xc)
        .int()
        .reshape([n, 1, h * w])
        .repeat_dim(1, c);
    flat.gather(2, index).reshape([n, c, h, w])
}

/// Backward-warp `image` by `flow`.
pub fn warp<B: Backend>(image: Tensor<B, 4>, flow: Tensor<B, 4>) -> Tensor<B, 4> {
    let dims @ [n, c, h, w] = image.dims();
    let (x, y) = sample_coords(&flow);

    // corner coordinates carry no gradient; the weights do
    let x0 = x.clone().detach().floor();
    let y0 = y.clone().detach().floor();
    let x1 = x0.clone() + 1.0;
    let y1 = y0.clone() + 1.0;

    let wx1 = x - x0.clone();
    let wy1 = y - y0.clone();
    let wx0 = wx1.clone().neg() + 1.0;
    let wy0 = wy1.clone().neg() + 1.0;

    let (max_x, max_y) = ((w - 1) as f32, (h - 1) as f32);
    let flat = image.reshape([n, c, h * w]);

    let corners = [
        (x0.clone(), y0.clone(), wx0.clone() * wy0.clone()),
        (x1.clone(), y0,         wx1.clone() * wy0),
        (x0,         y1.clone(), wx0 * wy1.clone()),
        (x1,         y1,         wx1 * wy1),
    ];

    let mut out: Option<Tensor<B, 4>> = None;
    for (cx, cy, weight) in corners {
        let valid  = inside(cx.clone(), max_x) * inside(cy.clone(), max_y);
        let values = gather_corner(flat.clone(), cx, cy, dims);
        let term   = values * (weight * valid);
        out = Some(match out {
            Some(acc) => acc + term,
            None      => term,
        });
    }
    // four corners were always pushed
    out.unwrap_or_else(|| Tensor::zeros(dims, &flat.device()))
}

/// 1.0 where p + flow(p) lands inside the frame, shape [N, 1, H, W].
pub fn in_bounds_mask<B: Backend>(flow: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, h, w] = flow.dims();
    let (x, y) = sample_coords(&flow);
    inside(x, (w - 1) as f32) * inside(y, (h - 1) as f32)
}

/// Shift every flow vector by a constant, handy for tests and
/// for building synthetic fields.
pub fn constant_flow<B: Backend>(
    n: usize,
    h: usize,
    w: usize,
    dx: f32,
    dy: f32,
    device: &B::Device,
) -> Tensor<B, 4> {
    let u = Tensor::<B, 4>::ones([n, 1, h, w], device) * dx;
    let v = Tensor::<B, 4>::ones([n, 1, h, w], device) * dy;
    Tensor::cat(vec![u, v], 1)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TB = NdArray<f32>;

    fn image(data: Vec<f32>, c: usize, h: usize, w: usize) -> Tensor<TB, 4> {
        Tensor::from_data(TensorData::new(data, [1, c, h, w]), &Default::default())
    }

    fn values(t: Tensor<TB, 4>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_zero_flow_is_identity() {
        let data: Vec<f32> = (0..2 * 3 * 4).map(|i| (i as f32 * 0.37).sin()).collect();
        let img  = image(data.clone(), 2, 3, 4);
        let flow = constant_flow::<TB>(1, 3, 4, 0.0, 0.0, &Default::default());
        assert_eq!(values(warp(img, flow)), data);
    }

    #[test]
    fn test_integer_shift_samples_right_neighbour() {
        let img  = image(vec![1.0, 2.0, 3.0, 4.0], 1, 1, 4);
        let flow = constant_flow::<TB>(1, 1, 4, 1.0, 0.0, &Default::default());
        // last column samples x = 4 which is outside
        assert_eq!(values(warp(img, flow)), vec![2.0, 3.0, 4.0, 0.0]);
    }

    #[test]
    fn test_half_pixel_shift_interpolates() {
        let img  = image(vec![0.0, 2.0, 4.0], 1, 1, 3);
        let flow = constant_flow::<TB>(1, 1, 3, 0.5, 0.0, &Default::default());
        let out  = values(warp(img, flow));
        approx::assert_abs_diff_eq!(out[0], 1.0, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(out[1], 3.0, epsilon = 1e-6);
        // half of the right tap is out of bounds
        approx::assert_abs_diff_eq!(out[2], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_in_bounds_mask() {
        let flow = constant_flow::<TB>(1, 2, 3, -1.0, 0.0, &Default::default());
        let mask = values(in_bounds_mask(flow));
        assert_eq!(mask, vec![0.0, 1.0, 1.0, 0.0, 1.0, 1.0]);
    }
}
