// ============================================================
// Layer 5 — PWC-Net (lite)
// ============================================================
// Pyramid, Warping, Cost volume:
//
//   1. Both frames go through the same feature pyramid.
//   2. At the coarsest level, flow is estimated from the cost
//      volume between the two feature maps.
//   3. At each finer level the coarser flow is upsampled, the
//      target features are warped by it, a local cost volume
//      (search radius `max_displacement`) is built and an
//      estimator predicts a residual on top of the upsampled
//      flow.
//
// Features are not normalised (no batch norm), so the network
// is a pure function of its weights.

use burn::{
    nn::conv::{Conv2d, ConvTranspose2d},
    prelude::*,
};

use super::{activate, flow_head, to_pixels, upsample2x, ConvBlock, FlowNetConfig};
use crate::ml::warp::warp;

/// Hidden width of every flow estimator.
const ESTIMATOR_WIDTH: usize = 32;

#[derive(Module, Debug)]
pub struct FeatureLevel<B: Backend> {
    pub down:   ConvBlock<B>,
    pub refine: ConvBlock<B>,
}

impl<B: Backend> FeatureLevel<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.refine.forward(self.down.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct Estimator<B: Backend> {
    pub hidden1: ConvBlock<B>,
    pub hidden2: ConvBlock<B>,
    pub head:    Conv2d<B>,
}

impl<B: Backend> Estimator<B> {
    fn new(input: usize, device: &B::Device) -> Self {
        Self {
            hidden1: ConvBlock::new(input, ESTIMATOR_WIDTH, 1, device),
            hidden2: ConvBlock::new(ESTIMATOR_WIDTH, ESTIMATOR_WIDTH / 2, 1, device),
            head:    flow_head(ESTIMATOR_WIDTH / 2, device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.head.forward(self.hidden2.forward(self.hidden1.forward(x)))
    }
}

#[derive(Module, Debug)]
pub struct PwcNet<B: Backend> {
    /// pyramid[i] produces level i (level 0 keeps full resolution)
    pub pyramid:    Vec<FeatureLevel<B>>,
    /// estimators[i] for i = 0..=L
    pub estimators: Vec<Estimator<B>>,
    /// upflow[i] lifts level i+1 flow to level i
    pub upflow:     Vec<ConvTranspose2d<B>>,
    pub levels:     usize,
    pub div_flow:   f64,
    pub max_displacement: usize,
}

/// Correlation of `f1` with `f2` shifted by every offset in
/// [-md, md]², averaged over channels. Out-of-frame taps read 0.
/// Output: [N, (2md+1)², H, W]
pub fn cost_volume<B: Backend>(f1: Tensor<B, 4>, f2: Tensor<B, 4>, md: usize) -> Tensor<B, 4> {
    let [n, c, h, w] = f2.dims();
    let device = f2.device();

    let pad_cols = Tensor::<B, 4>::zeros([n, c, h, md], &device);
    let padded   = Tensor::cat(vec![pad_cols.clone(), f2, pad_cols], 3);
    let pad_rows = Tensor::<B, 4>::zeros([n, c, md, w + 2 * md], &device);
    let padded   = Tensor::cat(vec![pad_rows.clone(), padded, pad_rows], 2);

    let side = 2 * md + 1;
    let mut planes = Vec::with_capacity(side * side);
    for dy in 0..side {
        for dx in 0..side {
            let shifted = padded.clone().narrow(2, dy, h).narrow(3, dx, w);
            planes.push((f1.clone() * shifted).mean_dim(1));
        }
    }
    activate(Tensor::cat(planes, 1))
}

impl<B: Backend> PwcNet<B> {
    pub fn new(cfg: &FlowNetConfig, device: &B::Device) -> Self {
        let levels = cfg.levels;
        let md     = cfg.max_displacement;
        let corr   = (2 * md + 1) * (2 * md + 1);

        let mut pyramid = Vec::with_capacity(levels + 1);
        pyramid.push(FeatureLevel {
            down:   ConvBlock::new(3, cfg.channels(0), 1, device),
            refine: ConvBlock::new(cfg.channels(0), cfg.channels(0), 1, device),
        });
        for i in 1..=levels {
            pyramid.push(FeatureLevel {
                down:   ConvBlock::new(cfg.channels(i - 1), cfg.channels(i), 2, device),
                refine: ConvBlock::new(cfg.channels(i), cfg.channels(i), 1, device),
            });
        }

        let estimators = (0..=levels)
            .map(|i| {
                // the coarsest level has no upsampled flow to condition on
                let extra = if i == levels { 0 } else { 2 };
                Estimator::new(corr + cfg.channels(i) + extra, device)
            })
            .collect();
        let upflow = (0..levels).map(|_| upsample2x(2, 2, device)).collect();

        Self { pyramid, estimators, upflow, levels, div_flow: cfg.div_flow, max_displacement: md }
    }

    fn features(&self, image: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let mut out = Vec::with_capacity(self.pyramid.len());
        let mut x = image;
        for level in &self.pyramid {
            x = level.forward(x);
            out.push(x.clone());
        }
        out
    }

    pub fn forward(&self, reference: Tensor<B, 4>, target: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let f1 = self.features(reference);
        let f2 = self.features(target);
        let md = self.max_displacement;
        let top = self.levels;

        let corr = cost_volume(f1[top].clone(), f2[top].clone(), md);
        let mut raw = vec![self.estimators[top].forward(Tensor::cat(vec![corr, f1[top].clone()], 1))];

        for i in (0..top).rev() {
            let up     = self.upflow[i].forward(raw[raw.len() - 1].clone());
            let warped = warp(f2[i].clone(), to_pixels(up.clone(), self.div_flow, i));
            let corr   = cost_volume(f1[i].clone(), warped, md);
            let input  = Tensor::cat(vec![corr, f1[i].clone(), up.clone()], 1);
            raw.push(up + self.estimators[i].forward(input));
        }
        raw.reverse();

        raw.into_iter()
            .enumerate()
            .map(|(k, r)| to_pixels(r, self.div_flow, k))
            .collect()
    }
}
