// FlowNetS: the two frames are stacked along channels (6 in)
// and pushed through a plain conv encoder. The decoder walks
// back up with learned upsampling, concatenating the encoder
// feature of the same level and the upsampled coarser flow,
// and predicts a flow at every level.
//
//   encoder[0]  stride 1      6        → c0
//   encoder[i]  stride 2      c(i-1)   → c(i)        i = 1..=L
//   predict[L]                c(L)     → 2
//   level i < L:
//     up  = deconv(x(i+1))                → c(i)
//     x(i) = cat[encoder(i), up, upflow(flow(i+1))]
//     flow(i) = predict[i](x(i))

use burn::{
    nn::conv::{Conv2d, ConvTranspose2d},
    prelude::*,
};

use super::{activate, flow_head, to_pixels, upsample2x, ConvBlock, FlowNetConfig};

#[derive(Module, Debug)]
pub struct FlowNetS<B: Backend> {
    pub encoder:  Vec<ConvBlock<B>>,
    /// deconv[i] lifts level i+1 decoder features to level i
    pub deconv:   Vec<ConvTranspose2d<B>>,
    pub upflow:   Vec<ConvTranspose2d<B>>,
    /// predict[i] for i = 0..=L
    pub predict:  Vec<Conv2d<B>>,
    pub levels:   usize,
    pub div_flow: f64,
}

impl<B: Backend> FlowNetS<B> {
    pub fn new(cfg: &FlowNetConfig, device: &B::Device) -> Self {
        let levels = cfg.levels;

        let mut encoder = vec![ConvBlock::new(6, cfg.channels(0), 1, device)];
        for i in 1..=levels {
            encoder.push(ConvBlock::new(cfg.channels(i - 1), cfg.channels(i), 2, device));
        }

        // decoder feature width at each level
        let decoded = |i: usize| {
            if i == levels { cfg.channels(i) } else { 2 * cfg.channels(i) + 2 }
        };

        let deconv  = (0..levels).map(|i| upsample2x(decoded(i + 1), cfg.channels(i), device)).collect();
        let upflow  = (0..levels).map(|_| upsample2x(2, 2, device)).collect();
        let predict = (0..=levels).map(|i| flow_head(decoded(i), device)).collect();

        Self { encoder, deconv, upflow, predict, levels, div_flow: cfg.div_flow }
    }

    pub fn forward(&self, reference: Tensor<B, 4>, target: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let mut features = Vec::with_capacity(self.levels + 1);
        let mut x = Tensor::cat(vec![reference, target], 1);
        for block in &self.encoder {
            x = block.forward(x);
            features.push(x.clone());
        }

        let mut raw = vec![self.predict[self.levels].forward(x.clone())];
        for i in (0..self.levels).rev() {
            let coarse_flow = raw[raw.len() - 1].clone();
            let up   = activate(self.deconv[i].forward(x));
            let flow = self.upflow[i].forward(coarse_flow);
            x = Tensor::cat(vec![features[i].clone(), up, flow], 1);
            raw.push(self.predict[i].forward(x.clone()));
        }
        raw.reverse();

        raw.into_iter()
            .enumerate()
            .map(|(k, r)| to_pixels(r, self.div_flow, k))
            .collect()
    }
}
