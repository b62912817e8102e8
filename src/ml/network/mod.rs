// ============================================================
// Layer 5 — Flow Networks
// ============================================================
// Two estimators behind one Burn module enum:
//
//   flownets.rs — encoder/decoder with skip connections,
//                 a flow prediction at every decoder level
//   pwcnet.rs   — shared feature pyramid, warping and a local
//                 cost volume, coarse-to-fine residual flow
//
// Both map (reference, target), [N, 3, H, W] each, to a flow
// pyramid: element k has resolution H/2^k x W/2^k and is in
// pixel units of that resolution. Element 0 is full resolution.
//
// The raw network output is divided by `div_flow`, which keeps
// the regression targets near unit scale:
//   flow_k (pixels) = raw_k * div_flow / 2^k
//
// H and W must be divisible by 2^levels.

pub mod flownets;
pub mod pwcnet;

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::leaky_relu,
};

use crate::domain::{
    architecture::Architecture,
    error::{FlowError, FlowResult},
};
use flownets::FlowNetS;
use pwcnet::PwcNet;

const LEAKY_SLOPE: f64 = 0.1;

// NOTE: #[derive(Config)] brings Clone + serde with it.
#[derive(Config, Debug)]
pub struct FlowNetConfig {
    pub arch: Architecture,
    /// Pyramid depth; inputs must be divisible by 2^levels
    #[config(default = 5)]
    pub levels: usize,
    /// Channels of the finest feature level
    #[config(default = 16)]
    pub base_channels: usize,
    #[config(default = 20.0)]
    pub div_flow: f64,
    /// Cost-volume search radius (PWC only)
    #[config(default = 2)]
    pub max_displacement: usize,
}

impl FlowNetConfig {
    pub fn factor(&self) -> usize {
        1 << self.levels
    }

    /// Channel count of feature level `i`, capped at 8x the base.
    pub fn channels(&self, level: usize) -> usize {
        self.base_channels * (1usize << level.min(3))
    }

    pub fn validate(&self) -> FlowResult<()> {
        if self.levels == 0 || self.levels > 7 {
            return Err(FlowError::config("levels", format!("must be 1..=7, got {}", self.levels)));
        }
        if self.base_channels == 0 {
            return Err(FlowError::config("base_channels", "must be positive"));
        }
        if !(self.div_flow > 0.0 && self.div_flow.is_finite()) {
            return Err(FlowError::config("div-flow", format!("must be positive, got {}", self.div_flow)));
        }
        Ok(())
    }

    /// Inputs must tile evenly into the pyramid.
    pub fn check_input(&self, height: usize, width: usize) -> FlowResult<()> {
        check_divisible(self.arch, self.levels, height, width)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> FlowNet<B> {
        match self.arch {
            Architecture::FlowNetS => FlowNet::FlowNetS(FlowNetS::new(self, device)),
            Architecture::PwcNet   => FlowNet::PwcNet(PwcNet::new(self, device)),
        }
    }
}

fn check_divisible(arch: Architecture, levels: usize, height: usize, width: usize) -> FlowResult<()> {
    let f = 1usize << levels;
    if height == 0 || width == 0 || height % f != 0 || width % f != 0 {
        return Err(FlowError::config(
            "image size",
            format!("{height}x{width} is not divisible by {f} (2^{levels} for {arch})"),
        ));
    }
    Ok(())
}

// ─── Building Blocks ──────────────────────────────────────────────────────────

/// 3x3 (or k x k) convolution followed by leaky ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(input: usize, output: usize, stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([input, output], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        Self { conv }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        leaky_relu(self.conv.forward(x), LEAKY_SLOPE)
    }
}

/// Linear 3x3 head producing a 2-channel flow.
pub fn flow_head<B: Backend>(input: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([input, 2], [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

/// Learned 2x upsampling (k=4, s=2, p=1 doubles H and W exactly).
pub fn upsample2x<B: Backend>(input: usize, output: usize, device: &B::Device) -> ConvTranspose2d<B> {
    ConvTranspose2dConfig::new([input, output], [4, 4])
        .with_stride([2, 2])
        .with_padding([1, 1])
        .init(device)
}

pub fn activate<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    leaky_relu(x, LEAKY_SLOPE)
}

/// Raw output at pyramid level `k` → pixel units of that level.
pub fn to_pixels<B: Backend>(raw: Tensor<B, 4>, div_flow: f64, level: usize) -> Tensor<B, 4> {
    raw * (div_flow / (1u64 << level) as f64) as f32
}

// ─── Network Enum ─────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub enum FlowNet<B: Backend> {
    FlowNetS(FlowNetS<B>),
    PwcNet(PwcNet<B>),
}

impl<B: Backend> FlowNet<B> {
    pub fn arch(&self) -> Architecture {
        match self {
            FlowNet::FlowNetS(_) => Architecture::FlowNetS,
            FlowNet::PwcNet(_)   => Architecture::PwcNet,
        }
    }

    pub fn levels(&self) -> usize {
        match self {
            FlowNet::FlowNetS(n) => n.levels,
            FlowNet::PwcNet(n)   => n.levels,
        }
    }

    /// Reject a [N, C, H, W] input the pyramid cannot tile.
    pub fn check_input(&self, dims: [usize; 4]) -> FlowResult<()> {
        check_divisible(self.arch(), self.levels(), dims[2], dims[3])
    }

    /// Flow pyramid in pixel units, finest first.
    pub fn forward(&self, reference: Tensor<B, 4>, target: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        match self {
            FlowNet::FlowNetS(n) => n.forward(reference, target),
            FlowNet::PwcNet(n)   => n.forward(reference, target),
        }
    }

    /// Forward and, when asked, the swapped-input backward pass.
    pub fn forward_pair(
        &self,
        reference:     Tensor<B, 4>,
        target:        Tensor<B, 4>,
        bidirectional: bool,
    ) -> (Vec<Tensor<B, 4>>, Option<Vec<Tensor<B, 4>>>) {
        let forward  = self.forward(reference.clone(), target.clone());
        let backward = bidirectional.then(|| self.forward(target, reference));
        (forward, backward)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray<f32>;

    fn small(arch: Architecture) -> FlowNetConfig {
        FlowNetConfig::new(arch).with_levels(2).with_base_channels(4)
    }

    #[test]
    fn test_input_must_divide_by_pyramid_factor() {
        let cfg = small(Architecture::FlowNetS);
        assert!(cfg.check_input(8, 12).is_ok());
        let err = cfg.check_input(8, 10).unwrap_err();
        assert!(err.is_config());

        let net: FlowNet<TB> = cfg.init(&Default::default());
        assert_eq!(net.levels(), 2);
        assert!(net.check_input([1, 3, 8, 12]).is_ok());
        assert!(net.check_input([1, 3, 12, 12]).is_ok());
        assert!(net.check_input([1, 3, 8, 6]).unwrap_err().is_config());
    }

    #[test]
    fn test_both_architectures_emit_a_full_pyramid() {
        let device = Default::default();
        for arch in [Architecture::FlowNetS, Architecture::PwcNet] {
            let net: FlowNet<TB> = small(arch).init(&device);
            assert_eq!(net.arch(), arch);
            let a = Tensor::<TB, 4>::zeros([2, 3, 8, 12], &device);
            let b = Tensor::<TB, 4>::zeros([2, 3, 8, 12], &device);
            let flows = net.forward(a, b);
            let dims: Vec<[usize; 4]> = flows.iter().map(|f| f.dims()).collect();
            assert_eq!(dims, vec![[2, 2, 8, 12], [2, 2, 4, 6], [2, 2, 2, 3]], "{arch}");
        }
    }

    #[test]
    fn test_pixel_scaling_halves_per_level() {
        let device = Default::default();
        let raw = Tensor::<TB, 4>::ones([1, 2, 2, 2], &device);
        let px0: f32 = to_pixels(raw.clone(), 20.0, 0).mean().into_scalar();
        let px2: f32 = to_pixels(raw, 20.0, 2).mean().into_scalar();
        assert_eq!(px0, 20.0);
        assert_eq!(px2, 5.0);
    }
}
