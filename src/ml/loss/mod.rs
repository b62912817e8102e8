// ============================================================
// Layer 5 — Loss Composer
// ============================================================
// Combines a weighted subset of the self-supervised terms into
// one scalar:
//
//   photometric  — brightness constancy after warping
//   smoothness   — robust penalty on flow gradients
//   consistency  — forward-backward agreement (needs bw flow)
//   census       — ternary census transform distance
//   ssim         — structural similarity (needs bw flow)
//
// A term with weight 0 is never evaluated. For multi-scale
// networks each term is summed over the pyramid with weights
// decay^k (k = 0 is full resolution) unless its multiscale flag
// is off, in which case only scale 0 is used.
//
// When backward flow is available, photometric, census and
// smoothness are applied in both directions.
//
// The returned breakdown keeps each term's unweighted and
// weighted value; the weighted values sum to the total.

pub mod census;
pub mod consistency;
pub mod photometric;
pub mod robust;
pub mod smoothness;
pub mod ssim;
pub mod supervised;

use std::{fmt, fs, path::Path, str::FromStr};

use anyhow::{Context, Result};
use burn::{nn::pool::AvgPool2dConfig, prelude::*};
use serde::{Deserialize, Serialize};

use crate::domain::error::{FlowError, FlowResult};
use consistency::{consistency, OcclusionThresholds};
use robust::RobustPenalty;
use smoothness::SmoothnessOptions;

// ─── Loss Terms ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossTerm {
    Photometric,
    Smoothness,
    Consistency,
    Census,
    Ssim,
}

impl LossTerm {
    pub const ALL: [LossTerm; 5] = [
        LossTerm::Photometric,
        LossTerm::Smoothness,
        LossTerm::Consistency,
        LossTerm::Census,
        LossTerm::Ssim,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LossTerm::Photometric => "photometric",
            LossTerm::Smoothness  => "smoothness",
            LossTerm::Consistency => "consistency",
            LossTerm::Census      => "census",
            LossTerm::Ssim        => "ssim",
        }
    }

    pub fn needs_backward_flow(&self) -> bool {
        matches!(self, LossTerm::Consistency | LossTerm::Ssim)
    }
}

impl fmt::Display for LossTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossTerm {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LossTerm::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FlowError::config("loss", format!("unknown loss term '{s}'")))
    }
}

// ─── Configuration ────────────────────────────────────────────────────────────

/// Which terms are summed over the whole pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiscaleFlags {
    pub photometric: bool,
    pub smoothness:  bool,
    pub consistency: bool,
    pub census:      bool,
    pub ssim:        bool,
}

impl Default for MultiscaleFlags {
    fn default() -> Self {
        Self { photometric: true, smoothness: true, consistency: true, census: true, ssim: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub photometric_weight: f64,
    pub smoothness_weight:  f64,
    pub consistency_weight: f64,
    pub census_weight:      f64,
    pub ssim_weight:        f64,

    pub photometric_exponent: f64,
    pub smoothness_exponent:  f64,
    pub consistency_exponent: f64,
    pub census_exponent:      f64,
    pub charbonnier_epsilon:  f64,
    /// Plain |x| for the photometric term instead of Charbonnier
    pub use_l1: bool,

    pub edge_aware:   bool,
    pub edge_weight:  f64,
    pub second_order: bool,

    pub census_radius: usize,

    pub occlusion_alpha1: f64,
    pub occlusion_alpha2: f64,

    /// Scale k is weighted decay^k
    pub scale_decay: f64,
    pub multiscale:  MultiscaleFlags,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            photometric_weight:   1.0,
            smoothness_weight:    0.002,
            consistency_weight:   0.0,
            census_weight:        0.0,
            ssim_weight:          0.0,
            photometric_exponent: 0.25,
            smoothness_exponent:  0.38,
            consistency_exponent: 0.45,
            census_exponent:      0.45,
            charbonnier_epsilon:  0.001,
            use_l1:               false,
            edge_aware:           true,
            edge_weight:          10.0,
            second_order:         false,
            census_radius:        1,
            occlusion_alpha1:     0.01,
            occlusion_alpha2:     0.5,
            scale_decay:          0.5,
            multiscale:           MultiscaleFlags::default(),
        }
    }
}

impl LossConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path     = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Cannot read loss config '{}'", path.display()))?;
        let config: LossConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Invalid loss config '{}'", path.display()))?;
        Ok(config)
    }

    pub fn weight(&self, term: LossTerm) -> f64 {
        match term {
            LossTerm::Photometric => self.photometric_weight,
            LossTerm::Smoothness  => self.smoothness_weight,
            LossTerm::Consistency => self.consistency_weight,
            LossTerm::Census      => self.census_weight,
            LossTerm::Ssim        => self.ssim_weight,
        }
    }

    pub fn set_weight(&mut self, term: LossTerm, weight: f64) {
        let slot = match term {
            LossTerm::Photometric => &mut self.photometric_weight,
            LossTerm::Smoothness  => &mut self.smoothness_weight,
            LossTerm::Consistency => &mut self.consistency_weight,
            LossTerm::Census      => &mut self.census_weight,
            LossTerm::Ssim        => &mut self.ssim_weight,
        };
        *slot = weight;
    }

    pub fn is_multiscale(&self, term: LossTerm) -> bool {
        let m = &self.multiscale;
        match term {
            LossTerm::Photometric => m.photometric,
            LossTerm::Smoothness  => m.smoothness,
            LossTerm::Consistency => m.consistency,
            LossTerm::Census      => m.census,
            LossTerm::Ssim        => m.ssim,
        }
    }

    pub fn enabled_terms(&self) -> Vec<LossTerm> {
        LossTerm::ALL.into_iter().filter(|t| self.weight(*t) > 0.0).collect()
    }

    /// Checked once, before any forward pass.
    pub fn validate(&self, bidirectional: bool) -> FlowResult<()> {
        for term in LossTerm::ALL {
            let w = self.weight(term);
            if !w.is_finite() || w < 0.0 {
                return Err(FlowError::config(
                    format!("{term}-weight"),
                    format!("weight must be a finite non-negative number, got {w}"),
                ));
            }
        }
        let enabled = self.enabled_terms();
        if enabled.is_empty() {
            return Err(FlowError::config("loss", "no loss term has a positive weight"));
        }
        if let Some(term) = enabled.iter().find(|t| t.needs_backward_flow()) {
            if !bidirectional {
                return Err(FlowError::config(
                    "bidirectional",
                    format!("the {term} loss needs backward flow; enable --bidirectional"),
                ));
            }
        }
        for (name, exp) in [
            ("photometric_exponent", self.photometric_exponent),
            ("smoothness_exponent",  self.smoothness_exponent),
            ("consistency_exponent", self.consistency_exponent),
            ("census_exponent",      self.census_exponent),
        ] {
            if !(exp > 0.0 && exp.is_finite()) {
                return Err(FlowError::config(name, format!("must be positive, got {exp}")));
            }
        }
        if !(self.scale_decay > 0.0 && self.scale_decay <= 1.0) {
            return Err(FlowError::config(
                "scale_decay",
                format!("must lie in (0, 1], got {}", self.scale_decay),
            ));
        }
        if self.census_radius == 0 {
            return Err(FlowError::config("census_radius", "must be at least 1"));
        }
        Ok(())
    }
}

// ─── Output ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LossEntry {
    pub term:       LossTerm,
    pub unweighted: f64,
    pub weighted:   f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LossBreakdown {
    pub entries: Vec<LossEntry>,
}

impl LossBreakdown {
    pub fn get(&self, term: LossTerm) -> Option<&LossEntry> {
        self.entries.iter().find(|e| e.term == term)
    }

    pub fn weighted_sum(&self) -> f64 {
        self.entries.iter().map(|e| e.weighted).sum()
    }
}

pub struct LossOutput<B: Backend> {
    /// Differentiable total
    pub total:       Tensor<B, 1>,
    pub total_value: f64,
    pub breakdown:   LossBreakdown,
}

// ─── Composer ─────────────────────────────────────────────────────────────────

fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f64 {
    t.clone().into_scalar().elem::<f64>()
}

fn accumulate<B: Backend>(acc: Option<Tensor<B, 1>>, term: Tensor<B, 1>) -> Option<Tensor<B, 1>> {
    Some(match acc {
        Some(acc) => acc + term,
        None      => term,
    })
}

/// Average-pool `image` down to `height` x `width`.
pub fn downsample<B: Backend>(image: Tensor<B, 4>, height: usize, width: usize) -> Tensor<B, 4> {
    let [_, _, h, w] = image.dims();
    if h == height && w == width {
        return image;
    }
    let factor = (h / height.max(1)).max(1);
    AvgPool2dConfig::new([factor, factor])
        .with_strides([factor, factor])
        .init()
        .forward(image)
}

/// Inputs for one pyramid level, all at the flow's resolution.
struct ScaleInputs<B: Backend> {
    reference: Tensor<B, 4>,
    target:    Tensor<B, 4>,
    forward:   Tensor<B, 4>,
    backward:  Option<Tensor<B, 4>>,
}

#[derive(Debug, Clone)]
pub struct LossComposer {
    config:        LossConfig,
    bidirectional: bool,
    terms:         Vec<LossTerm>,
}

impl LossComposer {
    pub fn new(config: LossConfig, bidirectional: bool) -> FlowResult<Self> {
        config.validate(bidirectional)?;
        let terms = config.enabled_terms();
        Ok(Self { config, bidirectional, terms })
    }

    pub fn terms(&self) -> &[LossTerm] {
        &self.terms
    }

    pub fn bidirectional(&self) -> bool {
        self.bidirectional
    }

    fn photometric_penalty(&self) -> RobustPenalty {
        if self.config.use_l1 {
            RobustPenalty::l1()
        } else {
            RobustPenalty::charbonnier(self.config.photometric_exponent, self.config.charbonnier_epsilon)
        }
    }

    fn penalty(&self, exponent: f64) -> RobustPenalty {
        RobustPenalty::charbonnier(exponent, self.config.charbonnier_epsilon)
    }

    fn smoothness_options(&self) -> SmoothnessOptions {
        SmoothnessOptions {
            second_order: self.config.second_order,
            edge_aware:   self.config.edge_aware,
            edge_weight:  self.config.edge_weight as f32,
        }
    }

    fn thresholds(&self) -> OcclusionThresholds {
        OcclusionThresholds {
            alpha1: self.config.occlusion_alpha1 as f32,
            alpha2: self.config.occlusion_alpha2 as f32,
        }
    }

    /// Single-scale loss.
    pub fn compute_loss<B: Backend>(
        &self,
        reference: Tensor<B, 4>,
        target:    Tensor<B, 4>,
        forward:   Tensor<B, 4>,
        backward:  Option<Tensor<B, 4>>,
    ) -> FlowResult<LossOutput<B>> {
        let backward = backward.map(|b| vec![b]);
        self.compute_multiscale(reference, target, &[forward], backward.as_deref())
    }

    /// Loss over a flow pyramid, finest scale first. Flows are in
    /// pixel units of their own scale.
    pub fn compute_multiscale<B: Backend>(
        &self,
        reference: Tensor<B, 4>,
        target:    Tensor<B, 4>,
        forward:   &[Tensor<B, 4>],
        backward:  Option<&[Tensor<B, 4>]>,
    ) -> FlowResult<LossOutput<B>> {
        if forward.is_empty() {
            return Err(FlowError::ShapeMismatch("no flow predictions to score".into()));
        }
        if let Some(bw) = backward {
            if bw.len() != forward.len() {
                return Err(FlowError::ShapeMismatch(format!(
                    "{} forward scales but {} backward scales",
                    forward.len(),
                    bw.len()
                )));
            }
        }
        if backward.is_none() {
            if let Some(term) = self.terms.iter().find(|t| t.needs_backward_flow()) {
                return Err(FlowError::config(
                    "bidirectional",
                    format!("the {term} loss was given no backward flow"),
                ));
            }
        }

        let mut per_term: Vec<Option<Tensor<B, 1>>> = vec![None; self.terms.len()];
        for (k, fw) in forward.iter().enumerate() {
            let needed: Vec<usize> = (0..self.terms.len())
                .filter(|&i| k == 0 || self.config.is_multiscale(self.terms[i]))
                .collect();
            if needed.is_empty() {
                break;
            }
            let [_, _, h, w] = fw.dims();
            let inputs = ScaleInputs {
                reference: downsample(reference.clone(), h, w),
                target:    downsample(target.clone(), h, w),
                forward:   fw.clone(),
                backward:  backward.map(|bw| bw[k].clone()),
            };
            let scale_weight = self.config.scale_decay.powi(k as i32) as f32;
            let values = self.evaluate_scale(&inputs, &needed);
            for (i, value) in values {
                per_term[i] = accumulate(per_term[i].take(), value * scale_weight);
            }
        }

        let mut total: Option<Tensor<B, 1>> = None;
        let mut entries = Vec::with_capacity(self.terms.len());
        for (term, value) in self.terms.iter().zip(per_term) {
            // a term skipped at every scale (frame too small) counts as zero
            let Some(value) = value else {
                entries.push(LossEntry { term: *term, unweighted: 0.0, weighted: 0.0 });
                continue;
            };
            let weighted = value.clone() * self.config.weight(*term) as f32;
            entries.push(LossEntry {
                term:       *term,
                unweighted: scalar(&value),
                weighted:   scalar(&weighted),
            });
            total = accumulate(total, weighted);
        }

        let device = reference.device();
        let total  = total.unwrap_or_else(|| Tensor::zeros([1], &device));
        Ok(LossOutput {
            total_value: scalar(&total),
            total,
            breakdown: LossBreakdown { entries },
        })
    }

    /// Evaluate the selected terms (indices into `self.terms`) at
    /// one scale. Terms the scale is too small for are left out.
    fn evaluate_scale<B: Backend>(
        &self,
        s:       &ScaleInputs<B>,
        indices: &[usize],
    ) -> Vec<(usize, Tensor<B, 1>)> {
        let [_, _, h, w] = s.forward.dims();

        // occlusion masks for both directions
        let fb_weighting = self.config.consistency_weight > 0.0;
        let (fw_check, bw_check) = match (&s.backward, fb_weighting) {
            (Some(bw), true) => {
                let pen = self.penalty(self.config.consistency_exponent);
                let th  = self.thresholds();
                (
                    Some(consistency(s.forward.clone(), bw.clone(), &pen, &th)),
                    Some(consistency(bw.clone(), s.forward.clone(), &pen, &th)),
                )
            }
            _ => (None, None),
        };
        let fw_mask = fw_check.as_ref().map(|c| c.mask.clone());
        let bw_mask = bw_check.as_ref().map(|c| c.mask.clone());

        let mut out = Vec::new();
        for &i in indices {
            let term  = self.terms[i];
            let value = match term {
                LossTerm::Photometric => {
                    let pen = self.photometric_penalty();
                    let fw  = photometric::photometric_loss(
                        s.reference.clone(), s.target.clone(), s.forward.clone(), &pen, fw_mask.clone(),
                    );
                    Some(match &s.backward {
                        Some(bw) => fw + photometric::photometric_loss(
                            s.target.clone(), s.reference.clone(), bw.clone(), &pen, bw_mask.clone(),
                        ),
                        None => fw,
                    })
                }
                LossTerm::Smoothness => {
                    let pen  = self.penalty(self.config.smoothness_exponent);
                    let opts = self.smoothness_options();
                    let fw   = smoothness::smoothness_loss(s.forward.clone(), s.reference.clone(), &pen, &opts);
                    Some(match &s.backward {
                        Some(bw) => fw + smoothness::smoothness_loss(bw.clone(), s.target.clone(), &pen, &opts),
                        None     => fw,
                    })
                }
                LossTerm::Census => {
                    let r = self.config.census_radius;
                    if h < census::min_side(r) || w < census::min_side(r) {
                        None
                    } else {
                        let pen = self.penalty(self.config.census_exponent);
                        let fw  = census::census_loss(
                            s.reference.clone(), s.target.clone(), s.forward.clone(), r, &pen, fw_mask.clone(),
                        );
                        Some(match &s.backward {
                            Some(bw) => fw + census::census_loss(
                                s.target.clone(), s.reference.clone(), bw.clone(), r, &pen, bw_mask.clone(),
                            ),
                            None => fw,
                        })
                    }
                }
                LossTerm::Consistency => match (&fw_check, &bw_check) {
                    (Some(f), Some(b)) => Some(f.loss.clone() + b.loss.clone()),
                    _                  => None,
                },
                LossTerm::Ssim => {
                    if h < ssim::WINDOW || w < ssim::WINDOW {
                        None
                    } else {
                        s.backward.as_ref().map(|bw| {
                            ssim::ssim_loss(s.reference.clone(), s.target.clone(), bw.clone())
                        })
                    }
                }
            };
            if let Some(v) = value {
                out.push((i, v));
            }
        }
        out
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::warp::constant_flow;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};
    use proptest::prelude::*;

    type TB = NdArray<f32>;

    fn frames(h: usize, w: usize) -> (Tensor<TB, 4>, Tensor<TB, 4>) {
        let device = Default::default();
        (
            Tensor::random([1, 3, h, w], Distribution::Uniform(-0.5, 0.5), &device),
            Tensor::random([1, 3, h, w], Distribution::Uniform(-0.5, 0.5), &device),
        )
    }

    fn photometric_only() -> LossConfig {
        LossConfig { smoothness_weight: 0.0, ..LossConfig::default() }
    }

    #[test]
    fn test_default_config_is_valid_unidirectional() {
        assert!(LossConfig::default().validate(false).is_ok());
        assert_eq!(
            LossConfig::default().enabled_terms(),
            vec![LossTerm::Photometric, LossTerm::Smoothness]
        );
    }

    #[test]
    fn test_ssim_without_bidirectional_is_rejected() {
        let cfg = LossConfig { ssim_weight: 1.0, ..LossConfig::default() };
        let err = LossComposer::new(cfg, false).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_consistency_without_bidirectional_is_rejected() {
        let cfg = LossConfig { consistency_weight: 0.1, ..LossConfig::default() };
        assert!(LossComposer::new(cfg.clone(), false).is_err());
        assert!(LossComposer::new(cfg, true).is_ok());
    }

    #[test]
    fn test_empty_and_negative_configs_are_rejected() {
        let none = LossConfig { photometric_weight: 0.0, smoothness_weight: 0.0, ..LossConfig::default() };
        assert!(none.validate(true).is_err());
        let neg = LossConfig { census_weight: -1.0, ..LossConfig::default() };
        assert!(neg.validate(true).is_err());
        let nan = LossConfig { smoothness_weight: f64::NAN, ..LossConfig::default() };
        assert!(nan.validate(true).is_err());
    }

    #[test]
    fn test_yaml_overrides_keep_defaults() {
        let cfg: LossConfig = serde_yaml::from_str("census_weight: 1.5\nmultiscale:\n  census: false\n").unwrap();
        assert_eq!(cfg.census_weight, 1.5);
        assert!(!cfg.multiscale.census);
        assert!(cfg.multiscale.photometric);
        assert_eq!(cfg.photometric_exponent, 0.25);
    }

    #[test]
    fn test_term_names_parse() {
        for term in LossTerm::ALL {
            assert_eq!(term.name().parse::<LossTerm>().unwrap(), term);
        }
        assert!("tv".parse::<LossTerm>().is_err());
    }

    #[test]
    fn test_photometric_only_total_is_its_weighted_value() {
        let (a, b)   = frames(8, 8);
        let flow     = constant_flow::<TB>(1, 8, 8, 0.7, -0.3, &Default::default());
        let composer = LossComposer::new(photometric_only(), false).unwrap();
        let out      = composer.compute_loss(a, b, flow, None).unwrap();

        assert_eq!(out.breakdown.entries.len(), 1);
        let entry = out.breakdown.get(LossTerm::Photometric).unwrap();
        assert_eq!(out.total_value, entry.weighted);
        assert_eq!(entry.weighted, entry.unweighted);
    }

    #[test]
    fn test_missing_backward_flow_is_a_config_error() {
        let cfg      = LossConfig { ssim_weight: 1.0, ..LossConfig::default() };
        let composer = LossComposer::new(cfg, true).unwrap();
        let (a, b)   = frames(4, 4);
        let flow     = constant_flow::<TB>(1, 4, 4, 0.0, 0.0, &Default::default());
        let err      = composer.compute_loss(a, b, flow, None).err().unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn test_multiscale_flag_limits_to_finest_scale() {
        let device = Default::default();
        let (a, b) = frames(8, 8);
        let pyramid = vec![
            constant_flow::<TB>(1, 8, 8, 0.5, 0.0, &device),
            constant_flow::<TB>(1, 4, 4, 0.5, 0.0, &device),
        ];
        let mut single = photometric_only();
        single.multiscale.photometric = false;

        let full  = LossComposer::new(photometric_only(), false).unwrap()
            .compute_multiscale(a.clone(), b.clone(), &pyramid, None).unwrap();
        let only0 = LossComposer::new(single, false).unwrap()
            .compute_multiscale(a.clone(), b.clone(), &pyramid, None).unwrap();
        let plain = LossComposer::new(photometric_only(), false).unwrap()
            .compute_loss(a, b, pyramid[0].clone(), None).unwrap();

        assert_eq!(only0.total_value, plain.total_value);
        assert!(full.total_value > only0.total_value);
    }

    #[test]
    fn test_tiny_scales_skip_window_terms() {
        let device = Default::default();
        let cfg = LossConfig { census_weight: 1.0, ..photometric_only() };
        let composer = LossComposer::new(cfg, false).unwrap();
        let (a, b) = frames(2, 2);
        let flow = constant_flow::<TB>(1, 2, 2, 0.0, 0.0, &device);
        let out = composer.compute_loss(a, b, flow, None).unwrap();
        assert_eq!(out.breakdown.get(LossTerm::Census).unwrap().weighted, 0.0);
        assert!(out.total_value.is_finite());
    }

    /// Forward flow is +1 px everywhere; backward flow agrees with it
    /// on the left half and disagrees on the right half.
    fn split_backward_flow(h: usize, w: usize) -> Tensor<TB, 4> {
        let mut data = vec![0.0f32; 2 * h * w];
        for y in 0..h {
            for x in 0..w {
                data[y * w + x] = if x < w / 2 { -1.0 } else { 3.0 };
            }
        }
        Tensor::from_data(TensorData::new(data, [1, 2, h, w]), &Default::default())
    }

    #[test]
    fn test_consistency_weight_masks_occluded_photometric_pixels() {
        let device = Default::default();
        let (a, b) = frames(8, 8);
        let fw     = constant_flow::<TB>(1, 8, 8, 1.0, 0.0, &device);
        let bw     = split_backward_flow(8, 8);

        let plain  = LossComposer::new(photometric_only(), true).unwrap()
            .compute_loss(a.clone(), b.clone(), fw.clone(), Some(bw.clone())).unwrap();
        let masked_cfg = LossConfig { consistency_weight: 1.0, ..photometric_only() };
        let masked = LossComposer::new(masked_cfg, true).unwrap()
            .compute_loss(a.clone(), b.clone(), fw.clone(), Some(bw.clone())).unwrap();

        let pen = RobustPenalty::charbonnier(0.25, 0.001);
        let rho = RobustPenalty::charbonnier(0.45, 0.001);
        let th  = OcclusionThresholds::default();
        let fw_mask = consistency(fw.clone(), bw.clone(), &rho, &th).mask;
        let bw_mask = consistency(bw.clone(), fw.clone(), &rho, &th).mask;
        // right half of each direction is occluded
        assert!(fw_mask.clone().sum().into_scalar() < 32.0);
        assert!(bw_mask.clone().sum().into_scalar() < 32.0);

        let expected = photometric::photometric_loss(a.clone(), b.clone(), fw, &pen, Some(fw_mask))
            + photometric::photometric_loss(b, a, bw, &pen, Some(bw_mask));
        let expected = scalar(&expected);

        let with_mask    = masked.breakdown.get(LossTerm::Photometric).unwrap().unweighted;
        let without_mask = plain.breakdown.get(LossTerm::Photometric).unwrap().unweighted;
        approx::assert_abs_diff_eq!(with_mask, expected, epsilon = 1e-5);
        assert!((with_mask - without_mask).abs() > 1e-6);
        assert!(masked.breakdown.get(LossTerm::Consistency).is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_breakdown_sums_to_total(
            photometric in 0.0f64..2.0,
            smoothness  in 0.0f64..2.0,
            consistency in 0.0f64..2.0,
            census      in 0.0f64..2.0,
            ssim        in 0.0f64..2.0,
        ) {
            let cfg = LossConfig {
                photometric_weight: photometric,
                smoothness_weight:  smoothness,
                consistency_weight: consistency,
                census_weight:      census,
                ssim_weight:        ssim,
                ..LossConfig::default()
            };
            prop_assume!(!cfg.enabled_terms().is_empty());

            let device = Default::default();
            let (a, b) = frames(8, 8);
            let fw = constant_flow::<TB>(1, 8, 8, 0.5, 0.25, &device);
            let bw = constant_flow::<TB>(1, 8, 8, -0.4, -0.25, &device);

            let composer = LossComposer::new(cfg, true).unwrap();
            let out = composer.compute_loss(a, b, fw, Some(bw)).unwrap();

            let sum = out.breakdown.weighted_sum();
            prop_assert!((sum - out.total_value).abs() <= 1e-4 * (1.0 + out.total_value.abs()));
        }
    }
}
