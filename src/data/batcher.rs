// ============================================================
// Layer 4 — Flow Batcher
// ============================================================
// Implements Burn's Batcher trait: stacks N frame pairs into
//
//   reference: [N, 3, H, W]
//   target:    [N, 3, H, W]
//
// Groundtruth flow stays on the CPU as FlowField values. EPE is
// computed host-side; supervised training uploads it on demand
// with `ground_truth_tensor`.
//
// All samples of a batch must share H and W (the augmentation
// crops guarantee this for training). A failed item fails the
// whole batch, carrying the failure to the training loop.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::data::dataset::{FlowItem, SampleFailure};
use crate::domain::{
    error::{FlowError, FlowResult},
    flow_field::FlowField,
};

// ─── FlowBatch ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct FlowBatch<B: Backend> {
    pub reference:    Tensor<B, 4>,
    pub target:       Tensor<B, 4>,
    /// One entry per sample, None when the dataset has no flow
    pub ground_truth: Vec<Option<FlowField>>,
    /// Dataset positions, for logs and output file names
    pub indices:      Vec<usize>,
    /// (height, width) of each sample before evaluation padding
    pub frame_sizes:  Vec<(usize, usize)>,
}

impl<B: Backend> FlowBatch<B> {
    pub fn has_ground_truth(&self) -> bool {
        self.ground_truth.iter().any(Option::is_some)
    }

    /// Groundtruth as [N, 2, H, W] plus a [N, 1, H, W] mask of known
    /// pixels. Unknown pixels read 0. Every sample needs a flow.
    pub fn ground_truth_tensor(&self) -> FlowResult<(Tensor<B, 4>, Tensor<B, 4>)> {
        let [n, _, h, w] = self.reference.dims();
        let mut flow  = Vec::with_capacity(n * 2 * h * w);
        let mut known = Vec::with_capacity(n * h * w);
        for (gt, index) in self.ground_truth.iter().zip(&self.indices) {
            let gt = gt.as_ref().ok_or_else(|| {
                FlowError::config("supervised", format!("sample {index} has no groundtruth flow"))
            })?;
            if gt.height != h || gt.width != w {
                return Err(FlowError::ShapeMismatch(format!(
                    "groundtruth of sample {index} is {}x{}, frames are {h}x{w}",
                    gt.height, gt.width
                )));
            }
            let valid: Vec<bool> = (0..h * w).map(|i| gt.is_valid_at(i / w, i % w)).collect();
            for plane in gt.data.chunks_exact(h * w) {
                flow.extend(plane.iter().zip(&valid).map(|(v, &ok)| if ok { *v } else { 0.0 }));
            }
            known.extend(valid.iter().map(|&ok| if ok { 1.0f32 } else { 0.0 }));
        }
        let device = self.reference.device();
        Ok((
            Tensor::from_data(TensorData::new(flow, [n, 2, h, w]), &device),
            Tensor::from_data(TensorData::new(known, [n, 1, h, w]), &device),
        ))
    }
}

pub type BatchResult<B> = Result<FlowBatch<B>, SampleFailure>;

// ─── FlowBatcher ──────────────────────────────────────────────────────────────
#[derive(Clone, Debug, Default)]
pub struct FlowBatcher;

impl FlowBatcher {
    pub fn new() -> Self {
        Self
    }

    /// Build a batch from already loaded items.
    pub fn stack<B: Backend>(&self, items: Vec<FlowItem>, device: &B::Device) -> BatchResult<B> {
        let samples = items.into_iter().collect::<Result<Vec<_>, _>>()?;
        let Some(first) = samples.first() else {
            return Err(SampleFailure { index: 0, reason: "empty batch".into() });
        };
        let (c, h, w) = first.pair.dims();
        if let Some(odd) = samples.iter().find(|s| s.pair.dims() != (c, h, w)) {
            return Err(SampleFailure {
                index:  odd.index,
                reason: format!(
                    "frame size {:?} differs from {:?} within one batch",
                    odd.pair.dims(),
                    (c, h, w)
                ),
            });
        }

        let n = samples.len();
        let mut reference = Vec::with_capacity(n * c * h * w);
        let mut target    = Vec::with_capacity(n * c * h * w);
        for s in &samples {
            reference.extend_from_slice(&s.pair.reference.data);
            target.extend_from_slice(&s.pair.target.data);
        }

        Ok(FlowBatch {
            reference:    Tensor::from_data(TensorData::new(reference, [n, c, h, w]), device),
            target:       Tensor::from_data(TensorData::new(target, [n, c, h, w]), device),
            indices:      samples.iter().map(|s| s.index).collect(),
            frame_sizes:  samples.iter().map(|s| s.frame_size).collect(),
            ground_truth: samples.into_iter().map(|s| s.ground_truth).collect(),
        })
    }
}

// ─── Burn Batcher Trait Implementation ────────────────────────────────────────
impl<B: Backend> Batcher<B, FlowItem, BatchResult<B>> for FlowBatcher {
    fn batch(&self, items: Vec<FlowItem>, device: &B::Device) -> BatchResult<B> {
        self.stack(items, device)
    }
}
