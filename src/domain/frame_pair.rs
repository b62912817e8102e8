// ============================================================
// Layer 3 — Frame Pair Domain Types
// ============================================================
// An `Image` is a planar (CHW) f32 buffer. A `FramePair` holds
// the reference frame (time t) and the target frame (t + 1);
// both must share height, width and channel count.
//
// A `FlowSample` is one dataset item: the pair plus the
// groundtruth flow when the dataset provides one. Evaluation
// pads frames at the bottom and right; `frame_size` keeps the
// size they were read at.

use serde::{Deserialize, Serialize};

use crate::domain::error::{FlowError, FlowResult};
use crate::domain::flow_field::FlowField;

/// Per-channel mean subtracted after scaling pixels to [0, 1].
pub const RGB_MEAN: [f32; 3] = [0.45, 0.432, 0.411];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub channels: usize,
    pub height:   usize,
    pub width:    usize,
    /// Planar layout: data[c * H * W + y * W + x]
    pub data:     Vec<f32>,
}

impl Image {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> FlowResult<Self> {
        if data.len() != channels * height * width {
            return Err(FlowError::ShapeMismatch(format!(
                "image buffer has {} values, expected {}x{}x{}",
                data.len(), channels, height, width
            )));
        }
        Ok(Self { channels, height, width, data })
    }

    pub fn filled(channels: usize, height: usize, width: usize, value: f32) -> Self {
        Self { channels, height, width, data: vec![value; channels * height * width] }
    }

    /// Build from an interleaved HWC buffer of [0, 1] values,
    /// mean-centring each channel.
    pub fn from_interleaved_normalised(
        channels: usize,
        height:   usize,
        width:    usize,
        hwc:      &[f32],
    ) -> FlowResult<Self> {
        if hwc.len() != channels * height * width {
            return Err(FlowError::ShapeMismatch(format!(
                "interleaved buffer has {} values, expected {}",
                hwc.len(), channels * height * width
            )));
        }
        let plane = height * width;
        let mut data = vec![0.0f32; channels * plane];
        for (i, px) in hwc.chunks_exact(channels).enumerate() {
            for (c, v) in px.iter().enumerate() {
                let mean = RGB_MEAN.get(c).copied().unwrap_or(0.0);
                data[c * plane + i] = v - mean;
            }
        }
        Ok(Self { channels, height, width, data })
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[c * self.height * self.width + y * self.width + x]
    }

    pub fn crop(&self, top: usize, left: usize, height: usize, width: usize) -> FlowResult<Self> {
        if top + height > self.height || left + width > self.width {
            return Err(FlowError::ShapeMismatch(format!(
                "crop {}x{} at ({}, {}) exceeds image {}x{}",
                height, width, top, left, self.height, self.width
            )));
        }
        let mut data = Vec::with_capacity(self.channels * height * width);
        for c in 0..self.channels {
            for y in top..top + height {
                let row = c * self.height * self.width + y * self.width;
                data.extend_from_slice(&self.data[row + left..row + left + width]);
            }
        }
        Ok(Self { channels: self.channels, height, width, data })
    }

    /// Grow to `height` x `width` by repeating the last row and
    /// column.
    pub fn pad_edge(&self, height: usize, width: usize) -> FlowResult<Self> {
        if height < self.height || width < self.width || self.height == 0 || self.width == 0 {
            return Err(FlowError::ShapeMismatch(format!(
                "cannot pad {}x{} to {}x{}",
                self.height, self.width, height, width
            )));
        }
        let mut data = Vec::with_capacity(self.channels * height * width);
        for c in 0..self.channels {
            for y in 0..height {
                let row = c * self.height * self.width + y.min(self.height - 1) * self.width;
                data.extend((0..width).map(|x| self.data[row + x.min(self.width - 1)]));
            }
        }
        Ok(Self { channels: self.channels, height, width, data })
    }

    /// Bilinear sample of channel `c` at (y, x); taps outside the
    /// image read 0.
    pub fn sample_bilinear(&self, c: usize, y: f32, x: f32) -> f32 {
        let (y0, x0) = (y.floor(), x.floor());
        let (fy, fx) = (y - y0, x - x0);
        let tap = |yy: f32, xx: f32| -> f32 {
            if yy < 0.0 || xx < 0.0 || yy >= self.height as f32 || xx >= self.width as f32 {
                0.0
            } else {
                self.at(c, yy as usize, xx as usize)
            }
        };
        tap(y0, x0) * (1.0 - fy) * (1.0 - fx)
            + tap(y0, x0 + 1.0) * (1.0 - fy) * fx
            + tap(y0 + 1.0, x0) * fy * (1.0 - fx)
            + tap(y0 + 1.0, x0 + 1.0) * fy * fx
    }

    pub fn flip_horizontal(&self) -> Self {
        let mut out = self.clone();
        for c in 0..self.channels {
            for y in 0..self.height {
                let row = c * self.height * self.width + y * self.width;
                out.data[row..row + self.width].reverse();
            }
        }
        out
    }

    pub fn flip_vertical(&self) -> Self {
        let mut out = self.clone();
        let plane = self.height * self.width;
        for c in 0..self.channels {
            for y in 0..self.height {
                let src = c * plane + y * self.width;
                let dst = c * plane + (self.height - 1 - y) * self.width;
                out.data[dst..dst + self.width]
                    .copy_from_slice(&self.data[src..src + self.width]);
            }
        }
        out
    }
}

/// Two consecutive frames at identical resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePair {
    pub reference: Image,
    pub target:    Image,
}

impl FramePair {
    pub fn new(reference: Image, target: Image) -> FlowResult<Self> {
        if reference.dims() != target.dims() {
            return Err(FlowError::ShapeMismatch(format!(
                "reference is {:?} but target is {:?}",
                reference.dims(),
                target.dims()
            )));
        }
        Ok(Self { reference, target })
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.reference.dims()
    }
}

/// One dataset item.
#[derive(Debug, Clone)]
pub struct FlowSample {
    /// Position in the source listing, kept for logs and output names
    pub index:        usize,
    pub pair:         FramePair,
    pub ground_truth: Option<FlowField>,
    /// (height, width) before evaluation padding
    pub frame_size:   (usize, usize),
}

impl FlowSample {
    pub fn new(index: usize, pair: FramePair, ground_truth: Option<FlowField>) -> FlowResult<Self> {
        let (_, h, w) = pair.dims();
        if let Some(gt) = &ground_truth {
            if gt.height != h || gt.width != w {
                return Err(FlowError::ShapeMismatch(format!(
                    "groundtruth flow is {}x{} but frames are {}x{}",
                    gt.height, gt.width, h, w
                )));
            }
        }
        Ok(Self { index, pair, ground_truth, frame_size: (h, w) })
    }
}
