// ============================================================
// Layer 3 — Flow Field
// ============================================================
// A dense displacement field: for every pixel p of the
// reference frame, (dx, dy) such that p + (dx, dy) is where
// that pixel moved to in the target frame.
//
// Storage is planar: all dx values, then all dy values.
//
// Groundtruth flows can mark pixels as unknown (sparse KITTI
// style data, Middlebury's 1e9 sentinel). Those pixels are
// skipped by the endpoint-error metric.

use serde::{Deserialize, Serialize};

use crate::domain::error::{FlowError, FlowResult};

/// Components at or above this magnitude mean "unknown".
pub const UNKNOWN_FLOW_THRESHOLD: f32 = 1e9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowField {
    pub height: usize,
    pub width:  usize,
    pub data:   Vec<f32>,
}

/// Running endpoint-error accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpeStats {
    pub error_sum:    f64,
    pub valid_pixels: usize,
}

impl EpeStats {
    pub fn merge(&mut self, other: EpeStats) {
        self.error_sum    += other.error_sum;
        self.valid_pixels += other.valid_pixels;
    }

    /// Mean EPE over all valid pixels, None when nothing was valid.
    pub fn mean(&self) -> Option<f64> {
        if self.valid_pixels == 0 {
            None
        } else {
            Some(self.error_sum / self.valid_pixels as f64)
        }
    }
}

impl FlowField {
    pub fn new(height: usize, width: usize, data: Vec<f32>) -> FlowResult<Self> {
        if data.len() != 2 * height * width {
            return Err(FlowError::ShapeMismatch(format!(
                "flow buffer has {} values, expected 2x{}x{}",
                data.len(), height, width
            )));
        }
        Ok(Self { height, width, data })
    }

    pub fn zeros(height: usize, width: usize) -> Self {
        Self::constant(height, width, 0.0, 0.0)
    }

    pub fn constant(height: usize, width: usize, dx: f32, dy: f32) -> Self {
        let plane = height * width;
        let mut data = vec![dx; 2 * plane];
        data[plane..].fill(dy);
        Self { height, width, data }
    }

    /// Build from (dx, dy) pairs in row-major order, the .flo layout.
    pub fn from_interleaved(height: usize, width: usize, uv: &[f32]) -> FlowResult<Self> {
        if uv.len() != 2 * height * width {
            return Err(FlowError::FlowFormat(format!(
                "expected {} flow values, found {}",
                2 * height * width,
                uv.len()
            )));
        }
        let plane = height * width;
        let mut data = vec![0.0f32; 2 * plane];
        for (i, px) in uv.chunks_exact(2).enumerate() {
            data[i]         = px[0];
            data[plane + i] = px[1];
        }
        Ok(Self { height, width, data })
    }

    pub fn to_interleaved(&self) -> Vec<f32> {
        let plane = self.height * self.width;
        let mut out = Vec::with_capacity(2 * plane);
        for i in 0..plane {
            out.push(self.data[i]);
            out.push(self.data[plane + i]);
        }
        out
    }

    pub fn dx(&self, y: usize, x: usize) -> f32 {
        self.data[y * self.width + x]
    }

    pub fn dy(&self, y: usize, x: usize) -> f32 {
        self.data[self.height * self.width + y * self.width + x]
    }

    pub fn is_valid_at(&self, y: usize, x: usize) -> bool {
        let (u, v) = (self.dx(y, x), self.dy(y, x));
        u.is_finite()
            && v.is_finite()
            && u.abs() < UNKNOWN_FLOW_THRESHOLD
            && v.abs() < UNKNOWN_FLOW_THRESHOLD
    }

    /// Sum of per-pixel Euclidean errors of `self` (prediction)
    /// against `ground_truth`, over the valid groundtruth pixels.
    pub fn endpoint_error(&self, ground_truth: &FlowField) -> FlowResult<EpeStats> {
        if self.height != ground_truth.height || self.width != ground_truth.width {
            return Err(FlowError::ShapeMismatch(format!(
                "prediction is {}x{} but groundtruth is {}x{}",
                self.height, self.width, ground_truth.height, ground_truth.width
            )));
        }
        let mut stats = EpeStats::default();
        for y in 0..self.height {
            for x in 0..self.width {
                if !ground_truth.is_valid_at(y, x) {
                    continue;
                }
                let du = (self.dx(y, x) - ground_truth.dx(y, x)) as f64;
                let dv = (self.dy(y, x) - ground_truth.dy(y, x)) as f64;
                stats.error_sum    += (du * du + dv * dv).sqrt();
                stats.valid_pixels += 1;
            }
        }
        Ok(stats)
    }

    pub fn crop(&self, top: usize, left: usize, height: usize, width: usize) -> FlowResult<Self> {
        if top + height > self.height || left + width > self.width {
            return Err(FlowError::ShapeMismatch(format!(
                "crop {}x{} at ({}, {}) exceeds flow {}x{}",
                height, width, top, left, self.height, self.width
            )));
        }
        let mut data = Vec::with_capacity(2 * height * width);
        for c in 0..2 {
            for y in top..top + height {
                let row = c * self.height * self.width + y * self.width;
                data.extend_from_slice(&self.data[row + left..row + left + width]);
            }
        }
        Ok(Self { height, width, data })
    }

    /// Grow to `height` x `width`; the new pixels are unknown.
    pub fn pad_unknown(&self, height: usize, width: usize) -> FlowResult<Self> {
        if height < self.height || width < self.width {
            return Err(FlowError::ShapeMismatch(format!(
                "cannot pad flow {}x{} to {}x{}",
                self.height, self.width, height, width
            )));
        }
        let mut data = vec![f32::NAN; 2 * height * width];
        for c in 0..2 {
            for y in 0..self.height {
                let src = c * self.height * self.width + y * self.width;
                let dst = c * height * width + y * width;
                data[dst..dst + self.width].copy_from_slice(&self.data[src..src + self.width]);
            }
        }
        Ok(Self { height, width, data })
    }

    /// Bilinear (dx, dy) at (y, x). None when a tap with non-zero
    /// weight is outside the field or unknown.
    pub fn sample_bilinear(&self, y: f32, x: f32) -> Option<(f32, f32)> {
        let (y0, x0) = (y.floor(), x.floor());
        let (fy, fx) = (y - y0, x - x0);
        let mut out = (0.0f32, 0.0f32);
        for (dy, dx, wt) in [
            (0.0, 0.0, (1.0 - fy) * (1.0 - fx)),
            (0.0, 1.0, (1.0 - fy) * fx),
            (1.0, 0.0, fy * (1.0 - fx)),
            (1.0, 1.0, fy * fx),
        ] {
            if wt == 0.0 {
                continue;
            }
            let (yy, xx) = (y0 + dy, x0 + dx);
            if yy < 0.0 || xx < 0.0 || yy >= self.height as f32 || xx >= self.width as f32 {
                return None;
            }
            let (yy, xx) = (yy as usize, xx as usize);
            if !self.is_valid_at(yy, xx) {
                return None;
            }
            out.0 += wt * self.dx(yy, xx);
            out.1 += wt * self.dy(yy, xx);
        }
        Some(out)
    }

    /// Mirror left-right. Horizontal displacements change sign.
    pub fn flip_horizontal(&self) -> Self {
        let plane = self.height * self.width;
        let mut out = self.clone();
        for c in 0..2 {
            for y in 0..self.height {
                let row = c * plane + y * self.width;
                out.data[row..row + self.width].reverse();
            }
        }
        out.data[..plane].iter_mut().for_each(|u| *u = -*u);
        out
    }

    /// Mirror top-bottom. Vertical displacements change sign.
    pub fn flip_vertical(&self) -> Self {
        let plane = self.height * self.width;
        let mut out = self.clone();
        for c in 0..2 {
            for y in 0..self.height {
                let src = c * plane + y * self.width;
                let dst = c * plane + (self.height - 1 - y) * self.width;
                out.data[dst..dst + self.width]
                    .copy_from_slice(&self.data[src..src + self.width]);
            }
        }
        out.data[plane..].iter_mut().for_each(|v| *v = -*v);
        out
    }

    /// Colour-code the field as interleaved RGB8.
    ///
    /// R = 1 + dx/m, G = 1 - (dx + dy)/(2m), B = 1 + dy/m, clipped
    /// to [0, 1], with m = `max_value`. Unknown pixels are black.
    pub fn to_rgb(&self, max_value: f32) -> Vec<u8> {
        let scale = if max_value > 0.0 { max_value } else { 1.0 };
        let mut out = Vec::with_capacity(3 * self.height * self.width);
        for y in 0..self.height {
            for x in 0..self.width {
                if !self.is_valid_at(y, x) {
                    out.extend_from_slice(&[0, 0, 0]);
                    continue;
                }
                let u = self.dx(y, x) / scale;
                let v = self.dy(y, x) / scale;
                for channel in [1.0 + u, 1.0 - 0.5 * (u + v), 1.0 + v] {
                    out.push((channel.clamp(0.0, 1.0) * 255.0).round() as u8);
                }
            }
        }
        out
    }
}
