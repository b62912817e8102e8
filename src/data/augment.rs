// ============================================================
// Layer 4 — Augmentation
// ============================================================
// Geometric co-transforms applied to both frames and the
// groundtruth flow together:
//
//   training:   random translation, random rotation (the two
//               frames turn by slightly different angles),
//               random crop, random vertical and horizontal
//               flip (each with p = 0.5)
//   evaluation: pad bottom/right to the pyramid factor
//
// Crops are rounded down to a multiple of the network's
// pyramid factor so every sample is a valid network input.
// Evaluation never drops pixels: frames are edge-padded and
// the padded groundtruth is marked unknown, so EPE still
// covers exactly the frame as read.
//
// Every transform rewrites the flow so it keeps describing
// where reference pixels land in the transformed target.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::{
    error::{FlowError, FlowResult},
    flow_field::FlowField,
    frame_pair::{FlowSample, FramePair, Image},
};

/// Default training crop (height, width).
pub const DEFAULT_CROP: (usize, usize) = (320, 448);

/// Random translation and rotation ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometricJitter {
    /// Pixels, per axis
    pub max_translation: usize,
    /// Degrees; the pair is rotated by a shared angle in ±max_angle
    pub max_angle:       f64,
    /// Degrees; spread between the two frames' angles
    pub max_angle_diff:  f64,
}

impl Default for GeometricJitter {
    fn default() -> Self {
        Self { max_translation: 10, max_angle: 10.0, max_angle_diff: 5.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Augmentation {
    /// Optional jitter, random crop of at most (height, width), flips
    Train {
        crop:   (usize, usize),
        factor: usize,
        jitter: Option<GeometricJitter>,
    },
    /// Pad to the next multiple of the pyramid factor
    Eval { factor: usize },
}

fn round_down(value: usize, factor: usize) -> usize {
    value - value % factor.max(1)
}

fn round_up(value: usize, factor: usize) -> usize {
    value.div_ceil(factor.max(1)) * factor.max(1)
}

/// Target crop for an image of `height` x `width`.
fn crop_size(height: usize, width: usize, limit: (usize, usize), factor: usize) -> FlowResult<(usize, usize)> {
    let h = round_down(height.min(limit.0), factor);
    let w = round_down(width.min(limit.1), factor);
    if h == 0 || w == 0 {
        return Err(FlowError::config(
            "image size",
            format!("{height}x{width} frames are smaller than the network factor {factor}"),
        ));
    }
    Ok((h, w))
}

fn crop_sample(sample: FlowSample, top: usize, left: usize, h: usize, w: usize) -> FlowResult<FlowSample> {
    let pair = FramePair::new(
        sample.pair.reference.crop(top, left, h, w)?,
        sample.pair.target.crop(top, left, h, w)?,
    )?;
    let gt = sample.ground_truth.map(|g| g.crop(top, left, h, w)).transpose()?;
    FlowSample::new(sample.index, pair, gt)
}

/// Edge-pad frames to `height` x `width`; padded flow is unknown.
pub fn pad_sample(sample: FlowSample, height: usize, width: usize) -> FlowResult<FlowSample> {
    let frame_size = sample.frame_size;
    let pair = FramePair::new(
        sample.pair.reference.pad_edge(height, width)?,
        sample.pair.target.pad_edge(height, width)?,
    )?;
    let gt = sample.ground_truth.map(|g| g.pad_unknown(height, width)).transpose()?;
    Ok(FlowSample { frame_size, ..FlowSample::new(sample.index, pair, gt)? })
}

/// Shift the target window by (dx, dy) against the reference
/// window. Both shrink by |dx| x |dy|; the flow gains (dx, dy).
pub fn translate(sample: FlowSample, dx: isize, dy: isize) -> FlowResult<FlowSample> {
    if dx == 0 && dy == 0 {
        return Ok(sample);
    }
    let (_, height, width) = sample.pair.dims();
    let (ax, ay) = (dx.unsigned_abs(), dy.unsigned_abs());
    if ax >= width || ay >= height {
        return Err(FlowError::ShapeMismatch(format!(
            "translation ({dx}, {dy}) leaves nothing of a {height}x{width} frame"
        )));
    }
    let (h, w) = (height - ay, width - ax);
    let (ref_top, ref_left) = (dy.max(0) as usize, dx.max(0) as usize);
    let (tgt_top, tgt_left) = ((-dy).max(0) as usize, (-dx).max(0) as usize);

    let pair = FramePair::new(
        sample.pair.reference.crop(ref_top, ref_left, h, w)?,
        sample.pair.target.crop(tgt_top, tgt_left, h, w)?,
    )?;
    let gt = match sample.ground_truth {
        Some(g) => {
            let mut g = g.crop(ref_top, ref_left, h, w)?;
            let plane = h * w;
            g.data[..plane].iter_mut().for_each(|u| *u += dx as f32);
            g.data[plane..].iter_mut().for_each(|v| *v += dy as f32);
            Some(g)
        }
        None => None,
    };
    FlowSample::new(sample.index, pair, gt)
}

/// Rotate `(x, y)` about `(cx, cy)` by `angle` radians.
fn rotate_point(x: f32, y: f32, cx: f32, cy: f32, angle: f32) -> (f32, f32) {
    let (s, c) = angle.sin_cos();
    let (rx, ry) = (x - cx, y - cy);
    (cx + c * rx - s * ry, cy + s * rx + c * ry)
}

fn rotate_image(image: &Image, angle: f32) -> Image {
    let (cy, cx) = ((image.height as f32 - 1.0) / 2.0, (image.width as f32 - 1.0) / 2.0);
    let mut data = Vec::with_capacity(image.data.len());
    for c in 0..image.channels {
        for y in 0..image.height {
            for x in 0..image.width {
                let (sx, sy) = rotate_point(x as f32, y as f32, cx, cy, -angle);
                data.push(image.sample_bilinear(c, sy, sx));
            }
        }
    }
    Image { channels: image.channels, height: image.height, width: image.width, data }
}

/// Turn the reference frame by `ref_deg` and the target frame by
/// `tgt_deg` degrees about the frame centre. Content rotated in
/// from outside reads 0 and its flow is unknown.
pub fn rotate(sample: FlowSample, ref_deg: f64, tgt_deg: f64) -> FlowResult<FlowSample> {
    let (a1, a2) = (ref_deg.to_radians() as f32, tgt_deg.to_radians() as f32);
    let (_, height, width) = sample.pair.dims();
    let (cy, cx) = ((height as f32 - 1.0) / 2.0, (width as f32 - 1.0) / 2.0);

    let pair = FramePair::new(
        rotate_image(&sample.pair.reference, a1),
        rotate_image(&sample.pair.target, a2),
    )?;

    // new reference pixel p' came from p = R(-a1) p'; p moved to
    // q = p + flow(p), which now sits at q' = R(a2) q
    let gt = sample.ground_truth.map(|g| {
        let plane = height * width;
        let mut data = vec![f32::NAN; 2 * plane];
        for y in 0..height {
            for x in 0..width {
                let (px, py) = rotate_point(x as f32, y as f32, cx, cy, -a1);
                if let Some((u, v)) = g.sample_bilinear(py, px) {
                    let (qx, qy) = rotate_point(px + u, py + v, cx, cy, a2);
                    data[y * width + x]         = qx - x as f32;
                    data[plane + y * width + x] = qy - y as f32;
                }
            }
        }
        FlowField { height, width, data }
    });
    FlowSample::new(sample.index, pair, gt)
}

pub fn flip_horizontal(sample: FlowSample) -> FlowSample {
    FlowSample {
        pair:         FramePair {
            reference: sample.pair.reference.flip_horizontal(),
            target:    sample.pair.target.flip_horizontal(),
        },
        ground_truth: sample.ground_truth.map(|g| g.flip_horizontal()),
        ..sample
    }
}

pub fn flip_vertical(sample: FlowSample) -> FlowSample {
    FlowSample {
        pair:         FramePair {
            reference: sample.pair.reference.flip_vertical(),
            target:    sample.pair.target.flip_vertical(),
        },
        ground_truth: sample.ground_truth.map(|g| g.flip_vertical()),
        ..sample
    }
}

impl GeometricJitter {
    /// Translation is capped so the frame still covers `keep`.
    fn apply<R: Rng>(&self, sample: FlowSample, keep: (usize, usize), rng: &mut R) -> FlowResult<FlowSample> {
        let (_, height, width) = sample.pair.dims();
        let max_y = self.max_translation.min(height.saturating_sub(keep.0)) as isize;
        let max_x = self.max_translation.min(width.saturating_sub(keep.1)) as isize;
        let dy = rng.gen_range(-max_y..=max_y);
        let dx = rng.gen_range(-max_x..=max_x);
        let sample = translate(sample, dx, dy)?;

        if self.max_angle <= 0.0 && self.max_angle_diff <= 0.0 {
            return Ok(sample);
        }
        let angle = rng.gen_range(-self.max_angle..=self.max_angle);
        let diff  = rng.gen_range(-self.max_angle_diff..=self.max_angle_diff);
        rotate(sample, angle - diff / 2.0, angle + diff / 2.0)
    }
}

impl Augmentation {
    pub fn apply<R: Rng>(&self, sample: FlowSample, rng: &mut R) -> FlowResult<FlowSample> {
        let (_, height, width) = sample.pair.dims();
        match *self {
            Augmentation::Eval { factor } => {
                pad_sample(sample, round_up(height, factor), round_up(width, factor))
            }
            Augmentation::Train { crop, factor, jitter } => {
                let (h, w) = crop_size(height, width, crop, factor)?;
                let sample = match jitter {
                    Some(j) => j.apply(sample, (h, w), rng)?,
                    None    => sample,
                };
                let (_, height, width) = sample.pair.dims();
                let top    = rng.gen_range(0..=height - h);
                let left   = rng.gen_range(0..=width - w);
                let mut s  = crop_sample(sample, top, left, h, w)?;
                if rng.gen_bool(0.5) {
                    s = flip_vertical(s);
                }
                if rng.gen_bool(0.5) {
                    s = flip_horizontal(s);
                }
                Ok(s)
            }
        }
    }
}
