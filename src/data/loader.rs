// ============================================================
// Layer 4 — Dataset Layouts and Frame Decoding
// ============================================================
// Finds (reference, target, groundtruth) triples on disk and
// decodes them into domain types.
//
// Supported layouts (--dataset):
//
//   flying_chairs   <DATA>/00001_img1.ppm
//                   <DATA>/00001_img2.ppm
//                   <DATA>/00001_flow.flo
//
//   sintel_clean    <DATA>/training/clean/<scene>/frame_0001.png
//   sintel_final    <DATA>/training/final/<scene>/frame_0001.png
//                   <DATA>/training/flow/<scene>/frame_0001.flo
//                   (pairs are consecutive frames of a scene)
//
//   frames          <DATA>/<sequence>/*.{png,jpg,jpeg,ppm}
//                   consecutive frames of each sequence, no
//                   groundtruth (frames directly under <DATA>
//                   count as one sequence)
//
// Pixels are scaled to [0, 1] and mean-centred per channel.
//
// Reference: image crate documentation, walkdir crate documentation

use anyhow::{Context, Result};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::domain::{
    error::FlowError,
    frame_pair::{FlowSample, FramePair, Image},
    traits::{SamplePaths, SampleSource},
};
use crate::infra::flow_store::read_flo;

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "ppm"];

// ─── Dataset Kind ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    FlyingChairs,
    SintelClean,
    SintelFinal,
    Frames,
}

impl DatasetKind {
    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::FlyingChairs => "flying_chairs",
            DatasetKind::SintelClean  => "sintel_clean",
            DatasetKind::SintelFinal  => "sintel_final",
            DatasetKind::Frames       => "frames",
        }
    }

    pub fn source(&self, root: impl Into<PathBuf>) -> Box<dyn SampleSource> {
        let root = root.into();
        match self {
            DatasetKind::FlyingChairs => Box::new(FlyingChairsLayout::new(root)),
            DatasetKind::SintelClean  => Box::new(SintelLayout::new(root, "clean")),
            DatasetKind::SintelFinal  => Box::new(SintelLayout::new(root, "final")),
            DatasetKind::Frames       => Box::new(FrameSequenceLayout::new(root)),
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatasetKind {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "flying_chairs" => Ok(DatasetKind::FlyingChairs),
            "sintel_clean"  => Ok(DatasetKind::SintelClean),
            "sintel_final"  => Ok(DatasetKind::SintelFinal),
            "frames"        => Ok(DatasetKind::Frames),
            other => Err(FlowError::config(
                "dataset",
                format!("unknown dataset '{other}' (flying_chairs, sintel_clean, sintel_final, frames)"),
            )),
        }
    }
}

// ─── Layouts ──────────────────────────────────────────────────────────────────

fn has_frame_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Sorted frame files directly inside `dir`.
fn frames_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("Cannot read directory '{}'", dir.display()))?;
        if entry.file_type().is_file() && has_frame_extension(entry.path()) {
            frames.push(entry.into_path());
        }
    }
    frames.sort();
    Ok(frames)
}

/// Sorted subdirectories directly inside `dir`.
fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("Cannot read directory '{}'", dir.display()))?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("Dataset directory '{}' does not exist", dir.display());
    }
    Ok(())
}

pub struct FlyingChairsLayout {
    root: PathBuf,
}

impl FlyingChairsLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SampleSource for FlyingChairsLayout {
    fn samples(&self) -> Result<Vec<SamplePaths>> {
        ensure_dir(&self.root)?;
        let mut out = Vec::new();
        for first in frames_in(&self.root)? {
            let Some(name) = first.file_name().and_then(|n| n.to_str()) else { continue };
            let Some(prefix) = name.strip_suffix("_img1.ppm") else { continue };

            let second = self.root.join(format!("{prefix}_img2.ppm"));
            if !second.is_file() {
                tracing::warn!("Skipping '{}': no matching _img2.ppm", first.display());
                continue;
            }
            let flow = self.root.join(format!("{prefix}_flow.flo"));
            out.push(SamplePaths::new(first, second, flow.is_file().then_some(flow)));
        }
        Ok(out)
    }
}

pub struct SintelLayout {
    root: PathBuf,
    pass: &'static str,
}

impl SintelLayout {
    pub fn new(root: impl Into<PathBuf>, pass: &'static str) -> Self {
        Self { root: root.into(), pass }
    }

    /// Accept either the dataset root or its `training` folder.
    fn training_dir(&self) -> PathBuf {
        let nested = self.root.join("training");
        if nested.is_dir() { nested } else { self.root.clone() }
    }
}

impl SampleSource for SintelLayout {
    fn samples(&self) -> Result<Vec<SamplePaths>> {
        let training = self.training_dir();
        let pass_dir = training.join(self.pass);
        ensure_dir(&pass_dir)?;
        let flow_dir = training.join("flow");

        let mut out = Vec::new();
        for scene in subdirs(&pass_dir)? {
            let scene_name = scene.file_name().map(PathBuf::from).unwrap_or_default();
            let frames     = frames_in(&scene)?;
            for pair in frames.windows(2) {
                let flow = pair[0]
                    .file_stem()
                    .map(|stem| flow_dir.join(&scene_name).join(stem).with_extension("flo"))
                    .filter(|p| p.is_file());
                out.push(SamplePaths::new(pair[0].clone(), pair[1].clone(), flow));
            }
        }
        Ok(out)
    }
}

pub struct FrameSequenceLayout {
    root: PathBuf,
}

impl FrameSequenceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SampleSource for FrameSequenceLayout {
    fn samples(&self) -> Result<Vec<SamplePaths>> {
        ensure_dir(&self.root)?;
        let mut sequences = vec![self.root.clone()];
        sequences.extend(subdirs(&self.root)?);

        let mut out = Vec::new();
        for seq in sequences {
            for pair in frames_in(&seq)?.windows(2) {
                out.push(SamplePaths::new(pair[0].clone(), pair[1].clone(), None));
            }
        }
        Ok(out)
    }
}

// ─── Decoding ─────────────────────────────────────────────────────────────────

/// Decode an image file into a mean-centred RGB `Image`.
pub fn load_image(path: &Path) -> Result<Image> {
    let rgb = image::open(path)
        .with_context(|| format!("Cannot decode image '{}'", path.display()))?
        .to_rgb8();
    let (width, height) = rgb.dimensions();
    let hwc: Vec<f32> = rgb.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
    Ok(Image::from_interleaved_normalised(3, height as usize, width as usize, &hwc)?)
}

/// Load the frames (and flow, if any) of one sample.
pub fn load_sample(index: usize, paths: &SamplePaths) -> Result<FlowSample> {
    let reference = load_image(&paths.reference)?;
    let target    = load_image(&paths.target)?;
    let pair      = FramePair::new(reference, target)
        .with_context(|| format!("Frames of sample {index} differ in size"))?;
    let ground_truth = match &paths.flow {
        Some(p) => Some(read_flo(p)?),
        None    => None,
    };
    Ok(FlowSample::new(index, pair, ground_truth)?)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow_field::FlowField;
    use crate::infra::flow_store::write_flo;
    use std::fs;

    fn write_png(path: &Path, w: u32, h: u32, value: u8) {
        image::RgbImage::from_pixel(w, h, image::Rgb([value, value, value]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_parse_dataset_kind() {
        assert_eq!("flying_chairs".parse::<DatasetKind>().unwrap(), DatasetKind::FlyingChairs);
        assert_eq!("sintel-final".parse::<DatasetKind>().unwrap(), DatasetKind::SintelFinal);
        assert!("kitti".parse::<DatasetKind>().unwrap_err().is_config());
    }

    #[test]
    fn test_flying_chairs_pairs_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        for prefix in ["00002", "00001"] {
            for suffix in ["img1", "img2"] {
                let p = dir.path().join(format!("{prefix}_{suffix}.ppm"));
                image::RgbImage::new(4, 4).save(&p).unwrap();
            }
        }
        write_flo(&dir.path().join("00001_flow.flo"), &FlowField::zeros(4, 4)).unwrap();

        let samples = FlyingChairsLayout::new(dir.path()).samples().unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].reference.ends_with("00001_img1.ppm"));
        assert!(samples[0].flow.is_some());
        assert!(samples[1].flow.is_none());
    }

    #[test]
    fn test_sintel_pairs_consecutive_frames_per_scene() {
        let dir   = tempfile::tempdir().unwrap();
        let scene = dir.path().join("training/clean/alley_1");
        let flows = dir.path().join("training/flow/alley_1");
        fs::create_dir_all(&scene).unwrap();
        fs::create_dir_all(&flows).unwrap();
        for i in 1..=3 {
            write_png(&scene.join(format!("frame_{i:04}.png")), 4, 4, 0);
        }
        write_flo(&flows.join("frame_0001.flo"), &FlowField::zeros(4, 4)).unwrap();

        let samples = SintelLayout::new(dir.path(), "clean").samples().unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].target.ends_with("frame_0002.png"));
        assert!(samples[0].flow.is_some());
        assert!(samples[1].flow.is_none());
        assert!(SintelLayout::new(dir.path(), "final").samples().is_err());
    }

    #[test]
    fn test_frame_sequences_never_cross_directories() {
        let dir = tempfile::tempdir().unwrap();
        for seq in ["a", "b"] {
            let d = dir.path().join(seq);
            fs::create_dir_all(&d).unwrap();
            for i in 0..2 {
                write_png(&d.join(format!("{i}.png")), 2, 2, 10);
            }
        }
        let samples = FrameSequenceLayout::new(dir.path()).samples().unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.reference.parent() == s.target.parent()));
    }

    #[test]
    fn test_load_image_centres_pixels() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("grey.png");
        write_png(&path, 3, 2, 255);
        let img = load_image(&path).unwrap();
        assert_eq!(img.dims(), (3, 2, 3));
        approx::assert_abs_diff_eq!(img.at(0, 1, 2), 0.55, epsilon = 1e-6);
    }

    #[test]
    fn test_load_sample_rejects_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (dir.path().join("a.png"), dir.path().join("b.png"));
        write_png(&a, 4, 4, 0);
        write_png(&b, 4, 2, 0);
        assert!(load_sample(0, &SamplePaths::new(a, b, None)).is_err());
    }
}
