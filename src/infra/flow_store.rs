// ============================================================
// Layer 6 — Flow Store
// ============================================================
// Reads and writes flow fields on disk.
//
// Middlebury .flo layout (little endian):
//   bytes 0..4    f32 tag 202021.25 (the ASCII bytes "PIEH")
//   bytes 4..8    i32 width
//   bytes 8..12   i32 height
//   then          width * height * 2 f32, row-major (dx, dy) pairs
//
// Predictions are also written as colour-coded PNGs so they
// can be inspected without a flow viewer.

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::error::{FlowError, FlowResult};
use crate::domain::flow_field::FlowField;

const FLO_TAG: f32 = 202021.25;

/// Magnitude mapped to full saturation in the PNG colour coding.
pub const VISUALISATION_MAX_FLOW: f32 = 10.0;

pub fn decode_flo(bytes: &[u8]) -> FlowResult<FlowField> {
    if bytes.len() < 12 {
        return Err(FlowError::FlowFormat(format!("{} byte file is too short", bytes.len())));
    }
    let word = |i: usize| [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]];

    let tag = f32::from_le_bytes(word(0));
    if tag != FLO_TAG {
        return Err(FlowError::FlowFormat(format!("bad tag {tag}")));
    }
    let width  = i32::from_le_bytes(word(4));
    let height = i32::from_le_bytes(word(8));
    if width <= 0 || height <= 0 {
        return Err(FlowError::FlowFormat(format!("bad size {width}x{height}")));
    }
    let (width, height) = (width as usize, height as usize);

    let expected = 12 + 4 * 2 * width * height;
    if bytes.len() != expected {
        return Err(FlowError::FlowFormat(format!(
            "{}x{} flow needs {} bytes, found {}",
            width, height, expected, bytes.len()
        )));
    }
    let uv: Vec<f32> = bytes[12..]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    FlowField::from_interleaved(height, width, &uv)
}

pub fn encode_flo(flow: &FlowField) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + 8 * flow.width * flow.height);
    out.extend_from_slice(&FLO_TAG.to_le_bytes());
    out.extend_from_slice(&(flow.width as i32).to_le_bytes());
    out.extend_from_slice(&(flow.height as i32).to_le_bytes());
    for v in flow.to_interleaved() {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn read_flo(path: &Path) -> Result<FlowField> {
    let bytes = fs::read(path)
        .with_context(|| format!("Cannot read flow file '{}'", path.display()))?;
    decode_flo(&bytes).with_context(|| format!("Cannot decode '{}'", path.display()))
}

pub fn write_flo(path: &Path, flow: &FlowField) -> Result<()> {
    fs::write(path, encode_flo(flow))
        .with_context(|| format!("Cannot write flow file '{}'", path.display()))
}

pub fn write_flow_png(path: &Path, flow: &FlowField, max_value: f32) -> Result<()> {
    let rgb = flow.to_rgb(max_value);
    let img = image::RgbImage::from_raw(flow.width as u32, flow.height as u32, rgb)
        .ok_or_else(|| anyhow::anyhow!("RGB buffer does not match {}x{}", flow.width, flow.height))?;
    img.save(path)
        .with_context(|| format!("Cannot write '{}'", path.display()))
}

/// Writes per-sample predictions (and groundtruth) into one directory.
pub struct FlowStore {
    dir: PathBuf,
}

impl FlowStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `{name}_{kind}.flo` and `{name}_{kind}.png`.
    pub fn save(&self, name: &str, kind: &str, flow: &FlowField) -> Result<()> {
        write_flo(&self.dir.join(format!("{name}_{kind}.flo")), flow)?;
        write_flow_png(
            &self.dir.join(format!("{name}_{kind}.png")),
            flow,
            VISUALISATION_MAX_FLOW,
        )?;
        tracing::debug!("Saved {} flow for '{}'", kind, name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flo_file_survives_disk() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.flo");
        let flow = FlowField::new(2, 3, (0..12).map(|i| i as f32 * 0.5 - 2.0).collect()).unwrap();

        write_flo(&path, &flow).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"PIEH");
        assert_eq!(bytes.len(), 12 + 2 * 3 * 2 * 4);
        assert_eq!(read_flo(&path).unwrap(), flow);
    }

    #[test]
    fn test_bad_tag_is_rejected() {
        let mut bytes = encode_flo(&FlowField::zeros(1, 1));
        bytes[0] = 0;
        assert!(matches!(decode_flo(&bytes), Err(FlowError::FlowFormat(_))));
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let bytes = encode_flo(&FlowField::zeros(2, 2));
        assert!(decode_flo(&bytes[..bytes.len() - 4]).is_err());
        assert!(decode_flo(&bytes[..8]).is_err());
    }

    #[test]
    fn test_store_writes_flo_and_png() {
        let dir   = tempfile::tempdir().unwrap();
        let store = FlowStore::new(dir.path().join("out")).unwrap();
        store.save("00001", "flow", &FlowField::constant(4, 4, 1.0, -1.0)).unwrap();
        assert!(store.dir().join("00001_flow.flo").exists());
        assert!(store.dir().join("00001_flow.png").exists());
    }
}
