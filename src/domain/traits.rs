// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer only needs "give me the list of
// samples" from a dataset layout; it never looks at how a
// particular benchmark arranges its files on disk.

use std::path::PathBuf;


/// File locations of one (reference, target, optional flow) sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePaths {
    pub reference: PathBuf,
    pub target:    PathBuf,
    pub flow:      Option<PathBuf>,
}

impl SamplePaths {
    pub fn new(reference: PathBuf, target: PathBuf, flow: Option<PathBuf>) -> Self {
        Self { reference, target, flow }
    }

    /// Short name used for output files, derived from the reference frame.
    pub fn stem(&self) -> String {
        self.reference
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("sample")
            .to_string()
    }
}

// ─── SampleSource ─────────────────────────────────────────────────────────────
/// Any dataset layout that can enumerate its samples.
///
/// Implementations:
///   - FlyingChairsLayout → NNNNN_img1.ppm / NNNNN_img2.ppm / NNNNN_flow.flo
///   - SintelLayout       → training/{clean,final}/<scene>/frame_NNNN.png
///   - FrameSequenceLayout → consecutive video frames, no groundtruth
pub trait SampleSource {
    /// Enumerate samples in a stable (sorted) order.
    fn samples(&self) -> anyhow::Result<Vec<SamplePaths>>;
}
