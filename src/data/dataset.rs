// ============================================================
// Layer 4 — Flow Dataset
// ============================================================
// Implements Burn's Dataset trait over a list of sample paths.
// Frames are decoded lazily in `get`, on the DataLoader's
// worker threads, and augmented there.
//
// Items are Results so a broken file reaches the training loop
// instead of being silently dropped by the loader:
//
//   1. load sample i
//   2. on failure, log and load sample (i + 1) % len instead
//   3. if that fails too, yield Err(SampleFailure) and let the
//      caller abort with FlowError::Dataset

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use burn::data::dataset::Dataset;
use rand::{rngs::StdRng, SeedableRng};

use crate::data::{augment::Augmentation, loader::load_sample};
use crate::domain::{
    error::FlowError,
    frame_pair::FlowSample,
    traits::SamplePaths,
};

/// A sample that could not be produced, even after one retry.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFailure {
    pub index:  usize,
    pub reason: String,
}

impl From<SampleFailure> for FlowError {
    fn from(f: SampleFailure) -> Self {
        FlowError::Dataset { index: f.index, reason: f.reason }
    }
}

pub type FlowItem = Result<FlowSample, SampleFailure>;

/// Decodes one sample from its paths.
pub type SampleReader = Arc<dyn Fn(usize, &SamplePaths) -> anyhow::Result<FlowSample> + Send + Sync>;

pub struct FlowDataset {
    samples:      Vec<SamplePaths>,
    augmentation: Augmentation,
    reader:       SampleReader,
    seed:         u64,
    /// Advances on every draw so repeated epochs see new crops
    draws:        AtomicU64,
}

impl FlowDataset {
    pub fn new(samples: Vec<SamplePaths>, augmentation: Augmentation, seed: u64) -> Self {
        Self::with_reader(samples, augmentation, seed, Arc::new(load_sample))
    }

    pub fn with_reader(
        samples:      Vec<SamplePaths>,
        augmentation: Augmentation,
        seed:         u64,
        reader:       SampleReader,
    ) -> Self {
        Self { samples, augmentation, reader, seed, draws: AtomicU64::new(0) }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn paths(&self, index: usize) -> Option<&SamplePaths> {
        self.samples.get(index)
    }

    fn load(&self, index: usize) -> anyhow::Result<FlowSample> {
        let sample = (self.reader)(index, &self.samples[index])?;
        let draw   = self.draws.fetch_add(1, Ordering::Relaxed);
        let mut rng = StdRng::seed_from_u64(
            self.seed ^ draw.wrapping_mul(0x9E37_79B9_7F4A_7C15),
        );
        Ok(self.augmentation.apply(sample, &mut rng)?)
    }
}

impl Dataset<FlowItem> for FlowDataset {
    fn get(&self, index: usize) -> Option<FlowItem> {
        if index >= self.samples.len() {
            return None;
        }
        let first = match self.load(index) {
            Ok(sample) => return Some(Ok(sample)),
            Err(e)     => e,
        };
        let next = (index + 1) % self.samples.len();
        tracing::warn!("Sample {} failed ({:#}), retrying with sample {}", index, first, next);

        Some(self.load(next).map_err(|second| SampleFailure {
            index,
            reason: format!("{first:#}; retry with sample {next} failed: {second:#}"),
        }))
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::frame_pair::{FramePair, Image};
    use std::path::PathBuf;

    fn paths(n: usize) -> Vec<SamplePaths> {
        (0..n)
            .map(|i| SamplePaths::new(PathBuf::from(format!("{i}a.png")), PathBuf::from(format!("{i}b.png")), None))
            .collect()
    }

    /// Succeeds unless the index is listed in `broken`.
    fn reader(broken: Vec<usize>) -> SampleReader {
        Arc::new(move |index: usize, _: &SamplePaths| -> anyhow::Result<FlowSample> {
            if broken.contains(&index) {
                anyhow::bail!("corrupt file");
            }
            let img = Image::filled(3, 4, 4, index as f32);
            Ok(FlowSample::new(index, FramePair::new(img.clone(), img)?, None)?)
        })
    }

    fn dataset(n: usize, broken: Vec<usize>) -> FlowDataset {
        FlowDataset::with_reader(paths(n), Augmentation::Eval { factor: 4 }, 0, reader(broken))
    }

    #[test]
    fn test_get_loads_requested_sample() {
        let item = dataset(3, vec![]).get(1).unwrap().unwrap();
        assert_eq!(item.index, 1);
        assert!(dataset(3, vec![]).get(3).is_none());
    }

    #[test]
    fn test_failed_sample_is_retried_once_on_next_position() {
        let item = dataset(3, vec![1]).get(1).unwrap().unwrap();
        assert_eq!(item.index, 2);
        // wraps around at the end
        let item = dataset(3, vec![2]).get(2).unwrap().unwrap();
        assert_eq!(item.index, 0);
    }

    #[test]
    fn test_second_failure_is_reported() {
        let failure = dataset(3, vec![0, 1]).get(0).unwrap().unwrap_err();
        assert_eq!(failure.index, 0);
        assert!(failure.reason.contains("corrupt file"));
        let err: FlowError = failure.into();
        assert!(matches!(err, FlowError::Dataset { index: 0, .. }));
    }
}
