// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Two ways to decide which frame pairs are held out:
//
//   --split-file  a text file with one token per sample, in
//                 listing order: "1" = train, "2" = validation
//                 (the FlyingChairs_train_val.txt convention)
//   --split-value a training fraction; samples are shuffled with
//                 a seeded RNG before the cut, so runs with the
//                 same seed see the same split
//
// Reference: rand crate documentation (SeedableRng, SliceRandom)

use std::{fs, path::{Path, PathBuf}};

use anyhow::{Context, Result};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::domain::error::FlowError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SplitPolicy {
    File(PathBuf),
    Fraction(f64),
}

impl Default for SplitPolicy {
    fn default() -> Self {
        SplitPolicy::Fraction(0.8)
    }
}

impl SplitPolicy {
    pub fn apply<T>(&self, samples: Vec<T>, seed: u64) -> Result<(Vec<T>, Vec<T>)> {
        match self {
            SplitPolicy::Fraction(f) => Ok(split_train_val(samples, *f, seed)),
            SplitPolicy::File(path)  => {
                let flags = read_split_file(path)?;
                Ok(split_by_flags(samples, &flags)?)
            }
        }
    }
}

/// Parse a split file into per-sample "is training" flags.
pub fn parse_split(text: &str) -> Result<Vec<bool>, FlowError> {
    text.split_whitespace()
        .enumerate()
        .map(|(i, token)| match token {
            "1" => Ok(true),
            "2" => Ok(false),
            other => Err(FlowError::config(
                "split-file",
                format!("entry {i} is '{other}', expected 1 (train) or 2 (validation)"),
            )),
        })
        .collect()
}

pub fn read_split_file(path: &Path) -> Result<Vec<bool>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read split file '{}'", path.display()))?;
    Ok(parse_split(&text)?)
}

/// Partition `samples` by `flags` (true = train). The file must
/// cover every sample.
pub fn split_by_flags<T>(samples: Vec<T>, flags: &[bool]) -> Result<(Vec<T>, Vec<T>), FlowError> {
    if flags.len() != samples.len() {
        return Err(FlowError::config(
            "split-file",
            format!("{} entries for {} samples", flags.len(), samples.len()),
        ));
    }
    let (train, val): (Vec<_>, Vec<_>) = samples
        .into_iter()
        .zip(flags.iter().copied())
        .partition(|(_, is_train)| *is_train);
    Ok((
        train.into_iter().map(|(s, _)| s).collect(),
        val.into_iter().map(|(s, _)| s).collect(),
    ))
}

/// Shuffle with `seed` and cut at `train_fraction`.
pub fn split_train_val<T>(mut samples: Vec<T>, train_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let split_at = ((total as f64) * train_fraction.clamp(0.0, 1.0)).round() as usize;
    let val      = samples.split_off(split_at.min(total));

    tracing::debug!(
        "Dataset split: {} training, {} validation",
        samples.len(),
        val.len(),
    );
    (samples, val)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_split_sizes() {
        let items: Vec<usize> = (0..100).collect();
        let (train, val)      = split_train_val(items, 0.8, 1);
        assert_eq!(train.len(), 80);
        assert_eq!(val.len(),   20);
    }

    #[test]
    fn test_same_seed_same_split() {
        let (a, _) = split_train_val((0..40).collect::<Vec<usize>>(), 0.5, 7);
        let (b, _) = split_train_val((0..40).collect::<Vec<usize>>(), 0.5, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_dataset() {
        let (train, val) = split_train_val(Vec::<usize>::new(), 0.8, 0);
        assert!(train.is_empty());
        assert!(val.is_empty());
    }

    #[test]
    fn test_parse_split_file() {
        let flags = parse_split("1\n2\n1\n1 \n").unwrap();
        assert_eq!(flags, vec![true, false, true, true]);
        let err = parse_split("1\n3\n").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_split_by_flags_keeps_order() {
        let (train, val) = split_by_flags(vec!['a', 'b', 'c', 'd'], &[true, false, true, false]).unwrap();
        assert_eq!(train, vec!['a', 'c']);
        assert_eq!(val,   vec!['b', 'd']);
        assert!(split_by_flags(vec![1, 2, 3], &[true]).is_err());
    }

    #[test]
    fn test_split_file_policy_reads_from_disk() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("split.txt");
        fs::write(&path, "2\n1\n").unwrap();
        let (train, val) = SplitPolicy::File(path).apply(vec![10, 20], 0).unwrap();
        assert_eq!(train, vec![20]);
        assert_eq!(val,   vec![10]);
    }
}
