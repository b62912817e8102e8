// ============================================================
// Layer 5 — Evaluator
// ============================================================
// Loads a trained network and runs it over a dataset:
//
//   1. rebuild the network from checkpoint.json, refuse a
//      checkpoint of another architecture
//   2. load model_best (or the latest epoch) into it
//   3. per sample: forward pass, optional swapped-input pass,
//      EPE against groundtruth where it exists
//   4. write {stem}_flow, {stem}_gt and {stem}_backward as
//      .flo + colour PNG
//
// Frames are edge-padded up to a multiple of the pyramid factor
// for the forward pass; predictions are cut back to the original
// frame before scoring and saving, so every groundtruth pixel is
// scored. Samples without groundtruth are written but not scored.

use std::path::Path;

use anyhow::{Context, Result};
use burn::{data::dataloader::DataLoaderBuilder, prelude::*};
use serde::Serialize;

use crate::data::{
    augment::Augmentation,
    batcher::{BatchResult, FlowBatcher},
    dataset::{FlowDataset, FlowItem},
};
use crate::domain::{
    architecture::Architecture,
    error::{FlowError, FlowResult},
    flow_field::{EpeStats, FlowField},
    traits::SamplePaths,
};
use crate::infra::{
    checkpoint::{CheckpointManager, CheckpointMeta},
    flow_store::FlowStore,
};
use crate::ml::network::FlowNet;

/// Split a [N, 2, H, W] flow tensor into host-side fields.
pub fn flow_fields<B: Backend>(flow: Tensor<B, 4>) -> FlowResult<Vec<FlowField>> {
    let [n, c, h, w] = flow.dims();
    if c != 2 {
        return Err(FlowError::ShapeMismatch(format!("flow tensor has {c} channels, expected 2")));
    }
    let values = flow
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| FlowError::ShapeMismatch(format!("cannot read flow tensor: {e:?}")))?;
    values
        .chunks_exact(2 * h * w)
        .take(n)
        .map(|chunk| FlowField::new(h, w, chunk.to_vec()))
        .collect()
}

/// EPE of every prediction that has groundtruth.
pub fn batch_epe(predictions: &[FlowField], ground_truth: &[Option<FlowField>]) -> FlowResult<EpeStats> {
    let mut stats = EpeStats::default();
    for (pred, gt) in predictions.iter().zip(ground_truth) {
        if let Some(gt) = gt {
            stats.merge(pred.endpoint_error(gt)?);
        }
    }
    Ok(stats)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// Mean over all valid groundtruth pixels of all scored samples
    pub mean_epe:      Option<f64>,
    pub samples:       usize,
    pub evaluated:     usize,
    /// Samples without groundtruth
    pub skipped:       usize,
    /// Valid groundtruth pixels behind `mean_epe`
    pub scored_pixels: usize,
}

pub struct Evaluator<B: Backend> {
    model:  FlowNet<B>,
    meta:   CheckpointMeta,
    device: B::Device,
}

impl<B: Backend> Evaluator<B> {
    /// `requested` is the architecture the caller expects, if any.
    pub fn from_checkpoint(
        checkpoint: &Path,
        requested:  Option<Architecture>,
        device:     &B::Device,
    ) -> Result<Self> {
        let (manager, weights) = CheckpointManager::locate(checkpoint)?;
        let meta = manager.load_meta()?;
        if let Some(arch) = requested {
            meta.ensure_arch(arch)?;
        }
        meta.network.validate()?;

        let model = manager.load_model(meta.network.init::<B>(device), &weights, device)?;
        tracing::info!(
            "Loaded {} network from '{}' (epoch {})",
            meta.arch, weights.display(), meta.epoch
        );
        Ok(Self { model, meta, device: device.clone() })
    }

    pub fn evaluate(
        &self,
        samples:       Vec<SamplePaths>,
        output_dir:    &Path,
        bidirectional: bool,
        workers:       usize,
    ) -> Result<EvaluationReport> {
        if bidirectional != self.meta.bidirectional {
            tracing::warn!(
                "Checkpoint was trained with bidirectional={} but evaluation runs with bidirectional={}",
                self.meta.bidirectional, bidirectional
            );
        }
        let store   = FlowStore::new(output_dir)?;
        let dataset = FlowDataset::new(
            samples,
            Augmentation::Eval { factor: self.meta.network.factor() },
            0,
        );
        let names: Vec<String> = (0..dataset.sample_count())
            .map(|i| dataset.paths(i).map(SamplePaths::stem).unwrap_or_else(|| format!("{i:05}")))
            .collect();

        let loader = DataLoaderBuilder::<B, FlowItem, BatchResult<B>>::new(FlowBatcher::new())
            .batch_size(1)
            .num_workers(workers.max(1))
            .set_device(self.device.clone())
            .build(dataset);

        let mut report = EvaluationReport::default();
        let mut epe    = EpeStats::default();

        for batch in loader.iter() {
            let batch = batch.map_err(FlowError::from)?;
            self.model.check_input(batch.reference.dims())?;
            let (forward, backward) =
                self.model
                    .forward_pair(batch.reference.clone(), batch.target.clone(), bidirectional);
            let predicted = flow_fields(forward[0].clone())?;
            let backward  = backward.map(|bw| flow_fields(bw[0].clone())).transpose()?;

            for (i, pred) in predicted.iter().enumerate() {
                let index  = batch.indices[i];
                let name   = names.get(index).cloned().unwrap_or_else(|| format!("{index:05}"));
                let (h, w) = batch.frame_sizes[i];
                report.samples += 1;

                // drop the evaluation padding
                let pred = pred.crop(0, 0, h, w)?;
                store.save(&name, "flow", &pred)?;
                if let Some(bw) = backward.as_ref().and_then(|b| b.get(i)) {
                    store.save(&name, "backward", &bw.crop(0, 0, h, w)?)?;
                }
                match &batch.ground_truth[i] {
                    Some(gt) => {
                        let gt    = gt.crop(0, 0, h, w)?;
                        let stats = pred
                            .endpoint_error(&gt)
                            .with_context(|| format!("Sample '{name}'"))?;
                        tracing::debug!("{}: EPE {:?}", name, stats.mean());
                        epe.merge(stats);
                        store.save(&name, "gt", &gt)?;
                        report.evaluated += 1;
                    }
                    None => report.skipped += 1,
                }
            }
        }

        report.mean_epe      = epe.mean();
        report.scored_pixels = epe.valid_pixels;
        match report.mean_epe {
            Some(mean) => tracing::info!(
                "Mean EPE {:.4} over {} samples ({} without groundtruth)",
                mean, report.evaluated, report.skipped
            ),
            None => tracing::info!("{} samples written, none had groundtruth", report.samples),
        }
        Ok(report)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::flow_store::{read_flo, write_flo};
    use crate::ml::network::FlowNetConfig;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    type TB = NdArray<f32>;

    #[test]
    fn test_flow_fields_splits_batch_planar() {
        let device = Default::default();
        let values: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let t = Tensor::<TB, 4>::from_data(TensorData::new(values, [2, 2, 2, 2]), &device);
        let fields = flow_fields(t).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].dx(0, 0), 8.0);
        assert_eq!(fields[1].dy(1, 1), 15.0);
    }

    #[test]
    fn test_perfect_prediction_has_zero_epe() {
        let gt    = FlowField::constant(4, 4, 1.5, -2.0);
        let stats = batch_epe(&[gt.clone()], &[Some(gt)]).unwrap();
        assert_eq!(stats.mean(), Some(0.0));
        let none = batch_epe(&[FlowField::zeros(4, 4)], &[None]).unwrap();
        assert_eq!(none.mean(), None);
    }

    fn write_png(path: &Path, size: u32, shade: u8) {
        RgbImage::from_pixel(size, size, Rgb([shade, shade, shade])).save(path).unwrap();
    }

    fn checkpoint(dir: &Path, arch: Architecture) -> CheckpointMeta {
        let manager = CheckpointManager::new(dir).unwrap();
        let network = FlowNetConfig::new(arch).with_levels(2).with_base_channels(2);
        let meta = CheckpointMeta {
            arch,
            network: network.clone(),
            epoch: 1,
            interrupted: false,
            bidirectional: false,
            best_epe: None,
            best_epoch: None,
        };
        let model: FlowNet<TB> = network.init(&Default::default());
        manager.save_model(&model, &manager.model_path(1)).unwrap();
        manager.save_meta(&meta).unwrap();
        meta
    }

    #[test]
    fn test_mismatched_architecture_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        checkpoint(dir.path(), Architecture::FlowNetS);
        let err = Evaluator::<TB>::from_checkpoint(dir.path(), Some(Architecture::PwcNet), &Default::default())
            .err()
            .unwrap();
        let flow_err = err.downcast_ref::<FlowError>().unwrap();
        assert!(flow_err.is_config());
    }

    #[test]
    fn test_evaluate_writes_predictions_and_counts_skipped() {
        let ckpt = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let out  = tempfile::tempdir().unwrap();
        checkpoint(ckpt.path(), Architecture::FlowNetS);

        for name in ["a", "b", "c", "d"] {
            write_png(&data.path().join(format!("{name}.png")), 8, 100);
        }
        let gt_path = data.path().join("a_gt.flo");
        write_flo(&gt_path, &FlowField::zeros(8, 8)).unwrap();
        let samples = vec![
            SamplePaths::new(data.path().join("a.png"), data.path().join("b.png"), Some(gt_path)),
            SamplePaths::new(data.path().join("c.png"), data.path().join("d.png"), None),
        ];

        let evaluator = Evaluator::<TB>::from_checkpoint(ckpt.path(), None, &Default::default()).unwrap();
        let report    = evaluator.evaluate(samples, out.path(), true, 1).unwrap();

        assert_eq!(report.samples, 2);
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.mean_epe.unwrap().is_finite());
        assert_eq!(report.scored_pixels, 64);
        let pred = read_flo(&out.path().join("a_flow.flo")).unwrap();
        assert_eq!((pred.height, pred.width), (8, 8));
        assert!(out.path().join("a_gt.png").is_file());
        assert!(out.path().join("c_backward.flo").is_file());
        assert!(!out.path().join("c_gt.flo").exists());
    }

    #[test]
    fn test_frames_off_the_pyramid_grid_are_scored_in_full() {
        let ckpt = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let out  = tempfile::tempdir().unwrap();
        checkpoint(ckpt.path(), Architecture::FlowNetS);

        // 10x10 is not a multiple of 4; the 2-pixel border must still count
        write_png(&data.path().join("a.png"), 10, 80);
        write_png(&data.path().join("b.png"), 10, 90);
        let gt_path = data.path().join("a_gt.flo");
        write_flo(&gt_path, &FlowField::constant(10, 10, 0.5, 0.0)).unwrap();
        let samples = vec![SamplePaths::new(
            data.path().join("a.png"),
            data.path().join("b.png"),
            Some(gt_path),
        )];

        let evaluator = Evaluator::<TB>::from_checkpoint(ckpt.path(), None, &Default::default()).unwrap();
        let report    = evaluator.evaluate(samples, out.path(), false, 1).unwrap();

        assert_eq!(report.evaluated, 1);
        assert_eq!(report.scored_pixels, 100);
        let pred = read_flo(&out.path().join("a_flow.flo")).unwrap();
        assert_eq!((pred.height, pred.width), (10, 10));
        let gt = read_flo(&out.path().join("a_gt.flo")).unwrap();
        assert_eq!(gt.dx(9, 9), 0.5);
    }
}
