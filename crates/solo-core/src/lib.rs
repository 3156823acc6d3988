//! Core algorithms of an anchor-free, grid-based instance segmentation
//! head (the SOLO family): training-target assignment and inference
//! decoding, without the network itself.
//!
//! # Architecture Overview
//!
//! The pipeline is two independent data paths over externally produced
//! feature maps:
//!
//! 1. **Training targets** ([`assign`]):
//!    - Scale-range routing of ground-truth instances to pyramid levels.
//!    - Mass-center cell selection with sigma-scaled activation rectangles.
//!    - Mask rasterization to the mask-branch resolution ([`raster`]).
//!    - Batch gathering with a division-safe averaging denominator.
//!
//! 2. **Inference decode** ([`decode`] -> [`nms`] -> [`assemble`]):
//!    - Point NMS peak filtering and score thresholding.
//!    - Maskness-weighted candidate ranking.
//!    - Matrix NMS: one batched pairwise-IoU pass, analytic soft decay.
//!    - Upsampling, cropping and per-class result packaging.
//!
//! Both paths are data-parallel across images (rayon) with no shared
//! mutable state; [`HeadConfig`] is read-only for the lifetime of a batch.
//! The loss scalars, the convolutional branches and everything upstream of
//! the raw activation maps live outside this crate.
//!
//! # Example
//!
//! ```
//! use solo_core::{HeadConfig, SoloHead};
//!
//! let config = HeadConfig::builder()
//!     .num_classes(3)
//!     .strides(&[8])
//!     .scale_ranges(&[(1.0, 96.0)])
//!     .num_grids(&[4])
//!     .build()
//!     .unwrap();
//! let head = SoloHead::new(config).unwrap();
//! assert_eq!(head.config().num_levels(), 1);
//! ```

/// Final thresholding, upsampling and per-class packaging.
pub mod assemble;
/// Ground-truth to grid-cell label assignment.
pub mod assign;
/// Pipeline configuration (immutable after construction).
pub mod config;
/// Raw activation maps to ranked candidates.
pub mod decode;
/// Fatal precondition errors.
pub mod error;
/// Matrix NMS soft suppression.
pub mod nms;
/// Mask rescaling and mass-center measurement.
pub mod raster;
/// Run-length-encoded mask serialization boundary.
pub mod rle;
/// Synthetic instances and activations for testing.
pub mod test_utils;

pub use crate::assemble::{Detections, ImageMeta};
pub use crate::assign::{BatchTargets, GridLabels, Instance};
pub use crate::config::{FeatureLevel, HeadConfig, NmsKernel};
pub use crate::decode::CandidateSet;
pub use crate::error::{HeadError, Result};

use ndarray::Array3;
use rayon::prelude::*;

/// Timing and count statistics for one decode call.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineStats {
    /// Time spent in candidate decoding (incl. point NMS) in milliseconds.
    pub decode_ms: f64,
    /// Time spent in Matrix NMS in milliseconds.
    pub nms_ms: f64,
    /// Time spent in result assembly in milliseconds.
    pub assemble_ms: f64,
    /// Total decode-path time in milliseconds.
    pub total_ms: f64,
    /// Number of candidates entering Matrix NMS.
    pub num_candidates: usize,
    /// Number of final instances.
    pub num_detections: usize,
}

/// One image's raw head outputs plus metadata, as consumed by
/// [`SoloHead::decode_batch`].
pub struct DecodeInput<'a> {
    /// Per-level `(num_classes, S, S)` category logit maps, finest first.
    pub cate_preds: &'a [Array3<f32>],
    /// Per-level `(S*S, H, W)` mask probability stacks at a shared
    /// resolution.
    pub seg_preds: &'a [Array3<f32>],
    /// Padding/resolution metadata for this image.
    pub meta: ImageMeta,
}

/// The head: label assignment for training, decoding for inference.
///
/// Holds only the validated, immutable configuration; every call is free
/// of shared mutable state, so images of a batch process concurrently.
pub struct SoloHead {
    config: HeadConfig,
}

impl SoloHead {
    /// Construct a head from a configuration, validating it first.
    /// Misconfiguration (inconsistent per-level settings, zero classes) is
    /// rejected here, before any per-image work can start.
    pub fn new(config: HeadConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The head's configuration.
    #[must_use]
    pub fn config(&self) -> &HeadConfig {
        &self.config
    }

    /// Compute per-level training targets for one image.
    ///
    /// `featmap_sizes` lists the mask-branch resolution `(h, w)` per level,
    /// finest first; a count mismatch with the configuration is fatal.
    pub fn targets_single(
        &self,
        instances: &[Instance<'_>],
        featmap_sizes: &[(usize, usize)],
    ) -> Result<Vec<GridLabels>> {
        let levels = self.config.levels(featmap_sizes)?;
        Ok(assign::assign_image(&self.config, &levels, instances))
    }

    /// Compute targets for a batch of images (in parallel) and gather them
    /// into the flat layout the external loss code consumes.
    pub fn targets_batch(
        &self,
        images: &[&[Instance<'_>]],
        featmap_sizes: &[(usize, usize)],
    ) -> Result<BatchTargets> {
        let levels = self.config.levels(featmap_sizes)?;
        let per_image: Vec<Vec<GridLabels>> = images
            .par_iter()
            .map(|instances| assign::assign_image(&self.config, &levels, instances))
            .collect();
        Ok(assign::gather_targets(&per_image))
    }

    /// Decode one image's raw outputs into final per-class detections.
    pub fn decode_single(
        &self,
        cate_preds: &[Array3<f32>],
        seg_preds: &[Array3<f32>],
        meta: &ImageMeta,
    ) -> Result<Detections> {
        self.decode_single_with_stats(cate_preds, seg_preds, meta)
            .map(|(detections, _)| detections)
    }

    /// Decode with per-stage timing statistics.
    pub fn decode_single_with_stats(
        &self,
        cate_preds: &[Array3<f32>],
        seg_preds: &[Array3<f32>],
        meta: &ImageMeta,
    ) -> Result<(Detections, PipelineStats)> {
        let mut stats = PipelineStats::default();
        let start_total = std::time::Instant::now();

        let start = std::time::Instant::now();
        let candidates = decode::decode_single(&self.config, cate_preds, seg_preds)?;
        stats.decode_ms = start.elapsed().as_secs_f64() * 1000.0;

        let Some(candidates) = candidates else {
            stats.total_ms = start_total.elapsed().as_secs_f64() * 1000.0;
            return Ok((Detections::empty(self.config.num_classes), stats));
        };
        stats.num_candidates = candidates.len();

        let start = std::time::Instant::now();
        let decayed = {
            let _span = tracing::info_span!("matrix_nms", n = candidates.len()).entered();
            nms::matrix_nms(
                candidates.masks.view(),
                &candidates.labels,
                candidates.scores.view(),
                self.config.kernel,
                self.config.nms_sigma,
                candidates.sum_masks.view(),
            )
        };
        stats.nms_ms = start.elapsed().as_secs_f64() * 1000.0;

        let start = std::time::Instant::now();
        let detections = assemble::assemble(&self.config, &candidates, decayed.view(), meta);
        stats.assemble_ms = start.elapsed().as_secs_f64() * 1000.0;

        stats.num_detections = detections.num_instances();
        stats.total_ms = start_total.elapsed().as_secs_f64() * 1000.0;
        Ok((detections, stats))
    }

    /// Decode a batch of images in parallel. Images never share state;
    /// one image collapsing to "no detections" does not affect the rest.
    pub fn decode_batch(&self, inputs: &[DecodeInput<'_>]) -> Result<Vec<Detections>> {
        inputs
            .par_iter()
            .map(|input| self.decode_single(input.cate_preds, input.seg_preds, &input.meta))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_rejects_invalid_config() {
        let mut config = HeadConfig::default();
        config.num_grids.pop();
        assert!(matches!(
            SoloHead::new(config),
            Err(HeadError::LevelConfigMismatch { .. })
        ));
    }

    #[test]
    fn test_targets_level_count_checked_first() {
        let head = SoloHead::new(HeadConfig::default()).unwrap();
        let err = head.targets_single(&[], &[(100, 152)]);
        assert!(matches!(err, Err(HeadError::LevelCountMismatch { .. })));
    }

    #[test]
    fn test_empty_image_yields_background_targets() {
        let config = HeadConfig::builder()
            .num_classes(2)
            .strides(&[8])
            .scale_ranges(&[(1.0, 96.0)])
            .num_grids(&[4])
            .build()
            .unwrap();
        let head = SoloHead::new(config).unwrap();
        let labels = head.targets_single(&[], &[(16, 16)]).unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].num_active(), 0);
    }
}
