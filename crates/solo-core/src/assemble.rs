//! Final result assembly: post-NMS thresholding, upsampling back to the
//! original image resolution, and packaging into per-class box and mask
//! lists.

use ndarray::{s, Array2, ArrayView1, ArrayView2};

use crate::config::HeadConfig;
use crate::decode::CandidateSet;
use crate::raster::resize_bilinear;

/// Per-image metadata the assembler needs to undo padding and resizing.
#[derive(Clone, Copy, Debug)]
pub struct ImageMeta {
    /// Valid (resized, unpadded) image region `(h, w)` inside the padded
    /// input.
    pub img_shape: (usize, usize),
    /// Original image resolution `(h, w)` the results are reported in.
    pub ori_shape: (usize, usize),
}

/// Final detections for one image: per-class lists, every class present,
/// possibly empty. This is the typed "no detections" representation; the
/// pipeline never yields a null.
pub struct Detections {
    /// `bboxes[c]` holds `(x1, y1, x2, y2, score)` per instance of class
    /// `c`, derived from the tight extent of the binary mask.
    pub bboxes: Vec<Vec<[f32; 5]>>,
    /// `masks[c]` holds one binary mask per instance of class `c`, at
    /// original image resolution.
    pub masks: Vec<Vec<Array2<bool>>>,
}

impl Detections {
    /// An empty well-typed result with one (empty) slot per class.
    #[must_use]
    pub fn empty(num_classes: usize) -> Self {
        Self {
            bboxes: vec![Vec::new(); num_classes],
            masks: vec![Vec::new(); num_classes],
        }
    }

    /// Total number of instances across classes.
    #[must_use]
    pub fn num_instances(&self) -> usize {
        self.bboxes.iter().map(Vec::len).sum()
    }
}

/// Tight bounding box of a binary mask: `(x1, y1, x2, y2)` with exclusive
/// upper bounds. An empty mask yields `(0, 0, 0, 0)`.
#[must_use]
pub fn extract_bbox(mask: ArrayView2<'_, bool>) -> [f32; 4] {
    let (h, w) = mask.dim();
    let mut x1 = w;
    let mut x2 = 0usize;
    let mut y1 = h;
    let mut y2 = 0usize;
    for ((y, x), &v) in mask.indexed_iter() {
        if v {
            x1 = x1.min(x);
            x2 = x2.max(x + 1);
            y1 = y1.min(y);
            y2 = y2.max(y + 1);
        }
    }
    if x2 == 0 {
        return [0.0, 0.0, 0.0, 0.0];
    }
    [x1 as f32, y1 as f32, x2 as f32, y2 as f32]
}

/// Assemble decayed candidates into per-class results.
///
/// Candidates below `update_thr` are dropped; survivors are re-ranked,
/// truncated to `max_per_img`, upsampled to the padded input (4x the mask
/// resolution), cropped to the valid image region, resampled to the
/// original resolution and re-binarized at `mask_thr`.
#[must_use]
pub fn assemble(
    config: &HeadConfig,
    candidates: &CandidateSet,
    decayed_scores: ArrayView1<'_, f32>,
    meta: &ImageMeta,
) -> Detections {
    let _span = tracing::info_span!("assemble").entered();
    let mut keep: Vec<usize> = (0..candidates.len())
        .filter(|&i| decayed_scores[i] >= config.update_thr)
        .collect();
    if keep.is_empty() {
        return Detections::empty(config.num_classes);
    }
    keep.sort_unstable_by(|&a, &b| {
        decayed_scores[b]
            .partial_cmp(&decayed_scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    keep.truncate(config.max_per_img);

    let (_, feat_h, feat_w) = candidates.preds.dim();
    let padded = (feat_h * 4, feat_w * 4);
    let (img_h, img_w) = meta.img_shape;
    let (ori_h, ori_w) = meta.ori_shape;

    let mut out = Detections::empty(config.num_classes);
    for &idx in &keep {
        let pred = candidates.preds.slice(s![idx, .., ..]);
        let upsampled = resize_bilinear(pred, padded.0, padded.1);
        let cropped = upsampled.slice(s![..img_h.min(padded.0), ..img_w.min(padded.1)]);
        let at_ori = resize_bilinear(cropped, ori_h, ori_w);
        let mask = at_ori.mapv(|v| v > config.mask_thr);

        let class = candidates.labels[idx];
        let bbox = extract_bbox(mask.view());
        out.bboxes[class].push([bbox[0], bbox[1], bbox[2], bbox[3], decayed_scores[idx]]);
        out.masks[class].push(mask);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array3};

    #[test]
    fn test_extract_bbox_tight() {
        let mut mask = Array2::<bool>::from_elem((10, 10), false);
        mask.slice_mut(s![3..7, 2..9]).fill(true);
        assert_eq!(extract_bbox(mask.view()), [2.0, 3.0, 9.0, 7.0]);
    }

    #[test]
    fn test_extract_bbox_empty_is_zero() {
        let mask = Array2::<bool>::from_elem((5, 5), false);
        assert_eq!(extract_bbox(mask.view()), [0.0, 0.0, 0.0, 0.0]);
    }

    fn one_candidate(score: f32) -> CandidateSet {
        let mut preds = Array3::<f32>::zeros((1, 8, 8));
        preds.slice_mut(s![0usize, 2..6, 2..6]).fill(0.95);
        let masks = preds.mapv(|v| f32::from(u8::from(v > 0.5)));
        CandidateSet {
            sum_masks: Array1::from_elem(1, 16.0),
            masks,
            preds,
            labels: vec![1],
            scores: Array1::from_elem(1, score),
        }
    }

    fn meta_32() -> ImageMeta {
        ImageMeta {
            img_shape: (32, 32),
            ori_shape: (32, 32),
        }
    }

    #[test]
    fn test_below_update_thr_yields_typed_empty() {
        let config = HeadConfig::builder().num_classes(3).build().unwrap();
        let cands = one_candidate(0.5);
        let decayed = Array1::from_elem(1, 0.01); // below update_thr 0.05
        let out = assemble(&config, &cands, decayed.view(), &meta_32());
        assert_eq!(out.num_instances(), 0);
        assert_eq!(out.bboxes.len(), 3);
        assert_eq!(out.masks.len(), 3);
    }

    #[test]
    fn test_single_instance_grouped_by_class() {
        let config = HeadConfig::builder().num_classes(3).build().unwrap();
        let cands = one_candidate(0.5);
        let decayed = Array1::from_elem(1, 0.5);
        let out = assemble(&config, &cands, decayed.view(), &meta_32());
        assert_eq!(out.bboxes[1].len(), 1);
        assert_eq!(out.masks[1].len(), 1);
        assert!(out.bboxes[0].is_empty() && out.bboxes[2].is_empty());

        // The 4x4 block at feature scale maps to roughly 16x16 at 4x.
        let [x1, y1, x2, y2, score] = out.bboxes[1][0];
        assert_eq!(score, 0.5);
        assert!(x2 > x1 && y2 > y1);
        assert_eq!(out.masks[1][0].dim(), (32, 32));
        let area: usize = out.masks[1][0].iter().filter(|&&v| v).count();
        assert!(area > 100 && area < 400, "area {area} out of range");
    }

    #[test]
    fn test_max_per_img_truncates() {
        let mut config = HeadConfig::builder().num_classes(2).build().unwrap();
        config.max_per_img = 1;
        let mut preds = Array3::<f32>::zeros((2, 8, 8));
        preds.slice_mut(s![0usize, 1..5, 1..5]).fill(0.9);
        preds.slice_mut(s![1usize, 3..7, 3..7]).fill(0.9);
        let masks = preds.mapv(|v| f32::from(u8::from(v > 0.5)));
        let cands = CandidateSet {
            sum_masks: Array1::from_elem(2, 16.0),
            masks,
            preds,
            labels: vec![0, 1],
            scores: Array1::from_vec(vec![0.9, 0.8]),
        };
        let decayed = Array1::from_vec(vec![0.3, 0.6]);
        let out = assemble(&config, &cands, decayed.view(), &meta_32());
        // Re-ranked on decayed scores: the class-1 candidate wins the slot.
        assert_eq!(out.num_instances(), 1);
        assert_eq!(out.bboxes[1].len(), 1);
    }
}
