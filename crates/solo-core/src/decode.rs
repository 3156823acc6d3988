//! Inference decoding: turns raw per-cell category logits and mask
//! probability stacks into a ranked candidate list.
//!
//! The stage is strictly linear: sigmoid + point NMS on the category maps,
//! score thresholding, stride-aware noise filtering, maskness weighting,
//! then a sort and truncation to `nms_pre`. Candidates continue on to
//! Matrix NMS; an image where nothing survives short-circuits to `None`.

use multiversion::multiversion;
use ndarray::{s, Array1, Array2, Array3, ArrayView2};

use crate::config::HeadConfig;
use crate::error::{HeadError, Result};

/// 2x2 local-maximum filter ("point NMS") over one category confidence map.
///
/// A cell survives iff it attains the maximum over itself and its up-left
/// 2x2 neighborhood `{(y-1,x-1), (y-1,x), (y,x-1), (y,x)}`; everything else
/// is zeroed. Ties survive on both cells, so plateaus are not thinned to a
/// single peak. Equivalent to a stride-1 2x2 max pool with edge padding
/// followed by an equality test; applied before thresholding, unrelated to
/// the later Matrix NMS.
#[must_use]
pub fn point_nms(heat: ArrayView2<'_, f32>) -> Array2<f32> {
    let (h, w) = heat.dim();
    let mut out = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut hmax = heat[[y, x]];
            if y > 0 {
                hmax = hmax.max(heat[[y - 1, x]]);
                if x > 0 {
                    hmax = hmax.max(heat[[y - 1, x - 1]]);
                }
            }
            if x > 0 {
                hmax = hmax.max(heat[[y, x - 1]]);
            }
            if heat[[y, x]] == hmax {
                out[[y, x]] = heat[[y, x]];
            }
        }
    }
    out
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Binarize one mask plane at `thr`, returning the foreground pixel count.
#[multiversion(targets(
    "x86_64+avx2+bmi1+bmi2+popcnt+lzcnt",
    "x86_64+avx512f+avx512bw+avx512dq+avx512vl",
    "aarch64+neon"
))]
fn binarize_plane(src: &[f32], dst: &mut [f32], thr: f32) -> f32 {
    let mut count = 0.0f32;
    for (d, &s) in dst.iter_mut().zip(src.iter()) {
        // Branchless: the comparison produces 0.0 or 1.0
        let keep = f32::from(u8::from(s > thr));
        *d = keep;
        count += keep;
    }
    count
}

/// Ranked inference candidates for one image, sorted by confidence
/// descending. Transient: consumed by Matrix NMS and result assembly,
/// never persisted.
pub struct CandidateSet {
    /// Soft mask probabilities, shape `(N, H, W)`.
    pub preds: Array3<f32>,
    /// Binarized masks (0.0 / 1.0), same shape. Stored as f32 so the
    /// pairwise intersection pass is a plain matrix product.
    pub masks: Array3<f32>,
    /// Foreground pixel count per binarized mask.
    pub sum_masks: Array1<f32>,
    /// Class id per candidate.
    pub labels: Vec<usize>,
    /// Combined class x maskness confidence per candidate.
    pub scores: Array1<f32>,
}

impl CandidateSet {
    /// Number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

fn validate_inputs(
    config: &HeadConfig,
    cate_preds: &[Array3<f32>],
    seg_preds: &[Array3<f32>],
) -> Result<(usize, usize)> {
    let num_levels = config.num_levels();
    if cate_preds.len() != num_levels || seg_preds.len() != num_levels {
        return Err(HeadError::LevelCountMismatch {
            expected: num_levels,
            actual: cate_preds.len().min(seg_preds.len()),
        });
    }
    let (_, h0, w0) = seg_preds[0].dim();
    for (level, (cate, seg)) in cate_preds.iter().zip(seg_preds).enumerate() {
        let grid = config.num_grids[level];
        let (c, sh, sw) = cate.dim();
        if sh != grid || sw != grid {
            return Err(HeadError::GridShapeMismatch {
                level,
                grid,
                got_h: sh,
                got_w: sw,
            });
        }
        if c != config.num_classes {
            return Err(HeadError::ClassCountMismatch {
                level,
                expected: config.num_classes,
                got: c,
            });
        }
        let (planes, h, w) = seg.dim();
        if planes != grid * grid {
            return Err(HeadError::MaskCountMismatch {
                level,
                expected: grid * grid,
                got: planes,
            });
        }
        if h != h0 || w != w0 {
            return Err(HeadError::MaskResolutionMismatch {
                level,
                expected_h: h0,
                expected_w: w0,
                got_h: h,
                got_w: w,
            });
        }
    }
    Ok((h0, w0))
}

/// Decode one image's raw head outputs into a ranked candidate list.
///
/// `cate_preds` holds one `(num_classes, S, S)` logit map per level,
/// finest level first; `seg_preds` one `(S*S, H, W)` stack of mask
/// probabilities per level, all levels sharing the spatial resolution
/// `(H, W)` (one quarter of the padded input). Returns `Ok(None)` when no
/// candidate survives thresholding, the explicit "no detections" signal.
pub fn decode_single(
    config: &HeadConfig,
    cate_preds: &[Array3<f32>],
    seg_preds: &[Array3<f32>],
) -> Result<Option<CandidateSet>> {
    let _span = tracing::info_span!("candidate_decode").entered();
    let (h, w) = validate_inputs(config, cate_preds, seg_preds)?;

    // Cumulative S^2 boundaries; a flattened cell index is mapped back to
    // its originating level (and stride) by locating it in this table.
    let mut boundaries = Vec::with_capacity(config.num_levels());
    let mut total = 0usize;
    for &grid in &config.num_grids {
        total += grid * grid;
        boundaries.push(total);
    }

    // Sigmoid + point NMS, then threshold into (flat cell, class, score).
    let mut raw: Vec<(usize, usize, f32)> = Vec::new();
    let mut offset = 0usize;
    for (level, cate) in cate_preds.iter().enumerate() {
        let grid = config.num_grids[level];
        for class in 0..config.num_classes {
            let peaks = point_nms(cate.slice(s![class, .., ..]).mapv(sigmoid).view());
            for ((i, j), &score) in peaks.indexed_iter() {
                if score > config.score_thr {
                    raw.push((offset + i * grid + j, class, score));
                }
            }
        }
        offset += grid * grid;
    }
    if raw.is_empty() {
        return Ok(None);
    }

    struct Scored {
        pred: Array2<f32>,
        mask: Array2<f32>,
        sum_mask: f32,
        label: usize,
        score: f32,
    }

    let mut scored: Vec<Scored> = Vec::with_capacity(raw.len());
    for (flat, class, cate_score) in raw {
        let level = boundaries.partition_point(|&b| b <= flat);
        let start = if level == 0 { 0 } else { boundaries[level - 1] };
        let stride = config.strides[level];

        let pred = seg_preds[level].slice(s![flat - start, .., ..]).to_owned();
        let mut mask = Array2::<f32>::zeros((h, w));
        let sum_mask = binarize_plane(
            pred.as_slice().expect("contiguous plane"),
            mask.as_slice_mut().expect("contiguous plane"),
            config.mask_thr,
        );
        // Masks not meaningfully larger than one stride cell are noise at
        // this level's resolution.
        if sum_mask <= stride as f32 {
            continue;
        }
        let maskness = (&pred * &mask).sum() / sum_mask;
        scored.push(Scored {
            pred,
            mask,
            sum_mask,
            label: class,
            score: cate_score * maskness,
        });
    }
    if scored.is_empty() {
        return Ok(None);
    }

    // Rank by combined confidence and keep the nms_pre strongest.
    let mut order: Vec<usize> = (0..scored.len()).collect();
    order.sort_unstable_by(|&a, &b| {
        scored[b]
            .score
            .partial_cmp(&scored[a].score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(config.nms_pre);

    let n = order.len();
    let mut preds = Array3::<f32>::zeros((n, h, w));
    let mut masks = Array3::<f32>::zeros((n, h, w));
    let mut sum_masks = Array1::<f32>::zeros(n);
    let mut labels = Vec::with_capacity(n);
    let mut scores = Array1::<f32>::zeros(n);
    for (rank, &idx) in order.iter().enumerate() {
        let c = &scored[idx];
        preds.slice_mut(s![rank, .., ..]).assign(&c.pred);
        masks.slice_mut(s![rank, .., ..]).assign(&c.mask);
        sum_masks[rank] = c.sum_mask;
        labels.push(c.label);
        scores[rank] = c.score;
    }

    Ok(Some(CandidateSet {
        preds,
        masks,
        sum_masks,
        labels,
        scores,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_point_nms_isolated_peak_survives() {
        let heat = array![[0.1f32, 0.2, 0.1], [0.2, 0.9, 0.2], [0.1, 0.2, 0.1]];
        let out = point_nms(heat.view());
        assert_eq!(out[[1, 1]], 0.9);
        // The cell right of the peak is dominated by it.
        assert_eq!(out[[1, 2]], 0.0);
    }

    #[test]
    fn test_point_nms_plateau_ties_survive() {
        let heat = array![[0.5f32, 0.5], [0.5, 0.5]];
        let out = point_nms(heat.view());
        assert_eq!(out, heat);
    }

    #[test]
    fn test_point_nms_compares_up_left_window() {
        // A larger value below-right does not suppress (0,0); only the
        // up-left neighborhood counts.
        let heat = array![[0.4f32, 0.1], [0.1, 0.9]];
        let out = point_nms(heat.view());
        assert_eq!(out[[0, 0]], 0.4);
        assert_eq!(out[[1, 1]], 0.9);
    }

    fn small_config() -> HeadConfig {
        HeadConfig::builder()
            .num_classes(2)
            .strides(&[4])
            .scale_ranges(&[(1.0, 256.0)])
            .num_grids(&[3])
            .score_thr(0.3)
            .mask_thr(0.5)
            .build()
            .unwrap()
    }

    /// Logit producing roughly the given post-sigmoid probability.
    fn logit(p: f32) -> f32 {
        (p / (1.0 - p)).ln()
    }

    fn synthetic_inputs(peak_prob: f32, mask_side: usize) -> (Vec<Array3<f32>>, Vec<Array3<f32>>) {
        let mut cate = Array3::<f32>::from_elem((2, 3, 3), -10.0);
        cate[[1, 1, 1]] = logit(peak_prob);
        let mut seg = Array3::<f32>::zeros((9, 16, 16));
        seg.slice_mut(s![4usize, ..mask_side, ..mask_side]).fill(0.9);
        (vec![cate], vec![seg])
    }

    #[test]
    fn test_decode_single_candidate() {
        let config = small_config();
        let (cate, seg) = synthetic_inputs(0.8, 8);
        let cands = decode_single(&config, &cate, &seg).unwrap().unwrap();
        assert_eq!(cands.len(), 1);
        assert_eq!(cands.labels[0], 1);
        assert_relative_eq!(cands.sum_masks[0], 64.0);
        // maskness = 0.9 over a uniformly 0.9 foreground
        assert_relative_eq!(cands.scores[0], 0.8 * 0.9, epsilon = 1e-3);
    }

    #[test]
    fn test_decode_below_score_thr_empty() {
        let config = small_config();
        let (cate, seg) = synthetic_inputs(0.2, 8);
        assert!(decode_single(&config, &cate, &seg).unwrap().is_none());
    }

    #[test]
    fn test_decode_tiny_mask_filtered_by_stride() {
        let config = small_config();
        // 2x2 = 4 foreground pixels <= stride 4
        let (cate, seg) = synthetic_inputs(0.8, 2);
        assert!(decode_single(&config, &cate, &seg).unwrap().is_none());
    }

    #[test]
    fn test_decode_sorted_descending_and_truncated() {
        let mut config = small_config();
        config.nms_pre = 2;
        let mut cate = Array3::<f32>::from_elem((2, 3, 3), -10.0);
        // Three well-separated peaks with distinct scores.
        cate[[0, 0, 0]] = logit(0.5);
        cate[[0, 0, 2]] = logit(0.9);
        cate[[1, 2, 0]] = logit(0.7);
        let mut seg = Array3::<f32>::from_elem((9, 16, 16), 0.0);
        for cell in [0usize, 2, 6] {
            seg.slice_mut(s![cell, ..8, ..8]).fill(1.0);
        }
        let cands = decode_single(&config, &[cate], &[seg]).unwrap().unwrap();
        assert_eq!(cands.len(), 2);
        assert!(cands.scores[0] >= cands.scores[1]);
        assert_eq!(cands.labels[0], 0); // the 0.9 peak
        assert_eq!(cands.labels[1], 1); // the 0.7 peak
    }

    #[test]
    fn test_decode_level_count_mismatch_is_fatal() {
        let config = HeadConfig::builder()
            .num_classes(2)
            .strides(&[4, 8])
            .scale_ranges(&[(1.0, 96.0), (48.0, 192.0)])
            .num_grids(&[3, 2])
            .build()
            .unwrap();
        let (cate, seg) = synthetic_inputs(0.8, 8);
        let err = decode_single(&config, &cate, &seg);
        assert!(matches!(err, Err(HeadError::LevelCountMismatch { .. })));
    }
}
