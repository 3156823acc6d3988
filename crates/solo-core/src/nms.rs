//! Matrix NMS: vectorized, rank-aware soft suppression of overlapping
//! same-class mask candidates.
//!
//! Unlike greedy NMS, nothing is eliminated rank by rank. All pairwise
//! mask IoUs come out of a single matrix product over the flattened mask
//! stack, every lower-ranked candidate's score is decayed analytically by
//! the overlap with its higher-ranked same-class competitors, and the
//! penalty is re-normalized by the strongest overlap already attributed to
//! each competitor so two mutually-overlapping candidates do not punish
//! each other twice.

use ndarray::{Array1, Array2, ArrayView1, ArrayView3};

use crate::config::NmsKernel;

/// Decay the scores of a ranked candidate set.
///
/// `masks` is the `(N, H, W)` binarized stack (0.0/1.0), `sum_masks` the
/// per-mask foreground counts, both ordered by `scores` descending — the
/// ranking is what makes "higher-ranked" meaningful. Returns the decayed
/// scores in the same order; every output is at most its input, and a
/// candidate with no overlapping higher-ranked same-class competitor keeps
/// its score exactly.
#[must_use]
pub fn matrix_nms(
    masks: ArrayView3<'_, f32>,
    labels: &[usize],
    scores: ArrayView1<'_, f32>,
    kernel: NmsKernel,
    sigma: f32,
    sum_masks: ArrayView1<'_, f32>,
) -> Array1<f32> {
    let n = labels.len();
    if n == 0 {
        return Array1::zeros(0);
    }
    let (nm, h, w) = masks.dim();
    debug_assert_eq!(nm, n);
    debug_assert_eq!(scores.len(), n);
    debug_assert_eq!(sum_masks.len(), n);

    // One batched pass: pairwise intersections as a matrix product over
    // the flattened 0/1 masks, then IoU via the broadcast union.
    let flat = masks
        .into_shape((n, h * w))
        .expect("mask stack must be contiguous");
    let inter = flat.dot(&flat.t());

    // Upper-triangular same-class IoU: row i is the higher-ranked side.
    let mut iou = Array2::<f32>::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            if labels[i] == labels[j] {
                let union = sum_masks[i] + sum_masks[j] - inter[[i, j]];
                if union > 0.0 {
                    iou[[i, j]] = inter[[i, j]] / union;
                }
            }
        }
    }

    // compensate[i]: the strongest overlap candidate i itself suffered
    // from anything ranked above it (column max of the triu matrix).
    let mut compensate = vec![0.0f32; n];
    for i in 0..n {
        for j in (i + 1)..n {
            compensate[j] = compensate[j].max(iou[[i, j]]);
        }
    }

    let mut decayed = Array1::<f32>::zeros(n);
    for j in 0..n {
        let mut min_decay = 1.0f32;
        for i in 0..j {
            let overlap = iou[[i, j]];
            if overlap == 0.0 {
                // Different class, or disjoint masks: exempt from decay.
                continue;
            }
            let decay = match kernel {
                NmsKernel::Gaussian => {
                    (-(overlap * overlap - compensate[i] * compensate[i]) / sigma).exp()
                }
                NmsKernel::Linear => (1.0 - overlap) / (1.0 - compensate[i]),
            };
            min_decay = min_decay.min(decay);
        }
        decayed[j] = scores[j] * min_decay;
    }
    decayed
}
