//! Run-length encoding boundary for mask persistence and exchange.
//!
//! The pipeline itself operates exclusively on dense boolean grids; this
//! module is the single encode/decode pair at the serialization boundary.
//! Runs are counted in column-major (Fortran) order starting from a
//! background run, the layout COCO-style tooling expects.

use ndarray::{Array2, ArrayView2};

/// A run-length encoded binary mask.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rle {
    /// Mask height.
    pub h: usize,
    /// Mask width.
    pub w: usize,
    /// Alternating background/foreground run lengths, column-major.
    pub counts: Vec<u32>,
}

impl Rle {
    /// Foreground pixel count: the sum of the odd-indexed runs.
    #[must_use]
    pub fn area(&self) -> u64 {
        self.counts
            .iter()
            .skip(1)
            .step_by(2)
            .map(|&c| u64::from(c))
            .sum()
    }
}

/// Encode a dense binary mask.
#[must_use]
pub fn encode(mask: ArrayView2<'_, bool>) -> Rle {
    let (h, w) = mask.dim();
    let mut counts = Vec::new();
    let mut prev = false;
    let mut run = 0u32;
    for x in 0..w {
        for y in 0..h {
            let v = mask[[y, x]];
            if v != prev {
                counts.push(run);
                run = 0;
                prev = v;
            }
            run += 1;
        }
    }
    counts.push(run);
    Rle { h, w, counts }
}

/// Decode back to a dense binary mask. Runs beyond `h * w` are clipped.
#[must_use]
pub fn decode(rle: &Rle) -> Array2<bool> {
    let mut mask = Array2::<bool>::from_elem((rle.h, rle.w), false);
    let n = rle.h * rle.w;
    let mut idx = 0usize;
    let mut value = false;
    for &count in &rle.counts {
        let end = (idx + count as usize).min(n);
        if value {
            for k in idx..end {
                mask[[k % rle.h, k / rle.h]] = true;
            }
        }
        idx = end;
        value = !value;
    }
    mask
}
