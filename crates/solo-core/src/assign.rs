//! Grid label assignment: converts ground-truth instances into per-level
//! category grids, mask-label stacks and active-cell indicators.
//!
//! Each pyramid level owns an SxS grid over the padded input image. An
//! instance is routed to a level when the square root of its box area lies
//! inside that level's scale range, then activates a small rectangle of
//! cells around its mask's center of mass. The rectangle is the
//! intersection of a sigma-scaled box extent with the 3x3 neighborhood of
//! the center cell, clamped to the grid on each axis independently, so the
//! label stays sparse while quantization can never miss the center cell.

use ndarray::{s, Array2, Array3, ArrayView2};

use crate::config::{FeatureLevel, HeadConfig};
use crate::raster::{foreground_count, mass_center, rescale_mask};

/// An instance's rasterized mask must cover at least this many pixels at
/// image resolution to produce any label.
const MIN_MASK_AREA: usize = 10;

/// One ground-truth instance in original-image pixel coordinates.
#[derive(Clone, Copy, Debug)]
pub struct Instance<'a> {
    /// Bounding box `(x1, y1, x2, y2)`.
    pub bbox: [f32; 4],
    /// Foreground class id in `0..num_classes`.
    pub class_id: usize,
    /// Dense binary mask at image resolution (nonzero = foreground).
    pub mask: ArrayView2<'a, u8>,
}

impl Instance<'_> {
    /// Square root of the box area, the quantity scale ranges are defined
    /// over.
    #[must_use]
    pub fn sqrt_area(&self) -> f32 {
        let w = self.bbox[2] - self.bbox[0];
        let h = self.bbox[3] - self.bbox[1];
        (w * h).sqrt()
    }
}

/// Training targets for one pyramid level of one image.
pub struct GridLabels {
    /// SxS category grid; foreground cells hold the class id, the rest the
    /// background sentinel (`num_classes`).
    pub cate: Array2<i64>,
    /// Mask label per grid cell, shape `(S*S, feat_h, feat_w)`. The
    /// rescaled instance mask occupies the top-left corner of its plane;
    /// planes of inactive cells are all zero.
    pub masks: Array3<f32>,
    /// Flattened (row-major) indicator of which cells carry an instance.
    pub active: Vec<bool>,
}

impl GridLabels {
    /// All-background labels for a level with no assigned instances.
    #[must_use]
    pub fn background(level: &FeatureLevel, background_label: i64) -> Self {
        let s = level.num_grid;
        Self {
            cate: Array2::from_elem((s, s), background_label),
            masks: Array3::zeros((s * s, level.feat_h, level.feat_w)),
            active: vec![false; s * s],
        }
    }

    /// Number of active cells.
    #[must_use]
    pub fn num_active(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }
}

/// Floor a normalized coordinate into grid units.
fn grid_coord(pixel: f32, image_extent: usize, num_grid: usize) -> i64 {
    ((pixel / image_extent as f32) * num_grid as f32).floor() as i64
}

/// Assign ground-truth instances to the cells of a single pyramid level.
///
/// `upsampled` is the padded input size the grids are normalized against
/// (4x the finest feature map). Instances whose sqrt-area falls outside
/// `level.scale_range` or whose mask covers fewer than 10 pixels produce
/// nothing. When the activation rectangles of two instances overlap, the
/// later instance in iteration order overwrites the earlier one in the
/// shared cells; overlaps are not re-resolved.
#[must_use]
pub fn assign_level(
    config: &HeadConfig,
    level: &FeatureLevel,
    instances: &[Instance<'_>],
    upsampled: (usize, usize),
) -> GridLabels {
    let num_grid = level.num_grid;
    let (lower, upper) = level.scale_range;
    let mut labels = GridLabels::background(level, config.background_label());

    for inst in instances {
        let sqrt_area = inst.sqrt_area();
        if sqrt_area < lower || sqrt_area > upper {
            continue;
        }
        if foreground_count(inst.mask) < MIN_MASK_AREA {
            continue;
        }
        // Mass center of the mask, not the box center.
        let Some((center_h, center_w)) = mass_center(inst.mask) else {
            continue;
        };

        let half_w = 0.5 * (inst.bbox[2] - inst.bbox[0]) * config.sigma;
        let half_h = 0.5 * (inst.bbox[3] - inst.bbox[1]) * config.sigma;

        let coord_h = grid_coord(center_h, upsampled.0, num_grid);
        let coord_w = grid_coord(center_w, upsampled.1, num_grid);

        // Box-derived bounds, clamped to the grid on each axis.
        let top_box = grid_coord(center_h - half_h, upsampled.0, num_grid).max(0);
        let down_box = grid_coord(center_h + half_h, upsampled.0, num_grid).min(num_grid as i64 - 1);
        let left_box = grid_coord(center_w - half_w, upsampled.1, num_grid).max(0);
        let right_box = grid_coord(center_w + half_w, upsampled.1, num_grid).min(num_grid as i64 - 1);

        // Intersect with the 3x3 window around the center cell.
        let top = top_box.max(coord_h - 1) as usize;
        let down = down_box.min(coord_h + 1) as usize;
        let left = left_box.max(coord_w - 1) as usize;
        let right = right_box.min(coord_w + 1) as usize;

        labels
            .cate
            .slice_mut(s![top..=down, left..=right])
            .fill(inst.class_id as i64);

        let seg = rescale_mask(inst.mask, level.stride);
        let (seg_h, seg_w) = seg.dim();
        for i in top..=down {
            for j in left..=right {
                let cell = i * num_grid + j;
                labels
                    .masks
                    .slice_mut(s![cell, ..seg_h, ..seg_w])
                    .assign(&seg);
                labels.active[cell] = true;
            }
        }
    }
    labels
}

/// Assign one image's ground truth across all pyramid levels.
///
/// `levels` comes from [`HeadConfig::levels`]; the padded input size the
/// grids are normalized against is recovered as 4x the finest feature map.
#[must_use]
pub fn assign_image(
    config: &HeadConfig,
    levels: &[FeatureLevel],
    instances: &[Instance<'_>],
) -> Vec<GridLabels> {
    let _span = tracing::info_span!("grid_assign", instances = instances.len()).entered();
    let upsampled = (levels[0].feat_h * 4, levels[0].feat_w * 4);
    levels
        .iter()
        .map(|level| assign_level(config, level, instances, upsampled))
        .collect()
}

/// Flattened training targets for a whole batch, arranged the way the
/// external loss code consumes them.
pub struct BatchTargets {
    /// Category label per grid cell: levels outermost, images within a
    /// level, row-major cells within an image.
    pub cate_labels: Vec<i64>,
    /// Per level: mask-label planes of the active cells, images
    /// concatenated in order.
    pub mask_targets: Vec<Vec<Array2<f32>>>,
    /// Per level, per image: flattened cell indices that are active, for
    /// gathering the matching mask predictions.
    pub active_indices: Vec<Vec<Vec<usize>>>,
    /// Total number of active (positive) cells in the batch.
    pub num_pos: usize,
    /// Averaging denominator with additive smoothing, `num_pos + 1`, so a
    /// batch with no positives never divides by zero.
    pub avg_factor: f32,
}

/// Gather per-image, per-level labels into batch-flat tensors.
#[must_use]
pub fn gather_targets(per_image: &[Vec<GridLabels>]) -> BatchTargets {
    let num_levels = per_image.first().map_or(0, Vec::len);
    let mut cate_labels = Vec::new();
    let mut mask_targets = Vec::with_capacity(num_levels);
    let mut active_indices = Vec::with_capacity(num_levels);
    let mut num_pos = 0usize;

    for level in 0..num_levels {
        let mut level_masks = Vec::new();
        let mut level_indices = Vec::with_capacity(per_image.len());
        for labels in per_image {
            let labels = &labels[level];
            cate_labels.extend(labels.cate.iter().copied());
            let mut indices = Vec::new();
            for (cell, &active) in labels.active.iter().enumerate() {
                if active {
                    indices.push(cell);
                    level_masks.push(labels.masks.slice(s![cell, .., ..]).to_owned());
                }
            }
            num_pos += indices.len();
            level_indices.push(indices);
        }
        mask_targets.push(level_masks);
        active_indices.push(level_indices);
    }

    BatchTargets {
        cate_labels,
        mask_targets,
        active_indices,
        num_pos,
        avg_factor: num_pos as f32 + 1.0,
    }
}
