//! Synthetic scenes and head activations for tests and benchmarks.
//!
//! Nothing here is part of the stable API; it exists so integration tests
//! and benches can build inputs without depending on a real network.

use ndarray::{s, Array1, Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::assign::Instance;
use crate::config::HeadConfig;

/// An owned ground-truth instance; [`Instance`] borrows from it.
pub struct SceneInstance {
    pub bbox: [f32; 4],
    pub class_id: usize,
    pub mask: Array2<u8>,
}

impl SceneInstance {
    pub fn as_instance(&self) -> Instance<'_> {
        Instance {
            bbox: self.bbox,
            class_id: self.class_id,
            mask: self.mask.view(),
        }
    }
}

/// A solid axis-aligned rectangle at full image resolution, with a bbox
/// matching its extent exactly.
pub fn solid_rect(
    img_size: (usize, usize),
    y0: usize,
    x0: usize,
    h: usize,
    w: usize,
    class_id: usize,
) -> SceneInstance {
    let mut mask = Array2::<u8>::zeros(img_size);
    mask.slice_mut(s![y0..y0 + h, x0..x0 + w]).fill(1);
    SceneInstance {
        bbox: [x0 as f32, y0 as f32, (x0 + w) as f32, (y0 + h) as f32],
        class_id,
        mask,
    }
}

/// Fabricate raw head outputs that decode back to the given instances.
///
/// Every instance is planted at `level`: a strong category logit at its
/// mass-center cell and a soft mask (probability 0.9) covering its
/// rectangle at the shared quarter resolution. All other logits are noise
/// far below any plausible score threshold, so point NMS and score
/// filtering leave exactly the planted peaks.
///
/// `featmap_sizes[0] * 4` defines the padded image size; instances must be
/// drawn at that resolution.
pub fn synthetic_activations(
    config: &HeadConfig,
    featmap_sizes: &[(usize, usize)],
    instances: &[&SceneInstance],
    level: usize,
    seed: u64,
) -> (Vec<Array3<f32>>, Vec<Array3<f32>>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let (seg_h, seg_w) = featmap_sizes[0];
    let (pad_h, pad_w) = (seg_h * 4, seg_w * 4);

    let mut cate_preds = Vec::with_capacity(config.num_levels());
    let mut seg_preds = Vec::with_capacity(config.num_levels());
    for &num_grid in &config.num_grids {
        let cate = Array3::from_shape_fn((config.num_classes, num_grid, num_grid), |_| {
            rng.gen_range(-12.0..-10.0_f32)
        });
        cate_preds.push(cate);
        seg_preds.push(Array3::<f32>::zeros((num_grid * num_grid, seg_h, seg_w)));
    }

    let num_grid = config.num_grids[level];
    for instance in instances {
        let [x0, y0, x1, y1] = instance.bbox;
        let cy = (y0 + y1) / 2.0;
        let cx = (x0 + x1) / 2.0;
        let cell_y = ((cy / pad_h as f32 * num_grid as f32) as usize).min(num_grid - 1);
        let cell_x = ((cx / pad_w as f32 * num_grid as f32) as usize).min(num_grid - 1);
        cate_preds[level][[instance.class_id, cell_y, cell_x]] = 6.0;

        let plane = cell_y * num_grid + cell_x;
        let qy0 = y0 as usize / 4;
        let qx0 = x0 as usize / 4;
        let qy1 = ((y1 as usize + 3) / 4).min(seg_h);
        let qx1 = ((x1 as usize + 3) / 4).min(seg_w);
        seg_preds[level]
            .slice_mut(s![plane, qy0..qy1, qx0..qx1])
            .fill(0.9);
    }
    (cate_preds, seg_preds)
}

/// Random candidate batch for exercising Matrix NMS in isolation: `n`
/// random solid rectangles on an `h` by `w` canvas with random classes
/// drawn from `num_classes` and scores in `(0, 1)`.
pub fn random_candidates(
    n: usize,
    h: usize,
    w: usize,
    num_classes: usize,
    seed: u64,
) -> (Array3<f32>, Vec<usize>, Array1<f32>, Array1<f32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut masks = Array3::<f32>::zeros((n, h, w));
    let mut labels = Vec::with_capacity(n);
    let mut scores = Array1::<f32>::zeros(n);
    let mut sum_masks = Array1::<f32>::zeros(n);
    for i in 0..n {
        let y0 = rng.gen_range(0..h / 2);
        let x0 = rng.gen_range(0..w / 2);
        let rh = rng.gen_range(1..=h - y0);
        let rw = rng.gen_range(1..=w - x0);
        masks
            .slice_mut(s![i, y0..y0 + rh, x0..x0 + rw])
            .fill(1.0);
        labels.push(rng.gen_range(0..num_classes));
        scores[i] = rng.gen_range(0.01..1.0_f32);
        sum_masks[i] = (rh * rw) as f32;
    }
    // Matrix NMS expects score-descending order.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap());
    let masks = masks.select(ndarray::Axis(0), &order);
    let labels: Vec<usize> = order.iter().map(|&i| labels[i]).collect();
    let sum_masks = sum_masks.select(ndarray::Axis(0), &order);
    let scores = scores.select(ndarray::Axis(0), &order);
    (masks, labels, scores, sum_masks)
}
