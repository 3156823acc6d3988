//! Mask rasterization: rescaling dense binary masks between image and
//! feature resolutions, plus the mass-center measurement the assigner keys
//! cells on. All functions are pure.

use ndarray::{Array2, ArrayView2};

/// Bilinear resize with half-pixel sampling (`align_corners = false`).
///
/// Source coordinates outside the image are clamped to the border, so a
/// constant input yields a constant output at any target size.
#[must_use]
pub fn resize_bilinear(src: ArrayView2<'_, f32>, out_h: usize, out_w: usize) -> Array2<f32> {
    let (in_h, in_w) = src.dim();
    assert!(in_h > 0 && in_w > 0, "cannot resize an empty mask");
    let mut out = Array2::<f32>::zeros((out_h, out_w));
    let scale_h = in_h as f32 / out_h as f32;
    let scale_w = in_w as f32 / out_w as f32;

    for ((y, x), val) in out.indexed_iter_mut() {
        let y_in = ((y as f32 + 0.5) * scale_h - 0.5).clamp(0.0, (in_h - 1) as f32);
        let x_in = ((x as f32 + 0.5) * scale_w - 0.5).clamp(0.0, (in_w - 1) as f32);
        let y0 = y_in.floor() as usize;
        let x0 = x_in.floor() as usize;
        let y1 = (y0 + 1).min(in_h - 1);
        let x1 = (x0 + 1).min(in_w - 1);
        let dy = y_in - y0 as f32;
        let dx = x_in - x0 as f32;

        let f00 = src[[y0, x0]];
        let f01 = src[[y0, x1]];
        let f10 = src[[y1, x0]];
        let f11 = src[[y1, x1]];
        *val = (1.0 - dx) * (1.0 - dy) * f00
            + dx * (1.0 - dy) * f01
            + (1.0 - dx) * dy * f10
            + dx * dy * f11;
    }
    out
}

/// Downsample a binary mask at image resolution to the mask-branch
/// resolution of a pyramid level.
///
/// The mask branch predicts at `stride / 2`, so the output is the input
/// scaled by `2 / stride` with round-half-up output dimensions (minimum 1).
/// Output values are soft in `[0, 1]` where the resampling straddles the
/// mask boundary.
#[must_use]
pub fn rescale_mask(mask: ArrayView2<'_, u8>, stride: usize) -> Array2<f32> {
    let scale = 2.0 / stride as f32;
    let (h, w) = mask.dim();
    let out_h = ((h as f32 * scale) + 0.5).max(1.0) as usize;
    let out_w = ((w as f32 * scale) + 0.5).max(1.0) as usize;
    let dense = mask.mapv(|v| if v != 0 { 1.0f32 } else { 0.0 });
    resize_bilinear(dense.view(), out_h, out_w)
}

/// Number of foreground pixels in a binary mask.
#[must_use]
pub fn foreground_count(mask: ArrayView2<'_, u8>) -> usize {
    mask.iter().filter(|&&v| v != 0).count()
}

/// Center of mass of the foreground, `(center_y, center_x)` in pixel
/// coordinates. `None` when the mask has no foreground.
#[must_use]
pub fn mass_center(mask: ArrayView2<'_, u8>) -> Option<(f32, f32)> {
    let mut sum_y = 0.0f64;
    let mut sum_x = 0.0f64;
    let mut count = 0u64;
    for ((y, x), &v) in mask.indexed_iter() {
        if v != 0 {
            sum_y += y as f64;
            sum_x += x as f64;
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    Some(((sum_y / count as f64) as f32, (sum_x / count as f64) as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_resize_constant_stays_constant() {
        let src = Array2::<f32>::from_elem((7, 5), 0.25);
        let out = resize_bilinear(src.view(), 13, 29);
        assert_eq!(out.dim(), (13, 29));
        for &v in out.iter() {
            assert_relative_eq!(v, 0.25, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_resize_identity() {
        let src = array![[0.0f32, 1.0], [2.0, 3.0]];
        let out = resize_bilinear(src.view(), 2, 2);
        assert_eq!(out, src);
    }

    #[test]
    fn test_rescale_dimensions_round_half_up() {
        // 100x60 at stride 8 -> scale 1/4 -> 25x15
        let mask = Array2::<u8>::ones((100, 60));
        let out = rescale_mask(mask.view(), 8);
        assert_eq!(out.dim(), (25, 15));

        // 10x10 at stride 8 -> 10/4 + 0.5 = 3
        let mask = Array2::<u8>::ones((10, 10));
        let out = rescale_mask(mask.view(), 8);
        assert_eq!(out.dim(), (3, 3));
    }

    #[test]
    fn test_rescale_solid_mask_stays_solid() {
        let mask = Array2::<u8>::ones((32, 32));
        let out = rescale_mask(mask.view(), 8);
        for &v in out.iter() {
            assert_relative_eq!(v, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_mass_center_solid_square() {
        let mut mask = Array2::<u8>::zeros((20, 20));
        mask.slice_mut(ndarray::s![5..15, 5..15]).fill(1);
        let (cy, cx) = mass_center(mask.view()).unwrap();
        assert_relative_eq!(cy, 9.5, epsilon = 1e-5);
        assert_relative_eq!(cx, 9.5, epsilon = 1e-5);
    }

    #[test]
    fn test_mass_center_empty_is_none() {
        let mask = Array2::<u8>::zeros((8, 8));
        assert!(mass_center(mask.view()).is_none());
    }

    #[test]
    fn test_foreground_count() {
        let mut mask = Array2::<u8>::zeros((4, 4));
        mask[[0, 0]] = 1;
        mask[[3, 3]] = 255;
        assert_eq!(foreground_count(mask.view()), 2);
    }
}
