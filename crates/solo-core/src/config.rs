//! Configuration types for the head pipeline.
//!
//! [`HeadConfig`] captures everything the assignment and decode stages need
//! and is immutable once built. Per-level vectors (strides, scale ranges,
//! grid sizes) must agree in length; [`HeadConfigBuilder::build`] validates
//! this and the NMS kernel before any per-image work can start.

use crate::error::{HeadError, Result};

/// Suppression kernel used by Matrix NMS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NmsKernel {
    /// Gaussian decay `exp(-(iou^2 - compensate^2) / sigma)`.
    /// Softer for moderate overlaps; converges to no suppression as
    /// `sigma -> inf`.
    Gaussian,
    /// Linear decay `(1 - iou) / (1 - compensate)`.
    Linear,
}

impl std::str::FromStr for NmsKernel {
    type Err = HeadError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gaussian" => Ok(NmsKernel::Gaussian),
            "linear" => Ok(NmsKernel::Linear),
            other => Err(HeadError::UnknownKernel(other.to_string())),
        }
    }
}

/// Pipeline-level configuration for the head.
///
/// These settings affect both training-target assignment and inference
/// decoding and are immutable after the head is constructed. Use the
/// builder for ergonomic construction; `build()` rejects inconsistent
/// per-level settings up front.
///
/// # Example
/// ```
/// use solo_core::config::HeadConfig;
///
/// let config = HeadConfig::builder()
///     .num_classes(80)
///     .score_thr(0.1)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeadConfig {
    /// Number of foreground classes. The background sentinel in category
    /// grids is `num_classes` itself.
    pub num_classes: usize,
    /// Feature stride per pyramid level, finest level first (default:
    /// 8, 8, 16, 32, 32).
    pub strides: Vec<usize>,
    /// Per-level sqrt-area band `(lower, upper)` routing instances to that
    /// level. Bounds are inclusive; adjacent bands may overlap, in which
    /// case an instance is assigned at every level whose band contains it.
    pub scale_ranges: Vec<(f32, f32)>,
    /// Grid size S per level; each level partitions the image into SxS
    /// localization cells (default: 40, 36, 24, 16, 12).
    pub num_grids: Vec<usize>,
    /// Scale factor on box half-extents when growing the activated cell
    /// rectangle around an instance center (default: 0.2).
    pub sigma: f32,
    /// Minimum category confidence for a (cell, class) pair to become a
    /// candidate (default: 0.1).
    pub score_thr: f32,
    /// Binarization threshold for mask probabilities (default: 0.5).
    pub mask_thr: f32,
    /// Minimum decayed score after Matrix NMS for a candidate to survive
    /// (default: 0.05).
    pub update_thr: f32,
    /// Maximum number of candidates entering Matrix NMS (default: 500).
    pub nms_pre: usize,
    /// Maximum number of final instances per image (default: 100).
    pub max_per_img: usize,
    /// Matrix NMS decay kernel (default: gaussian).
    pub kernel: NmsKernel,
    /// Matrix NMS decay width (default: 2.0).
    pub nms_sigma: f32,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            num_classes: 80,
            strides: vec![8, 8, 16, 32, 32],
            scale_ranges: vec![
                (1.0, 96.0),
                (48.0, 192.0),
                (96.0, 384.0),
                (192.0, 768.0),
                (384.0, 2048.0),
            ],
            num_grids: vec![40, 36, 24, 16, 12],
            sigma: 0.2,
            score_thr: 0.1,
            mask_thr: 0.5,
            update_thr: 0.05,
            nms_pre: 500,
            max_per_img: 100,
            kernel: NmsKernel::Gaussian,
            nms_sigma: 2.0,
        }
    }
}

impl HeadConfig {
    /// Create a new builder for `HeadConfig`.
    #[must_use]
    pub fn builder() -> HeadConfigBuilder {
        HeadConfigBuilder::default()
    }

    /// Number of configured pyramid levels.
    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.strides.len()
    }

    /// Category id used for background cells in label grids.
    #[must_use]
    pub fn background_label(&self) -> i64 {
        self.num_classes as i64
    }

    /// Check internal consistency. Called by the builder and again by
    /// [`crate::SoloHead::new`] since all fields are public.
    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(HeadError::NoClasses);
        }
        if self.strides.len() != self.scale_ranges.len()
            || self.strides.len() != self.num_grids.len()
            || self.strides.is_empty()
        {
            return Err(HeadError::LevelConfigMismatch {
                strides: self.strides.len(),
                scale_ranges: self.scale_ranges.len(),
                num_grids: self.num_grids.len(),
            });
        }
        Ok(())
    }
}

/// One pyramid level as seen by the assigner: static configuration joined
/// with the feature-map resolution supplied per forward pass.
#[derive(Clone, Copy, Debug)]
pub struct FeatureLevel {
    /// Feature stride of this level.
    pub stride: usize,
    /// Grid size S.
    pub num_grid: usize,
    /// Inclusive sqrt-area band routed to this level.
    pub scale_range: (f32, f32),
    /// Mask-label plane height (the mask branch resolution, stride/2).
    pub feat_h: usize,
    /// Mask-label plane width.
    pub feat_w: usize,
}

impl HeadConfig {
    /// Join the static per-level settings with this pass's feature-map
    /// sizes. Errors if the caller supplied the wrong number of levels.
    pub fn levels(&self, featmap_sizes: &[(usize, usize)]) -> Result<Vec<FeatureLevel>> {
        if featmap_sizes.len() != self.num_levels() {
            return Err(HeadError::LevelCountMismatch {
                expected: self.num_levels(),
                actual: featmap_sizes.len(),
            });
        }
        Ok(self
            .strides
            .iter()
            .zip(&self.scale_ranges)
            .zip(&self.num_grids)
            .zip(featmap_sizes)
            .map(|(((&stride, &scale_range), &num_grid), &(feat_h, feat_w))| FeatureLevel {
                stride,
                num_grid,
                scale_range,
                feat_h,
                feat_w,
            })
            .collect())
    }
}

/// Builder for [`HeadConfig`].
#[derive(Default)]
pub struct HeadConfigBuilder {
    num_classes: Option<usize>,
    strides: Option<Vec<usize>>,
    scale_ranges: Option<Vec<(f32, f32)>>,
    num_grids: Option<Vec<usize>>,
    sigma: Option<f32>,
    score_thr: Option<f32>,
    mask_thr: Option<f32>,
    update_thr: Option<f32>,
    nms_pre: Option<usize>,
    max_per_img: Option<usize>,
    kernel: Option<NmsKernel>,
    kernel_name: Option<String>,
    nms_sigma: Option<f32>,
}

impl HeadConfigBuilder {
    /// Set the number of foreground classes.
    #[must_use]
    pub fn num_classes(mut self, n: usize) -> Self {
        self.num_classes = Some(n);
        self
    }

    /// Set the per-level feature strides (finest first).
    #[must_use]
    pub fn strides(mut self, strides: &[usize]) -> Self {
        self.strides = Some(strides.to_vec());
        self
    }

    /// Set the per-level sqrt-area scale ranges.
    #[must_use]
    pub fn scale_ranges(mut self, ranges: &[(f32, f32)]) -> Self {
        self.scale_ranges = Some(ranges.to_vec());
        self
    }

    /// Set the per-level grid sizes.
    #[must_use]
    pub fn num_grids(mut self, grids: &[usize]) -> Self {
        self.num_grids = Some(grids.to_vec());
        self
    }

    /// Set the half-extent scale factor for label rectangles.
    #[must_use]
    pub fn sigma(mut self, sigma: f32) -> Self {
        self.sigma = Some(sigma);
        self
    }

    /// Set the candidate score threshold.
    #[must_use]
    pub fn score_thr(mut self, thr: f32) -> Self {
        self.score_thr = Some(thr);
        self
    }

    /// Set the mask binarization threshold.
    #[must_use]
    pub fn mask_thr(mut self, thr: f32) -> Self {
        self.mask_thr = Some(thr);
        self
    }

    /// Set the post-NMS score threshold.
    #[must_use]
    pub fn update_thr(mut self, thr: f32) -> Self {
        self.update_thr = Some(thr);
        self
    }

    /// Set the maximum number of candidates entering Matrix NMS.
    #[must_use]
    pub fn nms_pre(mut self, n: usize) -> Self {
        self.nms_pre = Some(n);
        self
    }

    /// Set the maximum number of final instances per image.
    #[must_use]
    pub fn max_per_img(mut self, n: usize) -> Self {
        self.max_per_img = Some(n);
        self
    }

    /// Set the Matrix NMS kernel.
    #[must_use]
    pub fn kernel(mut self, kernel: NmsKernel) -> Self {
        self.kernel = Some(kernel);
        self
    }

    /// Set the Matrix NMS kernel by name (`"gaussian"` or `"linear"`).
    /// An unrecognized name fails `build()`.
    #[must_use]
    pub fn kernel_name(mut self, name: &str) -> Self {
        self.kernel_name = Some(name.to_string());
        self
    }

    /// Set the Matrix NMS decay width.
    #[must_use]
    pub fn nms_sigma(mut self, sigma: f32) -> Self {
        self.nms_sigma = Some(sigma);
        self
    }

    /// Build the configuration, using defaults for unset fields.
    ///
    /// Fails on an unrecognized kernel name or inconsistent per-level
    /// settings, so a misconfigured head can never start processing images.
    pub fn build(self) -> Result<HeadConfig> {
        let d = HeadConfig::default();
        let kernel = match (self.kernel, self.kernel_name) {
            (Some(k), _) => k,
            (None, Some(name)) => name.parse()?,
            (None, None) => d.kernel,
        };
        let config = HeadConfig {
            num_classes: self.num_classes.unwrap_or(d.num_classes),
            strides: self.strides.unwrap_or(d.strides),
            scale_ranges: self.scale_ranges.unwrap_or(d.scale_ranges),
            num_grids: self.num_grids.unwrap_or(d.num_grids),
            sigma: self.sigma.unwrap_or(d.sigma),
            score_thr: self.score_thr.unwrap_or(d.score_thr),
            mask_thr: self.mask_thr.unwrap_or(d.mask_thr),
            update_thr: self.update_thr.unwrap_or(d.update_thr),
            nms_pre: self.nms_pre.unwrap_or(d.nms_pre),
            max_per_img: self.max_per_img.unwrap_or(d.max_per_img),
            kernel,
            nms_sigma: self.nms_sigma.unwrap_or(d.nms_sigma),
        };
        config.validate()?;
        Ok(config)
    }
}
