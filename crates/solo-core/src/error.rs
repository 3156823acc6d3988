//! Fatal precondition errors for the head pipeline.
//!
//! Every variant here is a contract violation between the head and its
//! collaborators (wrong number of pyramid levels, inconsistent per-level
//! settings, a kernel name nobody recognizes). Recoverable conditions such
//! as "no candidate survived a threshold" are *not* errors; they flow
//! through the pipeline as explicit empty results.

/// Convenience alias used throughout the crate.
pub type Result<T, E = HeadError> = std::result::Result<T, E>;

/// A fatal precondition violation, reported before any per-image work runs.
#[derive(Debug, thiserror::Error)]
pub enum HeadError {
    /// The NMS kernel name did not match any known kernel.
    #[error("unknown matrix NMS kernel `{0}` (expected `gaussian` or `linear`)")]
    UnknownKernel(String),

    /// Per-level configuration vectors disagree in length.
    #[error(
        "per-level settings disagree: {strides} strides, {scale_ranges} scale ranges, {num_grids} grid sizes"
    )]
    LevelConfigMismatch {
        /// Number of configured strides.
        strides: usize,
        /// Number of configured scale ranges.
        scale_ranges: usize,
        /// Number of configured grid sizes.
        num_grids: usize,
    },

    /// The caller supplied predictions for the wrong number of levels.
    #[error("expected inputs for {expected} pyramid levels, got {actual}")]
    LevelCountMismatch {
        /// Configured level count.
        expected: usize,
        /// Supplied level count.
        actual: usize,
    },

    /// A category score map does not match the configured grid size.
    #[error("category map at level {level} is {got_h}x{got_w}, configured grid is {grid}x{grid}")]
    GridShapeMismatch {
        /// Pyramid level index.
        level: usize,
        /// Configured grid size S.
        grid: usize,
        /// Supplied map height.
        got_h: usize,
        /// Supplied map width.
        got_w: usize,
    },

    /// A category score map carries the wrong number of class channels.
    #[error("category map at level {level} has {got} class channels, expected {expected}")]
    ClassCountMismatch {
        /// Pyramid level index.
        level: usize,
        /// Configured class count.
        expected: usize,
        /// Supplied channel count.
        got: usize,
    },

    /// A mask prediction stack does not hold one plane per grid cell.
    #[error("mask stack at level {level} holds {got} planes, expected {expected} (grid squared)")]
    MaskCountMismatch {
        /// Pyramid level index.
        level: usize,
        /// Expected plane count (S^2).
        expected: usize,
        /// Supplied plane count.
        got: usize,
    },

    /// Mask prediction stacks across levels do not share one spatial resolution.
    #[error(
        "mask stack at level {level} is {got_h}x{got_w}, but level 0 is {expected_h}x{expected_w}"
    )]
    MaskResolutionMismatch {
        /// Pyramid level index.
        level: usize,
        /// Level-0 height.
        expected_h: usize,
        /// Level-0 width.
        expected_w: usize,
        /// Supplied height.
        got_h: usize,
        /// Supplied width.
        got_w: usize,
    },

    /// The head was configured with zero foreground classes.
    #[error("num_classes must be nonzero")]
    NoClasses,
}
