//! Region reader traits.
//!
//! The extraction pipeline never touches slide formats directly. It asks a
//! [`SlideOpener`] for a handle and reads regions through [`RegionReader`].
//! Format-specific code lives behind these two traits, and tests substitute
//! in-memory slides with scripted failures.

use std::path::Path;

use image::RgbImage;

use crate::error::{ColorCorrectionError, RegionError, SlideError};

/// An open Whole Slide Image that can serve arbitrary pixel regions.
///
/// A handle owns its file descriptors and decoder state. It is used from a
/// single worker and dropped when that worker's invocation ends.
pub trait RegionReader: Send {
    /// Identifier for logging (usually the file path).
    fn identifier(&self) -> &str;

    /// Number of pyramid levels. Level 0 is full resolution.
    fn level_count(&self) -> usize;

    /// Dimensions `(width, height)` of a level, or `None` if out of range.
    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)>;

    /// Dimensions of the full-resolution level.
    fn dimensions(&self) -> Option<(u32, u32)> {
        self.level_dimensions(0)
    }

    /// Read a region as RGB.
    ///
    /// `location` is the top-left corner in level-0 pixel coordinates,
    /// `size` is `(width, height)` in pixels of `level`. The returned image
    /// must be exactly `size`.
    fn read_region(
        &mut self,
        location: (i64, i64),
        level: usize,
        size: (u32, u32),
    ) -> Result<RgbImage, RegionError>;

    /// Vendor color correction, if this slide supports it.
    fn color_correction(&mut self) -> Option<&mut dyn ColorCorrection> {
        None
    }
}

/// Optional vendor-specific color correction capability.
pub trait ColorCorrection {
    /// Enable color correction for all subsequent region reads.
    fn apply_color_correction(&mut self) -> Result<(), ColorCorrectionError>;
}

/// Opens slides by path.
///
/// Each pipeline invocation opens exactly one slide, so openers are shared
/// across workers while the slides they return are not.
pub trait SlideOpener: Send + Sync {
    /// The handle type this opener produces.
    type Slide: RegionReader;

    /// Open the slide at `path`.
    fn open(&self, path: &Path) -> Result<Self::Slide, SlideError>;
}
