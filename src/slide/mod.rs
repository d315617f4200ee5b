//! Slide abstraction layer.
//!
//! The extraction pipeline reads pixels through two traits:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Extraction Pipeline            │
//! └────────────────────┬────────────────────┘
//!                      │ open(path)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           SlideOpener Trait             │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           RegionReader Trait            │
//! │  read_region / level_dimensions /       │
//! │  optional ColorCorrection capability    │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │     TiffSlide (tiled JPEG TIFF/SVS)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use wsi_tilepack::slide::{RegionReader, SlideOpener, TiffSlideOpener};
//!
//! let opener = TiffSlideOpener::new();
//! let mut slide = opener.open(Path::new("slides/sample.svs"))?;
//!
//! // 256x256 patch at level 0, top-left corner at (1024, 2048)
//! let patch = slide.read_region((1024, 2048), 0, (256, 256))?;
//! ```

mod reader;
mod tiff_slide;

pub use reader::{ColorCorrection, RegionReader, SlideOpener};
pub use tiff_slide::{TiffSlide, TiffSlideOpener, DEFAULT_TILE_CACHE_CAPACITY};
