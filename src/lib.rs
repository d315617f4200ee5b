//! # WSI Tilepack
//!
//! Packs regions of interest from Whole Slide Images (WSI) into archives of
//! JPEG tiles, one archive per coordinate manifest.
//!
//! For each manifest the pipeline opens the matching slide, reads a square
//! patch at every listed coordinate, encodes it as JPEG and stores it in the
//! slot matching the coordinate's position. Unreadable regions become white
//! placeholders until a per-manifest corruption budget runs out. Archives are
//! written under a staging name and renamed only once complete.
//!
//! ## Architecture
//!
//! - [`io`] - Range reads over local files
//! - [`mod@format`] - TIFF structure parsing and JPEG table handling
//! - [`slide`] - Region reader traits and the tiled TIFF implementation
//! - [`tile`] - JPEG tile encoding and placeholders
//! - [`manifest`] - Coordinate manifests
//! - [`archive`] - The `.tilepack` container
//! - [`locate`] - Manifest discovery and slide resolution
//! - [`pipeline`] - Per-slide extraction
//! - [`scheduler`] - Bounded concurrent execution of many extractions
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use wsi_tilepack::{
//!     plan_jobs, ExtractOptions, Extractor, Scheduler, SlideIndex, TiffSlideOpener,
//! };
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let formats = vec!["svs".to_string()];
//!     let index = SlideIndex::build(Path::new("/data/slides"));
//!     let jobs = plan_jobs(Path::new("/data/coords"), &index, Path::new("/data/tiles"), &formats)?;
//!
//!     let extractor = Extractor::new(TiffSlideOpener::new(), ExtractOptions::default());
//!     let summary = Scheduler::new(extractor, 8).run(jobs).await;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod locate;
pub mod manifest;
pub mod pipeline;
pub mod scheduler;
pub mod slide;
pub mod tile;

// Re-export commonly used types
pub use archive::{ArchiveCompression, ArchiveWriter, TileArchive};
pub use config::{Cli, Command, ExtractConfig, InspectConfig};
pub use error::{
    ArchiveError, ColorCorrectionError, ExtractError, IoError, ManifestError, RegionError,
    SlideError, TiffError, TileError,
};
pub use io::{LocalFileReader, RangeReader};
pub use locate::{discover_manifests, plan_jobs, SlideIndex};
pub use manifest::Manifest;
pub use pipeline::{
    staging_path, CancelFlag, CorruptionBudget, ExtractJob, ExtractOptions, ExtractionOutcome,
    ExtractionReport, Extractor, SkipReason,
};
pub use scheduler::{RunSummary, Scheduler};
pub use slide::{ColorCorrection, RegionReader, SlideOpener, TiffSlide, TiffSlideOpener};
pub use tile::JpegTileEncoder;
