//! Command-line configuration.
//!
//! Configuration is parsed once in `main` and handed to the pipeline as an
//! explicit [`ExtractOptions`] value. Two settings keep their historical
//! environment variable names:
//!
//! - `COLOR_CORRECTION_FLAG` - apply vendor color correction (`1`, `true`, `yes`)
//! - `DROP_SLIDE_THRESHOLD` - fraction of unreadable tiles tolerated (default: 0.1)
//!
//! Every other option uses the `TILEPACK_` prefix.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};

use crate::archive::{ArchiveCompression, DEFAULT_COMPRESSION_LEVEL};
use crate::pipeline::{ExtractOptions, DEFAULT_DROP_THRESHOLD};
use crate::scheduler::DEFAULT_WORKERS;
use crate::slide::DEFAULT_TILE_CACHE_CAPACITY;
use crate::tile::{is_valid_quality, DEFAULT_JPEG_QUALITY};

/// Default slide file extension.
pub const DEFAULT_SLIDE_FORMATS: &str = "svs";

// =============================================================================
// CLI
// =============================================================================

/// WSI Tilepack - pack regions of Whole Slide Images into JPEG tile archives.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-tilepack")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Extract one archive per manifest
    Extract(ExtractConfig),

    /// Verify an archive and list its tiles
    Inspect(InspectConfig),
}

// =============================================================================
// Extract
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ExtractConfig {
    // =========================================================================
    // Paths
    // =========================================================================
    /// Directory containing the coordinate manifests (`*.json`).
    #[arg(long, env = "TILEPACK_MANIFEST_ROOT")]
    pub manifest_root: PathBuf,

    /// Directory searched recursively for slide files.
    #[arg(long, env = "TILEPACK_SLIDE_ROOT")]
    pub slide_root: PathBuf,

    /// Directory receiving the archives. Created if missing.
    #[arg(long, env = "TILEPACK_OUTPUT_ROOT")]
    pub output_root: PathBuf,

    /// Slide file extensions to try, in order (`;`-separated).
    #[arg(
        long,
        default_value = DEFAULT_SLIDE_FORMATS,
        env = "TILEPACK_SLIDE_FORMATS",
        value_delimiter = ';'
    )]
    pub slide_formats: Vec<String>,

    // =========================================================================
    // Scheduling
    // =========================================================================
    /// Number of slides processed concurrently.
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "TILEPACK_WORKERS")]
    pub workers: usize,

    /// Give up on a slide after this many seconds.
    #[arg(long, env = "TILEPACK_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    // =========================================================================
    // Extraction
    // =========================================================================
    /// Apply vendor color correction when the slide supports it.
    #[arg(
        long,
        default_value_t = false,
        env = "COLOR_CORRECTION_FLAG",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub color_correction: bool,

    /// Fraction of unreadable tiles tolerated before a slide is dropped.
    #[arg(long, default_value_t = DEFAULT_DROP_THRESHOLD, env = "DROP_SLIDE_THRESHOLD")]
    pub drop_threshold: f64,

    /// JPEG quality of stored tiles (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "TILEPACK_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// zlib level applied to archive blobs (0 stores them uncompressed).
    #[arg(
        long,
        default_value_t = DEFAULT_COMPRESSION_LEVEL,
        env = "TILEPACK_COMPRESSION_LEVEL"
    )]
    pub compression_level: u32,

    /// Decoded slide tiles cached per open slide.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "TILEPACK_TILE_CACHE")]
    pub tile_cache: usize,

    // =========================================================================
    // Logging
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ExtractConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.manifest_root.is_dir() {
            return Err(format!(
                "Manifest root {} is not a directory",
                self.manifest_root.display()
            ));
        }
        if !self.slide_root.is_dir() {
            return Err(format!(
                "Slide root {} is not a directory",
                self.slide_root.display()
            ));
        }
        if self.output_root.exists() && !self.output_root.is_dir() {
            return Err(format!(
                "Output root {} exists and is not a directory",
                self.output_root.display()
            ));
        }

        if self.formats().is_empty() {
            return Err("At least one slide format is required".to_string());
        }

        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.timeout_secs == Some(0) {
            return Err("timeout_secs must be greater than 0".to_string());
        }

        if !self.drop_threshold.is_finite() || !(0.0..=1.0).contains(&self.drop_threshold) {
            return Err("drop_threshold must be between 0 and 1".to_string());
        }
        if !is_valid_quality(self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        if self.compression_level > 9 {
            return Err("compression_level must be between 0 and 9".to_string());
        }
        if self.tile_cache == 0 {
            return Err("tile_cache must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Slide extensions, trimmed, without leading dots or empty entries.
    pub fn formats(&self) -> Vec<String> {
        self.slide_formats
            .iter()
            .map(|f| f.trim().trim_start_matches('.').to_string())
            .filter(|f| !f.is_empty())
            .collect()
    }

    pub fn compression(&self) -> ArchiveCompression {
        if self.compression_level == 0 {
            ArchiveCompression::None
        } else {
            ArchiveCompression::zlib(self.compression_level)
        }
    }

    /// Options passed to every pipeline invocation.
    pub fn options(&self) -> ExtractOptions {
        ExtractOptions {
            color_correction: self.color_correction,
            drop_threshold: self.drop_threshold,
            jpeg_quality: self.jpeg_quality,
            compression: self.compression(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

// =============================================================================
// Inspect
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// Archive to inspect.
    pub archive: PathBuf,

    /// Print every slot, not only failures.
    #[arg(long, default_value_t = false)]
    pub list: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
