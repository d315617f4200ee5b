//! Per-slide extraction pipeline.
//!
//! One invocation turns one manifest into one published archive:
//!
//! ```text
//!  manifest ──► open slide ──► for each (x, y):
//!                                 read region ──(error)──► white placeholder
//!                                      │                    corrupted += 1
//!                                      ▼
//!                                 encode JPEG ──► archive slot i
//!                                      │
//!                     <output>.temp ◄──┘
//!                           │ finish + rename
//!                           ▼
//!                       <output>
//! ```
//!
//! The staging file is the only thing ever written before success, and it is
//! removed on every exit that does not publish it. The final path therefore
//! either does not exist or holds a complete archive.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveCompression, ArchiveWriter};
use crate::error::{ExtractError, RegionError};
use crate::manifest::Manifest;
use crate::slide::{RegionReader, SlideOpener};
use crate::tile::{JpegTileEncoder, DEFAULT_JPEG_QUALITY};

/// Default fraction of tiles allowed to fail per manifest.
pub const DEFAULT_DROP_THRESHOLD: f64 = 0.1;

/// Suffix appended to the output path while an archive is being written.
pub const STAGING_SUFFIX: &str = ".temp";

// =============================================================================
// Options and jobs
// =============================================================================

/// Settings shared by every invocation of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractOptions {
    /// Apply vendor color correction when the slide supports it
    pub color_correction: bool,

    /// Fraction of tiles that may fail before the manifest is dropped
    pub drop_threshold: f64,

    /// JPEG quality of every stored tile
    pub jpeg_quality: u8,

    /// Blob compression inside the archive
    pub compression: ArchiveCompression,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            color_correction: false,
            drop_threshold: DEFAULT_DROP_THRESHOLD,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            compression: ArchiveCompression::default(),
        }
    }
}

/// One unit of work: a manifest, where to publish its archive, and the
/// slide it was resolved to (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractJob {
    pub manifest_path: PathBuf,
    pub output_path: PathBuf,
    pub slide_path: Option<PathBuf>,
}

impl ExtractJob {
    pub fn new(
        manifest_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        slide_path: Option<PathBuf>,
    ) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            output_path: output_path.into(),
            slide_path,
        }
    }

    /// Path used for logging: the slide if resolved, otherwise the manifest.
    pub fn display_path(&self) -> &Path {
        self.slide_path.as_deref().unwrap_or(&self.manifest_path)
    }
}

/// Cooperative cancellation shared between a running invocation and the
/// scheduler that started it.
///
/// Cancelling and publishing exclude each other: once an invocation has
/// started publishing it can no longer be cancelled, and a cancelled
/// invocation never publishes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicU8>);

const RUNNING: u8 = 0;
const PUBLISHING: u8 = 1;
const CANCELLED: u8 = 2;

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    ///
    /// Returns `false` if the invocation is already publishing, in which case
    /// it will run to its own outcome.
    pub fn cancel(&self) -> bool {
        match self
            .0
            .compare_exchange(RUNNING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(state) => state == CANCELLED,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst) == CANCELLED
    }

    /// Claim the right to publish. Returns `false` if already cancelled.
    pub fn begin_publish(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, PUBLISHING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_publishing(&self) -> bool {
        self.0.load(Ordering::SeqCst) == PUBLISHING
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Why a manifest was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No slide file was resolved for the manifest
    NoSlideMatch,
    /// The output archive already exists
    AlreadyDone,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoSlideMatch => write!(f, "no matching slide"),
            SkipReason::AlreadyDone => write!(f, "output already exists"),
        }
    }
}

/// Statistics of a published archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionReport {
    /// Slots written (equals the manifest coordinate count)
    pub tiles: usize,
    /// Slots holding a placeholder
    pub corrupted: usize,
    /// Corruption budget of the manifest
    pub allowed: usize,
    pub elapsed: Duration,
}

/// Result of one pipeline invocation.
#[derive(Debug)]
pub enum ExtractionOutcome {
    Completed(ExtractionReport),
    Skipped(SkipReason),
    Failed(ExtractError),
}

impl ExtractionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExtractionOutcome::Completed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ExtractionOutcome::Skipped(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ExtractionOutcome::Failed(_))
    }
}

// =============================================================================
// Corruption budget
// =============================================================================

/// Counts unreadable tiles against `floor(threshold * total)`.
///
/// The budget is exceeded only when strictly more than `allowed` tiles have
/// failed, so exactly `allowed` failures still publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorruptionBudget {
    total: usize,
    allowed: usize,
    corrupted: usize,
}

impl CorruptionBudget {
    pub fn new(total: usize, threshold: f64) -> Self {
        let allowed = (threshold * total as f64).floor().max(0.0) as usize;
        Self {
            total,
            allowed,
            corrupted: 0,
        }
    }

    pub fn allowed(&self) -> usize {
        self.allowed
    }

    pub fn corrupted(&self) -> usize {
        self.corrupted
    }

    pub fn record_failure(&mut self) {
        self.corrupted += 1;
    }

    pub fn is_exceeded(&self) -> bool {
        self.corrupted > self.allowed
    }

    /// Fail with [`ExtractError::TooManyCorruptedTiles`] once exceeded.
    pub fn check(&self) -> Result<(), ExtractError> {
        if self.is_exceeded() {
            return Err(ExtractError::TooManyCorruptedTiles {
                corrupted: self.corrupted,
                allowed: self.allowed,
                total: self.total,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Staging
// =============================================================================

/// `<output>.temp`, next to the final path so the rename stays on one
/// filesystem.
pub fn staging_path(output_path: &Path) -> PathBuf {
    let mut name = OsString::from(output_path.as_os_str());
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Removes the staging file on drop unless it was published.
struct StagingGuard {
    path: PathBuf,
    committed: bool,
}

impl StagingGuard {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically move the staging file to `final_path`.
    fn commit(mut self, final_path: &Path) -> io::Result<()> {
        fs::rename(&self.path, final_path)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staging file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove staging file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

// =============================================================================
// Extractor
// =============================================================================

/// Runs the extraction pipeline with a fixed opener and options.
///
/// An `Extractor` holds no per-slide state; every call to [`extract`] opens
/// its own slide and archive and drops them before returning.
///
/// [`extract`]: Extractor::extract
pub struct Extractor<O: SlideOpener> {
    opener: O,
    options: ExtractOptions,
    encoder: JpegTileEncoder,
}

impl<O: SlideOpener> Extractor<O> {
    pub fn new(opener: O, options: ExtractOptions) -> Self {
        Self {
            opener,
            encoder: JpegTileEncoder::new(options.jpeg_quality),
            options,
        }
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Extract one manifest.
    ///
    /// Skips return before anything is opened: an unresolved slide first,
    /// then an existing output. Every other exit is `Completed` or `Failed`,
    /// and only `Completed` leaves a file at `job.output_path`.
    pub fn extract(&self, job: &ExtractJob, cancel: &CancelFlag) -> ExtractionOutcome {
        let slide_path = match job.slide_path.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => path,
            _ => {
                info!(
                    "Skipping {}: {}",
                    job.manifest_path.display(),
                    SkipReason::NoSlideMatch
                );
                return ExtractionOutcome::Skipped(SkipReason::NoSlideMatch);
            }
        };

        if job.output_path.exists() {
            info!(
                "Skipping {}: {} ({})",
                slide_path.display(),
                SkipReason::AlreadyDone,
                job.output_path.display()
            );
            return ExtractionOutcome::Skipped(SkipReason::AlreadyDone);
        }

        let manifest = match Manifest::open(&job.manifest_path) {
            Ok(manifest) => manifest,
            Err(e) => {
                let err = ExtractError::from(e);
                error!(slide = %slide_path.display(), "Extraction failed: {}", err);
                return ExtractionOutcome::Failed(err);
            }
        };

        match self.run(&manifest, slide_path, &job.output_path, cancel) {
            Ok(report) => {
                info!(
                    slide = %slide_path.display(),
                    tiles = report.tiles,
                    corrupted = report.corrupted,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Published {}",
                    job.output_path.display()
                );
                ExtractionOutcome::Completed(report)
            }
            Err(err) => {
                error!(slide = %slide_path.display(), "Extraction failed: {}", err);
                ExtractionOutcome::Failed(err)
            }
        }
    }

    fn run(
        &self,
        manifest: &Manifest,
        slide_path: &Path,
        output_path: &Path,
        cancel: &CancelFlag,
    ) -> Result<ExtractionReport, ExtractError> {
        let start = Instant::now();

        let mut slide = self.opener.open(slide_path)?;
        if self.options.color_correction {
            apply_color_correction(&mut slide);
        }

        let total = manifest.len();
        let level = manifest.patch_level();
        let size = manifest.patch_size();
        let mut budget = CorruptionBudget::new(total, self.options.drop_threshold);

        debug!(
            "Extracting {} tiles of {}px at level {} from {} (budget {})",
            total,
            size,
            level,
            slide_path.display(),
            budget.allowed()
        );

        // Declared before the writer so the file is closed before removal
        let staging = StagingGuard::new(staging_path(output_path));
        let mut archive = ArchiveWriter::create(staging.path(), total, self.options.compression)?;

        for (index, &(x, y)) in manifest.coords().iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            budget.check()?;

            let tile = match read_tile(&mut slide, (x, y), level, size) {
                Ok(tile) => tile,
                Err(err) => {
                    warn!(
                        slide = %slide_path.display(),
                        x = x,
                        y = y,
                        level = level,
                        dimensions = ?slide.dimensions(),
                        "Unreadable region, using placeholder: {}",
                        err
                    );
                    budget.record_failure();
                    JpegTileEncoder::placeholder(size)
                }
            };

            let blob = self.encoder.encode(&tile)?;
            archive.write(index, &blob)?;
        }

        budget.check()?;
        if !cancel.begin_publish() {
            return Err(ExtractError::Cancelled);
        }

        archive.finish()?;
        staging.commit(output_path)?;

        Ok(ExtractionReport {
            tiles: total,
            corrupted: budget.corrupted(),
            allowed: budget.allowed(),
            elapsed: start.elapsed(),
        })
    }
}

/// Read one square patch, rejecting readers that return the wrong size.
fn read_tile<S: RegionReader>(
    slide: &mut S,
    location: (i64, i64),
    level: usize,
    size: u32,
) -> Result<RgbImage, RegionError> {
    let tile = slide.read_region(location, level, (size, size))?;
    if tile.dimensions() != (size, size) {
        return Err(RegionError::SizeMismatch {
            expected_width: size,
            expected_height: size,
            actual_width: tile.width(),
            actual_height: tile.height(),
        });
    }
    Ok(tile)
}

fn apply_color_correction<S: RegionReader>(slide: &mut S) {
    let identifier = slide.identifier().to_string();
    match slide.color_correction() {
        Some(correction) => match correction.apply_color_correction() {
            Ok(()) => debug!("Applied color correction to {}", identifier),
            Err(e) => warn!("{} for {}, continuing uncorrected", e, identifier),
        },
        None => info!(
            "Color correction requested but not supported by {}",
            identifier
        ),
    }
}
