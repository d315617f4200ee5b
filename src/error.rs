use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// I/O errors that can occur when reading slide bytes
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Underlying file system error
    #[error("File error on {path}: {message}")]
    File { path: String, message: String },

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },
}

/// Errors raised while opening a slide.
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    /// The slide path does not exist
    #[error("Slide not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file could not be parsed as a slide
    #[error("Cannot parse slide: {0}")]
    Format(#[from] TiffError),

    /// The file parsed but has no readable pyramid
    #[error("Unsupported slide: {reason}")]
    Unsupported { reason: String },
}

impl From<IoError> for SlideError {
    fn from(err: IoError) -> Self {
        SlideError::Format(TiffError::Io(err))
    }
}

/// A single region could not be read.
///
/// Region errors are recoverable: the pipeline substitutes a placeholder tile
/// and charges the corruption budget.
#[derive(Debug, Clone, Error)]
pub enum RegionError {
    /// Requested level does not exist
    #[error("Level {level} out of range (slide has {level_count} levels)")]
    InvalidLevel { level: usize, level_count: usize },

    /// Region does not intersect the level at all
    #[error("Region at ({x}, {y}) size {width}x{height} lies outside level {level}")]
    OutOfBounds {
        x: i64,
        y: i64,
        width: u32,
        height: u32,
        level: usize,
    },

    /// Tile is absent from the file (zero byte count)
    #[error("Tile ({tile_x}, {tile_y}) at level {level} is empty")]
    EmptyTile { level: usize, tile_x: u32, tile_y: u32 },

    /// I/O error while fetching tile bytes
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Tile bytes could not be decoded
    #[error("Failed to decode tile: {message}")]
    Decode { message: String },

    /// The reader produced an image of the wrong size
    #[error("Reader returned {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    SizeMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}

/// Vendor color correction could not be applied.
#[derive(Debug, Clone, Error)]
#[error("Color correction failed: {message}")]
pub struct ColorCorrectionError {
    pub message: String,
}

/// Errors that can occur during tile encoding
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Failed to decode source image
    #[error("Failed to decode image: {message}")]
    DecodeError { message: String },

    /// Failed to encode output image
    #[error("Failed to encode image: {message}")]
    EncodeError { message: String },
}

/// A coordinate manifest could not be loaded.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// File missing or unreadable
    #[error("Cannot read manifest {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Not a manifest document (bad JSON, missing table or attributes)
    #[error("Malformed manifest {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Attribute present but unusable
    #[error("Invalid attribute {name} in {}: {message}", path.display())]
    InvalidAttribute {
        path: PathBuf,
        name: &'static str,
        message: String,
    },
}

/// Errors from the packed tile archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Underlying file operation failed
    #[error("Archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Slot index is past the end of the archive
    #[error("Slot {index} out of range (archive has {len} slots)")]
    SlotOutOfRange { index: usize, len: usize },

    /// Slot was already written
    #[error("Slot {0} already written")]
    SlotAlreadyWritten(usize),

    /// Finish called before every slot was filled
    #[error("Archive incomplete: {written} of {expected} slots written")]
    Incomplete { written: usize, expected: usize },

    /// File is not a tile archive or is truncated
    #[error("Corrupt archive: {0}")]
    Corrupt(String),
}

/// Reasons a single manifest's extraction fails.
///
/// None of these abort the batch; the scheduler logs them and moves on.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Manifest could not be opened or parsed
    #[error("Manifest unreadable: {0}")]
    ManifestUnreadable(#[from] ManifestError),

    /// Slide could not be opened
    #[error("Cannot open slide: {0}")]
    SlideOpen(#[from] SlideError),

    /// More tiles failed than the corruption budget allows
    #[error("Too many corrupted tiles: {corrupted} > {allowed} of {total}")]
    TooManyCorruptedTiles {
        corrupted: usize,
        allowed: usize,
        total: usize,
    },

    /// Tile encoding failed
    #[error("Encoding failed: {0}")]
    Encode(#[from] TileError),

    /// Archive could not be written
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Publishing the archive failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invocation exceeded its time limit
    #[error("Timed out after {limit:?}")]
    Timeout { limit: Duration },

    /// Invocation was cancelled before publication
    #[error("Cancelled")]
    Cancelled,

    /// The worker running the invocation panicked
    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
}
