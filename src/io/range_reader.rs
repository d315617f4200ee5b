use bytes::Bytes;

use crate::error::IoError;

/// Positioned reads over a slide file.
///
/// The TIFF parser and the region reader only ever fetch the byte ranges
/// they need. Reads are blocking: a slide handle lives on one blocking
/// worker for its whole lifetime.
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Fails with [`IoError::RangeOutOfBounds`] if the range extends past
    /// [`size`](RangeReader::size).
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Identifier for logging (usually the path).
    fn identifier(&self) -> &str;
}
