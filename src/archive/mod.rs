//! Packed tile archive (`.tilepack`).
//!
//! An archive is a fixed number of slots, each holding one variable-length
//! blob (a complete JPEG file). Slots are index-aligned with the manifest
//! that produced them.
//!
//! # Layout
//!
//! All integers are little-endian.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (24 bytes)                                            │
//! │   magic "TILEPAK1" (8) | version u16 | codec u8 | level u8   │
//! │   reserved u32 | slot count u64                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Blobs, each compressed independently, in write order         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Index: per slot (offset u64, stored len u64, raw len u64)    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Footer (16 bytes): index offset u64 | magic "TPAKEND!"       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The index is only written by [`ArchiveWriter::finish`], so a file
//! without a valid footer is never mistaken for a complete archive.

mod reader;
mod writer;

pub use reader::TileArchive;
pub use writer::ArchiveWriter;

use crate::error::ArchiveError;

/// File extension of published archives.
pub const ARCHIVE_EXTENSION: &str = "tilepack";

/// Default zlib level ("moderate": between speed and size).
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

const HEADER_MAGIC: &[u8; 8] = b"TILEPAK1";
const FOOTER_MAGIC: &[u8; 8] = b"TPAKEND!";
const FORMAT_VERSION: u16 = 1;
const HEADER_SIZE: u64 = 24;
const INDEX_ENTRY_SIZE: u64 = 24;
const FOOTER_SIZE: u64 = 16;

const CODEC_NONE: u8 = 0;
const CODEC_ZLIB: u8 = 1;

/// Compression applied to each blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveCompression {
    /// Blobs stored verbatim
    None,
    /// zlib at the given level (0-9)
    Zlib { level: u32 },
}

impl ArchiveCompression {
    /// zlib at `level`, clamped to 0-9.
    pub fn zlib(level: u32) -> Self {
        ArchiveCompression::Zlib {
            level: level.min(9),
        }
    }

    fn codec(self) -> u8 {
        match self {
            ArchiveCompression::None => CODEC_NONE,
            ArchiveCompression::Zlib { .. } => CODEC_ZLIB,
        }
    }

    fn level(self) -> u8 {
        match self {
            ArchiveCompression::None => 0,
            ArchiveCompression::Zlib { level } => level as u8,
        }
    }

    fn from_header(codec: u8, level: u8) -> Result<Self, ArchiveError> {
        match codec {
            CODEC_NONE => Ok(ArchiveCompression::None),
            CODEC_ZLIB => Ok(ArchiveCompression::Zlib {
                level: level as u32,
            }),
            other => Err(ArchiveError::Corrupt(format!("unknown codec {other}"))),
        }
    }
}

impl Default for ArchiveCompression {
    fn default() -> Self {
        ArchiveCompression::Zlib {
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// Location of one slot's blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotEntry {
    offset: u64,
    stored_len: u64,
    raw_len: u64,
}

impl SlotEntry {
    fn to_bytes(self) -> [u8; INDEX_ENTRY_SIZE as usize] {
        let mut out = [0u8; INDEX_ENTRY_SIZE as usize];
        out[0..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8..16].copy_from_slice(&self.stored_len.to_le_bytes());
        out[16..24].copy_from_slice(&self.raw_len.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let field = |i: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[i..i + 8]);
            u64::from_le_bytes(buf)
        };
        SlotEntry {
            offset: field(0),
            stored_len: field(8),
            raw_len: field(16),
        }
    }
}
