//! TIFF and BigTIFF structure parsing.
//!
//! Only the parts of TIFF needed to locate tiles are parsed: the header, the
//! IFD chain and the handful of tags describing tiled images.
//!
//! # Header layouts
//!
//! ```text
//! Classic TIFF (8 bytes):  byte order (2) | version 42 (2) | first IFD (4)
//! BigTIFF (16 bytes):      byte order (2) | version 43 (2) | offset size 8 (2)
//!                          | reserved (2) | first IFD (8)
//! ```
//!
//! Small values are stored inline in the IFD entry; larger ones live at an
//! offset pointed to by the entry.

use std::collections::HashSet;

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes indicating little-endian byte order ("II" for Intel)
const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;

/// Magic bytes indicating big-endian byte order ("MM" for Motorola)
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;

const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

/// Maximum number of IFDs to follow (safety limit)
const MAX_IFDS: usize = 100;

/// Compression value for "new-style" JPEG.
pub const COMPRESSION_JPEG: u16 = 7;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) declared in the TIFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

impl ByteOrder {
    /// Decode a `u16` from the first 2 bytes.
    ///
    /// # Panics
    /// Panics if `bytes` is shorter than 2 bytes.
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        let raw = [bytes[0], bytes[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[..4]);
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Whether this is a BigTIFF file (64-bit offsets)
    pub is_bigtiff: bool,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a TIFF header from raw bytes.
    ///
    /// `file_size` is used to reject a first IFD offset outside the file.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        // Checked as a fixed pattern, so the byte order does not matter here
        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let version = byte_order.read_u16(&bytes[2..4]);
        let (is_bigtiff, first_ifd_offset) = match version {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            _ => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// Size of an IFD entry: 12 bytes classic, 20 bytes BigTIFF.
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Size of the entry count field at the start of an IFD.
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Size of the value/offset field (and of the next-IFD pointer).
    #[inline]
    pub const fn value_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }
}

// =============================================================================
// Tags and field types
// =============================================================================

/// TIFF tags needed to read tiled pyramids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    ImageWidth = 256,
    ImageLength = 257,
    Compression = 259,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    JpegTables = 347,
}

impl TiffTag {
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    pub const fn name(self) -> &'static str {
        match self {
            TiffTag::ImageWidth => "ImageWidth",
            TiffTag::ImageLength => "ImageLength",
            TiffTag::Compression => "Compression",
            TiffTag::TileWidth => "TileWidth",
            TiffTag::TileLength => "TileLength",
            TiffTag::TileOffsets => "TileOffsets",
            TiffTag::TileByteCounts => "TileByteCounts",
            TiffTag::JpegTables => "JPEGTables",
        }
    }
}

/// TIFF field types.
///
/// Sizes matter for inline detection and array stepping, so every standard
/// type is known even though only the integer ones are ever decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Byte,
    Ascii,
    Short,
    Long,
    Rational,
    SByte,
    Undefined,
    SShort,
    SLong,
    SRational,
    Float,
    Double,
    Ifd,
    Long8,
    SLong8,
    Ifd8,
}

impl FieldType {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => FieldType::Byte,
            2 => FieldType::Ascii,
            3 => FieldType::Short,
            4 => FieldType::Long,
            5 => FieldType::Rational,
            6 => FieldType::SByte,
            7 => FieldType::Undefined,
            8 => FieldType::SShort,
            9 => FieldType::SLong,
            10 => FieldType::SRational,
            11 => FieldType::Float,
            12 => FieldType::Double,
            13 => FieldType::Ifd,
            16 => FieldType::Long8,
            17 => FieldType::SLong8,
            18 => FieldType::Ifd8,
            _ => return None,
        })
    }

    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::SByte | FieldType::Undefined => 1,
            FieldType::Short | FieldType::SShort => 2,
            FieldType::Long | FieldType::SLong | FieldType::Float | FieldType::Ifd => 4,
            FieldType::Rational
            | FieldType::SRational
            | FieldType::Double
            | FieldType::Long8
            | FieldType::SLong8
            | FieldType::Ifd8 => 8,
        }
    }
}

// =============================================================================
// IFD
// =============================================================================

/// A single IFD entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: FieldType,
    pub count: u64,
    /// Raw value/offset field (4 or 8 bytes used), in file byte order
    pub value_offset: [u8; 8],
    /// Whether the value is stored in `value_offset` itself
    pub is_inline: bool,
}

impl IfdEntry {
    /// Total size of the entry's value in bytes.
    pub fn value_size(&self) -> Option<u64> {
        (self.field_type.size_in_bytes() as u64).checked_mul(self.count)
    }

    /// Offset of an out-of-line value.
    pub fn offset(&self, header: &TiffHeader) -> u64 {
        if header.is_bigtiff {
            header.byte_order.read_u64(&self.value_offset)
        } else {
            header.byte_order.read_u32(&self.value_offset) as u64
        }
    }

    /// Single inline integer value (SHORT, LONG or LONG8 with count 1).
    pub fn inline_integer(&self, byte_order: ByteOrder) -> Option<u64> {
        if self.count != 1 {
            return None;
        }
        match self.field_type {
            FieldType::Short => Some(byte_order.read_u16(&self.value_offset) as u64),
            FieldType::Long => Some(byte_order.read_u32(&self.value_offset) as u64),
            FieldType::Long8 => Some(byte_order.read_u64(&self.value_offset)),
            _ => None,
        }
    }
}

/// A parsed Image File Directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Byte size of an IFD with `entry_count` entries, or `None` if it
    /// does not fit in `usize`.
    pub fn calculate_size(entry_count: u64, header: &TiffHeader) -> Option<usize> {
        usize::try_from(entry_count)
            .ok()?
            .checked_mul(header.ifd_entry_size())?
            .checked_add(header.ifd_count_size() + header.value_offset_size())
    }

    fn required_size(entry_count: u64, header: &TiffHeader) -> Result<usize, TiffError> {
        Self::calculate_size(entry_count, header).ok_or(TiffError::InvalidTagValue {
            tag: "IFD entry count",
            message: format!("{entry_count} entries overflow"),
        })
    }

    /// Parse an IFD from its raw bytes.
    ///
    /// Entries with field types outside the TIFF 6 / BigTIFF set are skipped.
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let order = header.byte_order;
        let count_size = header.ifd_count_size();
        if bytes.len() < count_size {
            return Err(TiffError::FileTooSmall {
                required: count_size as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_count = if header.is_bigtiff {
            order.read_u64(bytes)
        } else {
            order.read_u16(bytes) as u64
        };

        let required = Self::required_size(entry_count, header)?;
        if bytes.len() < required {
            return Err(TiffError::FileTooSmall {
                required: required as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_size = header.ifd_entry_size();
        let value_size = header.value_offset_size();
        let mut entries = Vec::with_capacity(entry_count as usize);

        for i in 0..entry_count as usize {
            let raw = &bytes[count_size + i * entry_size..count_size + (i + 1) * entry_size];
            let tag = order.read_u16(&raw[0..2]);
            let Some(field_type) = FieldType::from_u16(order.read_u16(&raw[2..4])) else {
                continue;
            };
            let (count, value_start) = if header.is_bigtiff {
                (order.read_u64(&raw[4..12]), 12)
            } else {
                (order.read_u32(&raw[4..8]) as u64, 8)
            };

            let mut value_offset = [0u8; 8];
            value_offset[..value_size].copy_from_slice(&raw[value_start..value_start + value_size]);

            let is_inline = (field_type.size_in_bytes() as u64)
                .checked_mul(count)
                .is_some_and(|total| total <= value_size as u64);

            entries.push(IfdEntry {
                tag,
                field_type,
                count,
                value_offset,
                is_inline,
            });
        }

        let next_start = count_size + entry_count as usize * entry_size;
        let next_ifd_offset = if header.is_bigtiff {
            order.read_u64(&bytes[next_start..])
        } else {
            order.read_u32(&bytes[next_start..]) as u64
        };

        Ok(Ifd {
            entries,
            next_ifd_offset,
        })
    }

    pub fn entry(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag == tag.as_u16())
    }

    /// Single integer value of a tag, if stored inline.
    pub fn integer(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u64> {
        self.entry(tag)?.inline_integer(byte_order)
    }

    /// Whether this IFD describes a tiled image.
    pub fn is_tiled(&self) -> bool {
        self.entry(TiffTag::TileWidth).is_some()
            && self.entry(TiffTag::TileLength).is_some()
            && self.entry(TiffTag::TileOffsets).is_some()
            && self.entry(TiffTag::TileByteCounts).is_some()
    }
}

// =============================================================================
// Value reading
// =============================================================================

/// Read the raw bytes of an entry's value, inline or from the file.
pub fn read_entry_bytes<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    entry: &IfdEntry,
    tag: TiffTag,
) -> Result<Bytes, TiffError> {
    let total = entry.value_size().ok_or(TiffError::InvalidTagValue {
        tag: tag.name(),
        message: format!("count {} overflows", entry.count),
    })?;

    if entry.is_inline {
        return Ok(Bytes::copy_from_slice(&entry.value_offset[..total as usize]));
    }

    let offset = entry.offset(header);
    if offset.saturating_add(total) > reader.size() {
        return Err(TiffError::InvalidTagValue {
            tag: tag.name(),
            message: format!("{total} bytes at offset {offset} exceed file size"),
        });
    }

    Ok(reader.read_exact_at(offset, total as usize)?)
}

/// Read an integer array (SHORT, LONG, LONG8 or IFD types).
pub fn read_integer_array<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    entry: &IfdEntry,
    tag: TiffTag,
) -> Result<Vec<u64>, TiffError> {
    let order = header.byte_order;
    let step = entry.field_type.size_in_bytes();
    let decode: fn(ByteOrder, &[u8]) -> u64 = match entry.field_type {
        FieldType::Short => |o, b| o.read_u16(b) as u64,
        FieldType::Long | FieldType::Ifd => |o, b| o.read_u32(b) as u64,
        FieldType::Long8 | FieldType::Ifd8 => |o, b| o.read_u64(b),
        other => {
            return Err(TiffError::InvalidTagValue {
                tag: tag.name(),
                message: format!("expected integer array, got {other:?}"),
            })
        }
    };

    let bytes = read_entry_bytes(reader, header, entry, tag)?;
    Ok(bytes.chunks_exact(step).map(|b| decode(order, b)).collect())
}

// =============================================================================
// TiffStructure
// =============================================================================

/// Header plus every IFD reachable through the next-IFD chain.
#[derive(Debug, Clone)]
pub struct TiffStructure {
    pub header: TiffHeader,
    pub ifds: Vec<Ifd>,
}

impl TiffStructure {
    /// Parse the header and walk the IFD chain.
    ///
    /// Stops at a zero offset, at a repeated offset (cyclic chains) or after
    /// `MAX_IFDS` directories.
    pub fn parse<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let size = reader.size();
        let header_len = (BIGTIFF_HEADER_SIZE as u64).min(size) as usize;
        let header_bytes = reader.read_exact_at(0, header_len)?;
        let header = TiffHeader::parse(&header_bytes, size)?;

        let mut ifds = Vec::new();
        let mut visited = HashSet::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && ifds.len() < MAX_IFDS && visited.insert(offset) {
            if offset >= size {
                return Err(TiffError::InvalidIfdOffset(offset));
            }

            let count_bytes = reader.read_exact_at(offset, header.ifd_count_size())?;
            let entry_count = if header.is_bigtiff {
                header.byte_order.read_u64(&count_bytes)
            } else {
                header.byte_order.read_u16(&count_bytes) as u64
            };

            // Bounded by the file before anything is allocated
            let ifd_size = Ifd::required_size(entry_count, &header)?;
            if ifd_size as u64 > size - offset {
                return Err(TiffError::FileTooSmall {
                    required: offset.saturating_add(ifd_size as u64),
                    actual: size,
                });
            }
            let ifd_bytes = reader.read_exact_at(offset, ifd_size)?;
            let ifd = Ifd::parse(&ifd_bytes, &header)?;

            offset = ifd.next_ifd_offset;
            ifds.push(ifd);
        }

        Ok(TiffStructure { header, ifds })
    }
}

// =============================================================================
// Tests
// =============================================================================
