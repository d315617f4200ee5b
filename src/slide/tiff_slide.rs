//! Region reader for tiled JPEG TIFF slides (Aperio SVS, pyramidal TIFF).
//!
//! Pyramid levels are the tiled, JPEG-compressed IFDs, ordered largest
//! first. A region read maps the level-0 location into the level's frame,
//! decodes every tile the region touches and copies the overlapping parts
//! onto a white canvas. Pixels outside the level stay white.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use image::{imageops, ImageFormat, Rgb, RgbImage};
use lru::LruCache;
use tracing::debug;

use crate::error::{RegionError, SlideError, TiffError};
use crate::format::jpeg::prepare_tile_jpeg;
use crate::format::tiff::{
    read_entry_bytes, read_integer_array, Ifd, TiffHeader, TiffStructure, TiffTag,
    COMPRESSION_JPEG,
};
use crate::io::{LocalFileReader, RangeReader};

use super::reader::{RegionReader, SlideOpener};

/// Default number of decoded tiles kept per slide.
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 64;

/// Background for pixels outside the level.
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

// =============================================================================
// TiffLevel
// =============================================================================

/// A single pyramid level with its tile tables loaded.
#[derive(Debug, Clone)]
struct TiffLevel {
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    tiles_x: u32,
    tile_offsets: Vec<u64>,
    tile_byte_counts: Vec<u64>,
    jpeg_tables: Option<Bytes>,
    /// Downsample factor relative to level 0
    downsample: f64,
}

impl TiffLevel {
    fn from_ifd<R: RangeReader>(
        reader: &R,
        header: &TiffHeader,
        ifd: &Ifd,
    ) -> Result<Self, TiffError> {
        let width = required_dimension(ifd, header, TiffTag::ImageWidth)?;
        let height = required_dimension(ifd, header, TiffTag::ImageLength)?;
        let tile_width = required_dimension(ifd, header, TiffTag::TileWidth)?;
        let tile_height = required_dimension(ifd, header, TiffTag::TileLength)?;

        let tiles_x = width.div_ceil(tile_width);
        let tiles_y = height.div_ceil(tile_height);
        let tile_count = tiles_x as usize * tiles_y as usize;

        let tile_offsets = tile_table(reader, header, ifd, TiffTag::TileOffsets, tile_count)?;
        let tile_byte_counts =
            tile_table(reader, header, ifd, TiffTag::TileByteCounts, tile_count)?;

        let jpeg_tables = ifd
            .entry(TiffTag::JpegTables)
            .map(|entry| read_entry_bytes(reader, header, entry, TiffTag::JpegTables))
            .transpose()?;

        Ok(TiffLevel {
            width,
            height,
            tile_width,
            tile_height,
            tiles_x,
            tile_offsets,
            tile_byte_counts,
            jpeg_tables,
            downsample: 1.0,
        })
    }
}

fn required_dimension(ifd: &Ifd, header: &TiffHeader, tag: TiffTag) -> Result<u32, TiffError> {
    match ifd.integer(tag, header.byte_order) {
        Some(value) if value > 0 && value <= u32::MAX as u64 => Ok(value as u32),
        Some(value) => Err(TiffError::InvalidTagValue {
            tag: tag.name(),
            message: format!("{value} is not a valid dimension"),
        }),
        None => Err(TiffError::InvalidTagValue {
            tag: tag.name(),
            message: "missing or not a single integer".to_string(),
        }),
    }
}

fn tile_table<R: RangeReader>(
    reader: &R,
    header: &TiffHeader,
    ifd: &Ifd,
    tag: TiffTag,
    tile_count: usize,
) -> Result<Vec<u64>, TiffError> {
    let entry = ifd.entry(tag).ok_or(TiffError::InvalidTagValue {
        tag: tag.name(),
        message: "missing".to_string(),
    })?;

    let values = read_integer_array(reader, header, entry, tag)?;
    if values.len() < tile_count {
        return Err(TiffError::InvalidTagValue {
            tag: tag.name(),
            message: format!("{} entries for {} tiles", values.len(), tile_count),
        });
    }
    Ok(values)
}

// =============================================================================
// TiffSlide
// =============================================================================

/// An open tiled TIFF slide.
pub struct TiffSlide<R: RangeReader> {
    reader: R,
    levels: Vec<TiffLevel>,
    /// Decoded tiles keyed by (level, tile index)
    cache: LruCache<(usize, usize), Arc<RgbImage>>,
}

impl<R: RangeReader> TiffSlide<R> {
    /// Parse the slide structure and load tile tables for every level.
    pub fn open(reader: R, tile_cache_capacity: usize) -> Result<Self, SlideError> {
        let structure = TiffStructure::parse(&reader)?;
        let header = structure.header;

        let mut levels = Vec::new();
        for (index, ifd) in structure.ifds.iter().enumerate() {
            if !ifd.is_tiled() {
                continue;
            }
            let compression = ifd
                .integer(TiffTag::Compression, header.byte_order)
                .unwrap_or(1);
            if compression != COMPRESSION_JPEG as u64 {
                debug!(
                    "Skipping IFD {} of {}: compression {}",
                    index,
                    reader.identifier(),
                    compression
                );
                continue;
            }
            levels.push(TiffLevel::from_ifd(&reader, &header, ifd)?);
        }

        if levels.is_empty() {
            return Err(SlideError::Unsupported {
                reason: format!("{} has no tiled JPEG levels", reader.identifier()),
            });
        }

        levels.sort_by_key(|level| std::cmp::Reverse(level.width as u64 * level.height as u64));
        let base_width = levels[0].width as f64;
        for level in &mut levels {
            level.downsample = base_width / level.width as f64;
        }

        let capacity = NonZeroUsize::new(tile_cache_capacity).unwrap_or(NonZeroUsize::MIN);

        Ok(TiffSlide {
            reader,
            levels,
            cache: LruCache::new(capacity),
        })
    }

    /// Downsample factor of a level relative to level 0.
    pub fn level_downsample(&self, level: usize) -> Option<f64> {
        self.levels.get(level).map(|l| l.downsample)
    }

    /// Tile size of a level.
    pub fn tile_size(&self, level: usize) -> Option<(u32, u32)> {
        self.levels.get(level).map(|l| (l.tile_width, l.tile_height))
    }

    /// Decode one tile, going through the cache.
    fn tile(
        &mut self,
        level: usize,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Arc<RgbImage>, RegionError> {
        let lvl = &self.levels[level];
        let index = tile_y as usize * lvl.tiles_x as usize + tile_x as usize;
        if let Some(tile) = self.cache.get(&(level, index)) {
            return Ok(Arc::clone(tile));
        }

        let offset = lvl.tile_offsets[index];
        let byte_count = lvl.tile_byte_counts[index];
        if byte_count == 0 {
            return Err(RegionError::EmptyTile {
                level,
                tile_x,
                tile_y,
            });
        }

        let raw = self.reader.read_exact_at(offset, byte_count as usize)?;
        let jpeg = prepare_tile_jpeg(lvl.jpeg_tables.as_deref(), &raw);
        let decoded = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .map_err(|e| RegionError::Decode {
                message: e.to_string(),
            })?
            .to_rgb8();

        let tile = Arc::new(decoded);
        self.cache.put((level, index), Arc::clone(&tile));
        Ok(tile)
    }
}

impl<R: RangeReader> RegionReader for TiffSlide<R> {
    fn identifier(&self) -> &str {
        self.reader.identifier()
    }

    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.levels.get(level).map(|l| (l.width, l.height))
    }

    fn read_region(
        &mut self,
        location: (i64, i64),
        level: usize,
        size: (u32, u32),
    ) -> Result<RgbImage, RegionError> {
        let (x, y) = location;
        let (width, height) = size;
        let lvl = self.levels.get(level).ok_or(RegionError::InvalidLevel {
            level,
            level_count: self.levels.len(),
        })?;

        let (level_width, level_height) = (lvl.width as i64, lvl.height as i64);
        let (tile_width, tile_height) = (lvl.tile_width as i64, lvl.tile_height as i64);
        let out_of_bounds = RegionError::OutOfBounds {
            x,
            y,
            width,
            height,
            level,
        };

        let left = (x as f64 / lvl.downsample).floor() as i64;
        let top = (y as f64 / lvl.downsample).floor() as i64;
        let (Some(right), Some(bottom)) = (
            left.checked_add(width as i64),
            top.checked_add(height as i64),
        ) else {
            return Err(out_of_bounds);
        };

        if width == 0
            || height == 0
            || right <= 0
            || bottom <= 0
            || left >= level_width
            || top >= level_height
        {
            return Err(out_of_bounds);
        }

        let mut canvas = RgbImage::from_pixel(width, height, BACKGROUND);

        let first_col = left.max(0) / tile_width;
        let last_col = (right.min(level_width) - 1) / tile_width;
        let first_row = top.max(0) / tile_height;
        let last_row = (bottom.min(level_height) - 1) / tile_height;

        for row in first_row..=last_row {
            for col in first_col..=last_col {
                let tile = self.tile(level, col as u32, row as u32)?;
                let tile_left = col * tile_width;
                let tile_top = row * tile_height;

                // Edge tiles are padded; only the part inside the level counts
                let valid_width = (level_width - tile_left).min(tile.width() as i64) as u32;
                let valid_height = (level_height - tile_top).min(tile.height() as i64) as u32;
                let valid = imageops::crop_imm(tile.as_ref(), 0, 0, valid_width, valid_height);

                imageops::replace(&mut canvas, &*valid, tile_left - left, tile_top - top);
            }
        }

        Ok(canvas)
    }
}

// =============================================================================
// TiffSlideOpener
// =============================================================================

/// Opens local TIFF/SVS files.
#[derive(Debug, Clone)]
pub struct TiffSlideOpener {
    tile_cache_capacity: usize,
}

impl TiffSlideOpener {
    pub fn new() -> Self {
        Self::with_tile_cache(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// Opener whose slides keep `capacity` decoded tiles each.
    pub fn with_tile_cache(capacity: usize) -> Self {
        Self {
            tile_cache_capacity: capacity,
        }
    }
}

impl Default for TiffSlideOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl SlideOpener for TiffSlideOpener {
    type Slide = TiffSlide<LocalFileReader>;

    fn open(&self, path: &Path) -> Result<Self::Slide, SlideError> {
        if !path.exists() {
            return Err(SlideError::NotFound(path.to_path_buf()));
        }
        let reader = LocalFileReader::open(path)?;
        TiffSlide::open(reader, self.tile_cache_capacity)
    }
}
