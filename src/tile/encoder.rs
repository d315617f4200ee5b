//! JPEG tile encoder.
//!
//! Turns RGB patches into standalone JPEG files and produces the white
//! placeholder used for unreadable regions.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageReader, Rgb, RgbImage};

use crate::error::TileError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Fill color of placeholder tiles.
pub const PLACEHOLDER_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

// =============================================================================
// JPEG Encoder
// =============================================================================

/// Encodes patches as JPEG at a fixed quality.
///
/// # Example
///
/// ```ignore
/// use wsi_tilepack::tile::JpegTileEncoder;
///
/// let encoder = JpegTileEncoder::new(80);
/// let placeholder = JpegTileEncoder::placeholder(256);
/// let jpeg = encoder.encode(&placeholder)?;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct JpegTileEncoder {
    quality: u8,
}

impl JpegTileEncoder {
    /// Create an encoder; quality is clamped to 1-100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: clamp_quality(quality),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode an RGB image as a complete JPEG file.
    pub fn encode(&self, image: &RgbImage) -> Result<Vec<u8>, TileError> {
        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, self.quality);

        encoder
            .encode_image(image)
            .map_err(|e| TileError::EncodeError {
                message: e.to_string(),
            })?;

        Ok(output)
    }

    /// Opaque white square of `size × size` pixels.
    pub fn placeholder(size: u32) -> RgbImage {
        RgbImage::from_pixel(size, size, PLACEHOLDER_COLOR)
    }

    /// Get JPEG dimensions without fully decoding.
    pub fn dimensions(&self, source: &[u8]) -> Result<(u32, u32), TileError> {
        let reader = ImageReader::with_format(Cursor::new(source), image::ImageFormat::Jpeg);

        reader.into_dimensions().map_err(|e| TileError::DecodeError {
            message: e.to_string(),
        })
    }

    /// Fully decode a JPEG blob to RGB.
    pub fn decode(&self, source: &[u8]) -> Result<RgbImage, TileError> {
        let reader = ImageReader::with_format(Cursor::new(source), image::ImageFormat::Jpeg);

        let img = reader.decode().map_err(|e| TileError::DecodeError {
            message: e.to_string(),
        })?;

        Ok(img.to_rgb8())
    }
}

impl Default for JpegTileEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
