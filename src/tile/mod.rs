//! Tile encoding.
//!
//! Every patch, whether read from the slide or synthesized as a placeholder,
//! leaves the pipeline as a standalone JPEG produced by [`JpegTileEncoder`].

mod encoder;

pub use encoder::{
    clamp_quality, is_valid_quality, JpegTileEncoder, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY, PLACEHOLDER_COLOR,
};
