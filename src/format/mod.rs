//! Format parsers for Whole Slide Image files.
//!
//! Only what the region reader needs: TIFF/BigTIFF structure parsing and
//! JPEG stream preparation for abbreviated (SVS-style) tiles.

pub mod jpeg;
pub mod tiff;

pub use jpeg::{is_jpeg_stream, merge_jpeg_tables, prepare_tile_jpeg};
pub use tiff::{ByteOrder, Ifd, IfdEntry, TiffHeader, TiffStructure, TiffTag};
