//! JPEG stream helpers.
//!
//! Aperio SVS files store "abbreviated" JPEG tiles: the quantization (DQT)
//! and Huffman (DHT) tables are kept once in the IFD's `JPEGTables` tag and
//! each tile only carries the scan. Such tiles must be spliced with the
//! tables before any standard decoder accepts them:
//!
//! ```text
//! tables:  SOI  DQT DHT ...  EOI
//! tile:    SOI  SOF SOS scan EOI
//! merged:  SOI  DQT DHT ...  SOF SOS scan EOI
//! ```

use bytes::{Bytes, BytesMut};

/// Start Of Image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End Of Image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Define Quantization Table marker
const DQT: [u8; 2] = [0xFF, 0xDB];

/// Whether `data` looks like a whole JPEG file (SOI ... EOI).
pub fn is_jpeg_stream(data: &[u8]) -> bool {
    data.len() >= 4 && data[..2] == SOI && data[data.len() - 2..] == EOI
}

/// Whether the stream carries its own quantization tables.
pub fn has_quantization_tables(data: &[u8]) -> bool {
    data.len() >= 4 && data[..2] == SOI && data.windows(2).skip(2).any(|w| w == DQT)
}

/// Merge JPEGTables with abbreviated tile data.
///
/// The trailing EOI of the tables and the leading SOI of the tile are
/// dropped so that the result is a single well-formed stream.
pub fn merge_jpeg_tables(tables: &[u8], tile_data: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile_data);
    }
    if tile_data.is_empty() {
        return Bytes::new();
    }

    let tables_end = if tables.len() >= 2 && tables[tables.len() - 2..] == EOI {
        tables.len() - 2
    } else {
        tables.len()
    };
    let tile_start = if tile_data.len() >= 2 && tile_data[..2] == SOI {
        2
    } else {
        0
    };

    let mut merged = BytesMut::with_capacity(tables_end + tile_data.len() - tile_start);
    merged.extend_from_slice(&tables[..tables_end]);
    merged.extend_from_slice(&tile_data[tile_start..]);
    merged.freeze()
}

/// Produce a decodable stream for a raw tile, merging tables when the tile
/// lacks its own.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile_data: &[u8]) -> Bytes {
    match tables {
        Some(tables) if !has_quantization_tables(tile_data) => {
            merge_jpeg_tables(tables, tile_data)
        }
        _ => Bytes::copy_from_slice(tile_data),
    }
}
