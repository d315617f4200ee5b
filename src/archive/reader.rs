use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;

use super::{
    ArchiveCompression, SlotEntry, FOOTER_MAGIC, FOOTER_SIZE, FORMAT_VERSION, HEADER_MAGIC,
    HEADER_SIZE, INDEX_ENTRY_SIZE,
};
use crate::error::ArchiveError;

/// A published tile archive opened for reading.
pub struct TileArchive {
    path: PathBuf,
    file: File,
    compression: ArchiveCompression,
    slots: Vec<SlotEntry>,
}

impl TileArchive {
    /// Open and validate an archive.
    ///
    /// Fails with [`ArchiveError::Corrupt`] if the header, footer or index
    /// are inconsistent with the file size.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE + FOOTER_SIZE {
            return Err(ArchiveError::Corrupt(format!(
                "{} bytes is too small for an archive",
                file_len
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        if &header[0..8] != HEADER_MAGIC {
            return Err(ArchiveError::Corrupt("bad header magic".to_string()));
        }
        let version = u16::from_le_bytes([header[8], header[9]]);
        if version != FORMAT_VERSION {
            return Err(ArchiveError::Corrupt(format!(
                "unsupported version {version}"
            )));
        }
        let compression = ArchiveCompression::from_header(header[10], header[11])?;
        let slot_count = read_u64(&header[16..24]);

        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.seek(SeekFrom::Start(file_len - FOOTER_SIZE))?;
        file.read_exact(&mut footer)?;
        if &footer[8..16] != FOOTER_MAGIC {
            return Err(ArchiveError::Corrupt(
                "missing footer (archive was not finished)".to_string(),
            ));
        }
        let index_offset = read_u64(&footer[0..8]);

        let index_len = slot_count
            .checked_mul(INDEX_ENTRY_SIZE)
            .ok_or_else(|| ArchiveError::Corrupt("slot count overflows".to_string()))?;
        if index_offset < HEADER_SIZE
            || index_offset.checked_add(index_len) != Some(file_len - FOOTER_SIZE)
        {
            return Err(ArchiveError::Corrupt(format!(
                "index of {slot_count} slots at {index_offset} does not fit file of {file_len} bytes"
            )));
        }

        let mut index = vec![0u8; index_len as usize];
        file.seek(SeekFrom::Start(index_offset))?;
        file.read_exact(&mut index)?;

        let slots: Vec<SlotEntry> = index
            .chunks_exact(INDEX_ENTRY_SIZE as usize)
            .map(SlotEntry::from_bytes)
            .collect();

        if let Some((i, _)) = slots.iter().enumerate().find(|(_, s)| {
            s.offset < HEADER_SIZE || s.offset.saturating_add(s.stored_len) > index_offset
        }) {
            return Err(ArchiveError::Corrupt(format!(
                "slot {i} points outside the blob section"
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            compression,
            slots,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn compression(&self) -> ArchiveCompression {
        self.compression
    }

    /// Read and decompress the blob in slot `index`.
    pub fn read(&mut self, index: usize) -> Result<Vec<u8>, ArchiveError> {
        let slot = *self.slots.get(index).ok_or(ArchiveError::SlotOutOfRange {
            index,
            len: self.slots.len(),
        })?;

        let mut stored = vec![0u8; slot.stored_len as usize];
        self.file.seek(SeekFrom::Start(slot.offset))?;
        self.file.read_exact(&mut stored)?;

        let blob = match self.compression {
            ArchiveCompression::None => stored,
            ArchiveCompression::Zlib { .. } => {
                // raw_len comes from the file: bound both the buffer and the
                // decoder output by what the stored bytes can hold
                let capacity = slot.raw_len.min(slot.stored_len.saturating_mul(4));
                let mut blob = Vec::with_capacity(capacity as usize);
                ZlibDecoder::new(stored.as_slice())
                    .take(slot.raw_len.saturating_add(1))
                    .read_to_end(&mut blob)?;
                blob
            }
        };

        if blob.len() as u64 != slot.raw_len {
            return Err(ArchiveError::Corrupt(format!(
                "slot {index} decoded to {} bytes, expected {}",
                blob.len(),
                slot.raw_len
            )));
        }

        Ok(blob)
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
