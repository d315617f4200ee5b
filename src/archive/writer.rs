use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;

use super::{
    ArchiveCompression, SlotEntry, FOOTER_MAGIC, FORMAT_VERSION, HEADER_MAGIC, HEADER_SIZE,
};
use crate::error::ArchiveError;

/// Writes a fixed-size archive slot by slot.
///
/// Slots may be written in any order, but each exactly once; [`finish`]
/// refuses to seal an archive with empty slots.
///
/// [`finish`]: ArchiveWriter::finish
pub struct ArchiveWriter {
    path: PathBuf,
    file: BufWriter<File>,
    compression: ArchiveCompression,
    slots: Vec<Option<SlotEntry>>,
    written: usize,
    position: u64,
}

impl ArchiveWriter {
    /// Create (or truncate) the file at `path` with `slot_count` empty slots.
    pub fn create(
        path: &Path,
        slot_count: usize,
        compression: ArchiveCompression,
    ) -> Result<Self, ArchiveError> {
        let mut file = BufWriter::new(File::create(path)?);

        file.write_all(HEADER_MAGIC)?;
        file.write_all(&FORMAT_VERSION.to_le_bytes())?;
        file.write_all(&[compression.codec(), compression.level()])?;
        file.write_all(&0u32.to_le_bytes())?;
        file.write_all(&(slot_count as u64).to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            compression,
            slots: vec![None; slot_count],
            written: 0,
            position: HEADER_SIZE,
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

    /// Number of slots written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Store `blob` in slot `index`.
    pub fn write(&mut self, index: usize, blob: &[u8]) -> Result<(), ArchiveError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(ArchiveError::SlotOutOfRange { index, len })?;
        if slot.is_some() {
            return Err(ArchiveError::SlotAlreadyWritten(index));
        }

        let stored = match self.compression {
            ArchiveCompression::None => blob.to_vec(),
            ArchiveCompression::Zlib { level } => {
                let mut encoder = ZlibEncoder::new(
                    Vec::with_capacity(blob.len()),
                    flate2::Compression::new(level),
                );
                encoder.write_all(blob)?;
                encoder.finish()?
            }
        };

        self.file.write_all(&stored)?;
        *slot = Some(SlotEntry {
            offset: self.position,
            stored_len: stored.len() as u64,
            raw_len: blob.len() as u64,
        });
        self.position += stored.len() as u64;
        self.written += 1;

        Ok(())
    }

    /// Write the index and footer, flush and sync to disk.
    ///
    /// The file is closed when this returns.
    pub fn finish(mut self) -> Result<(), ArchiveError> {
        let entries: Vec<SlotEntry> = self.slots.iter().flatten().copied().collect();
        if entries.len() != self.slots.len() {
            return Err(ArchiveError::Incomplete {
                written: entries.len(),
                expected: self.slots.len(),
            });
        }

        let index_offset = self.position;
        for entry in &entries {
            self.file.write_all(&entry.to_bytes())?;
        }
        self.file.write_all(&index_offset.to_le_bytes())?;
        self.file.write_all(FOOTER_MAGIC)?;

        let file = self.file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(())
    }
}
