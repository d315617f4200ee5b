use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use bytes::Bytes;

use super::RangeReader;
use crate::error::IoError;

/// Local-file implementation of RangeReader.
///
/// The file size is read once on open. Reads seek and fill a fresh buffer;
/// the mutex serializes the shared file cursor.
pub struct LocalFileReader {
    file: Mutex<File>,
    size: u64,
    identifier: String,
}

impl LocalFileReader {
    /// Open a file for positioned reads.
    pub fn open(path: &Path) -> Result<Self, IoError> {
        let identifier = path.display().to_string();

        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IoError::NotFound(identifier.clone())
            } else {
                IoError::File {
                    path: identifier.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let size = file
            .metadata()
            .map_err(|e| IoError::File {
                path: identifier.clone(),
                message: e.to_string(),
            })?
            .len();

        Ok(Self {
            file: Mutex::new(file),
            size,
            identifier,
        })
    }

    fn file_error(&self, message: impl ToString) -> IoError {
        IoError::File {
            path: self.identifier.clone(),
            message: message.to_string(),
        }
    }
}

impl RangeReader for LocalFileReader {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let end = offset.checked_add(len as u64);
        if end.map_or(true, |end| end > self.size) {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }

        let mut file = self
            .file
            .lock()
            .map_err(|_| self.file_error("file handle poisoned"))?;

        let mut buf = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| self.file_error(e))?;
        file.read_exact(&mut buf).map_err(|e| self.file_error(e))?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
