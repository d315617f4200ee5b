//! Coordinate manifests.
//!
//! A manifest lists the level-0 top-left corners of the patches to extract
//! from one slide, together with the pyramid level and patch size shared by
//! every patch:
//!
//! ```json
//! {
//!   "coords": {
//!     "attrs": { "patch_level": 0, "patch_size": 256 },
//!     "data": [[0, 0], [256, 0], [0, 256]]
//!   }
//! }
//! ```
//!
//! Manifests are read once and never modified.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ManifestError;

/// File extension of manifests.
pub const MANIFEST_EXTENSION: &str = "json";

/// Largest accepted `patch_size`. A patch is decoded into an RGB buffer of
/// `patch_size² × 3` bytes, so this caps one tile at 192 MiB.
pub const MAX_PATCH_SIZE: u32 = 8192;

#[derive(Debug, Deserialize)]
struct ManifestDocument {
    coords: CoordsTable,
}

#[derive(Debug, Deserialize)]
struct CoordsTable {
    attrs: CoordsAttrs,
    data: Vec<(i64, i64)>,
}

#[derive(Debug, Deserialize)]
struct CoordsAttrs {
    patch_level: usize,
    patch_size: u32,
}

/// An opened coordinate manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    coords: Vec<(i64, i64)>,
    patch_level: usize,
    patch_size: u32,
}

impl Manifest {
    /// Read and validate the manifest at `path`.
    pub fn open(path: &Path) -> Result<Self, ManifestError> {
        let bytes = fs::read(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_slice(path, &bytes)
    }

    /// Parse manifest bytes; `path` is only used for error reporting.
    pub fn from_slice(path: &Path, bytes: &[u8]) -> Result<Self, ManifestError> {
        let document: ManifestDocument =
            serde_json::from_slice(bytes).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let CoordsTable { attrs, data } = document.coords;

        if attrs.patch_size == 0 {
            return Err(ManifestError::InvalidAttribute {
                path: path.to_path_buf(),
                name: "patch_size",
                message: "must be positive".to_string(),
            });
        }
        if attrs.patch_size > MAX_PATCH_SIZE {
            return Err(ManifestError::InvalidAttribute {
                path: path.to_path_buf(),
                name: "patch_size",
                message: format!("{} exceeds {}", attrs.patch_size, MAX_PATCH_SIZE),
            });
        }

        Ok(Manifest {
            path: path.to_path_buf(),
            coords: data,
            patch_level: attrs.patch_level,
            patch_size: attrs.patch_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Coordinates in manifest order.
    pub fn coords(&self) -> &[(i64, i64)] {
        &self.coords
    }

    pub fn patch_level(&self) -> usize {
        self.patch_level
    }

    /// Side length of every patch, in pixels of `patch_level`.
    pub fn patch_size(&self) -> u32 {
        self.patch_size
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}
