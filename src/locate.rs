//! Manifest discovery and slide resolution.
//!
//! Each manifest `<stem>.json` is paired with a slide named `<stem>.<fmt>`
//! found anywhere under the slide root, trying formats in configured order.
//! A format only matches if exactly one file carries that name; duplicates
//! are reported and the next format is tried.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::archive::ARCHIVE_EXTENSION;
use crate::manifest::MANIFEST_EXTENSION;
use crate::pipeline::ExtractJob;

/// Manifests directly under `root`, sorted by path.
pub fn discover_manifests(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut manifests = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let is_manifest = path
            .extension()
            .is_some_and(|ext| ext == MANIFEST_EXTENSION);
        if is_manifest && entry.file_type()?.is_file() {
            manifests.push(path);
        }
    }
    manifests.sort();
    Ok(manifests)
}

/// File name without its final extension.
pub fn manifest_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|stem| stem.to_str())
}

/// Where the archive for `stem` is published.
pub fn output_path(output_root: &Path, stem: &str) -> PathBuf {
    output_root.join(format!("{stem}.{ARCHIVE_EXTENSION}"))
}

/// Every file under a slide root, grouped by file name.
#[derive(Debug, Default)]
pub struct SlideIndex {
    by_name: HashMap<String, Vec<PathBuf>>,
}

impl SlideIndex {
    /// Walk `root` recursively, following symlinks.
    ///
    /// Unreadable entries are logged and skipped.
    pub fn build(root: &Path) -> Self {
        let mut by_name: HashMap<String, Vec<PathBuf>> = HashMap::new();

        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                by_name
                    .entry(name.to_string())
                    .or_default()
                    .push(entry.into_path());
            }
        }

        for paths in by_name.values_mut() {
            paths.sort();
        }

        debug!("Indexed {} file names under {}", by_name.len(), root.display());
        Self { by_name }
    }

    /// Number of distinct file names.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// All files named `<stem>.<format>`.
    pub fn candidates(&self, stem: &str, format: &str) -> &[PathBuf] {
        self.by_name
            .get(&format!("{stem}.{format}"))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First format, in order, with exactly one candidate.
    pub fn resolve(&self, stem: &str, formats: &[String]) -> Option<PathBuf> {
        for format in formats {
            match self.candidates(stem, format) {
                [] => continue,
                [single] => return Some(single.clone()),
                many => {
                    warn!(
                        "Ambiguous slide for {}: {} files named {}.{}, trying next format",
                        stem,
                        many.len(),
                        stem,
                        format
                    );
                }
            }
        }
        None
    }
}

/// Build one job per manifest under `manifest_root`.
///
/// Manifests whose slide cannot be resolved still get a job (with no slide
/// path) so the pipeline reports them as skipped.
pub fn plan_jobs(
    manifest_root: &Path,
    slide_index: &SlideIndex,
    output_root: &Path,
    formats: &[String],
) -> io::Result<Vec<ExtractJob>> {
    let jobs = discover_manifests(manifest_root)?
        .into_iter()
        .filter_map(|manifest_path| {
            let Some(stem) = manifest_stem(&manifest_path).map(str::to_owned) else {
                warn!("Ignoring manifest with non UTF-8 name: {}", manifest_path.display());
                return None;
            };
            let slide_path = slide_index.resolve(&stem, formats);
            Some(ExtractJob::new(
                manifest_path,
                output_path(output_root, &stem),
                slide_path,
            ))
        })
        .collect();
    Ok(jobs)
}
