use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::blob_store::Bucket;
use crate::error::Result;
use crate::library::Library;
use crate::models::AssetKind;

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct OrphanReport {
    /// Files in the uploads/covers directories no record points at.
    pub unreferenced_files: Vec<PathBuf>,
    /// Blobs no record points at.
    pub unreferenced_file_blobs: Vec<String>,
    pub unreferenced_image_blobs: Vec<String>,
}

impl OrphanReport {
    pub fn is_clean(&self) -> bool {
        self.unreferenced_files.is_empty()
            && self.unreferenced_file_blobs.is_empty()
            && self.unreferenced_image_blobs.is_empty()
    }
}

/// Finds leftovers on both sides of the migration. Nothing is deleted.
pub fn scan_orphans(library: &Library) -> Result<OrphanReport> {
    let catalog = library.catalog();

    let mut referenced = HashSet::new();
    for book in catalog.list(None)? {
        for (stored, asset) in [
            (book.file_path.as_deref(), AssetKind::File),
            (book.cover_path.as_deref(), AssetKind::Cover),
        ] {
            let Some(stored) = stored else { continue };
            if let Ok(path) = library.resolve_legacy_path(stored, asset) {
                referenced.insert(normalize(&path));
            }
        }
    }

    let mut report = OrphanReport::default();
    let config = library.config();
    for dir in [config.uploads_path(), config.covers_path()] {
        if !dir.is_dir() {
            log::debug!("skipping missing directory {}", dir.display());
            continue;
        }
        for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_file() && !referenced.contains(&normalize(path)) {
                report.unreferenced_files.push(path.to_path_buf());
            }
        }
    }
    report.unreferenced_files.sort();

    for (bucket, found) in [
        (Bucket::Files, &mut report.unreferenced_file_blobs),
        (Bucket::Images, &mut report.unreferenced_image_blobs),
    ] {
        let used = catalog.referenced_blob_ids(bucket)?;
        let store = match bucket {
            Bucket::Files => library.files(),
            Bucket::Images => library.images(),
        };
        found.extend(store.ids()?.into_iter().filter(|id| !used.contains(id)));
    }

    log::info!(
        "orphan scan: {} files, {} file blobs, {} image blobs",
        report.unreferenced_files.len(),
        report.unreferenced_file_blobs.len(),
        report.unreferenced_image_blobs.len()
    );
    Ok(report)
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
