use serde::{Serialize, Serializer};

use crate::blob_store::{self, BlobStore};
use crate::catalog::MigratedAssets;
use crate::db;
use crate::error::{LibraryError, Result};
use crate::library::Library;
use crate::models::{AssetKind, Book};
use crate::preview;

#[derive(Debug, Serialize)]
pub struct AssetFailure {
    pub book_id: String,
    pub title: String,
    /// None when the assets were stored but the record update failed.
    pub asset: Option<AssetKind>,
    #[serde(serialize_with = "error_string")]
    pub error: LibraryError,
}

#[derive(Debug, Serialize, Default)]
pub struct MigrationReport {
    pub selected: usize,
    pub records_updated: usize,
    pub files_migrated: usize,
    pub covers_migrated: usize,
    pub untouched: usize,
    pub failures: Vec<AssetFailure>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VerificationFailure {
    pub book_id: String,
    pub title: String,
    pub asset: Option<AssetKind>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct VerificationReport {
    pub checked: usize,
    pub verified: usize,
    pub failures: Vec<VerificationFailure>,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct CleanupReport {
    pub stripped: usize,
    /// Records still carrying a legacy path because they are unverified or not fully migrated.
    pub remaining_legacy: i64,
}

fn error_string<S: Serializer>(error: &LibraryError, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

struct StoredAsset {
    id: String,
    bytes: Vec<u8>,
    filename: String,
}

/// Moves legacy on-disk assets into the blob store, proves the copies, then drops the old paths.
pub struct Migrator<'a> {
    library: &'a Library,
}

impl<'a> Migrator<'a> {
    pub fn new(library: &'a Library) -> Self {
        Self { library }
    }

    fn store_for(&self, asset: AssetKind) -> BlobStore<'a> {
        match asset {
            AssetKind::File => self.library.files(),
            AssetKind::Cover => self.library.images(),
        }
    }

    /// Copies every legacy asset lacking a blob. Per-asset failures are reported, never fatal.
    pub fn migrate(&self) -> Result<MigrationReport> {
        let candidates = self.library.catalog().legacy_candidates()?;
        let mut report = MigrationReport {
            selected: candidates.len(),
            ..MigrationReport::default()
        };
        log::info!("{} records selected for migration", candidates.len());

        for book in candidates {
            self.migrate_book(&book, &mut report);
        }

        log::info!(
            "migration finished: {} files, {} covers, {} failures",
            report.files_migrated,
            report.covers_migrated,
            report.failures.len()
        );
        Ok(report)
    }

    fn migrate_book(&self, book: &Book, report: &mut MigrationReport) {
        let mut assets = MigratedAssets::default();
        let mut stored = Vec::new();

        if let (Some(path), None) = (book.file_path.as_deref(), book.file_id.as_ref()) {
            match self.store_legacy(path, AssetKind::File) {
                Ok(asset) => {
                    assets.preview = Some(preview::preview_or_placeholder(
                        &asset.bytes,
                        &asset.filename,
                        self.library.config().preview_max_chars,
                    ));
                    assets.file_id = Some(asset.id.clone());
                    stored.push((AssetKind::File, asset.id));
                }
                Err(err) => push_failure(report, book, Some(AssetKind::File), err),
            }
        }

        if let (Some(path), None) = (book.cover_path.as_deref(), book.cover_id.as_ref()) {
            match self.store_legacy(path, AssetKind::Cover) {
                Ok(asset) => {
                    assets.cover_id = Some(asset.id.clone());
                    stored.push((AssetKind::Cover, asset.id));
                }
                Err(err) => push_failure(report, book, Some(AssetKind::Cover), err),
            }
        }

        if assets.is_empty() {
            report.untouched += 1;
            return;
        }

        match self.library.catalog().attach_migrated_assets(&book.id, &assets) {
            Ok(()) => {
                report.records_updated += 1;
                for (asset, _) in &stored {
                    match asset {
                        AssetKind::File => report.files_migrated += 1,
                        AssetKind::Cover => report.covers_migrated += 1,
                    }
                    log::info!("migrated {} for '{}'", asset, book.title);
                }
            }
            Err(err) => {
                for (asset, id) in &stored {
                    if let Err(cleanup) = self.store_for(*asset).delete(id) {
                        log::warn!("could not discard blob {}: {}", id, cleanup);
                    }
                }
                push_failure(report, book, None, err);
            }
        }
    }

    fn store_legacy(&self, stored: &str, asset: AssetKind) -> Result<StoredAsset> {
        let path = self.library.resolve_legacy_path(stored, asset)?;
        let bytes = std::fs::read(&path)?;
        let filename = path
            .file_name()
            .map(|value| value.to_string_lossy().to_string())
            .unwrap_or_else(|| stored.to_string());
        let id = self.store_for(asset).put(&bytes, &filename, None)?;
        Ok(StoredAsset {
            id,
            bytes,
            filename,
        })
    }

    /// Reads blobs back and compares checksums; records that pass are stamped verified.
    pub fn verify(&self, sample: Option<usize>) -> Result<VerificationReport> {
        let catalog = self.library.catalog();
        let books = catalog.blob_backed(sample)?;
        let mut report = VerificationReport::default();

        for book in books {
            report.checked += 1;
            let mut problems: Vec<(Option<AssetKind>, String)> = Vec::new();

            if !book.legacy_assets_backed() {
                problems.push((None, "legacy asset without a blob".to_string()));
            }
            for (id, legacy, asset) in [
                (book.file_id.as_deref(), book.file_path.as_deref(), AssetKind::File),
                (book.cover_id.as_deref(), book.cover_path.as_deref(), AssetKind::Cover),
            ] {
                let Some(id) = id else { continue };
                if let Err(reason) = self.check_blob(id, legacy, asset) {
                    problems.push((Some(asset), reason));
                }
            }

            if problems.is_empty() {
                catalog.mark_verified(&book.id, db::now_millis())?;
                report.verified += 1;
                log::debug!("verified '{}'", book.title);
                continue;
            }
            // A record that fails now must not keep an earlier stamp
            catalog.clear_verified(&book.id)?;
            for (asset, reason) in problems {
                log::warn!("verification failed for '{}': {}", book.title, reason);
                report.failures.push(VerificationFailure {
                    book_id: book.id.clone(),
                    title: book.title.clone(),
                    asset,
                    reason,
                });
            }
        }

        log::info!(
            "verification: {} of {} records verified",
            report.verified,
            report.checked
        );
        Ok(report)
    }

    fn check_blob(&self, id: &str, legacy: Option<&str>, asset: AssetKind) -> std::result::Result<(), String> {
        let blob = self
            .store_for(asset)
            .get(id)
            .map_err(|err| err.to_string())?;
        let actual = blob_store::checksum(&blob.bytes);
        if actual != blob.meta.checksum {
            return Err(format!("checksum mismatch for blob {}", id));
        }

        // The legacy file may already be gone; only compare when it is still there.
        let Some(stored) = legacy else { return Ok(()) };
        let Ok(path) = self.library.resolve_legacy_path(stored, asset) else {
            return Ok(());
        };
        let on_disk = blob_store::checksum_file(&path).map_err(|err| err.to_string())?;
        if on_disk != actual {
            return Err(format!("blob {} differs from {}", id, path.display()));
        }
        Ok(())
    }

    /// Drops legacy paths from verified, fully blob-backed records only.
    pub fn cleanup(&self) -> Result<CleanupReport> {
        let catalog = self.library.catalog();
        let stripped = catalog.strip_verified_legacy_paths()?;
        let remaining_legacy = catalog.count_with_legacy_paths()?;
        log::info!("cleared legacy paths from {} records", stripped);
        if remaining_legacy > 0 {
            log::warn!(
                "{} records keep legacy paths until they are migrated and verified",
                remaining_legacy
            );
        }
        Ok(CleanupReport {
            stripped,
            remaining_legacy,
        })
    }
}

fn push_failure(report: &mut MigrationReport, book: &Book, asset: Option<AssetKind>, error: LibraryError) {
    match asset {
        Some(asset) => log::error!("failed to migrate {} for '{}': {}", asset, book.title, error),
        None => log::error!("failed to update '{}' after migration: {}", book.title, error),
    }
    report.failures.push(AssetFailure {
        book_id: book.id.clone(),
        title: book.title.clone(),
        asset,
        error,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;
    use crate::models::{BookDetails, NewBook};
    use crate::preview::PLACEHOLDER_UNAVAILABLE;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Library) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("uploads")).unwrap();
        fs::create_dir_all(dir.path().join("covers")).unwrap();
        let library = Library::open_in_memory(LibraryConfig {
            legacy_root: dir.path().to_path_buf(),
            ..LibraryConfig::default()
        })
        .unwrap();
        (dir, library)
    }

    fn legacy_book(library: &Library, title: &str, file: Option<&str>, cover: Option<&str>) -> Book {
        library
            .catalog()
            .insert(&NewBook {
                details: BookDetails {
                    title: title.to_string(),
                    ..BookDetails::default()
                },
                file_path: file.map(str::to_string),
                cover_path: cover.map(str::to_string),
                ..NewBook::default()
            })
            .unwrap()
    }

    #[test]
    fn text_file_moves_into_files_bucket() {
        let (dir, library) = setup();
        fs::write(dir.path().join("uploads").join("a.txt"), b"hello world").unwrap();
        let book = legacy_book(&library, "A", Some("uploads/a.txt"), None);

        let report = Migrator::new(&library).migrate().unwrap();
        assert_eq!(report.selected, 1);
        assert_eq!(report.files_migrated, 1);
        assert!(report.failures.is_empty());

        let migrated = library.catalog().get(&book.id).unwrap();
        let blob = library.files().get(migrated.file_id.as_deref().unwrap()).unwrap();
        assert_eq!(blob.bytes, b"hello world");
        assert_eq!(blob.meta.filename, "a.txt");
        assert_eq!(migrated.preview.as_deref(), Some("hello world"));
        assert_eq!(migrated.cover_id, None);
        assert_eq!(migrated.file_path.as_deref(), Some("uploads/a.txt"));
    }

    #[test]
    fn missing_file_is_reported_and_batch_continues() {
        let (dir, library) = setup();
        fs::write(dir.path().join("uploads").join("ok.txt"), b"fine").unwrap();
        let missing = legacy_book(&library, "Missing", Some("uploads/missing.pdf"), None);
        let present = legacy_book(&library, "Present", Some("uploads/ok.txt"), None);

        let report = Migrator::new(&library).migrate().unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].book_id, missing.id);
        assert_eq!(report.failures[0].asset, Some(AssetKind::File));
        assert!(matches!(report.failures[0].error, LibraryError::AssetMissing(_)));
        assert_eq!(report.untouched, 1);

        assert_eq!(library.catalog().get(&missing.id).unwrap(), missing);
        assert!(library.catalog().get(&present.id).unwrap().file_id.is_some());
    }

    #[test]
    fn cover_goes_to_images_bucket_even_when_file_fails() {
        let (dir, library) = setup();
        fs::write(dir.path().join("covers").join("c.png"), b"png").unwrap();
        let book = legacy_book(&library, "Half", Some("uploads/gone.epub"), Some("covers/c.png"));

        let report = Migrator::new(&library).migrate().unwrap();
        assert_eq!(report.covers_migrated, 1);
        assert_eq!(report.failures.len(), 1);

        let migrated = library.catalog().get(&book.id).unwrap();
        assert!(migrated.file_id.is_none());
        let cover = library.images().get(migrated.cover_id.as_deref().unwrap()).unwrap();
        assert_eq!(cover.bytes, b"png");
        assert_eq!(cover.meta.content_type, "image/png");
        assert_eq!(library.files().stats().unwrap().count, 0);
    }

    #[test]
    fn rerun_does_not_duplicate_blobs() {
        let (dir, library) = setup();
        fs::write(dir.path().join("uploads").join("a.txt"), b"once").unwrap();
        legacy_book(&library, "A", Some("uploads/a.txt"), None);
        let migrator = Migrator::new(&library);

        migrator.migrate().unwrap();
        let again = migrator.migrate().unwrap();

        assert_eq!(again.selected, 0);
        assert_eq!(library.files().stats().unwrap().count, 1);
    }

    #[test]
    fn corrupt_document_gets_placeholder_preview() {
        let (dir, library) = setup();
        fs::write(dir.path().join("uploads").join("bad.docx"), b"not a zip").unwrap();
        let book = legacy_book(&library, "Bad", Some("uploads/bad.docx"), None);

        Migrator::new(&library).migrate().unwrap();
        assert_eq!(
            library.catalog().get(&book.id).unwrap().preview.as_deref(),
            Some(PLACEHOLDER_UNAVAILABLE)
        );
    }

    #[test]
    fn verify_stamps_intact_records() {
        let (dir, library) = setup();
        fs::write(dir.path().join("uploads").join("a.txt"), b"intact").unwrap();
        let book = legacy_book(&library, "A", Some("uploads/a.txt"), None);
        let migrator = Migrator::new(&library);
        migrator.migrate().unwrap();

        let report = migrator.verify(None).unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.verified, 1);
        assert!(library
            .catalog()
            .get(&book.id)
            .unwrap()
            .migration_verified_at
            .is_some());
    }

    #[test]
    fn verify_flags_missing_blob_and_changed_source() {
        let (dir, library) = setup();
        fs::write(dir.path().join("uploads").join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("uploads").join("b.txt"), b"b").unwrap();
        let lost = legacy_book(&library, "Lost", Some("uploads/a.txt"), None);
        let drifted = legacy_book(&library, "Drifted", Some("uploads/b.txt"), None);
        let migrator = Migrator::new(&library);
        migrator.migrate().unwrap();

        let lost_blob = library.catalog().get(&lost.id).unwrap().file_id.unwrap();
        library.files().delete(&lost_blob).unwrap();
        fs::write(dir.path().join("uploads").join("b.txt"), b"edited").unwrap();

        let report = migrator.verify(None).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.verified, 0);
        let failed: Vec<_> = report.failures.iter().map(|f| f.book_id.as_str()).collect();
        assert!(failed.contains(&lost.id.as_str()));
        assert!(failed.contains(&drifted.id.as_str()));
        assert!(library.catalog().get(&lost.id).unwrap().migration_verified_at.is_none());
    }

    #[test]
    fn verify_respects_sample_size() {
        let (dir, library) = setup();
        for name in ["a", "b", "c"] {
            let file = format!("{}.txt", name);
            fs::write(dir.path().join("uploads").join(&file), name.as_bytes()).unwrap();
            legacy_book(&library, name, Some(&format!("uploads/{}", file)), None);
        }
        let migrator = Migrator::new(&library);
        migrator.migrate().unwrap();

        assert_eq!(migrator.verify(Some(2)).unwrap().checked, 2);
    }

    #[test]
    fn cleanup_only_strips_verified_records() {
        let (dir, library) = setup();
        fs::write(dir.path().join("uploads").join("a.txt"), b"a").unwrap();
        let done = legacy_book(&library, "Done", Some("uploads/a.txt"), None);
        let pending = legacy_book(&library, "Pending", Some("uploads/missing.pdf"), None);
        let migrator = Migrator::new(&library);
        migrator.migrate().unwrap();

        // Nothing verified yet
        assert_eq!(migrator.cleanup().unwrap().stripped, 0);

        migrator.verify(None).unwrap();
        let report = migrator.cleanup().unwrap();
        assert_eq!(report.stripped, 1);
        assert_eq!(report.remaining_legacy, 1);

        let done = library.catalog().get(&done.id).unwrap();
        assert!(done.file_path.is_none());
        assert!(done.file_id.is_some());
        assert_eq!(
            library.catalog().get(&pending.id).unwrap().file_path.as_deref(),
            Some("uploads/missing.pdf")
        );
    }

    #[test]
    fn failed_reverification_keeps_legacy_path() {
        let (dir, library) = setup();
        fs::write(dir.path().join("uploads").join("a.txt"), b"a").unwrap();
        let book = legacy_book(&library, "A", Some("uploads/a.txt"), None);
        let migrator = Migrator::new(&library);
        migrator.migrate().unwrap();
        assert_eq!(migrator.verify(None).unwrap().verified, 1);

        let file_id = library.catalog().get(&book.id).unwrap().file_id.unwrap();
        library.files().delete(&file_id).unwrap();
        let report = migrator.verify(None).unwrap();
        assert_eq!(report.verified, 0);
        assert!(library.catalog().get(&book.id).unwrap().migration_verified_at.is_none());

        assert_eq!(migrator.cleanup().unwrap().stripped, 0);
        assert_eq!(
            library.catalog().get(&book.id).unwrap().file_path.as_deref(),
            Some("uploads/a.txt")
        );
        assert_eq!(library.book_file(&book.id).unwrap().bytes, b"a");
    }

    #[test]
    fn failed_record_write_discards_stored_blobs() {
        let (dir, library) = setup();
        fs::write(dir.path().join("uploads").join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("covers").join("a.png"), b"png").unwrap();
        legacy_book(&library, "A", Some("uploads/a.txt"), Some("covers/a.png"));
        library
            .connection()
            .execute_batch(
                "CREATE TRIGGER reject_updates BEFORE UPDATE ON books
                 BEGIN SELECT RAISE(ABORT, 'read only'); END;",
            )
            .unwrap();

        let report = Migrator::new(&library).migrate().unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].asset, None);
        assert_eq!(report.records_updated, 0);
        assert_eq!(report.files_migrated, 0);
        assert_eq!(library.files().stats().unwrap().count, 0);
        assert_eq!(library.images().stats().unwrap().count, 0);
    }

    #[test]
    fn report_serializes_errors_as_text() {
        let (_dir, library) = setup();
        legacy_book(&library, "Missing", Some("uploads/missing.pdf"), None);

        let report = Migrator::new(&library).migrate().unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failures"][0]["asset"], "file");
        assert!(json["failures"][0]["error"]
            .as_str()
            .unwrap()
            .contains("missing.pdf"));
    }
}
