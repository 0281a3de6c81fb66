use regex::Regex;
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::activity::{day_bounds, Activity};
use crate::blob_store::{Blob, BlobStore, Bucket, BucketStats};
use crate::catalog::Catalog;
use crate::config::LibraryConfig;
use crate::db;
use crate::error::{LibraryError, Result};
use crate::models::{AssetKind, Book, BookDetails, DashboardStats, NewBook};
use crate::preview;
use crate::thumbnail;
use crate::users::Users;

pub const ALLOWED_BOOK_EXTENSIONS: &[&str] = &["pdf", "epub", "txt", "doc", "docx"];
pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

static UNSAFE_FILENAME_CHARS: OnceLock<Regex> = OnceLock::new();

/// An uploaded file as received from a client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileSource {
    Blob,
    LegacyPath,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub source: FileSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookView {
    pub book: Book,
    pub is_favorite: bool,
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct LibraryStats {
    pub books: i64,
    pub users: i64,
    pub downloads: i64,
    pub favorites: i64,
    pub reading_history: i64,
    pub files: BucketStats,
    pub images: BucketStats,
}

/// Storage context shared by every operation: one connection, one configuration.
pub struct Library {
    conn: Connection,
    config: LibraryConfig,
}

impl Library {
    pub fn open(config: LibraryConfig) -> Result<Self> {
        config.validate()?;
        let conn = db::open(&config.database_path)?;
        log::info!("library opened at {}", config.database_path.display());
        Ok(Self { conn, config })
    }

    pub fn open_in_memory(config: LibraryConfig) -> Result<Self> {
        config.validate()?;
        let conn = db::open_in_memory()?;
        Ok(Self { conn, config })
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn files(&self) -> BlobStore<'_> {
        BlobStore::new(&self.conn, Bucket::Files, self.config.chunk_size)
    }

    pub fn images(&self) -> BlobStore<'_> {
        BlobStore::new(&self.conn, Bucket::Images, self.config.chunk_size)
    }

    pub fn catalog(&self) -> Catalog<'_> {
        Catalog::new(&self.conn)
    }

    pub fn users(&self) -> Users<'_> {
        Users::new(&self.conn)
    }

    pub fn activity(&self) -> Activity<'_> {
        Activity::new(&self.conn)
    }

    /// Stores the book file (and cover) as blobs, caches a preview and inserts the record.
    pub fn add_book(
        &self,
        details: BookDetails,
        file: Upload,
        cover: Option<Upload>,
    ) -> Result<Book> {
        validate_extension(&file.filename, ALLOWED_BOOK_EXTENSIONS)?;
        if let Some(cover) = &cover {
            validate_extension(&cover.filename, ALLOWED_IMAGE_EXTENSIONS)?;
        }

        let file_id = self.files().put(
            &file.bytes,
            &sanitize_filename(&file.filename),
            file.content_type.as_deref(),
        )?;
        let preview =
            preview::preview_or_placeholder(&file.bytes, &file.filename, self.config.preview_max_chars);

        let cover_id = match &cover {
            Some(cover) => {
                let stored = self.images().put(
                    &cover.bytes,
                    &sanitize_filename(&cover.filename),
                    cover.content_type.as_deref(),
                );
                match stored {
                    Ok(id) => Some(id),
                    Err(err) => {
                        self.discard_blob(Bucket::Files, &file_id);
                        return Err(err);
                    }
                }
            }
            None => None,
        };

        let inserted = self.catalog().insert(&NewBook {
            details,
            file_id: Some(file_id.clone()),
            cover_id: cover_id.clone(),
            preview: Some(preview),
            ..NewBook::default()
        });
        match inserted {
            Ok(book) => {
                log::info!("added book '{}' ({})", book.title, book.id);
                Ok(book)
            }
            Err(err) => {
                self.discard_blob(Bucket::Files, &file_id);
                if let Some(cover_id) = cover_id {
                    self.discard_blob(Bucket::Images, &cover_id);
                }
                Err(err)
            }
        }
    }

    /// Swaps in a new cover blob; the previous one is removed best-effort.
    pub fn replace_cover(&self, book_id: &str, cover: Upload) -> Result<Book> {
        validate_extension(&cover.filename, ALLOWED_IMAGE_EXTENSIONS)?;
        let book = self.catalog().get(book_id)?;

        let cover_id = self.images().put(
            &cover.bytes,
            &sanitize_filename(&cover.filename),
            cover.content_type.as_deref(),
        )?;
        if let Err(err) = self.catalog().set_cover(book_id, Some(&cover_id)) {
            self.discard_blob(Bucket::Images, &cover_id);
            return Err(err);
        }
        if let Some(previous) = book.cover_id.as_deref() {
            self.discard_blob(Bucket::Images, previous);
        }
        self.catalog().get(book_id)
    }

    /// Removes the record and its activity; blobs and legacy files are removed best-effort.
    pub fn delete_book(&self, book_id: &str) -> Result<Book> {
        let book = self.catalog().get(book_id)?;

        if let Some(file_id) = book.file_id.as_deref() {
            self.discard_blob(Bucket::Files, file_id);
        }
        if let Some(cover_id) = book.cover_id.as_deref() {
            self.discard_blob(Bucket::Images, cover_id);
        }
        for (stored, asset) in [
            (book.file_path.as_deref(), AssetKind::File),
            (book.cover_path.as_deref(), AssetKind::Cover),
        ] {
            let Some(stored) = stored else { continue };
            if let Ok(path) = self.resolve_legacy_path(stored, asset) {
                if let Err(err) = std::fs::remove_file(&path) {
                    log::warn!("could not remove legacy {} {}: {}", asset, path.display(), err);
                }
            }
        }

        let removed = self.catalog().delete(book_id)?;
        log::info!("deleted book '{}' ({})", removed.title, removed.id);
        Ok(removed)
    }

    /// The book's file, from the blob store when it has one, else from its legacy path.
    pub fn book_file(&self, book_id: &str) -> Result<BookFile> {
        let book = self.catalog().get(book_id)?;

        if let Some(file_id) = book.file_id.as_deref() {
            match self.files().get(file_id) {
                Ok(blob) => {
                    return Ok(BookFile {
                        filename: blob.meta.filename,
                        content_type: blob.meta.content_type,
                        bytes: blob.bytes,
                        source: FileSource::Blob,
                    })
                }
                // A record still carrying its legacy path stays servable
                Err(err) if err.is_not_found() && book.file_path.is_some() => {
                    log::warn!("blob {} missing for book {}, using legacy path", file_id, book_id);
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(stored) = book.file_path.as_deref() {
            if let Ok(path) = self.resolve_legacy_path(stored, AssetKind::File) {
                let bytes = std::fs::read(&path)?;
                let filename = path
                    .file_name()
                    .map(|value| value.to_string_lossy().to_string())
                    .unwrap_or_else(|| stored.to_string());
                return Ok(BookFile {
                    content_type: crate::blob_store::content_type_for(&filename).to_string(),
                    filename,
                    bytes,
                    source: FileSource::LegacyPath,
                });
            }
        }

        Err(LibraryError::not_found("book file", book_id))
    }

    /// Logs the download, then returns the file.
    pub fn download_book(&self, user_id: &str, book_id: &str) -> Result<BookFile> {
        self.catalog().get(book_id)?;
        self.activity().record_download(user_id, book_id)?;
        self.book_file(book_id)
    }

    /// Cached preview, or one extracted from the stored file and cached for next time.
    pub fn book_preview(&self, book_id: &str) -> Result<Option<String>> {
        let book = self.catalog().get(book_id)?;
        if let Some(preview) = book.preview.filter(|value| !value.is_empty()) {
            return Ok(Some(preview));
        }
        let Some(file_id) = book.file_id.as_deref() else {
            return Ok(None);
        };

        let blob = match self.files().get(file_id) {
            Ok(blob) => blob,
            Err(err) => {
                log::warn!("no preview for book {}: {}", book_id, err);
                return Ok(None);
            }
        };
        let preview = preview::preview_or_placeholder(
            &blob.bytes,
            &blob.meta.filename,
            self.config.preview_max_chars,
        );
        self.catalog().set_preview(book_id, &preview)?;
        Ok(Some(preview))
    }

    /// Detail view for a reader: records the visit in their history.
    pub fn open_book(&self, user_id: &str, book_id: &str) -> Result<BookView> {
        self.catalog().get(book_id)?;
        self.activity().record_view(user_id, book_id, 1)?;
        let is_favorite = self.activity().is_favorite(user_id, book_id)?;
        let preview = self.book_preview(book_id)?;
        Ok(BookView {
            book: self.catalog().get(book_id)?,
            is_favorite,
            preview,
        })
    }

    pub fn cover_image(&self, cover_id: &str) -> Result<Blob> {
        self.images().get(cover_id)
    }

    pub fn cover_thumbnail(&self, cover_id: &str) -> Result<Vec<u8>> {
        let blob = self.images().get(cover_id)?;
        thumbnail::generate_thumbnail(&blob.bytes)
    }

    pub fn stats(&self) -> Result<LibraryStats> {
        let count = |table: &str| -> Result<i64> {
            Ok(self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?)
        };
        Ok(LibraryStats {
            books: count("books")?,
            users: count("users")?,
            downloads: count("downloads")?,
            favorites: count("favorites")?,
            reading_history: count("reading_history")?,
            files: self.files().stats()?,
            images: self.images().stats()?,
        })
    }

    pub fn dashboard_stats(&self) -> Result<DashboardStats> {
        let (start, end) = day_bounds(chrono::Utc::now());
        Ok(DashboardStats {
            total_books: self.catalog().count()?,
            total_users: self.users().count()?,
            downloads_today: self.activity().downloads_between(start, end)?,
            new_books_today: self
                .catalog()
                .count_created_between(start.timestamp_millis(), end.timestamp_millis())?,
        })
    }

    /// Resolves a legacy path stored on a record. Relative paths are taken from the legacy root;
    /// when that misses, the bare file name is looked up in the uploads or covers directory.
    pub fn resolve_legacy_path(&self, stored: &str, asset: AssetKind) -> Result<PathBuf> {
        let stored_path = Path::new(stored);
        let direct = if stored_path.is_absolute() {
            stored_path.to_path_buf()
        } else {
            self.config.legacy_root.join(stored_path)
        };
        if direct.is_file() {
            return Ok(direct);
        }

        if let Some(file_name) = stored_path.file_name() {
            let dir = match asset {
                AssetKind::File => self.config.uploads_path(),
                AssetKind::Cover => self.config.covers_path(),
            };
            let fallback = dir.join(file_name);
            if fallback.is_file() {
                return Ok(fallback);
            }
        }
        Err(LibraryError::AssetMissing(direct))
    }

    fn discard_blob(&self, bucket: Bucket, id: &str) {
        let store = match bucket {
            Bucket::Files => self.files(),
            Bucket::Images => self.images(),
        };
        if let Err(err) = store.delete(id) {
            log::warn!("could not delete blob {} from {}: {}", id, bucket, err);
        }
    }
}

fn validate_extension(filename: &str, allowed: &[&str]) -> Result<()> {
    let extension = preview::extension_of(filename);
    if allowed.contains(&extension.as_str()) {
        Ok(())
    } else {
        Err(LibraryError::InvalidUpload(format!(
            "{} is not one of: {}",
            filename,
            allowed.join(", ")
        )))
    }
}

/// Reduces an uploaded file name to a safe ASCII base name.
pub fn sanitize_filename(name: &str) -> String {
    let re = UNSAFE_FILENAME_CHARS
        .get_or_init(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("valid filename regex"));
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let joined = base.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = re.replace_all(&joined, "");
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewUser, Role};
    use crate::preview::PLACEHOLDER_UNSUPPORTED;

    fn library() -> Library {
        Library::open_in_memory(LibraryConfig::default()).unwrap()
    }

    fn details(title: &str) -> BookDetails {
        BookDetails {
            title: title.to_string(),
            author: "Author".to_string(),
            description: String::new(),
            published_year: Some(2024),
        }
    }

    fn upload(filename: &str, bytes: &[u8]) -> Upload {
        Upload {
            filename: filename.to_string(),
            content_type: None,
            bytes: bytes.to_vec(),
        }
    }

    fn reader(library: &Library) -> String {
        library
            .users()
            .create(&NewUser {
                name: "Reader".to_string(),
                email: "reader@example.com".to_string(),
                password_hash: "h".to_string(),
                role: Role::User,
            })
            .unwrap()
            .id
    }

    #[test]
    fn add_book_stores_blobs_and_preview() {
        let library = library();
        let book = library
            .add_book(
                details("Notes"),
                upload("my notes.txt", b"hello world"),
                Some(upload("cover.png", b"png-bytes")),
            )
            .unwrap();

        assert_eq!(book.preview.as_deref(), Some("hello world"));
        let file = library.files().get(book.file_id.as_deref().unwrap()).unwrap();
        assert_eq!(file.bytes, b"hello world");
        assert_eq!(file.meta.filename, "my_notes.txt");
        let cover = library.cover_image(book.cover_id.as_deref().unwrap()).unwrap();
        assert_eq!(cover.bytes, b"png-bytes");
        assert_eq!(cover.meta.content_type, "image/png");
    }

    #[test]
    fn add_book_rejects_bad_extensions_without_storing() {
        let library = library();
        let err = library
            .add_book(details("Bad"), upload("virus.exe", b"MZ"), None)
            .unwrap_err();
        assert!(matches!(err, LibraryError::InvalidUpload(_)));

        let err = library
            .add_book(
                details("Bad cover"),
                upload("ok.txt", b"ok"),
                Some(upload("cover.bmp", b"BM")),
            )
            .unwrap_err();
        assert!(matches!(err, LibraryError::InvalidUpload(_)));
        assert_eq!(library.files().stats().unwrap().count, 0);
    }

    #[test]
    fn replace_cover_drops_previous_blob() {
        let library = library();
        let book = library
            .add_book(
                details("Covered"),
                upload("a.txt", b"a"),
                Some(upload("old.jpg", b"old")),
            )
            .unwrap();
        let old_cover = book.cover_id.clone().unwrap();

        let updated = library
            .replace_cover(&book.id, upload("new.gif", b"new"))
            .unwrap();

        assert_ne!(updated.cover_id.as_deref(), Some(old_cover.as_str()));
        assert!(!library.images().exists(&old_cover).unwrap());
        assert_eq!(library.images().stats().unwrap().count, 1);
    }

    #[test]
    fn delete_book_removes_blobs_and_activity() {
        let library = library();
        let user = reader(&library);
        let book = library
            .add_book(details("Gone"), upload("g.txt", b"g"), Some(upload("g.png", b"p")))
            .unwrap();
        library.activity().toggle_favorite(&user, &book.id).unwrap();
        library.download_book(&user, &book.id).unwrap();

        library.delete_book(&book.id).unwrap();

        let stats = library.stats().unwrap();
        assert_eq!(stats.books, 0);
        assert_eq!(stats.favorites, 0);
        assert_eq!(stats.downloads, 0);
        assert_eq!(stats.files.count, 0);
        assert_eq!(stats.images.count, 0);
    }

    #[test]
    fn book_file_prefers_blob_then_legacy_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join("uploads").join("old.txt"), b"from disk").unwrap();
        let library = Library::open_in_memory(LibraryConfig {
            legacy_root: dir.path().to_path_buf(),
            ..LibraryConfig::default()
        })
        .unwrap();

        let legacy = library
            .catalog()
            .insert(&NewBook {
                details: details("Legacy"),
                file_path: Some("uploads/old.txt".to_string()),
                ..NewBook::default()
            })
            .unwrap();
        let file = library.book_file(&legacy.id).unwrap();
        assert_eq!(file.source, FileSource::LegacyPath);
        assert_eq!(file.bytes, b"from disk");
        assert_eq!(file.content_type, "text/plain");

        let modern = library
            .add_book(details("Modern"), upload("new.txt", b"from blob"), None)
            .unwrap();
        let file = library.book_file(&modern.id).unwrap();
        assert_eq!(file.source, FileSource::Blob);
        assert_eq!(file.bytes, b"from blob");
    }

    #[test]
    fn missing_blob_falls_back_to_legacy_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join("uploads").join("old.txt"), b"from disk").unwrap();
        let library = Library::open_in_memory(LibraryConfig {
            legacy_root: dir.path().to_path_buf(),
            ..LibraryConfig::default()
        })
        .unwrap();

        let book = library
            .catalog()
            .insert(&NewBook {
                details: details("Both"),
                file_path: Some("uploads/old.txt".to_string()),
                file_id: Some("lost-blob".to_string()),
                ..NewBook::default()
            })
            .unwrap();
        let file = library.book_file(&book.id).unwrap();
        assert_eq!(file.source, FileSource::LegacyPath);
        assert_eq!(file.bytes, b"from disk");

        let blob_only = library
            .catalog()
            .insert(&NewBook {
                details: details("Blob only"),
                file_id: Some("lost-blob".to_string()),
                ..NewBook::default()
            })
            .unwrap();
        assert!(library.book_file(&blob_only.id).unwrap_err().is_not_found());
    }

    #[test]
    fn book_without_any_file_is_not_found() {
        let library = library();
        let book = library
            .catalog()
            .insert(&NewBook {
                details: details("Empty"),
                file_path: Some("uploads/missing.pdf".to_string()),
                ..NewBook::default()
            })
            .unwrap();
        assert!(library.book_file(&book.id).unwrap_err().is_not_found());
        assert!(library.book_file("no-such-book").unwrap_err().is_not_found());
    }

    #[test]
    fn legacy_path_falls_back_to_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("covers")).unwrap();
        std::fs::write(dir.path().join("covers").join("c.png"), b"img").unwrap();
        let library = Library::open_in_memory(LibraryConfig {
            legacy_root: dir.path().to_path_buf(),
            ..LibraryConfig::default()
        })
        .unwrap();

        let resolved = library
            .resolve_legacy_path("/old/server/covers/c.png", AssetKind::Cover)
            .unwrap();
        assert_eq!(resolved, dir.path().join("covers").join("c.png"));

        let err = library
            .resolve_legacy_path("covers/c.png", AssetKind::File)
            .unwrap_err();
        assert!(matches!(err, LibraryError::AssetMissing(_)));
    }

    #[test]
    fn preview_is_computed_and_cached_when_missing() {
        let library = library();
        let file_id = library.files().put(b"lazy text", "lazy.txt", None).unwrap();
        let book = library
            .catalog()
            .insert(&NewBook {
                details: details("Lazy"),
                file_id: Some(file_id),
                ..NewBook::default()
            })
            .unwrap();

        assert_eq!(library.book_preview(&book.id).unwrap().as_deref(), Some("lazy text"));
        assert_eq!(
            library.catalog().get(&book.id).unwrap().preview.as_deref(),
            Some("lazy text")
        );
    }

    #[test]
    fn open_book_records_history() {
        let library = library();
        let user = reader(&library);
        let book = library
            .add_book(details("Epub"), upload("b.epub", b"not really an epub"), None)
            .unwrap();

        let view = library.open_book(&user, &book.id).unwrap();
        assert!(!view.is_favorite);
        assert!(view.preview.is_some());
        assert_eq!(library.activity().reading_history(&user, 10).unwrap().len(), 1);
    }

    #[test]
    fn cached_preview_is_returned_as_is() {
        let library = library();
        let book = library
            .catalog()
            .insert(&NewBook {
                details: details("Odd"),
                preview: Some(PLACEHOLDER_UNSUPPORTED.to_string()),
                ..NewBook::default()
            })
            .unwrap();
        assert_eq!(
            library.book_preview(&book.id).unwrap().as_deref(),
            Some(PLACEHOLDER_UNSUPPORTED)
        );
    }

    #[test]
    fn dashboard_counts_today() {
        let library = library();
        let user = reader(&library);
        let book = library
            .add_book(details("Today"), upload("t.txt", b"t"), None)
            .unwrap();
        library.download_book(&user, &book.id).unwrap();

        let stats = library.dashboard_stats().unwrap();
        assert_eq!(stats.total_books, 1);
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.downloads_today, 1);
        assert_eq!(stats.new_books_today, 1);
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("My Book (v2).pdf"), "My_Book_v2.pdf");
        assert_eq!(sanitize_filename("C:\\docs\\report.docx"), "report.docx");
        assert_eq!(sanitize_filename("..."), "file");
    }
}
