pub mod activity;
pub mod blob_store;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod library;
pub mod migration;
pub mod models;
pub mod parser;
pub mod preview;
pub mod scanner;
pub mod thumbnail;
pub mod users;

pub use blob_store::{Blob, BlobMeta, BlobStore, Bucket};
pub use config::LibraryConfig;
pub use error::{LibraryError, Result};
pub use library::{BookFile, Library, Upload};
pub use migration::{CleanupReport, MigrationReport, Migrator, VerificationReport};
pub use models::{AssetKind, Book, BookDetails, NewBook, NewUser, Role, Status, User};
pub use preview::{extract_preview, PreviewError};
pub use scanner::{scan_orphans, OrphanReport};
