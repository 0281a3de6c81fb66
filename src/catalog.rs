use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use uuid::Uuid;

use crate::blob_store::Bucket;
use crate::db;
use crate::error::{LibraryError, Result};
use crate::models::{Book, BookDetails, NewBook};

const BOOK_COLUMNS: &str = "id, title, author, description, published_year, file_path, cover_path, \
     file_id, cover_id, preview, migration_verified_at, created_at";

pub const RELATED_BOOKS_LIMIT: usize = 12;

/// Blob ids and preview produced for one record by a migration pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigratedAssets {
    pub file_id: Option<String>,
    pub preview: Option<String>,
    pub cover_id: Option<String>,
}

impl MigratedAssets {
    pub fn is_empty(&self) -> bool {
        self.file_id.is_none() && self.cover_id.is_none()
    }
}

pub struct Catalog<'a> {
    conn: &'a Connection,
}

fn row_to_book(row: &Row) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        description: row.get(3)?,
        published_year: row.get(4)?,
        file_path: row.get(5)?,
        cover_path: row.get(6)?,
        file_id: row.get(7)?,
        cover_id: row.get(8)?,
        preview: row.get(9)?,
        migration_verified_at: row.get::<_, Option<i64>>(10)?.map(db::from_millis),
        created_at: db::from_millis(row.get(11)?),
    })
}

fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|value| value as i64).unwrap_or(-1)
}

fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

impl<'a> Catalog<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query_books<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Book>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_book)?;
        let mut books = Vec::new();
        for row in rows {
            books.push(row?);
        }
        Ok(books)
    }

    pub fn insert(&self, book: &NewBook) -> Result<Book> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO books (id, title, author, description, published_year, file_path, cover_path,
                file_id, cover_id, preview, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                book.details.title,
                book.details.author,
                book.details.description,
                book.details.published_year,
                book.file_path,
                book.cover_path,
                book.file_id,
                book.cover_id,
                book.preview,
                db::now_millis(),
            ],
        )?;
        self.get(&id)
    }

    pub fn find(&self, id: &str) -> Result<Option<Book>> {
        let book = self
            .conn
            .query_row(
                &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS),
                params![id],
                row_to_book,
            )
            .optional()?;
        Ok(book)
    }

    pub fn get(&self, id: &str) -> Result<Book> {
        self.find(id)?
            .ok_or_else(|| LibraryError::not_found("book", id))
    }

    /// Newest first.
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<Book>> {
        self.query_books(
            &format!(
                "SELECT {} FROM books ORDER BY created_at DESC LIMIT ?1",
                BOOK_COLUMNS
            ),
            params![sql_limit(limit)],
        )
    }

    pub fn count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))?)
    }

    pub fn count_created_between(&self, start_millis: i64, end_millis: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM books WHERE created_at >= ?1 AND created_at < ?2",
            params![start_millis, end_millis],
            |row| row.get(0),
        )?)
    }

    pub fn update_details(&self, id: &str, details: &BookDetails) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE books SET title = ?2, author = ?3, description = ?4, published_year = ?5 WHERE id = ?1",
            params![
                id,
                details.title,
                details.author,
                details.description,
                details.published_year,
            ],
        )?;
        if changed == 0 {
            return Err(LibraryError::not_found("book", id));
        }
        Ok(())
    }

    pub fn set_cover(&self, id: &str, cover_id: Option<&str>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE books SET cover_id = ?2 WHERE id = ?1",
            params![id, cover_id],
        )?;
        if changed == 0 {
            return Err(LibraryError::not_found("book", id));
        }
        Ok(())
    }

    pub fn set_preview(&self, id: &str, preview: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE books SET preview = ?2 WHERE id = ?1",
            params![id, preview],
        )?;
        Ok(())
    }

    /// Deletes the record together with its favorites, downloads and reading history.
    pub fn delete(&self, id: &str) -> Result<Book> {
        let book = self.get(id)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM downloads WHERE book_id = ?1", params![id])?;
        tx.execute("DELETE FROM favorites WHERE book_id = ?1", params![id])?;
        tx.execute("DELETE FROM reading_history WHERE book_id = ?1", params![id])?;
        tx.execute("DELETE FROM books WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(book)
    }

    /// Case-insensitive substring match on title, author and description.
    pub fn search(&self, query: &str, year: Option<i64>) -> Result<Vec<Book>> {
        let query = query.trim();
        let pattern = if query.is_empty() {
            None
        } else {
            Some(like_pattern(query))
        };
        self.query_books(
            &format!(
                "SELECT {} FROM books
                 WHERE (?1 IS NULL
                        OR title LIKE ?1 ESCAPE '\\'
                        OR author LIKE ?1 ESCAPE '\\'
                        OR description LIKE ?1 ESCAPE '\\')
                   AND (?2 IS NULL OR published_year = ?2)
                 ORDER BY created_at DESC",
                BOOK_COLUMNS
            ),
            params![pattern, year],
        )
    }

    /// Other books by the same author, newest first.
    pub fn related_by_author(&self, id: &str, limit: usize) -> Result<Vec<Book>> {
        let book = match self.find(id)? {
            Some(book) => book,
            None => return Ok(vec![]),
        };
        let author = book.author.trim();
        if author.is_empty() {
            return Ok(vec![]);
        }
        self.query_books(
            &format!(
                "SELECT {} FROM books WHERE author = ?1 AND id != ?2
                 ORDER BY created_at DESC LIMIT ?3",
                BOOK_COLUMNS
            ),
            params![author, id, limit as i64],
        )
    }

    /// Records with a legacy path whose blob counterpart has not been stored yet.
    pub fn legacy_candidates(&self) -> Result<Vec<Book>> {
        self.query_books(
            &format!(
                "SELECT {} FROM books
                 WHERE (file_path IS NOT NULL AND file_id IS NULL)
                    OR (cover_path IS NOT NULL AND cover_id IS NULL)
                 ORDER BY created_at",
                BOOK_COLUMNS
            ),
            [],
        )
    }

    /// Applies a migration pass result in one write. New blobs invalidate any earlier verification.
    pub fn attach_migrated_assets(&self, id: &str, assets: &MigratedAssets) -> Result<()> {
        if assets.is_empty() {
            return Ok(());
        }
        let changed = self.conn.execute(
            "UPDATE books SET
                file_id = COALESCE(?2, file_id),
                preview = COALESCE(?3, preview),
                cover_id = COALESCE(?4, cover_id),
                migration_verified_at = NULL
             WHERE id = ?1",
            params![id, assets.file_id, assets.preview, assets.cover_id],
        )?;
        if changed == 0 {
            return Err(LibraryError::not_found("book", id));
        }
        Ok(())
    }

    /// Records carrying at least one blob id, oldest first.
    pub fn blob_backed(&self, limit: Option<usize>) -> Result<Vec<Book>> {
        self.query_books(
            &format!(
                "SELECT {} FROM books
                 WHERE file_id IS NOT NULL OR cover_id IS NOT NULL
                 ORDER BY created_at LIMIT ?1",
                BOOK_COLUMNS
            ),
            params![sql_limit(limit)],
        )
    }

    pub fn mark_verified(&self, id: &str, at_millis: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE books SET migration_verified_at = ?2 WHERE id = ?1",
            params![id, at_millis],
        )?;
        Ok(())
    }

    pub fn clear_verified(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE books SET migration_verified_at = NULL WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Clears legacy paths on verified records whose every legacy asset has a stored blob.
    pub fn strip_verified_legacy_paths(&self) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE books SET file_path = NULL, cover_path = NULL
             WHERE migration_verified_at IS NOT NULL
               AND (file_path IS NOT NULL OR cover_path IS NOT NULL)
               AND (file_path IS NULL OR file_id IN (SELECT id FROM fs_files))
               AND (cover_path IS NULL OR cover_id IN (SELECT id FROM images_files))",
            [],
        )?;
        Ok(changed)
    }

    pub fn count_with_legacy_paths(&self) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM books WHERE file_path IS NOT NULL OR cover_path IS NOT NULL",
            [],
            |row| row.get(0),
        )?)
    }

    pub fn referenced_blob_ids(&self, bucket: Bucket) -> Result<HashSet<String>> {
        let column = match bucket {
            Bucket::Files => "file_id",
            Bucket::Images => "cover_id",
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {column} FROM books WHERE {column} IS NOT NULL"
        ))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    pub fn legacy_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_path FROM books WHERE file_path IS NOT NULL
             UNION
             SELECT cover_path FROM books WHERE cover_path IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }
}
