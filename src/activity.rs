use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::db;
use crate::error::Result;
use crate::models::{Book, ReadingHistoryEntry};

pub const RECENT_HISTORY_LIMIT: usize = 10;

/// Favorites, downloads and reading history of users.
pub struct Activity<'a> {
    conn: &'a Connection,
}

impl<'a> Activity<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn books_for(&self, sql: &str, user_id: &str, limit: Option<usize>) -> Result<Vec<Book>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(
            params![user_id, limit.map(|value| value as i64).unwrap_or(-1)],
            |row| row.get::<_, String>(0),
        )?;
        let catalog = Catalog::new(self.conn);
        let mut books = Vec::new();
        for row in rows {
            if let Some(book) = catalog.find(&row?)? {
                books.push(book);
            }
        }
        Ok(books)
    }

    /// Adds or removes the favorite. Returns true when the book is now a favorite.
    pub fn toggle_favorite(&self, user_id: &str, book_id: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM favorites WHERE user_id = ?1 AND book_id = ?2",
            params![user_id, book_id],
        )?;
        if removed > 0 {
            return Ok(false);
        }
        self.conn.execute(
            "INSERT INTO favorites (id, user_id, book_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![Uuid::new_v4().to_string(), user_id, book_id, db::now_millis()],
        )?;
        Ok(true)
    }

    pub fn is_favorite(&self, user_id: &str, book_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM favorites WHERE user_id = ?1 AND book_id = ?2",
                params![user_id, book_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn favorite_books(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<Book>> {
        self.books_for(
            "SELECT book_id FROM favorites WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            user_id,
            limit,
        )
    }

    /// Appends to the download log; every call is a new entry.
    pub fn record_download(&self, user_id: &str, book_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO downloads (id, user_id, book_id, downloaded_at) VALUES (?1, ?2, ?3, ?4)",
            params![Uuid::new_v4().to_string(), user_id, book_id, db::now_millis()],
        )?;
        Ok(())
    }

    pub fn downloaded_books(&self, user_id: &str) -> Result<Vec<Book>> {
        self.books_for(
            "SELECT book_id FROM downloads WHERE user_id = ?1
             ORDER BY downloaded_at DESC, rowid DESC LIMIT ?2",
            user_id,
            None,
        )
    }

    pub fn downloads_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM downloads WHERE downloaded_at >= ?1 AND downloaded_at < ?2",
            params![start.timestamp_millis(), end.timestamp_millis()],
            |row| row.get(0),
        )?)
    }

    /// Upserts the history entry for (user, book).
    pub fn record_view(&self, user_id: &str, book_id: &str, last_page: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO reading_history (user_id, book_id, last_page, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, book_id) DO UPDATE SET
                last_page = excluded.last_page,
                updated_at = excluded.updated_at",
            params![user_id, book_id, last_page, db::now_millis()],
        )?;
        Ok(())
    }

    pub fn reading_history(&self, user_id: &str, limit: usize) -> Result<Vec<ReadingHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT book_id, last_page, updated_at FROM reading_history
             WHERE user_id = ?1 ORDER BY updated_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let catalog = Catalog::new(self.conn);
        let mut entries = Vec::new();
        for row in rows {
            let (book_id, last_page, updated_at) = row?;
            if let Some(book) = catalog.find(&book_id)? {
                entries.push(ReadingHistoryEntry {
                    book,
                    last_page,
                    updated_at: db::from_millis(updated_at),
                });
            }
        }
        Ok(entries)
    }
}

/// Start and end of the UTC day containing `at`.
pub fn day_bounds(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = at
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|value| value.and_utc())
        .unwrap_or(at);
    (start, start + Duration::days(1))
}
