use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::db;
use crate::error::{LibraryError, Result};
use chrono::{DateTime, Utc};

/// Independent storage areas. Each bucket has its own tables so ids never resolve across buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Bucket {
    Files,
    Images,
}

impl Bucket {
    fn prefix(&self) -> &'static str {
        match self {
            Bucket::Files => "fs",
            Bucket::Images => "images",
        }
    }

    fn files_table(&self) -> String {
        format!("{}_files", self.prefix())
    }

    fn chunks_table(&self) -> String {
        format!("{}_chunks", self.prefix())
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BlobMeta {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub length: u64,
    pub chunk_size: u64,
    pub checksum: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub meta: BlobMeta,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq)]
pub struct BucketStats {
    pub count: i64,
    pub total_bytes: i64,
}

pub struct BlobStore<'a> {
    conn: &'a Connection,
    bucket: Bucket,
    chunk_size: usize,
}

impl<'a> BlobStore<'a> {
    pub fn new(conn: &'a Connection, bucket: Bucket, chunk_size: usize) -> Self {
        Self {
            conn,
            bucket,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    /// Stores `bytes` in chunks and returns the newly minted id.
    pub fn put(&self, bytes: &[u8], filename: &str, content_type: Option<&str>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let content_type = content_type
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| content_type_for(filename));

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|err| self.store_error(err))?;
        tx.execute(
            &format!(
                "INSERT INTO {} (id, filename, content_type, length, chunk_size, checksum, uploaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                self.bucket.files_table()
            ),
            params![
                id,
                filename,
                content_type,
                bytes.len() as i64,
                self.chunk_size as i64,
                checksum(bytes),
                db::now_millis(),
            ],
        )
        .map_err(|err| self.store_error(err))?;

        {
            let mut insert = tx
                .prepare(&format!(
                    "INSERT INTO {} (file_id, n, data) VALUES (?1, ?2, ?3)",
                    self.bucket.chunks_table()
                ))
                .map_err(|err| self.store_error(err))?;
            for (n, chunk) in bytes.chunks(self.chunk_size).enumerate() {
                insert
                    .execute(params![id, n as i64, chunk])
                    .map_err(|err| self.store_error(err))?;
            }
        }

        tx.commit().map_err(|err| self.store_error(err))?;
        log::debug!("stored blob {} in {} ({} bytes)", id, self.bucket, bytes.len());
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<Blob> {
        let meta = self.metadata(id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT data FROM {} WHERE file_id = ?1 ORDER BY n",
            self.bucket.chunks_table()
        ))?;
        let chunks = stmt.query_map(params![id], |row| row.get::<_, Vec<u8>>(0))?;

        let mut bytes = Vec::with_capacity(meta.length as usize);
        for chunk in chunks {
            bytes.extend_from_slice(&chunk?);
        }
        if bytes.len() as u64 != meta.length {
            return Err(LibraryError::Store(format!(
                "blob {} in {} is truncated: expected {} bytes, found {}",
                id,
                self.bucket,
                meta.length,
                bytes.len()
            )));
        }
        Ok(Blob { meta, bytes })
    }

    pub fn metadata(&self, id: &str) -> Result<BlobMeta> {
        self.conn
            .query_row(
                &format!(
                    "SELECT id, filename, content_type, length, chunk_size, checksum, uploaded_at
                     FROM {} WHERE id = ?1",
                    self.bucket.files_table()
                ),
                params![id],
                |row| {
                    Ok(BlobMeta {
                        id: row.get(0)?,
                        filename: row.get(1)?,
                        content_type: row.get(2)?,
                        length: row.get::<_, i64>(3)? as u64,
                        chunk_size: row.get::<_, i64>(4)? as u64,
                        checksum: row.get(5)?,
                        uploaded_at: db::from_millis(row.get(6)?),
                    })
                },
            )
            .optional()?
            .ok_or_else(|| LibraryError::not_found("blob", id))
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?1", self.bucket.files_table()),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Removes a blob. Returns false when nothing was stored under `id`.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|err| self.store_error(err))?;
        tx.execute(
            &format!("DELETE FROM {} WHERE file_id = ?1", self.bucket.chunks_table()),
            params![id],
        )
        .map_err(|err| self.store_error(err))?;
        let removed = tx
            .execute(
                &format!("DELETE FROM {} WHERE id = ?1", self.bucket.files_table()),
                params![id],
            )
            .map_err(|err| self.store_error(err))?;
        tx.commit().map_err(|err| self.store_error(err))?;
        if removed > 0 {
            log::debug!("deleted blob {} from {}", id, self.bucket);
        }
        Ok(removed > 0)
    }

    pub fn stats(&self) -> Result<BucketStats> {
        let stats = self.conn.query_row(
            &format!(
                "SELECT COUNT(*), COALESCE(SUM(length), 0) FROM {}",
                self.bucket.files_table()
            ),
            [],
            |row| {
                Ok(BucketStats {
                    count: row.get(0)?,
                    total_bytes: row.get(1)?,
                })
            },
        )?;
        Ok(stats)
    }

    pub fn ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM {} ORDER BY uploaded_at",
            self.bucket.files_table()
        ))?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn store_error(&self, err: rusqlite::Error) -> LibraryError {
        LibraryError::Store(format!("{}: {}", self.bucket, err))
    }
}

pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    result.iter().map(|byte| format!("{:02x}", byte)).collect()
}

pub fn checksum_file(path: &std::path::Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 1024 * 1024];
    loop {
        let read = std::io::Read::read(&mut file, &mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let result = hasher.finalize();
    Ok(result.iter().map(|byte| format!("{:02x}", byte)).collect())
}

pub fn content_type_for(filename: &str) -> &'static str {
    match std::path::Path::new(filename)
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or("")
        .to_lowercase()
        .as_str()
    {
        "pdf" => "application/pdf",
        "epub" => "application/epub+zip",
        "txt" => "text/plain",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}
