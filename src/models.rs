use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Book {
    pub id: String, // UUID
    pub title: String,
    pub author: String,
    pub description: String,
    pub published_year: Option<i64>,
    pub file_path: Option<String>,  // legacy on-disk book file
    pub cover_path: Option<String>, // legacy on-disk cover image
    pub file_id: Option<String>,    // blob id in the files bucket
    pub cover_id: Option<String>,   // blob id in the images bucket
    pub preview: Option<String>,
    pub migration_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Book {
    /// True when every legacy path on the record has a blob counterpart.
    pub fn legacy_assets_backed(&self) -> bool {
        (self.file_path.is_none() || self.file_id.is_some())
            && (self.cover_path.is_none() || self.cover_id.is_some())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct BookDetails {
    pub title: String,
    pub author: String,
    pub description: String,
    pub published_year: Option<i64>,
}

/// A new catalog entry. Legacy paths are only set when importing records from before blob storage.
#[derive(Debug, Clone, Default)]
pub struct NewBook {
    pub details: BookDetails,
    pub file_path: Option<String>,
    pub cover_path: Option<String>,
    pub file_id: Option<String>,
    pub cover_id: Option<String>,
    pub preview: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Blocked,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::User => "User",
        }
    }
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "Active",
            Status::Blocked => "Blocked",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Status::Active => Status::Blocked,
            Status::Blocked => Status::Active,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Admin" => Ok(Role::Admin),
            "User" => Ok(Role::User),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Active" => Ok(Status::Active),
            "Blocked" => Ok(Status::Blocked),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ReadingHistoryEntry {
    pub book: Book,
    pub last_page: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct DashboardStats {
    pub total_books: i64,
    pub total_users: i64,
    pub downloads_today: i64,
    pub new_books_today: i64,
}

/// Which asset of a book a blob or legacy path belongs to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    File,
    Cover,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::File => f.write_str("file"),
            AssetKind::Cover => f.write_str("cover"),
        }
    }
}
