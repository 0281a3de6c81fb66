use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use uuid::Uuid;

use crate::db;
use crate::error::{LibraryError, Result};
use crate::models::{NewUser, Role, Status, User};

const USER_COLUMNS: &str = "id, name, email, password_hash, role, status, created_at";

pub struct Users<'a> {
    conn: &'a Connection,
}

fn parse_column<T: std::str::FromStr<Err = String>>(
    row: &Row,
    index: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    raw.parse().map_err(|err: String| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            err.into(),
        )
    })
}

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: parse_column::<Role>(row, 4)?,
        status: parse_column::<Status>(row, 5)?,
        created_at: db::from_millis(row.get(6)?),
    })
}

impl<'a> Users<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Creates an active account. Emails are unique after trimming.
    pub fn create(&self, user: &NewUser) -> Result<User> {
        let id = Uuid::new_v4().to_string();
        let email = user.email.trim();
        let inserted = self.conn.execute(
            "INSERT INTO users (id, name, email, password_hash, role, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                user.name.trim(),
                email,
                user.password_hash,
                user.role.as_str(),
                Status::Active.as_str(),
                db::now_millis(),
            ],
        );
        match inserted {
            Ok(_) => self.get(&id),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(LibraryError::DuplicateEmail(email.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn find(&self, id: &str) -> Result<Option<User>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![id],
                row_to_user,
            )
            .optional()?)
    }

    pub fn get(&self, id: &str) -> Result<User> {
        self.find(id)?
            .ok_or_else(|| LibraryError::not_found("user", id))
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
                params![email.trim()],
                row_to_user,
            )
            .optional()?)
    }

    /// Newest first.
    pub fn list(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC",
            USER_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_user)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    pub fn count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }

    pub fn has_admin(&self) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM users WHERE role = ?1 LIMIT 1",
                params![Role::Admin.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn rename(&self, id: &str, name: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE users SET name = ?2 WHERE id = ?1",
            params![id, name.trim()],
        )?;
        if changed == 0 {
            return Err(LibraryError::not_found("user", id));
        }
        Ok(())
    }

    pub fn set_password_hash(&self, id: &str, password_hash: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE users SET password_hash = ?2 WHERE id = ?1",
            params![id, password_hash],
        )?;
        if changed == 0 {
            return Err(LibraryError::not_found("user", id));
        }
        Ok(())
    }

    /// Flips Active and Blocked, returning the new status.
    pub fn toggle_status(&self, id: &str) -> Result<Status> {
        let user = self.get(id)?;
        let status = user.status.toggled();
        self.conn.execute(
            "UPDATE users SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        log::info!("user {} is now {}", user.email, status);
        Ok(status)
    }
}
