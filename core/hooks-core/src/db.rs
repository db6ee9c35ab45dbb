//! SQLite persistence shared by every cc-hooks process.
//!
//! Many processes (one server per session plus short-lived hook invocations)
//! open the same file concurrently. Each operation opens its own connection;
//! cross-process atomicity comes from SQLite transactions, never from
//! in-process locks.

use chrono::{DateTime, SecondsFormat, Utc};
use cc_hooks_protocol::MigrationStatusResponse;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

use crate::error::{HooksError, Result};
use crate::migrations;

#[derive(Debug, Clone)]
pub struct Db {
    path: PathBuf,
}

impl Db {
    /// Opens (creating if needed) the store and applies pending migrations.
    pub fn new(path: PathBuf) -> Result<Self> {
        let db = Self { path };
        db.with_connection(|conn| migrations::apply_pending(conn).map(|_| ()))?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn migration_status(&self) -> Result<MigrationStatusResponse> {
        self.with_connection(|conn| migrations::status(conn))
    }

    pub(crate) fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(HooksError::io("Failed to create data dir"))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(HooksError::storage("Failed to open sqlite db"))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(HooksError::storage("Failed to enable WAL"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(HooksError::storage("Failed to set synchronous"))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(HooksError::storage("Failed to set busy_timeout"))?;

        Ok(conn)
    }
}

/// Fixed-width UTC timestamp; lexical order equals chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
