//! Append-only schema migrations.
//!
//! Each migration is a single schema statement. Applied versions are recorded
//! in the `migrations` table and skipped on later runs. Never edit a shipped
//! migration; add a new one instead.

use cc_hooks_protocol::{AppliedMigration, MigrationStatusResponse};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::info;

use crate::db::now_timestamp;
use crate::error::{HooksError, Result};

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Create events table",
        sql: "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                hook_event_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                processed_at TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
              )",
    },
    Migration {
        version: 2,
        description: "Add arguments column to events",
        sql: "ALTER TABLE events ADD COLUMN arguments TEXT",
    },
    Migration {
        version: 3,
        description: "Add instance_id column to events",
        sql: "ALTER TABLE events ADD COLUMN instance_id TEXT",
    },
    Migration {
        version: 4,
        description: "Index events by instance and status",
        sql: "CREATE INDEX IF NOT EXISTS idx_events_instance_status
              ON events (instance_id, status, id)",
    },
    Migration {
        version: 5,
        description: "Create sessions table",
        sql: "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                owning_pid INTEGER NOT NULL,
                server_pid INTEGER NOT NULL,
                server_port INTEGER NOT NULL,
                tts_language TEXT,
                tts_providers TEXT,
                tts_cache_enabled INTEGER,
                elevenlabs_voice_id TEXT,
                elevenlabs_model_id TEXT,
                silent_announcements INTEGER,
                silent_effects INTEGER,
                openrouter_enabled INTEGER,
                openrouter_model TEXT,
                openrouter_contextual_stop INTEGER,
                openrouter_contextual_pretooluse INTEGER,
                created_at TEXT NOT NULL
              )",
    },
    Migration {
        version: 6,
        description: "Unique server port per session",
        sql: "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_server_port
              ON sessions (server_port)",
    },
];

pub fn latest_version() -> u32 {
    MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0)
}

/// Applies every migration not yet recorded. Returns the versions applied.
pub fn apply_pending(conn: &mut Connection) -> Result<Vec<u32>> {
    apply(conn, MIGRATIONS)
}

pub(crate) fn apply(conn: &mut Connection, migrations: &[Migration]) -> Result<Vec<u32>> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
         )",
        [],
    )
    .map_err(HooksError::storage("Failed to create migrations table"))?;

    let mut applied = Vec::new();
    for migration in migrations {
        // Other processes may be migrating the same file; the immediate
        // transaction serializes them and the re-check skips finished work.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(HooksError::storage("Failed to begin migration"))?;
        let done: Option<u32> = tx
            .query_row(
                "SELECT version FROM migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()
            .map_err(HooksError::storage("Failed to read migrations"))?;
        if done.is_some() {
            continue;
        }

        tx.execute(migration.sql, [])
            .map_err(|source| HooksError::Migration {
                version: migration.version,
                source,
            })?;
        tx.execute(
            "INSERT INTO migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.description, now_timestamp()],
        )
        .map_err(HooksError::storage("Failed to record migration"))?;
        tx.commit()
            .map_err(HooksError::storage("Failed to commit migration"))?;

        info!(
            version = migration.version,
            description = migration.description,
            "Applied migration"
        );
        applied.push(migration.version);
    }

    Ok(applied)
}

pub fn status(conn: &Connection) -> Result<MigrationStatusResponse> {
    let mut stmt = conn
        .prepare("SELECT version, description, applied_at FROM migrations ORDER BY version")
        .map_err(HooksError::storage("Failed to prepare migrations query"))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(AppliedMigration {
                version: row.get(0)?,
                description: row.get(1)?,
                applied_at: row.get(2)?,
            })
        })
        .map_err(HooksError::storage("Failed to read migrations"))?;

    let mut applied_migrations = Vec::new();
    for row in rows {
        applied_migrations.push(row.map_err(HooksError::storage("Failed to decode migration row"))?);
    }

    let current_version = applied_migrations
        .iter()
        .map(|m| m.version)
        .max()
        .unwrap_or(0);
    let pending_migrations = MIGRATIONS
        .iter()
        .map(|m| m.version)
        .filter(|version| !applied_migrations.iter().any(|m| m.version == *version))
        .collect();

    Ok(MigrationStatusResponse {
        current_version,
        latest_version: latest_version(),
        pending_migrations,
        applied_migrations,
    })
}
