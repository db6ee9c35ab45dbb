//! Session registry: which dedicated server serves which assistant session.
//!
//! Rows are shared by every cc-hooks process. Liveness is never inferred
//! from row presence alone; callers pass a `ProcessProbe` so rows left behind
//! by crashed processes can be told apart from live ones.

use cc_hooks_protocol::InstanceId;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use tracing::info;

use crate::config::SessionOverrides;
use crate::db::{now_timestamp, Db};
use crate::error::{HooksError, Result};
use crate::process::ProcessProbe;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    /// The assistant process that owns the session.
    pub owning_pid: u32,
    /// The dedicated server serving the session.
    pub server_pid: u32,
    pub server_port: u16,
    pub overrides: SessionOverrides,
    pub created_at: String,
}

impl SessionRecord {
    pub fn instance_id(&self) -> InstanceId {
        InstanceId::new(self.server_pid, self.server_port)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get(0)?,
            owning_pid: row.get(1)?,
            server_pid: row.get(2)?,
            server_port: row.get(3)?,
            overrides: SessionOverrides {
                tts_language: row.get(4)?,
                tts_providers: row.get(5)?,
                tts_cache_enabled: row.get(6)?,
                elevenlabs_voice_id: row.get(7)?,
                elevenlabs_model_id: row.get(8)?,
                silent_announcements: row.get(9)?,
                silent_effects: row.get(10)?,
                openrouter_enabled: row.get(11)?,
                openrouter_model: row.get(12)?,
                openrouter_contextual_stop: row.get(13)?,
                openrouter_contextual_pretooluse: row.get(14)?,
            },
            created_at: row.get(15)?,
        })
    }
}

const SESSION_COLUMNS: &str = "session_id, owning_pid, server_pid, server_port, \
    tts_language, tts_providers, tts_cache_enabled, elevenlabs_voice_id, elevenlabs_model_id, \
    silent_announcements, silent_effects, openrouter_enabled, openrouter_model, \
    openrouter_contextual_stop, openrouter_contextual_pretooluse, created_at";

/// A server that just became healthy and wants its session recorded.
#[derive(Debug, Clone)]
pub struct Registration {
    pub session_id: String,
    pub owning_pid: u32,
    pub server_pid: u32,
    pub server_port: u16,
    pub overrides: SessionOverrides,
}

impl Db {
    /// Records a session. Fails with `PortConflict` if another session's
    /// server is alive on the same port; rows whose server is dead are
    /// removed first.
    pub fn register(&self, registration: &Registration, probe: &dyn ProcessProbe) -> Result<()> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(HooksError::storage("Failed to begin registration"))?;

            let holder: Option<(String, u32)> = tx
                .query_row(
                    "SELECT session_id, server_pid FROM sessions \
                     WHERE server_port = ?1 AND session_id != ?2",
                    params![registration.server_port, registration.session_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(HooksError::storage("Failed to check port holder"))?;

            if let Some((holder_id, holder_pid)) = holder {
                if probe.is_alive(holder_pid) {
                    return Err(HooksError::PortConflict {
                        port: registration.server_port,
                        holder: holder_id,
                    });
                }
                info!(
                    session = %holder_id,
                    port = registration.server_port,
                    "Removing stale session holding port"
                );
                tx.execute("DELETE FROM sessions WHERE session_id = ?1", params![holder_id])
                    .map_err(HooksError::storage("Failed to remove stale session"))?;
            }

            let o = &registration.overrides;
            tx.execute(
                "INSERT INTO sessions \
                    (session_id, owning_pid, server_pid, server_port, \
                     tts_language, tts_providers, tts_cache_enabled, elevenlabs_voice_id, \
                     elevenlabs_model_id, silent_announcements, silent_effects, openrouter_enabled, \
                     openrouter_model, openrouter_contextual_stop, openrouter_contextual_pretooluse, \
                     created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16) \
                 ON CONFLICT(session_id) DO UPDATE SET \
                    owning_pid = excluded.owning_pid, \
                    server_pid = excluded.server_pid, \
                    server_port = excluded.server_port, \
                    tts_language = excluded.tts_language, \
                    tts_providers = excluded.tts_providers, \
                    tts_cache_enabled = excluded.tts_cache_enabled, \
                    elevenlabs_voice_id = excluded.elevenlabs_voice_id, \
                    elevenlabs_model_id = excluded.elevenlabs_model_id, \
                    silent_announcements = excluded.silent_announcements, \
                    silent_effects = excluded.silent_effects, \
                    openrouter_enabled = excluded.openrouter_enabled, \
                    openrouter_model = excluded.openrouter_model, \
                    openrouter_contextual_stop = excluded.openrouter_contextual_stop, \
                    openrouter_contextual_pretooluse = excluded.openrouter_contextual_pretooluse",
                params![
                    registration.session_id,
                    registration.owning_pid,
                    registration.server_pid,
                    registration.server_port,
                    o.tts_language,
                    o.tts_providers,
                    o.tts_cache_enabled,
                    o.elevenlabs_voice_id,
                    o.elevenlabs_model_id,
                    o.silent_announcements,
                    o.silent_effects,
                    o.openrouter_enabled,
                    o.openrouter_model,
                    o.openrouter_contextual_stop,
                    o.openrouter_contextual_pretooluse,
                    now_timestamp(),
                ],
            )
            .map_err(HooksError::storage("Failed to register session"))?;

            tx.commit()
                .map_err(HooksError::storage("Failed to commit registration"))?;
            Ok(())
        })
    }

    pub fn lookup(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.with_connection(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM sessions WHERE session_id = ?1", SESSION_COLUMNS),
                params![session_id],
                SessionRecord::from_row,
            )
            .optional()
            .map_err(HooksError::storage("Failed to look up session"))
        })
    }

    pub fn lookup_by_port(&self, port: u16) -> Result<Option<SessionRecord>> {
        self.with_connection(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM sessions WHERE server_port = ?1", SESSION_COLUMNS),
                params![port],
                SessionRecord::from_row,
            )
            .optional()
            .map_err(HooksError::storage("Failed to look up session by port"))
        })
    }

    /// Removes a session. Missing sessions are not an error.
    pub fn unregister(&self, session_id: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let removed = conn
                .execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])
                .map_err(HooksError::storage("Failed to unregister session"))?;
            Ok(removed > 0)
        })
    }

    /// Removes a session only while it still points at `server_pid`, so a
    /// server exiting late cannot delete its replacement's row.
    pub fn unregister_if_server(&self, session_id: &str, server_pid: u32) -> Result<bool> {
        self.with_connection(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM sessions WHERE session_id = ?1 AND server_pid = ?2",
                    params![session_id, server_pid],
                )
                .map_err(HooksError::storage("Failed to unregister session"))?;
            Ok(removed > 0)
        })
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM sessions ORDER BY server_port ASC",
                    SESSION_COLUMNS
                ))
                .map_err(HooksError::storage("Failed to prepare sessions query"))?;
            let rows = stmt
                .query_map([], SessionRecord::from_row)
                .map_err(HooksError::storage("Failed to read sessions"))?;
            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row.map_err(HooksError::storage("Failed to decode session row"))?);
            }
            Ok(sessions)
        })
    }

    /// Sessions whose owning process no longer exists.
    pub fn orphans(&self, probe: &dyn ProcessProbe) -> Result<Vec<SessionRecord>> {
        Ok(self
            .list_sessions()?
            .into_iter()
            .filter(|session| !probe.is_alive(session.owning_pid))
            .collect())
    }

    /// Deletes sessions whose owning process is gone and returns their ids.
    pub fn sweep_orphans(&self, probe: &dyn ProcessProbe) -> Result<Vec<String>> {
        let orphans = self.orphans(probe)?;
        if orphans.is_empty() {
            return Ok(Vec::new());
        }

        self.with_connection(|conn| {
            let mut removed = Vec::new();
            for orphan in orphans {
                // Matching the owner too leaves a row re-registered meanwhile alone.
                let count = conn
                    .execute(
                        "DELETE FROM sessions WHERE session_id = ?1 AND owning_pid = ?2",
                        params![orphan.session_id, orphan.owning_pid],
                    )
                    .map_err(HooksError::storage("Failed to remove orphaned session"))?;
                if count > 0 {
                    info!(
                        session = %orphan.session_id,
                        owning_pid = orphan.owning_pid,
                        port = orphan.server_port,
                        "Removed orphaned session"
                    );
                    removed.push(orphan.session_id);
                }
            }
            Ok(removed)
        })
    }

    /// Ports held by sessions whose server is still running.
    pub fn live_ports(&self, probe: &dyn ProcessProbe) -> Result<Vec<u16>> {
        Ok(self
            .list_sessions()?
            .into_iter()
            .filter(|session| probe.is_alive(session.server_pid))
            .map(|session| session.server_port)
            .collect())
    }

    pub fn has_live_sessions(&self, probe: &dyn ProcessProbe) -> Result<bool> {
        Ok(self
            .list_sessions()?
            .iter()
            .any(|session| probe.is_alive(session.owning_pid) && probe.is_alive(session.server_pid)))
    }
}
