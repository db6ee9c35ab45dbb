//! Error types for cc-hooks-core operations.

use std::path::PathBuf;

/// All errors that can occur in cc-hooks-core operations.
#[derive(Debug, thiserror::Error)]
pub enum HooksError {
    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Migration {version} failed: {source}")]
    Migration {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Event {0} not found")]
    EventNotFound(i64),

    #[error("Corrupt row in {table}: {details}")]
    CorruptRow { table: &'static str, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Launch Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Port {port} is already held by live session {holder}")]
    PortConflict { port: u16, holder: String },

    #[error("No free port in {start}..={end}")]
    NoPortAvailable { start: u16, end: u16 },

    #[error("Server on port {port} did not become healthy after {attempts} attempts")]
    StartupTimeout { port: u16, attempts: u32 },

    #[error("Failed to spawn server: {0}")]
    SpawnFailed(String),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("HTTP error: {context}: {source}")]
    Http {
        context: String,
        #[source]
        source: reqwest::Error,
    },
}

impl HooksError {
    pub(crate) fn storage(context: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Self {
        let context = context.into();
        move |source| HooksError::Storage { context, source }
    }

    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| HooksError::Io { context, source }
    }

    pub(crate) fn json(context: impl Into<String>) -> impl FnOnce(serde_json::Error) -> Self {
        let context = context.into();
        move |source| HooksError::Json { context, source }
    }

    pub(crate) fn http(context: impl Into<String>) -> impl FnOnce(reqwest::Error) -> Self {
        let context = context.into();
        move |source| HooksError::Http { context, source }
    }
}

/// Convenience type alias for Results using HooksError.
pub type Result<T> = std::result::Result<T, HooksError>;

impl From<HooksError> for String {
    fn from(err: HooksError) -> String {
        err.to_string()
    }
}
