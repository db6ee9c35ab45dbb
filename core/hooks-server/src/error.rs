//! Error types for event handling and speech synthesis.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("{provider} is not configured: {reason}")]
    Unavailable {
        provider: &'static str,
        reason: String,
    },

    #[error("{provider} request failed: {source}")]
    Request {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned HTTP {status}")]
    Status {
        provider: &'static str,
        status: u16,
    },

    #[error("{provider} returned no audio")]
    EmptyAudio { provider: &'static str },

    #[error("no prerecorded sound at {0}")]
    MissingSound(PathBuf),

    #[error("failed to store audio at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("failed to start audio player {player}: {source}")]
    PlayerSpawn {
        player: String,
        #[source]
        source: std::io::Error,
    },

    #[error("audio player {player} exited with {status}")]
    PlayerFailed { player: String, status: String },
}
