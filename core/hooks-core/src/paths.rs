//! Filesystem layout for cc-hooks state.
//!
//! Everything lives under one data directory (`$CC_HOOKS_HOME`, default
//! `~/.claude/.cc-hooks`):
//!
//! ```text
//! .cc-hooks/
//! ├── events.db     # events, sessions, migrations
//! ├── config.toml   # optional global configuration
//! ├── logs/         # server and hook logs
//! ├── run/          # per-session tracking files (scratch)
//! │   └── processed/  # last announced assistant reply per session
//! ├── tmp/          # uncached synthesized audio (scratch)
//! └── .tts_cache/   # cached synthesized audio, one dir per provider
//! ```

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{HooksError, Result};

pub const HOME_ENV: &str = "CC_HOOKS_HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HooksPaths {
    root: PathBuf,
}

impl HooksPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves the data directory from the environment.
    pub fn from_env() -> Result<Self> {
        if let Ok(value) = env::var(HOME_ENV) {
            if !value.trim().is_empty() {
                return Ok(Self::new(value));
            }
        }
        let home = dirs::home_dir().ok_or(HooksError::HomeNotFound)?;
        Ok(Self::new(home.join(".claude").join(".cc-hooks")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("events.db")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root.join("run")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.run_dir().join("processed")
    }

    /// Marker holding the last assistant reply announced for a session.
    pub fn processed_marker(&self, session_id: &str) -> PathBuf {
        self.processed_dir()
            .join(format!("last-processed-{}.txt", sanitize(session_id)))
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(".tts_cache")
    }

    pub fn sound_dir(&self) -> PathBuf {
        self.root.join("sound")
    }

    pub fn server_log_path(&self, port: u16) -> PathBuf {
        self.logs_dir().join(format!("server-{}.log", port))
    }

    pub fn tracking_file(&self, session_id: &str) -> PathBuf {
        self.run_dir().join(format!("{}.json", sanitize(session_id)))
    }

    /// Scratch directories that may be wiped once no session is live.
    pub fn scratch_dirs(&self) -> [PathBuf; 2] {
        [self.run_dir(), self.tmp_dir()]
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted_in_data_dir() {
        let paths = HooksPaths::new("/data/hooks");
        assert_eq!(paths.db_path(), PathBuf::from("/data/hooks/events.db"));
        assert_eq!(
            paths.server_log_path(12222),
            PathBuf::from("/data/hooks/logs/server-12222.log")
        );
        assert_eq!(
            paths.tracking_file("abc/../x y"),
            PathBuf::from("/data/hooks/run/abc____x_y.json")
        );
        assert_eq!(
            paths.processed_marker("s/1"),
            PathBuf::from("/data/hooks/run/processed/last-processed-s_1.txt")
        );
    }
}
