//! Per-server tracking files and scratch directory cleanup.
//!
//! Each running server drops a small JSON file in `run/` so a human (or
//! `cc-hook status`) can see what is up without opening the database.
//! Once the last session goes away, `run/` and `tmp/` are emptied.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{HooksError, Result};
use crate::paths::HooksPaths;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub session_id: String,
    pub server_pid: u32,
    pub server_port: u16,
    pub owning_pid: u32,
    pub started_at: String,
}

/// Writes the tracking file atomically (temp file + rename).
pub fn write_tracking_file(paths: &HooksPaths, record: &TrackingRecord) -> Result<()> {
    let path = paths.tracking_file(&record.session_id);
    let dir = paths.run_dir();
    fs_err::create_dir_all(&dir).map_err(HooksError::io("Failed to create run dir"))?;

    let content =
        serde_json::to_vec_pretty(record).map_err(HooksError::json("Failed to encode tracking record"))?;
    let tmp_path = dir.join(format!(".{}.tmp", record.server_port));
    {
        let mut file =
            fs_err::File::create(&tmp_path).map_err(HooksError::io("Failed to create tracking file"))?;
        file.write_all(&content)
            .map_err(HooksError::io("Failed to write tracking file"))?;
        file.sync_all()
            .map_err(HooksError::io("Failed to sync tracking file"))?;
    }
    fs_err::rename(&tmp_path, &path).map_err(HooksError::io("Failed to move tracking file into place"))?;
    Ok(())
}

pub fn read_tracking_file(paths: &HooksPaths, session_id: &str) -> Option<TrackingRecord> {
    let content = fs_err::read(paths.tracking_file(session_id)).ok()?;
    serde_json::from_slice(&content).ok()
}

/// Removes the tracking file. Missing files are fine.
pub fn remove_tracking_file(paths: &HooksPaths, session_id: &str) {
    let path = paths.tracking_file(session_id);
    match fs_err::remove_file(&path) {
        Ok(()) => debug!(path = %path.display(), "Removed tracking file"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(error = %err, "Failed to remove tracking file"),
    }
}

/// Empties the scratch directories, leaving the directories themselves.
/// Returns the number of files removed.
pub fn clean_scratch_dirs(paths: &HooksPaths) -> usize {
    paths
        .scratch_dirs()
        .iter()
        .map(|dir| clean_dir_contents(dir))
        .sum()
}

fn clean_dir_contents(dir: &Path) -> usize {
    if !dir.is_dir() {
        return 0;
    }
    let mut removed = 0;
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        let path = entry.path();
        let result = if entry.file_type().is_dir() {
            fs_err::remove_dir(path)
        } else {
            fs_err::remove_file(path).map(|()| removed += 1)
        };
        if let Err(err) = result {
            warn!(error = %err, "Failed to clean scratch entry");
        }
    }
    removed
}
