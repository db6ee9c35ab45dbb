//! Assistant JSONL transcript parsing.
//!
//! Pulls the most recent user prompt and assistant reply out of a session
//! transcript to give contextual messages something to summarize. Only the
//! current turn counts: the backwards scan stops at the previous Stop hook
//! entry, and meta or system entries (local command output, reminders) are
//! skipped.
//!
//! [`ProcessedMarkers`] remembers the last reply announced per session so
//! the same reply is not summarized twice.

use cc_hooks_core::HooksPaths;
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

pub const MAX_CONTEXT_CHARS: usize = 2000;
pub const MARKER_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

const MARKER_PREFIX: &str = "last-processed-";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationContext {
    pub last_user_prompt: Option<String>,
    pub last_assistant_text: Option<String>,
    /// Fingerprint of the transcript entry `last_assistant_text` came from.
    pub assistant_hash: Option<String>,
}

impl ConversationContext {
    pub fn has_context(&self) -> bool {
        self.last_user_prompt.is_some() || self.last_assistant_text.is_some()
    }
}

/// Reads the transcript backwards; unreadable files yield an empty context.
pub fn extract_context(path: &Path, max_chars: usize) -> ConversationContext {
    let contents = match fs_err::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!(error = %err, "Failed to read transcript");
            return ConversationContext::default();
        }
    };

    let mut context = ConversationContext::default();
    for line in contents.lines().rev() {
        if context.last_user_prompt.is_some() && context.last_assistant_text.is_some() {
            break;
        }
        let Ok(entry) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if is_stop_boundary(&entry) {
            debug!("Reached previous Stop in transcript");
            break;
        }
        if entry.get("isMeta").and_then(Value::as_bool).unwrap_or(false) {
            continue;
        }

        let content = entry.get("message").and_then(|m| m.get("content"));
        match entry.get("type").and_then(Value::as_str) {
            Some("assistant") if context.last_assistant_text.is_none() => {
                if let Some(text) = content.and_then(text_of) {
                    context.last_assistant_text = Some(truncate(&text, max_chars));
                    context.assistant_hash = Some(entry_hash(&entry));
                }
            }
            Some("user") if context.last_user_prompt.is_none() => {
                context.last_user_prompt = content.and_then(text_of).map(|t| truncate(&t, max_chars));
            }
            _ => {}
        }
    }
    context
}

fn is_stop_boundary(entry: &Value) -> bool {
    entry.get("type").and_then(Value::as_str) == Some("hook")
        && entry.get("hookEventName").and_then(Value::as_str) == Some("Stop")
}

fn entry_hash(entry: &Value) -> String {
    let field = |name: &str| entry.get(name).and_then(Value::as_str).unwrap_or("");
    let message = entry.get("message").map(Value::to_string).unwrap_or_default();
    let digest = md5::compute(format!("{}_{}_{}", field("timestamp"), field("type"), message));
    format!("{:x}", digest)
}

/// Text of a message body: either a plain string or the text blocks of a
/// content array. Tool results and tool calls carry no prompt text.
fn text_of(content: &Value) -> Option<String> {
    let text = match content {
        Value::String(text) => text.trim().to_string(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Per-session marker files under `run/processed/`. Failures are logged and
/// never block an announcement.
#[derive(Debug, Clone)]
pub struct ProcessedMarkers {
    paths: HooksPaths,
}

impl ProcessedMarkers {
    pub fn new(paths: HooksPaths) -> Self {
        Self { paths }
    }

    /// Drops the context when its reply was already announced for this
    /// session; otherwise records the reply and passes the context through.
    pub fn filter(&self, session_id: &str, context: ConversationContext) -> ConversationContext {
        let Some(hash) = context.assistant_hash.as_deref() else {
            return context;
        };
        if self.last(session_id).as_deref() == Some(hash) {
            debug!(session = %session_id, hash, "Reply already announced; skipping context");
            return ConversationContext::default();
        }
        self.save(session_id, hash);
        context
    }

    fn last(&self, session_id: &str) -> Option<String> {
        let content = fs_err::read_to_string(self.paths.processed_marker(session_id)).ok()?;
        let hash = content.trim();
        (!hash.is_empty()).then(|| hash.to_string())
    }

    fn save(&self, session_id: &str, hash: &str) {
        let result = fs_err::create_dir_all(self.paths.processed_dir())
            .and_then(|()| fs_err::write(self.paths.processed_marker(session_id), hash));
        if let Err(err) = result {
            warn!(session = %session_id, error = %err, "Failed to save processed marker");
        }
    }

    pub fn clear(&self, session_id: &str) {
        match fs_err::remove_file(self.paths.processed_marker(session_id)) {
            Ok(()) => debug!(session = %session_id, "Cleared processed marker"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(session = %session_id, error = %err, "Failed to clear processed marker"),
        }
    }

    /// Removes markers last written more than `max_age` ago. Returns the
    /// number removed.
    pub fn remove_older_than(&self, max_age: Duration) -> usize {
        let Ok(entries) = fs_err::read_dir(self.paths.processed_dir()) else {
            return 0;
        };
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.filter_map(|entry| entry.ok()) {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(MARKER_PREFIX) {
                continue;
            }
            let expired = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > max_age);
            if !expired {
                continue;
            }
            match fs_err::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) => warn!(error = %err, "Failed to remove old processed marker"),
            }
        }
        removed
    }
}
