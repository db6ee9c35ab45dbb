//! Event → sound/announcement mapping.
//!
//! Each event resolves to a sound key (`session_start_resume`, ...) from its
//! kind plus a "source" pulled out of the event data. The key names the
//! prerecorded clip (`<key>.mp3`) and carries a short spoken description that
//! synthesized providers read aloud.

use cc_hooks_protocol::HookEventKind;
use serde_json::Value;

pub const DEFAULT_VOLUME: f32 = 0.5;

const SOURCE_FIELDS: [&str; 5] = ["source", "reason", "trigger", "action", "type"];

/// Best-effort "why did this event fire" string, lowercased.
pub fn extract_source(kind: &HookEventKind, data: &Value) -> Option<String> {
    match kind {
        HookEventKind::Notification => {
            if let Some(message) = data.get("message") {
                let message = value_text(message);
                let source = if message.starts_with("Claude needs your permission") {
                    "permission"
                } else if message.starts_with("Claude is waiting for your input") {
                    "waiting"
                } else {
                    "general"
                };
                return Some(source.to_string());
            }
        }
        HookEventKind::PreToolUse | HookEventKind::PostToolUse => {
            if let Some(tool) = data.get("tool_name").map(value_text).filter(|t| !t.is_empty()) {
                return Some(tool.to_lowercase());
            }
        }
        _ => {}
    }

    SOURCE_FIELDS.iter().find_map(|field| {
        data.get(*field)
            .filter(|value| is_truthy(value))
            .map(|value| value_text(value).to_lowercase())
    })
}

/// Sound key for a kind/source pair, falling back to the kind's default key.
pub fn sound_key(kind: &HookEventKind, source: Option<&str>) -> Option<&'static str> {
    use HookEventKind::*;
    let key = match (kind, source) {
        (SessionStart, Some("resume")) => "session_start_resume",
        (SessionStart, Some("clear")) => "session_start_clear",
        (SessionStart, Some("compact")) => "session_start_compact",
        (SessionStart, _) => "session_start_startup",
        (SessionEnd, Some("clear")) => "session_end_clear",
        (SessionEnd, Some("logout")) => "session_end_logout",
        (SessionEnd, Some("prompt_input_exit")) => "session_end_prompt_input_exit",
        (SessionEnd, _) => "session_end_other",
        (PreToolUse, Some("command_blocked")) => "pre_tool_use_command_blocked",
        (PreToolUse, _) => "pre_tool_use_tool_running",
        (PostToolUse, _) => "post_tool_use_tool_completed",
        (Notification, Some("permission")) => "notification_permission",
        (Notification, Some("waiting")) => "notification_waiting",
        (Notification, _) => "notification_general",
        (UserPromptSubmit, _) => "user_prompt_submit_prompt",
        (Stop, _) => "stop_task_completed",
        (SubagentStop, _) => "subagent_stop_agent_completed",
        (PreCompact, Some("manual")) => "pre_compact_manual",
        (PreCompact, _) => "pre_compact_auto",
        (Unknown(_), _) => return None,
    };
    Some(key)
}

pub fn description(key: &str) -> Option<&'static str> {
    let text = match key {
        "session_start_startup" => "Claude Code ready",
        "session_start_resume" => "Session resume",
        "session_start_clear" => "Fresh start",
        "session_start_compact" => "Session refreshed",
        "session_end_clear" => "Session cleared",
        "session_end_logout" => "Logout",
        "session_end_prompt_input_exit" => "Session ended",
        "session_end_other" => "Interrupted",
        "pre_tool_use_tool_running" => "Running tool",
        "pre_tool_use_command_blocked" => "Command Blocked",
        "post_tool_use_tool_completed" => "Tool completed",
        "notification_general" => "Notification",
        "notification_permission" => "Permission required",
        "notification_waiting" => "Waiting for input",
        "user_prompt_submit_prompt" => "Prompt submitted",
        "stop_task_completed" => "Task completed successfully",
        "subagent_stop_agent_completed" => "Agent completed successfully",
        "pre_compact_auto" => "Auto compacting conversation",
        "pre_compact_manual" => "Compacting conversation",
        _ => return None,
    };
    Some(text)
}

/// Resolved mapping for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub key: Option<&'static str>,
    /// Static English text to speak.
    pub text: String,
}

impl Announcement {
    pub fn for_event(kind: &HookEventKind, data: &Value) -> Self {
        let source = extract_source(kind, data);
        let key = sound_key(kind, source.as_deref());
        let text = key
            .and_then(description)
            .map(str::to_string)
            .unwrap_or_else(|| kind.as_str().replace('_', " "));
        Self { key, text }
    }

    pub fn clip_name(&self) -> Option<String> {
        self.key.map(|key| format!("{}.mp3", key))
    }
}

/// Sound effect played for a kind when the event carries no explicit arguments.
pub fn default_effect(kind: &HookEventKind) -> Option<&'static str> {
    match kind {
        HookEventKind::PreToolUse => Some("sound_effect_tek.mp3"),
        HookEventKind::PostToolUse | HookEventKind::SubagentStop => Some("sound_effect_cetek.mp3"),
        HookEventKind::UserPromptSubmit => Some("sound_effect_klek.mp3"),
        HookEventKind::Notification => Some("sound_effect_tung.mp3"),
        _ => None,
    }
}

/// Whether a kind is announced by default. PreToolUse is only announced when
/// contextual pre-tool messages are on.
pub fn announces_by_default(kind: &HookEventKind, contextual_pretooluse: bool) -> bool {
    match kind {
        HookEventKind::SessionStart
        | HookEventKind::SessionEnd
        | HookEventKind::Stop
        | HookEventKind::PreCompact => true,
        HookEventKind::PreToolUse => contextual_pretooluse,
        _ => false,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
