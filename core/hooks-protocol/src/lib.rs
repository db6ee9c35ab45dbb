//! Wire types and validation for the cc-hooks HTTP surface.
//!
//! This crate is shared by the per-session server and its clients (the hook
//! CLI and the shutdown coordinator) to prevent schema drift. The server
//! remains the authority on validation, but clients reuse the same types to
//! build valid requests and parse responses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// First port probed when a new dedicated server is launched.
pub const BASE_PORT: u16 = 12222;
pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const PORT_ENV: &str = "CC_HOOKS_PORT";
pub const INSTANCE_ENV: &str = "CC_INSTANCE_ID";
pub const SESSION_ENV: &str = "CC_HOOKS_SESSION_ID";

pub const QUEUED_MESSAGE: &str = "Event queued for processing";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub code: String,
    pub message: String,
}

impl ProtocolError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProtocolError {}

// ═══════════════════════════════════════════════════════════════════════════════
// Event kinds and statuses
// ═══════════════════════════════════════════════════════════════════════════════

/// Hook event emitted by the assistant.
///
/// The set is open: names the server does not recognize are kept verbatim in
/// `Unknown` so they can still be queued (and logged) instead of rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HookEventKind {
    SessionStart,
    SessionEnd,
    PreToolUse,
    PostToolUse,
    UserPromptSubmit,
    Notification,
    Stop,
    SubagentStop,
    PreCompact,
    Unknown(String),
}

impl HookEventKind {
    pub const KNOWN: [HookEventKind; 9] = [
        HookEventKind::SessionStart,
        HookEventKind::SessionEnd,
        HookEventKind::PreToolUse,
        HookEventKind::PostToolUse,
        HookEventKind::UserPromptSubmit,
        HookEventKind::Notification,
        HookEventKind::Stop,
        HookEventKind::SubagentStop,
        HookEventKind::PreCompact,
    ];

    pub fn parse(name: &str) -> Self {
        match name {
            "SessionStart" => Self::SessionStart,
            "SessionEnd" => Self::SessionEnd,
            "PreToolUse" => Self::PreToolUse,
            "PostToolUse" => Self::PostToolUse,
            "UserPromptSubmit" => Self::UserPromptSubmit,
            "Notification" => Self::Notification,
            "Stop" => Self::Stop,
            "SubagentStop" => Self::SubagentStop,
            "PreCompact" => Self::PreCompact,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::Notification => "Notification",
            Self::Stop => "Stop",
            Self::SubagentStop => "SubagentStop",
            Self::PreCompact => "PreCompact",
            Self::Unknown(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for HookEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for HookEventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HookEventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Pending and processing events still need the server to stay up.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Instance identity
// ═══════════════════════════════════════════════════════════════════════════════

/// Identity of one dedicated server process, rendered as `{pid}:{port}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId {
    pub pid: u32,
    pub port: u16,
}

impl InstanceId {
    pub fn new(pid: u32, port: u16) -> Self {
        Self { pid, port }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid, self.port)
    }
}

impl FromStr for InstanceId {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ProtocolError::new(
                "invalid_instance_id",
                format!("instance_id must look like <pid>:<port>, got {:?}", value),
            )
        };
        let (pid, port) = value.trim().split_once(':').ok_or_else(invalid)?;
        let pid = pid.parse::<u32>().map_err(|_| invalid())?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        if pid == 0 || port == 0 {
            return Err(invalid());
        }
        Ok(Self { pid, port })
    }
}

impl Serialize for InstanceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InstanceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Requests and responses
// ═══════════════════════════════════════════════════════════════════════════════

/// Body of `POST /events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEventRequest {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// Fields every submitted event must carry inside `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub session_id: String,
    pub kind: HookEventKind,
}

impl SubmitEventRequest {
    pub fn header(&self) -> Result<EventHeader, ProtocolError> {
        let data = self.data.as_object().ok_or_else(|| {
            ProtocolError::new("invalid_data", "data must be a JSON object")
        })?;
        let session_id = require_string(data, "session_id")?;
        let hook_event_name = require_string(data, "hook_event_name")?;
        Ok(EventHeader {
            session_id,
            kind: HookEventKind::parse(&hook_event_name),
        })
    }

    /// Parses the submitted instance identity. Submissions without one are a
    /// caller misconfiguration and are rejected.
    pub fn instance(&self) -> Result<InstanceId, ProtocolError> {
        match self.instance_id.as_deref() {
            Some(raw) if !raw.trim().is_empty() => raw.parse(),
            _ => Err(ProtocolError::new(
                "missing_instance_id",
                format!("instance_id is required (set {})", INSTANCE_ENV),
            )),
        }
    }
}

fn require_string(data: &Map<String, Value>, field: &str) -> Result<String, ProtocolError> {
    match data.get(field).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        _ => Err(ProtocolError::new(
            "missing_field",
            format!("Missing required field: {}", field),
        )),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEventResponse {
    pub status: String,
    pub message: String,
    pub event_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: ProtocolError,
}

impl ErrorResponse {
    pub fn new(error: ProtocolError) -> Self {
        Self {
            status: "error".to_string(),
            error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub pid: u32,
    pub port: u16,
    pub instance_id: InstanceId,
    pub session_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: i64,
    pub session_id: String,
    pub hook_event_name: HookEventKind,
    pub status: EventStatus,
    pub retry_count: u32,
    pub created_at: String,
    #[serde(default)]
    pub processed_at: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Body of `GET /events/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsStatusResponse {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub counts: StatusCounts,
    pub recent: Vec<EventSummary>,
}

/// Body of `GET /instances/{instance_id}/last-event`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastEventResponse {
    pub instance_id: String,
    #[serde(default)]
    pub last_event_status: Option<EventStatus>,
    pub has_pending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: u32,
    pub description: String,
    pub applied_at: String,
}

/// Body of `GET /migrations/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationStatusResponse {
    pub current_version: u32,
    pub latest_version: u32,
    pub pending_migrations: Vec<u32>,
    pub applied_migrations: Vec<AppliedMigration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub status: String,
    pub message: String,
}

impl AckResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(data: Value, instance_id: Option<&str>) -> SubmitEventRequest {
        SubmitEventRequest {
            data,
            arguments: None,
            instance_id: instance_id.map(str::to_string),
        }
    }

    #[test]
    fn header_requires_session_and_event_name() {
        let ok = request(
            json!({"session_id": "s1", "hook_event_name": "SessionStart"}),
            None,
        );
        let header = ok.header().expect("header");
        assert_eq!(header.session_id, "s1");
        assert_eq!(header.kind, HookEventKind::SessionStart);

        let missing_session = request(json!({"hook_event_name": "Stop"}), None);
        assert_eq!(missing_session.header().unwrap_err().code, "missing_field");

        let missing_name = request(json!({"session_id": "s1"}), None);
        assert!(missing_name.header().is_err());

        let not_object = request(json!(["s1"]), None);
        assert_eq!(not_object.header().unwrap_err().code, "invalid_data");
    }

    #[test]
    fn unknown_event_names_are_kept() {
        let req = request(
            json!({"session_id": "s1", "hook_event_name": "BrandNewHook"}),
            None,
        );
        let header = req.header().expect("header");
        assert_eq!(header.kind, HookEventKind::Unknown("BrandNewHook".to_string()));
        assert!(!header.kind.is_known());
        assert_eq!(header.kind.as_str(), "BrandNewHook");
    }

    #[test]
    fn known_kinds_round_trip_through_names() {
        for kind in HookEventKind::KNOWN {
            assert_eq!(HookEventKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn instance_id_parses_pid_and_port() {
        let id: InstanceId = "4242:12223".parse().expect("instance id");
        assert_eq!(id, InstanceId::new(4242, 12223));
        assert_eq!(id.to_string(), "4242:12223");

        assert!("4242".parse::<InstanceId>().is_err());
        assert!("abc:12222".parse::<InstanceId>().is_err());
        assert!("0:12222".parse::<InstanceId>().is_err());
        assert!("12:99999".parse::<InstanceId>().is_err());
    }

    #[test]
    fn submission_without_instance_is_rejected() {
        let req = request(json!({"session_id": "s1", "hook_event_name": "Stop"}), None);
        assert_eq!(req.instance().unwrap_err().code, "missing_instance_id");

        let blank = request(json!({}), Some("  "));
        assert!(blank.instance().is_err());

        let ok = request(json!({}), Some("10:12222"));
        assert_eq!(ok.instance().expect("instance"), InstanceId::new(10, 12222));
    }

    #[test]
    fn event_status_in_flight() {
        assert!(EventStatus::Pending.is_in_flight());
        assert!(EventStatus::Processing.is_in_flight());
        assert!(!EventStatus::Completed.is_in_flight());
        assert!(!EventStatus::Failed.is_in_flight());
        assert_eq!(EventStatus::parse("failed"), Some(EventStatus::Failed));
        assert_eq!(EventStatus::parse("bogus"), None);
    }

    #[test]
    fn health_response_serializes_instance_as_string() {
        let health = HealthResponse {
            status: "ok".to_string(),
            pid: 7,
            port: 12222,
            instance_id: InstanceId::new(7, 12222),
            session_id: "s1".to_string(),
        };
        let value = serde_json::to_value(&health).expect("serialize");
        assert_eq!(value["instance_id"], "7:12222");
        let back: HealthResponse = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, health);
    }
}
