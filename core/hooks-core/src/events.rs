//! Durable event queue.
//!
//! Events are written by the submission endpoint and mutated only by the
//! processor of the instance that owns them. A processor sees an event only if
//! it carries the processor's own instance id and was created at or after the
//! processor's start time.

use cc_hooks_protocol::{
    EventStatus, EventSummary, HookEventKind, InstanceId, StatusCounts,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde_json::{Map, Value};

use crate::db::{format_timestamp, now_timestamp, Db};
use crate::error::{HooksError, Result};

/// An event ready to be queued.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub session_id: String,
    pub kind: HookEventKind,
    pub payload: Value,
    pub arguments: Option<Map<String, Value>>,
    pub owner: InstanceId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: i64,
    pub session_id: String,
    pub kind: HookEventKind,
    pub payload: Value,
    pub arguments: Option<Map<String, Value>>,
    pub status: EventStatus,
    pub instance_id: Option<String>,
    pub created_at: String,
    pub processed_at: Option<String>,
    pub retry_count: u32,
    pub error_message: Option<String>,
}

/// Result of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Returned to pending; a later poll retries it.
    Retrying { retry_count: u32 },
    /// Retry ceiling reached; never claimed again.
    Failed { retry_count: u32 },
}

const EVENT_COLUMNS: &str = "id, session_id, hook_event_name, payload, arguments, status, \
                             instance_id, created_at, processed_at, retry_count, error_message";

struct RawEvent {
    id: i64,
    session_id: String,
    hook_event_name: String,
    payload: String,
    arguments: Option<String>,
    status: String,
    instance_id: Option<String>,
    created_at: String,
    processed_at: Option<String>,
    retry_count: u32,
    error_message: Option<String>,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            hook_event_name: row.get(2)?,
            payload: row.get(3)?,
            arguments: row.get(4)?,
            status: row.get(5)?,
            instance_id: row.get(6)?,
            created_at: row.get(7)?,
            processed_at: row.get(8)?,
            retry_count: row.get(9)?,
            error_message: row.get(10)?,
        })
    }

    fn decode(self) -> Result<StoredEvent> {
        let status = EventStatus::parse(&self.status).ok_or_else(|| HooksError::CorruptRow {
            table: "events",
            details: format!("event {} has unknown status {:?}", self.id, self.status),
        })?;
        let payload = serde_json::from_str(&self.payload)
            .map_err(HooksError::json(format!("Failed to parse payload of event {}", self.id)))?;
        // Unreadable arguments are dropped rather than poisoning the event.
        let arguments = self.arguments.as_deref().and_then(|raw| {
            match serde_json::from_str::<Map<String, Value>>(raw) {
                Ok(map) => Some(map),
                Err(err) => {
                    tracing::warn!(event_id = self.id, error = %err, "Ignoring unreadable event arguments");
                    None
                }
            }
        });

        Ok(StoredEvent {
            id: self.id,
            session_id: self.session_id,
            kind: HookEventKind::parse(&self.hook_event_name),
            payload,
            arguments,
            status,
            instance_id: self.instance_id,
            created_at: self.created_at,
            processed_at: self.processed_at,
            retry_count: self.retry_count,
            error_message: self.error_message,
        })
    }
}

impl StoredEvent {
    pub fn summary(&self) -> EventSummary {
        EventSummary {
            id: self.id,
            session_id: self.session_id.clone(),
            hook_event_name: self.kind.clone(),
            status: self.status,
            retry_count: self.retry_count,
            created_at: self.created_at.clone(),
            processed_at: self.processed_at.clone(),
            error_message: self.error_message.clone(),
        }
    }

    /// The submitted data with the header fields guaranteed present.
    pub fn event_data(&self) -> Value {
        let mut data = match &self.payload {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        data.insert("session_id".to_string(), Value::String(self.session_id.clone()));
        data.insert(
            "hook_event_name".to_string(),
            Value::String(self.kind.as_str().to_string()),
        );
        Value::Object(data)
    }
}

impl Db {
    pub fn enqueue(&self, event: &NewEvent) -> Result<i64> {
        self.enqueue_at(event, Utc::now())
    }

    /// Queues an event with an explicit creation time.
    pub fn enqueue_at(&self, event: &NewEvent, created_at: DateTime<Utc>) -> Result<i64> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(HooksError::json("Failed to serialize event payload"))?;
        let arguments = event
            .arguments
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(HooksError::json("Failed to serialize event arguments"))?;

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO events \
                    (session_id, hook_event_name, payload, arguments, status, instance_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6)",
                params![
                    event.session_id,
                    event.kind.as_str(),
                    payload,
                    arguments,
                    event.owner.to_string(),
                    format_timestamp(created_at),
                ],
            )
            .map_err(HooksError::storage("Failed to insert event"))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Atomically moves the oldest eligible pending event to `processing`.
    ///
    /// The conditional update only affects a row that is still pending, so
    /// concurrent claimers of the same owner can never both win it.
    pub fn claim_next_pending(
        &self,
        owner: &InstanceId,
        started_at: DateTime<Utc>,
    ) -> Result<Option<StoredEvent>> {
        let raw = self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(HooksError::storage("Failed to begin claim"))?;
            let raw = tx
                .query_row(
                    &format!(
                        "UPDATE events \
                         SET status = 'processing', processed_at = ?3 \
                         WHERE id = ( \
                            SELECT id FROM events \
                            WHERE status = 'pending' AND instance_id = ?1 AND created_at >= ?2 \
                            ORDER BY id ASC LIMIT 1 \
                         ) AND status = 'pending' \
                         RETURNING {}",
                        EVENT_COLUMNS
                    ),
                    params![owner.to_string(), format_timestamp(started_at), now_timestamp()],
                    RawEvent::from_row,
                )
                .optional()
                .map_err(HooksError::storage("Failed to claim pending event"))?;
            tx.commit()
                .map_err(HooksError::storage("Failed to commit claim"))?;
            Ok(raw)
        })?;

        raw.map(RawEvent::decode).transpose()
    }

    pub fn mark_completed(&self, id: i64) -> Result<()> {
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE events SET status = 'completed', processed_at = ?2, error_message = NULL \
                     WHERE id = ?1",
                    params![id, now_timestamp()],
                )
                .map_err(HooksError::storage("Failed to mark event completed"))?;
            if changed == 0 {
                return Err(HooksError::EventNotFound(id));
            }
            Ok(())
        })
    }

    /// Records a failed attempt. The attempt counts toward the ceiling: an
    /// event failing `max_retries` times ends `failed` with that retry count.
    pub fn mark_failed(&self, id: i64, error: &str, max_retries: u32) -> Result<FailureOutcome> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(HooksError::storage("Failed to begin failure update"))?;
            let retry_count: u32 = tx
                .query_row(
                    "SELECT retry_count FROM events WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(HooksError::storage("Failed to read retry count"))?
                .ok_or(HooksError::EventNotFound(id))?;

            let retry_count = retry_count.saturating_add(1);
            let outcome = if retry_count < max_retries {
                FailureOutcome::Retrying { retry_count }
            } else {
                FailureOutcome::Failed { retry_count }
            };
            let status = match outcome {
                FailureOutcome::Retrying { .. } => EventStatus::Pending,
                FailureOutcome::Failed { .. } => EventStatus::Failed,
            };

            tx.execute(
                "UPDATE events SET status = ?2, retry_count = ?3, error_message = ?4, processed_at = ?5 \
                 WHERE id = ?1",
                params![id, status.as_str(), retry_count, error, now_timestamp()],
            )
            .map_err(HooksError::storage("Failed to mark event failed"))?;
            tx.commit()
                .map_err(HooksError::storage("Failed to commit failure update"))?;
            Ok(outcome)
        })
    }

    pub fn get_event(&self, id: i64) -> Result<Option<StoredEvent>> {
        let raw = self.with_connection(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS),
                params![id],
                RawEvent::from_row,
            )
            .optional()
            .map_err(HooksError::storage("Failed to load event"))
        })?;
        raw.map(RawEvent::decode).transpose()
    }

    /// True when the instance still owns pending or processing events.
    pub fn has_pending(&self, instance_id: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM events \
                     WHERE instance_id = ?1 AND status IN ('pending', 'processing')",
                    params![instance_id],
                    |row| row.get(0),
                )
                .map_err(HooksError::storage("Failed to count in-flight events"))?;
            Ok(count > 0)
        })
    }

    pub fn last_event_status(&self, instance_id: &str) -> Result<Option<EventStatus>> {
        let status: Option<String> = self.with_connection(|conn| {
            conn.query_row(
                "SELECT status FROM events WHERE instance_id = ?1 ORDER BY id DESC LIMIT 1",
                params![instance_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(HooksError::storage("Failed to read last event status"))
        })?;
        Ok(status.as_deref().and_then(EventStatus::parse))
    }

    pub fn status_counts(&self, instance_id: Option<&str>) -> Result<StatusCounts> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT status, COUNT(*) FROM events \
                     WHERE (?1 IS NULL OR instance_id = ?1) GROUP BY status",
                )
                .map_err(HooksError::storage("Failed to prepare status query"))?;
            let rows = stmt
                .query_map(params![instance_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(HooksError::storage("Failed to read status counts"))?;

            let mut counts = StatusCounts::default();
            for row in rows {
                let (status, count) =
                    row.map_err(HooksError::storage("Failed to decode status row"))?;
                let count = count.max(0) as u64;
                match EventStatus::parse(&status) {
                    Some(EventStatus::Pending) => counts.pending += count,
                    Some(EventStatus::Processing) => counts.processing += count,
                    Some(EventStatus::Completed) => counts.completed += count,
                    Some(EventStatus::Failed) => counts.failed += count,
                    None => tracing::warn!(status = %status, "Unknown event status in store"),
                }
            }
            Ok(counts)
        })
    }

    pub fn recent_events(&self, instance_id: Option<&str>, limit: usize) -> Result<Vec<StoredEvent>> {
        let raws = self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM events WHERE (?1 IS NULL OR instance_id = ?1) \
                     ORDER BY id DESC LIMIT ?2",
                    EVENT_COLUMNS
                ))
                .map_err(HooksError::storage("Failed to prepare recent events query"))?;
            let rows = stmt
                .query_map(params![instance_id, limit as i64], RawEvent::from_row)
                .map_err(HooksError::storage("Failed to read recent events"))?;
            let mut raws = Vec::new();
            for row in rows {
                raws.push(row.map_err(HooksError::storage("Failed to decode event row"))?);
            }
            Ok(raws)
        })?;
        raws.into_iter().map(RawEvent::decode).collect()
    }
}
