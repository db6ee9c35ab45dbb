//! Single-consumer processing loop for this instance's events.
//!
//! ```text
//!        ┌──────── none ────────┐
//!        v                      │
//!   [idle: sleep poll] ──> claim_next_pending ── event ──> handler
//!        ^                      │                          │ ok   -> mark_completed
//!        │                 store error                     │ err  -> mark_failed (retry or fail)
//!        └─ sleep error_wait <──┘                          v
//!                                                   claim again immediately
//! ```
//!
//! Only the sleeps observe cancellation. A handler that has started runs to
//! completion and its outcome is recorded before the loop exits.

use cc_hooks_core::{Db, FailureOutcome, StoredEvent};
use cc_hooks_protocol::InstanceId;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::HandlerError;
use crate::state::with_db;

pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: &StoredEvent) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorOptions {
    pub poll_interval: Duration,
    pub error_wait: Duration,
    pub max_retries: u32,
}

pub struct Processor<H> {
    db: Db,
    owner: InstanceId,
    started_at: DateTime<Utc>,
    handler: Arc<H>,
    options: ProcessorOptions,
}

impl<H: EventHandler> Processor<H> {
    pub fn new(
        db: Db,
        owner: InstanceId,
        started_at: DateTime<Utc>,
        handler: Arc<H>,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            db,
            owner,
            started_at,
            handler,
            options,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(instance_id = %self.owner, "Event processor started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let owner = self.owner;
            let started_at = self.started_at;
            match with_db(&self.db, move |db| db.claim_next_pending(&owner, started_at)).await {
                Ok(Some(event)) => self.dispatch(event).await,
                Ok(None) => {
                    if !sleep_or_cancel(self.options.poll_interval, &cancel).await {
                        break;
                    }
                }
                Err(err) => {
                    error!(error = %err, "Failed to poll for events");
                    if !sleep_or_cancel(self.options.error_wait, &cancel).await {
                        break;
                    }
                }
            }
        }
        info!(instance_id = %self.owner, "Event processor stopped");
    }

    async fn dispatch(&self, event: StoredEvent) {
        let id = event.id;
        info!(
            event_id = id,
            kind = %event.kind,
            session = %event.session_id,
            attempt = event.retry_count + 1,
            max_attempts = self.options.max_retries,
            "Processing event"
        );

        match self.handler.handle(&event).await {
            Ok(()) => match with_db(&self.db, move |db| db.mark_completed(id)).await {
                Ok(()) => debug!(event_id = id, "Event completed"),
                Err(err) => error!(event_id = id, error = %err, "Failed to mark event completed"),
            },
            Err(handler_err) => {
                let message = handler_err.to_string();
                let max = self.options.max_retries;
                match with_db(&self.db, move |db| db.mark_failed(id, &message, max)).await {
                    Ok(FailureOutcome::Retrying { retry_count }) => warn!(
                        event_id = id,
                        error = %handler_err,
                        retry_count,
                        "Event failed; will retry"
                    ),
                    Ok(FailureOutcome::Failed { retry_count }) => error!(
                        event_id = id,
                        error = %handler_err,
                        retry_count,
                        "Event failed permanently"
                    ),
                    Err(err) => error!(event_id = id, error = %err, "Failed to record event failure"),
                }
            }
        }
    }
}

/// Sleeps for `duration`; returns false if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_hooks_core::NewEvent;
    use cc_hooks_protocol::{EventStatus, HookEventKind};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<i64>>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl EventHandler for Recording {
        async fn handle(&self, event: &StoredEvent) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(event.id);
            if self.fail {
                Err(HandlerError::PlayerFailed {
                    player: "fake-player".to_string(),
                    status: "exit status: 1".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn options() -> ProcessorOptions {
        ProcessorOptions {
            poll_interval: Duration::from_millis(5),
            error_wait: Duration::from_millis(5),
            max_retries: 3,
        }
    }

    fn test_db() -> (tempfile::TempDir, Db) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = Db::new(temp_dir.path().join("events.db")).expect("db init");
        (temp_dir, db)
    }

    fn event(owner: InstanceId, session: &str) -> NewEvent {
        NewEvent {
            session_id: session.to_string(),
            kind: HookEventKind::Stop,
            payload: json!({"session_id": session, "hook_event_name": "Stop"}),
            arguments: None,
            owner,
        }
    }

    fn spawn(
        db: &Db,
        owner: InstanceId,
        started_at: DateTime<Utc>,
        handler: Arc<Recording>,
    ) -> (CancellationToken, JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let processor = Processor::new(db.clone(), owner, started_at, handler, options());
        let task = tokio::spawn(processor.run(cancel.clone()));
        (cancel, task)
    }

    async fn wait_for_status(db: &Db, id: i64, status: EventStatus) -> StoredEvent {
        for _ in 0..400 {
            let stored = db.get_event(id).expect("get").expect("event");
            if stored.status == status {
                return stored;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("event {} never reached {:?}", id, status);
    }

    #[tokio::test]
    async fn completes_events_in_order() {
        let (_dir, db) = test_db();
        let owner = InstanceId::new(100, 12222);
        let started = Utc::now() - chrono::Duration::seconds(1);
        let first = db.enqueue(&event(owner, "s1")).expect("enqueue");
        let second = db.enqueue(&event(owner, "s1")).expect("enqueue");

        let handler = Arc::new(Recording::default());
        let (cancel, task) = spawn(&db, owner, started, Arc::clone(&handler));

        wait_for_status(&db, second, EventStatus::Completed).await;
        cancel.cancel();
        task.await.expect("join");

        assert_eq!(*handler.seen.lock().unwrap(), vec![first, second]);
        assert_eq!(
            db.get_event(first).expect("get").expect("event").status,
            EventStatus::Completed
        );
    }

    #[tokio::test]
    async fn always_failing_event_stops_at_retry_ceiling() {
        let (_dir, db) = test_db();
        let owner = InstanceId::new(100, 12222);
        let started = Utc::now() - chrono::Duration::seconds(1);
        let id = db.enqueue(&event(owner, "s1")).expect("enqueue");

        let handler = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let (cancel, task) = spawn(&db, owner, started, Arc::clone(&handler));

        let failed = wait_for_status(&db, id, EventStatus::Failed).await;
        // Give the loop a few more polls to prove it never re-claims.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.expect("join");

        assert_eq!(failed.retry_count, 3);
        assert_eq!(failed.error_message.as_deref(), Some("audio player fake-player exited with exit status: 1"));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn instances_only_process_their_own_events() {
        let (_dir, db) = test_db();
        let a = InstanceId::new(100, 12222);
        let b = InstanceId::new(200, 12223);
        let started = Utc::now() - chrono::Duration::seconds(1);

        let mut a_ids = Vec::new();
        let mut b_ids = Vec::new();
        for i in 0..5 {
            a_ids.push(db.enqueue(&event(a, &format!("a{}", i))).expect("enqueue a"));
            b_ids.push(db.enqueue(&event(b, &format!("b{}", i))).expect("enqueue b"));
        }

        let handler_a = Arc::new(Recording::default());
        let handler_b = Arc::new(Recording::default());
        let (cancel_a, task_a) = spawn(&db, a, started, Arc::clone(&handler_a));
        let (cancel_b, task_b) = spawn(&db, b, started, Arc::clone(&handler_b));

        wait_for_status(&db, *a_ids.last().unwrap(), EventStatus::Completed).await;
        wait_for_status(&db, *b_ids.last().unwrap(), EventStatus::Completed).await;
        cancel_a.cancel();
        cancel_b.cancel();
        task_a.await.expect("join a");
        task_b.await.expect("join b");

        assert_eq!(*handler_a.seen.lock().unwrap(), a_ids);
        assert_eq!(*handler_b.seen.lock().unwrap(), b_ids);
    }

    #[tokio::test]
    async fn events_from_before_start_are_ignored() {
        let (_dir, db) = test_db();
        let owner = InstanceId::new(100, 12222);
        let started = Utc::now();
        let stale = db
            .enqueue_at(&event(owner, "s1"), started - chrono::Duration::seconds(30))
            .expect("enqueue stale");
        let fresh = db.enqueue(&event(owner, "s1")).expect("enqueue fresh");

        let handler = Arc::new(Recording::default());
        let (cancel, task) = spawn(&db, owner, started, Arc::clone(&handler));

        wait_for_status(&db, fresh, EventStatus::Completed).await;
        cancel.cancel();
        task.await.expect("join");

        assert_eq!(*handler.seen.lock().unwrap(), vec![fresh]);
        assert_eq!(
            db.get_event(stale).expect("get").expect("event").status,
            EventStatus::Pending
        );
    }

    #[tokio::test]
    async fn idle_processor_stops_on_cancel() {
        let (_dir, db) = test_db();
        let handler = Arc::new(Recording::default());
        let cancel = CancellationToken::new();
        let processor = Processor::new(
            db,
            InstanceId::new(1, 2),
            Utc::now(),
            handler,
            ProcessorOptions {
                poll_interval: Duration::from_secs(3600),
                ..options()
            },
        );
        let task = tokio::spawn(processor.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("processor stopped")
            .expect("join");
    }
}
