//! Graceful shutdown of a session's server.
//!
//! Order matters: the server is never asked to stop while its queue still
//! has pending or processing work, unless the drain wait times out.
//!
//! 1. Poll the server's last-event view until nothing is in flight
//!    (bounded by `max_wait`).
//! 2. Ask the server to stop over HTTP, falling back to SIGTERM.
//! 3. Wait `grace` for it to exit, then SIGKILL.
//! 4. Remove the registry row and tracking file, unless the session was
//!    relaunched onto another server in the meantime.
//! 5. If no live sessions remain, empty the scratch directories.

use cc_hooks_protocol::InstanceId;
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::HooksConfig;
use crate::db::Db;
use crate::error::Result;
use crate::paths::HooksPaths;
use crate::process::{ProcessProbe, ProcessSignals};
use crate::scratch;

/// Talks to a running server instance.
pub trait InstanceControl: Send + Sync {
    /// True while the instance has pending or processing events.
    fn has_pending(&self, host: &str, port: u16, instance_id: &InstanceId) -> Result<bool>;
    fn request_shutdown(&self, host: &str, port: u16) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownOptions {
    pub host: String,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    pub grace: Duration,
}

impl ShutdownOptions {
    pub fn from_config(config: &HooksConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            max_wait: Duration::from_secs(config.shutdown.max_wait_secs),
            poll_interval: Duration::from_millis(config.shutdown.poll_interval_ms.max(1)),
            grace: Duration::from_millis(config.shutdown.grace_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub session_id: String,
    pub port: u16,
    /// False when the drain wait timed out with work still in flight.
    pub drained: bool,
    pub waited_ms: u64,
    pub forced_kill: bool,
    pub scratch_cleaned: bool,
}

pub struct ShutdownCoordinator<'a> {
    db: &'a Db,
    paths: &'a HooksPaths,
    control: &'a dyn InstanceControl,
    processes: &'a dyn ProcessProbe,
    signals: &'a dyn ProcessSignals,
    options: ShutdownOptions,
}

impl<'a> ShutdownCoordinator<'a> {
    pub fn new(
        db: &'a Db,
        paths: &'a HooksPaths,
        control: &'a dyn InstanceControl,
        processes: &'a dyn ProcessProbe,
        signals: &'a dyn ProcessSignals,
        options: ShutdownOptions,
    ) -> Self {
        Self {
            db,
            paths,
            control,
            processes,
            signals,
            options,
        }
    }

    /// Drains and stops the server for `session_id`.
    ///
    /// Returns `Ok(None)` when the session is not registered.
    pub fn graceful_shutdown(&self, session_id: &str) -> Result<Option<ShutdownReport>> {
        let Some(session) = self.db.lookup(session_id)? else {
            debug!(session = %session_id, "No session to shut down");
            return Ok(None);
        };
        let port = session.server_port;
        let pid = session.server_pid;
        let instance_id = session.instance_id();

        let started = Instant::now();
        let drained = self.wait_for_drain(port, pid, &instance_id, started);
        let waited = started.elapsed();

        let forced_kill = self.stop_server(port, pid);

        if self.db.unregister_if_server(session_id, pid)? {
            scratch::remove_tracking_file(self.paths, session_id);
        } else {
            info!(session = %session_id, server_pid = pid, "Session was relaunched during shutdown; keeping new registration");
        }

        let scratch_cleaned = if self.db.has_live_sessions(self.processes)? {
            false
        } else {
            let removed = scratch::clean_scratch_dirs(self.paths);
            debug!(removed, "Cleaned scratch directories");
            true
        };

        info!(
            session = %session_id,
            port,
            drained,
            forced_kill,
            waited_ms = waited.as_millis() as u64,
            "Session shut down"
        );
        Ok(Some(ShutdownReport {
            session_id: session_id.to_string(),
            port,
            drained,
            waited_ms: waited.as_millis() as u64,
            forced_kill,
            scratch_cleaned,
        }))
    }

    fn wait_for_drain(&self, port: u16, pid: u32, instance_id: &InstanceId, started: Instant) -> bool {
        loop {
            match self.control.has_pending(&self.options.host, port, instance_id) {
                Ok(false) => return true,
                Ok(true) => {}
                Err(err) => {
                    if !self.processes.is_alive(pid) {
                        debug!(port, "Server already gone; nothing left to drain");
                        return true;
                    }
                    warn!(error = %err, port, "Failed to query pending events");
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= self.options.max_wait {
                warn!(port, waited_ms = elapsed.as_millis() as u64, "Drain timed out; stopping anyway");
                return false;
            }
            thread::sleep(self.options.poll_interval.min(self.options.max_wait - elapsed));
        }
    }

    /// Returns true if the server had to be killed.
    fn stop_server(&self, port: u16, pid: u32) -> bool {
        if !self.processes.is_alive(pid) {
            return false;
        }
        if let Err(err) = self.control.request_shutdown(&self.options.host, port) {
            warn!(error = %err, port, "Shutdown request failed; sending SIGTERM");
            self.signals.terminate(pid);
        }
        if self.wait_for_exit(pid) {
            return false;
        }

        warn!(port, pid, "Server still running after grace period; killing");
        self.signals.kill(pid);
        true
    }

    fn wait_for_exit(&self, pid: u32) -> bool {
        let deadline = Instant::now() + self.options.grace;
        let step = Duration::from_millis(50).min(self.options.poll_interval);
        loop {
            if !self.processes.is_alive(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(step);
        }
    }
}
