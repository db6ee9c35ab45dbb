//! Instance launcher: finds or starts the dedicated server for a session.
//!
//! ```text
//! acquire_server(session)
//!   ├─ live row for session? ── yes ──> reuse {pid, port}
//!   ├─ scan ports from base, skipping live-session ports and bound ports
//!   ├─ spawn server on chosen port
//!   ├─ poll /health until it answers with the spawned pid
//!   │    child exited early  -> PortConflict (lost a bind race)
//!   │    never healthy       -> kill child, StartupTimeout
//!   └─ register session row  -> PortConflict if another live server won
//! ```
//!
//! `PortConflict` is retried a bounded number of times; the retry either
//! reuses the winner's row (same session) or moves to the next port.

use cc_hooks_protocol::{HealthResponse, InstanceId};
use serde::Serialize;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{HooksConfig, SessionOverrides};
use crate::db::Db;
use crate::error::{HooksError, Result};
use crate::paths::HooksPaths;
use crate::ports::PortProbe;
use crate::process::ProcessProbe;
use crate::sessions::Registration;

/// Everything a freshly spawned server needs to know at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub session_id: String,
    pub host: String,
    pub port: u16,
    pub owning_pid: u32,
    pub overrides: SessionOverrides,
}

pub trait SpawnedServer: Send {
    fn pid(&self) -> u32;
    fn has_exited(&mut self) -> bool;
    fn kill(&mut self);
}

pub trait ServerSpawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> Result<Box<dyn SpawnedServer>>;
}

pub trait HealthProbe: Send + Sync {
    fn health(&self, host: &str, port: u16) -> Option<HealthResponse>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub host: String,
    pub base_port: u16,
    pub port_range: u16,
    pub health_attempts: u32,
    pub health_interval: Duration,
    pub conflict_retries: u32,
}

impl LaunchOptions {
    pub fn from_config(config: &HooksConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            base_port: config.launcher.base_port,
            port_range: config.launcher.port_range.max(1),
            health_attempts: config.launcher.health_attempts.max(1),
            health_interval: Duration::from_millis(config.launcher.health_interval_ms),
            conflict_retries: config.launcher.conflict_retries,
        }
    }

    fn last_port(&self) -> u16 {
        self.base_port
            .saturating_add(self.port_range.saturating_sub(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquiredServer {
    pub session_id: String,
    pub pid: u32,
    pub port: u16,
    pub instance_id: InstanceId,
    pub reused: bool,
}

pub struct Launcher<'a> {
    db: &'a Db,
    spawner: &'a dyn ServerSpawner,
    health: &'a dyn HealthProbe,
    processes: &'a dyn ProcessProbe,
    ports: &'a dyn PortProbe,
    options: LaunchOptions,
}

impl<'a> Launcher<'a> {
    pub fn new(
        db: &'a Db,
        spawner: &'a dyn ServerSpawner,
        health: &'a dyn HealthProbe,
        processes: &'a dyn ProcessProbe,
        ports: &'a dyn PortProbe,
        options: LaunchOptions,
    ) -> Self {
        Self {
            db,
            spawner,
            health,
            processes,
            ports,
            options,
        }
    }

    /// Returns the live server for `session_id`, starting one if needed.
    pub fn acquire_server(
        &self,
        session_id: &str,
        owning_pid: u32,
        overrides: &SessionOverrides,
    ) -> Result<AcquiredServer> {
        let mut conflicts = 0;
        loop {
            match self.try_acquire(session_id, owning_pid, overrides) {
                Err(HooksError::PortConflict { port, holder })
                    if conflicts < self.options.conflict_retries =>
                {
                    conflicts += 1;
                    warn!(
                        session = %session_id,
                        port,
                        holder = %holder,
                        attempt = conflicts,
                        "Lost port race; retrying acquisition"
                    );
                }
                other => return other,
            }
        }
    }

    fn try_acquire(
        &self,
        session_id: &str,
        owning_pid: u32,
        overrides: &SessionOverrides,
    ) -> Result<AcquiredServer> {
        if let Some(existing) = self.db.lookup(session_id)? {
            if self.processes.is_alive(existing.owning_pid)
                && self.processes.is_alive(existing.server_pid)
            {
                debug!(session = %session_id, port = existing.server_port, "Reusing live server");
                return Ok(AcquiredServer {
                    session_id: existing.session_id.clone(),
                    pid: existing.server_pid,
                    port: existing.server_port,
                    instance_id: existing.instance_id(),
                    reused: true,
                });
            }
            info!(session = %session_id, port = existing.server_port, "Dropping stale session row");
            self.db.unregister(session_id)?;
        }

        let port = self.pick_port()?;
        let request = SpawnRequest {
            session_id: session_id.to_string(),
            host: self.options.host.clone(),
            port,
            owning_pid,
            overrides: overrides.clone(),
        };
        let mut server = self.spawner.spawn(&request)?;
        let pid = server.pid();
        info!(session = %session_id, port, pid, "Spawned server");

        self.wait_until_healthy(server.as_mut(), port)?;

        let registration = Registration {
            session_id: session_id.to_string(),
            owning_pid,
            server_pid: pid,
            server_port: port,
            overrides: overrides.clone(),
        };
        if let Err(err) = self.db.register(&registration, self.processes) {
            server.kill();
            return Err(err);
        }

        Ok(AcquiredServer {
            session_id: session_id.to_string(),
            pid,
            port,
            instance_id: InstanceId::new(pid, port),
            reused: false,
        })
    }

    fn pick_port(&self) -> Result<u16> {
        let live = self.db.live_ports(self.processes)?;
        let start = self.options.base_port;
        let end = self.options.last_port();
        (start..=end)
            .find(|port| !live.contains(port) && self.ports.is_free(&self.options.host, *port))
            .ok_or(HooksError::NoPortAvailable { start, end })
    }

    fn wait_until_healthy(&self, server: &mut dyn SpawnedServer, port: u16) -> Result<()> {
        let pid = server.pid();
        for attempt in 1..=self.options.health_attempts {
            if server.has_exited() {
                return Err(HooksError::PortConflict {
                    port,
                    holder: "server exited before becoming healthy".to_string(),
                });
            }
            match self.health.health(&self.options.host, port) {
                Some(health) if health.pid == pid => {
                    debug!(port, pid, attempt, "Server healthy");
                    return Ok(());
                }
                Some(health) => {
                    debug!(port, expected = pid, actual = health.pid, "Port answered by another server");
                }
                None => {}
            }
            if attempt < self.options.health_attempts {
                thread::sleep(self.options.health_interval);
            }
        }

        warn!(port, pid, "Server never became healthy; killing it");
        server.kill();
        Err(HooksError::StartupTimeout {
            port,
            attempts: self.options.health_attempts,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Process-backed spawner
// ═══════════════════════════════════════════════════════════════════════════════

pub const SERVER_BIN_NAME: &str = "cc-hooks-server";

/// Locates the server binary: configured path first, else next to the running executable.
pub fn resolve_server_bin(config: &HooksConfig) -> Result<PathBuf> {
    if let Some(path) = &config.server.server_bin {
        return Ok(path.clone());
    }
    let exe = std::env::current_exe().map_err(HooksError::io("Failed to locate current executable"))?;
    let dir = exe
        .parent()
        .ok_or_else(|| HooksError::SpawnFailed("executable has no parent directory".to_string()))?;
    Ok(dir.join(format!("{}{}", SERVER_BIN_NAME, std::env::consts::EXE_SUFFIX)))
}

/// Spawns the real server binary, detached into its own process group with
/// stderr appended to a per-port log file.
pub struct CommandSpawner {
    program: PathBuf,
    paths: HooksPaths,
}

impl CommandSpawner {
    pub fn new(program: PathBuf, paths: HooksPaths) -> Self {
        Self { program, paths }
    }
}

impl ServerSpawner for CommandSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<Box<dyn SpawnedServer>> {
        fs_err::create_dir_all(self.paths.logs_dir())
            .map_err(HooksError::io("Failed to create logs dir"))?;
        let log = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.paths.server_log_path(request.port))
            .map_err(HooksError::io("Failed to open server log"))?;

        let mut command = Command::new(&self.program);
        command
            .arg("--session-id")
            .arg(&request.session_id)
            .arg("--host")
            .arg(&request.host)
            .arg("--port")
            .arg(request.port.to_string())
            .arg("--owner-pid")
            .arg(request.owning_pid.to_string())
            .args(request.overrides.to_args())
            .env(crate::paths::HOME_ENV, self.paths.root())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log.into_parts().0));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|err| {
            HooksError::SpawnFailed(format!("{}: {}", self.program.display(), err))
        })?;
        Ok(Box::new(ChildServer { child }))
    }
}

struct ChildServer {
    child: Child,
}

impl SpawnedServer for ChildServer {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
