//! Session lifecycle commands: launch, run, shutdown, sweep, status.

use cc_hooks_core::process::{find_assistant_pid, parent_pid};
use cc_hooks_core::scratch::{clean_scratch_dirs, remove_tracking_file};
use cc_hooks_core::{
    resolve_server_bin, AcquiredServer, BindProbe, CommandSpawner, Db, HooksConfig, HooksPaths,
    HttpHealthProbe, HttpInstanceControl, LaunchOptions, Launcher, ProcessProbe, ProcessSignals,
    SessionOverrides, ShutdownCoordinator, ShutdownOptions, ShutdownReport, SystemProcesses,
};
use cc_hooks_protocol::{INSTANCE_ENV, PORT_ENV, SESSION_ENV};
use chrono::Utc;
use rand::RngCore;
use serde_json::{json, Value};
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

const ASSISTANT_BINARY: &str = "claude";
const HEALTH_TIMEOUT_MS: u64 = 1_000;
const CONTROL_TIMEOUT_MS: u64 = 2_000;

/// Resolved paths, configuration and store shared by every command.
pub struct Context {
    pub paths: HooksPaths,
    pub config: HooksConfig,
    pub db: Db,
}

impl Context {
    pub fn load() -> Result<Self, String> {
        let paths = HooksPaths::from_env()?;
        let config = HooksConfig::load(&paths);
        let db = Db::new(config.db_path(&paths))?;
        Ok(Self { paths, config, db })
    }
}

pub fn new_session_id() -> String {
    let mut random = rand::thread_rng();
    format!("cc-{}-{:x}", Utc::now().timestamp_millis(), random.next_u64())
}

/// The assistant process this invocation runs under, or our parent when the
/// assistant binary cannot be found in the ancestry.
pub fn default_owner_pid() -> u32 {
    let parent = parent_pid();
    find_assistant_pid(parent, ASSISTANT_BINARY).unwrap_or(parent)
}

pub fn launch(
    ctx: &Context,
    session_id: Option<String>,
    owner_pid: Option<u32>,
    overrides: &SessionOverrides,
) -> Result<AcquiredServer, String> {
    if let Err(err) = sweep(ctx) {
        warn!(error = %err, "Orphan sweep before launch failed");
    }
    let session_id = session_id.unwrap_or_else(new_session_id);
    let owner_pid = owner_pid.unwrap_or_else(default_owner_pid);
    acquire(ctx, &session_id, owner_pid, overrides)
}

fn acquire(
    ctx: &Context,
    session_id: &str,
    owner_pid: u32,
    overrides: &SessionOverrides,
) -> Result<AcquiredServer, String> {
    let spawner = CommandSpawner::new(resolve_server_bin(&ctx.config)?, ctx.paths.clone());
    let health = HttpHealthProbe::new(Duration::from_millis(HEALTH_TIMEOUT_MS))?;
    let launcher = Launcher::new(
        &ctx.db,
        &spawner,
        &health,
        &SystemProcesses,
        &BindProbe,
        LaunchOptions::from_config(&ctx.config),
    );
    let acquired = launcher.acquire_server(session_id, owner_pid, overrides)?;
    info!(
        session = %acquired.session_id,
        port = acquired.port,
        pid = acquired.pid,
        reused = acquired.reused,
        "Server acquired"
    );
    Ok(acquired)
}

/// Shell `export` lines for an acquired server.
pub fn exports(acquired: &AcquiredServer) -> String {
    format!(
        "export {}={}\nexport {}={}\nexport {}={}\n",
        PORT_ENV,
        acquired.port,
        INSTANCE_ENV,
        acquired.instance_id,
        SESSION_ENV,
        shell_quote(&acquired.session_id)
    )
}

fn shell_quote(value: &str) -> String {
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Starts a server owned by this process, runs `command` against it, then
/// shuts the server down. Returns the command's exit code.
pub fn run(ctx: &Context, command: &[String], overrides: &SessionOverrides) -> Result<i32, String> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| "No command given".to_string())?;

    if let Err(err) = sweep(ctx) {
        warn!(error = %err, "Orphan sweep before run failed");
    }
    let session_id = new_session_id();
    let acquired = acquire(ctx, &session_id, std::process::id(), overrides)?;

    let status = Command::new(program)
        .args(args)
        .env(PORT_ENV, acquired.port.to_string())
        .env(INSTANCE_ENV, acquired.instance_id.to_string())
        .env(SESSION_ENV, &acquired.session_id)
        .status();

    match shutdown(ctx, &session_id, None) {
        Ok(Some(report)) => log_report(&report),
        Ok(None) => warn!(session = %session_id, "Session vanished before shutdown"),
        Err(err) => warn!(error = %err, session = %session_id, "Graceful shutdown failed"),
    }

    let status = status.map_err(|e| format!("Failed to run {}: {}", program, e))?;
    Ok(exit_code(status))
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

pub fn shutdown(
    ctx: &Context,
    session_id: &str,
    max_wait_secs: Option<u64>,
) -> Result<Option<ShutdownReport>, String> {
    let control = HttpInstanceControl::new(Duration::from_millis(CONTROL_TIMEOUT_MS))?;
    let mut options = ShutdownOptions::from_config(&ctx.config);
    if let Some(secs) = max_wait_secs {
        options.max_wait = Duration::from_secs(secs);
    }
    let coordinator = ShutdownCoordinator::new(
        &ctx.db,
        &ctx.paths,
        &control,
        &SystemProcesses,
        &SystemProcesses,
        options,
    );
    Ok(coordinator.graceful_shutdown(session_id)?)
}

pub fn log_report(report: &ShutdownReport) {
    if report.drained {
        info!(
            session = %report.session_id,
            port = report.port,
            waited_ms = report.waited_ms,
            forced_kill = report.forced_kill,
            scratch_cleaned = report.scratch_cleaned,
            "Session shut down"
        );
    } else {
        warn!(
            session = %report.session_id,
            port = report.port,
            waited_ms = report.waited_ms,
            forced_kill = report.forced_kill,
            "Session shut down before its queue drained"
        );
    }
}

/// Stops servers whose owner is gone and drops their registry rows.
/// Returns the removed session ids.
pub fn sweep(ctx: &Context) -> Result<Vec<String>, String> {
    sweep_with(ctx, &SystemProcesses, &SystemProcesses)
}

fn sweep_with(
    ctx: &Context,
    probe: &dyn ProcessProbe,
    signals: &dyn ProcessSignals,
) -> Result<Vec<String>, String> {
    for orphan in ctx.db.orphans(probe)? {
        if probe.is_alive(orphan.server_pid) && signals.terminate(orphan.server_pid) {
            info!(
                session = %orphan.session_id,
                server_pid = orphan.server_pid,
                "Terminated orphaned server"
            );
        }
        remove_tracking_file(&ctx.paths, &orphan.session_id);
    }
    let removed = ctx.db.sweep_orphans(probe)?;
    if !removed.is_empty() && !ctx.db.has_live_sessions(probe)? {
        clean_scratch_dirs(&ctx.paths);
    }
    Ok(removed)
}

pub fn status(ctx: &Context) -> Result<Value, String> {
    let sessions: Vec<Value> = ctx
        .db
        .list_sessions()?
        .into_iter()
        .map(|session| {
            json!({
                "session_id": session.session_id,
                "instance_id": session.instance_id().to_string(),
                "server_pid": session.server_pid,
                "server_port": session.server_port,
                "owning_pid": session.owning_pid,
                "server_alive": SystemProcesses.is_alive(session.server_pid),
                "owner_alive": SystemProcesses.is_alive(session.owning_pid),
                "overrides": session.overrides,
                "created_at": session.created_at,
            })
        })
        .collect();
    Ok(json!({
        "data_dir": ctx.paths.root().display().to_string(),
        "sessions": sessions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_hooks_core::Registration;
    use cc_hooks_protocol::InstanceId;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakeProcesses {
        alive: HashSet<u32>,
        terminated: Mutex<Vec<u32>>,
    }

    impl FakeProcesses {
        fn new(alive: &[u32]) -> Self {
            Self {
                alive: alive.iter().copied().collect(),
                terminated: Mutex::new(Vec::new()),
            }
        }
    }

    impl ProcessProbe for FakeProcesses {
        fn is_alive(&self, pid: u32) -> bool {
            self.alive.contains(&pid)
        }
    }

    impl ProcessSignals for FakeProcesses {
        fn terminate(&self, pid: u32) -> bool {
            self.terminated.lock().unwrap().push(pid);
            true
        }

        fn kill(&self, _pid: u32) -> bool {
            true
        }
    }

    fn context() -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().expect("temp dir");
        let paths = HooksPaths::new(dir.path());
        let db = Db::new(paths.db_path()).expect("db");
        let ctx = Context {
            paths,
            config: HooksConfig::default(),
            db,
        };
        (dir, ctx)
    }

    fn register(ctx: &Context, session: &str, owner: u32, server: u32, port: u16) {
        ctx.db
            .register(
                &Registration {
                    session_id: session.to_string(),
                    owning_pid: owner,
                    server_pid: server,
                    server_port: port,
                    overrides: SessionOverrides::default(),
                },
                &FakeProcesses::new(&[owner, server]),
            )
            .expect("register");
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
        assert!(new_session_id().starts_with("cc-"));
    }

    #[test]
    fn exports_cover_the_env_contract() {
        let acquired = AcquiredServer {
            session_id: "abc 1".to_string(),
            pid: 4242,
            port: 12223,
            instance_id: InstanceId::new(4242, 12223),
            reused: false,
        };
        let text = exports(&acquired);
        assert!(text.contains("export CC_HOOKS_PORT=12223\n"));
        assert!(text.contains("export CC_INSTANCE_ID=4242:12223\n"));
        assert!(text.contains("export CC_HOOKS_SESSION_ID='abc 1'\n"));
    }

    #[test]
    fn sweep_stops_live_orphan_servers() {
        let (_dir, ctx) = context();
        register(&ctx, "orphan-live-server", 10, 11, 12222);
        register(&ctx, "orphan-dead-server", 20, 21, 12223);
        register(&ctx, "healthy", 30, 31, 12224);

        let processes = FakeProcesses::new(&[11, 30, 31]);
        let mut removed = sweep_with(&ctx, &processes, &processes).expect("sweep");
        removed.sort();

        assert_eq!(removed, vec!["orphan-dead-server", "orphan-live-server"]);
        assert_eq!(*processes.terminated.lock().unwrap(), vec![11]);
        assert!(ctx.db.lookup("healthy").expect("lookup").is_some());
    }

    #[test]
    fn status_lists_sessions() {
        let (_dir, ctx) = context();
        register(&ctx, "s1", u32::MAX - 1, u32::MAX - 2, 12222);

        let report = status(&ctx).expect("status");
        let sessions = report["sessions"].as_array().expect("sessions");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["session_id"], "s1");
        assert_eq!(sessions[0]["server_port"], 12222);
        assert_eq!(sessions[0]["server_alive"], false);
    }

    #[test]
    fn unknown_session_shutdown_is_none() {
        let (_dir, ctx) = context();
        assert!(shutdown(&ctx, "missing", Some(0)).expect("shutdown").is_none());
    }

    #[test]
    fn run_requires_a_command() {
        let (_dir, ctx) = context();
        assert!(run(&ctx, &[], &SessionOverrides::default()).is_err());
    }
}
