//! cc-hooks server entrypoint.
//!
//! One server runs per assistant session. It accepts hook events over HTTP,
//! writes them to the shared SQLite queue, and a single processor task plays
//! the matching audio. The server exits on `POST /shutdown`, SIGTERM/ctrl-c,
//! or when the owning assistant process disappears.

use chrono::Utc;
use clap::Parser;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cc_hooks_core::process::is_pid_alive;
use cc_hooks_core::scratch::{remove_tracking_file, write_tracking_file, TrackingRecord};
use cc_hooks_core::{format_timestamp, Db, HooksConfig, HooksPaths, SessionOverrides};
use cc_hooks_protocol::{InstanceId, BASE_PORT};

mod api;
mod dispatch;
mod error;
mod mappings;
mod openrouter;
mod player;
mod processor;
mod state;
mod transcript;
mod tts;

use dispatch::AudioHandler;
use processor::{Processor, ProcessorOptions};
use state::{with_db, AppState};

#[derive(Debug, Parser)]
#[command(name = "cc-hooks-server", version, about = "Per-session hook event server")]
struct Args {
    /// Assistant session this server belongs to
    #[arg(long)]
    session_id: String,
    #[arg(long, default_value_t = BASE_PORT)]
    port: u16,
    /// Bind address; defaults to the configured host
    #[arg(long)]
    host: Option<String>,
    /// Exit once this process is gone
    #[arg(long)]
    owner_pid: Option<u32>,
    #[command(flatten)]
    overrides: SessionOverrides,
}

#[tokio::main]
async fn main() {
    init_logging();
    let args = Args::parse();
    std::process::exit(run(args).await);
}

fn init_logging() {
    let debug_enabled = env::var("CC_HOOKS_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // stderr is redirected to logs/server-{port}.log by the launcher.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

async fn run(args: Args) -> i32 {
    let paths = match HooksPaths::from_env() {
        Ok(paths) => paths,
        Err(err) => {
            error!(error = %err, "Failed to resolve data directory");
            return 1;
        }
    };
    let config = HooksConfig::load(&paths).with_overrides(&args.overrides);
    let host = args.host.clone().unwrap_or_else(|| config.server.host.clone());

    let db = match Db::new(config.db_path(&paths)) {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, "Failed to initialize event database");
            return 1;
        }
    };

    // Anything queued before this point belongs to a previous instance.
    let started_at = Utc::now();

    let listener = match tokio::net::TcpListener::bind((host.as_str(), args.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, host = %host, port = args.port, "Failed to bind server port");
            return 1;
        }
    };
    let identity = InstanceId::new(std::process::id(), args.port);

    let handler = match AudioHandler::new(config.clone(), &paths) {
        Ok(handler) => Arc::new(handler),
        Err(err) => {
            error!(error = %err, "Failed to build HTTP client for audio providers");
            return 1;
        }
    };

    let record = TrackingRecord {
        session_id: args.session_id.clone(),
        server_pid: identity.pid,
        server_port: identity.port,
        owning_pid: args.owner_pid.unwrap_or(0),
        started_at: format_timestamp(started_at),
    };
    if let Err(err) = write_tracking_file(&paths, &record) {
        warn!(error = %err, "Failed to write tracking file");
    }

    let shutdown = CancellationToken::new();
    let processor = Processor::new(
        db.clone(),
        identity,
        started_at,
        handler,
        ProcessorOptions {
            poll_interval: Duration::from_millis(config.server.poll_interval_ms),
            error_wait: Duration::from_millis(config.server.error_wait_ms),
            max_retries: config.server.max_retry_count,
        },
    );
    let processor_task = tokio::spawn(processor.run(shutdown.clone()));

    if let Some(owner) = args.owner_pid {
        tokio::spawn(watch_owner(
            owner,
            Duration::from_millis(config.server.owner_check_interval_ms),
            shutdown.clone(),
        ));
    }
    tokio::spawn(watch_signals(shutdown.clone()));

    info!(
        session = %args.session_id,
        instance_id = %identity,
        host = %host,
        owner_pid = ?args.owner_pid,
        providers = %config.audio.providers,
        "cc-hooks server started"
    );

    let state = AppState::new(db.clone(), identity, args.session_id.clone(), shutdown.clone());
    let serve = axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;
    if let Err(err) = serve {
        error!(error = %err, "HTTP server failed");
    }
    shutdown.cancel();

    if let Err(err) = processor_task.await {
        error!(error = %err, "Event processor task panicked");
    }

    let session_id = args.session_id.clone();
    let pid = identity.pid;
    match with_db(&db, move |db| db.unregister_if_server(&session_id, pid)).await {
        Ok(true) => info!(session = %args.session_id, "Session unregistered"),
        Ok(false) => {}
        Err(err) => warn!(error = %err, "Failed to unregister session"),
    }
    remove_tracking_file(&paths, &args.session_id);

    info!(instance_id = %identity, "cc-hooks server stopped");
    0
}

async fn watch_owner(owner: u32, interval: Duration, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        if !is_pid_alive(owner) {
            warn!(owner_pid = owner, "Owning process exited; shutting down");
            shutdown.cancel();
            return;
        }
    }
}

async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = terminate.recv() => info!("SIGTERM received"),
            _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
        }
    }
    shutdown.cancel();
}
