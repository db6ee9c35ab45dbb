//! Logging for the hook CLI.
//!
//! The assistant swallows hook stderr, so everything goes to a daily rolling
//! file under `logs/`. Warnings and errors are mirrored to stderr for
//! interactive use of `launch`, `run` and friends.

use cc_hooks_core::HooksPaths;
use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "cc-hook.log";

/// Installs the global subscriber. Keep the returned guard alive until exit
/// so buffered lines are flushed.
pub fn init() -> Option<WorkerGuard> {
    let Some(logs_dir) = HooksPaths::from_env().ok().map(|paths| paths.logs_dir()) else {
        let _ = tracing_subscriber::registry().with(stderr_layer()).try_init();
        return None;
    };
    if fs_err::create_dir_all(&logs_dir).is_err() {
        let _ = tracing_subscriber::registry().with(stderr_layer()).try_init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(file_filter());

    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer())
        .try_init();
    Some(guard)
}

fn stderr_layer<S>() -> impl Layer<S>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(LevelFilter::WARN)
}

fn file_filter() -> EnvFilter {
    let debug_enabled = env::var("CC_HOOKS_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
