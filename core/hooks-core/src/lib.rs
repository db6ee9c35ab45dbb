//! # cc-hooks-core
//!
//! Shared state and lifecycle logic for cc-hooks: the durable event queue,
//! the session registry, and launching/stopping per-session servers.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. The server wraps calls in
//!   `spawn_blocking`; the hook CLI calls them directly.
//! - **One connection per operation**: SQLite in WAL mode is the only shared
//!   state between processes. Multi-statement updates run in `IMMEDIATE`
//!   transactions.
//! - **OS at the seams**: process liveness, signals, ports, spawning and HTTP
//!   sit behind small traits so lifecycle logic can be tested without
//!   real processes.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cc_hooks_core::{Db, HooksPaths};
//!
//! let paths = HooksPaths::from_env()?;
//! let db = Db::new(paths.db_path())?;
//! let counts = db.status_counts(None)?;
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod http;
pub mod launcher;
pub mod migrations;
pub mod paths;
pub mod ports;
pub mod process;
pub mod scratch;
pub mod sessions;
pub mod shutdown;

pub use config::{parse_bool, HooksConfig, SessionOverrides};
pub use db::{format_timestamp, now_timestamp, parse_timestamp, Db};
pub use error::{HooksError, Result};
pub use events::{FailureOutcome, NewEvent, StoredEvent};
pub use http::{HttpHealthProbe, HttpInstanceControl};
pub use launcher::{
    resolve_server_bin, AcquiredServer, CommandSpawner, HealthProbe, LaunchOptions, Launcher,
    ServerSpawner, SpawnRequest, SpawnedServer,
};
pub use paths::HooksPaths;
pub use ports::{BindProbe, PortProbe};
pub use process::{ProcessProbe, ProcessSignals, SystemProcesses};
pub use sessions::{Registration, SessionRecord};
pub use shutdown::{InstanceControl, ShutdownCoordinator, ShutdownOptions, ShutdownReport};
