//! Shared server state.

use cc_hooks_core::Db;
use cc_hooks_protocol::InstanceId;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct AppState {
    pub db: Db,
    pub identity: InstanceId,
    pub session_id: String,
    /// Fired by `POST /shutdown`, signals and the owner watch.
    pub shutdown: CancellationToken,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(db: Db, identity: InstanceId, session_id: String, shutdown: CancellationToken) -> SharedState {
        Arc::new(Self {
            db,
            identity,
            session_id,
            shutdown,
        })
    }
}

/// Runs a store call on the blocking pool.
pub async fn with_db<T, F>(db: &Db, f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&Db) -> cc_hooks_core::Result<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|err| format!("Store task failed: {}", err))?
        .map_err(String::from)
}
