//! HTTP surface of a server instance.
//!
//! | method | path                                  | purpose                              |
//! |--------|---------------------------------------|--------------------------------------|
//! | GET    | `/health`                             | liveness plus identity               |
//! | POST   | `/events`                             | durable enqueue (fire-and-forget)    |
//! | GET    | `/events/status`                      | per-status counts and recent events  |
//! | GET    | `/instances/{instance_id}/last-event` | drain check used by shutdown         |
//! | GET    | `/migrations/status`                  | schema version report                |
//! | POST   | `/shutdown`                           | stop accepting work and exit         |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use cc_hooks_core::NewEvent;
use cc_hooks_protocol::{
    AckResponse, ErrorResponse, EventsStatusResponse, HealthResponse, LastEventResponse,
    MigrationStatusResponse, ProtocolError, SubmitEventRequest, SubmitEventResponse,
    QUEUED_MESSAGE,
};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::state::{with_db, SharedState};

const RECENT_EVENTS_LIMIT: usize = 20;

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(submit_event))
        .route("/events/status", get(events_status))
        .route("/instances/{instance_id}/last-event", get(last_event))
        .route("/migrations/status", get(migrations_status))
        .route("/shutdown", post(shutdown))
        .with_state(state)
}

fn api_error(status: StatusCode, error: ProtocolError) -> ApiError {
    (status, Json(ErrorResponse::new(error)))
}

fn storage_error(err: String) -> ApiError {
    error!(error = %err, "Store operation failed");
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        ProtocolError::new("storage_error", err),
    )
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        pid: state.identity.pid,
        port: state.identity.port,
        instance_id: state.identity,
        session_id: state.session_id.clone(),
    })
}

async fn submit_event(
    State(state): State<SharedState>,
    body: Result<Json<SubmitEventRequest>, JsonRejection>,
) -> ApiResult<SubmitEventResponse> {
    let Json(request) = body.map_err(|rejection| {
        warn!(error = %rejection, "Rejected malformed event body");
        api_error(
            StatusCode::BAD_REQUEST,
            ProtocolError::new("invalid_json", rejection.body_text()),
        )
    })?;

    let header = request
        .header()
        .map_err(|err| api_error(StatusCode::BAD_REQUEST, err))?;
    let owner = request.instance().map_err(|err| {
        warn!(error = %err, "Rejected event without usable instance id");
        api_error(StatusCode::BAD_REQUEST, err)
    })?;
    if owner != state.identity {
        warn!(submitted = %owner, expected = %state.identity, "Rejected event for another instance");
        return Err(api_error(
            StatusCode::CONFLICT,
            ProtocolError::new(
                "instance_mismatch",
                format!("Event is for instance {}, this is {}", owner, state.identity),
            ),
        ));
    }

    let event = NewEvent {
        session_id: header.session_id,
        kind: header.kind,
        payload: request.data,
        arguments: request.arguments,
        owner,
    };
    let kind = event.kind.clone();
    let event_id = with_db(&state.db, move |db| db.enqueue(&event))
        .await
        .map_err(storage_error)?;
    debug!(event_id, kind = %kind, "Event queued");

    Ok(Json(SubmitEventResponse {
        status: "ok".to_string(),
        message: QUEUED_MESSAGE.to_string(),
        event_id,
    }))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    instance_id: Option<String>,
}

async fn events_status(
    State(state): State<SharedState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<EventsStatusResponse> {
    let instance_id = query
        .instance_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| state.identity.to_string());

    let filter = instance_id.clone();
    let (counts, recent) = with_db(&state.db, move |db| {
        let counts = db.status_counts(Some(&filter))?;
        let recent = db.recent_events(Some(&filter), RECENT_EVENTS_LIMIT)?;
        Ok((counts, recent))
    })
    .await
    .map_err(storage_error)?;

    Ok(Json(EventsStatusResponse {
        instance_id: Some(instance_id),
        counts,
        recent: recent.iter().map(|event| event.summary()).collect(),
    }))
}

async fn last_event(
    State(state): State<SharedState>,
    Path(instance_id): Path<String>,
) -> ApiResult<LastEventResponse> {
    let filter = instance_id.clone();
    let (last_event_status, has_pending) = with_db(&state.db, move |db| {
        Ok((db.last_event_status(&filter)?, db.has_pending(&filter)?))
    })
    .await
    .map_err(storage_error)?;

    Ok(Json(LastEventResponse {
        instance_id,
        last_event_status,
        has_pending,
    }))
}

async fn migrations_status(State(state): State<SharedState>) -> ApiResult<MigrationStatusResponse> {
    with_db(&state.db, |db| db.migration_status())
        .await
        .map(Json)
        .map_err(storage_error)
}

async fn shutdown(State(state): State<SharedState>) -> Json<AckResponse> {
    info!(instance_id = %state.identity, "Shutdown requested over HTTP");
    state.shutdown.cancel();
    Json(AckResponse::ok("Shutdown initiated"))
}
