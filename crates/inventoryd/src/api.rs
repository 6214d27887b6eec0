//! Collector HTTP API
//!
//! Three surfaces: report intake (`POST /api/reports`), direct inventory
//! reads (`GET /api/orgs/{org}/inventory`) and the live SSE stream
//! (`GET /api/orgs/{org}/stream`). Authentication happens in front of this
//! daemon; callers arriving here are already authorized.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

use usbfleet_types::{ApiResponse, InventoryTable, PortReport, ReportAck, validate_org_id};

use crate::error::StoreError;
use crate::fanout::FanoutHub;
use crate::store::InventoryStore;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<InventoryStore>,
    pub hub: Arc<FanoutHub>,
    pub keepalive: Duration,
}

/// Build the collector router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/reports", post(submit_report))
        .route("/api/orgs/{org_id}/inventory", get(read_inventory))
        .route("/api/orgs/{org_id}/stream", get(stream_inventory))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Report intake: merge, then notify subscribers.
async fn submit_report(
    State(state): State<AppState>,
    Json(report): Json<PortReport>,
) -> impl IntoResponse {
    match state.store.merge_report(&report).await {
        Ok(outcome) => {
            // Publishing happens outside the partition lock; a wall of
            // subscribers never slows the next writer down.
            state.hub.publish(outcome.table);
            (StatusCode::OK, Json(ApiResponse::success(outcome.ack)))
        }
        Err(e) => {
            let status = error_status(&e);
            if status.is_server_error() {
                error!(error = %e, "Report submission failed");
            } else {
                warn!(error = %e, "Report rejected");
            }
            (
                status,
                Json(ApiResponse::<ReportAck>::error(
                    status.as_u16() as u32,
                    e.to_string(),
                    None,
                )),
            )
        }
    }
}

/// Direct inventory read for dashboard bootstraps and tooling.
async fn read_inventory(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> impl IntoResponse {
    if !validate_org_id(&org_id) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<InventoryTable>::error(
                400,
                format!("invalid organization id: {:?}", org_id),
                None,
            )),
        );
    }

    match state.store.snapshot(&org_id).await {
        Ok(Some(table)) => (StatusCode::OK, Json(ApiResponse::success(table))),
        Ok(None) => (
            StatusCode::OK,
            Json(ApiResponse::success(InventoryTable::new(org_id, 0, vec![]))),
        ),
        Err(e) => {
            let status = error_status(&e);
            warn!(org_id = %org_id, error = %e, "Inventory read failed");
            (
                status,
                Json(ApiResponse::<InventoryTable>::error(
                    status.as_u16() as u32,
                    e.to_string(),
                    None,
                )),
            )
        }
    }
}

/// Live stream: current snapshot first (or an explicit no-data signal),
/// then every merge in reconciler order. Keep-alive comments let the viewer
/// distinguish a quiet fleet from a dead connection.
async fn stream_inventory(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> axum::response::Response {
    if !validate_org_id(&org_id) {
        return (StatusCode::BAD_REQUEST, "invalid organization id").into_response();
    }

    // Subscribe before the snapshot read so a merge landing between the two
    // is seen on the stream rather than lost.
    let rx = state.hub.subscribe(&org_id);
    info!(org_id = %org_id, subscribers = state.hub.subscriber_count(&org_id), "Viewer connected");

    let initial = match state.store.snapshot(&org_id).await {
        Ok(Some(table)) => snapshot_event(&table),
        Ok(None) => Event::default().event("no-data").data("{}"),
        Err(e) => {
            warn!(org_id = %org_id, error = %e, "Initial snapshot unavailable");
            return (StatusCode::SERVICE_UNAVAILABLE, "store busy").into_response();
        }
    };

    let updates = BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(table) => Some(Ok::<Event, Infallible>(snapshot_event(&table))),
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                // Overflow dropped the oldest snapshots; the next received
                // table is the freshest state, which is all a viewer needs.
                debug!(missed = missed, "Subscriber lagged, continuing with newest");
                None
            }
        }
    });

    let stream = stream::once(async move { Ok::<Event, Infallible>(initial) }).chain(updates);

    sse_response(stream, state.keepalive).into_response()
}

fn sse_response<S>(stream: S, keepalive: Duration) -> Sse<KeepAliveStream<S>>
where
    S: Stream<Item = std::result::Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(keepalive)
            .text("heartbeat"),
    )
}

fn snapshot_event(table: &InventoryTable) -> Event {
    match Event::default().event("snapshot").json_data(table) {
        Ok(event) => event,
        Err(e) => {
            // Serialization of a well-typed table cannot fail in practice.
            error!(error = %e, "Snapshot serialization failed");
            Event::default().event("no-data").data("{}")
        }
    }
}

fn error_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::InvalidReport(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
