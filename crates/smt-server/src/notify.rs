//! Inbound trigger: a writer reports a work-order status transition.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use smt_core::errors::INVALID_MESSAGE;
use smt_realtime::WorkOrderSubject;
use tracing::{info, warn};

use crate::auth::{self, TokenQuery};
use crate::server::AppState;

/// Body of `POST /api/notifications/work-order-status`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusChangeRequest {
    /// The work order that changed.
    pub subject: WorkOrderSubject,
    /// Status before the change.
    pub old_status: String,
    /// Status after the change.
    pub new_status: String,
}

/// POST /api/notifications/work-order-status
///
/// The actor is the authenticated user. Returns `202` with the composed
/// event; sink failures are logged, never surfaced as an error status.
pub async fn work_order_status_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    Json(body): Json<StatusChangeRequest>,
) -> Response {
    let verified =
        match auth::authenticate(&state.verifier, &headers, &query, &state.config.writer_roles) {
            Ok(v) => v,
            Err(failure) => return failure.into_response(),
        };

    if body.subject.work_order_id.trim().is_empty() || body.new_status.trim().is_empty() {
        return bad_request("subject.work_order_id and new_status are required");
    }

    let notified = state.hub.notify(
        body.subject,
        body.old_status,
        body.new_status,
        verified.identity.username,
    );
    if !notified.failed_sinks.is_empty() {
        warn!(sinks = ?notified.failed_sinks, "notification partially delivered");
    }
    info!(delivered = notified.delivered, "status change accepted");

    let event = serde_json::to_value(&*notified.event).unwrap_or_default();
    (StatusCode::ACCEPTED, Json(event)).into_response()
}

fn bad_request(message: &str) -> Response {
    let body = serde_json::json!({
        "error": { "code": INVALID_MESSAGE, "message": message }
    });
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}
