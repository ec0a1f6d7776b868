//! `SmtServer`: Axum HTTP, SSE and WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use smt_auth::IdentityVerifier;
use smt_core::ConnectionId;
use smt_realtime::NotificationHub;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{self, TokenQuery};
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::notify::work_order_status_handler;
use crate::shutdown::ShutdownCoordinator;
use crate::sse::events_handler;
use crate::websocket::session::{SessionContext, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The realtime hub.
    pub hub: Arc<NotificationHub>,
    /// Credential verifier.
    pub verifier: Arc<IdentityVerifier>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics_handle: Option<PrometheusHandle>,
    /// One permit per allowed connection across both transports.
    pub connection_slots: Arc<Semaphore>,
}

/// The realtime notification server.
pub struct SmtServer {
    config: Arc<ServerConfig>,
    hub: Arc<NotificationHub>,
    verifier: Arc<IdentityVerifier>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics_handle: Option<PrometheusHandle>,
    connection_slots: Arc<Semaphore>,
}

impl SmtServer {
    /// Create a new server around a constructed hub.
    pub fn new(
        config: ServerConfig,
        hub: Arc<NotificationHub>,
        verifier: IdentityVerifier,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        let slots = config.max_connections.min(Semaphore::MAX_PERMITS);
        Self {
            config: Arc::new(config),
            hub,
            verifier: Arc::new(verifier),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics_handle,
            connection_slots: Arc::new(Semaphore::new(slots)),
        }
    }

    fn state(&self) -> AppState {
        AppState {
            hub: self.hub.clone(),
            verifier: self.verifier.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
            connection_slots: self.connection_slots.clone(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/api/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/api/events", get(events_handler))
            .route("/ws", get(ws_handler))
            .route(
                "/api/notifications/work-order-status",
                post(work_order_status_handler),
            )
            .with_state(self.state())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve in the background until shutdown.
    ///
    /// Returns the bound address and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%local_addr, "realtime server listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
            info!("realtime server stopped");
        });
        Ok((local_addr, handle))
    }

    /// The realtime hub.
    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Claim a connection slot, or `None` when the limit is reached.
///
/// The permit is held for the life of the connection and frees the slot when
/// dropped, so concurrent handshakes cannot overshoot the limit.
pub(crate) fn reserve_slot(state: &AppState) -> Option<OwnedSemaphorePermit> {
    Arc::clone(&state.connection_slots).try_acquire_owned().ok()
}

pub(crate) fn capacity_response() -> Response {
    warn!("connection limit reached, rejecting");
    let body = serde_json::json!({
        "error": { "code": "CAPACITY", "message": "connection limit reached" }
    });
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

pub(crate) fn internal_error_response(message: &str) -> Response {
    let body = serde_json::json!({
        "error": { "code": "INTERNAL", "message": message }
    });
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// GET /health, GET /api/health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.hub.registry();
    Json(health::health_check(
        state.start_time,
        registry.connection_count(),
        state.hub.queue().consumer_count(),
        &registry.room_counts(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Response {
    let verified =
        match auth::authenticate(&state.verifier, &headers, &query, &state.config.viewer_roles) {
            Ok(v) => v,
            Err(failure) => return failure.into_response(),
        };
    let Some(slot) = reserve_slot(&state) else {
        return capacity_response();
    };

    let conn_id = ConnectionId::new();
    let ctx = SessionContext {
        hub: state.hub.clone(),
        outbox_capacity: state.config.outbox_capacity,
        heartbeat_interval: state.config.heartbeat_interval(),
        pong_timeout: state.config.heartbeat_timeout(),
        shutdown: state.shutdown.token(),
    };
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            run_ws_session(socket, conn_id, verified, ctx).await;
            drop(slot);
        })
}
