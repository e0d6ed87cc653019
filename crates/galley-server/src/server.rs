//! `GalleyServer`: axum HTTP + WebSocket front for the notification service.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use galley_core::ids::{ConnectionId, RestaurantId};
use galley_settings::ServerSettings;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::health::{self, HealthResponse};
use crate::service::NotificationService;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The notification service.
    pub service: Arc<NotificationService>,
    /// Prometheus handle; `None` disables `/metrics`.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
    /// Largest inbound WebSocket message accepted.
    pub max_message_size: usize,
}

/// Query string of the socket endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Logical connection to resume.
    pub client_id: Option<String>,
}

/// The HTTP server.
pub struct GalleyServer {
    settings: ServerSettings,
    service: Arc<NotificationService>,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl GalleyServer {
    /// Server for `service`.
    pub fn new(
        settings: ServerSettings,
        service: Arc<NotificationService>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            settings,
            service,
            metrics,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Router with every route and middleware.
    pub fn router(&self) -> Router {
        let state = AppState {
            service: Arc::clone(&self.service),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            max_message_size: self.settings.max_message_size,
        };

        Router::new()
            .route("/ws/kitchen/{restaurant_id}", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CatchPanicLayer::new()),
            )
    }

    /// Bind the configured address and serve until shutdown is signalled.
    pub async fn listen(&self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = self
            .settings
            .bind_addr()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        info!(%local_addr, "listening");
        Ok((local_addr, handle))
    }

    /// Listener shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The notification service.
    pub fn service(&self) -> &Arc<NotificationService> {
        &self.service
    }

    /// Server settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}

/// GET /ws/kitchen/{restaurant_id}
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(restaurant_id): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    if state.service.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let service = Arc::clone(&state.service);
    let restaurant_id = RestaurantId::new(restaurant_id);
    let resume = params.client_id.map(ConnectionId::new);
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, service, restaurant_id, resume))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.service.is_shutting_down(),
        state.service.connection_count(),
        state.service.restaurant_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use galley_settings::RealtimeSettings;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server(metrics: Option<PrometheusHandle>) -> GalleyServer {
        GalleyServer::new(
            ServerSettings::default(),
            NotificationService::new(RealtimeSettings::default()),
            metrics,
        )
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn health_reports_counters() {
        let (status, body) = get(make_server(None).router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["restaurants"], 0);
        assert!(parsed["uptimeSecs"].is_number());
    }

    #[tokio::test]
    async fn metrics_disabled_is_not_found() {
        let (status, _) = get(make_server(None).router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_enabled_renders() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let (status, _) = get(make_server(Some(handle)).router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn plain_get_on_socket_route_is_rejected() {
        let (status, _) = get(make_server(None).router(), "/ws/kitchen/r1").await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (status, _) = get(make_server(None).router(), "/ws/kitchen").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn connect_params_read_client_id() {
        let params: ConnectParams = serde_json::from_value(serde_json::json!({"clientId": "c1"})).unwrap();
        assert_eq!(params.client_id.as_deref(), Some("c1"));
    }
}
