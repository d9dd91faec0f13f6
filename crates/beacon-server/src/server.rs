//! `BeaconServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use beacon_core::{Payload, SystemEvent, SystemEventType};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{Authenticator, bearer_token};
use crate::config::{EMIT_PATH, ServerConfig, WS_PATH};
use crate::health::{self, HealthResponse};
use crate::processing::ProcessorRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::visibility::{VerifierRegistry, VisibilityFilter};
use crate::websocket::broadcast::Broadcaster;
use crate::websocket::keepalive::KeepaliveMonitor;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{self, SessionContext};

/// Query string of the websocket upgrade.
#[derive(Debug, Default, Deserialize)]
struct WsAuthQuery {
    token: Option<String>,
}

/// Body of `POST /api/v1/system/events`. The server assigns the event ID and
/// creation time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitRequest {
    /// Event type.
    pub event_type: SystemEventType,
    /// Payload; an absent payload is broadcast to nobody.
    #[serde(default)]
    pub payload: Option<Payload>,
}

impl EmitRequest {
    /// Build the event to broadcast.
    pub fn into_event(self) -> SystemEvent {
        match self.payload {
            Some(payload) => SystemEvent::new(self.event_type, payload),
            None => SystemEvent::without_payload(self.event_type),
        }
    }
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Resolves the principal of each upgrade request.
    pub authenticator: Arc<dyn Authenticator>,
    /// Event fan-out.
    pub broadcaster: Arc<Broadcaster>,
    /// Everything a session needs.
    pub session: SessionContext,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Prometheus handle for `/metrics`.
    pub metrics: Option<PrometheusHandle>,
    /// Token guarding the emit endpoint.
    pub emit_token: Option<String>,
    /// Max inbound `WebSocket` message size.
    pub max_message_size: usize,
    /// When the server started.
    pub start_time: Instant,
}

/// The Beacon system-events server.
pub struct BeaconServer {
    config: ServerConfig,
    authenticator: Arc<dyn Authenticator>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    keepalive: Arc<KeepaliveMonitor>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl BeaconServer {
    /// Create a new server.
    pub fn new(
        config: ServerConfig,
        authenticator: Arc<dyn Authenticator>,
        verifiers: VerifierRegistry,
        processors: ProcessorRegistry,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = Arc::new(ShutdownCoordinator::default());
        let keepalive = Arc::new(KeepaliveMonitor::new(
            config.keepalive(),
            registry.clone(),
            shutdown.keepalive_token(),
        ));
        let broadcaster = Arc::new(Broadcaster::new(
            registry.clone(),
            VisibilityFilter::new(verifiers),
            processors,
        ));
        Self {
            config,
            authenticator,
            registry,
            broadcaster,
            keepalive,
            shutdown,
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            authenticator: self.authenticator.clone(),
            broadcaster: self.broadcaster.clone(),
            session: SessionContext {
                registry: self.registry.clone(),
                keepalive: self.keepalive.clone(),
                send_buffer_size: self.config.send_buffer_size,
                shutdown: self.shutdown.token(),
            },
            shutdown: self.shutdown.clone(),
            metrics: self.metrics.clone(),
            emit_token: self.config.emit_token.clone(),
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
        };

        let mut router = Router::new()
            .route(WS_PATH, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler));
        if self.config.emit_token.is_some() {
            router = router.route(EMIT_PATH, post(emit_handler));
        }
        router
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve in the background until shutdown.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%local_addr, path = WS_PATH, keepalive = self.keepalive.is_enabled(), "beacon server listening");
        let handle = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(%error, "server error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the broadcaster.
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Get the keepalive monitor.
    pub fn keepalive(&self) -> &Arc<KeepaliveMonitor> {
        &self.keepalive
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /api/ws/v1/system/events
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<WsAuthQuery>,
    State(state): State<AppState>,
) -> Response {
    let principal = state
        .authenticator
        .authenticate(&headers, query.token.as_deref())
        .await;
    let ctx = state.session;
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            match principal {
                Some(principal) => session::run_ws_session(socket, principal, ctx).await,
                None => session::reject_ws_session(socket).await,
            }
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.session.registry.len(),
        state.session.keepalive.is_enabled(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// POST /api/v1/system/events
async fn emit_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EmitRequest>,
) -> Response {
    let authorized = matches!(
        (state.emit_token.as_deref(), bearer_token(&headers)),
        (Some(expected), Some(given)) if expected == given
    );
    if !authorized {
        warn!("emit rejected: bad or missing token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let event = request.into_event();
    let report = state.broadcaster.broadcast(&event);
    (StatusCode::ACCEPTED, Json(report)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenAuthenticator;
    use crate::websocket::connection::ConnectionHandle;
    use crate::websocket::testing::MockConnection;
    use axum::body::Body;
    use axum::http::Request;
    use beacon_core::Principal;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::json;
    use tower::ServiceExt;

    fn make_server(config: ServerConfig) -> BeaconServer {
        BeaconServer::new(
            config,
            Arc::new(TokenAuthenticator::new()),
            VerifierRegistry::with_defaults(),
            ProcessorRegistry::with_defaults(),
        )
    }

    fn with_emit_token() -> BeaconServer {
        make_server(ServerConfig {
            emit_token: Some("secret".into()),
            ..ServerConfig::default()
        })
    }

    fn emit_request(token: Option<&str>, body: &serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(EMIT_PATH)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn accessors() {
        let server = make_server(ServerConfig::default());
        assert_eq!(server.config().port, 0);
        assert!(server.registry().is_empty());
        assert!(!server.keepalive().is_enabled());
        assert!(!server.shutdown().is_shutting_down());
        assert!(Arc::ptr_eq(server.broadcaster().registry(), server.registry()));
    }

    #[test]
    fn keepalive_follows_config() {
        let server = make_server(ServerConfig {
            keepalive_enabled: true,
            keepalive_interval_ms: 5000,
            ..ServerConfig::default()
        });
        assert!(server.keepalive().is_enabled());
        assert_eq!(server.keepalive().config().interval.as_millis(), 5000);
    }

    #[tokio::test]
    async fn health_endpoint_reports_connections() {
        let server = make_server(ServerConfig::default());
        let conn = MockConnection::new("c1");
        assert!(server.registry().add(conn, Arc::new(Principal::new("alice"))));

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 1);
        assert_eq!(parsed["keepalive"], false);
    }

    #[tokio::test]
    async fn health_reports_shutdown() {
        let server = make_server(ServerConfig::default());
        server.shutdown().shutdown();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let parsed = body_json(server.router().oneshot(req).await.unwrap()).await;
        assert_eq!(parsed["status"], "shutting_down");
    }

    #[tokio::test]
    async fn metrics_endpoint_needs_handle() {
        let server = make_server(ServerConfig::default());
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server(ServerConfig::default()).with_metrics(handle);
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            resp.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }

    #[tokio::test]
    async fn ws_endpoint_requires_upgrade() {
        let server = make_server(ServerConfig::default());
        let req = Request::builder().uri(WS_PATH).body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
        assert_ne!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn emit_route_absent_without_token() {
        let server = make_server(ServerConfig::default());
        let body = json!({"eventType": "SAVE_SITE"});
        let resp = server
            .router()
            .oneshot(emit_request(Some("secret"), &body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn emit_rejects_bad_token() {
        let server = with_emit_token();
        let body = json!({"eventType": "SAVE_SITE"});
        for token in [None, Some("wrong")] {
            let resp = server.router().oneshot(emit_request(token, &body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn emit_broadcasts_and_reports() {
        let server = with_emit_token();
        let admin = MockConnection::new("a");
        let editor = MockConnection::new("b");
        assert!(server.registry().add(admin.clone(), Arc::new(Principal::new("alice").with_role("admin"))));
        assert!(server.registry().add(editor.clone(), Arc::new(Principal::new("bob"))));

        let body = json!({
            "eventType": "SAVE_SITE",
            "payload": {
                "type": "site",
                "data": {"hostname": "demo.example"},
                "visibility": {"kind": "ROLE", "role": "admin"}
            }
        });
        let resp = server
            .router()
            .oneshot(emit_request(Some("secret"), &body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let report = body_json(resp).await;
        assert_eq!(report["delivered"], 1);
        assert_eq!(report["filtered"], 1);

        let frames = admin.sent_json();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["eventType"], "SAVE_SITE");
        assert!(frames[0]["id"].is_string());
        assert!(editor.sent().is_empty());
        assert!(editor.is_open());
    }

    #[tokio::test]
    async fn emit_without_payload_reaches_nobody() {
        let server = with_emit_token();
        let conn = MockConnection::new("a");
        assert!(server.registry().add(conn.clone(), Arc::new(Principal::new("alice"))));

        let resp = server
            .router()
            .oneshot(emit_request(Some("secret"), &json!({"eventType": "SAVE_SITE"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await["delivered"], 0);
        assert!(conn.sent().is_empty());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server(ServerConfig::default());
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_and_stops_on_shutdown() {
        let server = make_server(ServerConfig::default());
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        assert!(
            server
                .shutdown()
                .drain(handle, std::time::Duration::from_secs(5))
                .await
        );
    }

    #[test]
    fn emit_request_fills_id_and_time() {
        let request: EmitRequest = serde_json::from_value(json!({
            "eventType": "NOTIFICATION",
            "payload": {"type": "notification", "data": {"message": "hi"}}
        }))
        .unwrap();
        let event = request.into_event();
        assert_eq!(event.event_type, SystemEventType::Notification);
        assert!(!event.id.as_str().is_empty());
        assert_eq!(event.payload.unwrap().data["message"], "hi");
    }
}
