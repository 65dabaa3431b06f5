//! `PodiumServer`: Axum HTTP + `WebSocket` relay server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::Instant as Deadline;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::pages::{Page, Pages};
use crate::shutdown::{DEFAULT_SHUTDOWN_TIMEOUT, ShutdownCoordinator};
use crate::websocket::handler::handle_connection;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::relay::{BroadcastRelay, RelayPolicy};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Broadcast fan-out over `registry`.
    pub relay: Arc<BroadcastRelay>,
    /// Rendered presenter/audience pages.
    pub pages: Arc<Pages>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// One permit per connection slot, held from upgrade until teardown.
    pub slots: Arc<Semaphore>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct PodiumServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    relay: Arc<BroadcastRelay>,
    pages: Arc<Pages>,
    shutdown: Arc<ShutdownCoordinator>,
    slots: Arc<Semaphore>,
    max_slots: u32,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl PodiumServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, pages: Pages) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = Arc::new(BroadcastRelay::new(
            Arc::clone(&registry),
            RelayPolicy::from_config(&config),
        ));
        let max_slots = u32::try_from(config.max_connections.min(Semaphore::MAX_PERMITS))
            .unwrap_or(u32::MAX);
        Self {
            config: Arc::new(config),
            registry,
            relay,
            pages: Arc::new(pages),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            slots: Arc::new(Semaphore::new(max_slots as usize)),
            max_slots,
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            relay: Arc::clone(&self.relay),
            pages: Arc::clone(&self.pages),
            shutdown: Arc::clone(&self.shutdown),
            slots: Arc::clone(&self.slots),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        let mut router = Router::new()
            .route("/", get(audience_handler))
            .route("/presenter_ui", get(presenter_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler));

        if let Some(dir) = &self.config.static_dir {
            router = router.nest_service("/static", ServeDir::new(dir));
        }

        router.layer(TraceLayer::new_for_http()).with_state(state)
    }

    /// Bind the listener and serve in a background task.
    ///
    /// Returns the bound address (useful with port `0`). The serve task is
    /// tracked by the shutdown coordinator and drains on shutdown.
    pub async fn listen(&self) -> Result<SocketAddr, ServerError> {
        let host = self.config.host.as_str();
        let port = self.config.port;
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: format!("{host}:{port}"),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server terminated with error");
            }
        });
        self.shutdown.track(handle);

        info!(addr = %local_addr, "podium server listening");
        Ok(local_addr)
    }

    /// Stop accepting, close every connection and wait for tracked tasks.
    ///
    /// Connection tasks are drained first: each returns its slot only after
    /// its writer has sent the close frame. Returns `true` if every
    /// connection and task finished within `timeout`.
    pub async fn shutdown_gracefully(&self, timeout: Option<Duration>) -> bool {
        let deadline = Deadline::now() + timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown.shutdown();
        let closed = self.registry.close_all().await;
        info!(closed, "websocket connections closed");

        let drained = self.drain_connections(deadline).await;
        let remaining = deadline.saturating_duration_since(Deadline::now());
        self.shutdown.graceful_shutdown(Some(remaining)).await && drained
    }

    /// Wait until every connection slot has been returned.
    async fn drain_connections(&self, deadline: Deadline) -> bool {
        match tokio::time::timeout_at(deadline, self.slots.acquire_many(self.max_slots)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    open = self.open_slots(),
                    "connection tasks still running at shutdown deadline"
                );
                false
            }
        }
    }

    /// Connection slots currently in use, including upgrades in progress.
    pub fn open_slots(&self) -> usize {
        (self.max_slots as usize).saturating_sub(self.slots.available_permits())
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the broadcast relay.
    pub fn relay(&self) -> &Arc<BroadcastRelay> {
        &self.relay
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

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL, "reason" => "shutting_down").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }
    // Reserve the slot before upgrading; a failed upgrade drops the
    // callback and the permit with it.
    let Ok(permit) = Arc::clone(&state.slots).try_acquire_owned() else {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        warn!(
            connections = state.registry.connection_count(),
            max = state.config.max_connections,
            "rejecting websocket upgrade at capacity"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let relay = Arc::clone(&state.relay);
    let config = Arc::clone(&state.config);
    let token = state.shutdown.token();
    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| handle_connection(socket, relay, config, token, permit))
}

/// GET /
async fn audience_handler(State(state): State<AppState>) -> Response {
    render_page(&state.pages, Page::Audience)
}

/// GET /presenter_ui
async fn presenter_handler(State(state): State<AppState>) -> Response {
    render_page(&state.pages, Page::Presenter)
}

fn render_page(pages: &Pages, page: Page) -> Response {
    match pages.render(page) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!(error = %e, template = page.template(), "page render failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.connection_count(),
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
