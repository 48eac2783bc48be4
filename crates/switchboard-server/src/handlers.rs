//! HTTP and WebSocket handlers for the Switchboard server.

use crate::config::Config;
use crate::metrics;
use crate::session;
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use switchboard_core::{LivenessMonitor, Router as EventRouter};
use switchboard_transport::AxumConnection;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The event router.
    pub router: Arc<EventRouter>,
    /// Server configuration.
    pub config: Config,
    started_at: Instant,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            router: Arc::new(EventRouter::with_config(config.router_config())),
            config,
            started_at: Instant::now(),
        }
    }
}

/// Build the HTTP application.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let monitor =
        LivenessMonitor::new(Arc::clone(&state.router), config.liveness_config()).spawn();

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Switchboard server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let served = axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    monitor.abort();
    served.context("Server error")?;

    info!("Switchboard server stopped");
    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.router.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "connections": stats.connection_count,
        "operators": stats.operator_count,
        "devices": stats.device_count,
    }))
}

/// WebSocket upgrade handler.
///
/// Refuses the upgrade with 503 when the router is already full. Upgrades
/// racing past this check are still bounded by the router, which closes them
/// right after the handshake.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let active = state.router.stats().connection_count;
    if active >= state.config.limits.max_connections {
        warn!(remote = %addr, active, "Connection limit reached, refusing upgrade");
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    let router = Arc::clone(&state.router);
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| session::drive(AxumConnection::new(socket, Some(addr)), router))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
