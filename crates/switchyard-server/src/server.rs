use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use switchyard_core::engine::MethodEngine;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::lifecycle::LifecycleManager;
use crate::metrics::TransportMetrics;
use crate::registry::SessionRegistry;
use crate::{legacy, unified};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<SessionRegistry>,
    pub lifecycle: Arc<LifecycleManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<TransportMetrics>,
}

impl AppState {
    pub fn new(config: ServerConfig, engine: Arc<dyn MethodEngine>) -> Self {
        let metrics = Arc::new(TransportMetrics::new());
        let registry = Arc::new(SessionRegistry::new(config.max_send_queue, Arc::clone(&metrics)));
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&registry),
            config.idle_timeout(),
            config.sweep_interval(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            engine,
            config.protocol_version.clone(),
            Arc::clone(&metrics),
        ));
        Self {
            config: Arc::new(config),
            registry,
            lifecycle,
            dispatcher,
            metrics,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    Router::new()
        .route(&config.legacy_sse_path, get(legacy::open_stream))
        .route(&config.legacy_message_path, post(legacy::submit))
        .route(
            &config.unified_path,
            get(unified::handle_get)
                .post(unified::handle_post)
                .delete(unified::handle_delete),
        )
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener and serve in the background. Failing to bind is the
/// only fatal startup condition.
pub async fn start(
    config: ServerConfig,
    engine: Arc<dyn MethodEngine>,
) -> Result<ServerHandle, ServerError> {
    config.validate().map_err(ServerError::Config)?;

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;
    let local_addr = listener.local_addr()?;

    let state = AppState::new(config, engine);
    let sweeper = state.lifecycle.start_sweeper();
    let router = build_router(state.clone());

    tracing::info!(
        addr = %local_addr,
        legacy = %state.config.legacy_sse_path,
        unified = %state.config.unified_path,
        "Switchyard server started"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
        {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        state,
        shutdown,
        server,
        _sweeper: sweeper,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    state: AppState,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    _sweeper: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Stop accepting connections, close every session (ending their
    /// streams), then wait for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.state.lifecycle.shutdown();
        let _ = self.server.await;
        tracing::info!("Switchyard server stopped");
    }
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.registry.len(),
        "protocolVersion": state.config.protocol_version,
        "metrics": state.metrics.snapshot(),
    }))
}
