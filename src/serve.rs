/// Status exporter: serves the liveness flag over HTTP so orchestrators and
/// `heartbeat-agent check` can query it.
use crate::config::ServeConfig;
use crate::status::{Status, StatusSnapshot};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
struct AppState {
    status: Arc<Status>,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    #[serde(flatten)]
    snapshot: StatusSnapshot,
}

pub fn router(status: Arc<Status>) -> axum::Router {
    use axum::{routing::get, Router};
    use tower_http::cors::CorsLayer;

    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(api_status))
        .with_state(AppState { status })
        .layer(CorsLayer::permissive())
}

/// Bind the exporter and serve it on a background task until `shutdown`
/// fires. Returns `None` when the listener cannot be bound; the agent keeps
/// running without a query interface in that case.
pub async fn start(
    config: &ServeConfig,
    status: Arc<Status>,
    shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let listener = match bind(config).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "status exporter unavailable, continuing without it");
            return None;
        }
    };

    Some(tokio::spawn(async move {
        if let Err(e) = run(listener, status, shutdown).await {
            tracing::error!(error = %e, "status exporter stopped");
        }
    }))
}

pub async fn bind(config: &ServeConfig) -> Result<tokio::net::TcpListener, ServeError> {
    let addr = config.addr();
    tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ServeError::Bind { addr, source: e })
}

pub async fn run(
    listener: tokio::net::TcpListener,
    status: Arc<Status>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServeError> {
    let local_addr = listener.local_addr().map_err(|e| ServeError::Serve { source: e })?;
    tracing::info!("status exporter listening on {local_addr}");

    axum::serve(listener, router(status))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| ServeError::Serve { source: e })?;

    tracing::debug!("status exporter shut down");
    Ok(())
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> (axum::http::StatusCode, axum::Json<HealthBody>) {
    let snapshot = state.status.snapshot();
    let (code, label) = if snapshot.alive {
        (axum::http::StatusCode::OK, "alive")
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "dead")
    };

    (
        code,
        axum::Json(HealthBody {
            status: label,
            snapshot,
        }),
    )
}

async fn api_status(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<StatusSnapshot> {
    axum::Json(state.status.snapshot())
}

/// Errors from binding or running the exporter.
#[derive(Debug)]
pub enum ServeError {
    Bind {
        addr: String,
        source: std::io::Error,
    },
    Serve {
        source: std::io::Error,
    },
}

impl std::fmt::Display for ServeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServeError::Bind { addr, source } => write!(f, "failed to bind {addr}: {source}"),
            ServeError::Serve { source } => write!(f, "server error: {source}"),
        }
    }
}

impl std::error::Error for ServeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServeError::Bind { source, .. } => Some(source),
            ServeError::Serve { source } => Some(source),
        }
    }
}
