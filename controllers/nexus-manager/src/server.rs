//! HTTP endpoints
//!
//! Two listeners: probes and metrics on `HTTP_ADDR`, the admission webhook
//! on `WEBHOOK_ADDR` (TLS when PEM files are configured). Both stop when the
//! shutdown token is cancelled.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::TlsPaths;
use crate::defaults::DefaultsStore;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::webhook::{WebhookState, webhook_router};

/// In-flight admission requests get this long to finish on shutdown
const WEBHOOK_DRAIN: Duration = Duration::from_secs(10);

/// Shared state for the probe endpoints
#[derive(Debug, Clone)]
pub struct ProbeState {
    pub defaults: Arc<DefaultsStore>,
    pub metrics: Arc<Metrics>,
}

/// `/healthz`, `/readyz` and `/metrics`
pub fn probe_router(state: Arc<ProbeState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn readyz(State(state): State<Arc<ProbeState>>) -> (StatusCode, &'static str) {
    if state.defaults.is_loaded() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "defaults not loaded")
    }
}

async fn metrics(State(state): State<Arc<ProbeState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serve probes and metrics until `cancel` fires.
pub async fn serve_http(
    addr: SocketAddr,
    state: Arc<ProbeState>,
    cancel: CancellationToken,
) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Server(format!("bind {addr}: {e}")))?;
    info!(%addr, "Serving probes and metrics");

    axum::serve(listener, probe_router(state).layer(TraceLayer::new_for_http()))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| ControllerError::Server(format!("probe server: {e}")))
}

/// Serve the admission webhook until `cancel` fires.
pub async fn serve_webhook(
    addr: SocketAddr,
    tls: Option<TlsPaths>,
    state: Arc<WebhookState>,
    cancel: CancellationToken,
) -> Result<(), ControllerError> {
    let app = webhook_router(state).layer(TraceLayer::new_for_http());

    let handle = axum_server::Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        cancel.cancelled().await;
        shutdown.graceful_shutdown(Some(WEBHOOK_DRAIN));
    });

    let served = match tls {
        Some(paths) => {
            let tls_config = RustlsConfig::from_pem_file(&paths.cert, &paths.key)
                .await
                .map_err(|e| ControllerError::Server(format!("webhook TLS config: {e}")))?;
            info!(%addr, cert = %paths.cert.display(), "Serving admission webhook over TLS");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        None => {
            info!(%addr, "Serving admission webhook over plain HTTP");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
    };
    served.map_err(|e| ControllerError::Server(format!("webhook server: {e}")))
}
