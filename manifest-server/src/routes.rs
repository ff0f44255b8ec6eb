use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use live_window::{EngineError, EngineStats, LiveEngine};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long in-flight requests may drain after shutdown is signalled.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the router with all endpoints.
pub fn manifest_router(engine: Arc<LiveEngine>) -> Router {
    Router::new()
        .route("/playlist.m3u8", get(playlist_handler))
        .route(
            "/variant/{index}/playlist.m3u8",
            get(variant_playlist_handler),
        )
        .route("/health", get(health_handler))
        .route("/cluster/status", get(cluster_status_handler))
        .layer(middleware::from_fn(log_requests))
        .with_state(engine)
}

/// Binds `addr` and serves until `cancel` fires, then drains in-flight
/// requests for up to ten seconds.
pub async fn serve(
    addr: &str,
    engine: Arc<LiveEngine>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    let shutdown = {
        let cancel = cancel.clone();
        async move { cancel.cancelled().await }
    };
    let server = axum::serve(listener, manifest_router(engine)).with_graceful_shutdown(shutdown);

    tokio::select! {
        result = server => result,
        _ = async {
            cancel.cancelled().await;
            tokio::time::sleep(DRAIN_TIMEOUT).await;
        } => {
            warn!("shutdown drain timed out, dropping open connections");
            Ok(())
        }
    }
}

fn hls_headers() -> [(header::HeaderName, &'static str); 3] {
    [
        (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
        (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    ]
}

/// Serve the root manifest: master for multi-variant sources, the single
/// variant's media manifest otherwise.
async fn playlist_handler(
    State(engine): State<Arc<LiveEngine>>,
) -> Result<impl IntoResponse, EngineErrorResponse> {
    let manifest = engine.manifest()?;
    Ok((hls_headers(), manifest))
}

/// Serve the media manifest for one variant.
async fn variant_playlist_handler(
    Path(index): Path<usize>,
    State(engine): State<Arc<LiveEngine>>,
) -> Result<impl IntoResponse, EngineErrorResponse> {
    let manifest = engine.variant_manifest(index)?;
    Ok((hls_headers(), manifest))
}

#[derive(Serialize)]
struct HealthDoc {
    status: &'static str,
    stats: EngineStats,
}

async fn health_handler(State(engine): State<Arc<LiveEngine>>) -> impl IntoResponse {
    Json(HealthDoc {
        status: "ok",
        stats: engine.stats(),
    })
}

/// Leadership summary; only meaningful when a cluster is attached.
async fn cluster_status_handler(State(engine): State<Arc<LiveEngine>>) -> Response {
    match engine.cluster_status() {
        Some(status) => Json(status).into_response(),
        None => (StatusCode::NOT_FOUND, "cluster mode disabled").into_response(),
    }
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "http request"
    );
    response
}

/// Error response wrapper mapping engine failures onto status codes.
pub struct EngineErrorResponse(EngineError);

impl From<EngineError> for EngineErrorResponse {
    fn from(error: EngineError) -> Self {
        EngineErrorResponse(error)
    }
}

impl IntoResponse for EngineErrorResponse {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            EngineError::VariantOutOfRange { .. } => (StatusCode::NOT_FOUND, self.0.to_string()),
            EngineError::NotInitialized => (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string()),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            ),
        };

        warn!("manifest error: {}", self.0);

        (status, message).into_response()
    }
}
