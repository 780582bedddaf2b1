//! `bundlesrv serve`: the HTTP bundle server.
//!
//! ```text
//! GET /js/{*file}  bundle, built on first request (304 on matching If-None-Match)
//! GET /status      JSON status of every bundle
//! ```

use axum::{
    body::Body,
    extract::{Path as AxumPath, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bundlesrv_core::{BundleRegistry, BundleResponse, JobStatus, ServerConfig};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Serve action.
#[derive(Debug, Clone)]
pub struct ServeAction {
    pub config: ServerConfig,
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

pub async fn run(action: ServeAction) -> Result<()> {
    let registry = Arc::new(super::registry(&action.config)?);
    if registry.is_empty() {
        warn!("No bundles configured; every /js request will 404");
    }

    if action.config.prebuild {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let outcomes = registry.build_all().await;
            info!(count = outcomes.len(), "Prebuild finished");
        });
    }

    let host_ip = if action.host == "localhost" {
        "127.0.0.1"
    } else {
        action.host.as_str()
    };
    let addr: SocketAddr = format!("{host_ip}:{}", action.port)
        .parse()
        .into_diagnostic()?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    info!(
        addr = %addr,
        bundles = registry.len(),
        dev = action.config.dev_mode,
        "Bundle server listening"
    );

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}

pub fn router(registry: Arc<BundleRegistry>) -> Router {
    Router::new()
        .route("/js/*file", get(serve_bundle))
        .route("/status", get(serve_status))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Serve one bundle, building it first if needed.
async fn serve_bundle(
    State(registry): State<Arc<BundleRegistry>>,
    AxumPath(file): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    let Some(job) = registry.get(&file) else {
        return (StatusCode::NOT_FOUND, format!("// Bundle not found: {file}")).into_response();
    };

    let validator = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    into_http(job.serve(validator).await)
}

#[derive(Debug, Serialize)]
struct StatusReport {
    version: &'static str,
    bundles: Vec<JobStatus>,
}

async fn serve_status(State(registry): State<Arc<BundleRegistry>>) -> Json<StatusReport> {
    Json(StatusReport {
        version: bundlesrv_core::VERSION,
        bundles: registry.status(),
    })
}

fn into_http(bundle: BundleResponse) -> Response {
    let mut response = Response::new(Body::from(bundle.body()));
    *response.status_mut() =
        StatusCode::from_u16(bundle.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    for (name, value) in bundle.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}
