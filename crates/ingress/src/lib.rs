// Telemetry Relay Ingress Library
// Decision: Router construction lives in the library so tests drive it in-process
// Decision: The publisher is injected through AppState; no global broker handle

// HTTP API routes and types (shared for OpenAPI generation)
pub mod api;

// Environment configuration
pub mod config;

// OpenAPI spec generation
pub mod openapi;

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use api::AppState;
pub use config::IngressConfig;

/// Upper bound on handling one request (publish itself is bounded at 5s)
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long in-flight requests may take to finish after a shutdown signal
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Build the ingress router
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(api::events::routes(state))
        .merge(api::health::routes())
        .route("/api-doc/openapi.json", get(openapi::openapi_json))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}

/// Serve `app` until `shutdown` resolves, then drain for at most `grace`
///
/// Requests still running when the grace period ends are abandoned; their
/// callers never got a 202, so nothing acknowledged is lost.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F, grace: Duration) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        result = &mut server => {
            return result.context("Server task failed")?.context("Server error");
        }
        _ = shutdown => {}
    }

    tracing::info!(grace_secs = grace.as_secs_f64(), "Draining in-flight requests");
    let _ = stop_tx.send(());

    match tokio::time::timeout(grace, server).await {
        Ok(result) => result.context("Server task failed")?.context("Server error"),
        Err(_) => {
            tracing::warn!("Grace period elapsed with requests still in flight");
            Ok(())
        }
    }
}
