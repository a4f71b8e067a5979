// Telemetry Relay ingress server
// Decision: Refuse to start without a broker connection; the retry budget comes from the environment

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use relay_core::shutdown_signal;
use relay_core::telemetry::{init_telemetry, TelemetryConfig};
use relay_durable::{ConnectionManager, DurablePublisher, MessageQueue, PostgresMessageQueue, RetryPolicy};
use relay_ingress::config::DEFAULT_BROKER_POOL_SIZE;
use relay_ingress::{router, serve, AppState, IngressConfig, SHUTDOWN_GRACE};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - OTEL_SERVICE_NAME: Service name (default: "relay-ingress")
    // - OTEL_EXPORTER_OTLP_ENDPOINT: OTLP endpoint (e.g., "http://localhost:4317")
    // - RUST_LOG: Log filter (default: "relay_ingress=info,relay_durable=info,tower_http=info")
    let mut telemetry_config = TelemetryConfig::from_env().with_defaults(
        "relay-ingress",
        "relay_ingress=info,relay_durable=info,tower_http=info",
    );
    telemetry_config.service_version = Some(env!("CARGO_PKG_VERSION").to_string());

    // Keep the guard alive for the lifetime of the application
    let _telemetry_guard = init_telemetry(telemetry_config);

    tracing::info!("relay-ingress starting...");

    let config = IngressConfig::from_env().context("Invalid ingress configuration")?;
    let broker_url = config.broker.url().context("Invalid broker configuration")?;

    let connections = ConnectionManager::new(RetryPolicy::from_config(&config.retry));
    let pool = connections
        .connect_postgres("broker", &broker_url, DEFAULT_BROKER_POOL_SIZE)
        .await
        .context("Failed to connect to broker")?;

    let queue = Arc::new(PostgresMessageQueue::new(pool.clone()));
    queue.declare().await.context("Failed to declare queue")?;

    let publisher = DurablePublisher::new(queue, config.broker.queue_name.clone());
    let app = router(AppState::new(publisher));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!(queue = %config.broker.queue_name, "HTTP server listening on {}", addr);

    serve(listener, app, shutdown_signal(), SHUTDOWN_GRACE).await?;

    pool.close().await;
    tracing::info!("relay-ingress stopped");

    Ok(())
}
