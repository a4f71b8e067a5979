// Telemetry Relay consumer
// Decision: Store first, then broker; the process does not consume until both are reachable

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use relay_core::shutdown_signal;
use relay_core::telemetry::{init_telemetry, TelemetryConfig};
use relay_durable::{
    ConnectionManager, EventSink, MessageQueue, PostgresEventSink, PostgresMessageQueue,
    RetryPolicy,
};
use relay_worker::{health, ConsumerConfig, ConsumerWorker};

/// The subscriber holds at most one delivery, so small pools suffice
const POOL_SIZE: u32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - OTEL_SERVICE_NAME: Service name (default: "relay-worker")
    // - OTEL_EXPORTER_OTLP_ENDPOINT: OTLP endpoint (e.g., "http://localhost:4317")
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "relay_worker=info,relay_durable=info")
    let mut telemetry_config = TelemetryConfig::from_env()
        .with_defaults("relay-worker", "relay_worker=info,relay_durable=info");
    telemetry_config.service_version = Some(env!("CARGO_PKG_VERSION").to_string());

    // Keep the guard alive for the lifetime of the application
    let _telemetry_guard = init_telemetry(telemetry_config);

    tracing::info!("relay-worker starting...");

    let config = ConsumerConfig::from_env().context("Invalid consumer configuration")?;
    let store_url = config.store.url().context("Invalid store configuration")?;
    let broker_url = config.broker.url().context("Invalid broker configuration")?;
    let connections = ConnectionManager::new(RetryPolicy::from_config(&config.retry));

    let store_pool = connections
        .connect_postgres("store", &store_url, POOL_SIZE)
        .await
        .context("Failed to connect to store")?;
    let sink = Arc::new(
        PostgresEventSink::new(store_pool.clone(), config.store.table.clone())
            .context("Invalid store table")?,
    );
    sink.declare().await.context("Failed to declare event table")?;

    let broker_pool = connections
        .connect_postgres("broker", &broker_url, POOL_SIZE)
        .await
        .context("Failed to connect to broker")?;
    let queue = Arc::new(PostgresMessageQueue::new(broker_pool.clone()));
    queue.declare().await.context("Failed to declare queue")?;

    // Health endpoint
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind health endpoint")?;
    tracing::info!("Health endpoint listening on {}", addr);
    let (health_stop, health_stopped) = tokio::sync::oneshot::channel::<()>();
    let health_server = tokio::spawn(health::serve(listener, async move {
        let _ = health_stopped.await;
    }));

    let worker = ConsumerWorker::new(queue, sink, config.subscriber_config());
    let result = worker.run_until(shutdown_signal()).await;

    let _ = health_stop.send(());
    match health_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Health endpoint error"),
        Err(e) => tracing::warn!(error = %e, "Health endpoint task failed"),
    }
    broker_pool.close().await;
    store_pool.close().await;

    let stats = result.context("Consumer failed")?;
    tracing::info!(
        acked = stats.acked,
        requeued = stats.requeued,
        discarded = stats.discarded,
        dead_lettered = stats.dead_lettered,
        "relay-worker stopped"
    );

    Ok(())
}
