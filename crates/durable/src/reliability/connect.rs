//! Connection establishment with bounded retries
//!
//! The same manager opens the broker connection on both sides of the relay
//! and the store connection on the consumer side.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use relay_core::config::redact_url;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use super::retry::RetryPolicy;

/// Per-attempt limit on acquiring the first PostgreSQL connection
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Terminal connection failure
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to connect to {target} after {attempts} attempts: {last_error}")]
    Exhausted {
        target: String,
        attempts: u32,
        last_error: String,
    },
}

/// Opens connections, retrying according to a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    policy: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `connector` until it succeeds or the policy runs out of attempts
    ///
    /// `target` names the dependency in logs and errors and must not carry
    /// credentials.
    pub async fn connect<T, E, F, Fut>(&self, target: &str, mut connector: F) -> Result<T, ConnectError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 1;

        loop {
            match connector().await {
                Ok(connection) => {
                    info!(target_name = %target, attempt, "Connected");
                    return Ok(connection);
                }
                Err(e) => {
                    warn!(
                        target_name = %target,
                        error = %e,
                        "Failed to connect, retrying... ({}/{})",
                        attempt,
                        max_attempts
                    );

                    if !self.policy.has_attempts_remaining(attempt) {
                        return Err(ConnectError::Exhausted {
                            target: target.to_string(),
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }

                    attempt += 1;
                    tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
                }
            }
        }
    }

    /// Open a PostgreSQL pool, eagerly establishing the first connection
    pub async fn connect_postgres(
        &self,
        name: &str,
        url: &str,
        max_connections: u32,
    ) -> Result<PgPool, ConnectError> {
        let target = format!("{} ({})", name, redact_url(url));
        self.connect(&target, || {
            PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect(url)
        })
        .await
    }
}
