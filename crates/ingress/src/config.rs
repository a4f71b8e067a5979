// Ingress configuration
//
// INGRESS_PORT plus the broker connection and retry settings from relay-core.

use relay_core::config::{env_lookup, required_parse, Lookup};
use relay_core::{BrokerConfig, ConfigError, RetryConfig};

/// Broker pool size for the publisher
pub const DEFAULT_BROKER_POOL_SIZE: u32 = 10;

#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub port: u16,
    pub broker: BrokerConfig,
    pub retry: RetryConfig,
}

impl IngressConfig {
    /// Environment variables:
    /// - `INGRESS_PORT`: HTTP listen port (required)
    /// - `BROKER_*`, `QUEUE_NAME`: see [`BrokerConfig`]
    /// - `CONNECT_MAX_ATTEMPTS`, `CONNECT_RETRY_DELAY_SECS`: see [`RetryConfig`]
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            port: required_parse(lookup, "INGRESS_PORT")?,
            broker: BrokerConfig::from_lookup(lookup)?,
            retry: RetryConfig::from_lookup(lookup)?,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }
}
