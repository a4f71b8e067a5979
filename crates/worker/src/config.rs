// Consumer configuration
//
// CONSUMER_PORT, the broker and store connections, the shared retry budget
// and the optional redelivery cap.

use relay_core::config::{env_lookup, optional_parse, required_parse, Lookup};
use relay_core::{BrokerConfig, ConfigError, RetryConfig, StoreConfig};
use relay_durable::SubscriberConfig;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Health endpoint port
    pub port: u16,
    pub broker: BrokerConfig,
    pub store: StoreConfig,
    pub retry: RetryConfig,
    /// Dead-letter after this many redeliveries (unset: redeliver forever)
    pub max_redeliveries: Option<u32>,
    /// Stable consumer identity; a fresh one is generated when unset
    pub consumer_id: Option<String>,
}

impl ConsumerConfig {
    /// Environment variables:
    /// - `CONSUMER_PORT`: health endpoint port (required)
    /// - `BROKER_*`, `QUEUE_NAME`: see [`BrokerConfig`]
    /// - `STORE_*`: see [`StoreConfig`]
    /// - `CONNECT_MAX_ATTEMPTS`, `CONNECT_RETRY_DELAY_SECS`: see [`RetryConfig`]
    /// - `MAX_REDELIVERIES`: optional redelivery cap
    /// - `CONSUMER_ID`: optional consumer identity
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            port: required_parse(lookup, "CONSUMER_PORT")?,
            broker: BrokerConfig::from_lookup(lookup)?,
            store: StoreConfig::from_lookup(lookup)?,
            retry: RetryConfig::from_lookup(lookup)?,
            max_redeliveries: optional_parse(lookup, "MAX_REDELIVERIES")?,
            consumer_id: lookup("CONSUMER_ID").filter(|v| !v.is_empty()),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    /// Subscriber settings derived from this configuration
    pub fn subscriber_config(&self) -> SubscriberConfig {
        let config = SubscriberConfig::new(self.broker.queue_name.clone())
            .with_max_redeliveries(self.max_redeliveries);
        match &self.consumer_id {
            Some(id) => config.with_consumer_id(id.clone()),
            None => config,
        }
    }
}
