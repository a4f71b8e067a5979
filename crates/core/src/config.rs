// Environment configuration
//
// Every setting is read through a lookup function so binaries use the process
// environment while tests pass a map. Connection settings have no defaults:
// a missing key is a startup error. Retry settings default to 10 attempts
// spaced 5 seconds apart.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

/// Source of configuration values (usually the process environment)
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Read a key from the process environment, treating empty values as unset
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable required")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Read a required key
pub fn required(lookup: Lookup<'_>, key: &'static str) -> Result<String, ConfigError> {
    lookup(key)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

/// Read and parse a required key
pub fn required_parse<T>(lookup: Lookup<'_>, key: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    parse_value(key, &required(lookup, key)?)
}

/// Read and parse an optional key
pub fn optional_parse<T>(lookup: Lookup<'_>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key).filter(|v| !v.is_empty()) {
        Some(raw) => parse_value(key, &raw).map(Some),
        None => Ok(None),
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

// ============================================================================
// Connection retry
// ============================================================================

/// Connection retry settings shared by broker and store connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Environment variables:
    /// - `CONNECT_MAX_ATTEMPTS`: attempts before giving up (default: 10)
    /// - `CONNECT_RETRY_DELAY_SECS`: delay between attempts (default: 5)
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let max_attempts = optional_parse::<u32>(lookup, "CONNECT_MAX_ATTEMPTS")?
            .unwrap_or(defaults.max_attempts);
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "CONNECT_MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        let retry_delay = optional_parse::<u64>(lookup, "CONNECT_RETRY_DELAY_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry_delay);

        Ok(Self {
            max_attempts,
            retry_delay,
        })
    }
}

// ============================================================================
// Broker
// ============================================================================

/// Durable queue (broker) connection settings
#[derive(Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub queue_name: String,
}

impl BrokerConfig {
    /// Environment variables (all required):
    /// `BROKER_HOST`, `BROKER_PORT`, `BROKER_USER`, `BROKER_PASSWORD`,
    /// `BROKER_DATABASE`, `QUEUE_NAME`
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            host: required(lookup, "BROKER_HOST")?,
            port: required_parse(lookup, "BROKER_PORT")?,
            user: required(lookup, "BROKER_USER")?,
            password: required(lookup, "BROKER_PASSWORD")?,
            database: required(lookup, "BROKER_DATABASE")?,
            queue_name: required(lookup, "QUEUE_NAME")?,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    /// Connection URL with percent-encoded credentials
    pub fn url(&self) -> Result<String, ConfigError> {
        postgres_url(
            "BROKER_HOST",
            &self.host,
            self.port,
            &self.user,
            &self.password,
            &self.database,
        )
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("queue_name", &self.queue_name)
            .finish()
    }
}

// ============================================================================
// Store
// ============================================================================

/// Event store connection settings
#[derive(Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub table: String,
}

impl StoreConfig {
    /// Environment variables (all required):
    /// `STORE_HOST`, `STORE_PORT`, `STORE_USER`, `STORE_PASSWORD`,
    /// `STORE_DATABASE`, `STORE_TABLE`
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let table = required(lookup, "STORE_TABLE")?;
        if !is_sql_identifier(&table) {
            return Err(ConfigError::Invalid {
                key: "STORE_TABLE",
                reason: format!("'{}' is not a plain SQL identifier", table),
            });
        }

        Ok(Self {
            host: required(lookup, "STORE_HOST")?,
            port: required_parse(lookup, "STORE_PORT")?,
            user: required(lookup, "STORE_USER")?,
            password: required(lookup, "STORE_PASSWORD")?,
            database: required(lookup, "STORE_DATABASE")?,
            table,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    /// Connection URL with percent-encoded credentials
    pub fn url(&self) -> Result<String, ConfigError> {
        postgres_url(
            "STORE_HOST",
            &self.host,
            self.port,
            &self.user,
            &self.password,
            &self.database,
        )
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("table", &self.table)
            .finish()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn postgres_url(
    host_key: &'static str,
    host: &str,
    port: u16,
    user: &str,
    password: &str,
    database: &str,
) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key: host_key,
        reason,
    };

    let mut url = Url::parse(&format!("postgres://{}:{}", host, port))
        .map_err(|e| invalid(e.to_string()))?;
    url.set_username(user)
        .map_err(|_| invalid("cannot carry credentials".to_string()))?;
    url.set_password(Some(password))
        .map_err(|_| invalid("cannot carry credentials".to_string()))?;
    url.set_path(database);

    Ok(url.into())
}

/// Replace the password of a connection URL for logging
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.into()
        }
        Err(_) => "<unparseable url>".to_string(),
    }
}

/// Letters, digits and underscores, not starting with a digit, at most 63 bytes
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
