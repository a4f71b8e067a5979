// Event Model
//
// This module defines the telemetry event as it travels through the relay.
// `Event` is the wire representation published to the queue (no timestamp).
// `EventRecord` is the storage representation, stamped by the consumer at
// the moment of the persistence attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type of every message body published by the relay
pub const WIRE_CONTENT_TYPE: &str = "application/json";

// ============================================================================
// Errors
// ============================================================================

/// An event is missing one or more required fields
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
}

/// A queue payload could not be turned into a valid event
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Body is not JSON, or required keys are absent or mistyped
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Body parsed but a required field is empty
    #[error("invalid event: {0}")]
    Invalid(#[from] ValidationError),
}

// ============================================================================
// Wire Event
// ============================================================================

/// A telemetry event in transit between the ingress and the store.
///
/// Field names on the wire are stable keys (`tipo`, `valor`) independent of
/// the Rust field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Device identifier
    pub device: String,

    /// Operating system label
    pub os: String,

    /// Event type / category
    #[serde(rename = "tipo")]
    pub event_type: String,

    /// Event value / payload
    #[serde(rename = "valor", default)]
    pub value: Option<String>,

    /// Origin IP
    #[serde(default)]
    pub ip: Option<String>,

    /// Region
    #[serde(default)]
    pub region: Option<String>,
}

impl Event {
    /// Create an event with the required fields only
    pub fn new(
        device: impl Into<String>,
        os: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            os: os.into(),
            event_type: event_type.into(),
            value: None,
            ip: None,
            region: None,
        }
    }

    /// Set the value
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Set the origin IP
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Set the region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Check that `device`, `os` and `tipo` are non-empty
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut missing = Vec::new();
        if self.device.is_empty() {
            missing.push("device");
        }
        if self.os.is_empty() {
            missing.push("os");
        }
        if self.event_type.is_empty() {
            missing.push("tipo");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::MissingFields(missing))
        }
    }

    /// Serialize to the queue wire encoding
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a queue payload, rejecting events with empty required fields
    pub fn from_wire(body: &[u8]) -> Result<Self, DecodeError> {
        let event: Event = serde_json::from_slice(body)?;
        event.validate()?;
        Ok(event)
    }

    /// Stamp the event for persistence
    pub fn into_record(self, timestamp: DateTime<Utc>) -> EventRecord {
        EventRecord {
            device: self.device,
            os: self.os,
            event_type: self.event_type,
            value: self.value,
            ip: self.ip,
            region: self.region,
            timestamp,
        }
    }
}

// ============================================================================
// Storage Record
// ============================================================================

/// A telemetry event as persisted in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub device: String,
    pub os: String,
    #[serde(rename = "tipo")]
    pub event_type: String,
    #[serde(rename = "valor")]
    pub value: Option<String>,
    pub ip: Option<String>,
    pub region: Option<String>,
    /// Assigned by the consumer at the persistence attempt
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_keys() {
        let event = Event::new("sensor-1", "linux", "temp").with_value("21.5");
        let value: serde_json::Value = serde_json::from_slice(&event.to_wire().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "device": "sensor-1",
                "os": "linux",
                "tipo": "temp",
                "valor": "21.5",
                "ip": null,
                "region": null
            })
        );
        assert!(value.get("timestamp").is_none());
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        let event = Event::new("", "linux", "");
        assert_eq!(
            event.validate(),
            Err(ValidationError::MissingFields(vec!["device", "tipo"]))
        );
        assert!(Event::new("d", "o", "t").validate().is_ok());
    }

    #[test]
    fn test_from_wire_accepts_missing_optionals() {
        let event = Event::from_wire(br#"{"device":"d","os":"o","tipo":"t"}"#).unwrap();
        assert_eq!(event, Event::new("d", "o", "t"));
    }

    #[test]
    fn test_from_wire_rejects_invalid_json() {
        let err = Event::from_wire(b"not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_from_wire_rejects_missing_required_key() {
        let err = Event::from_wire(br#"{"os":"linux"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_from_wire_rejects_empty_required_field() {
        let err = Event::from_wire(br#"{"device":"","os":"linux","tipo":"temp"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(_)));
    }

    #[test]
    fn test_from_wire_ignores_producer_timestamp() {
        let body = br#"{"device":"d","os":"o","tipo":"t","timestamp":"2001-01-01T00:00:00Z"}"#;
        let stamped_at = Utc::now();
        let record = Event::from_wire(body).unwrap().into_record(stamped_at);
        assert_eq!(record.timestamp, stamped_at);
    }

    #[test]
    fn test_record_uses_storage_field_names() {
        let ts = Utc::now();
        let record = Event::new("d", "o", "t").with_region("eu").into_record(ts);
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["tipo"], "t");
        assert_eq!(value["region"], "eu");
        assert!(value["valor"].is_null());
        assert!(value.get("timestamp").is_some());
    }
}
