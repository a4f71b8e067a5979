// Event ingestion route
//
// The body is parsed by hand rather than through the Json extractor so that
// every malformed body maps to the same plain-text 400 regardless of
// Content-Type. Validation failures never reach the publisher.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use relay_core::{Event, ValidationError};
use relay_durable::PublishError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::AppState;

/// Incoming telemetry event
///
/// Every field is optional at the parsing stage so that absent and empty
/// required fields produce the same validation error.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct EventRequest {
    /// Device identifier (required)
    #[schema(example = "sensor-1")]
    pub device: Option<String>,
    /// Operating system of the device (required)
    #[schema(example = "linux")]
    pub os: Option<String>,
    /// Event type (required)
    #[schema(example = "temp")]
    pub tipo: Option<String>,
    /// Measured value
    #[schema(example = "21.5")]
    pub valor: Option<String>,
    /// Origin IP address
    pub ip: Option<String>,
    /// Origin region
    pub region: Option<String>,
}

impl EventRequest {
    /// Validate and convert into the wire event
    pub fn into_event(self) -> Result<Event, ValidationError> {
        let event = Event {
            device: self.device.unwrap_or_default(),
            os: self.os.unwrap_or_default(),
            event_type: self.tipo.unwrap_or_default(),
            value: self.valor,
            ip: self.ip,
            region: self.region,
        };
        event.validate()?;
        Ok(event)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AcceptedResponse {
    #[schema(example = "accepted")]
    pub status: String,
}

impl AcceptedResponse {
    pub fn accepted() -> Self {
        Self {
            status: "accepted".to_string(),
        }
    }
}

/// Reasons an event is not accepted
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error(transparent)]
    MissingFields(#[from] ValidationError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::InvalidJson(_) => (StatusCode::BAD_REQUEST, "Invalid JSON").into_response(),
            IngestError::MissingFields(_) => {
                (StatusCode::BAD_REQUEST, "Missing required fields").into_response()
            }
            IngestError::Publish(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to process event").into_response()
            }
        }
    }
}

/// Create event routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/events", post(ingest_event).fallback(method_not_allowed))
        .with_state(state)
}

/// POST /events - Accept an event for durable delivery
#[utoipa::path(
    post,
    path = "/events",
    request_body = EventRequest,
    responses(
        (status = 202, description = "Event durably enqueued", body = AcceptedResponse),
        (status = 400, description = "Invalid JSON or missing required fields", body = String, content_type = "text/plain"),
        (status = 405, description = "Method not allowed", body = String, content_type = "text/plain"),
        (status = 500, description = "Event could not be enqueued", body = String, content_type = "text/plain")
    ),
    tag = "events"
)]
pub async fn ingest_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<AcceptedResponse>), IngestError> {
    // A literal `null` is valid JSON carrying no fields
    let request: EventRequest = serde_json::from_slice::<Option<EventRequest>>(&body)
        .map_err(|e| {
            tracing::debug!("Rejected event body: {}", e);
            IngestError::from(e)
        })?
        .unwrap_or_default();

    let event = request.into_event().map_err(|e| {
        tracing::debug!("Rejected event: {}", e);
        IngestError::from(e)
    })?;

    let ack = state.publisher.publish(&event).await.map_err(|e| {
        tracing::error!("Failed to publish event: {}", e);
        IngestError::from(e)
    })?;

    tracing::debug!(message_id = %ack.message_id, device = %event.device, "Event accepted");
    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse::accepted())))
}

async fn method_not_allowed() -> (StatusCode, &'static str) {
    (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use relay_durable::{DurablePublisher, InMemoryMessageQueue, MessageQueue};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(queue: Arc<InMemoryMessageQueue>) -> Router {
        routes(AppState::new(DurablePublisher::new(queue, "events")))
    }

    async fn post_body(app: Router, body: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/events")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_accepts_complete_event() {
        let queue = Arc::new(InMemoryMessageQueue::new());
        let (status, body) = post_body(
            app(queue.clone()),
            r#"{"device":"sensor-1","os":"linux","tipo":"temp","valor":"21.5"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, r#"{"status":"accepted"}"#);
        assert_eq!(queue.published_count(), 1);

        let delivery = queue
            .fetch("events", "c1", 1, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        let event = Event::from_wire(&delivery.body).unwrap();
        assert_eq!(event, Event::new("sensor-1", "linux", "temp").with_value("21.5"));
    }

    #[tokio::test]
    async fn test_missing_required_fields() {
        let queue = Arc::new(InMemoryMessageQueue::new());
        let (status, body) = post_body(app(queue.clone()), r#"{"os":"linux"}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Missing required fields");
        assert_eq!(queue.published_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_required_field_is_missing() {
        for body in [
            r#"{"device":"","os":"linux","tipo":"temp"}"#,
            r#"{"device":"d","os":"","tipo":"temp"}"#,
            r#"{"device":"d","os":"linux","tipo":""}"#,
            r#"{}"#,
            "null",
            " null ",
        ] {
            let queue = Arc::new(InMemoryMessageQueue::new());
            let (status, text) = post_body(app(queue.clone()), body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
            assert_eq!(text, "Missing required fields");
            assert_eq!(queue.published_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_invalid_json() {
        for body in ["", "{", "not json", r#"{"device":1,"os":"linux","tipo":"temp"}"#] {
            let queue = Arc::new(InMemoryMessageQueue::new());
            let (status, text) = post_body(app(queue.clone()), body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {:?}", body);
            assert_eq!(text, "Invalid JSON");
            assert_eq!(queue.published_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_producer_timestamp_is_not_forwarded() {
        let queue = Arc::new(InMemoryMessageQueue::new());
        let (status, _) = post_body(
            app(queue.clone()),
            r#"{"device":"d","os":"linux","tipo":"temp","timestamp":"1999-01-01T00:00:00Z"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let delivery = queue
            .fetch("events", "c1", 1, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        let wire: serde_json::Value = serde_json::from_slice(&delivery.body).unwrap();
        assert!(wire.get("timestamp").is_none());
    }

    #[tokio::test]
    async fn test_publish_failure_is_500() {
        let queue = Arc::new(InMemoryMessageQueue::new());
        queue.set_unavailable(true);

        let (status, body) = post_body(
            app(queue.clone()),
            r#"{"device":"d","os":"linux","tipo":"temp"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Failed to process event");
    }

    #[tokio::test]
    async fn test_non_post_is_405() {
        for method in ["GET", "PUT", "DELETE"] {
            let response = app(Arc::new(InMemoryMessageQueue::new()))
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri("/events")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&bytes[..], b"Method not allowed");
        }
    }

    #[test]
    fn test_into_event_lists_missing_fields() {
        let err = EventRequest {
            os: Some("linux".to_string()),
            ..Default::default()
        }
        .into_event()
        .unwrap_err();

        assert_eq!(err, ValidationError::MissingFields(vec!["device", "tipo"]));
    }
}
