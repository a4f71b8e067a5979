// OpenAPI specification generation
//
// Served by the ingress at /api-doc/openapi.json and printed by the
// export-openapi binary for documentation builds.

use axum::Json;
use utoipa::OpenApi;

use crate::api;

/// OpenAPI documentation for the ingress API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::events::ingest_event,
        api::health::health,
    ),
    components(
        schemas(
            api::events::EventRequest,
            api::events::AcceptedResponse,
            api::health::HealthResponse,
        )
    ),
    tags(
        (name = "events", description = "Telemetry event ingestion"),
        (name = "health", description = "Liveness probe")
    ),
    info(
        title = "Telemetry Relay Ingress API",
        description = "Accepts telemetry events for durable, at-least-once delivery to the event store",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> Result<String, serde_json::Error> {
        Self::openapi().to_pretty_json()
    }
}

/// GET /api-doc/openapi.json
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_lists_ingress_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/events"));
        assert!(doc.paths.paths.contains_key("/health"));
    }

    #[test]
    fn test_to_json() {
        let json = ApiDoc::to_json().unwrap();
        assert!(json.contains("Telemetry Relay Ingress API"));
    }
}
