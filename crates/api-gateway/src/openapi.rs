//! OpenAPI documentation configuration.
//!
//! Generates the OpenAPI 3.0 specification for the webhook intake surface
//! from utoipa annotations on the handlers.

use utoipa::OpenApi;

use crate::handlers;
use crate::handlers::health::{LivenessResponse, ReadinessResponse};
use crate::handlers::webhooks::WebhookAck;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "FlakeGuard Webhook Intake",
        version = "1.0.0",
        description = "Verifies inbound code-host webhooks and enqueues them for asynchronous ingestion.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Webhooks", description = "Inbound code-host webhook intake")
    ),
    paths(
        handlers::liveness,
        handlers::readiness,
        handlers::openapi_json,
        handlers::github_webhook,
        handlers::slack_webhook,
    ),
    components(schemas(models::ErrorResponse, LivenessResponse, ReadinessResponse, WebhookAck,))
)]
pub struct ApiDoc;
