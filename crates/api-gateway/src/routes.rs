//! Route configuration for the API

use actix_web::web;

use crate::handlers;

/// Configure all routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    // Liveness and readiness probes live outside /api/v1: orchestrators poll
    // these by convention and shouldn't need to track API versioning.
    cfg.route("/healthz", web::get().to(handlers::health::liveness))
        .route("/readyz", web::get().to(handlers::health::readiness));

    cfg.service(
        web::scope("/api/v1")
            // Self-describing OpenAPI document
            .route("/openapi.json", web::get().to(handlers::health::openapi_json))
            .service(
                web::scope("/webhooks")
                    .route("/github", web::post().to(handlers::webhooks::github_webhook))
                    .route("/slack", web::post().to(handlers::webhooks::slack_webhook)),
            ),
    );
}
