//! Liveness and readiness endpoints

use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;
use shared::DbPool;
use utoipa::{OpenApi, ToSchema};

use crate::openapi::ApiDoc;

/// Liveness response: the process is up and able to answer requests.
#[derive(Debug, Serialize, ToSchema)]
pub struct LivenessResponse {
    pub status: String,
    pub version: String,
}

/// Readiness response: whether the gateway's dependencies are reachable.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadinessResponse {
    pub status: String,
    pub database: String,
    pub redis: String,
    pub version: String,
}

/// Liveness probe
///
/// Returns 200 as long as the process is running; does not touch any
/// dependency. Used by orchestrators to decide whether to restart the
/// container.
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "Health",
    responses(
        (status = 200, description = "Process is up", body = LivenessResponse)
    )
)]
pub async fn liveness() -> impl Responder {
    HttpResponse::Ok().json(LivenessResponse {
        status: "alive".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe
///
/// Returns 200 only when the database and Redis are both reachable. Used by
/// orchestrators to decide whether to route traffic to this instance.
#[utoipa::path(
    get,
    path = "/readyz",
    tag = "Health",
    responses(
        (status = 200, description = "Dependencies are reachable", body = ReadinessResponse),
        (status = 503, description = "A dependency is unreachable", body = ReadinessResponse)
    )
)]
pub async fn readiness(
    pool: web::Data<DbPool>,
    redis: web::Data<redis::aio::ConnectionManager>,
) -> impl Responder {
    let db_ok = shared::db::check_health(&pool).await.is_ok();
    let mut redis_conn = redis.get_ref().clone();
    let redis_ok = shared::redis::check_health(&mut redis_conn).await.is_ok();

    let response = ReadinessResponse {
        status: if db_ok && redis_ok { "ready" } else { "not_ready" }.to_string(),
        database: if db_ok { "connected" } else { "disconnected" }.to_string(),
        redis: if redis_ok { "connected" } else { "disconnected" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    if db_ok && redis_ok {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}

/// OpenAPI JSON endpoint
///
/// Returns the OpenAPI 3.0 specification for the API.
/// This endpoint is public and does not require authentication.
#[utoipa::path(
    get,
    path = "/api/v1/openapi.json",
    tag = "Health",
    responses(
        (status = 200, description = "OpenAPI specification", content_type = "application/json")
    )
)]
pub async fn openapi_json() -> impl Responder {
    HttpResponse::Ok().content_type("application/json").body(
        ApiDoc::openapi()
            .to_json()
            .unwrap_or_else(|_| "{}".to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_response_serializes_status_and_version() {
        let response = LivenessResponse {
            status: "alive".to_string(),
            version: "0.1.0".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("alive"));
        assert!(json.contains("0.1.0"));
    }

    #[test]
    fn readiness_response_reports_not_ready_when_a_dependency_is_down() {
        let response = ReadinessResponse {
            status: "not_ready".to_string(),
            database: "connected".to_string(),
            redis: "disconnected".to_string(),
            version: "0.1.0".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("not_ready"));
        assert!(json.contains("disconnected"));
    }
}
