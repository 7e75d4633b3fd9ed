//! Inbound webhook intake (design doc §4.11/§6): verifies the sender's
//! signature, filters by the configured event allow-list, and enqueues an
//! `events` job without blocking on any downstream processing.

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use shared::jobs::{EventDeliveryPayload, Job, JobKind};
use shared::Config;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::models::ErrorResponse;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub success: bool,
    pub message: String,
    #[serde(rename = "deliveryId")]
    pub delivery_id: String,
}

fn verify_github_signature(secret: &str, signature_header: &str, body: &[u8]) -> bool {
    let Some(hex_sig) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();
    computed.as_slice().ct_eq(expected.as_slice()).into()
}

fn verify_slack_signature(secret: &str, timestamp: &str, signature_header: &str, body: &[u8]) -> bool {
    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    let now = chrono::Utc::now().timestamp();
    if (now - ts).abs() > 60 * 5 {
        return false;
    }
    let Some(hex_sig) = signature_header.strip_prefix("v0=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    let computed = mac.finalize().into_bytes();
    computed.as_slice().ct_eq(expected.as_slice()).into()
}

/// Inbound code-host webhook.
///
/// Verifies the `X-Hub-Signature-256` header, filters by the allow-list and
/// enqueues an `events` job. Responds 202 immediately; processing happens
/// asynchronously in the ingest worker.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/github",
    tag = "Webhooks",
    responses(
        (status = 202, description = "Delivery accepted", body = WebhookAck),
        (status = 401, description = "Signature verification failed", body = ErrorResponse),
        (status = 400, description = "Missing required headers", body = ErrorResponse)
    )
)]
pub async fn github_webhook(
    config: web::Data<Config>,
    redis: web::Data<redis::aio::ConnectionManager>,
    req: HttpRequest,
    body: web::Bytes,
) -> impl Responder {
    let headers = req.headers();

    let delivery_id = match headers.get("X-GitHub-Delivery").and_then(|h| h.to_str().ok()) {
        Some(id) => id.to_string(),
        None => {
            return HttpResponse::BadRequest().json(ErrorResponse::new("missing_delivery_id", "Missing X-GitHub-Delivery header"));
        }
    };
    let event_type = match headers.get("X-GitHub-Event").and_then(|h| h.to_str().ok()) {
        Some(t) => t.to_string(),
        None => {
            return HttpResponse::BadRequest().json(ErrorResponse::new("missing_event_type", "Missing X-GitHub-Event header"));
        }
    };
    let signature = match headers.get("X-Hub-Signature-256").and_then(|h| h.to_str().ok()) {
        Some(s) => s,
        None => {
            return HttpResponse::BadRequest().json(ErrorResponse::new("missing_signature", "Missing X-Hub-Signature-256 header"));
        }
    };

    if !verify_github_signature(&config.host.webhook_secret, signature, &body) {
        warn!(delivery_id = %delivery_id, event_type = %event_type, "webhook signature verification failed");
        return HttpResponse::Unauthorized().json(ErrorResponse::new("invalid_signature", "Webhook signature verification failed"));
    }

    if !config.host.allowed_events.iter().any(|e| e == &event_type) {
        info!(delivery_id = %delivery_id, event_type = %event_type, "event type not in allow-list, acknowledging without enqueue");
        return HttpResponse::Accepted().json(WebhookAck {
            success: true,
            message: "event type not processed".to_string(),
            delivery_id,
        });
    }

    let parsed_body: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => {
            return HttpResponse::BadRequest().json(ErrorResponse::new("invalid_payload", "Webhook body is not valid JSON"));
        }
    };

    let payload = EventDeliveryPayload {
        delivery_id: delivery_id.clone(),
        event_type: event_type.clone(),
        body: parsed_body,
    };
    let job = match serde_json::to_value(&payload) {
        Ok(v) => Job::new(JobKind::Events, delivery_id.clone(), v),
        Err(e) => {
            warn!(delivery_id = %delivery_id, error = %e, "failed to serialize event payload");
            return HttpResponse::InternalServerError().json(ErrorResponse::new("internal_error", "Failed to enqueue webhook delivery"));
        }
    };

    let mut conn = redis.get_ref().clone();
    match shared::jobs::enqueue(&mut conn, &job).await {
        Ok(_) => HttpResponse::Accepted().json(WebhookAck {
            success: true,
            message: "accepted".to_string(),
            delivery_id,
        }),
        Err(e) => {
            warn!(delivery_id = %delivery_id, error = %e, "failed to enqueue webhook delivery");
            HttpResponse::InternalServerError().json(ErrorResponse::new("internal_error", "Failed to enqueue webhook delivery"))
        }
    }
}

/// Inbound Slack-signed request, accepted for signature verification only
/// (design doc §6: "out of scope beyond signature verification").
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/slack",
    tag = "Webhooks",
    responses(
        (status = 202, description = "Request accepted"),
        (status = 401, description = "Signature verification failed", body = ErrorResponse)
    )
)]
pub async fn slack_webhook(config: web::Data<Config>, req: HttpRequest, body: web::Bytes) -> impl Responder {
    let headers = req.headers();
    let timestamp = match headers.get("X-Slack-Request-Timestamp").and_then(|h| h.to_str().ok()) {
        Some(t) => t,
        None => return HttpResponse::BadRequest().json(ErrorResponse::new("missing_timestamp", "Missing X-Slack-Request-Timestamp header")),
    };
    let signature = match headers.get("X-Slack-Signature").and_then(|h| h.to_str().ok()) {
        Some(s) => s,
        None => return HttpResponse::BadRequest().json(ErrorResponse::new("missing_signature", "Missing X-Slack-Signature header")),
    };

    if !verify_slack_signature(&config.host.slack_signing_secret, timestamp, signature, &body) {
        warn!("slack signature verification failed");
        return HttpResponse::Unauthorized().json(ErrorResponse::new("invalid_signature", "Signature verification failed"));
    }

    HttpResponse::Accepted().finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_signature_accepts_matching_hmac() {
        let secret = "test-secret";
        let body = b"{\"action\":\"completed\"}";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        assert!(verify_github_signature(secret, &sig, body));
    }

    #[test]
    fn github_signature_rejects_wrong_secret() {
        let body = b"{\"action\":\"completed\"}";
        let mut mac = HmacSha256::new_from_slice(b"right-secret").unwrap();
        mac.update(body);
        let sig = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        assert!(!verify_github_signature("wrong-secret", &sig, body));
    }

    #[test]
    fn github_signature_rejects_missing_prefix() {
        assert!(!verify_github_signature("secret", "deadbeef", b"body"));
    }

    #[test]
    fn slack_signature_rejects_stale_timestamp() {
        let stale = (chrono::Utc::now().timestamp() - 3600).to_string();
        assert!(!verify_slack_signature("secret", &stale, "v0=deadbeef", b"body"));
    }
}
