use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, warn};

use super::AppState;
use hangar_queue::EnqueueOptions;

type HmacSha256 = Hmac<Sha256>;

/// Inbound GitHub webhook. Signature failures are 401; enqueue failures
/// are 500 so the sender retries; everything else is 200 (including
/// redeliveries, which the delivery-id job key deduplicates).
pub async fn github(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, axum::Json<serde_json::Value>) {
    let Some(secret) = &state.config.webhook_secret else {
        return (
            StatusCode::NOT_FOUND,
            axum::Json(json!({ "error": "webhooks are not configured", "code": "not_found" })),
        );
    };

    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_signature(secret, signature, &body) {
        warn!(event = "daemon.webhook.signature_rejected");
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(json!({ "error": "invalid signature", "code": "validation" })),
        );
    }

    let event_name = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let delivery_id = headers
        .get("x-github-delivery")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(hangar_core::new_id);

    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap_or(json!({}));
    let repository = payload["repository"]["full_name"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let text = summarize(&event_name, &payload);

    let job_payload = json!({
        "job_id": delivery_id,
        "event": event_name,
        "repository": repository,
        "text": text,
    });
    let enqueue = state.queue.enqueue(
        crate::jobs::GITHUB_INBOUND,
        job_payload,
        EnqueueOptions {
            job_id: Some(delivery_id.clone()),
            ..Default::default()
        },
    );
    match enqueue {
        Ok(_) => {
            debug!(event = "daemon.webhook.enqueued", delivery_id = %delivery_id);
            (StatusCode::OK, axum::Json(json!({ "success": true })))
        }
        Err(e) if e.kind() == hangar_core::ErrorKind::Conflict => {
            // Redelivery of a processed delivery id.
            (StatusCode::OK, axum::Json(json!({ "success": true, "duplicate": true })))
        }
        Err(e) => {
            warn!(event = "daemon.webhook.enqueue_failed", error = %e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({ "error": e.to_string(), "code": "internal" })),
            )
        }
    }
}

/// Constant-time check of `X-Hub-Signature-256: sha256=<hex>`.
fn verify_signature(secret: &str, header: &str, body: &[u8]) -> bool {
    let Some(hex_digest) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// One-line human summary of a webhook payload for agent consumption.
fn summarize(event_name: &str, payload: &serde_json::Value) -> String {
    match event_name {
        "issue_comment" => format!(
            "comment on #{} by {}: {}",
            payload["issue"]["number"].as_u64().unwrap_or(0),
            payload["comment"]["user"]["login"].as_str().unwrap_or("?"),
            payload["comment"]["body"].as_str().unwrap_or(""),
        ),
        "issues" => format!(
            "issue #{} {}: {}",
            payload["issue"]["number"].as_u64().unwrap_or(0),
            payload["action"].as_str().unwrap_or("changed"),
            payload["issue"]["title"].as_str().unwrap_or(""),
        ),
        "pull_request" => format!(
            "pull request #{} {}: {}",
            payload["pull_request"]["number"].as_u64().unwrap_or(0),
            payload["action"].as_str().unwrap_or("changed"),
            payload["pull_request"]["title"].as_str().unwrap_or(""),
        ),
        other => format!("{} event", other),
    }
}
