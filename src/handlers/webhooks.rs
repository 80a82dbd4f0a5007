use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use tracing::{info, warn};

use crate::errors::ServiceError;
use crate::gateways::GatewayKind;
use crate::{ApiResponse, AppState};

const DEDUP_TTL_SECS: u64 = 24 * 3600;

// POST /api/v1/webhooks/stripe
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/stripe",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Webhooks"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // Best-effort replay suppression keyed on the provider event id. The
    // key is only written after authenticated processing, so an attacker
    // cannot poison it; finalize stays idempotent regardless.
    let event_hint = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string));
    if let Some(event_id) = &event_hint {
        if seen_before(&state, GatewayKind::Stripe, event_id).await {
            info!("Webhook event {} already processed", event_id);
            return Ok((
                StatusCode::OK,
                Json(ApiResponse::success("already_processed".to_string())),
            ));
        }
    }

    let ack = state
        .orchestrator
        .process_webhook(GatewayKind::Stripe, None, &body, &headers)
        .await?;

    if let Some(event_id) = &ack.event_id {
        mark_seen(&state, GatewayKind::Stripe, event_id).await;
    }
    Ok((StatusCode::OK, Json(ApiResponse::success(ack.result))))
}

// POST /api/v1/webhooks/orange_money/:session_id
//
// The notification body does not repeat the order reference, so the notify
// URL registered at initiation embeds the session id.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/orange_money/{session_id}",
    params(("session_id" = String, Path, description = "Payment session id")),
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Notification token mismatch", body = crate::errors::ErrorResponse),
        (status = 404, description = "Session not found or expired", body = crate::errors::ErrorResponse)
    ),
    tag = "Webhooks"
)]
pub async fn orange_money_webhook(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let event_hint = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("txnid").and_then(|id| id.as_str()).map(str::to_string));
    if let Some(event_id) = &event_hint {
        if seen_before(&state, GatewayKind::OrangeMoney, event_id).await {
            info!("Webhook event {} already processed", event_id);
            return Ok((
                StatusCode::OK,
                Json(ApiResponse::success("already_processed".to_string())),
            ));
        }
    }

    let ack = state
        .orchestrator
        .process_webhook(GatewayKind::OrangeMoney, Some(&session_id), &body, &headers)
        .await?;

    if let Some(event_id) = &ack.event_id {
        mark_seen(&state, GatewayKind::OrangeMoney, event_id).await;
    }
    Ok((StatusCode::OK, Json(ApiResponse::success(ack.result))))
}

fn dedup_key(kind: GatewayKind, event_id: &str) -> String {
    format!("wh:{}:{}", kind, event_id)
}

async fn seen_before(state: &AppState, kind: GatewayKind, event_id: &str) -> bool {
    let key = dedup_key(kind, event_id);
    match state.redis.get_async_connection().await {
        Ok(mut conn) => {
            let exists: Result<bool, _> = redis::cmd("EXISTS").arg(&key).query_async(&mut conn).await;
            matches!(exists, Ok(true))
        }
        Err(e) => {
            warn!("Redis unavailable for webhook dedup: {}", e);
            false
        }
    }
}

async fn mark_seen(state: &AppState, kind: GatewayKind, event_id: &str) {
    let key = dedup_key(kind, event_id);
    if let Ok(mut conn) = state.redis.get_async_connection().await {
        let result: Result<(), _> = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("EX")
            .arg(DEDUP_TTL_SECS)
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!("Failed to record webhook dedup key {}: {}", key, e);
        }
    }
}
