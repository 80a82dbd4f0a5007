use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::errors::ServiceError;
use crate::services::payments::InitiatePaymentInput;
use crate::{ApiResponse, AppState};

// POST /api/v1/checkout/initiate
#[utoipa::path(
    post,
    path = "/api/v1/checkout/initiate",
    request_body = InitiatePaymentInput,
    responses(
        (status = 200, description = "Payment initiated"),
        (status = 400, description = "Invalid input", body = crate::errors::ErrorResponse),
        (status = 409, description = "Duplicate registration or stock exhausted", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway rejected the request", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(input): Json<InitiatePaymentInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let checkout = state.orchestrator.initiate_payment(input).await?;
    Ok(Json(ApiResponse::success(checkout)))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ApplyPromoInput {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}

// POST /api/v1/checkout/:session_id/promo
#[utoipa::path(
    post,
    path = "/api/v1/checkout/{session_id}/promo",
    params(("session_id" = String, Path, description = "Payment session id")),
    request_body = ApplyPromoInput,
    responses(
        (status = 200, description = "Promo applied, totals recomputed"),
        (status = 400, description = "Code invalid or gateway cannot update the amount", body = crate::errors::ErrorResponse),
        (status = 404, description = "Session not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn apply_promo(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(input): Json<ApplyPromoInput>,
) -> Result<impl IntoResponse, ServiceError> {
    input.validate()?;
    let applied = state
        .orchestrator
        .apply_promo_code(&session_id, &input.code)
        .await?;
    Ok(Json(ApiResponse::success(applied)))
}

// GET /api/v1/checkout/:session_id/status
#[utoipa::path(
    get,
    path = "/api/v1/checkout/{session_id}/status",
    params(("session_id" = String, Path, description = "Payment session id")),
    responses((status = 200, description = "Current payment status")),
    tag = "Checkout"
)]
pub async fn payment_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let view = state.orchestrator.check_status_by_session(&session_id).await?;
    Ok(Json(ApiResponse::success(view)))
}

// POST /api/v1/checkout/:session_id/verify
//
// Success-page landing: asks the provider directly and finalizes if paid,
// racing safely with any in-flight webhook for the same session.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/{session_id}/verify",
    params(("session_id" = String, Path, description = "Payment session id")),
    responses(
        (status = 200, description = "Verification outcome"),
        (status = 404, description = "Session not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider unreachable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state.orchestrator.verify_and_finalize(&session_id).await?;
    Ok(Json(ApiResponse::success(outcome)))
}
