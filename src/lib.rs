pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateways;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: events::EventSender,
    pub orchestrator: Arc<services::PaymentOrchestrator>,
    pub sessions: services::SessionService,
    pub redis: Arc<redis::Client>,
}

// Common response wrapper
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

pub fn api_v1_routes() -> Router<AppState> {
    let checkout = Router::new()
        .route("/checkout/initiate", post(handlers::checkout::initiate_payment))
        .route(
            "/checkout/:session_id/promo",
            post(handlers::checkout::apply_promo),
        )
        .route(
            "/checkout/:session_id/status",
            get(handlers::checkout::payment_status),
        )
        .route(
            "/checkout/:session_id/verify",
            post(handlers::checkout::verify_payment),
        );

    let webhooks = Router::new()
        .route("/webhooks/stripe", post(handlers::webhooks::stripe_webhook))
        .route(
            "/webhooks/orange_money/:session_id",
            post(handlers::webhooks::orange_money_webhook),
        );

    checkout.merge(webhooks)
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_routes())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_response_success_shape() {
        let response = ApiResponse::success(42);
        assert!(response.success);
        assert_eq!(response.data, Some(42));
        assert!(response.message.is_none());
    }

    #[test]
    fn api_response_error_shape() {
        let response: ApiResponse<()> = ApiResponse::error("boom".into());
        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(response.message.as_deref(), Some("boom"));
    }
}
