use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "TicketFlow API",
        version = "0.3.0",
        description = r#"
# TicketFlow Payment API

Event ticketing checkout and payment finalization.

## Flow

1. `POST /checkout/initiate` stages attendee and order data in a TTL-bound
   payment session and hands the payment off to the selected gateway.
2. The gateway pushes its outcome to the matching webhook endpoint, or the
   client polls `GET /checkout/{session_id}/status` and lands on
   `POST /checkout/{session_id}/verify` from the success page.
3. Whichever signal arrives first wins; every path converges on one
   idempotent finalization that produces exactly one order.

## Error Handling

Errors use a consistent envelope with appropriate HTTP status codes:

```json
{
  "error": "Not found",
  "message": "payment session cs_42 not found"
}
```
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Checkout", description = "Payment initiation, promo codes, status and verification"),
        (name = "Webhooks", description = "Provider push notifications"),
        (name = "Health", description = "Service health")
    ),
    paths(
        crate::handlers::checkout::initiate_payment,
        crate::handlers::checkout::apply_promo,
        crate::handlers::checkout::payment_status,
        crate::handlers::checkout::verify_payment,
        crate::handlers::webhooks::stripe_webhook,
        crate::handlers::webhooks::orange_money_webhook,
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::services::payments::InitiatePaymentInput,
            crate::services::payments::AttendeeInput,
            crate::services::payments::LineInput,
            crate::services::payments::RegistrationInput,
            crate::services::payments::InitiatedCheckout,
            crate::services::payments::FinalizeOutcome,
            crate::services::payments::PromoApplied,
            crate::services::payments::PaymentStatusView,
            crate::services::payments::VerifyOutcome,
            crate::handlers::checkout::ApplyPromoInput,
            crate::handlers::health::HealthResponse,
            crate::handlers::health::ComponentStatus,
            crate::gateways::GatewayAction,
            crate::gateways::VerifiedStatus,
            crate::errors::ErrorResponse,
        )
    )
)]
pub struct ApiDoc;

pub fn swagger_routes() -> Router<AppState> {
    Router::new().merge(
        SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_builds() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/checkout/initiate"));
        assert!(doc
            .paths
            .paths
            .contains_key("/api/v1/webhooks/orange_money/{session_id}"));
    }
}
