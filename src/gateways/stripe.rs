use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{error, warn};

use crate::config::StripeConfig;
use crate::errors::ServiceError;

use super::{
    constant_time_eq, GatewayAction, GatewayKind, GatewayTokens, InitiateRequest,
    InitiatedPayment, PaymentGateway, PaymentVerification, VerificationContext, VerifiedStatus,
    WebhookEvent,
};

type HmacSha256 = Hmac<Sha256>;

/// Client-secret flow: initiation creates a PaymentIntent, the browser
/// confirms it with Stripe Elements, and Stripe pushes the outcome to the
/// webhook endpoint signed with the endpoint secret.
pub struct StripeGateway {
    config: StripeConfig,
    http: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig, timeout: Duration) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client init failed: {}", e)))?;
        Ok(Self { config, http })
    }

    async fn send_intent_request(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> Result<PaymentIntent, ServiceError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                error!("Stripe request failed: url={}, error={}", url, e);
                ServiceError::GatewayError("payment provider unreachable".to_string())
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            error!("Stripe response read failed: {}", e);
            ServiceError::GatewayError("payment provider returned an unreadable response".to_string())
        })?;

        if !status.is_success() {
            error!("Stripe rejected request: status={}, body={}", status, body);
            return Err(ServiceError::GatewayError(
                "payment could not be processed by the provider".to_string(),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            error!("Stripe response parse failed: {}", e);
            ServiceError::GatewayError("unexpected provider response".to_string())
        })
    }

    fn verify_signature(&self, payload: &[u8], headers: &HeaderMap) -> bool {
        let header = match headers
            .get("Stripe-Signature")
            .and_then(|h| h.to_str().ok())
        {
            Some(h) => h,
            None => return false,
        };

        let mut ts = "";
        let mut v1 = "";
        for part in header.split(',') {
            let mut it = part.trim().split('=');
            match (it.next(), it.next()) {
                (Some("t"), Some(val)) => ts = val,
                (Some("v1"), Some(val)) => v1 = val,
                _ => {}
            }
        }
        if ts.is_empty() || v1.is_empty() {
            return false;
        }

        if let Ok(ts_i) = ts.parse::<i64>() {
            let now = chrono::Utc::now().timestamp();
            if (now - ts_i).unsigned_abs() > self.config.webhook_tolerance_secs {
                return false;
            }
        } else {
            return false;
        }

        let mut mac = match HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(ts.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());
        constant_time_eq(&expected, v1)
    }
}

fn map_intent_status(status: &str) -> VerifiedStatus {
    match status {
        "succeeded" => VerifiedStatus::Paid,
        "processing" | "requires_action" | "requires_confirmation" | "requires_payment_method"
        | "requires_capture" => VerifiedStatus::Pending,
        "canceled" => VerifiedStatus::Failed,
        _ => VerifiedStatus::Error,
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    status: String,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    amount_received: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: PaymentIntent,
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Stripe
    }

    async fn initiate_payment(
        &self,
        req: &InitiateRequest,
    ) -> Result<InitiatedPayment, ServiceError> {
        let mut form = vec![
            ("amount".to_string(), req.amount_minor.to_string()),
            ("currency".to_string(), req.currency.to_lowercase()),
            (
                "metadata[session_id]".to_string(),
                req.session_id.clone(),
            ),
            (
                "metadata[order_number]".to_string(),
                req.order_number.clone(),
            ),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        if let Some(email) = &req.receipt_email {
            form.push(("receipt_email".to_string(), email.clone()));
        }

        let url = format!("{}/v1/payment_intents", self.config.api_base);
        let intent = self.send_intent_request(&url, &form).await?;

        let client_secret = intent.client_secret.ok_or_else(|| {
            error!("Stripe intent {} missing client_secret", intent.id);
            ServiceError::GatewayError("provider did not return a payment handle".to_string())
        })?;

        Ok(InitiatedPayment {
            transaction_id: intent.id.clone(),
            action: GatewayAction::ClientSecret { client_secret },
            tokens: GatewayTokens {
                payment_intent_id: Some(intent.id),
                ..Default::default()
            },
        })
    }

    async fn verify_payment(
        &self,
        transaction_id: &str,
        _ctx: &VerificationContext,
    ) -> Result<PaymentVerification, ServiceError> {
        let url = format!(
            "{}/v1/payment_intents/{}",
            self.config.api_base, transaction_id
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| {
                error!("Stripe verify failed: txn={}, error={}", transaction_id, e);
                ServiceError::GatewayError("payment provider unreachable".to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(
                "Stripe verify rejected: txn={}, status={}, body={}",
                transaction_id, status, body
            );
            return Err(ServiceError::GatewayError(
                "payment could not be verified with the provider".to_string(),
            ));
        }

        let intent: PaymentIntent = response.json().await.map_err(|e| {
            error!("Stripe verify parse failed: {}", e);
            ServiceError::GatewayError("unexpected provider response".to_string())
        })?;

        Ok(PaymentVerification {
            status: map_intent_status(&intent.status),
            amount_minor: intent.amount_received.or(intent.amount),
            currency: intent.currency,
        })
    }

    async fn handle_webhook(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
        _stored_token: Option<&str>,
    ) -> Result<WebhookEvent, ServiceError> {
        if !self.verify_signature(payload, headers) {
            warn!("Stripe webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }

        let envelope: WebhookEnvelope = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::ValidationError(format!("invalid webhook payload: {}", e)))?;

        let status = match envelope.event_type.as_str() {
            "payment_intent.succeeded" => VerifiedStatus::Paid,
            "payment_intent.payment_failed" | "payment_intent.canceled" => VerifiedStatus::Failed,
            other => {
                warn!("Unhandled Stripe webhook type: {}", other);
                VerifiedStatus::Pending
            }
        };

        let intent = envelope.data.object;
        let session_id = intent
            .metadata
            .get("session_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(WebhookEvent {
            event_id: Some(envelope.id),
            transaction_id: intent.id,
            session_id,
            status,
            amount_minor: intent.amount_received.or(intent.amount),
            currency: intent.currency,
        })
    }

    async fn update_amount(
        &self,
        transaction_id: &str,
        new_amount_minor: i64,
        _currency: &str,
    ) -> Result<(), ServiceError> {
        let url = format!(
            "{}/v1/payment_intents/{}",
            self.config.api_base, transaction_id
        );
        let form = vec![("amount".to_string(), new_amount_minor.to_string())];
        self.send_intent_request(&url, &form).await?;
        Ok(())
    }
}
