use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthUrl, ClientId, ClientSecret, TokenResponse, TokenUrl};
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::config::OrangeMoneyConfig;
use crate::errors::ServiceError;

use super::{
    constant_time_eq, minor_to_major, reject_loopback_url, GatewayAction, GatewayKind,
    GatewayTokens, InitiateRequest, InitiatedPayment, PaymentGateway, PaymentVerification,
    VerificationContext, VerifiedStatus, WebhookEvent,
};

/// Refresh the cached access token this long before it actually expires.
const TOKEN_REFRESH_BUFFER_SECS: i64 = 300;
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Redirect flow: initiation returns a hosted payment URL plus a pay token
/// (for status queries) and a notif token (webhook authentication). The
/// provider cannot mutate an in-flight transaction, so amount updates fail
/// fast. The session id doubles as the provider-facing order reference.
pub struct OrangeMoneyGateway {
    config: OrangeMoneyConfig,
    public_base_url: String,
    http: reqwest::Client,
    oauth: BasicClient,
    token_cache: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - chrono::Duration::seconds(TOKEN_REFRESH_BUFFER_SECS) > now
    }
}

impl OrangeMoneyGateway {
    pub fn new(
        config: OrangeMoneyConfig,
        public_base_url: String,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client init failed: {}", e)))?;

        let token_url = TokenUrl::new(config.token_url.clone())
            .map_err(|e| ServiceError::InternalError(format!("invalid token URL: {}", e)))?;
        // Client-credentials only; the authorize endpoint is never visited.
        let auth_url = AuthUrl::new(config.token_url.clone())
            .map_err(|e| ServiceError::InternalError(format!("invalid token URL: {}", e)))?;
        let oauth = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            auth_url,
            Some(token_url),
        );

        Ok(Self {
            config,
            public_base_url,
            http,
            oauth,
            token_cache: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let mut cache = self.token_cache.lock().await;
        let now = Utc::now();
        if let Some(cached) = cache.as_ref() {
            if cached.is_fresh(now) {
                return Ok(cached.access_token.clone());
            }
        }

        let token = self
            .oauth
            .exchange_client_credentials()
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                error!("Orange Money token exchange failed: {}", e);
                ServiceError::GatewayError("payment provider authentication failed".to_string())
            })?;

        let ttl = token
            .expires_in()
            .unwrap_or(Duration::from_secs(DEFAULT_TOKEN_TTL_SECS));
        let fresh = CachedToken {
            access_token: token.access_token().secret().clone(),
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1)),
        };
        let secret = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(secret)
    }

    async fn invalidate_token(&self) {
        *self.token_cache.lock().await = None;
    }

    /// POSTs to the provider API, retrying exactly once with a fresh token
    /// when the provider reports expired credentials.
    async fn post_authenticated(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ServiceError> {
        let mut retried = false;
        loop {
            let token = self.access_token().await?;
            let response = self
                .http
                .post(url)
                .bearer_auth(&token)
                .json(body)
                .send()
                .await
                .map_err(|e| {
                    error!("Orange Money request failed: url={}, error={}", url, e);
                    ServiceError::GatewayError("payment provider unreachable".to_string())
                })?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED && !retried {
                warn!("Orange Money reported expired credentials, refreshing token");
                self.invalidate_token().await;
                retried = true;
                continue;
            }

            let text = response.text().await.map_err(|e| {
                error!("Orange Money response read failed: {}", e);
                ServiceError::GatewayError(
                    "payment provider returned an unreadable response".to_string(),
                )
            })?;

            if !status.is_success() {
                error!(
                    "Orange Money rejected request: url={}, status={}, body={}",
                    url, status, text
                );
                return Err(ServiceError::GatewayError(
                    "payment could not be processed by the provider".to_string(),
                ));
            }

            return serde_json::from_str(&text).map_err(|e| {
                error!("Orange Money response parse failed: {}", e);
                ServiceError::GatewayError("unexpected provider response".to_string())
            });
        }
    }

    fn callback_urls(&self, session_id: &str) -> Result<(String, String, String), ServiceError> {
        let base = self.public_base_url.trim_end_matches('/');
        let return_url = format!("{}/payment/success?session={}", base, session_id);
        let cancel_url = format!("{}/payment/cancelled?session={}", base, session_id);
        let notif_url = format!("{}/api/v1/webhooks/orange_money/{}", base, session_id);
        for url in [&return_url, &cancel_url, &notif_url] {
            reject_loopback_url(url)?;
        }
        Ok((return_url, cancel_url, notif_url))
    }

    fn wire_amount(&self, amount_minor: i64, currency: &str) -> Result<f64, ServiceError> {
        minor_to_major(amount_minor, currency).to_f64().ok_or_else(|| {
            ServiceError::InternalError(format!("amount {} not representable", amount_minor))
        })
    }
}

fn map_provider_status(status: &str) -> VerifiedStatus {
    match status.to_ascii_uppercase().as_str() {
        "SUCCESS" | "SUCCESSFULL" => VerifiedStatus::Paid,
        "INITIATED" | "PENDING" => VerifiedStatus::Pending,
        "FAILED" => VerifiedStatus::Failed,
        "EXPIRED" => VerifiedStatus::Expired,
        _ => VerifiedStatus::Error,
    }
}

#[derive(Debug, Deserialize)]
struct WebPaymentResponse {
    payment_url: String,
    pay_token: String,
    notif_token: String,
}

#[derive(Debug, Deserialize)]
struct TransactionStatusResponse {
    status: String,
    #[serde(default)]
    txnid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    status: String,
    notif_token: String,
    #[serde(default)]
    txnid: Option<String>,
}

#[async_trait]
impl PaymentGateway for OrangeMoneyGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::OrangeMoney
    }

    async fn initiate_payment(
        &self,
        req: &InitiateRequest,
    ) -> Result<InitiatedPayment, ServiceError> {
        let (return_url, cancel_url, notif_url) = self.callback_urls(&req.session_id)?;
        let amount = self.wire_amount(req.amount_minor, &req.currency)?;

        let body = json!({
            "merchant_key": self.config.merchant_key,
            "currency": req.currency,
            "order_id": req.session_id,
            "amount": amount,
            "return_url": return_url,
            "cancel_url": cancel_url,
            "notif_url": notif_url,
            "lang": "en",
            "reference": req.order_number,
        });

        let url = format!("{}/webpayment", self.config.api_base);
        let raw = self.post_authenticated(&url, &body).await?;
        let response: WebPaymentResponse = serde_json::from_value(raw).map_err(|e| {
            error!("Orange Money webpayment parse failed: {}", e);
            ServiceError::GatewayError("unexpected provider response".to_string())
        })?;

        Ok(InitiatedPayment {
            // The order reference is the stable identifier for this payment;
            // every later lookup (verify, webhook, reconciliation) keys on it.
            transaction_id: req.session_id.clone(),
            action: GatewayAction::Redirect {
                url: response.payment_url,
            },
            tokens: GatewayTokens {
                payment_intent_id: None,
                pay_token: Some(response.pay_token),
                notif_token: Some(response.notif_token),
            },
        })
    }

    async fn verify_payment(
        &self,
        transaction_id: &str,
        ctx: &VerificationContext,
    ) -> Result<PaymentVerification, ServiceError> {
        let pay_token = ctx.pay_token.as_deref().ok_or_else(|| {
            ServiceError::InvalidOperation("missing verification token".to_string())
        })?;
        let amount_minor = ctx.amount_minor.ok_or_else(|| {
            ServiceError::InvalidOperation("missing amount for status query".to_string())
        })?;
        let currency = ctx.currency.as_deref().unwrap_or("XOF");
        let amount = self.wire_amount(amount_minor, currency)?;

        let body = json!({
            "order_id": transaction_id,
            "amount": amount,
            "pay_token": pay_token,
        });
        let url = format!("{}/transactionstatus", self.config.api_base);
        let raw = self.post_authenticated(&url, &body).await?;
        let response: TransactionStatusResponse = serde_json::from_value(raw).map_err(|e| {
            error!("Orange Money status parse failed: {}", e);
            ServiceError::GatewayError("unexpected provider response".to_string())
        })?;

        if let Some(txnid) = &response.txnid {
            tracing::debug!(
                "Orange Money status: order_id={}, txnid={}, status={}",
                transaction_id,
                txnid,
                response.status
            );
        }

        Ok(PaymentVerification {
            status: map_provider_status(&response.status),
            amount_minor: Some(amount_minor),
            currency: Some(currency.to_string()),
        })
    }

    async fn handle_webhook(
        &self,
        payload: &[u8],
        _headers: &HeaderMap,
        stored_token: Option<&str>,
    ) -> Result<WebhookEvent, ServiceError> {
        let notification: NotificationPayload = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::ValidationError(format!("invalid webhook payload: {}", e)))?;

        let stored = stored_token.ok_or_else(|| {
            ServiceError::Unauthorized("no notification token on record".to_string())
        })?;
        if !constant_time_eq(&notification.notif_token, stored) {
            warn!("Orange Money webhook token mismatch");
            return Err(ServiceError::Unauthorized(
                "invalid notification token".to_string(),
            ));
        }

        Ok(WebhookEvent {
            event_id: notification.txnid.clone(),
            // The caller substitutes the order reference; the provider's
            // notification body does not repeat it.
            transaction_id: notification.txnid.unwrap_or_default(),
            session_id: None,
            status: map_provider_status(&notification.status),
            amount_minor: None,
            currency: None,
        })
    }

    async fn update_amount(
        &self,
        _transaction_id: &str,
        _new_amount_minor: i64,
        _currency: &str,
    ) -> Result<(), ServiceError> {
        Err(ServiceError::InvalidOperation(
            "orange_money does not support amount updates after initiation".to_string(),
        ))
    }
}
