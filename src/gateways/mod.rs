use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::errors::ServiceError;

pub mod orange_money;
pub mod stripe;

pub use orange_money::OrangeMoneyGateway;
pub use stripe::StripeGateway;

/// Closed set of supported payment providers. Adding a provider means adding
/// a variant here and wiring its adapter into the dispatcher, which the
/// compiler enforces through the exhaustive matches below.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[strum(ascii_case_insensitive, serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Stripe,
    OrangeMoney,
}

/// What the client must do next to complete payment.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayAction {
    /// Send the user to the provider's hosted payment page.
    Redirect { url: String },
    /// Confirm the payment client-side with this secret (Elements-style).
    ClientSecret { client_secret: String },
}

/// Provider-issued secrets captured at initiation. Stored inside the session
/// blueprint so later verification calls can present them again.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GatewayTokens {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notif_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub session_id: String,
    pub order_number: String,
    pub receipt_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub transaction_id: String,
    pub action: GatewayAction,
    pub tokens: GatewayTokens,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerifiedStatus {
    Paid,
    Pending,
    Failed,
    Expired,
    Error,
}

#[derive(Debug, Clone)]
pub struct PaymentVerification {
    pub status: VerifiedStatus,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
}

/// Extra secrets some providers require to query a transaction. Populated by
/// the caller from a durable order or the session; adapters that need a
/// token and don't get one must error rather than guess a status.
#[derive(Debug, Clone, Default)]
pub struct VerificationContext {
    pub pay_token: Option<String>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
}

/// Authenticated, normalized webhook notification.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    /// Provider event id, when the provider assigns one. Used for best-effort
    /// delivery dedup only; correctness never depends on it.
    pub event_id: Option<String>,
    pub transaction_id: String,
    pub session_id: Option<String>,
    pub status: VerifiedStatus,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
}

/// Uniform provider contract. One implementation per payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    async fn initiate_payment(&self, req: &InitiateRequest)
        -> Result<InitiatedPayment, ServiceError>;

    async fn verify_payment(
        &self,
        transaction_id: &str,
        ctx: &VerificationContext,
    ) -> Result<PaymentVerification, ServiceError>;

    /// Must authenticate the payload (signature or stored-token equality)
    /// before trusting any of its contents. Authentication failure is
    /// `ServiceError::Unauthorized`, never a `Failed` status.
    async fn handle_webhook(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
        stored_token: Option<&str>,
    ) -> Result<WebhookEvent, ServiceError>;

    /// Providers that cannot mutate an in-flight transaction fail fast with
    /// a descriptive error instead of silently no-oping.
    async fn update_amount(
        &self,
        transaction_id: &str,
        new_amount_minor: i64,
        currency: &str,
    ) -> Result<(), ServiceError>;
}

/// Routes a gateway name to its adapter. Pure routing, no business logic.
#[derive(Clone)]
pub struct GatewayDispatcher {
    stripe: Arc<dyn PaymentGateway>,
    orange_money: Arc<dyn PaymentGateway>,
}

impl GatewayDispatcher {
    pub fn new(stripe: Arc<dyn PaymentGateway>, orange_money: Arc<dyn PaymentGateway>) -> Self {
        Self {
            stripe,
            orange_money,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        let timeout = std::time::Duration::from_secs(config.gateway_timeout_secs);
        let stripe = StripeGateway::new(config.stripe.clone(), timeout)?;
        let orange_money = OrangeMoneyGateway::new(
            config.orange_money.clone(),
            config.public_base_url.clone(),
            timeout,
        )?;
        Ok(Self::new(Arc::new(stripe), Arc::new(orange_money)))
    }

    pub fn resolve(&self, kind: GatewayKind) -> Arc<dyn PaymentGateway> {
        match kind {
            GatewayKind::Stripe => Arc::clone(&self.stripe),
            GatewayKind::OrangeMoney => Arc::clone(&self.orange_money),
        }
    }

    pub fn resolve_name(&self, name: &str) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        let kind = parse_kind(name)?;
        Ok(self.resolve(kind))
    }
}

pub fn parse_kind(name: &str) -> Result<GatewayKind, ServiceError> {
    name.parse::<GatewayKind>()
        .map_err(|_| ServiceError::InvalidOperation(format!("gateway not supported: {}", name)))
}

/// Converts a minor-unit amount into the provider's major-unit convention.
/// Zero-decimal currencies pass through unchanged.
pub(crate) fn minor_to_major(amount_minor: i64, currency: &str) -> Decimal {
    Decimal::new(amount_minor, currency_exponent(currency))
}

pub(crate) fn currency_exponent(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "XOF" | "XAF" | "GNF" | "JPY" | "KRW" | "VND" => 0,
        _ => 2,
    }
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Some providers reject callback URLs they cannot reach. Catch loopback
/// hosts locally instead of surfacing an opaque provider error.
pub(crate) fn reject_loopback_url(raw: &str) -> Result<(), ServiceError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| ServiceError::ValidationError(format!("invalid callback URL {}: {}", raw, e)))?;
    let loopback = match parsed.host() {
        Some(url::Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => true,
    };
    if loopback {
        return Err(ServiceError::ValidationError(format!(
            "callback URL must be publicly reachable, got {}",
            raw
        )));
    }
    Ok(())
}
