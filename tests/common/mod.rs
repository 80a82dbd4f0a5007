use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use http::HeaderMap;
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use ticketflow_api::db::{self, DbConfig};
use ticketflow_api::entities::{event, product, promo_code, ticket, visitor};
use ticketflow_api::errors::ServiceError;
use ticketflow_api::events::{process_events, EventSender};
use ticketflow_api::gateways::{
    GatewayAction, GatewayDispatcher, GatewayKind, GatewayTokens, InitiateRequest,
    InitiatedPayment, PaymentGateway, PaymentVerification, VerificationContext, VerifiedStatus,
    WebhookEvent,
};
use ticketflow_api::services::promotions::PromotionService;
use ticketflow_api::services::{PaymentOrchestrator, SessionService, StockService};

/// Programmable gateway double. Status and failure modes are set per test;
/// call counters let tests assert how often the provider was consulted.
pub struct MockGatewayState {
    pub verify_status: Mutex<VerifiedStatus>,
    pub fail_verify_for: Mutex<Option<String>>,
    pub initiate_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub update_amount_supported: bool,
}

impl MockGatewayState {
    pub fn set_verify_status(&self, status: VerifiedStatus) {
        *self.verify_status.lock().unwrap() = status;
    }

    pub fn fail_verify_for(&self, transaction_id: &str) {
        *self.fail_verify_for.lock().unwrap() = Some(transaction_id.to_string());
    }
}

pub struct MockGateway {
    kind: GatewayKind,
    pub state: Arc<MockGatewayState>,
}

impl MockGateway {
    pub fn new(kind: GatewayKind, update_amount_supported: bool) -> Self {
        Self {
            kind,
            state: Arc::new(MockGatewayState {
                verify_status: Mutex::new(VerifiedStatus::Pending),
                fail_verify_for: Mutex::new(None),
                initiate_calls: AtomicUsize::new(0),
                verify_calls: AtomicUsize::new(0),
                update_amount_supported,
            }),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn kind(&self) -> GatewayKind {
        self.kind
    }

    async fn initiate_payment(
        &self,
        req: &InitiateRequest,
    ) -> Result<InitiatedPayment, ServiceError> {
        self.state.initiate_calls.fetch_add(1, Ordering::SeqCst);
        match self.kind {
            GatewayKind::Stripe => Ok(InitiatedPayment {
                transaction_id: format!("pi_{}", req.session_id),
                action: GatewayAction::ClientSecret {
                    client_secret: format!("pi_{}_secret", req.session_id),
                },
                tokens: GatewayTokens {
                    payment_intent_id: Some(format!("pi_{}", req.session_id)),
                    ..Default::default()
                },
            }),
            GatewayKind::OrangeMoney => Ok(InitiatedPayment {
                transaction_id: req.session_id.clone(),
                action: GatewayAction::Redirect {
                    url: format!("https://pay.example.com/{}", req.session_id),
                },
                tokens: GatewayTokens {
                    payment_intent_id: None,
                    pay_token: Some(format!("pt_{}", req.session_id)),
                    notif_token: Some(format!("nt_{}", req.session_id)),
                },
            }),
        }
    }

    async fn verify_payment(
        &self,
        transaction_id: &str,
        ctx: &VerificationContext,
    ) -> Result<PaymentVerification, ServiceError> {
        self.state.verify_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .state
            .fail_verify_for
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|failing| failing == transaction_id)
        {
            return Err(ServiceError::GatewayError(
                "provider unreachable".to_string(),
            ));
        }
        if self.kind == GatewayKind::OrangeMoney && ctx.pay_token.is_none() {
            return Err(ServiceError::InvalidOperation(
                "missing verification token".to_string(),
            ));
        }
        Ok(PaymentVerification {
            status: *self.state.verify_status.lock().unwrap(),
            amount_minor: ctx.amount_minor,
            currency: ctx.currency.clone(),
        })
    }

    async fn handle_webhook(
        &self,
        payload: &[u8],
        _headers: &HeaderMap,
        _stored_token: Option<&str>,
    ) -> Result<WebhookEvent, ServiceError> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        let status = match value.get("status").and_then(|s| s.as_str()) {
            Some("paid") => VerifiedStatus::Paid,
            Some("failed") => VerifiedStatus::Failed,
            Some("expired") => VerifiedStatus::Expired,
            _ => VerifiedStatus::Pending,
        };
        Ok(WebhookEvent {
            event_id: value
                .get("event_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            transaction_id: value
                .get("transaction_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            session_id: value
                .get("session_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            status,
            amount_minor: value.get("amount_minor").and_then(|v| v.as_i64()),
            currency: None,
        })
    }

    async fn update_amount(
        &self,
        _transaction_id: &str,
        _new_amount_minor: i64,
        _currency: &str,
    ) -> Result<(), ServiceError> {
        if self.state.update_amount_supported {
            Ok(())
        } else {
            Err(ServiceError::InvalidOperation(
                "amount updates not supported after initiation".to_string(),
            ))
        }
    }
}

/// Test harness backed by an in-memory SQLite database with mock gateways
/// wired into the dispatcher.
pub struct TestContext {
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub sessions: SessionService,
    pub events: EventSender,
    pub stripe: Arc<MockGatewayState>,
    pub orange: Arc<MockGatewayState>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestContext {
    pub async fn new() -> Self {
        // A single connection keeps every query on the same in-memory db.
        let pool = db::establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("db connect");
        db::run_migrations(&pool).await.expect("migrations");
        let db = Arc::new(pool);

        let (tx, rx) = mpsc::channel(256);
        let events = EventSender::new(tx);
        let event_task = tokio::spawn(process_events(rx));

        let stripe = MockGateway::new(GatewayKind::Stripe, true);
        let orange = MockGateway::new(GatewayKind::OrangeMoney, false);
        let stripe_state = stripe.state.clone();
        let orange_state = orange.state.clone();
        let dispatcher = GatewayDispatcher::new(Arc::new(stripe), Arc::new(orange));

        let sessions = SessionService::new(db.clone(), 7);
        let stock = StockService::new(db.clone());
        let promotions = PromotionService::new(db.clone());
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            db.clone(),
            sessions.clone(),
            stock,
            promotions,
            dispatcher,
            events.clone(),
            500,
        ));

        Self {
            db,
            orchestrator,
            sessions,
            events,
            stripe: stripe_state,
            orange: orange_state,
            _event_task: event_task,
        }
    }

    pub async fn seed_event(&self, tax_rate_bps: i32) -> event::Model {
        event::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("RustFest".to_string()),
            currency: Set("usd".to_string()),
            tax_rate_bps: Set(tax_rate_bps),
            registration_count: Set(0),
            is_live: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed event")
    }

    pub async fn seed_ticket(
        &self,
        event_id: Uuid,
        price_minor: i64,
        stock: i32,
        reserved: i32,
    ) -> ticket::Model {
        ticket::ActiveModel {
            id: Set(Uuid::new_v4()),
            event_id: Set(event_id),
            name: Set("General".to_string()),
            price_minor: Set(price_minor),
            current_stock: Set(stock),
            reserved_onsite_quota: Set(reserved),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed ticket")
    }

    pub async fn seed_product(
        &self,
        event_id: Uuid,
        price_minor: i64,
        stock: i32,
        requires_shipping: bool,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            event_id: Set(event_id),
            name: Set("T-Shirt".to_string()),
            price_minor: Set(price_minor),
            current_stock: Set(stock),
            requires_shipping: Set(requires_shipping),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_promo(
        &self,
        code: &str,
        kind: &str,
        value: i64,
        usage_limit: Option<i32>,
    ) -> promo_code::Model {
        promo_code::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            event_id: Set(None),
            kind: Set(kind.to_string()),
            value: Set(value),
            usage_count: Set(0),
            usage_limit: Set(usage_limit),
            starts_at: Set(None),
            ends_at: Set(None),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed promo")
    }

    pub async fn seed_visitor(&self, event_id: Uuid, email: &str) -> visitor::Model {
        visitor::ActiveModel {
            id: Set(Uuid::new_v4()),
            event_id: Set(event_id),
            email: Set(email.to_string()),
            converted: Set(false),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed visitor")
    }
}
