use std::sync::Arc;

use chrono::Utc;
use http::HeaderMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, SqlErr,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::{attendee, event, order, order_item, registration, ticket, visitor};
use crate::entities::product;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateways::{
    parse_kind, GatewayAction, GatewayDispatcher, GatewayKind, InitiateRequest,
    VerificationContext, VerifiedStatus,
};
use crate::services::promotions::{self, PromotionService};
use crate::services::sessions::{
    AttendeeBlueprint, OrderBlueprint, RegistrationInfo, SelectedItem, SessionData,
    SessionPaymentStatus, SessionService,
};
use crate::services::stock::{StockChannel, StockService};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct AttendeeInput {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct LineInput {
    pub item_id: Uuid,
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegistrationInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct InitiatePaymentInput {
    pub gateway: String,
    pub event_id: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub attendees: Vec<AttendeeInput>,
    #[validate(length(min = 1))]
    pub selected_tickets: Vec<LineInput>,
    #[serde(default)]
    pub selected_products: Vec<LineInput>,
    pub registration: RegistrationInput,
    /// Caller-supplied session id for retries of the same checkout.
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitiatedCheckout {
    pub session_id: String,
    pub order_number: String,
    pub transaction_id: String,
    pub total_minor: i64,
    pub currency: String,
    pub action: GatewayAction,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FinalizeOutcome {
    pub order_id: Uuid,
    pub order_number: String,
    pub already_finalized: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PromoApplied {
    pub discount_minor: i64,
    pub tax_minor: i64,
    pub total_minor: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusView {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_minor: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyOutcome {
    pub status: VerifiedStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalize: Option<FinalizeOutcome>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// The payment state machine. Webhook delivery, user-triggered verification
/// and the reconciliation sweeper all converge on [`finalize_payment`],
/// whose idempotency gate plus the unique index on
/// `(gateway, gateway_transaction_id)` guarantee exactly one durable order
/// per confirmed payment no matter how many callers race.
///
/// [`finalize_payment`]: PaymentOrchestrator::finalize_payment
#[derive(Clone)]
pub struct PaymentOrchestrator {
    db: Arc<DatabaseConnection>,
    sessions: SessionService,
    stock: StockService,
    promotions: PromotionService,
    dispatcher: GatewayDispatcher,
    events: EventSender,
    shipping_fee_minor: i64,
}

impl PaymentOrchestrator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        sessions: SessionService,
        stock: StockService,
        promotions: PromotionService,
        dispatcher: GatewayDispatcher,
        events: EventSender,
        shipping_fee_minor: i64,
    ) -> Self {
        Self {
            db,
            sessions,
            stock,
            promotions,
            dispatcher,
            events,
            shipping_fee_minor,
        }
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    #[instrument(skip(self, input), fields(event_id = %input.event_id, gateway = %input.gateway))]
    pub async fn initiate_payment(
        &self,
        input: InitiatePaymentInput,
    ) -> Result<InitiatedCheckout, ServiceError> {
        input.validate()?;
        for a in &input.attendees {
            a.validate()?;
        }
        for line in input.selected_tickets.iter().chain(&input.selected_products) {
            line.validate()?;
        }
        input.registration.validate()?;

        let kind = parse_kind(&input.gateway)?;
        let adapter = self.dispatcher.resolve(kind);

        let event = event::Entity::find_by_id(input.event_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("event {} not found", input.event_id))
            })?;
        if !event.is_live {
            return Err(ServiceError::InvalidOperation(
                "event is not open for registration".to_string(),
            ));
        }

        self.reject_duplicate_registrations(&event, &input.attendees)
            .await?;

        let (ticket_lines, tickets_subtotal) = self
            .snapshot_ticket_lines(&event, &input.selected_tickets)
            .await?;
        let (product_lines, products_subtotal, needs_shipping) = self
            .snapshot_product_lines(&event, &input.selected_products)
            .await?;

        let subtotal_minor = tickets_subtotal + products_subtotal;
        let tax_minor = promotions::compute_tax(subtotal_minor, event.tax_rate_bps);
        let shipping_minor = if needs_shipping {
            self.shipping_fee_minor
        } else {
            0
        };
        let total_minor = subtotal_minor + tax_minor + shipping_minor;

        let session_id = input
            .session_id
            .unwrap_or_else(|| format!("cs_{}", Uuid::new_v4().simple()));
        let order_number = generate_order_number();

        let attendees: Vec<AttendeeBlueprint> = input
            .attendees
            .iter()
            .map(|a| AttendeeBlueprint {
                first_name: a.first_name.clone(),
                last_name: a.last_name.clone(),
                email: a.email.clone(),
                qr_code: Uuid::new_v4().to_string(),
            })
            .collect();

        let initiated = adapter
            .initiate_payment(&InitiateRequest {
                amount_minor: total_minor,
                currency: event.currency.clone(),
                session_id: session_id.clone(),
                order_number: order_number.clone(),
                receipt_email: Some(input.registration.email.clone()),
            })
            .await?;

        let data = SessionData {
            event_id: event.id,
            attendees,
            registration: RegistrationInfo {
                email: input.registration.email.clone(),
                name: input.registration.name.clone(),
            },
            selected_tickets: ticket_lines,
            selected_products: product_lines,
            order: OrderBlueprint {
                order_number: order_number.clone(),
                gateway: kind,
                transaction_id: initiated.transaction_id.clone(),
                status: SessionPaymentStatus::Pending,
                currency: event.currency.clone(),
                subtotal_minor,
                discount_minor: 0,
                tax_minor,
                shipping_minor,
                total_minor,
                tokens: initiated.tokens.clone(),
                promo_code: None,
            },
        };
        self.sessions.store(&session_id, &data).await?;

        let _ = self
            .events
            .send(Event::PaymentInitiated {
                session_id: session_id.clone(),
                gateway: kind.to_string(),
            })
            .await;

        info!(
            "Payment initiated: session_id={}, order_number={}, total_minor={}",
            session_id, order_number, total_minor
        );

        Ok(InitiatedCheckout {
            session_id,
            order_number,
            transaction_id: initiated.transaction_id,
            total_minor,
            currency: event.currency,
            action: initiated.action,
        })
    }

    async fn reject_duplicate_registrations(
        &self,
        event: &event::Model,
        attendees: &[AttendeeInput],
    ) -> Result<(), ServiceError> {
        let emails: Vec<String> = attendees.iter().map(|a| a.email.clone()).collect();
        let existing = attendee::Entity::find()
            .filter(attendee::Column::EventId.eq(event.id))
            .filter(attendee::Column::Email.is_in(emails))
            .one(&*self.db)
            .await?;
        if let Some(existing) = existing {
            return Err(ServiceError::Conflict(format!(
                "{} is already registered for this event",
                existing.email
            )));
        }
        Ok(())
    }

    /// Snapshots requested ticket lines with server-side prices. Client
    /// submitted amounts are never trusted.
    async fn snapshot_ticket_lines(
        &self,
        event: &event::Model,
        lines: &[LineInput],
    ) -> Result<(Vec<SelectedItem>, i64), ServiceError> {
        let mut snapshots = Vec::with_capacity(lines.len());
        let mut subtotal = 0i64;
        for line in lines {
            let model = ticket::Entity::find_by_id(line.item_id)
                .one(&*self.db)
                .await?
                .filter(|t| t.event_id == event.id)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("ticket {} not found", line.item_id))
                })?;
            if !StockService::ticket_available(&model, line.quantity, StockChannel::Online) {
                return Err(ServiceError::InsufficientStock(format!(
                    "not enough stock for ticket {}",
                    model.name
                )));
            }
            subtotal += model.price_minor * line.quantity as i64;
            snapshots.push(SelectedItem {
                item_id: model.id,
                name: model.name,
                unit_price_minor: model.price_minor,
                quantity: line.quantity,
            });
        }
        Ok((snapshots, subtotal))
    }

    async fn snapshot_product_lines(
        &self,
        event: &event::Model,
        lines: &[LineInput],
    ) -> Result<(Vec<SelectedItem>, i64, bool), ServiceError> {
        let mut snapshots = Vec::with_capacity(lines.len());
        let mut subtotal = 0i64;
        let mut needs_shipping = false;
        for line in lines {
            let model = product::Entity::find_by_id(line.item_id)
                .one(&*self.db)
                .await?
                .filter(|p| p.event_id == event.id)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("product {} not found", line.item_id))
                })?;
            if !StockService::product_available(&model, line.quantity) {
                return Err(ServiceError::InsufficientStock(format!(
                    "not enough stock for product {}",
                    model.name
                )));
            }
            needs_shipping |= model.requires_shipping;
            subtotal += model.price_minor * line.quantity as i64;
            snapshots.push(SelectedItem {
                item_id: model.id,
                name: model.name,
                unit_price_minor: model.price_minor,
                quantity: line.quantity,
            });
        }
        Ok((snapshots, subtotal, needs_shipping))
    }

    /// Converts a confirmed payment into durable records exactly once.
    ///
    /// Safe under arbitrary repetition and concurrency: a pre-check catches
    /// the common repeat cheaply, and the unique index on
    /// `(gateway, gateway_transaction_id)` settles true races, with the
    /// loser re-fetching the winner's order.
    #[instrument(skip(self))]
    pub async fn finalize_payment(
        &self,
        gateway: GatewayKind,
        transaction_id: &str,
        session_id: &str,
        reported_amount_minor: Option<i64>,
    ) -> Result<FinalizeOutcome, ServiceError> {
        if let Some(existing) = self.find_order_by_transaction(gateway, transaction_id).await? {
            info!(
                "Payment already finalized: gateway={}, transaction_id={}",
                gateway, transaction_id
            );
            return Ok(already(existing));
        }

        let tagged = attendee::Entity::find()
            .filter(attendee::Column::PaymentSessionId.eq(session_id))
            .one(&*self.db)
            .await?;
        if tagged.is_some() {
            return match self.find_order_by_session(session_id).await? {
                Some(existing) => Ok(already(existing)),
                None => Err(ServiceError::Conflict(format!(
                    "finalization already in progress for session {}",
                    session_id
                ))),
            };
        }

        let session = self.sessions.get(session_id).await?;

        if let Some(reported) = reported_amount_minor {
            if reported != session.order.total_minor {
                warn!(
                    "Amount mismatch on finalize: session_id={}, expected={}, reported={}",
                    session_id, session.order.total_minor, reported
                );
            }
        }

        let persisted = self
            .persist_finalized(&session, gateway, transaction_id, session_id)
            .await;

        let (order_model, registration_id) = match persisted {
            Ok(pair) => pair,
            Err(ServiceError::DatabaseError(db_err))
                if matches!(db_err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) =>
            {
                // Lost the race; the winner's order is authoritative.
                info!(
                    "Concurrent finalize collapsed by unique index: transaction_id={}",
                    transaction_id
                );
                let existing = self
                    .find_order_by_transaction(gateway, transaction_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Conflict(format!(
                            "finalize race lost but no order found for transaction {}",
                            transaction_id
                        ))
                    })?;
                return Ok(already(existing));
            }
            Err(e) => return Err(e),
        };

        self.post_finalize(&session, &order_model, registration_id)
            .await;

        Ok(FinalizeOutcome {
            order_id: order_model.id,
            order_number: order_model.order_number,
            already_finalized: false,
        })
    }

    /// Registration, attendees and the order are one logical unit; a failure
    /// mid-sequence rolls everything back.
    async fn persist_finalized(
        &self,
        session: &SessionData,
        gateway: GatewayKind,
        transaction_id: &str,
        session_id: &str,
    ) -> Result<(order::Model, Uuid), ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let registration_id = Uuid::new_v4();
        registration::ActiveModel {
            id: Set(registration_id),
            event_id: Set(session.event_id),
            email: Set(session.registration.email.clone()),
            name: Set(session.registration.name.clone()),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for blueprint in &session.attendees {
            attendee::ActiveModel {
                id: Set(Uuid::new_v4()),
                registration_id: Set(registration_id),
                event_id: Set(session.event_id),
                first_name: Set(blueprint.first_name.clone()),
                last_name: Set(blueprint.last_name.clone()),
                email: Set(blueprint.email.clone()),
                qr_code: Set(blueprint.qr_code.clone()),
                payment_session_id: Set(Some(session_id.to_string())),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        let order_id = Uuid::new_v4();
        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(session.order.order_number.clone()),
            registration_id: Set(registration_id),
            event_id: Set(session.event_id),
            session_id: Set(session_id.to_string()),
            gateway: Set(gateway.to_string()),
            gateway_transaction_id: Set(transaction_id.to_string()),
            payment_status: Set("paid".to_string()),
            currency: Set(session.order.currency.clone()),
            subtotal_minor: Set(session.order.subtotal_minor),
            discount_minor: Set(session.order.discount_minor),
            tax_minor: Set(session.order.tax_minor),
            shipping_minor: Set(session.order.shipping_minor),
            total_minor: Set(session.order.total_minor),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await?;

        for (kind, line) in session
            .selected_tickets
            .iter()
            .map(|l| ("ticket", l))
            .chain(session.selected_products.iter().map(|l| ("product", l)))
        {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                item_kind: Set(kind.to_string()),
                item_id: Set(line.item_id),
                name: Set(line.name.clone()),
                unit_price_minor: Set(line.unit_price_minor),
                quantity: Set(line.quantity),
                total_minor: Set(line.unit_price_minor * line.quantity as i64),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;
        Ok((order_model, registration_id))
    }

    /// Side effects after the order is durable. None of these may fail the
    /// finalize: the payment is confirmed, so inventory or counter drift is
    /// logged for manual reconciliation instead of reversed.
    async fn post_finalize(
        &self,
        session: &SessionData,
        order_model: &order::Model,
        registration_id: Uuid,
    ) {
        for line in &session.selected_tickets {
            if let Err(e) = self
                .stock
                .decrement_ticket(line.item_id, line.quantity, StockChannel::Online)
                .await
            {
                error!(
                    "Stock decrement failed after paid order {}: ticket={}, error={}",
                    order_model.order_number, line.item_id, e
                );
            }
        }
        for line in &session.selected_products {
            if let Err(e) = self.stock.decrement_product(line.item_id, line.quantity).await {
                error!(
                    "Stock decrement failed after paid order {}: product={}, error={}",
                    order_model.order_number, line.item_id, e
                );
            }
        }

        if let Err(e) = event::Entity::update_many()
            .col_expr(
                event::Column::RegistrationCount,
                Expr::col(event::Column::RegistrationCount).add(1),
            )
            .filter(event::Column::Id.eq(session.event_id))
            .exec(&*self.db)
            .await
        {
            error!("Registration counter increment failed: {}", e);
        }

        if let Err(e) = visitor::Entity::update_many()
            .col_expr(visitor::Column::Converted, Expr::value(true))
            .filter(visitor::Column::EventId.eq(session.event_id))
            .filter(visitor::Column::Email.eq(session.registration.email.clone()))
            .exec(&*self.db)
            .await
        {
            error!("Visitor conversion mark failed: {}", e);
        }

        // The session stays readable for the success page; only its status
        // flips so polling and the sweeper see a settled payment.
        let session_id = order_model.session_id.clone();
        if let Err(e) = self
            .sessions
            .update(&session_id, |data| {
                data.order.status = SessionPaymentStatus::Paid;
            })
            .await
        {
            warn!("Post-finalize session status update failed: {}", e);
        }

        let _ = self
            .events
            .send(Event::OrderFinalized {
                order_id: order_model.id,
                session_id: order_model.session_id.clone(),
                gateway: order_model.gateway.clone(),
                total_minor: order_model.total_minor,
            })
            .await;
        let _ = self
            .events
            .send(Event::ConfirmationEmailRequested {
                order_id: order_model.id,
                registration_id,
                email: session.registration.email.clone(),
            })
            .await;
    }

    /// Applies a promo code to a pending session. Tax is recomputed from the
    /// discounted subtotal, never the original.
    #[instrument(skip(self))]
    pub async fn apply_promo_code(
        &self,
        session_id: &str,
        code: &str,
    ) -> Result<PromoApplied, ServiceError> {
        let session = self.sessions.get(session_id).await?;
        if session.order.status != SessionPaymentStatus::Pending {
            return Err(ServiceError::InvalidOperation(
                "payment is no longer pending".to_string(),
            ));
        }
        if session.order.promo_code.is_some() {
            return Err(ServiceError::InvalidOperation(
                "a promo code has already been applied".to_string(),
            ));
        }

        let promo = self
            .promotions
            .validate(code, session.event_id, Utc::now())
            .await?;
        let tax_rate_bps = event::Entity::find_by_id(session.event_id)
            .one(&*self.db)
            .await?
            .map(|e| e.tax_rate_bps)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("event {} not found", session.event_id))
            })?;

        let discount_minor = PromotionService::discount_for(&promo, session.order.subtotal_minor)?;
        let net_subtotal = session.order.subtotal_minor - discount_minor;
        let tax_minor = promotions::compute_tax(net_subtotal, tax_rate_bps);
        let total_minor = net_subtotal + tax_minor + session.order.shipping_minor;

        // Claim the use before touching the provider or the session. A
        // concurrent application racing for the code's last use must lose
        // here, with its session totals untouched.
        self.promotions.increment_usage(promo.id).await?;

        // The provider must accept the new amount before it is persisted,
        // otherwise the session and the gateway would disagree on the total.
        let adapter = self.dispatcher.resolve(session.order.gateway);
        if let Err(e) = adapter
            .update_amount(
                &session.order.transaction_id,
                total_minor,
                &session.order.currency,
            )
            .await
        {
            if let Err(release_err) = self.promotions.release_usage(promo.id).await {
                error!(
                    "Failed to release promo {} after gateway rejection: {}",
                    promo.id, release_err
                );
            }
            return Err(e);
        }

        let code_owned = code.to_string();
        if let Err(e) = self
            .sessions
            .update(session_id, |data| {
                data.order.discount_minor = discount_minor;
                data.order.tax_minor = tax_minor;
                data.order.total_minor = total_minor;
                data.order.promo_code = Some(code_owned);
            })
            .await
        {
            if let Err(release_err) = self.promotions.release_usage(promo.id).await {
                error!(
                    "Failed to release promo {} after session write failure: {}",
                    promo.id, release_err
                );
            }
            if let Err(restore_err) = adapter
                .update_amount(
                    &session.order.transaction_id,
                    session.order.total_minor,
                    &session.order.currency,
                )
                .await
            {
                warn!(
                    "Could not restore amount on {} for session {}: {}",
                    session.order.gateway, session_id, restore_err
                );
            }
            return Err(e);
        }

        Ok(PromoApplied {
            discount_minor,
            tax_minor,
            total_minor,
        })
    }

    /// Cheap, poll-friendly status read. Never calls the gateway: a durable
    /// order wins, then the session's last known status, then not_found.
    #[instrument(skip(self))]
    pub async fn check_status_by_session(
        &self,
        session_id: &str,
    ) -> Result<PaymentStatusView, ServiceError> {
        if let Some(order_model) = self.find_order_by_session(session_id).await? {
            return Ok(PaymentStatusView {
                status: order_model.payment_status,
                order_number: Some(order_model.order_number),
                total_minor: Some(order_model.total_minor),
            });
        }

        match self.sessions.get(session_id).await {
            Ok(session) => Ok(PaymentStatusView {
                status: session.order.status.to_string(),
                order_number: Some(session.order.order_number),
                total_minor: Some(session.order.total_minor),
            }),
            Err(ServiceError::NotFound(_)) => Ok(PaymentStatusView {
                status: "not_found".to_string(),
                order_number: None,
                total_minor: None,
            }),
            Err(e) => Err(e),
        }
    }

    /// Closes the race between "user lands on the success page" and "the
    /// webhook has not arrived yet" by asking the provider directly.
    #[instrument(skip(self))]
    pub async fn verify_and_finalize(&self, session_id: &str) -> Result<VerifyOutcome, ServiceError> {
        if let Some(existing) = self.find_order_by_session(session_id).await? {
            return Ok(VerifyOutcome {
                status: VerifiedStatus::Paid,
                finalize: Some(already(existing)),
            });
        }

        let session = self.sessions.get(session_id).await?;
        match session.order.status {
            SessionPaymentStatus::Paid => {
                return Ok(VerifyOutcome {
                    status: VerifiedStatus::Paid,
                    finalize: None,
                })
            }
            SessionPaymentStatus::Failed => {
                return Ok(VerifyOutcome {
                    status: VerifiedStatus::Failed,
                    finalize: None,
                })
            }
            SessionPaymentStatus::Pending => {}
        }

        let adapter = self.dispatcher.resolve(session.order.gateway);
        let ctx = VerificationContext {
            pay_token: session.order.tokens.pay_token.clone(),
            amount_minor: Some(session.order.total_minor),
            currency: Some(session.order.currency.clone()),
        };
        let verification = adapter
            .verify_payment(&session.order.transaction_id, &ctx)
            .await?;

        match verification.status {
            VerifiedStatus::Paid => {
                let outcome = self
                    .finalize_payment(
                        session.order.gateway,
                        &session.order.transaction_id,
                        session_id,
                        verification.amount_minor,
                    )
                    .await?;
                Ok(VerifyOutcome {
                    status: VerifiedStatus::Paid,
                    finalize: Some(outcome),
                })
            }
            status @ (VerifiedStatus::Failed | VerifiedStatus::Expired) => {
                self.mark_session_failed(session_id, &session.order.gateway.to_string(), status)
                    .await;
                Ok(VerifyOutcome {
                    status,
                    finalize: None,
                })
            }
            status => Ok(VerifyOutcome {
                status,
                finalize: None,
            }),
        }
    }

    /// Transport-agnostic webhook processing: the adapter authenticates the
    /// payload, then the outcome feeds the same finalize path as everything
    /// else.
    #[instrument(skip(self, payload, headers))]
    pub async fn process_webhook(
        &self,
        kind: GatewayKind,
        session_hint: Option<&str>,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> Result<WebhookAck, ServiceError> {
        let adapter = self.dispatcher.resolve(kind);

        // Token-authenticated providers need the secret captured at
        // initiation; a confirmation arriving after TTL expiry finds no
        // session and is surfaced as an error, not silently dropped.
        let stored_token = match kind {
            GatewayKind::OrangeMoney => {
                let hint = session_hint.ok_or_else(|| {
                    ServiceError::ValidationError("missing session reference".to_string())
                })?;
                let session = self.sessions.get(hint).await?;
                session.order.tokens.notif_token
            }
            GatewayKind::Stripe => None,
        };

        let event = adapter
            .handle_webhook(payload, headers, stored_token.as_deref())
            .await?;

        let session_id = event
            .session_id
            .clone()
            .or_else(|| session_hint.map(str::to_string))
            .ok_or_else(|| {
                ServiceError::ValidationError(
                    "webhook payload carries no session reference".to_string(),
                )
            })?;

        // The order reference keyed at initiation is the stable transaction
        // id; redirect-flow notifications only carry a provider-side txn id.
        let transaction_id = match kind {
            GatewayKind::OrangeMoney => session_id.clone(),
            GatewayKind::Stripe => event.transaction_id.clone(),
        };

        let result = match event.status {
            VerifiedStatus::Paid => {
                let outcome = self
                    .finalize_payment(kind, &transaction_id, &session_id, event.amount_minor)
                    .await?;
                if outcome.already_finalized {
                    "already_finalized"
                } else {
                    "finalized"
                }
            }
            VerifiedStatus::Failed | VerifiedStatus::Expired => {
                self.mark_session_failed(&session_id, &kind.to_string(), event.status)
                    .await;
                "failed"
            }
            VerifiedStatus::Pending | VerifiedStatus::Error => {
                info!(
                    "Ignoring non-terminal webhook: session_id={}, status={}",
                    session_id, event.status
                );
                "ignored"
            }
        };

        Ok(WebhookAck {
            result: result.to_string(),
            event_id: event.event_id,
        })
    }

    async fn mark_session_failed(&self, session_id: &str, gateway: &str, status: VerifiedStatus) {
        if let Err(e) = self
            .sessions
            .update(session_id, |data| {
                data.order.status = SessionPaymentStatus::Failed;
            })
            .await
        {
            warn!("Failed to mark session {} failed: {}", session_id, e);
        }
        let _ = self
            .events
            .send(Event::PaymentFailed {
                session_id: session_id.to_string(),
                gateway: gateway.to_string(),
                reason: status.to_string(),
            })
            .await;
    }

    pub async fn find_order_by_transaction(
        &self,
        gateway: GatewayKind,
        transaction_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::Gateway.eq(gateway.to_string()))
            .filter(order::Column::GatewayTransactionId.eq(transaction_id))
            .one(&*self.db)
            .await?)
    }

    pub async fn find_order_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::SessionId.eq(session_id))
            .one(&*self.db)
            .await?)
    }
}

fn already(existing: order::Model) -> FinalizeOutcome {
    FinalizeOutcome {
        order_id: existing.id,
        order_number: existing.order_number,
        already_finalized: true,
    }
}

fn generate_order_number() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect::<String>()
        .to_uppercase();
    format!("ORD-{}", suffix)
}
