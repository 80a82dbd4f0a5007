use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::{attendee, payment_session};
use crate::errors::ServiceError;
use crate::gateways::{GatewayKind, GatewayTokens};

/// Attendee blueprint staged before any durable record exists. The QR
/// identifier is assigned here, at initiation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendeeBlueprint {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub qr_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationInfo {
    pub email: String,
    pub name: String,
}

/// A ticket or product line selected at checkout, snapshotted with the
/// server-side price that was in effect at initiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedItem {
    pub item_id: Uuid,
    pub name: String,
    pub unit_price_minor: i64,
    pub quantity: i32,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    Pending,
    Paid,
    Failed,
}

/// Totals and gateway handles for the order that will exist once payment
/// confirms. Invariant: `total_minor = subtotal - discount + tax + shipping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBlueprint {
    pub order_number: String,
    pub gateway: GatewayKind,
    pub transaction_id: String,
    pub status: SessionPaymentStatus,
    pub currency: String,
    pub subtotal_minor: i64,
    pub discount_minor: i64,
    pub tax_minor: i64,
    pub shipping_minor: i64,
    pub total_minor: i64,
    pub tokens: GatewayTokens,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promo_code: Option<String>,
}

impl OrderBlueprint {
    /// An initiated payment the provider may still confirm. Sessions without
    /// a provider handle were never handed off and are not worth polling.
    pub fn is_in_flight(&self) -> bool {
        self.status == SessionPaymentStatus::Pending
            && (self.tokens.payment_intent_id.is_some() || self.tokens.pay_token.is_some())
    }
}

/// The full staged checkout, converted to and from the row's JSON columns
/// exactly once, here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub event_id: Uuid,
    pub attendees: Vec<AttendeeBlueprint>,
    pub registration: RegistrationInfo,
    pub selected_tickets: Vec<SelectedItem>,
    pub selected_products: Vec<SelectedItem>,
    pub order: OrderBlueprint,
}

#[derive(Clone)]
pub struct SessionService {
    db: Arc<DatabaseConnection>,
    ttl_days: i64,
}

impl SessionService {
    pub fn new(db: Arc<DatabaseConnection>, ttl_days: i64) -> Self {
        Self { db, ttl_days }
    }

    fn expiry_from_now(&self) -> DateTime<Utc> {
        Utc::now() + Duration::days(self.ttl_days)
    }

    /// Upserts the session keyed by id and resets its TTL.
    #[instrument(skip(self, data))]
    pub async fn store(&self, session_id: &str, data: &SessionData) -> Result<(), ServiceError> {
        let now = Utc::now();
        let existing = payment_session::Entity::find_by_id(session_id)
            .one(&*self.db)
            .await?;

        match existing {
            Some(model) => {
                let mut active: payment_session::ActiveModel = model.into();
                self.apply_data(&mut active, data)?;
                active.expires_at = Set(self.expiry_from_now());
                active.updated_at = Set(Some(now));
                active.update(&*self.db).await?;
            }
            None => {
                let mut active = payment_session::ActiveModel {
                    session_id: Set(session_id.to_string()),
                    event_id: Set(data.event_id),
                    expires_at: Set(self.expiry_from_now()),
                    created_at: Set(now),
                    updated_at: Set(None),
                    ..Default::default()
                };
                self.apply_data(&mut active, data)?;
                active.insert(&*self.db).await?;
            }
        }
        Ok(())
    }

    fn apply_data(
        &self,
        active: &mut payment_session::ActiveModel,
        data: &SessionData,
    ) -> Result<(), ServiceError> {
        active.event_id = Set(data.event_id);
        active.attendees = Set(serde_json::to_string(&data.attendees)?);
        active.registration = Set(serde_json::to_string(&data.registration)?);
        active.selected_tickets = Set(serde_json::to_string(&data.selected_tickets)?);
        active.selected_products = Set(serde_json::to_string(&data.selected_products)?);
        active.order_blueprint = Set(serde_json::to_string(&data.order)?);
        Ok(())
    }

    fn decode(model: &payment_session::Model) -> Result<SessionData, ServiceError> {
        Ok(SessionData {
            event_id: model.event_id,
            attendees: serde_json::from_str(&model.attendees)?,
            registration: serde_json::from_str(&model.registration)?,
            selected_tickets: serde_json::from_str(&model.selected_tickets)?,
            selected_products: serde_json::from_str(&model.selected_products)?,
            order: serde_json::from_str(&model.order_blueprint)?,
        })
    }

    /// Returns the session only while it is alive; an expired row is
    /// indistinguishable from a deleted one.
    #[instrument(skip(self))]
    pub async fn get(&self, session_id: &str) -> Result<SessionData, ServiceError> {
        let model = payment_session::Entity::find_by_id(session_id)
            .one(&*self.db)
            .await?
            .filter(|m| m.expires_at > Utc::now())
            .ok_or_else(|| {
                ServiceError::NotFound(format!("payment session {} not found", session_id))
            })?;
        Self::decode(&model)
    }

    /// Read-merge-write. Last writer wins; at most one checkout flow owns a
    /// session at a time, so no optimistic concurrency here.
    #[instrument(skip(self, mutate))]
    pub async fn update<F>(&self, session_id: &str, mutate: F) -> Result<SessionData, ServiceError>
    where
        F: FnOnce(&mut SessionData),
    {
        let model = payment_session::Entity::find_by_id(session_id)
            .one(&*self.db)
            .await?
            .filter(|m| m.expires_at > Utc::now())
            .ok_or_else(|| {
                ServiceError::NotFound(format!("payment session {} not found", session_id))
            })?;

        let mut data = Self::decode(&model)?;
        mutate(&mut data);

        let mut active: payment_session::ActiveModel = model.into();
        self.apply_data(&mut active, &data)?;
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;
        Ok(data)
    }

    /// Deletes a session. Attendee back-references are detached first so no
    /// durable row points at a session that no longer exists.
    #[instrument(skip(self))]
    pub async fn delete(&self, session_id: &str) -> Result<(), ServiceError> {
        attendee::Entity::update_many()
            .col_expr(attendee::Column::PaymentSessionId, Expr::value(None::<String>))
            .filter(attendee::Column::PaymentSessionId.eq(session_id))
            .exec(&*self.db)
            .await?;
        payment_session::Entity::delete_by_id(session_id)
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// TTL reclamation. Returns the ids of the sessions that were removed.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<Vec<String>, ServiceError> {
        let now = Utc::now();
        let expired: Vec<String> = payment_session::Entity::find()
            .filter(payment_session::Column::ExpiresAt.lt(now))
            .select_only()
            .column(payment_session::Column::SessionId)
            .into_tuple()
            .all(&*self.db)
            .await?;

        if expired.is_empty() {
            return Ok(expired);
        }

        attendee::Entity::update_many()
            .col_expr(attendee::Column::PaymentSessionId, Expr::value(None::<String>))
            .filter(attendee::Column::PaymentSessionId.is_in(expired.clone()))
            .exec(&*self.db)
            .await?;

        let result = payment_session::Entity::delete_many()
            .filter(payment_session::Column::ExpiresAt.lt(now))
            .exec(&*self.db)
            .await?;
        info!("Swept {} expired payment sessions", result.rows_affected);
        Ok(expired)
    }

    /// Sessions worth reconciling: still alive, older than the stuck
    /// threshold. The in-flight/pending filter happens after decode since
    /// the status lives inside the blueprint JSON.
    pub async fn find_stuck(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<(String, SessionData)>, ServiceError> {
        let now = Utc::now();
        let rows = payment_session::Entity::find()
            .filter(payment_session::Column::ExpiresAt.gt(now))
            .filter(payment_session::Column::CreatedAt.lt(older_than))
            .all(&*self.db)
            .await?;

        let mut stuck = Vec::new();
        for row in rows {
            match Self::decode(&row) {
                Ok(data) if data.order.is_in_flight() => stuck.push((row.session_id, data)),
                Ok(_) => {}
                Err(e) => {
                    // One undecodable session must not abort the sweep.
                    tracing::error!(
                        "Skipping undecodable session {}: {}",
                        row.session_id,
                        e
                    );
                }
            }
        }
        Ok(stuck)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blueprint(status: SessionPaymentStatus, tokens: GatewayTokens) -> OrderBlueprint {
        OrderBlueprint {
            order_number: "ORD-TEST".into(),
            gateway: GatewayKind::Stripe,
            transaction_id: "pi_1".into(),
            status,
            currency: "usd".into(),
            subtotal_minor: 1000,
            discount_minor: 0,
            tax_minor: 100,
            shipping_minor: 0,
            total_minor: 1100,
            tokens,
            promo_code: None,
        }
    }

    #[test]
    fn in_flight_requires_pending_and_a_provider_handle() {
        let with_intent = GatewayTokens {
            payment_intent_id: Some("pi_1".into()),
            ..Default::default()
        };
        assert!(blueprint(SessionPaymentStatus::Pending, with_intent.clone()).is_in_flight());
        assert!(!blueprint(SessionPaymentStatus::Paid, with_intent).is_in_flight());
        assert!(!blueprint(SessionPaymentStatus::Pending, GatewayTokens::default()).is_in_flight());
    }

    #[test]
    fn session_data_round_trips_through_json() {
        let data = SessionData {
            event_id: Uuid::new_v4(),
            attendees: vec![AttendeeBlueprint {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: "ada@example.com".into(),
                qr_code: Uuid::new_v4().to_string(),
            }],
            registration: RegistrationInfo {
                email: "ada@example.com".into(),
                name: "Ada Lovelace".into(),
            },
            selected_tickets: vec![SelectedItem {
                item_id: Uuid::new_v4(),
                name: "General".into(),
                unit_price_minor: 500,
                quantity: 2,
            }],
            selected_products: vec![],
            order: blueprint(SessionPaymentStatus::Pending, GatewayTokens::default()),
        };
        let json = serde_json::to_string(&data).unwrap();
        let back: SessionData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }
}
