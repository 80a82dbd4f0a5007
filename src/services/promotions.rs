use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter};
use strum::{AsRefStr, Display, EnumString};
use tracing::instrument;
use uuid::Uuid;

use crate::entities::promo_code;
use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(ascii_case_insensitive, serialize_all = "snake_case")]
pub enum PromoKind {
    /// `value` is a discount in basis points of the subtotal.
    Percentage,
    /// `value` is a flat discount in minor units, capped at the subtotal.
    Fixed,
    /// The whole subtotal is discounted.
    Free,
}

#[derive(Clone)]
pub struct PromotionService {
    db: Arc<DatabaseConnection>,
}

impl PromotionService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Validates a code for an event: active, inside its validity window,
    /// under its usage limit, and either global or scoped to this event.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<promo_code::Model, ServiceError> {
        let promo = promo_code::Entity::find()
            .filter(promo_code::Column::Code.eq(code))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("promo code {} not found", code)))?;

        if !promo.is_active {
            return Err(ServiceError::ValidationError(
                "promo code is not active".to_string(),
            ));
        }
        if let Some(scoped_event) = promo.event_id {
            if scoped_event != event_id {
                return Err(ServiceError::ValidationError(
                    "promo code is not valid for this event".to_string(),
                ));
            }
        }
        if let Some(starts_at) = promo.starts_at {
            if now < starts_at {
                return Err(ServiceError::ValidationError(
                    "promo code is not yet valid".to_string(),
                ));
            }
        }
        if let Some(ends_at) = promo.ends_at {
            if now > ends_at {
                return Err(ServiceError::ValidationError(
                    "promo code has expired".to_string(),
                ));
            }
        }
        if let Some(limit) = promo.usage_limit {
            if promo.usage_count >= limit {
                return Err(ServiceError::ValidationError(
                    "promo code usage limit reached".to_string(),
                ));
            }
        }

        Ok(promo)
    }

    /// Conditional increment so concurrent applications cannot exceed the
    /// usage limit. Zero rows affected means another request took the last
    /// remaining use between validate and here.
    #[instrument(skip(self))]
    pub async fn increment_usage(&self, promo_id: Uuid) -> Result<(), ServiceError> {
        let result = promo_code::Entity::update_many()
            .col_expr(
                promo_code::Column::UsageCount,
                Expr::col(promo_code::Column::UsageCount).add(1),
            )
            .filter(promo_code::Column::Id.eq(promo_id))
            .filter(
                Condition::any()
                    .add(promo_code::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(promo_code::Column::UsageCount)
                            .lt(Expr::col(promo_code::Column::UsageLimit)),
                    ),
            )
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "promo code usage limit reached".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns a claimed use when the application fails after the claim.
    /// Floored at zero; a double release must not open an extra use up.
    #[instrument(skip(self))]
    pub async fn release_usage(&self, promo_id: Uuid) -> Result<(), ServiceError> {
        promo_code::Entity::update_many()
            .col_expr(
                promo_code::Column::UsageCount,
                Expr::col(promo_code::Column::UsageCount).sub(1),
            )
            .filter(promo_code::Column::Id.eq(promo_id))
            .filter(Expr::col(promo_code::Column::UsageCount).gt(0))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    pub fn discount_for(promo: &promo_code::Model, subtotal_minor: i64) -> Result<i64, ServiceError> {
        let kind: PromoKind = promo.kind.parse().map_err(|_| {
            ServiceError::InternalError(format!("unknown promo kind {}", promo.kind))
        })?;
        Ok(compute_discount(kind, promo.value, subtotal_minor))
    }
}

/// Discount in minor units, never exceeding the subtotal.
pub fn compute_discount(kind: PromoKind, value: i64, subtotal_minor: i64) -> i64 {
    let raw = match kind {
        PromoKind::Percentage => {
            (subtotal_minor as i128 * value as i128 / 10_000) as i64
        }
        PromoKind::Fixed => value,
        PromoKind::Free => subtotal_minor,
    };
    raw.clamp(0, subtotal_minor)
}

/// Tax on a net subtotal, with the rate in basis points. Integer math,
/// truncating toward zero the way minor-unit arithmetic is expected to.
pub fn compute_tax(net_subtotal_minor: i64, tax_rate_bps: i32) -> i64 {
    (net_subtotal_minor as i128 * tax_rate_bps as i128 / 10_000) as i64
}
