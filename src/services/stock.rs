use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::entities::{product, ticket};
use crate::errors::ServiceError;

/// Which sales channel is taking the stock. Online checkouts may not dip
/// into the on-site quota; counter sales may spend the whole pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockChannel {
    Online,
    Counter,
}

/// Race-safe decrements as single conditional UPDATEs. Zero rows affected
/// means the guard failed, so concurrent checkouts can never oversell and a
/// failed decrement never partially applies.
#[derive(Clone)]
pub struct StockService {
    db: Arc<DatabaseConnection>,
}

impl StockService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn decrement_ticket(
        &self,
        ticket_id: Uuid,
        quantity: i32,
        channel: StockChannel,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be positive".to_string(),
            ));
        }

        let floor = match channel {
            // current_stock - qty >= reserved_onsite_quota
            StockChannel::Online => Expr::col(ticket::Column::ReservedOnsiteQuota).add(quantity),
            // current_stock - qty >= 0
            StockChannel::Counter => Expr::value(quantity),
        };

        let result = ticket::Entity::update_many()
            .col_expr(
                ticket::Column::CurrentStock,
                Expr::col(ticket::Column::CurrentStock).sub(quantity),
            )
            .filter(ticket::Column::Id.eq(ticket_id))
            .filter(Expr::col(ticket::Column::CurrentStock).gte(floor))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return self.ticket_decrement_failure(ticket_id, quantity).await;
        }
        Ok(())
    }

    async fn ticket_decrement_failure(
        &self,
        ticket_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        match ticket::Entity::find_by_id(ticket_id).one(&*self.db).await? {
            Some(t) => {
                warn!(
                    "Ticket stock exhausted: ticket_id={}, requested={}, current={}, reserved={}",
                    ticket_id, quantity, t.current_stock, t.reserved_onsite_quota
                );
                Err(ServiceError::InsufficientStock(format!(
                    "not enough stock for ticket {}",
                    t.name
                )))
            }
            None => Err(ServiceError::NotFound(format!(
                "ticket {} not found",
                ticket_id
            ))),
        }
    }

    #[instrument(skip(self))]
    pub async fn decrement_product(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be positive".to_string(),
            ));
        }

        let result = product::Entity::update_many()
            .col_expr(
                product::Column::CurrentStock,
                Expr::col(product::Column::CurrentStock).sub(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::CurrentStock.gte(quantity))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            match product::Entity::find_by_id(product_id)
                .one(&*self.db)
                .await?
            {
                Some(p) => {
                    warn!(
                        "Product stock exhausted: product_id={}, requested={}, current={}",
                        product_id, quantity, p.current_stock
                    );
                    return Err(ServiceError::InsufficientStock(format!(
                        "not enough stock for product {}",
                        p.name
                    )));
                }
                None => {
                    return Err(ServiceError::NotFound(format!(
                        "product {} not found",
                        product_id
                    )))
                }
            }
        }
        Ok(())
    }

    /// Pre-check used during initiation to reject obviously unfillable
    /// requests early. The conditional UPDATE at finalize remains the
    /// authority; this only improves the error before money moves.
    pub fn ticket_available(model: &ticket::Model, quantity: i32, channel: StockChannel) -> bool {
        let available = match channel {
            StockChannel::Online => model.current_stock - model.reserved_onsite_quota,
            StockChannel::Counter => model.current_stock,
        };
        model.is_active && quantity > 0 && available >= quantity
    }

    pub fn product_available(model: &product::Model, quantity: i32) -> bool {
        model.is_active && quantity > 0 && model.current_stock >= quantity
    }
}
