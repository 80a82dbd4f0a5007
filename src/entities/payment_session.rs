use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ephemeral staging row holding the checkout blueprint between "payment
/// initiated" and "payment confirmed". The JSON columns store the typed
/// [`crate::services::sessions::SessionData`] shape, serialized exactly once
/// at this persistence boundary.
///
/// Rows are not deleted on finalize; they stay readable for the
/// success-page window and are reclaimed by the TTL sweep.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_id: String,
    pub event_id: Uuid,
    pub attendees: String,
    pub registration: String,
    pub selected_tickets: String,
    pub selected_products: String,
    pub order_blueprint: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
