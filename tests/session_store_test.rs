mod common;

use chrono::{Duration, Utc};
use common::TestContext;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use ticketflow_api::entities::{attendee, payment_session};
use ticketflow_api::errors::ServiceError;
use ticketflow_api::gateways::{GatewayKind, GatewayTokens};
use ticketflow_api::services::sessions::{
    AttendeeBlueprint, OrderBlueprint, RegistrationInfo, SelectedItem, SessionData,
    SessionPaymentStatus,
};
use uuid::Uuid;

fn sample_session(event_id: Uuid) -> SessionData {
    SessionData {
        event_id,
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
        order: OrderBlueprint {
            order_number: "ORD-TEST1234".into(),
            gateway: GatewayKind::Stripe,
            transaction_id: "pi_test".into(),
            status: SessionPaymentStatus::Pending,
            currency: "usd".into(),
            subtotal_minor: 1000,
            discount_minor: 0,
            tax_minor: 100,
            shipping_minor: 0,
            total_minor: 1100,
            tokens: GatewayTokens {
                payment_intent_id: Some("pi_test".into()),
                ..Default::default()
            },
            promo_code: None,
        },
    }
}

#[tokio::test]
async fn store_and_get_round_trip() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(1000).await;
    let data = sample_session(ev.id);

    ctx.sessions.store("cs_round_trip", &data).await.unwrap();
    let loaded = ctx.sessions.get("cs_round_trip").await.unwrap();
    assert_eq!(loaded, data);
}

#[tokio::test]
async fn store_is_an_upsert_that_refreshes_ttl() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(0).await;
    let mut data = sample_session(ev.id);

    ctx.sessions.store("cs_upsert", &data).await.unwrap();
    data.order.total_minor = 880;
    ctx.sessions.store("cs_upsert", &data).await.unwrap();

    let loaded = ctx.sessions.get("cs_upsert").await.unwrap();
    assert_eq!(loaded.order.total_minor, 880);

    let rows = payment_session::Entity::find().all(&*ctx.db).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].expires_at > Utc::now() + Duration::days(6));
}

#[tokio::test]
async fn update_merges_through_read_modify_write() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(0).await;
    ctx.sessions
        .store("cs_update", &sample_session(ev.id))
        .await
        .unwrap();

    let updated = ctx
        .sessions
        .update("cs_update", |data| {
            data.order.status = SessionPaymentStatus::Failed;
        })
        .await
        .unwrap();
    assert_eq!(updated.order.status, SessionPaymentStatus::Failed);
    // Untouched fields survive the merge
    assert_eq!(updated.order.total_minor, 1100);
}

#[tokio::test]
async fn expired_session_reads_as_not_found() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(0).await;
    ctx.sessions
        .store("cs_expired", &sample_session(ev.id))
        .await
        .unwrap();

    payment_session::Entity::update_many()
        .col_expr(
            payment_session::Column::ExpiresAt,
            Expr::value(Utc::now() - Duration::seconds(5)),
        )
        .filter(payment_session::Column::SessionId.eq("cs_expired"))
        .exec(&*ctx.db)
        .await
        .unwrap();

    // Row still physically present, logically gone
    let err = ctx.sessions.get("cs_expired").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    let removed = ctx.sessions.sweep_expired().await.unwrap();
    assert_eq!(removed, vec!["cs_expired".to_string()]);
    assert!(payment_session::Entity::find_by_id("cs_expired")
        .one(&*ctx.db)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn delete_detaches_attendee_back_references_first() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(0).await;
    ctx.sessions
        .store("cs_detach", &sample_session(ev.id))
        .await
        .unwrap();

    let attendee_id = Uuid::new_v4();
    attendee::ActiveModel {
        id: Set(attendee_id),
        registration_id: Set(Uuid::new_v4()),
        event_id: Set(ev.id),
        first_name: Set("Ada".into()),
        last_name: Set("Lovelace".into()),
        email: Set("ada@example.com".into()),
        qr_code: Set(Uuid::new_v4().to_string()),
        payment_session_id: Set(Some("cs_detach".into())),
        created_at: Set(Utc::now()),
    }
    .insert(&*ctx.db)
    .await
    .unwrap();

    ctx.sessions.delete("cs_detach").await.unwrap();

    let detached = attendee::Entity::find_by_id(attendee_id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert!(detached.payment_session_id.is_none());
}
