mod common;

use common::TestContext;
use sea_orm::EntityTrait;
use ticketflow_api::entities::{product, ticket};
use ticketflow_api::errors::ServiceError;
use ticketflow_api::services::{StockChannel, StockService};
use uuid::Uuid;

async fn ticket_stock(ctx: &TestContext, id: Uuid) -> i32 {
    ticket::Entity::find_by_id(id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap()
        .current_stock
}

#[tokio::test]
async fn online_decrement_stops_at_the_onsite_quota() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(0).await;
    let tk = ctx.seed_ticket(ev.id, 500, 5, 4).await;
    let stock = StockService::new(ctx.db.clone());

    // Only one unit is sellable online; asking for two must change nothing
    let err = stock
        .decrement_ticket(tk.id, 2, StockChannel::Online)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock(_)));
    assert_eq!(ticket_stock(&ctx, tk.id).await, 5);

    stock
        .decrement_ticket(tk.id, 1, StockChannel::Online)
        .await
        .unwrap();
    assert_eq!(ticket_stock(&ctx, tk.id).await, 4);

    let err = stock
        .decrement_ticket(tk.id, 1, StockChannel::Online)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock(_)));
    assert_eq!(ticket_stock(&ctx, tk.id).await, 4);
}

#[tokio::test]
async fn counter_decrement_may_spend_the_onsite_quota() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(0).await;
    let tk = ctx.seed_ticket(ev.id, 500, 5, 4).await;
    let stock = StockService::new(ctx.db.clone());

    stock
        .decrement_ticket(tk.id, 5, StockChannel::Counter)
        .await
        .unwrap();
    assert_eq!(ticket_stock(&ctx, tk.id).await, 0);

    // Below zero is never allowed, even at the counter
    let err = stock
        .decrement_ticket(tk.id, 1, StockChannel::Counter)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock(_)));
    assert_eq!(ticket_stock(&ctx, tk.id).await, 0);
}

#[tokio::test]
async fn product_decrement_never_goes_negative() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(0).await;
    let pr = ctx.seed_product(ev.id, 300, 3, false).await;
    let stock = StockService::new(ctx.db.clone());

    let err = stock.decrement_product(pr.id, 4).await.unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock(_)));

    stock.decrement_product(pr.id, 3).await.unwrap();
    let reloaded = product::Entity::find_by_id(pr.id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.current_stock, 0);

    let err = stock.decrement_product(pr.id, 1).await.unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock(_)));
}

#[tokio::test]
async fn unknown_ids_report_not_found_rather_than_stock() {
    let ctx = TestContext::new().await;
    let stock = StockService::new(ctx.db.clone());

    let err = stock
        .decrement_ticket(Uuid::new_v4(), 1, StockChannel::Online)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    let err = stock.decrement_product(Uuid::new_v4(), 1).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}
