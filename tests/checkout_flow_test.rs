mod common;

use common::TestContext;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use ticketflow_api::entities::{attendee, event, order, order_item, promo_code, ticket};
use ticketflow_api::errors::ServiceError;
use ticketflow_api::gateways::{GatewayAction, GatewayKind};
use ticketflow_api::services::payments::{
    AttendeeInput, InitiatePaymentInput, LineInput, RegistrationInput,
};
use uuid::Uuid;

fn input_for(
    gateway: &str,
    event_id: Uuid,
    ticket_id: Uuid,
    quantity: i32,
) -> InitiatePaymentInput {
    InitiatePaymentInput {
        gateway: gateway.to_string(),
        event_id,
        attendees: (0..quantity)
            .map(|i| AttendeeInput {
                first_name: format!("Attendee{}", i),
                last_name: "Test".to_string(),
                email: format!("attendee{}@example.com", i),
            })
            .collect(),
        selected_tickets: vec![LineInput {
            item_id: ticket_id,
            quantity,
        }],
        selected_products: vec![],
        registration: RegistrationInput {
            email: "buyer@example.com".to_string(),
            name: "Buyer Test".to_string(),
        },
        session_id: None,
    }
}

#[tokio::test]
async fn happy_path_two_tickets_with_tax() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(1000).await; // 10%
    let tk = ctx.seed_ticket(ev.id, 500, 10, 0).await;

    let checkout = ctx
        .orchestrator
        .initiate_payment(input_for("stripe", ev.id, tk.id, 2))
        .await
        .unwrap();
    assert_eq!(checkout.total_minor, 1100);
    assert!(matches!(checkout.action, GatewayAction::ClientSecret { .. }));

    let outcome = ctx
        .orchestrator
        .finalize_payment(
            GatewayKind::Stripe,
            &checkout.transaction_id,
            &checkout.session_id,
            Some(1100),
        )
        .await
        .unwrap();
    assert!(!outcome.already_finalized);

    let order_model = order::Entity::find_by_id(outcome.order_id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order_model.payment_status, "paid");
    assert_eq!(order_model.total_minor, 1100);
    assert_eq!(order_model.subtotal_minor, 1000);
    assert_eq!(order_model.tax_minor, 100);

    let attendees = attendee::Entity::find()
        .filter(attendee::Column::EventId.eq(ev.id))
        .count(&*ctx.db)
        .await
        .unwrap();
    assert_eq!(attendees, 2);

    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(outcome.order_id))
        .all(&*ctx.db)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 2);
    assert_eq!(items[0].total_minor, 1000);

    // Stock decremented, registration counter bumped
    let tk = ticket::Entity::find_by_id(tk.id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tk.current_stock, 8);
    let ev = event::Entity::find_by_id(ev.id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ev.registration_count, 1);

    let view = ctx
        .orchestrator
        .check_status_by_session(&checkout.session_id)
        .await
        .unwrap();
    assert_eq!(view.status, "paid");
    assert_eq!(view.total_minor, Some(1100));
}

#[tokio::test]
async fn initiate_rejects_unknown_gateway() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(0).await;
    let tk = ctx.seed_ticket(ev.id, 500, 10, 0).await;

    let err = ctx
        .orchestrator
        .initiate_payment(input_for("paypal", ev.id, tk.id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
}

#[tokio::test]
async fn initiate_rejects_when_online_stock_cannot_cover() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(0).await;
    // 5 in stock but 4 reserved for the counter channel
    let tk = ctx.seed_ticket(ev.id, 500, 5, 4).await;

    let err = ctx
        .orchestrator
        .initiate_payment(input_for("stripe", ev.id, tk.id, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock(_)));

    // No partial session was created
    let view = ctx
        .orchestrator
        .check_status_by_session("cs_nonexistent")
        .await
        .unwrap();
    assert_eq!(view.status, "not_found");
}

#[tokio::test]
async fn initiate_rejects_duplicate_attendee_email() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(0).await;
    let tk = ctx.seed_ticket(ev.id, 500, 10, 0).await;

    let first = ctx
        .orchestrator
        .initiate_payment(input_for("stripe", ev.id, tk.id, 1))
        .await
        .unwrap();
    ctx.orchestrator
        .finalize_payment(
            GatewayKind::Stripe,
            &first.transaction_id,
            &first.session_id,
            None,
        )
        .await
        .unwrap();

    // attendee0@example.com now has a durable registration for this event
    let err = ctx
        .orchestrator
        .initiate_payment(input_for("stripe", ev.id, tk.id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
}

#[tokio::test]
async fn products_add_shipping_fee() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(0).await;
    let tk = ctx.seed_ticket(ev.id, 500, 10, 0).await;
    let pr = ctx.seed_product(ev.id, 300, 5, true).await;

    let mut input = input_for("stripe", ev.id, tk.id, 1);
    input.selected_products = vec![LineInput {
        item_id: pr.id,
        quantity: 1,
    }];
    let checkout = ctx.orchestrator.initiate_payment(input).await.unwrap();
    // 500 ticket + 300 product + 500 flat shipping
    assert_eq!(checkout.total_minor, 1300);
}

#[tokio::test]
async fn promo_recomputes_tax_on_discounted_subtotal() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(1000).await; // 10%
    let tk = ctx.seed_ticket(ev.id, 500, 10, 0).await;
    ctx.seed_promo("WELCOME20", "percentage", 2000, Some(5)).await;

    let checkout = ctx
        .orchestrator
        .initiate_payment(input_for("stripe", ev.id, tk.id, 2))
        .await
        .unwrap();
    assert_eq!(checkout.total_minor, 1100);

    let applied = ctx
        .orchestrator
        .apply_promo_code(&checkout.session_id, "WELCOME20")
        .await
        .unwrap();
    assert_eq!(applied.discount_minor, 200);
    assert_eq!(applied.tax_minor, 80);
    assert_eq!(applied.total_minor, 880);

    // Second application is rejected
    let err = ctx
        .orchestrator
        .apply_promo_code(&checkout.session_id, "WELCOME20")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));

    // The finalized order carries the discounted totals
    let outcome = ctx
        .orchestrator
        .finalize_payment(
            GatewayKind::Stripe,
            &checkout.transaction_id,
            &checkout.session_id,
            Some(880),
        )
        .await
        .unwrap();
    let order_model = order::Entity::find_by_id(outcome.order_id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order_model.discount_minor, 200);
    assert_eq!(order_model.total_minor, 880);
}

#[tokio::test]
async fn promo_fails_fast_when_gateway_cannot_update_amount() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(1000).await;
    let tk = ctx.seed_ticket(ev.id, 500, 10, 0).await;
    ctx.seed_promo("WELCOME20", "percentage", 2000, None).await;

    let checkout = ctx
        .orchestrator
        .initiate_payment(input_for("orange_money", ev.id, tk.id, 1))
        .await
        .unwrap();
    assert!(matches!(checkout.action, GatewayAction::Redirect { .. }));

    let err = ctx
        .orchestrator
        .apply_promo_code(&checkout.session_id, "WELCOME20")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));

    // Session totals untouched since the provider refused the new amount
    let view = ctx
        .orchestrator
        .check_status_by_session(&checkout.session_id)
        .await
        .unwrap();
    assert_eq!(view.total_minor, Some(checkout.total_minor));
}

#[tokio::test]
async fn exhausted_promo_is_rejected() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(0).await;
    let tk = ctx.seed_ticket(ev.id, 500, 10, 0).await;
    ctx.seed_promo("ONEUSE", "fixed", 100, Some(1)).await;

    let first = ctx
        .orchestrator
        .initiate_payment(input_for("stripe", ev.id, tk.id, 1))
        .await
        .unwrap();
    ctx.orchestrator
        .apply_promo_code(&first.session_id, "ONEUSE")
        .await
        .unwrap();

    let mut second_input = input_for("stripe", ev.id, tk.id, 1);
    second_input.attendees[0].email = "other@example.com".to_string();
    let second = ctx
        .orchestrator
        .initiate_payment(second_input)
        .await
        .unwrap();
    let err = ctx
        .orchestrator
        .apply_promo_code(&second.session_id, "ONEUSE")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn rejected_amount_update_releases_the_promo_use() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(1000).await;
    let tk = ctx.seed_ticket(ev.id, 500, 10, 0).await;
    let promo = ctx.seed_promo("LASTONE", "percentage", 2000, Some(1)).await;

    // The redirect-style gateway refuses amount updates after initiation,
    // so the claimed use must be handed back.
    let orange = ctx
        .orchestrator
        .initiate_payment(input_for("orange_money", ev.id, tk.id, 1))
        .await
        .unwrap();
    let err = ctx
        .orchestrator
        .apply_promo_code(&orange.session_id, "LASTONE")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));

    let reloaded = promo_code::Entity::find_by_id(promo.id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.usage_count, 0);

    // The single use is still available to a gateway that accepts updates
    let mut stripe_input = input_for("stripe", ev.id, tk.id, 1);
    stripe_input.attendees[0].email = "other@example.com".to_string();
    let stripe = ctx.orchestrator.initiate_payment(stripe_input).await.unwrap();
    ctx.orchestrator
        .apply_promo_code(&stripe.session_id, "LASTONE")
        .await
        .unwrap();
}

#[tokio::test]
async fn racing_promo_applications_cannot_exceed_the_usage_limit() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(1000).await;
    let tk = ctx.seed_ticket(ev.id, 500, 10, 0).await;
    let promo = ctx.seed_promo("LASTONE", "percentage", 2000, Some(1)).await;

    let first = ctx
        .orchestrator
        .initiate_payment(input_for("stripe", ev.id, tk.id, 1))
        .await
        .unwrap();
    let mut second_input = input_for("stripe", ev.id, tk.id, 1);
    second_input.attendees[0].email = "other@example.com".to_string();
    let second = ctx
        .orchestrator
        .initiate_payment(second_input)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        ctx.orchestrator.apply_promo_code(&first.session_id, "LASTONE"),
        ctx.orchestrator.apply_promo_code(&second.session_id, "LASTONE"),
    );
    assert_eq!(a.is_ok() as u32 + b.is_ok() as u32, 1, "exactly one application may win");

    // The loser's session must keep its undiscounted totals
    let loser_session = if a.is_ok() { &second.session_id } else { &first.session_id };
    let view = ctx
        .orchestrator
        .check_status_by_session(loser_session)
        .await
        .unwrap();
    assert_eq!(view.total_minor, Some(first.total_minor));

    let reloaded = promo_code::Entity::find_by_id(promo.id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.usage_count, 1);
}

#[tokio::test]
async fn visitor_is_marked_converted_on_finalize() {
    let ctx = TestContext::new().await;
    let ev = ctx.seed_event(0).await;
    let tk = ctx.seed_ticket(ev.id, 500, 10, 0).await;
    let visitor = ctx.seed_visitor(ev.id, "buyer@example.com").await;

    let checkout = ctx
        .orchestrator
        .initiate_payment(input_for("stripe", ev.id, tk.id, 1))
        .await
        .unwrap();
    ctx.orchestrator
        .finalize_payment(
            GatewayKind::Stripe,
            &checkout.transaction_id,
            &checkout.session_id,
            None,
        )
        .await
        .unwrap();

    let visitor = ticketflow_api::entities::visitor::Entity::find_by_id(visitor.id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert!(visitor.converted);
}
