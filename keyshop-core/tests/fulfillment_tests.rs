// tests/fulfillment_tests.rs

mod common;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use common::{make_order, TestShop};
use keyshop_common::error::Error;
use keyshop_common::models::order::OrderStatus;
use keyshop_common::models::payment::GatewayStatus;
use keyshop_common::models::PAYMENT_PRODUCT_ID;
use keyshop_common::traits::repository_traits::{CardRepository, OrderRepository, UserRepository};
use keyshop_core::services::{FulfillmentOutcome, OrderAccess};
use keyshop_core::tasks::expiry_sweep::run_expiry_sweep;
use keyshop_core::test_utils::test_product;

#[tokio::test]
async fn webhook_confirmation_delivers_reserved_card() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    let ids = shop.cards.seed("p1", 3);

    shop.orders
        .insert(&make_order("ORD1", "p1", OrderStatus::Pending, Decimal::from(10), 1))
        .await
        .unwrap();
    shop.cards.set_reservation(ids[0], "ORD1", Utc::now());

    let fulfillment = shop.fulfillment();
    let outcome = fulfillment
        .fulfill("ORD1", Decimal::from(10), "TRADE1")
        .await
        .unwrap();
    assert_eq!(outcome, FulfillmentOutcome::Processed);

    let order = shop.orders.get("ORD1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(order.trade_no.as_deref(), Some("TRADE1"));
    assert_eq!(order.card_key.as_deref(), Some("KEY-p1-0"));

    assert!(shop.cards.get(ids[0]).unwrap().is_used);
    // Two cards remain available for other buyers.
    let now = Utc::now();
    let free = shop
        .cards
        .count_free("p1", now - Duration::minutes(5), now)
        .await
        .unwrap();
    assert_eq!(free, 2);
}

#[tokio::test]
async fn fulfillment_is_idempotent() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    let ids = shop.cards.seed("p1", 2);

    shop.orders
        .insert(&make_order("ORD1", "p1", OrderStatus::Pending, Decimal::from(10), 1))
        .await
        .unwrap();
    shop.cards.set_reservation(ids[0], "ORD1", Utc::now());

    let fulfillment = shop.fulfillment();
    let first = fulfillment
        .fulfill("ORD1", Decimal::from(10), "TRADE1")
        .await
        .unwrap();
    assert_eq!(first, FulfillmentOutcome::Processed);

    // Duplicate webhook delivery.
    let second = fulfillment
        .fulfill("ORD1", Decimal::from(10), "TRADE1")
        .await
        .unwrap();
    assert_eq!(second, FulfillmentOutcome::AlreadyProcessed);

    // Inventory was consumed exactly once.
    let used: Vec<_> = ids
        .iter()
        .filter(|id| shop.cards.get(**id).unwrap().is_used)
        .collect();
    assert_eq!(used.len(), 1);
}

#[tokio::test]
async fn amount_mismatch_never_changes_the_order() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    let ids = shop.cards.seed("p1", 1);

    shop.orders
        .insert(&make_order("ORD1", "p1", OrderStatus::Pending, Decimal::from(10), 1))
        .await
        .unwrap();
    shop.cards.set_reservation(ids[0], "ORD1", Utc::now());

    let fulfillment = shop.fulfillment();
    let result = fulfillment
        .fulfill("ORD1", Decimal::new(1, 2), "TRADE1")
        .await;
    assert!(matches!(result, Err(Error::AmountMismatch { .. })));

    let order = shop.orders.get("ORD1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(!shop.cards.get(ids[0]).unwrap().is_used);
}

#[tokio::test]
async fn epsilon_tolerates_gateway_rounding() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    let ids = shop.cards.seed("p1", 1);

    shop.orders
        .insert(&make_order("ORD1", "p1", OrderStatus::Pending, Decimal::from(10), 1))
        .await
        .unwrap();
    shop.cards.set_reservation(ids[0], "ORD1", Utc::now());

    let fulfillment = shop.fulfillment();
    // 10.01 is within the 0.01 epsilon.
    let outcome = fulfillment
        .fulfill("ORD1", Decimal::new(1001, 2), "TRADE1")
        .await
        .unwrap();
    assert_eq!(outcome, FulfillmentOutcome::Processed);
}

#[tokio::test]
async fn shared_order_copies_key_and_keeps_stock() {
    let shop = TestShop::new();
    shop.products.insert(test_product("shared", Decimal::from(5), true));
    let ids = shop.cards.seed("shared", 1);

    shop.orders
        .insert(&make_order("ORD1", "shared", OrderStatus::Pending, Decimal::from(15), 3))
        .await
        .unwrap();

    let fulfillment = shop.fulfillment();
    fulfillment
        .fulfill("ORD1", Decimal::from(15), "TRADE1")
        .await
        .unwrap();

    let order = shop.orders.get("ORD1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(
        order.card_key.as_deref(),
        Some("KEY-shared-0\nKEY-shared-0\nKEY-shared-0")
    );

    // Copy semantics: the card is still unused for the next buyer.
    assert!(!shop.cards.get(ids[0]).unwrap().is_used);
}

#[tokio::test]
async fn paid_without_stock_keeps_the_money_bookkept() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));

    shop.orders
        .insert(&make_order("ORD1", "p1", OrderStatus::Pending, Decimal::from(20), 2))
        .await
        .unwrap();

    let fulfillment = shop.fulfillment();
    fulfillment
        .fulfill("ORD1", Decimal::from(20), "TRADE1")
        .await
        .unwrap();

    // No cards at all: payment captured, delivery deferred.
    let order = shop.orders.get("ORD1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert!(order.card_key.is_none());
}

#[tokio::test]
async fn partial_stock_records_cards_but_stays_paid() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    let ids = shop.cards.seed("p1", 1);

    shop.orders
        .insert(&make_order("ORD1", "p1", OrderStatus::Pending, Decimal::from(20), 2))
        .await
        .unwrap();
    shop.cards.set_reservation(ids[0], "ORD1", Utc::now());

    let fulfillment = shop.fulfillment();
    fulfillment
        .fulfill("ORD1", Decimal::from(20), "TRADE1")
        .await
        .unwrap();

    let order = shop.orders.get("ORD1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid, "short delivery is not delivered");
    // What was consumed is recorded so the keys are not lost.
    assert_eq!(order.card_key.as_deref(), Some("KEY-p1-0"));
    assert!(shop.cards.get(ids[0]).unwrap().is_used);
}

#[tokio::test]
async fn cancelled_orders_can_still_be_fulfilled() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    shop.cards.seed("p1", 1);

    shop.orders
        .insert(&make_order("ORD1", "p1", OrderStatus::Cancelled, Decimal::from(10), 1))
        .await
        .unwrap();

    let fulfillment = shop.fulfillment();
    let outcome = fulfillment
        .fulfill("ORD1", Decimal::from(10), "TRADE1")
        .await
        .unwrap();
    assert_eq!(outcome, FulfillmentOutcome::Processed);

    let order = shop.orders.get("ORD1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
}

#[tokio::test]
async fn payment_passthrough_marks_paid_only() {
    let shop = TestShop::new();

    shop.orders
        .insert(&make_order(
            "PAY1",
            PAYMENT_PRODUCT_ID,
            OrderStatus::Pending,
            Decimal::from(50),
            1,
        ))
        .await
        .unwrap();

    let fulfillment = shop.fulfillment();
    fulfillment
        .fulfill("PAY1", Decimal::from(50), "TRADE1")
        .await
        .unwrap();

    let order = shop.orders.get("PAY1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn owner_cancel_releases_stock_and_credits_points() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    let ids = shop.cards.seed("p1", 3);
    shop.users.add_user("buyer", 0);

    let mut order = make_order("ORD1", "p1", OrderStatus::Pending, Decimal::from(7), 1);
    order.points_used = 3;
    shop.orders.insert(&order).await.unwrap();
    shop.cards.set_reservation(ids[0], "ORD1", Utc::now());

    let service = shop.order_service();
    service.cancel_pending_order("ORD1", "buyer").await.unwrap();

    let order = shop.orders.get("ORD1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(shop.cards.get(ids[0]).unwrap().reserved_order_id.is_none());
    assert_eq!(shop.users.points("buyer").await.unwrap(), 3);

    // All three cards are claimable again.
    let now = Utc::now();
    let free = shop
        .cards
        .count_free("p1", now - Duration::minutes(5), now)
        .await
        .unwrap();
    assert_eq!(free, 3);
}

#[tokio::test]
async fn non_owner_cannot_cancel_or_check() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));

    shop.orders
        .insert(&make_order("ORD1", "p1", OrderStatus::Pending, Decimal::from(10), 1))
        .await
        .unwrap();

    let service = shop.order_service();
    let cancel = service.cancel_pending_order("ORD1", "mallory").await;
    assert!(matches!(cancel, Err(Error::Forbidden(_))));

    let access = OrderAccess {
        user_id: Some("mallory".into()),
        pending_cookie: None,
    };
    let check = service.check_order_status("ORD1", &access).await;
    assert!(matches!(check, Err(Error::Forbidden(_))));
}

#[tokio::test]
async fn status_check_pulls_payment_from_gateway() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    let ids = shop.cards.seed("p1", 1);

    let mut order = make_order("ORD1", "p1", OrderStatus::Pending, Decimal::from(10), 1);
    order.current_payment_id = Some("ORD1_retry123".to_string());
    shop.orders.insert(&order).await.unwrap();
    shop.cards.set_reservation(ids[0], "ORD1", Utc::now());

    // The gateway knows the retry attempt id, not the bare order id.
    shop.gateway.set_paid("ORD1_retry123", "10.00", "TRADE9");

    let service = shop.order_service();
    let access = OrderAccess {
        user_id: Some("buyer".into()),
        pending_cookie: None,
    };
    let status = service.check_order_status("ORD1", &access).await.unwrap();
    assert_eq!(status, OrderStatus::Delivered);

    let order = shop.orders.get("ORD1").await.unwrap().unwrap();
    assert_eq!(order.trade_no.as_deref(), Some("TRADE9"));
}

#[tokio::test]
async fn status_check_reports_pending_when_unpaid() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));

    shop.orders
        .insert(&make_order("ORD1", "p1", OrderStatus::Pending, Decimal::from(10), 1))
        .await
        .unwrap();
    shop.gateway.set_status("ORD1", GatewayStatus::Unpaid);

    let service = shop.order_service();
    let access = OrderAccess {
        user_id: Some("buyer".into()),
        pending_cookie: None,
    };
    let status = service.check_order_status("ORD1", &access).await.unwrap();
    assert_eq!(status, OrderStatus::Pending);
}

#[tokio::test]
async fn sweep_cancels_stale_pending_orders() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    let ids = shop.cards.seed("p1", 1);
    shop.users.add_user("buyer", 0);

    let mut order = make_order("ORD1", "p1", OrderStatus::Pending, Decimal::from(5), 1);
    order.points_used = 5;
    order.created_at = Utc::now() - Duration::minutes(10);
    shop.orders.insert(&order).await.unwrap();
    shop.cards
        .set_reservation(ids[0], "ORD1", Utc::now() - Duration::minutes(10));

    let stats = run_expiry_sweep(
        shop.cards.as_ref(),
        shop.orders.as_ref(),
        shop.users.as_ref(),
        shop.config.reservation_ttl,
    )
    .await
    .unwrap();
    assert_eq!(stats.cancelled_orders, 1);

    let order = shop.orders.get("ORD1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(shop.cards.get(ids[0]).unwrap().reserved_order_id.is_none());
    assert_eq!(shop.users.points("buyer").await.unwrap(), 5);

    // Running it again is a no-op.
    let again = run_expiry_sweep(
        shop.cards.as_ref(),
        shop.orders.as_ref(),
        shop.users.as_ref(),
        shop.config.reservation_ttl,
    )
    .await
    .unwrap();
    assert_eq!(again.cancelled_orders, 0);
    assert_eq!(shop.users.points("buyer").await.unwrap(), 5);
}

#[tokio::test]
async fn sweep_purges_expired_cards() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    shop.cards
        .add_card("p1", "EXPIRED", Some(Utc::now() - Duration::hours(1)));
    shop.cards.add_card("p1", "FRESH", None);

    let stats = run_expiry_sweep(
        shop.cards.as_ref(),
        shop.orders.as_ref(),
        shop.users.as_ref(),
        shop.config.reservation_ttl,
    )
    .await
    .unwrap();
    assert_eq!(stats.purged_cards, 1);
    assert_eq!(shop.cards.count_unused("p1").await.unwrap(), 1);
}

#[tokio::test]
async fn admin_refund_credits_points_and_reclaims_cards_once() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    let ids = shop.cards.seed("p1", 1);
    shop.users.add_user("buyer", 0);

    // A delivered order that consumed the card.
    let now = Utc::now();
    shop.cards.set_reservation(ids[0], "ORD1", now);
    shop.cards.consume_card(ids[0], now).await.unwrap();
    let mut order = make_order("ORD1", "p1", OrderStatus::Delivered, Decimal::from(7), 1);
    order.points_used = 3;
    order.card_ids = Some(ids[0].to_string());
    order.card_key = Some("KEY-p1-0".to_string());
    shop.orders.insert(&order).await.unwrap();

    let admin = shop.admin();
    admin.mark_order_refunded("root", "ORD1").await.unwrap();

    let order = shop.orders.get("ORD1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Refunded);
    assert_eq!(shop.users.points("buyer").await.unwrap(), 3);
    assert!(!shop.cards.get(ids[0]).unwrap().is_used, "card back in stock");

    // Second invocation must not credit twice.
    admin.mark_order_refunded("root", "ORD1").await.unwrap();
    assert_eq!(shop.users.points("buyer").await.unwrap(), 3);

    // Non-admins are rejected.
    let denied = admin.mark_order_refunded("mallory", "ORD1").await;
    assert!(matches!(denied, Err(Error::Forbidden(_))));
}

#[tokio::test]
async fn admin_delete_reverses_points_and_releases_holds() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    let ids = shop.cards.seed("p1", 1);
    shop.users.add_user("buyer", 0);

    let mut order = make_order("ORD1", "p1", OrderStatus::Pending, Decimal::from(5), 1);
    order.points_used = 5;
    shop.orders.insert(&order).await.unwrap();
    shop.cards.set_reservation(ids[0], "ORD1", Utc::now());

    let admin = shop.admin();
    admin.delete_order("root", "ORD1").await.unwrap();

    assert!(shop.orders.get("ORD1").await.unwrap().is_none());
    assert!(shop.cards.get(ids[0]).unwrap().reserved_order_id.is_none());
    assert_eq!(shop.users.points("buyer").await.unwrap(), 5);

    // Deleting again is a harmless no-op.
    admin.delete_order("root", "ORD1").await.unwrap();
    assert_eq!(shop.users.points("buyer").await.unwrap(), 5);
}
