// tests/checkout_tests.rs

mod common;

use rust_decimal::Decimal;

use common::{make_order, TestShop};
use keyshop_common::error::Error;
use keyshop_common::models::order::OrderStatus;
use keyshop_common::traits::repository_traits::{OrderRepository, UserRepository};
use keyshop_core::services::{CheckoutOutcome, CheckoutRequest};
use keyshop_core::test_utils::{test_config, test_product};

fn buy_request(product_id: &str, quantity: i32, user_id: &str, use_points: bool) -> CheckoutRequest {
    CheckoutRequest {
        product_id: product_id.to_string(),
        quantity,
        user_id: Some(user_id.to_string()),
        username: Some(user_id.to_string()),
        email: None,
        use_points,
    }
}

#[tokio::test]
async fn paid_checkout_creates_pending_order_with_reservation() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    let ids = shop.cards.seed("p1", 3);
    shop.users.add_user("alice", 0);

    let checkout = shop.checkout();
    let outcome = checkout
        .create_order(buy_request("p1", 1, "alice", false))
        .await
        .unwrap();

    let CheckoutOutcome::PendingPayment { order_id, payment } = outcome else {
        panic!("expected a pending order");
    };

    let order = shop.orders.get(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.amount, Decimal::from(10));
    assert_eq!(order.current_payment_id.as_deref(), Some(order_id.as_str()));

    // One of the three cards is now held by the order.
    let reserved: Vec<_> = ids
        .iter()
        .filter(|id| {
            shop.cards.get(**id).unwrap().reserved_order_id.as_deref() == Some(order_id.as_str())
        })
        .collect();
    assert_eq!(reserved.len(), 1);

    assert_eq!(payment.params["money"], "10.00");
    assert!(keyshop_core::crypto::verify_sign(&payment.params, "secret"));
}

#[tokio::test]
async fn zero_price_checkout_debits_points_and_delivers() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    let ids = shop.cards.seed("p1", 1);
    shop.users.add_user("alice", 100);

    let checkout = shop.checkout();
    let outcome = checkout
        .create_order(buy_request("p1", 1, "alice", true))
        .await
        .unwrap();

    let CheckoutOutcome::Delivered { order_id } = outcome else {
        panic!("expected immediate delivery");
    };

    let order = shop.orders.get(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(order.points_used, 10);
    assert_eq!(order.amount, Decimal::ZERO);
    assert_eq!(order.trade_no.as_deref(), Some("POINTS_REDEMPTION"));
    assert!(order.card_key.is_some());

    assert_eq!(shop.users.points("alice").await.unwrap(), 90);
    assert!(shop.cards.get(ids[0]).unwrap().is_used);
}

#[tokio::test]
async fn failed_insert_after_debit_refunds_points() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    shop.cards.seed("p1", 1);
    shop.users.add_user("alice", 100);
    shop.orders.fail_next_insert();

    let checkout = shop.checkout();
    let result = checkout
        .create_order(buy_request("p1", 1, "alice", true))
        .await;
    assert!(result.is_err());

    // Saga compensation: the debit was undone.
    assert_eq!(shop.users.points("alice").await.unwrap(), 100);
}

#[tokio::test]
async fn partial_points_cover_part_of_the_price() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    shop.cards.seed("p1", 1);
    shop.users.add_user("alice", 4);

    let checkout = shop.checkout();
    let outcome = checkout
        .create_order(buy_request("p1", 1, "alice", true))
        .await
        .unwrap();

    // 4 of 10 units covered by points; the rest goes to the gateway.
    let CheckoutOutcome::PendingPayment { order_id, payment } = outcome else {
        panic!("a partially-discounted order still needs payment");
    };
    let order = shop.orders.get(&order_id).await.unwrap().unwrap();
    assert_eq!(order.points_used, 4);
    assert_eq!(order.amount, Decimal::from(6));
    assert_eq!(payment.params["money"], "6.00");
    assert_eq!(shop.users.points("alice").await.unwrap(), 0);
}

#[tokio::test]
async fn debit_then_credit_round_trips() {
    let shop = TestShop::new();
    shop.users.add_user("alice", 42);

    for k in [1i64, 7, 42] {
        let remaining = shop.users.debit_points("alice", k).await.unwrap().unwrap();
        assert_eq!(remaining, 42 - k);
        shop.users.credit_points("alice", k).await.unwrap();
        assert_eq!(shop.users.points("alice").await.unwrap(), 42);
    }

    // The guard refuses to go negative.
    assert!(shop.users.debit_points("alice", 43).await.unwrap().is_none());
    assert_eq!(shop.users.points("alice").await.unwrap(), 42);
}

#[tokio::test]
async fn purchase_limit_counts_prior_paid_orders() {
    let shop = TestShop::new();
    let mut product = test_product("p1", Decimal::from(10), false);
    product.purchase_limit = Some(2);
    shop.products.insert(product);
    shop.cards.seed("p1", 5);
    shop.users.add_user("alice", 0);

    let mut prior = make_order("OLD1", "p1", OrderStatus::Delivered, Decimal::from(20), 2);
    prior.user_id = Some("alice".to_string());
    shop.orders.insert(&prior).await.unwrap();

    let checkout = shop.checkout();
    let result = checkout
        .create_order(buy_request("p1", 1, "alice", false))
        .await;
    assert!(matches!(result, Err(Error::Forbidden(_))));
}

#[tokio::test]
async fn blocked_user_cannot_buy() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    shop.cards.seed("p1", 1);
    shop.users.add_user("mallory", 0);
    shop.users.block_user("mallory");

    let checkout = shop.checkout();
    let result = checkout
        .create_order(buy_request("p1", 1, "mallory", false))
        .await;
    assert!(matches!(result, Err(Error::Forbidden(_))));
}

#[tokio::test]
async fn out_of_stock_is_stock_locked() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    shop.users.add_user("alice", 0);

    let checkout = shop.checkout();
    let result = checkout
        .create_order(buy_request("p1", 1, "alice", false))
        .await;
    assert!(matches!(result, Err(Error::StockLocked(_))));
}

#[tokio::test]
async fn shared_zero_price_consumes_card_under_policy() {
    let shop = TestShop::new();
    shop.products.insert(test_product("shared", Decimal::from(5), true));
    let ids = shop.cards.seed("shared", 1);
    shop.users.add_user("alice", 100);
    shop.users.add_user("bob", 100);

    // Default policy: zero-price shared redemptions consume the card.
    let checkout = shop.checkout();
    checkout
        .create_order(buy_request("shared", 1, "alice", true))
        .await
        .unwrap();
    assert!(shop.cards.get(ids[0]).unwrap().is_used);

    let result = checkout
        .create_order(buy_request("shared", 1, "bob", true))
        .await;
    assert!(matches!(result, Err(Error::StockLocked(_))));
}

#[tokio::test]
async fn shared_zero_price_copies_key_when_policy_off() {
    let mut config = test_config();
    config.consume_shared_zero_price = false;
    let shop = TestShop::with_config(config);
    shop.products.insert(test_product("shared", Decimal::from(5), true));
    let ids = shop.cards.seed("shared", 1);
    shop.users.add_user("alice", 100);
    shop.users.add_user("bob", 100);

    let checkout = shop.checkout();
    for user in ["alice", "bob"] {
        let outcome = checkout
            .create_order(buy_request("shared", 1, user, true))
            .await
            .unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Delivered { .. }));
        assert_eq!(shop.users.points(user).await.unwrap(), 95);
    }

    // Both deliveries read the same card; it stays in stock.
    assert!(!shop.cards.get(ids[0]).unwrap().is_used);
}

#[tokio::test]
async fn retry_params_stamp_a_fresh_payment_id() {
    let shop = TestShop::new();
    shop.products.insert(test_product("p1", Decimal::from(10), false));
    shop.cards.seed("p1", 1);
    shop.users.add_user("alice", 0);

    let checkout = shop.checkout();
    let CheckoutOutcome::PendingPayment { order_id, .. } = checkout
        .create_order(buy_request("p1", 1, "alice", false))
        .await
        .unwrap()
    else {
        panic!("expected pending order");
    };

    let retry = checkout
        .retry_payment_params(&order_id, "alice")
        .await
        .unwrap();
    let retry_id = &retry.params["out_trade_no"];
    assert!(retry_id.starts_with(&format!("{order_id}_retry")));

    let order = shop.orders.get(&order_id).await.unwrap().unwrap();
    assert_eq!(order.current_payment_id.as_deref(), Some(retry_id.as_str()));

    // Only the owner may retry.
    let other = checkout.retry_payment_params(&order_id, "bob").await;
    assert!(matches!(other, Err(Error::Forbidden(_))));
}

#[tokio::test]
async fn payment_passthrough_orders_resolve_allowlisted_payee() {
    let shop = TestShop::new();
    let checkout = shop.checkout();

    let (order_id, payment) = checkout
        .create_payment_order(
            Decimal::new(1234, 2),
            Some("ROOT"),
            Some("alice".into()),
            Some("alice".into()),
            None,
        )
        .await
        .unwrap();

    let order = shop.orders.get(&order_id).await.unwrap().unwrap();
    assert_eq!(order.product_id, keyshop_common::models::PAYMENT_PRODUCT_ID);
    // Case-insensitive match against the configured allowlist.
    assert_eq!(order.payee.as_deref(), Some("root"));
    assert_eq!(payment.params["money"], "12.34");

    let rejected = checkout
        .create_payment_order(Decimal::ZERO, None, None, None, None)
        .await;
    assert!(matches!(rejected, Err(Error::InvalidState(_))));
}
