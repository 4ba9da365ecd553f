// tests/reservation_tests.rs

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use common::{make_order, TestShop};
use keyshop_common::error::Error;
use keyshop_common::models::order::OrderStatus;
use keyshop_common::models::payment::GatewayStatus;
use keyshop_common::traits::repository_traits::{CardRepository, OrderRepository};
use keyshop_core::test_utils::test_product;

#[tokio::test]
async fn concurrent_claims_never_exceed_stock() {
    let shop = TestShop::new();
    let product = test_product("p1", Decimal::from(10), false);
    shop.products.insert(product.clone());
    shop.cards.seed("p1", 3);

    let manager = Arc::new(shop.reservations());

    let mut handles = Vec::new();
    for i in 0..4 {
        let manager = manager.clone();
        let product = product.clone();
        handles.push(tokio::spawn(async move {
            manager.reserve(&product, &format!("ORD{i}"), 1).await
        }));
    }

    let mut granted = 0;
    let mut locked = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(cards) => {
                assert_eq!(cards.len(), 1);
                granted += 1;
            }
            Err(Error::StockLocked(_)) => locked += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(granted, 3, "exactly N claimants win N cards");
    assert_eq!(locked, 1, "the (N+1)th claimant is stock-locked");
}

#[tokio::test]
async fn reservation_holds_are_exclusive() {
    let shop = TestShop::new();
    let product = test_product("p1", Decimal::from(10), false);
    shop.products.insert(product.clone());
    let ids = shop.cards.seed("p1", 1);

    let manager = shop.reservations();
    let first = manager.reserve(&product, "ORD1", 1).await.unwrap();
    assert_eq!(first[0].id, ids[0]);

    // Fresh reservation is not expired, so a second order cannot touch it.
    let second = manager.reserve(&product, "ORD2", 1).await;
    assert!(matches!(second, Err(Error::StockLocked(_))));

    let card = shop.cards.get(ids[0]).unwrap();
    assert_eq!(card.reserved_order_id.as_deref(), Some("ORD1"));
}

#[tokio::test]
async fn used_cards_are_never_reserved_again() {
    let shop = TestShop::new();
    let product = test_product("p1", Decimal::from(10), false);
    shop.products.insert(product.clone());
    let ids = shop.cards.seed("p1", 1);

    assert!(shop.cards.consume_card(ids[0], Utc::now()).await.unwrap());
    // is_used is monotonic: a second consume is a no-op...
    assert!(!shop.cards.consume_card(ids[0], Utc::now()).await.unwrap());

    // ...and the card is invisible to reservation.
    let manager = shop.reservations();
    let result = manager.reserve(&product, "ORD1", 1).await;
    assert!(matches!(result, Err(Error::StockLocked(_))));
}

#[tokio::test]
async fn stale_reservation_is_stolen_when_holder_unpaid() {
    let shop = TestShop::new();
    let product = test_product("p1", Decimal::from(10), false);
    shop.products.insert(product.clone());
    let ids = shop.cards.seed("p1", 1);

    // ORD_OLD reserved the card ten minutes ago and never paid.
    shop.cards
        .set_reservation(ids[0], "ORD_OLD", Utc::now() - Duration::minutes(10));
    shop.gateway.set_status("ORD_OLD", GatewayStatus::Unpaid);

    let manager = shop.reservations();
    let reserved = manager.reserve(&product, "ORD_NEW", 1).await.unwrap();
    assert_eq!(reserved[0].id, ids[0]);

    let card = shop.cards.get(ids[0]).unwrap();
    assert_eq!(card.reserved_order_id.as_deref(), Some("ORD_NEW"));
    assert!(!card.is_used);
}

#[tokio::test]
async fn stale_reservation_of_paid_order_is_not_stolen() {
    let shop = TestShop::new();
    let product = test_product("p1", Decimal::from(10), false);
    shop.products.insert(product.clone());
    let ids = shop.cards.seed("p1", 1);

    shop.orders
        .insert(&make_order(
            "ORD_OLD",
            "p1",
            OrderStatus::Pending,
            Decimal::from(10),
            1,
        ))
        .await
        .unwrap();
    shop.cards
        .set_reservation(ids[0], "ORD_OLD", Utc::now() - Duration::minutes(10));
    shop.gateway.set_status("ORD_OLD", GatewayStatus::Paid);

    let manager = shop.reservations();
    let result = manager.reserve(&product, "ORD_NEW", 1).await;
    assert!(matches!(result, Err(Error::StockLocked(_))));

    // The rightful owner keeps the card and is promoted to paid.
    let card = shop.cards.get(ids[0]).unwrap();
    assert!(card.is_used);
    let old = shop.orders.get("ORD_OLD").await.unwrap().unwrap();
    assert_eq!(old.status, OrderStatus::Paid);
}

#[tokio::test]
async fn unverifiable_holder_blocks_theft() {
    let shop = TestShop::new();
    let product = test_product("p1", Decimal::from(10), false);
    shop.products.insert(product.clone());
    let ids = shop.cards.seed("p1", 1);

    shop.cards
        .set_reservation(ids[0], "ORD_OLD", Utc::now() - Duration::minutes(10));
    shop.gateway.set_offline(true);

    let manager = shop.reservations();
    let result = manager.reserve(&product, "ORD_NEW", 1).await;
    assert!(matches!(result, Err(Error::StockLocked(_))));

    // The hold stays with the original order until the gateway can answer.
    let card = shop.cards.get(ids[0]).unwrap();
    assert_eq!(card.reserved_order_id.as_deref(), Some("ORD_OLD"));
    assert!(!card.is_used);
}

#[tokio::test]
async fn shared_product_replicates_one_key_without_reserving() {
    let shop = TestShop::new();
    let product = test_product("shared", Decimal::from(5), true);
    shop.products.insert(product.clone());
    let ids = shop.cards.seed("shared", 1);

    let manager = shop.reservations();
    let reserved = manager.reserve(&product, "ORD1", 4).await.unwrap();
    assert_eq!(reserved.len(), 4);
    assert!(reserved.iter().all(|c| c.id == ids[0]));

    let card = shop.cards.get(ids[0]).unwrap();
    assert!(card.reserved_order_id.is_none(), "shared cards are never reserved");
    assert!(!card.is_used);
}
