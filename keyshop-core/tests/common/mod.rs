// tests/common/mod.rs (shared test harness)
#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use keyshop_common::models::order::{Order, OrderStatus};
use keyshop_common::ShopConfig;
use keyshop_core::eventbus::EventBus;
use keyshop_core::services::{
    AdminOrderService, CheckoutService, FulfillmentService, OrderService, ReservationManager,
};
use keyshop_core::test_utils::{
    test_config, MemoryCardRepository, MemoryOrderRepository, MemoryProductRepository,
    MemoryUserRepository, StubGateway,
};

pub struct TestShop {
    pub products: Arc<MemoryProductRepository>,
    pub cards: Arc<MemoryCardRepository>,
    pub orders: Arc<MemoryOrderRepository>,
    pub users: Arc<MemoryUserRepository>,
    pub gateway: Arc<StubGateway>,
    pub bus: EventBus,
    pub config: ShopConfig,
}

impl TestShop {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ShopConfig) -> Self {
        Self {
            products: Arc::new(MemoryProductRepository::new()),
            cards: Arc::new(MemoryCardRepository::new()),
            orders: Arc::new(MemoryOrderRepository::new()),
            users: Arc::new(MemoryUserRepository::new()),
            gateway: Arc::new(StubGateway::new()),
            bus: EventBus::new(),
            config,
        }
    }

    pub fn reservations(&self) -> ReservationManager {
        ReservationManager::new(
            self.cards.clone(),
            self.orders.clone(),
            self.gateway.clone(),
            self.config.reservation_ttl,
        )
    }

    pub fn fulfillment(&self) -> Arc<FulfillmentService> {
        Arc::new(FulfillmentService::new(
            self.products.clone(),
            self.cards.clone(),
            self.orders.clone(),
            self.bus.clone(),
            self.config.reservation_ttl,
        ))
    }

    pub fn checkout(&self) -> CheckoutService {
        CheckoutService::new(
            self.products.clone(),
            self.cards.clone(),
            self.orders.clone(),
            self.users.clone(),
            self.reservations(),
            self.bus.clone(),
            self.config.clone(),
        )
    }

    pub fn order_service(&self) -> OrderService {
        OrderService::new(
            self.orders.clone(),
            self.cards.clone(),
            self.users.clone(),
            self.gateway.clone(),
            self.fulfillment(),
        )
    }

    pub fn admin(&self) -> AdminOrderService {
        AdminOrderService::new(
            self.products.clone(),
            self.cards.clone(),
            self.orders.clone(),
            self.users.clone(),
            self.gateway.clone(),
            self.config.clone(),
        )
    }
}

/// Bare order row for tests that plant state directly.
pub fn make_order(
    order_id: &str,
    product_id: &str,
    status: OrderStatus,
    amount: Decimal,
    quantity: i32,
) -> Order {
    Order {
        order_id: order_id.to_string(),
        product_id: product_id.to_string(),
        product_name: format!("Product {product_id}"),
        status,
        amount,
        quantity,
        points_used: 0,
        current_payment_id: Some(order_id.to_string()),
        card_key: None,
        card_ids: None,
        trade_no: None,
        email: Some("buyer@example.com".to_string()),
        user_id: Some("buyer".to_string()),
        username: Some("buyer".to_string()),
        payee: None,
        created_at: Utc::now(),
        paid_at: None,
        delivered_at: None,
    }
}
