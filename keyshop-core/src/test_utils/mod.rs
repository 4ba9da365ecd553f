// File: keyshop-core/src/test_utils/mod.rs

pub mod memory;

pub use memory::{
    MemoryCardRepository, MemoryOrderRepository, MemoryProductRepository, MemoryUserRepository,
    StubGateway,
};

use chrono::Duration;
use rust_decimal::Decimal;

use keyshop_common::models::product::Product;
use keyshop_common::ShopConfig;

pub fn test_config() -> ShopConfig {
    ShopConfig {
        merchant_id: "1001".into(),
        merchant_key: "secret".into(),
        pay_url: "https://pay.example/submit.php".into(),
        gateway_api_url: "https://pay.example/api.php".into(),
        app_base_url: "https://shop.example".into(),
        admin_usernames: vec!["root".into()],
        reservation_ttl: Duration::minutes(5),
        consume_shared_zero_price: true,
        refund_reclaim_cards: true,
        checkin_enabled: true,
        checkin_reward: 10,
    }
}

pub fn test_product(id: &str, price: Decimal, is_shared: bool) -> Product {
    Product {
        id: id.to_string(),
        name: format!("Product {id}"),
        price,
        purchase_limit: None,
        is_shared,
        sold_count: 0,
        stock_cached: 0,
        created_at: chrono::Utc::now(),
    }
}
