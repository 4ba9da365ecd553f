use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Pseudo product id for flat payment passthrough orders (QR/link payments
/// that are not backed by card inventory).
pub const PAYMENT_PRODUCT_ID: &str = "__payment__";
pub const PAYMENT_PRODUCT_NAME: &str = "Payment (QR/Link)";

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    /// Max units one buyer (by user id or email) may hold across paid and
    /// delivered orders. `None` or `<= 0` means unlimited.
    pub purchase_limit: Option<i32>,
    /// Shared products have copy semantics: any unused card may be read by
    /// unlimited concurrent orders; cards are never reserved.
    pub is_shared: bool,
    pub sold_count: i64,
    pub stock_cached: i64,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn is_payment_passthrough(product_id: &str) -> bool {
        product_id == PAYMENT_PRODUCT_ID
    }

    /// Effective limit, treating zero/negative stored limits as "none".
    pub fn effective_purchase_limit(&self) -> Option<i32> {
        match self.purchase_limit {
            Some(n) if n > 0 => Some(n),
            _ => None,
        }
    }
}
