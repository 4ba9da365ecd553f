use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of sellable inventory (a key/code) tied to a product.
///
/// A card with `is_used = true` is permanently consumed and never reserved
/// again. A card with a non-null `reserved_order_id` is exclusively held by
/// that order until the reservation expires or the card is consumed.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Card {
    pub id: i64,
    pub product_id: String,
    pub card_key: String,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub reserved_order_id: Option<String>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Card {
    /// A reservation is stale once `reserved_at` is older than the TTL.
    pub fn reservation_expired(&self, cutoff: DateTime<Utc>) -> bool {
        match self.reserved_at {
            Some(at) => at < cutoff,
            None => false,
        }
    }
}

/// The slice of a card the reservation and fulfillment paths carry around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedCard {
    pub id: i64,
    pub key: String,
}
