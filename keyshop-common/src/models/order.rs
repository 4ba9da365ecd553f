use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Order state machine: `pending -> {paid -> delivered} | cancelled | refunded`.
///
/// `paid` is a checkpoint state: payment confirmed but inventory was not
/// available at confirmation time. Orders may sit there indefinitely until
/// stock is topped up and an admin (or a later fulfillment attempt)
/// completes delivery. `cancelled` orders can still be fulfilled if the
/// payment turns out to have succeeded after the cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(Error::Parse(format!("unknown order status '{other}'"))),
        }
    }

    /// Statuses the fulfillment dispatcher is allowed to act on. Anything
    /// else means the order was already processed (idempotent no-op).
    pub fn is_fulfillable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Order {
    pub order_id: String,
    pub product_id: String,
    pub product_name: String,
    pub status: OrderStatus,
    pub amount: Decimal,
    pub quantity: i32,
    pub points_used: i64,
    /// Payment id of the latest payment attempt for this order. Retried
    /// attempts get a `{order_id}_retry{millis}` id so duplicate gateway
    /// callbacks can be told apart from the original attempt.
    pub current_payment_id: Option<String>,
    /// Newline-joined delivered card keys.
    pub card_key: Option<String>,
    /// Comma-joined delivered card ids.
    pub card_ids: Option<String>,
    /// Gateway-side trade reference, set on payment confirmation.
    pub trade_no: Option<String>,
    pub email: Option<String>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    /// Receiving admin for payment-passthrough orders.
    pub payee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn join_card_keys(keys: &[String]) -> String {
        keys.join("\n")
    }

    pub fn join_card_ids(ids: &[i64]) -> Option<String> {
        let mut unique: Vec<i64> = Vec::new();
        for id in ids {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }
        if unique.is_empty() {
            None
        } else {
            Some(
                unique
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            )
        }
    }

    /// Parses the comma-joined `card_ids` column back into ids, dropping
    /// anything unparsable (legacy rows may hold free-form text).
    pub fn parsed_card_ids(&self) -> Vec<i64> {
        let mut out: Vec<i64> = Vec::new();
        if let Some(raw) = &self.card_ids {
            for part in raw.split(',') {
                if let Ok(id) = part.trim().parse::<i64>() {
                    if !out.contains(&id) {
                        out.push(id);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ] {
            assert_eq!(OrderStatus::from_str(s.as_str()).unwrap(), s);
        }
        assert!(OrderStatus::from_str("shipped").is_err());
    }

    #[test]
    fn card_ids_join_dedupes_and_parses() {
        assert_eq!(Order::join_card_ids(&[3, 1, 3, 2]).as_deref(), Some("3,1,2"));
        assert_eq!(Order::join_card_ids(&[]), None);
    }
}
