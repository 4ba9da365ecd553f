// File: keyshop-core/src/services/fulfillment_service.rs
//
// Converts a confirmed payment into delivered inventory. The status gate
// is check-then-act, not a lock: duplicate webhook deliveries can race
// past it, which is tolerated because every card-consuming statement
// carries its own `is_used = FALSE` guard, so a double execution can never
// double-consume a card.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use keyshop_common::error::Error;
use keyshop_common::models::order::Order;
use keyshop_common::models::product::Product;
use keyshop_common::traits::repository_traits::{
    CardRepository, OrderRepository, ProductRepository,
};

use crate::eventbus::{EventBus, ShopEvent};

/// Largest tolerated difference between the gateway-reported amount and
/// the order amount (float-era gateways round loosely).
fn amount_epsilon() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    Processed,
    /// The order had already left `pending`/`cancelled`; nothing was done.
    AlreadyProcessed,
}

pub struct FulfillmentService {
    products: Arc<dyn ProductRepository>,
    cards: Arc<dyn CardRepository>,
    orders: Arc<dyn OrderRepository>,
    event_bus: EventBus,
    reservation_ttl: chrono::Duration,
}

impl FulfillmentService {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        cards: Arc<dyn CardRepository>,
        orders: Arc<dyn OrderRepository>,
        event_bus: EventBus,
        reservation_ttl: chrono::Duration,
    ) -> Self {
        Self {
            products,
            cards,
            orders,
            event_bus,
            reservation_ttl,
        }
    }

    pub async fn fulfill(
        &self,
        order_id: &str,
        paid_amount: Decimal,
        trade_no: &str,
    ) -> Result<FulfillmentOutcome, Error> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("order {order_id}")))?;

        // Amount first: a valid signature with the wrong amount is an
        // attack, not a retry.
        if (paid_amount - order.amount).abs() > amount_epsilon() {
            error!(
                order_id,
                expected = %order.amount,
                paid = %paid_amount,
                "amount mismatch on payment confirmation"
            );
            return Err(Error::AmountMismatch {
                order_id: order_id.to_string(),
                expected: order.amount,
                paid: paid_amount,
            });
        }

        if !order.status.is_fulfillable() {
            return Ok(FulfillmentOutcome::AlreadyProcessed);
        }

        let now = Utc::now();

        if Product::is_payment_passthrough(&order.product_id) {
            self.orders.mark_paid(order_id, Some(trade_no), now).await?;
            info!(order_id, "payment passthrough order marked paid");
            self.event_bus
                .publish(ShopEvent::PaymentCaptured {
                    order_id: order_id.to_string(),
                    product_name: order.product_name.clone(),
                    amount: order.amount,
                    trade_no: Some(trade_no.to_string()),
                })
                .await;
            self.refresh_aggregates(&order.product_id).await;
            return Ok(FulfillmentOutcome::Processed);
        }

        let product = self.products.get(&order.product_id).await?;
        let is_shared = product.as_ref().is_some_and(|p| p.is_shared);
        let product_name = product
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_else(|| order.product_name.clone());

        if is_shared {
            self.fulfill_shared(&order, &product_name, trade_no, now).await?;
        } else {
            self.fulfill_exclusive(&order, &product_name, trade_no, now).await?;
        }

        self.refresh_aggregates(&order.product_id).await;
        Ok(FulfillmentOutcome::Processed)
    }

    async fn fulfill_shared(
        &self,
        order: &Order,
        product_name: &str,
        trade_no: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), Error> {
        match self.cards.pick_shared_card(&order.product_id, now).await? {
            Some(card) => {
                let keys = vec![card.key.clone(); order.quantity.max(1) as usize].join("\n");
                self.orders
                    .mark_delivered(
                        &order.order_id,
                        &keys,
                        Some(&card.id.to_string()),
                        Some(trade_no),
                        now,
                    )
                    .await?;
                info!(order_id = %order.order_id, card_id = card.id, "shared product order delivered");
                self.publish_delivered(order, product_name, &keys).await;
            }
            None => {
                // Money must never be taken without a terminal bookkeeping
                // state: capture the payment, defer delivery.
                self.orders
                    .mark_paid(&order.order_id, Some(trade_no), now)
                    .await?;
                warn!(order_id = %order.order_id, "no stock for shared product; order marked paid");
                self.publish_stock_depleted(order).await;
            }
        }
        Ok(())
    }

    async fn fulfill_exclusive(
        &self,
        order: &Order,
        product_name: &str,
        trade_no: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), Error> {
        let quantity = order.quantity.max(1) as i64;

        // 1. Cards this order already holds are guaranteed ours.
        let mut consumed = self
            .cards
            .consume_reserved(&order.order_id, quantity, now)
            .await?;

        // 2. Top up from free stock if the reservation fell short.
        if (consumed.len() as i64) < quantity {
            let cutoff = now - self.reservation_ttl;
            let needed = quantity - consumed.len() as i64;
            let extra = self
                .cards
                .consume_available(&order.product_id, needed, cutoff, now)
                .await?;
            consumed.extend(extra);
        }

        let keys: Vec<String> = consumed.iter().map(|c| c.key.clone()).collect();
        let ids: Vec<i64> = consumed.iter().map(|c| c.id).collect();
        let joined_keys = Order::join_card_keys(&keys);
        let card_ids_value = Order::join_card_ids(&ids);

        if consumed.len() as i64 == quantity {
            self.orders
                .mark_delivered(
                    &order.order_id,
                    &joined_keys,
                    card_ids_value.as_deref(),
                    Some(trade_no),
                    now,
                )
                .await?;
            info!(order_id = %order.order_id, cards = consumed.len(), "order delivered");
            self.publish_delivered(order, product_name, &joined_keys).await;
        } else {
            // Short even after the second pass: record what was consumed
            // and park the order in `paid` until stock is topped up.
            if !consumed.is_empty() {
                self.orders
                    .record_cards(&order.order_id, &joined_keys, card_ids_value.as_deref())
                    .await?;
            }
            self.orders
                .mark_paid(&order.order_id, Some(trade_no), now)
                .await?;
            warn!(
                order_id = %order.order_id,
                consumed = consumed.len(),
                wanted = quantity,
                "insufficient stock at confirmation; order marked paid"
            );
            self.publish_stock_depleted(order).await;
        }
        Ok(())
    }

    async fn publish_delivered(&self, order: &Order, product_name: &str, keys: &str) {
        self.event_bus
            .publish(ShopEvent::OrderDelivered {
                order_id: order.order_id.clone(),
                product_name: product_name.to_string(),
                card_keys: keys.to_string(),
                email: order.email.clone(),
                user_id: order.user_id.clone(),
            })
            .await;
    }

    async fn publish_stock_depleted(&self, order: &Order) {
        self.event_bus
            .publish(ShopEvent::StockDepleted {
                order_id: order.order_id.clone(),
                product_id: order.product_id.clone(),
            })
            .await;
    }

    async fn refresh_aggregates(&self, product_id: &str) {
        if let Err(e) = self.products.refresh_aggregates(product_id).await {
            warn!(product_id, "aggregate refresh after fulfillment failed: {e}");
        }
    }
}
