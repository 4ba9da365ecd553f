//! src/eventbus/mod.rs
//!
//! In-process event bus for best-effort side effects (buyer notifications,
//! admin alerts, email dispatch). Fulfillment and checkout publish here
//! after their state transitions commit; subscribers run decoupled from
//! the main flow, so a failing notifier can never roll back a delivery.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch, Mutex};

/// Events the engine publishes. Extend as downstream consumers need.
#[derive(Debug, Clone)]
pub enum ShopEvent {
    /// Inventory handed to the buyer; carries everything an email or user
    /// notification needs.
    OrderDelivered {
        order_id: String,
        product_name: String,
        card_keys: String,
        email: Option<String>,
        user_id: Option<String>,
    },

    /// Payment confirmed. For passthrough orders or deliveries deferred
    /// for lack of stock.
    PaymentCaptured {
        order_id: String,
        product_name: String,
        amount: Decimal,
        trade_no: Option<String>,
    },

    /// Payment captured but no inventory was available; admin should top
    /// up stock and re-fulfill.
    StockDepleted {
        order_id: String,
        product_id: String,
    },

    /// Periodic heartbeat.
    Tick,
}

impl ShopEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ShopEvent::OrderDelivered { .. } => "order_delivered",
            ShopEvent::PaymentCaptured { .. } => "payment_captured",
            ShopEvent::StockDepleted { .. } => "stock_depleted",
            ShopEvent::Tick => "tick",
        }
    }
}

/// Each subscriber gets its own bounded `mpsc::Sender` for guaranteed
/// delivery; a full buffer applies backpressure to `publish`.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<ShopEvent>>>>,
    shutdown_tx: watch::Sender<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
}

const DEFAULT_BUFFER_SIZE: usize = 1000;

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            subscribers: Arc::new(Mutex::new(vec![])),
            shutdown_tx: tx,
            shutdown_rx: rx,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    pub async fn subscribe(&self, buffer_size: Option<usize>) -> mpsc::Receiver<ShopEvent> {
        let size = buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let (tx, rx) = mpsc::channel(size);
        let mut subs = self.subscribers.lock().await;
        subs.push(tx);
        rx
    }

    pub async fn publish(&self, event: ShopEvent) {
        let senders = {
            let subs = self.subscribers.lock().await;
            subs.clone()
        };
        for s in senders {
            let _ = s.send(event.clone()).await;
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();

        let mut rx1 = bus.subscribe(Some(5)).await;
        let mut rx2 = bus.subscribe(Some(5)).await;

        bus.publish(ShopEvent::Tick).await;

        let evt1 = rx1.recv().await.expect("rx1 should get event");
        let evt2 = rx2.recv().await.expect("rx2 should get event");

        assert_eq!(evt1.event_type(), "tick");
        assert_eq!(evt2.event_type(), "tick");
    }

    #[tokio::test]
    async fn test_publish_carries_payload() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(Some(5)).await;

        bus.publish(ShopEvent::StockDepleted {
            order_id: "ORD1".into(),
            product_id: "p1".into(),
        })
        .await;

        match rx.recv().await.unwrap() {
            ShopEvent::StockDepleted { order_id, product_id } => {
                assert_eq!(order_id, "ORD1");
                assert_eq!(product_id, "p1");
            }
            other => panic!("wrong event type: {}", other.event_type()),
        }
    }
}
