// File: keyshop-core/src/services/admin_service.rs
//
// Admin order operations, consumed as plain function calls by the
// surrounding CRUD layer. Every path routes through the same compensation
// steps as the automated flows; nothing here mutates state ad hoc. The
// caller's identity is checked against the allowlist injected via
// ShopConfig, never global state.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use keyshop_common::error::Error;
use keyshop_common::models::order::{Order, OrderStatus};
use keyshop_common::models::payment::GatewayStatus;
use keyshop_common::traits::gateway_traits::PaymentGateway;
use keyshop_common::traits::repository_traits::{
    CardRepository, OrderRepository, ProductRepository, UserRepository,
};
use keyshop_common::ShopConfig;

use crate::services::compensation::{cancel_pending_and_compensate, credit_points_best_effort};

pub struct AdminOrderService {
    products: Arc<dyn ProductRepository>,
    cards: Arc<dyn CardRepository>,
    orders: Arc<dyn OrderRepository>,
    users: Arc<dyn UserRepository>,
    gateway: Arc<dyn PaymentGateway>,
    config: ShopConfig,
}

impl AdminOrderService {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        cards: Arc<dyn CardRepository>,
        orders: Arc<dyn OrderRepository>,
        users: Arc<dyn UserRepository>,
        gateway: Arc<dyn PaymentGateway>,
        config: ShopConfig,
    ) -> Self {
        Self {
            products,
            cards,
            orders,
            users,
            gateway,
            config,
        }
    }

    fn check_admin(&self, username: &str) -> Result<(), Error> {
        if self.config.is_admin(username) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!("{username} is not an admin")))
        }
    }

    async fn get_order(&self, order_id: &str) -> Result<Order, Error> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("order {order_id}")))
    }

    pub async fn mark_order_paid(&self, admin: &str, order_id: &str) -> Result<(), Error> {
        self.check_admin(admin)?;
        let order = self.get_order(order_id).await?;
        self.orders.mark_paid(order_id, None, Utc::now()).await?;
        self.refresh_aggregates(&order.product_id).await;
        Ok(())
    }

    pub async fn mark_order_delivered(&self, admin: &str, order_id: &str) -> Result<(), Error> {
        self.check_admin(admin)?;
        let order = self.get_order(order_id).await?;
        let card_key = order.card_key.as_deref().ok_or_else(|| {
            Error::InvalidState(format!(
                "order {order_id} has no recorded card key; cannot mark delivered"
            ))
        })?;
        self.orders
            .mark_delivered(order_id, card_key, order.card_ids.as_deref(), None, Utc::now())
            .await?;
        self.refresh_aggregates(&order.product_id).await;
        Ok(())
    }

    /// Cancel from any state. For pending orders this is the shared
    /// release/flip/credit sequence; for orders past pending, the flip is
    /// still conditional so the points credit runs at most once.
    pub async fn cancel_order(&self, admin: &str, order_id: &str) -> Result<(), Error> {
        self.check_admin(admin)?;
        let order = self.get_order(order_id).await?;

        if order.status == OrderStatus::Pending {
            cancel_pending_and_compensate(
                self.cards.as_ref(),
                self.orders.as_ref(),
                self.users.as_ref(),
                &order,
            )
            .await?;
        } else {
            self.cards.release_for_order(order_id).await?;
            let flipped = self
                .orders
                .set_status_if_not(order_id, OrderStatus::Cancelled)
                .await?;
            if flipped {
                credit_points_best_effort(self.users.as_ref(), &order).await;
            }
        }

        self.refresh_aggregates(&order.product_id).await;
        Ok(())
    }

    /// Mark refunded: credit points back, return delivered cards to stock
    /// (policy- and shared-dependent), flip the status.
    pub async fn mark_order_refunded(&self, admin: &str, order_id: &str) -> Result<(), Error> {
        self.check_admin(admin)?;
        let order = self.get_order(order_id).await?;

        let flipped = self
            .orders
            .set_status_if_not(order_id, OrderStatus::Refunded)
            .await?;
        if !flipped {
            return Ok(());
        }

        credit_points_best_effort(self.users.as_ref(), &order).await;

        if self.should_reclaim(&order).await {
            let ids = order.parsed_card_ids();
            let reclaimed = if !ids.is_empty() {
                self.cards.restock_by_ids(&ids).await?
            } else if let Some(card_key) = &order.card_key {
                let keys: Vec<String> = card_key
                    .split('\n')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect();
                self.cards.restock_by_keys(&order.product_id, &keys).await?
            } else {
                0
            };
            info!(order_id, reclaimed, "cards returned to stock on refund");
        }

        self.refresh_aggregates(&order.product_id).await;
        Ok(())
    }

    async fn should_reclaim(&self, order: &Order) -> bool {
        if !self.config.refund_reclaim_cards {
            return false;
        }
        // Shared cards were never consumed, so there is nothing to reclaim.
        match self.products.get(&order.product_id).await {
            Ok(Some(p)) => !p.is_shared,
            Ok(None) => true,
            Err(e) => {
                warn!(order_id = %order.order_id, "product lookup during refund failed: {e}");
                true
            }
        }
    }

    /// Hard delete (admin purge): reverse points, release holds, drop the
    /// row. Repeat calls are no-ops because the row is gone.
    pub async fn delete_order(&self, admin: &str, order_id: &str) -> Result<(), Error> {
        self.check_admin(admin)?;
        let Some(order) = self.orders.get(order_id).await? else {
            return Ok(());
        };

        credit_points_best_effort(self.users.as_ref(), &order).await;
        self.cards.release_for_order(order_id).await?;
        self.orders.delete(order_id).await?;

        info!(order_id, "order purged");
        self.refresh_aggregates(&order.product_id).await;
        Ok(())
    }

    pub async fn delete_orders(&self, admin: &str, order_ids: &[String]) -> Result<(), Error> {
        self.check_admin(admin)?;
        for order_id in order_ids {
            let id = order_id.trim();
            if id.is_empty() {
                continue;
            }
            self.delete_order(admin, id).await?;
        }
        Ok(())
    }

    /// Ask the gateway whether a refund actually landed; if so, route
    /// through the same refund bookkeeping as `mark_order_refunded`.
    pub async fn verify_refund_status(
        &self,
        admin: &str,
        order_id: &str,
    ) -> Result<GatewayStatus, Error> {
        self.check_admin(admin)?;
        let (status, _) = self.gateway.query_order_status(order_id).await?;
        if status == GatewayStatus::Refunded {
            self.mark_order_refunded(admin, order_id).await?;
        }
        Ok(status)
    }

    /// Proxy a refund through the gateway, then apply refund bookkeeping
    /// if the gateway confirms it.
    pub async fn proxy_refund(&self, admin: &str, order_id: &str) -> Result<bool, Error> {
        self.check_admin(admin)?;
        let order = self.get_order(order_id).await?;

        let processed = self.gateway.refund(&order).await?;
        if processed {
            self.mark_order_refunded(admin, order_id).await?;
        }
        Ok(processed)
    }

    /// Admin stock add.
    pub async fn add_cards(
        &self,
        admin: &str,
        product_id: &str,
        keys: &[String],
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<u64, Error> {
        self.check_admin(admin)?;
        let added = self.cards.add_cards(product_id, keys, expires_at).await?;
        self.refresh_aggregates(product_id).await;
        Ok(added)
    }

    async fn refresh_aggregates(&self, product_id: &str) {
        if let Err(e) = self.products.refresh_aggregates(product_id).await {
            warn!(product_id, "aggregate refresh failed: {e}");
        }
    }
}
