// File: keyshop-core/src/services/checkout_service.rs
//
// Order creation. There is no surrounding transaction: the sequence is
// reservation (atomic per card), points debit (atomic conditional
// decrement), order insert, with a named compensating credit if the insert
// fails after the debit.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};

use keyshop_common::config::{ShopConfig, INFINITE_STOCK, MAX_ORDER_QUANTITY};
use keyshop_common::error::Error;
use keyshop_common::models::order::{Order, OrderStatus};
use keyshop_common::models::payment::PaymentRequest;
use keyshop_common::models::product::{Product, PAYMENT_PRODUCT_ID, PAYMENT_PRODUCT_NAME};
use keyshop_common::traits::repository_traits::{
    CardRepository, OrderRepository, ProductRepository, UserRepository,
};

use crate::crypto::generate_order_id;
use crate::eventbus::{EventBus, ShopEvent};
use crate::gateway::build_payment_request;
use crate::services::compensation::refund_points_after_failed_insert;
use crate::services::reservation::ReservationManager;
use crate::tasks::expiry_sweep;

pub const POINTS_REDEMPTION_TRADE_NO: &str = "POINTS_REDEMPTION";

#[derive(Debug, Clone, Default)]
pub struct CheckoutRequest {
    pub product_id: String,
    pub quantity: i32,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub use_points: bool,
}

#[derive(Debug)]
pub enum CheckoutOutcome {
    /// Zero-price order, delivered immediately.
    Delivered { order_id: String },
    /// Pending order awaiting payment; redirect the buyer to the gateway.
    PendingPayment {
        order_id: String,
        payment: PaymentRequest,
    },
}

pub struct CheckoutService {
    products: Arc<dyn ProductRepository>,
    cards: Arc<dyn CardRepository>,
    orders: Arc<dyn OrderRepository>,
    users: Arc<dyn UserRepository>,
    reservations: ReservationManager,
    event_bus: EventBus,
    config: ShopConfig,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        products: Arc<dyn ProductRepository>,
        cards: Arc<dyn CardRepository>,
        orders: Arc<dyn OrderRepository>,
        users: Arc<dyn UserRepository>,
        reservations: ReservationManager,
        event_bus: EventBus,
        config: ShopConfig,
    ) -> Self {
        Self {
            products,
            cards,
            orders,
            users,
            reservations,
            event_bus,
            config,
        }
    }

    pub async fn create_order(&self, request: CheckoutRequest) -> Result<CheckoutOutcome, Error> {
        let quantity = request.quantity;
        if quantity <= 0 {
            return Err(Error::InvalidState("quantity must be positive".into()));
        }

        let product = self
            .products
            .get(&request.product_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("product {}", request.product_id)))?;

        let max_quantity = product
            .effective_purchase_limit()
            .unwrap_or(MAX_ORDER_QUANTITY);
        if quantity > max_quantity {
            return Err(Error::InvalidState(format!(
                "quantity {quantity} exceeds the limit of {max_quantity}"
            )));
        }

        let buyer = match request.user_id.as_deref() {
            Some(uid) => self.users.get(uid).await?,
            None => None,
        };
        if buyer.as_ref().is_some_and(|u| u.is_blocked) {
            return Err(Error::Forbidden("user is blocked".into()));
        }

        // Best-effort pre-clean so the stock check sees reclaimable rows.
        let now = Utc::now();
        if let Err(e) = self.cards.purge_expired(Some(&product.id), now).await {
            warn!("expired-card purge before checkout failed: {e}");
        }
        if let Err(e) = expiry_sweep::cancel_stale_pending_orders(
            self.cards.as_ref(),
            self.orders.as_ref(),
            self.users.as_ref(),
            now - self.config.reservation_ttl,
            Some(&product.id),
        )
        .await
        {
            warn!("stale-order sweep before checkout failed: {e}");
        }

        // Tentative points discount: 1 point = 1 currency unit, no debit yet.
        let gross = product.price * Decimal::from(quantity);
        let mut points_to_use: i64 = 0;
        let mut amount = gross;
        if request.use_points {
            if let Some(user) = &buyer {
                if user.points > 0 {
                    let ceiled = gross.ceil().to_i64().unwrap_or(0);
                    points_to_use = user.points.min(ceiled);
                    amount = (gross - Decimal::from(points_to_use)).max(Decimal::ZERO);
                }
            }
        }
        let is_zero_price = amount <= Decimal::ZERO;

        let resolved_email = request
            .email
            .clone()
            .or_else(|| buyer.as_ref().and_then(|u| u.email.clone()));
        let username = request
            .username
            .clone()
            .or_else(|| buyer.as_ref().and_then(|u| u.username.clone()));

        self.check_stock(&product, quantity, now).await?;
        self.check_purchase_limit(&product, quantity, request.user_id.as_deref(), resolved_email.as_deref())
            .await?;

        let order_id = generate_order_id();
        let reserved = self
            .reservations
            .reserve(&product, &order_id, quantity)
            .await?;
        let joined_keys = reserved
            .iter()
            .map(|c| c.key.clone())
            .collect::<Vec<_>>()
            .join("\n");
        let card_ids = Order::join_card_ids(&reserved.iter().map(|c| c.id).collect::<Vec<_>>());

        // Debit after the reservation held: a failed debit leaves the cards
        // reserved to an order id that never materializes, which the TTL
        // sweep reclaims.
        let mut points_debited = false;
        if points_to_use > 0 {
            if let Some(user_id) = request.user_id.as_deref() {
                match self.users.debit_points(user_id, points_to_use).await? {
                    Some(_) => points_debited = true,
                    None => return Err(Error::InsufficientPoints(user_id.to_string())),
                }
            }
        }

        let outcome = if is_zero_price {
            self.deliver_zero_price(
                &product,
                &order_id,
                quantity,
                points_to_use,
                amount,
                &reserved.iter().map(|c| c.id).collect::<Vec<_>>(),
                &joined_keys,
                card_ids.as_deref(),
                resolved_email.clone(),
                request.user_id.clone(),
                username,
            )
            .await
        } else {
            self.insert_pending(
                &product,
                &order_id,
                quantity,
                points_to_use,
                amount,
                card_ids.as_deref(),
                resolved_email.clone(),
                request.user_id.clone(),
                username,
            )
            .await
        };

        match outcome {
            Ok(result) => {
                if let Err(e) = self.products.refresh_aggregates(&product.id).await {
                    warn!("aggregate refresh after checkout failed: {e}");
                }
                Ok(result)
            }
            Err(e) => {
                // Saga compensation: the order row never landed, so the
                // debit must be undone.
                if points_debited {
                    if let Some(user_id) = request.user_id.as_deref() {
                        refund_points_after_failed_insert(
                            self.users.as_ref(),
                            user_id,
                            points_to_use,
                        )
                        .await;
                    }
                }
                Err(e)
            }
        }
    }

    async fn check_stock(
        &self,
        product: &Product,
        quantity: i32,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), Error> {
        let stock = if product.is_shared {
            // Any unused card means effectively unbounded stock.
            if self.cards.count_unused(&product.id).await? > 0 {
                INFINITE_STOCK
            } else {
                0
            }
        } else {
            let cutoff = now - self.config.reservation_ttl;
            self.cards.count_free(&product.id, cutoff, now).await?
        };

        if stock < quantity as i64 {
            return Err(Error::StockLocked(product.id.clone()));
        }
        Ok(())
    }

    async fn check_purchase_limit(
        &self,
        product: &Product,
        quantity: i32,
        user_id: Option<&str>,
        email: Option<&str>,
    ) -> Result<(), Error> {
        let Some(limit) = product.effective_purchase_limit() else {
            return Ok(());
        };
        let existing = self
            .orders
            .purchased_quantity(&product.id, user_id, email)
            .await?;
        if existing + quantity as i64 > limit as i64 {
            return Err(Error::Forbidden(format!(
                "purchase limit of {limit} reached for product {}",
                product.id
            )));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn deliver_zero_price(
        &self,
        product: &Product,
        order_id: &str,
        quantity: i32,
        points_used: i64,
        amount: Decimal,
        card_ids: &[i64],
        joined_keys: &str,
        card_ids_value: Option<&str>,
        email: Option<String>,
        user_id: Option<String>,
        username: Option<String>,
    ) -> Result<CheckoutOutcome, Error> {
        let now = Utc::now();

        // Shared products keep their card unconsumed unless the zero-price
        // anti-abuse policy says otherwise.
        let consume = !product.is_shared || self.config.consume_shared_zero_price;
        if consume {
            // Shared reservations repeat one card id; consume each once.
            let mut unique_ids: Vec<i64> = Vec::new();
            for id in card_ids {
                if !unique_ids.contains(id) {
                    unique_ids.push(*id);
                }
            }
            for card_id in &unique_ids {
                if !self.cards.consume_card(*card_id, now).await? {
                    warn!(
                        card_id = *card_id,
                        order_id, "card was already consumed during zero-price delivery"
                    );
                }
            }
        }

        let order = Order {
            order_id: order_id.to_string(),
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            status: OrderStatus::Delivered,
            amount,
            quantity,
            points_used,
            current_payment_id: None,
            card_key: Some(joined_keys.to_string()),
            card_ids: card_ids_value.map(String::from),
            trade_no: Some(POINTS_REDEMPTION_TRADE_NO.to_string()),
            email: email.clone(),
            user_id: user_id.clone(),
            username,
            payee: None,
            created_at: now,
            paid_at: Some(now),
            delivered_at: Some(now),
        };
        self.orders.insert(&order).await?;

        info!(order_id, product_id = %product.id, "zero-price order delivered");
        self.event_bus
            .publish(ShopEvent::OrderDelivered {
                order_id: order_id.to_string(),
                product_name: product.name.clone(),
                card_keys: joined_keys.to_string(),
                email,
                user_id,
            })
            .await;

        Ok(CheckoutOutcome::Delivered {
            order_id: order_id.to_string(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_pending(
        &self,
        product: &Product,
        order_id: &str,
        quantity: i32,
        points_used: i64,
        amount: Decimal,
        card_ids_value: Option<&str>,
        email: Option<String>,
        user_id: Option<String>,
        username: Option<String>,
    ) -> Result<CheckoutOutcome, Error> {
        let order = Order {
            order_id: order_id.to_string(),
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            status: OrderStatus::Pending,
            amount,
            quantity,
            points_used,
            current_payment_id: Some(order_id.to_string()),
            card_key: None,
            card_ids: card_ids_value.map(String::from),
            trade_no: None,
            email,
            user_id,
            username,
            payee: None,
            created_at: Utc::now(),
            paid_at: None,
            delivered_at: None,
        };
        self.orders.insert(&order).await?;

        let payment =
            build_payment_request(&self.config, order_id, order_id, &product.name, amount);
        Ok(CheckoutOutcome::PendingPayment {
            order_id: order_id.to_string(),
            payment,
        })
    }

    /// Re-sign payment parameters for a pending order, stamping a fresh
    /// `current_payment_id` so the gateway sees a distinct attempt.
    pub async fn retry_payment_params(
        &self,
        order_id: &str,
        user_id: &str,
    ) -> Result<PaymentRequest, Error> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("order {order_id}")))?;

        if order.user_id.as_deref() != Some(user_id) {
            return Err(Error::Forbidden("not the order owner".into()));
        }
        if order.status != OrderStatus::Pending {
            return Err(Error::InvalidState(format!(
                "order {order_id} is {}, not pending",
                order.status.as_str()
            )));
        }

        let payment_id = format!("{}_retry{}", order_id, Utc::now().timestamp_millis());
        self.orders
            .set_current_payment_id(order_id, Some(&payment_id))
            .await?;

        Ok(build_payment_request(
            &self.config,
            &payment_id,
            order_id,
            &order.product_name,
            order.amount,
        ))
    }

    /// Flat payment passthrough: an order not backed by inventory, payable
    /// to one of the allowlisted admins.
    pub async fn create_payment_order(
        &self,
        amount: Decimal,
        payee: Option<&str>,
        user_id: Option<String>,
        username: Option<String>,
        email: Option<String>,
    ) -> Result<(String, PaymentRequest), Error> {
        let amount = amount.round_dp(2);
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidState("payment amount must be positive".into()));
        }

        let resolved_payee = payee
            .and_then(|candidate| {
                self.config
                    .admin_usernames
                    .iter()
                    .find(|name| name.eq_ignore_ascii_case(candidate.trim()))
                    .cloned()
            })
            .or_else(|| self.config.admin_usernames.first().cloned());

        let order_id = generate_order_id();
        let order = Order {
            order_id: order_id.clone(),
            product_id: PAYMENT_PRODUCT_ID.to_string(),
            product_name: PAYMENT_PRODUCT_NAME.to_string(),
            status: OrderStatus::Pending,
            amount,
            quantity: 1,
            points_used: 0,
            current_payment_id: Some(order_id.clone()),
            card_key: None,
            card_ids: None,
            trade_no: None,
            email,
            user_id,
            username,
            payee: resolved_payee,
            created_at: Utc::now(),
            paid_at: None,
            delivered_at: None,
        };
        self.orders.insert(&order).await?;

        let payment = build_payment_request(
            &self.config,
            &order_id,
            &order_id,
            PAYMENT_PRODUCT_NAME,
            amount,
        );
        Ok((order_id, payment))
    }
}

