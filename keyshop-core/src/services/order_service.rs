// File: keyshop-core/src/services/order_service.rs
//
// Buyer-facing order operations: pull-based payment reconciliation (for
// when the webhook has not arrived) and owner cancellation.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use keyshop_common::error::Error;
use keyshop_common::models::order::OrderStatus;
use keyshop_common::traits::gateway_traits::PaymentGateway;
use keyshop_common::traits::repository_traits::{CardRepository, OrderRepository, UserRepository};

use crate::services::compensation::cancel_pending_and_compensate;
use crate::services::fulfillment_service::FulfillmentService;

/// Who is asking. Ownership is satisfied by the order's user id or by the
/// short-lived pending-order cookie issued at checkout (anonymous buyers).
#[derive(Debug, Clone, Default)]
pub struct OrderAccess {
    pub user_id: Option<String>,
    pub pending_cookie: Option<String>,
}

impl OrderAccess {
    fn may_view(&self, order_user_id: Option<&str>, order_id: &str) -> bool {
        let has_cookie = self.pending_cookie.as_deref() == Some(order_id);
        match order_user_id {
            Some(owner) => self.user_id.as_deref() == Some(owner) || has_cookie,
            None => has_cookie,
        }
    }
}

pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    cards: Arc<dyn CardRepository>,
    users: Arc<dyn UserRepository>,
    gateway: Arc<dyn PaymentGateway>,
    fulfillment: Arc<FulfillmentService>,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        cards: Arc<dyn CardRepository>,
        users: Arc<dyn UserRepository>,
        gateway: Arc<dyn PaymentGateway>,
        fulfillment: Arc<FulfillmentService>,
    ) -> Self {
        Self {
            orders,
            cards,
            users,
            gateway,
            fulfillment,
        }
    }

    /// Force a reconciliation against the gateway when no webhook has
    /// arrived yet. Returns the order's (possibly updated) status.
    pub async fn check_order_status(
        &self,
        order_id: &str,
        access: &OrderAccess,
    ) -> Result<OrderStatus, Error> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("order {order_id}")))?;

        if matches!(order.status, OrderStatus::Paid | OrderStatus::Delivered) {
            return Ok(order.status);
        }

        if !access.may_view(order.user_id.as_deref(), order_id) {
            return Err(Error::Forbidden("not the order owner".into()));
        }

        // Query by the latest payment attempt id; older attempts would
        // report unpaid even after a successful retry.
        let payment_id = order.current_payment_id.as_deref().unwrap_or(order_id);
        let (status, gateway_info) = self.gateway.query_order_status(payment_id).await?;

        if !status.is_paid() {
            return Ok(order.status);
        }

        let paid_amount = gateway_info
            .money
            .as_deref()
            .and_then(|m| Decimal::from_str(m).ok())
            .unwrap_or(order.amount);
        let trade_no = gateway_info
            .trade_no
            .unwrap_or_else(|| format!("MANUAL_CHECK_{}", Utc::now().timestamp_millis()));

        info!(order_id, payment_id, "gateway reports payment; fulfilling");
        self.fulfillment
            .fulfill(order_id, paid_amount, &trade_no)
            .await?;

        let refreshed = self.orders.get(order_id).await?;
        Ok(refreshed.map(|o| o.status).unwrap_or(OrderStatus::Paid))
    }

    /// Owner cancellation of an unpaid order: release the reserved cards,
    /// flip to cancelled, credit points back.
    pub async fn cancel_pending_order(&self, order_id: &str, user_id: &str) -> Result<(), Error> {
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

        let flipped = cancel_pending_and_compensate(
            self.cards.as_ref(),
            self.orders.as_ref(),
            self.users.as_ref(),
            &order,
        )
        .await?;

        if !flipped {
            // Lost a race against fulfillment or the sweep; the current
            // state wins.
            warn!(order_id, "cancel found the order already transitioned");
        }
        Ok(())
    }
}
