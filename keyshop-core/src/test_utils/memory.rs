// File: keyshop-core/src/test_utils/memory.rs
//
// In-memory repository implementations for engine tests. Each method holds
// one mutex for its whole body, which models exactly what the store gives
// us in production: one atomic statement at a time, with conditional
// updates reporting whether they affected a row.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use keyshop_common::error::Error;
use keyshop_common::models::card::{Card, ReservedCard};
use keyshop_common::models::order::{Order, OrderStatus};
use keyshop_common::models::payment::{GatewayOrderInfo, GatewayStatus};
use keyshop_common::models::product::Product;
use keyshop_common::models::user::ShopUser;
use keyshop_common::traits::gateway_traits::PaymentGateway;
use keyshop_common::traits::repository_traits::{
    CardRepository, OrderRepository, ProductRepository, UserRepository,
};

fn expired(card: &Card, now: DateTime<Utc>) -> bool {
    card.expires_at.is_some_and(|at| at <= now)
}

fn stale(card: &Card, cutoff: DateTime<Utc>) -> bool {
    card.reserved_at.is_some_and(|at| at < cutoff)
}

// ---------------------------------------------------------------- cards

#[derive(Default)]
pub struct MemoryCardRepository {
    cards: Mutex<Vec<Card>>,
    next_id: AtomicI64,
}

impl MemoryCardRepository {
    pub fn new() -> Self {
        Self {
            cards: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn add_card(&self, product_id: &str, key: &str, expires_at: Option<DateTime<Utc>>) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.cards.lock().unwrap().push(Card {
            id,
            product_id: product_id.to_string(),
            card_key: key.to_string(),
            is_used: false,
            used_at: None,
            reserved_order_id: None,
            reserved_at: None,
            expires_at,
            created_at: Utc::now(),
        });
        id
    }

    pub fn seed(&self, product_id: &str, count: usize) -> Vec<i64> {
        (0..count)
            .map(|i| self.add_card(product_id, &format!("KEY-{product_id}-{i}"), None))
            .collect()
    }

    pub fn get(&self, card_id: i64) -> Option<Card> {
        self.cards
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == card_id)
            .cloned()
    }

    /// Backdate or plant a reservation directly (stale-reservation tests).
    pub fn set_reservation(&self, card_id: i64, order_id: &str, reserved_at: DateTime<Utc>) {
        let mut cards = self.cards.lock().unwrap();
        if let Some(card) = cards.iter_mut().find(|c| c.id == card_id) {
            card.reserved_order_id = Some(order_id.to_string());
            card.reserved_at = Some(reserved_at);
        }
    }
}

#[async_trait]
impl CardRepository for MemoryCardRepository {
    async fn claim_free_card(
        &self,
        product_id: &str,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReservedCard>, Error> {
        let mut cards = self.cards.lock().unwrap();
        let found = cards.iter_mut().find(|c| {
            c.product_id == product_id && !c.is_used && c.reserved_at.is_none() && !expired(c, now)
        });
        Ok(found.map(|c| {
            c.reserved_order_id = Some(order_id.to_string());
            c.reserved_at = Some(now);
            ReservedCard {
                id: c.id,
                key: c.card_key.clone(),
            }
        }))
    }

    async fn find_stale_reservation(
        &self,
        product_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Card>, Error> {
        let cards = self.cards.lock().unwrap();
        Ok(cards
            .iter()
            .filter(|c| {
                c.product_id == product_id && !c.is_used && stale(c, cutoff) && !expired(c, now)
            })
            .min_by_key(|c| c.reserved_at)
            .cloned())
    }

    async fn steal_reservation(
        &self,
        card_id: i64,
        previous_order_id: Option<&str>,
        cutoff: DateTime<Utc>,
        new_order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReservedCard>, Error> {
        let mut cards = self.cards.lock().unwrap();
        let found = cards.iter_mut().find(|c| {
            c.id == card_id
                && !c.is_used
                && stale(c, cutoff)
                && c.reserved_order_id.as_deref() == previous_order_id
        });
        Ok(found.map(|c| {
            c.reserved_order_id = Some(new_order_id.to_string());
            c.reserved_at = Some(now);
            ReservedCard {
                id: c.id,
                key: c.card_key.clone(),
            }
        }))
    }

    async fn pick_shared_card(
        &self,
        product_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReservedCard>, Error> {
        let cards = self.cards.lock().unwrap();
        Ok(cards
            .iter()
            .find(|c| c.product_id == product_id && !c.is_used && !expired(c, now))
            .map(|c| ReservedCard {
                id: c.id,
                key: c.card_key.clone(),
            }))
    }

    async fn consume_card(&self, card_id: i64, now: DateTime<Utc>) -> Result<bool, Error> {
        let mut cards = self.cards.lock().unwrap();
        match cards.iter_mut().find(|c| c.id == card_id && !c.is_used) {
            Some(c) => {
                c.is_used = true;
                c.used_at = Some(now);
                c.reserved_order_id = None;
                c.reserved_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn consume_reserved(
        &self,
        order_id: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservedCard>, Error> {
        let mut cards = self.cards.lock().unwrap();
        let mut out = Vec::new();
        for c in cards.iter_mut() {
            if out.len() as i64 >= limit {
                break;
            }
            if c.reserved_order_id.as_deref() == Some(order_id) && !c.is_used {
                c.is_used = true;
                c.used_at = Some(now);
                c.reserved_order_id = None;
                c.reserved_at = None;
                out.push(ReservedCard {
                    id: c.id,
                    key: c.card_key.clone(),
                });
            }
        }
        Ok(out)
    }

    async fn consume_available(
        &self,
        product_id: &str,
        limit: i64,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservedCard>, Error> {
        let mut cards = self.cards.lock().unwrap();
        let mut out = Vec::new();
        for c in cards.iter_mut() {
            if out.len() as i64 >= limit {
                break;
            }
            if c.product_id == product_id
                && !c.is_used
                && (c.reserved_at.is_none() || stale(c, cutoff))
                && !expired(c, now)
            {
                c.is_used = true;
                c.used_at = Some(now);
                c.reserved_order_id = None;
                c.reserved_at = None;
                out.push(ReservedCard {
                    id: c.id,
                    key: c.card_key.clone(),
                });
            }
        }
        Ok(out)
    }

    async fn release_for_order(&self, order_id: &str) -> Result<u64, Error> {
        let mut cards = self.cards.lock().unwrap();
        let mut released = 0;
        for c in cards.iter_mut() {
            if c.reserved_order_id.as_deref() == Some(order_id) && !c.is_used {
                c.reserved_order_id = None;
                c.reserved_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn restock_by_ids(&self, card_ids: &[i64]) -> Result<u64, Error> {
        let mut cards = self.cards.lock().unwrap();
        let mut restocked = 0;
        for c in cards.iter_mut() {
            if card_ids.contains(&c.id) {
                c.is_used = false;
                c.used_at = None;
                c.reserved_order_id = None;
                c.reserved_at = None;
                restocked += 1;
            }
        }
        Ok(restocked)
    }

    async fn restock_by_keys(&self, product_id: &str, keys: &[String]) -> Result<u64, Error> {
        let mut cards = self.cards.lock().unwrap();
        let mut restocked = 0;
        for c in cards.iter_mut() {
            if c.product_id == product_id && keys.contains(&c.card_key) {
                c.is_used = false;
                c.used_at = None;
                c.reserved_order_id = None;
                c.reserved_at = None;
                restocked += 1;
            }
        }
        Ok(restocked)
    }

    async fn count_free(
        &self,
        product_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<i64, Error> {
        let cards = self.cards.lock().unwrap();
        Ok(cards
            .iter()
            .filter(|c| {
                c.product_id == product_id
                    && !c.is_used
                    && (c.reserved_at.is_none() || stale(c, cutoff))
                    && !expired(c, now)
            })
            .count() as i64)
    }

    async fn count_unused(&self, product_id: &str) -> Result<i64, Error> {
        let cards = self.cards.lock().unwrap();
        Ok(cards
            .iter()
            .filter(|c| c.product_id == product_id && !c.is_used)
            .count() as i64)
    }

    async fn purge_expired(
        &self,
        product_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, Error> {
        let mut cards = self.cards.lock().unwrap();
        let before = cards.len();
        cards.retain(|c| {
            let in_scope = product_id.is_none_or(|p| c.product_id == p);
            !(in_scope && !c.is_used && expired(c, now))
        });
        Ok((before - cards.len()) as u64)
    }

    async fn add_cards(
        &self,
        product_id: &str,
        keys: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<u64, Error> {
        for key in keys {
            self.add_card(product_id, key, expires_at);
        }
        Ok(keys.len() as u64)
    }
}

// --------------------------------------------------------------- orders

#[derive(Default)]
pub struct MemoryOrderRepository {
    orders: Mutex<Vec<Order>>,
    fail_next_insert: AtomicBool,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next insert fail, for exercising saga compensation.
    pub fn fail_next_insert(&self) {
        self.fail_next_insert.store(true, Ordering::SeqCst);
    }

    pub fn all(&self) -> Vec<Order> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn insert(&self, order: &Order) -> Result<(), Error> {
        if self.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(Error::Parse("simulated insert failure".into()));
        }
        let mut orders = self.orders.lock().unwrap();
        if orders.iter().any(|o| o.order_id == order.order_id) {
            return Err(Error::InvalidState(format!(
                "duplicate order id {}",
                order.order_id
            )));
        }
        orders.push(order.clone());
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<Order>, Error> {
        let orders = self.orders.lock().unwrap();
        Ok(orders.iter().find(|o| o.order_id == order_id).cloned())
    }

    async fn mark_paid(
        &self,
        order_id: &str,
        trade_no: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(o) = orders.iter_mut().find(|o| o.order_id == order_id) {
            o.status = OrderStatus::Paid;
            o.paid_at = Some(now);
            if let Some(t) = trade_no {
                o.trade_no = Some(t.to_string());
            }
        }
        Ok(())
    }

    async fn promote_pending_to_paid(
        &self,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut orders = self.orders.lock().unwrap();
        match orders
            .iter_mut()
            .find(|o| o.order_id == order_id && o.status == OrderStatus::Pending)
        {
            Some(o) => {
                o.status = OrderStatus::Paid;
                o.paid_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_delivered(
        &self,
        order_id: &str,
        card_key: &str,
        card_ids: Option<&str>,
        trade_no: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(o) = orders.iter_mut().find(|o| o.order_id == order_id) {
            o.status = OrderStatus::Delivered;
            o.paid_at = o.paid_at.or(Some(now));
            o.delivered_at = Some(now);
            o.card_key = Some(card_key.to_string());
            o.card_ids = card_ids.map(String::from);
            if let Some(t) = trade_no {
                o.trade_no = Some(t.to_string());
            }
            o.current_payment_id = None;
        }
        Ok(())
    }

    async fn record_cards(
        &self,
        order_id: &str,
        card_key: &str,
        card_ids: Option<&str>,
    ) -> Result<(), Error> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(o) = orders.iter_mut().find(|o| o.order_id == order_id) {
            o.card_key = Some(card_key.to_string());
            o.card_ids = card_ids.map(String::from);
        }
        Ok(())
    }

    async fn cancel_if_pending(&self, order_id: &str) -> Result<bool, Error> {
        let mut orders = self.orders.lock().unwrap();
        match orders
            .iter_mut()
            .find(|o| o.order_id == order_id && o.status == OrderStatus::Pending)
        {
            Some(o) => {
                o.status = OrderStatus::Cancelled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_status_if_not(&self, order_id: &str, status: OrderStatus) -> Result<bool, Error> {
        let mut orders = self.orders.lock().unwrap();
        match orders
            .iter_mut()
            .find(|o| o.order_id == order_id && o.status != status)
        {
            Some(o) => {
                o.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_current_payment_id(
        &self,
        order_id: &str,
        payment_id: Option<&str>,
    ) -> Result<(), Error> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(o) = orders.iter_mut().find(|o| o.order_id == order_id) {
            o.current_payment_id = payment_id.map(String::from);
        }
        Ok(())
    }

    async fn delete(&self, order_id: &str) -> Result<(), Error> {
        let mut orders = self.orders.lock().unwrap();
        orders.retain(|o| o.order_id != order_id);
        Ok(())
    }

    async fn purchased_quantity(
        &self,
        product_id: &str,
        user_id: Option<&str>,
        email: Option<&str>,
    ) -> Result<i64, Error> {
        if user_id.is_none() && email.is_none() {
            return Ok(0);
        }
        let orders = self.orders.lock().unwrap();
        Ok(orders
            .iter()
            .filter(|o| {
                o.product_id == product_id
                    && matches!(o.status, OrderStatus::Paid | OrderStatus::Delivered)
                    && ((user_id.is_some() && o.user_id.as_deref() == user_id)
                        || (email.is_some() && o.email.as_deref() == email))
            })
            .map(|o| o.quantity as i64)
            .sum())
    }

    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        product_id: Option<&str>,
    ) -> Result<Vec<Order>, Error> {
        let orders = self.orders.lock().unwrap();
        Ok(orders
            .iter()
            .filter(|o| {
                o.status == OrderStatus::Pending
                    && o.created_at < cutoff
                    && product_id.is_none_or(|p| o.product_id == p)
            })
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------- users

#[derive(Default)]
pub struct MemoryUserRepository {
    users: Mutex<HashMap<String, ShopUser>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: &str, points: i64) {
        self.users.lock().unwrap().insert(
            user_id.to_string(),
            ShopUser {
                user_id: user_id.to_string(),
                username: Some(user_id.to_string()),
                email: Some(format!("{user_id}@example.com")),
                points,
                is_blocked: false,
                last_checkin_at: None,
                consecutive_days: 0,
                created_at: Utc::now(),
            },
        );
    }

    pub fn block_user(&self, user_id: &str) {
        if let Some(u) = self.users.lock().unwrap().get_mut(user_id) {
            u.is_blocked = true;
        }
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn get(&self, user_id: &str) -> Result<Option<ShopUser>, Error> {
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }

    async fn points(&self, user_id: &str) -> Result<i64, Error> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .get(user_id)
            .map(|u| u.points)
            .unwrap_or(0))
    }

    async fn debit_points(&self, user_id: &str, amount: i64) -> Result<Option<i64>, Error> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(user_id) {
            Some(u) if u.points >= amount => {
                u.points -= amount;
                Ok(Some(u.points))
            }
            _ => Ok(None),
        }
    }

    async fn credit_points(&self, user_id: &str, amount: i64) -> Result<(), Error> {
        if let Some(u) = self.users.lock().unwrap().get_mut(user_id) {
            u.points += amount;
        }
        Ok(())
    }

    async fn check_in(
        &self,
        user_id: &str,
        reward: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>, Error> {
        let today_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        let yesterday_start = today_start - Duration::days(1);

        let mut users = self.users.lock().unwrap();
        let Some(u) = users.get_mut(user_id) else {
            return Ok(None);
        };
        if u.last_checkin_at.is_some_and(|at| at >= today_start) {
            return Ok(None);
        }
        let streak_continues = u
            .last_checkin_at
            .is_some_and(|at| at >= yesterday_start && at < today_start);
        u.points += reward;
        u.consecutive_days = if streak_continues {
            u.consecutive_days + 1
        } else {
            1
        };
        u.last_checkin_at = Some(now);
        Ok(Some(u.consecutive_days))
    }
}

// ------------------------------------------------------------- products

#[derive(Default)]
pub struct MemoryProductRepository {
    products: Mutex<HashMap<String, Product>>,
}

impl MemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product: Product) {
        self.products
            .lock()
            .unwrap()
            .insert(product.id.clone(), product);
    }
}

#[async_trait]
impl ProductRepository for MemoryProductRepository {
    async fn get(&self, product_id: &str) -> Result<Option<Product>, Error> {
        Ok(self.products.lock().unwrap().get(product_id).cloned())
    }

    async fn refresh_aggregates(&self, _product_id: &str) -> Result<(), Error> {
        Ok(())
    }
}

// -------------------------------------------------------------- gateway

/// Scripted gateway: tests declare per-payment-id outcomes up front.
#[derive(Default)]
pub struct StubGateway {
    responses: Mutex<HashMap<String, (GatewayStatus, GatewayOrderInfo)>>,
    offline: AtomicBool,
    refund_processed: AtomicBool,
}

impl StubGateway {
    pub fn new() -> Self {
        let gw = Self::default();
        gw.refund_processed.store(true, Ordering::SeqCst);
        gw
    }

    pub fn set_status(&self, payment_id: &str, status: GatewayStatus) {
        self.responses.lock().unwrap().insert(
            payment_id.to_string(),
            (status, GatewayOrderInfo::default()),
        );
    }

    pub fn set_paid(&self, payment_id: &str, money: &str, trade_no: &str) {
        self.responses.lock().unwrap().insert(
            payment_id.to_string(),
            (
                GatewayStatus::Paid,
                GatewayOrderInfo {
                    trade_no: Some(trade_no.to_string()),
                    money: Some(money.to_string()),
                },
            ),
        );
    }

    /// Every query errors, as if the gateway were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_refund_processed(&self, processed: bool) {
        self.refund_processed.store(processed, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn query_order_status(
        &self,
        payment_id: &str,
    ) -> Result<(GatewayStatus, GatewayOrderInfo), Error> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Gateway("stub gateway offline".into()));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .unwrap_or((GatewayStatus::Unpaid, GatewayOrderInfo::default())))
    }

    async fn refund(&self, _order: &Order) -> Result<bool, Error> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Gateway("stub gateway offline".into()));
        }
        Ok(self.refund_processed.load(Ordering::SeqCst))
    }
}
