use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::models::card::{Card, ReservedCard};
use crate::models::order::{Order, OrderStatus};
use crate::models::product::Product;
use crate::models::user::ShopUser;

/// Every mutation below is a single atomic statement against the store.
/// The store exposes no multi-statement transactions, so cross-row
/// invariants are enforced by conditional updates whose affected-row
/// counts tell callers whether they won the race.

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn get(&self, product_id: &str) -> Result<Option<Product>, Error>;

    /// Recompute the denormalized `sold_count`/`stock_cached` columns.
    /// Callers treat this as best-effort.
    async fn refresh_aggregates(&self, product_id: &str) -> Result<(), Error>;
}

#[async_trait]
pub trait CardRepository: Send + Sync {
    /// Claim one free card (unused, unreserved, unexpired) for `order_id`
    /// in a single conditional update. `None` means no free card existed
    /// at the instant the statement ran.
    async fn claim_free_card(
        &self,
        product_id: &str,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReservedCard>, Error>;

    /// Find one unused card whose reservation is older than `cutoff`
    /// (read-only; theft happens in `steal_reservation`).
    async fn find_stale_reservation(
        &self,
        product_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Card>, Error>;

    /// Re-assign a stale reservation to `new_order_id`, guarded on the row
    /// being unchanged since it was read: still unused, still stale, still
    /// reserved by `previous_order_id`. Zero affected rows means a
    /// concurrent claimant won.
    async fn steal_reservation(
        &self,
        card_id: i64,
        previous_order_id: Option<&str>,
        cutoff: DateTime<Utc>,
        new_order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReservedCard>, Error>;

    /// Pick one random unused, unexpired card of a shared product without
    /// touching its reservation state.
    async fn pick_shared_card(
        &self,
        product_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReservedCard>, Error>;

    /// Mark one card used, guarded by `is_used = false`. Returns whether
    /// the row transitioned (false: someone already consumed it).
    async fn consume_card(&self, card_id: i64, now: DateTime<Utc>) -> Result<bool, Error>;

    /// Consume up to `limit` cards reserved by `order_id`, returning the
    /// consumed keys. Guarded by `is_used = false`.
    async fn consume_reserved(
        &self,
        order_id: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservedCard>, Error>;

    /// Consume up to `limit` free (or stale-reserved) cards of the product
    /// directly, for fulfillment top-up.
    async fn consume_available(
        &self,
        product_id: &str,
        limit: i64,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservedCard>, Error>;

    /// Release every unused card reserved by `order_id`. Returns the
    /// number of cards returned to the pool.
    async fn release_for_order(&self, order_id: &str) -> Result<u64, Error>;

    /// Return consumed cards to stock (refund reclaim), by id.
    async fn restock_by_ids(&self, card_ids: &[i64]) -> Result<u64, Error>;

    /// Return consumed cards to stock by key, scoped to a product (legacy
    /// orders recorded keys only).
    async fn restock_by_keys(&self, product_id: &str, keys: &[String]) -> Result<u64, Error>;

    /// Free cards available for new reservations.
    async fn count_free(
        &self,
        product_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<i64, Error>;

    /// Unused cards regardless of reservation, for shared-stock checks.
    async fn count_unused(&self, product_id: &str) -> Result<i64, Error>;

    /// Delete unused cards whose `expires_at` has passed.
    async fn purge_expired(
        &self,
        product_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, Error>;

    /// Admin stock add.
    async fn add_cards(
        &self,
        product_id: &str,
        keys: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<u64, Error>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<(), Error>;

    async fn get(&self, order_id: &str) -> Result<Option<Order>, Error>;

    async fn mark_paid(
        &self,
        order_id: &str,
        trade_no: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), Error>;

    /// Conditional `pending -> paid` flip, used when reservation theft
    /// discovers the original order actually paid. Returns whether the
    /// row transitioned.
    async fn promote_pending_to_paid(
        &self,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, Error>;

    async fn mark_delivered(
        &self,
        order_id: &str,
        card_key: &str,
        card_ids: Option<&str>,
        trade_no: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), Error>;

    /// Record consumed keys/ids without changing status (partial
    /// fulfillment that ends in `paid`).
    async fn record_cards(
        &self,
        order_id: &str,
        card_key: &str,
        card_ids: Option<&str>,
    ) -> Result<(), Error>;

    /// Conditional `pending -> cancelled` flip. Returns whether the row
    /// transitioned; points are credited back only when it did.
    async fn cancel_if_pending(&self, order_id: &str) -> Result<bool, Error>;

    /// Flip to `status` unless the row is already there. Returns whether
    /// the row transitioned, so compensation (points credit, card reclaim)
    /// runs exactly once per state change.
    async fn set_status_if_not(&self, order_id: &str, status: OrderStatus) -> Result<bool, Error>;

    async fn set_current_payment_id(
        &self,
        order_id: &str,
        payment_id: Option<&str>,
    ) -> Result<(), Error>;

    async fn delete(&self, order_id: &str) -> Result<(), Error>;

    /// Total quantity this buyer (matched by user id or email) already
    /// holds in paid/delivered orders of the product.
    async fn purchased_quantity(
        &self,
        product_id: &str,
        user_id: Option<&str>,
        email: Option<&str>,
    ) -> Result<i64, Error>;

    /// Pending orders older than `cutoff`, optionally scoped to a product.
    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        product_id: Option<&str>,
    ) -> Result<Vec<Order>, Error>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<ShopUser>, Error>;

    async fn points(&self, user_id: &str) -> Result<i64, Error>;

    /// Single conditional decrement guarded by `points >= amount`.
    /// `None` means the guard failed (insufficient balance).
    async fn debit_points(&self, user_id: &str, amount: i64) -> Result<Option<i64>, Error>;

    /// Unconditional increment, used by refund/cancel compensation. Not
    /// naturally idempotent; callers invoke it once per compensating event.
    async fn credit_points(&self, user_id: &str, amount: i64) -> Result<(), Error>;

    /// Daily check-in: awards `reward` points at most once per UTC day via
    /// an atomic guard, maintaining the consecutive-day streak. `None`
    /// means the user already checked in today.
    async fn check_in(
        &self,
        user_id: &str,
        reward: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>, Error>;
}
