// File: keyshop-core/src/tasks/expiry_sweep.rs
//
// Periodic reclamation of abandoned inventory: expired cards are purged
// and stale pending orders are cancelled so their cards return to the
// pool. Idempotent and safe to run concurrently with live traffic: every
// step acts only on rows matching an age predicate, and the cancel flip is
// conditional.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use keyshop_common::error::Error;
use keyshop_common::traits::repository_traits::{CardRepository, OrderRepository, UserRepository};

use crate::services::compensation::cancel_pending_and_compensate;

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub purged_cards: u64,
    pub cancelled_orders: u64,
}

/// Cancel pending orders created before `cutoff`, optionally scoped to one
/// product (the checkout path sweeps its own product before the stock
/// check). Returns how many orders this call actually flipped.
pub async fn cancel_stale_pending_orders(
    cards: &dyn CardRepository,
    orders: &dyn OrderRepository,
    users: &dyn UserRepository,
    cutoff: chrono::DateTime<Utc>,
    product_id: Option<&str>,
) -> Result<u64, Error> {
    let stale = orders.find_stale_pending(cutoff, product_id).await?;
    let mut cancelled = 0u64;
    for order in &stale {
        if cancel_pending_and_compensate(cards, orders, users, order).await? {
            cancelled += 1;
        }
    }
    Ok(cancelled)
}

pub async fn run_expiry_sweep(
    cards: &dyn CardRepository,
    orders: &dyn OrderRepository,
    users: &dyn UserRepository,
    reservation_ttl: chrono::Duration,
) -> Result<SweepStats, Error> {
    let now = Utc::now();

    let purged_cards = cards.purge_expired(None, now).await?;
    let cancelled_orders =
        cancel_stale_pending_orders(cards, orders, users, now - reservation_ttl, None).await?;

    if purged_cards > 0 || cancelled_orders > 0 {
        info!(purged_cards, cancelled_orders, "expiry sweep reclaimed stock");
    }

    Ok(SweepStats {
        purged_cards,
        cancelled_orders,
    })
}

/// Spawns the sweep on a fixed interval.
pub fn spawn_expiry_sweep_task(
    cards: Arc<dyn CardRepository>,
    orders: Arc<dyn OrderRepository>,
    users: Arc<dyn UserRepository>,
    reservation_ttl: chrono::Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so startup is quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) =
                run_expiry_sweep(cards.as_ref(), orders.as_ref(), users.as_ref(), reservation_ttl)
                    .await
            {
                error!("expiry sweep failed: {e}");
            }
        }
    })
}
