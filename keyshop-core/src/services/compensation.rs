// File: keyshop-core/src/services/compensation.rs
//
// Named compensation steps used in place of transactional rollback. Each
// is one or two individually-atomic statements; the conditional status
// flip decides whether the points credit runs, so a compensating credit
// happens exactly once per state change no matter how many cancel paths
// (owner, admin, sweep) race on the same order.

use tracing::{error, info};

use keyshop_common::error::Error;
use keyshop_common::models::order::Order;
use keyshop_common::traits::repository_traits::{CardRepository, OrderRepository, UserRepository};

/// Cancel a pending order: release its reserved cards back to the pool,
/// flip `pending -> cancelled`, and credit points back only when this call
/// performed the flip. Returns whether the flip happened.
pub async fn cancel_pending_and_compensate(
    cards: &dyn CardRepository,
    orders: &dyn OrderRepository,
    users: &dyn UserRepository,
    order: &Order,
) -> Result<bool, Error> {
    let released = cards.release_for_order(&order.order_id).await?;
    if released > 0 {
        info!(order_id = %order.order_id, released, "released reserved cards");
    }

    let flipped = orders.cancel_if_pending(&order.order_id).await?;
    if flipped {
        credit_points_best_effort(users, order).await;
    }
    Ok(flipped)
}

/// Credit `points_used` back to the order's owner. Best-effort: a failure
/// here leaves a recoverable inconsistency (logged loudly) rather than
/// aborting the outer operation.
pub async fn credit_points_best_effort(users: &dyn UserRepository, order: &Order) {
    let Some(user_id) = order.user_id.as_deref() else {
        return;
    };
    if order.points_used <= 0 {
        return;
    }
    if let Err(e) = users.credit_points(user_id, order.points_used).await {
        error!(
            order_id = %order.order_id,
            user_id,
            points = order.points_used,
            "points credit failed during compensation: {e}"
        );
    }
}

/// Undo a points debit after the order insert failed. The purchase attempt
/// is already lost; the refund must not also be lost silently.
pub async fn refund_points_after_failed_insert(
    users: &dyn UserRepository,
    user_id: &str,
    points: i64,
) {
    if points <= 0 {
        return;
    }
    if let Err(e) = users.credit_points(user_id, points).await {
        error!(
            user_id,
            points, "failed to refund points after order insert failure: {e}"
        );
    }
}
