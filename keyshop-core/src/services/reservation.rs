// File: keyshop-core/src/services/reservation.rs
//
// Claims cards for a pending order. Exclusivity comes entirely from the
// repository's conditional updates: of any number of concurrent claimants
// for one card row, exactly one statement affects a row; the rest retry
// against a fresh search or give up with StockLocked.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use keyshop_common::error::Error;
use keyshop_common::models::card::ReservedCard;
use keyshop_common::models::product::Product;
use keyshop_common::traits::gateway_traits::PaymentGateway;
use keyshop_common::traits::repository_traits::{CardRepository, OrderRepository};

/// Attempts per unit before the whole reservation fails.
const MAX_CLAIM_ATTEMPTS: u32 = 3;

pub struct ReservationManager {
    cards: Arc<dyn CardRepository>,
    orders: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
    reservation_ttl: chrono::Duration,
}

impl ReservationManager {
    pub fn new(
        cards: Arc<dyn CardRepository>,
        orders: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
        reservation_ttl: chrono::Duration,
    ) -> Self {
        Self {
            cards,
            orders,
            gateway,
            reservation_ttl,
        }
    }

    /// Reserve `quantity` units for `order_id`. Shared products bypass
    /// reservation: one unused card's key is replicated `quantity` times
    /// without mutating any card state.
    ///
    /// On StockLocked, units already claimed by this call stay reserved to
    /// the same order id; a retried checkout reuses them via the normal
    /// claim path instead of abandoning them to the TTL sweep.
    pub async fn reserve(
        &self,
        product: &Product,
        order_id: &str,
        quantity: i32,
    ) -> Result<Vec<ReservedCard>, Error> {
        if product.is_shared {
            return self.reserve_shared(product, quantity).await;
        }

        let mut reserved = Vec::with_capacity(quantity as usize);
        for _ in 0..quantity {
            match self.claim_one(product, order_id).await? {
                Some(card) => reserved.push(card),
                None => return Err(Error::StockLocked(product.id.clone())),
            }
        }
        Ok(reserved)
    }

    async fn claim_one(
        &self,
        product: &Product,
        order_id: &str,
    ) -> Result<Option<ReservedCard>, Error> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let now = Utc::now();

            // A. Strictly free card, one conditional update.
            if let Some(card) = self.cards.claim_free_card(&product.id, order_id, now).await? {
                return Ok(Some(card));
            }

            // B. Fall back to a stale reservation.
            let cutoff = now - self.reservation_ttl;
            let Some(candidate) = self
                .cards
                .find_stale_reservation(&product.id, cutoff, now)
                .await?
            else {
                return Ok(None);
            };

            let holder = candidate.reserved_order_id.clone();
            if let Some(prev_order) = holder.as_deref() {
                let holder_paid = match self.gateway.query_order_status(prev_order).await {
                    Ok((status, _)) => status.is_paid(),
                    Err(e) => {
                        // Cannot confirm the holder is unpaid, so this card
                        // must not be stolen. Burn the attempt.
                        warn!(
                            card_id = candidate.id,
                            holder = prev_order,
                            "gateway check failed during reclamation, skipping candidate: {e}"
                        );
                        continue;
                    }
                };

                if holder_paid {
                    // The holder actually paid: the card is theirs. Consume
                    // it on their behalf and promote the order so the
                    // webhook gap does not dispossess them, then search
                    // again.
                    self.cards.consume_card(candidate.id, now).await?;
                    let promoted = self.orders.promote_pending_to_paid(prev_order, now).await?;
                    info!(
                        order_id = %prev_order,
                        card_id = candidate.id,
                        promoted,
                        "stale reservation belonged to a paid order"
                    );
                    continue;
                }
            }

            // C. Steal, guarded on the row being unchanged since the read.
            if let Some(card) = self
                .cards
                .steal_reservation(candidate.id, holder.as_deref(), cutoff, order_id, now)
                .await?
            {
                return Ok(Some(card));
            }
            // Zero rows affected: a third party won the race. Retry.
        }

        Ok(None)
    }

    async fn reserve_shared(
        &self,
        product: &Product,
        quantity: i32,
    ) -> Result<Vec<ReservedCard>, Error> {
        let now = Utc::now();
        match self.cards.pick_shared_card(&product.id, now).await? {
            Some(card) => Ok(vec![card; quantity as usize]),
            // The stock check passed moments ago, but a race is possible.
            None => Err(Error::StockLocked(product.id.clone())),
        }
    }
}
