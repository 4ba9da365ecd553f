use async_trait::async_trait;

use crate::error::Error;
use crate::models::order::Order;
use crate::models::payment::{GatewayOrderInfo, GatewayStatus};

/// Client-side contract of the external payment gateway.
///
/// Implementations talk to the real gateway over HTTP; tests substitute a
/// scripted stub. Reservation theft, pull-based status checks and refund
/// verification all go through this seam.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Query the gateway for the state of one payment attempt
    /// (`out_trade_no`, i.e. the order id or a retry-suffixed payment id).
    async fn query_order_status(
        &self,
        payment_id: &str,
    ) -> Result<(GatewayStatus, GatewayOrderInfo), Error>;

    /// Ask the gateway to refund a confirmed payment. Returns whether the
    /// gateway reported the refund as processed.
    async fn refund(&self, order: &Order) -> Result<bool, Error>;
}
