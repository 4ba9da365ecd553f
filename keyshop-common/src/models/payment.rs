use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Gateway-side view of a payment attempt. The epay protocol reports
/// status as an integer: 1 = paid, 0 = refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayStatus {
    Paid,
    Refunded,
    Unpaid,
    Other(i32),
}

impl GatewayStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => GatewayStatus::Paid,
            0 => GatewayStatus::Refunded,
            other => GatewayStatus::Other(other),
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, GatewayStatus::Paid)
    }
}

/// A signed payment submit form the storefront redirects the buyer to.
/// `params` keeps the wire field names (`pid`, `out_trade_no`, `money`,
/// `sign`, ...) sorted, matching the signature base string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub url: String,
    pub params: BTreeMap<String, String>,
}

/// Result of a synchronous status query, including the fields fulfillment
/// needs (`trade_no` and the gateway-reported paid amount).
#[derive(Debug, Clone, Default)]
pub struct GatewayOrderInfo {
    pub trade_no: Option<String>,
    pub money: Option<String>,
}
