// File: keyshop-core/src/gateway/mod.rs

pub mod epay;

pub use epay::EpayClient;

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use keyshop_common::models::payment::PaymentRequest;
use keyshop_common::ShopConfig;

use crate::crypto;

/// Gateway wire format for money: always two decimal places.
pub fn format_money(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// Builds the signed submit form the buyer is redirected to. `payment_id`
/// is the `out_trade_no` of this attempt: the order id for a first
/// attempt, a retry-suffixed id for retries.
pub fn build_payment_request(
    config: &ShopConfig,
    payment_id: &str,
    order_id: &str,
    product_name: &str,
    amount: Decimal,
) -> PaymentRequest {
    let mut params = BTreeMap::from([
        ("pid".to_string(), config.merchant_id.clone()),
        ("type".to_string(), "epay".to_string()),
        ("out_trade_no".to_string(), payment_id.to_string()),
        ("notify_url".to_string(), config.notify_url()),
        ("return_url".to_string(), config.return_url(order_id)),
        ("name".to_string(), product_name.to_string()),
        ("money".to_string(), format_money(amount)),
        ("sign_type".to_string(), "MD5".to_string()),
    ]);
    let sign = crypto::generate_sign(&params, &config.merchant_key);
    params.insert("sign".to_string(), sign);

    PaymentRequest {
        url: config.pay_url.clone(),
        params,
    }
}
