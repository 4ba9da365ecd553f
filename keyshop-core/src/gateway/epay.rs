// File: keyshop-core/src/gateway/epay.rs
//
// HTTP client for the epay-style gateway API: synchronous order status
// queries and refund requests. The asynchronous side of the protocol (the
// signed notify callback) is handled by `http::notify`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use keyshop_common::error::Error;
use keyshop_common::models::order::Order;
use keyshop_common::models::payment::{GatewayOrderInfo, GatewayStatus};
use keyshop_common::traits::gateway_traits::PaymentGateway;
use keyshop_common::ShopConfig;

use super::format_money;

pub struct EpayClient {
    client: reqwest::Client,
    api_url: String,
    merchant_id: String,
    merchant_key: String,
}

#[derive(Debug, Deserialize)]
struct EpayOrderResponse {
    code: Option<i32>,
    status: Option<i32>,
    trade_no: Option<String>,
    money: Option<String>,
    msg: Option<String>,
}

impl EpayClient {
    pub fn new(config: &ShopConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.gateway_api_url.clone(),
            merchant_id: config.merchant_id.clone(),
            merchant_key: config.merchant_key.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for EpayClient {
    async fn query_order_status(
        &self,
        payment_id: &str,
    ) -> Result<(GatewayStatus, GatewayOrderInfo), Error> {
        let resp: EpayOrderResponse = self
            .client
            .get(&self.api_url)
            .query(&[
                ("act", "order"),
                ("pid", self.merchant_id.as_str()),
                ("key", self.merchant_key.as_str()),
                ("out_trade_no", payment_id),
            ])
            .send()
            .await?
            .json()
            .await?;

        if resp.code != Some(1) {
            return Err(Error::Gateway(format!(
                "status query for {payment_id} failed: {}",
                resp.msg.unwrap_or_else(|| "no message".to_string())
            )));
        }

        let status = match resp.status {
            Some(code) => GatewayStatus::from_code(code),
            None => GatewayStatus::Unpaid,
        };

        Ok((
            status,
            GatewayOrderInfo {
                trade_no: resp.trade_no,
                money: resp.money,
            },
        ))
    }

    async fn refund(&self, order: &Order) -> Result<bool, Error> {
        let trade_no = order
            .trade_no
            .as_deref()
            .ok_or_else(|| Error::Gateway(format!("order {} has no trade_no", order.order_id)))?;

        let money = format_money(order.amount);
        let form = [
            ("pid", self.merchant_id.as_str()),
            ("key", self.merchant_key.as_str()),
            ("trade_no", trade_no),
            ("out_trade_no", order.order_id.as_str()),
            ("money", money.as_str()),
        ];

        let resp = self.client.post(&self.api_url).form(&form).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Gateway(format!(
                "refund request for {} failed with HTTP {}",
                order.order_id,
                resp.status()
            )));
        }

        let text = resp.text().await?;

        // The gateway answers in several dialects; accept any of them.
        let processed = match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(json) => {
                json.get("code").and_then(|v| v.as_i64()) == Some(1)
                    || json.get("status").and_then(|v| v.as_str()) == Some("success")
                    || json.get("msg").and_then(|v| v.as_str()) == Some("success")
            }
            Err(_) => text.to_ascii_lowercase().contains("success"),
        };

        if !processed {
            warn!("gateway did not confirm refund for {}: {}", order.order_id, text);
        }

        Ok(processed)
    }
}
