// File: keyshop-common/src/config.rs
//
// All settings the engine depends on, read once at startup and injected.
// No core logic reads environment variables or global mutable state.

use chrono::Duration;

use crate::error::Error;

pub const MAX_ORDER_QUANTITY: i32 = 10_000;

/// Sentinel stock count for shared products: one unused card means the
/// stock is effectively unbounded.
pub const INFINITE_STOCK: i64 = 999_999;

#[derive(Debug, Clone)]
pub struct ShopConfig {
    /// Merchant id (`pid`) at the payment gateway.
    pub merchant_id: String,
    /// Shared secret used for the MD5 signature scheme.
    pub merchant_key: String,
    /// Gateway submit endpoint the buyer is redirected to.
    pub pay_url: String,
    /// Gateway query/refund API endpoint.
    pub gateway_api_url: String,
    /// Public base URL of this shop, used for notify/return URLs.
    pub app_base_url: String,
    /// Usernames allowed to perform admin operations.
    pub admin_usernames: Vec<String>,
    /// Age after which an unconfirmed card reservation may be reclaimed.
    pub reservation_ttl: Duration,
    /// Whether a zero-price order on a shared product consumes the card
    /// like an exclusive one (anti-abuse policy; see DESIGN.md).
    pub consume_shared_zero_price: bool,
    /// Whether refunds return delivered cards to stock.
    pub refund_reclaim_cards: bool,
    pub checkin_enabled: bool,
    pub checkin_reward: i64,
}

impl ShopConfig {
    pub fn from_env() -> Result<Self, Error> {
        let merchant_id = require_env("MERCHANT_ID")?;
        let merchant_key = require_env("MERCHANT_KEY")?;
        let pay_url = std::env::var("PAY_URL")
            .unwrap_or_else(|_| "https://credit.linux.do/epay/pay/submit.php".to_string());
        let gateway_api_url = std::env::var("GATEWAY_API_URL")
            .unwrap_or_else(|_| "https://credit.linux.do/epay/api.php".to_string());
        let app_base_url =
            std::env::var("APP_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let admin_usernames = std::env::var("ADMIN_USERNAMES")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let ttl_secs = env_parse("RESERVATION_TTL_SECS", 300i64)?;

        Ok(Self {
            merchant_id,
            merchant_key,
            pay_url,
            gateway_api_url,
            app_base_url,
            admin_usernames,
            reservation_ttl: Duration::seconds(ttl_secs),
            consume_shared_zero_price: env_parse("CONSUME_SHARED_ZERO_PRICE", true)?,
            refund_reclaim_cards: env_parse("REFUND_RECLAIM_CARDS", true)?,
            checkin_enabled: env_parse("CHECKIN_ENABLED", true)?,
            checkin_reward: env_parse("CHECKIN_REWARD", 10i64)?,
        })
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admin_usernames
            .iter()
            .any(|u| u.eq_ignore_ascii_case(username))
    }

    pub fn notify_url(&self) -> String {
        format!("{}/api/notify", self.app_base_url)
    }

    pub fn return_url(&self, order_id: &str) -> String {
        format!("{}/callback/{}", self.app_base_url, order_id)
    }
}

fn require_env(key: &str) -> Result<String, Error> {
    std::env::var(key).map_err(|_| Error::Config(format!("{key} must be set")))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, Error> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}
