//! Gateway signature scheme and order id generation.
//!
//! The epay protocol signs a request by taking every non-empty field
//! except `sign` and `sign_type`, sorting by key, joining as `k=v&k=v`,
//! appending the merchant key and MD5-hashing the result. Verification
//! recomputes the digest and compares byte-for-byte.

use std::collections::BTreeMap;

use md5::{Digest, Md5};
use rand::Rng;

pub fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Builds the signature base string: non-empty params except
/// `sign`/`sign_type`, sorted by key, joined `k=v&...`.
fn sign_base(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .filter(|(k, v)| k.as_str() != "sign" && k.as_str() != "sign_type" && !v.is_empty())
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn generate_sign(params: &BTreeMap<String, String>, merchant_key: &str) -> String {
    md5_hex(&format!("{}{}", sign_base(params), merchant_key))
}

pub fn verify_sign(params: &BTreeMap<String, String>, merchant_key: &str) -> bool {
    match params.get("sign") {
        Some(received) => {
            let expected = generate_sign(params, merchant_key);
            // Both sides are lowercase hex; compare exactly.
            received == &expected
        }
        None => false,
    }
}

/// Order ids are a UTC second timestamp plus six random digits, unique
/// enough for a single shop and sortable by creation time.
pub fn generate_order_id() -> String {
    let ts = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let suffix: u32 = rand::rng().random_range(0..1_000_000);
    format!("{ts}{suffix:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("pid".to_string(), "1001".to_string()),
            ("type".to_string(), "epay".to_string()),
            ("out_trade_no".to_string(), "20250101000000123456".to_string()),
            ("money".to_string(), "10.00".to_string()),
            ("trade_status".to_string(), "TRADE_SUCCESS".to_string()),
            ("sign_type".to_string(), "MD5".to_string()),
        ])
    }

    #[test]
    fn sign_base_sorts_and_skips_sign_fields() {
        let mut params = sample_params();
        params.insert("sign".to_string(), "deadbeef".to_string());
        params.insert("empty".to_string(), String::new());

        let base = sign_base(&params);
        assert_eq!(
            base,
            "money=10.00&out_trade_no=20250101000000123456&pid=1001&trade_status=TRADE_SUCCESS&type=epay"
        );
    }

    #[test]
    fn verify_accepts_own_signature() {
        let mut params = sample_params();
        let sign = generate_sign(&params, "secret");
        params.insert("sign".to_string(), sign);
        assert!(verify_sign(&params, "secret"));
    }

    #[test]
    fn verify_rejects_tampered_amount() {
        let mut params = sample_params();
        let sign = generate_sign(&params, "secret");
        params.insert("sign".to_string(), sign);
        params.insert("money".to_string(), "0.01".to_string());
        assert!(!verify_sign(&params, "secret"));
    }

    #[test]
    fn verify_rejects_missing_signature() {
        assert!(!verify_sign(&sample_params(), "secret"));
    }

    #[test]
    fn order_ids_are_unique_enough() {
        let a = generate_order_id();
        let b = generate_order_id();
        assert_eq!(a.len(), 20);
        assert_ne!(a, b);
    }
}
