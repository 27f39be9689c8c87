//! Keyed hashes of the Duitku protocol.
//!
//! Field order and digest choice are fixed by the gateway: SHA-256 for
//! invoice requests, MD5 for callbacks. Both render as lowercase hex.

use md5::Md5;
use sha2::{Digest, Sha256};

/// `sha256(merchantCode + timestamp + apiKey)` for the invoice request headers
pub fn invoice_signature(merchant_code: &str, timestamp: &str, api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(merchant_code.as_bytes());
    hasher.update(timestamp.as_bytes());
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// `md5(merchantCode + amount + merchantOrderId + apiKey)` carried by callbacks
pub fn callback_signature(
    merchant_code: &str,
    amount: i64,
    merchant_order_id: &str,
    api_key: &str,
) -> String {
    let mut hasher = Md5::new();
    hasher.update(merchant_code.as_bytes());
    hasher.update(amount.to_string().as_bytes());
    hasher.update(merchant_order_id.as_bytes());
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Exact match of a callback's signature against the expected digest
pub fn verify_callback_signature(
    merchant_code: &str,
    amount: i64,
    merchant_order_id: &str,
    api_key: &str,
    provided: &str,
) -> bool {
    let expected = callback_signature(merchant_code, amount, merchant_order_id, api_key);
    constant_time_eq(&expected, provided)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
