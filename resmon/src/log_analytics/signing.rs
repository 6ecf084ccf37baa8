//! HMAC-SHA256 shared key signing for the Log Analytics HTTP Data Collector API.
//!
//! The signature is computed over:
//!
//! ```text
//! POST\n{content-length}\napplication/json\nx-ms-date:{rfc1123 date}\n/api/logs
//! ```
//!
//! keyed with the base64-decoded workspace key, and sent as
//! `Authorization: SharedKey {workspace id}:{base64 signature}`.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const METHOD: &str = "POST";
pub const CONTENT_TYPE: &str = "application/json";
pub const RESOURCE: &str = "/api/logs";

/// `x-ms-date` value, e.g. `Mon, 02 Mar 2026 08:15:00 GMT`.
pub fn rfc1123(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn string_to_sign(content_length: usize, date: &str) -> String {
    format!("{METHOD}\n{content_length}\n{CONTENT_TYPE}\nx-ms-date:{date}\n{RESOURCE}")
}

/// Decode a workspace shared key. `None` if it is not valid base64.
pub fn decode_key(shared_key: &str) -> Option<Vec<u8>> {
    BASE64_STANDARD.decode(shared_key.trim()).ok()
}

/// Build the `Authorization` header value.
///
/// Returns `None` if the shared key is not valid base64.
pub fn authorization(workspace_id: &str, shared_key: &str, content_length: usize, date: &str) -> Option<String> {
    let key = decode_key(shared_key)?;

    let mut mac = HmacSha256::new_from_slice(&key).ok()?;
    mac.update(string_to_sign(content_length, date).as_bytes());
    let signature = mac.finalize().into_bytes();

    Some(format!("SharedKey {workspace_id}:{}", BASE64_STANDARD.encode(signature)))
}
