// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared Key authorization for the Data Collector API.
//!
//! The API authenticates each request with an HMAC-SHA256 over a canonical
//! string, keyed with the base64-decoded workspace key:
//!
//! ```text
//! POST\n{content_length}\n{content_type}\nx-ms-date:{date}\n/api/logs
//! ```
//!
//! The date must be the RFC 1123 time of signing. The API rejects requests
//! whose `x-ms-date` drifts too far from its own clock.

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const RFC1123_GMT_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("shared key is not valid base64: {0}")]
    InvalidKey(#[from] base64::DecodeError),

    #[error("unable to initialise HMAC: {0}")]
    Hmac(String),
}

#[derive(Debug, Clone)]
pub struct SignatureInput<'a> {
    pub customer_id: &'a str,
    /// base64 encoded
    pub shared_key: &'a str,
    pub date: &'a str,
    pub content_length: usize,
    pub method: &'a str,
    pub content_type: &'a str,
    pub resource: &'a str,
}

/// Returns `SharedKey <customer_id>:<base64 digest>`.
pub fn build_signature(input: &SignatureInput<'_>) -> Result<String, SignatureError> {
    let string_to_hash = format!(
        "{}\n{}\n{}\nx-ms-date:{}\n{}",
        input.method, input.content_length, input.content_type, input.date, input.resource
    );
    let decoded_key = base64::engine::general_purpose::STANDARD.decode(input.shared_key)?;

    let mut mac = HmacSha256::new_from_slice(&decoded_key)
        .map_err(|err| SignatureError::Hmac(err.to_string()))?;
    mac.update(string_to_hash.as_bytes());
    let encoded_hash =
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!("SharedKey {}:{}", input.customer_id, encoded_hash))
}

pub fn rfc1123_date(time: DateTime<Utc>) -> String {
    time.format(RFC1123_GMT_FORMAT).to_string()
}

pub fn rfc1123_now() -> String {
    rfc1123_date(Utc::now())
}
