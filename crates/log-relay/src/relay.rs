// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Authentication translation between the collection agent and the Data Collector API.
//!
//! Each request moves through a fixed sequence:
//!
//! 1. the Basic credential is checked against the configured username/password
//! 2. the gzip body is decompressed
//! 3. the body is forwarded with the caller's own `SharedKey` token
//! 4. only if that is rejected, it is forwarded again with a signature built from the
//!    configured workspace key
//!
//! There is never a third attempt.

use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use hyper::header::{self, HeaderMap, HeaderValue};
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::{Config, LOGS_RESOURCE};
use crate::credentials::{self, Credentials};
use crate::downstream::{ForwardResult, Forwarder};
use crate::error::RelayError;
use crate::http_utils::{header_str, redacted_headers};
use crate::signature::{self, SignatureInput};

pub const LOG_TYPE_HEADER: &str = "Log-Type";
pub const MS_DATE_HEADER: &str = "x-ms-date";
const DEFAULT_LOG_TYPE: &str = "Unspecified";
const PASSTHROUGH_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
const SIGNED_CONTENT_TYPE: &str = "application/json";
const SIGNED_METHOD: &str = "POST";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Passthrough,
    Signed,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attempt::Passthrough => write!(f, "passthrough"),
            Attempt::Signed => write!(f, "signed"),
        }
    }
}

pub struct Relay {
    config: Arc<Config>,
    forwarder: Arc<dyn Forwarder + Send + Sync>,
}

impl Relay {
    pub fn new(config: Arc<Config>, forwarder: Arc<dyn Forwarder + Send + Sync>) -> Self {
        Relay { config, forwarder }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Relays one inbound request. `Ok(())` means one of the attempts was accepted downstream.
    pub async fn relay(&self, headers: &HeaderMap, body: Bytes) -> Result<(), RelayError> {
        let passthrough = self.authorize(headers)?.passthrough;

        let log_type = header_str(headers, LOG_TYPE_HEADER).unwrap_or_else(|| {
            debug!("{LOG_TYPE_HEADER} header is missing");
            DEFAULT_LOG_TYPE
        });
        let ms_date = match header_str(headers, MS_DATE_HEADER) {
            Some(raw) => normalize_ms_date(raw),
            None => {
                debug!("{MS_DATE_HEADER} header is missing");
                String::new()
            }
        };

        let decompressed = Bytes::from(decompress(&body, self.config.max_decompressed_length)?);
        debug!(
            "Decompressed {} bytes into {} bytes",
            body.len(),
            decompressed.len()
        );

        let passthrough_headers =
            outbound_headers(PASSTHROUGH_CONTENT_TYPE, &passthrough, log_type, &ms_date)?;
        match self
            .send(Attempt::Passthrough, passthrough_headers, decompressed.clone())
            .await
        {
            ForwardResult::Accepted => return Ok(()),
            ForwardResult::Failed(failure) => {
                debug!("Relay | {} attempt rejected: {failure}", Attempt::Passthrough);
            }
        }

        // a fresh timestamp is required, the API checks it against its own clock
        let date = signature::rfc1123_now();
        let authorization = signature::build_signature(&SignatureInput {
            customer_id: &self.config.workspace_id,
            shared_key: &self.config.shared_key,
            date: &date,
            content_length: decompressed.len(),
            method: SIGNED_METHOD,
            content_type: SIGNED_CONTENT_TYPE,
            resource: LOGS_RESOURCE,
        })
        .map_err(|e| RelayError::Internal(format!("unable to sign request: {e}")))?;

        let signed_headers =
            outbound_headers(SIGNED_CONTENT_TYPE, &authorization, log_type, &date)?;
        match self.send(Attempt::Signed, signed_headers, decompressed).await {
            ForwardResult::Accepted => Ok(()),
            ForwardResult::Failed(failure) => Err(RelayError::Internal(format!(
                "{} attempt rejected: {failure}",
                Attempt::Signed
            ))),
        }
    }

    /// Checks the Basic credential before anything else happens to the request.
    fn authorize(&self, headers: &HeaderMap) -> Result<Credentials, RelayError> {
        let creds = credentials::extract_from_headers(headers)
            .map_err(|_| RelayError::Unauthorized("missing Basic credential"))?;
        // TODO: constant-time comparison
        if creds.basic != self.config.basic_auth_token {
            return Err(RelayError::Unauthorized("Basic credential mismatch"));
        }
        Ok(creds)
    }

    async fn send(&self, attempt: Attempt, headers: HeaderMap, body: Bytes) -> ForwardResult {
        debug!(
            "Relay | sending {attempt} attempt, headers {}",
            redacted_headers(&headers)
        );
        let result = self.forwarder.forward(headers, body).await;
        if result.is_accepted() {
            debug!("Relay | {attempt} attempt accepted");
        } else if attempt == Attempt::Signed {
            error!("Relay | {attempt} attempt rejected, giving up");
        }
        result
    }
}

/// Gzip-decompresses an inbound body.
///
/// An empty body is the caller's fault. A non-empty body that yields nothing, that is not
/// valid gzip, or that expands past `max_len` bytes is reported as an internal error.
pub fn decompress(body: &[u8], max_len: usize) -> Result<Vec<u8>, RelayError> {
    if body.is_empty() {
        return Err(RelayError::BadRequest("empty request body"));
    }
    let mut decompressed = Vec::new();
    MultiGzDecoder::new(body)
        .take(max_len as u64 + 1)
        .read_to_end(&mut decompressed)
        .map_err(|e| RelayError::Internal(format!("unable to decompress request body: {e}")))?;
    if decompressed.len() > max_len {
        return Err(RelayError::Internal(format!(
            "{} byte body decompresses past the {max_len} byte limit",
            body.len()
        )));
    }
    if decompressed.is_empty() {
        return Err(RelayError::Internal(format!(
            "{} byte body decompressed to zero bytes",
            body.len()
        )));
    }
    Ok(decompressed)
}

/// Trims each comma-separated token and relabels `UTC` as `GMT`.
pub fn normalize_ms_date(raw: &str) -> String {
    raw.split(',')
        .map(str::trim)
        .collect::<Vec<&str>>()
        .join(", ")
        .replace("UTC", "GMT")
}

fn outbound_headers(
    content_type: &'static str,
    authorization: &str,
    log_type: &str,
    ms_date: &str,
) -> Result<HeaderMap, RelayError> {
    let value = |name: &str, raw: &str| {
        HeaderValue::from_str(raw)
            .map_err(|e| RelayError::Internal(format!("invalid {name} header value: {e}")))
    };
    let mut headers = HeaderMap::with_capacity(4);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::AUTHORIZATION, value("Authorization", authorization)?);
    headers.insert(LOG_TYPE_HEADER, value(LOG_TYPE_HEADER, log_type)?);
    headers.insert(MS_DATE_HEADER, value(MS_DATE_HEADER, ms_date)?);
    Ok(headers)
}
