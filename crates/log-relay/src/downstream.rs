// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bytes::Bytes;
use core::time::Duration;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::config::Config;
use crate::http_utils::{build_client, redacted_headers, truncate_for_log};

/// Outcome of a single POST to the Data Collector API.
#[derive(Debug)]
pub enum ForwardResult {
    Accepted,
    Failed(ForwardFailure),
}

#[derive(Debug)]
pub struct ForwardFailure {
    /// `None` when no response was received (connect error, timeout).
    pub status: Option<StatusCode>,
    pub body: String,
    /// Headers that were sent, kept for error reporting only.
    pub request_headers: HeaderMap,
}

impl ForwardResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ForwardResult::Accepted)
    }
}

impl std::fmt::Display for ForwardFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self
            .status
            .map(|status| status.as_u16().to_string())
            .unwrap_or_else(|| "no response".to_string());
        write!(
            f,
            "status {status}, body {:?}, headers {}",
            truncate_for_log(&self.body),
            redacted_headers(&self.request_headers)
        )
    }
}

#[async_trait]
pub trait Forwarder {
    /// Sends one request. Never retries.
    async fn forward(&self, headers: HeaderMap, body: Bytes) -> ForwardResult;
}

/// Owns the connection pool to the Data Collector API.
pub struct DownstreamClient {
    client: reqwest::Client,
    target_url: String,
    permits: Arc<Semaphore>,
}

impl DownstreamClient {
    pub fn new(config: &Config) -> Self {
        let timeout = Duration::from_secs(config.downstream_timeout_secs);
        let client = build_client(config.proxy_url.as_deref(), timeout, config.pool_size)
            .unwrap_or_else(|e| {
                error!(
                    "Unable to parse proxy configuration: {}, no proxy will be used",
                    e
                );
                reqwest::Client::builder()
                    .timeout(timeout)
                    .pool_max_idle_per_host(config.pool_size)
                    .build()
                    .unwrap_or_default()
            });
        DownstreamClient {
            client,
            target_url: config.downstream_url.clone(),
            permits: Arc::new(Semaphore::new(config.pool_size)),
        }
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }
}

#[async_trait]
impl Forwarder for DownstreamClient {
    async fn forward(&self, headers: HeaderMap, body: Bytes) -> ForwardResult {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return ForwardResult::Failed(ForwardFailure {
                    status: None,
                    body: format!("connection pool closed: {e}"),
                    request_headers: headers,
                })
            }
        };

        let time = std::time::Instant::now();
        let response = self
            .client
            .post(&self.target_url)
            .headers(headers.clone())
            .body(body)
            .send()
            .await;
        let elapsed = time.elapsed();

        match response {
            Ok(r) => {
                let status = r.status();
                if status.is_success() {
                    debug!(
                        "Downstream | Accepted with status {status} in {} ms",
                        elapsed.as_millis()
                    );
                    return ForwardResult::Accepted;
                }
                let body = r.text().await.unwrap_or_default();
                ForwardResult::Failed(ForwardFailure {
                    status: Some(status),
                    body,
                    request_headers: headers,
                })
            }
            Err(e) => {
                let kind = if e.is_timeout() { "timeout" } else { "network error" };
                ForwardResult::Failed(ForwardFailure {
                    status: None,
                    body: format!("{kind}: {e}"),
                    request_headers: headers,
                })
            }
        }
    }
}
