// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use base64::Engine;
use std::env;
use std::fmt;

use crate::error::ConfigError;

/// Resource path of the Data Collector API. Also part of the signed string.
pub const LOGS_RESOURCE: &str = "/api/logs";
pub const LOGS_API_VERSION: &str = "2016-04-01";
const DOWNSTREAM_HOST_SUFFIX: &str = ".ods.opinsights.azure.com";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_DOWNSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POOL_SIZE: usize = 8;
const DEFAULT_MAX_REQUEST_CONTENT_LENGTH: usize = 10 * 1024 * 1024; // 10MB in Bytes
// the Data Collector API refuses posts above 30MB
const DEFAULT_MAX_DECOMPRESSED_LENGTH: usize = 30 * 1024 * 1024;

pub struct Config {
    pub workspace_id: String,
    /// base64 encoded, validated at load time
    pub shared_key: String,
    pub basic_auth_username: String,
    pub basic_auth_password: String,
    /// `base64(username:password)`, the value expected after `Basic ` inbound
    pub basic_auth_token: String,
    pub downstream_url: String,
    pub host: String,
    pub port: u16,
    /// timeout for each downstream request, in seconds
    pub downstream_timeout_secs: u64,
    /// maximum number of concurrent downstream requests
    pub pool_size: usize,
    pub proxy_url: Option<String>,
    /// limit on the compressed inbound body, in bytes
    pub max_request_content_length: usize,
    /// limit on the body once decompressed, in bytes
    pub max_decompressed_length: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("workspace_id", &self.workspace_id)
            .field("shared_key", &"<redacted>")
            .field("basic_auth_username", &self.basic_auth_username)
            .field("basic_auth_password", &"<redacted>")
            .field("basic_auth_token", &"<redacted>")
            .field("downstream_url", &self.downstream_url)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("downstream_timeout_secs", &self.downstream_timeout_secs)
            .field("pool_size", &self.pool_size)
            .field("proxy_url", &self.proxy_url)
            .field("max_request_content_length", &self.max_request_content_length)
            .field("max_decompressed_length", &self.max_decompressed_length)
            .finish()
    }
}

impl Config {
    pub fn new() -> Result<Config, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|val| !val.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let workspace_id = required("WORKSPACE_ID")?;
        let shared_key = required("SHARED_KEY")?;
        let basic_auth_username = required("BASIC_AUTH_USERNAME")?;
        let basic_auth_password = required("BASIC_AUTH_PASSWORD")?;

        base64::engine::general_purpose::STANDARD
            .decode(&shared_key)
            .map_err(|err| ConfigError::Invalid {
                name: "SHARED_KEY",
                reason: format!("not valid base64: {err}"),
            })?;

        let basic_auth_token = basic_auth_token(&basic_auth_username, &basic_auth_password);

        // RELAY_DOWNSTREAM_URL will primarily be used for integration tests
        // overrides the scheme and host of the downstream url
        let downstream_prefix = lookup("RELAY_DOWNSTREAM_URL")
            .map(|prefix| prefix.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://{workspace_id}{DOWNSTREAM_HOST_SUFFIX}"));
        let downstream_url =
            format!("{downstream_prefix}{LOGS_RESOURCE}?api-version={LOGS_API_VERSION}");

        let port = parse_or("RELAY_PORT", lookup("RELAY_PORT"), DEFAULT_PORT)?;
        let downstream_timeout_secs = parse_nonzero_or(
            "RELAY_DOWNSTREAM_TIMEOUT_SECS",
            lookup("RELAY_DOWNSTREAM_TIMEOUT_SECS"),
            DEFAULT_DOWNSTREAM_TIMEOUT_SECS,
        )?;
        let pool_size =
            parse_nonzero_or("RELAY_POOL_SIZE", lookup("RELAY_POOL_SIZE"), DEFAULT_POOL_SIZE)?;
        let max_request_content_length = parse_nonzero_or(
            "RELAY_MAX_REQUEST_CONTENT_LENGTH",
            lookup("RELAY_MAX_REQUEST_CONTENT_LENGTH"),
            DEFAULT_MAX_REQUEST_CONTENT_LENGTH,
        )?;
        let max_decompressed_length = parse_nonzero_or(
            "RELAY_MAX_DECOMPRESSED_LENGTH",
            lookup("RELAY_MAX_DECOMPRESSED_LENGTH"),
            DEFAULT_MAX_DECOMPRESSED_LENGTH,
        )?;

        Ok(Config {
            workspace_id,
            shared_key,
            basic_auth_username,
            basic_auth_password,
            basic_auth_token,
            downstream_url,
            host: lookup("RELAY_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            downstream_timeout_secs,
            pool_size,
            proxy_url: lookup("RELAY_PROXY_HTTPS").or_else(|| lookup("HTTPS_PROXY")),
            max_request_content_length,
            max_decompressed_length,
        })
    }
}

pub fn basic_auth_token(username: &str, password: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"))
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|err| ConfigError::Invalid {
            name,
            reason: err.to_string(),
        }),
    }
}

fn parse_nonzero_or<T>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: fmt::Display,
{
    let parsed = parse_or(name, value, default)?;
    if parsed == T::default() {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(parsed)
}
