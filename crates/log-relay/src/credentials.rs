// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use hyper::header::{self, HeaderMap};

const BASIC_PREFIX: &str = "Basic";
const SHARED_KEY_PREFIX: &str = "SharedKey";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// The value following `Basic `, still base64 encoded.
    Basic { encoded_value: String },
    /// The whole token, scheme included, forwarded verbatim.
    Passthrough { raw_header_value: String },
}

impl Credential {
    /// Classifies a single trimmed token. Unknown schemes yield `None`.
    pub fn classify(token: &str) -> Option<Credential> {
        let token = token.trim();
        if let Some(rest) = strip_scheme(token, BASIC_PREFIX) {
            return Some(Credential::Basic {
                encoded_value: rest.to_string(),
            });
        }
        if strip_scheme(token, SHARED_KEY_PREFIX).is_some() {
            return Some(Credential::Passthrough {
                raw_header_value: token.to_string(),
            });
        }
        None
    }
}

/// The credential after `scheme`, which must be followed by whitespace.
fn strip_scheme<'a>(token: &'a str, scheme: &str) -> Option<&'a str> {
    let rest = token.strip_prefix(scheme)?;
    rest.starts_with(char::is_whitespace).then(|| rest.trim_start())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub basic: String,
    /// Empty when the caller sent no pass-through token.
    pub passthrough: String,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("no Basic credential in Authorization header")]
    MissingCredential,
}

/// Splits a comma-joined Authorization value into its credentials.
///
/// Duplicated tokens of the same kind do not short-circuit: the last one wins.
pub fn extract(authorization: &str) -> Result<Credentials, CredentialError> {
    let mut basic = None;
    let mut passthrough = String::new();

    for token in authorization.split(',') {
        match Credential::classify(token) {
            Some(Credential::Basic { encoded_value }) => basic = Some(encoded_value),
            Some(Credential::Passthrough { raw_header_value }) => passthrough = raw_header_value,
            None => {}
        }
    }

    let basic = basic.ok_or(CredentialError::MissingCredential)?;
    Ok(Credentials { basic, passthrough })
}

/// Like [`extract`], reading every `Authorization` line of the request.
pub fn extract_from_headers(headers: &HeaderMap) -> Result<Credentials, CredentialError> {
    let joined = headers
        .get_all(header::AUTHORIZATION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<&str>>()
        .join(",");
    extract(&joined)
}
