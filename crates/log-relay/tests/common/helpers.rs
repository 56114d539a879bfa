// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use log_relay::config::{self, Config};
use log_relay::downstream::DownstreamClient;
use log_relay::relay::Relay;
use log_relay::server::RelayServer;
use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

pub const WORKSPACE_ID: &str = "workspace-123";
pub const SHARED_KEY: &str = "c2VjcmV0LWtleQ=="; // base64("secret-key")
pub const PASSTHROUGH: &str = "SharedKey workspace-123:callersig";

pub fn test_config(downstream_prefix: &str) -> Config {
    let vars = HashMap::from([
        ("WORKSPACE_ID", WORKSPACE_ID.to_string()),
        ("SHARED_KEY", SHARED_KEY.to_string()),
        ("BASIC_AUTH_USERNAME", "agent".to_string()),
        ("BASIC_AUTH_PASSWORD", "hunter2".to_string()),
        ("RELAY_DOWNSTREAM_URL", downstream_prefix.to_string()),
        ("RELAY_DOWNSTREAM_TIMEOUT_SECS", "2".to_string()),
        ("RELAY_POOL_SIZE", "2".to_string()),
    ]);
    Config::from_lookup(|name| vars.get(name).cloned()).expect("valid test config")
}

/// Starts a relay on a random local port, forwarding to `downstream_prefix`.
pub async fn start_relay(downstream_prefix: &str) -> SocketAddr {
    let config = Arc::new(test_config(downstream_prefix));
    let downstream_client = Arc::new(DownstreamClient::new(&config));
    let relay_server = RelayServer {
        config: config.clone(),
        relay: Arc::new(Relay::new(config, downstream_client)),
    };

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind relay listener");
    let addr = listener.local_addr().expect("Failed to get local addr");
    tokio::spawn(async move {
        let _ = relay_server.serve(listener).await;
    });
    addr
}

pub fn basic_authorization() -> String {
    format!("Basic {}", config::basic_auth_token("agent", "hunter2"))
}

pub fn valid_authorization() -> String {
    format!("{}, {}", basic_authorization(), PASSTHROUGH)
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

/// Send an HTTP request over TCP and return the status and body
pub async fn send_request(
    addr: SocketAddr,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> Result<(StatusCode, String), Box<dyn std::error::Error + Send + Sync>> {
    let stream = timeout(Duration::from_secs(2), tokio::net::TcpStream::connect(addr)).await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("Host", addr.to_string())
        .header("Content-Length", body.len().to_string());
    for (name, value) in headers {
        request_builder = request_builder.header(*name, *value);
    }
    let request = request_builder.body(Full::new(Bytes::from(body)))?;

    let response = timeout(Duration::from_secs(10), sender.send_request(request)).await??;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, String::from_utf8(body.to_vec())?))
}
