// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::service::service_fn;
use hyper::{http, Method, Request, StatusCode};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::http_utils::{
    create_http_response, log_and_create_http_response, verify_request_content_length,
    HttpResponse,
};
use crate::relay::Relay;

const RELAY_ENDPOINT_PATH: &str = "/";
const HEALTH_ENDPOINT_PATH: &str = "/health";

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

pub struct RelayServer {
    pub config: Arc<Config>,
    pub relay: Arc<Relay>,
}

impl RelayServer {
    pub async fn start_relay_server(&self) -> Result<(), ServerError> {
        let now = Instant::now();
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;

        info!("Log relay started: listening on {addr}");
        debug!(
            "Time taken to start the log relay: {} ms",
            now.elapsed().as_millis()
        );

        self.serve(listener).await
    }

    /// Serves relay requests on an already bound listener until a fatal accept error.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let relay = self.relay.clone();
        let service = service_fn(move |req| {
            // called for each http request
            let relay = relay.clone();
            RelayServer::endpoint_handler(req, relay)
        });

        Self::serve_tcp(listener, service).await
    }

    async fn serve_tcp<S>(listener: TcpListener, service: S) -> Result<(), ServerError>
    where
        S: hyper::service::Service<
                Request<hyper::body::Incoming>,
                Response = HttpResponse,
            > + Clone
            + Send
            + 'static,
        S::Future: Send,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }

    pub async fn endpoint_handler<B>(
        req: Request<B>,
        relay: Arc<Relay>,
    ) -> http::Result<HttpResponse>
    where
        B: hyper::body::Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match (req.method(), req.uri().path()) {
            (&Method::POST, RELAY_ENDPOINT_PATH) => Self::relay_handler(req, relay).await,
            (&Method::GET, HEALTH_ENDPOINT_PATH) => create_http_response(StatusCode::OK),
            (method, path @ (RELAY_ENDPOINT_PATH | HEALTH_ENDPOINT_PATH)) => {
                log_and_create_http_response(
                    &format!("Method {method} not allowed on {path}"),
                    StatusCode::METHOD_NOT_ALLOWED,
                )
            }
            (_, path) => {
                debug!("No route for {path}");
                create_http_response(StatusCode::NOT_FOUND)
            }
        }
    }

    async fn relay_handler<B>(req: Request<B>, relay: Arc<Relay>) -> http::Result<HttpResponse>
    where
        B: hyper::body::Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        debug!("Received log request");

        let max_content_length = relay.config().max_request_content_length;
        if let Some(response) = verify_request_content_length(
            req.headers(),
            max_content_length,
            "Error processing log request",
        ) {
            return response;
        }

        // double check the size while reading in case transfer encoding is used
        let (parts, body) = req.into_parts();
        let body_bytes = match Limited::new(body, max_content_length).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                return log_and_create_http_response(
                    "Error processing log request: Payload too large",
                    StatusCode::PAYLOAD_TOO_LARGE,
                );
            }
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error reading log request body: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        match relay.relay(&parts.headers, body_bytes).await {
            Ok(()) => {
                log_and_create_http_response("Successfully relayed log request", StatusCode::OK)
            }
            Err(err) => log_and_create_http_response(
                &format!("Error relaying log request: {err}"),
                err.status_code(),
            ),
        }
    }
}
