//! HTTP relay between the browser front-end and the chat completion API
//!
//! The front-end cannot call the upstream directly (CORS), so it posts to
//! `/proxy/xiaomi` here and gets the upstream's status and body back
//! unchanged. Every response carries permissive CORS headers.

use crate::config::RelayConfig;
use crate::error::RelayError;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::json;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const PROXY_PATH: &str = "/proxy/xiaomi";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_UPSTREAM: &str = "https://api.xiaomimimo.com/v1/chat/completions";

#[derive(Clone)]
struct RelayState {
    upstream: Arc<str>,
    timeout: Duration,
}

/// Build the relay service for `config`. Request bodies of any size are
/// forwarded.
pub fn router(config: &RelayConfig) -> Router {
    let state = RelayState {
        upstream: Arc::from(config.upstream_url.as_str()),
        timeout: Duration::from_secs(config.timeout_secs),
    };

    Router::new()
        .route(PROXY_PATH, post(proxy).fallback(fallback))
        .fallback(fallback)
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::map_response(add_cors_headers))
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: RelayConfig) -> Result<(), RelayError> {
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| RelayError::Bind {
            addr: addr.clone(),
            source,
        })?;

    info!(%addr, upstream = %config.upstream_url, "relay listening on http://{}", addr);

    axum::serve(listener, router(&config))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

async fn add_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, api-key"),
    );
    response
}

/// Preflight on any path gets 204; everything else that is not the proxy
/// route is a 404.
async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, "Not Found").into_response()
    }
}

async fn proxy(State(state): State<RelayState>, headers: HeaderMap, body: Bytes) -> Response {
    let api_key = headers
        .get("api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    if api_key.is_none() {
        debug!("proxy request without api-key");
    }

    let upstream = state.upstream.clone();
    let timeout = state.timeout;
    let result = tokio::task::spawn_blocking(move || {
        forward(&upstream, api_key.as_deref(), &body, timeout)
    })
    .await;

    match result {
        Ok(Ok((status, body))) => {
            debug!(status, bytes = body.len(), "upstream answered");
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "upstream request failed");
            proxy_error()
        }
        Err(e) => {
            error!(error = %e, "upstream task failed");
            proxy_error()
        }
    }
}

fn proxy_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Proxy Error" })),
    )
        .into_response()
}

/// POST `body` to the upstream. Error statuses count as answers; only
/// transport failures are errors.
fn forward(
    upstream: &str,
    api_key: Option<&str>,
    body: &[u8],
    timeout: Duration,
) -> Result<(u16, Vec<u8>), String> {
    let mut request = ureq::post(upstream)
        .timeout(timeout)
        .set("Content-Type", "application/json");
    if let Some(key) = api_key {
        request = request.set("api-key", key);
    }

    match request.send_bytes(body) {
        Ok(response) | Err(ureq::Error::Status(_, response)) => read_body(response),
        Err(e) => Err(e.to_string()),
    }
}

fn read_body(response: ureq::Response) -> Result<(u16, Vec<u8>), String> {
    let status = response.status();
    let mut buf = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut buf)
        .map_err(|e| e.to_string())?;
    Ok((status, buf))
}
