//! HTTP client for relaying preview streams

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    RequestFailed(String),

    #[error("upstream connection timed out")]
    Timeout,

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Headers copied from the upstream response
const RELAYED_HEADERS: [HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
];

/// Stream client configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub connect_timeout: Duration,
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_redirects: 10,
            user_agent: format!("vidqueue/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Relays media bytes from a CDN to the browser.
///
/// No overall request timeout is set: a preview may stream for as long as
/// the client keeps reading.
#[derive(Debug, Clone)]
pub struct StreamProxy {
    client: Client,
}

impl StreamProxy {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| ProxyError::Build(e.to_string()))?;

        Ok(Self { client })
    }

    /// Open the upstream stream, forwarding the caller's `Range` header
    pub async fn open(&self, url: &str, range: Option<&HeaderValue>) -> Result<reqwest::Response> {
        debug!(url, ?range, "Opening upstream stream");

        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(header::RANGE, range.clone());
        }

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProxyError::Timeout
            } else if e.is_redirect() {
                ProxyError::TooManyRedirects
            } else {
                ProxyError::RequestFailed(e.to_string())
            }
        })
    }
}

/// Turn an upstream response into ours: same status, selected headers,
/// body streamed through without buffering.
pub fn relay(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = relayed_headers(upstream.headers());
    let body = Body::from_stream(upstream.bytes_stream());

    (status, headers, body).into_response()
}

fn relayed_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in &RELAYED_HEADERS {
        if let Some(value) = upstream.get(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
    headers
}
