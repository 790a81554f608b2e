//! # WaveKit Fetch
//!
//! Async HTTP resource fetching for the WaveKit service worker runtime.
//!
//! ## Design Goals
//!
//! 1. **Async HTTP**: Non-blocking requests over a shared client
//! 2. **Verbatim results**: A completed exchange is a success regardless of
//!    status code; only transport failures are errors
//! 3. **Swappable backend**: The [`Fetcher`] trait lets hosts and tests
//!    substitute the network without touching the worker runtime
//!
//! The runtime deliberately carries no retry policy; a failed fetch is
//! reported once and left to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

/// Errors that can occur while fetching.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl FetchError {
    /// True when the underlying failure was a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Transport(e) if e.is_timeout())
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// An outbound HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a request with an explicit method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Override the fetcher's default timeout for this request.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// A completed HTTP response with its body fully loaded.
#[derive(Debug)]
pub struct Response {
    /// Id of the originating request.
    pub request_id: RequestId,
    /// Final URL after redirects.
    pub url: Url,
    /// Status code, any value; see [`Response::ok`].
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Parsed Content-Type, when present and well-formed.
    pub content_type: Option<Mime>,
    /// Response body.
    pub body: Bytes,
}

impl Response {
    /// True for 2xx statuses.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Interpret the body as UTF-8 text.
    pub fn text(&self) -> Result<String, FetchError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| FetchError::RequestFailed(e.to_string()))
    }

    /// Deserialize the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|e| FetchError::RequestFailed(e.to_string()))
    }
}

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default per-request timeout.
    pub timeout: Duration,
    /// Maximum redirects to follow.
    pub max_redirects: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("WaveKit/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// The seam between the worker runtime and the network.
///
/// The production implementation is [`HttpFetcher`]; tests substitute
/// scripted doubles to control every response.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform one network fetch for the given request.
    async fn fetch(&self, request: Request) -> Result<Response, FetchError>;
}

/// reqwest-backed [`Fetcher`].
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a fetcher over a fresh client.
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        Ok(Self { client })
    }

    /// Build a fetcher with default configuration.
    pub fn with_defaults() -> Result<Self, FetchError> {
        Self::new(FetcherConfig::default())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();

        let content_type = headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok());

        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            content_type = ?content_type,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            request_id: request.id,
            url,
            status,
            headers,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com/app.js").unwrap();
        let request = Request::get(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("text/javascript"),
            )
            .timeout(Duration::from_secs(5));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_fetcher_config_default() {
        let config = FetcherConfig::default();
        assert!(config.user_agent.starts_with("WaveKit/"));
        assert_eq!(config.max_redirects, 10);
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/styles.css"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("body { margin: 0; }", "text/css"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::with_defaults().unwrap();
        let url = Url::parse(&format!("{}/styles.css", server.uri())).unwrap();
        let response = fetcher.fetch(Request::get(url)).await.unwrap();

        assert!(response.ok());
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text().unwrap(), "body { margin: 0; }");
        assert_eq!(
            response.content_type.as_ref().map(|m| m.essence_str()),
            Some("text/css")
        );
    }

    #[tokio::test]
    async fn test_fetch_non_success_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.js"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::with_defaults().unwrap();
        let url = Url::parse(&format!("{}/missing.js", server.uri())).unwrap();
        let response = fetcher.fetch(Request::get(url)).await.unwrap();

        assert!(!response.ok());
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text().unwrap(), "not found");
    }

    #[tokio::test]
    async fn test_fetch_connection_error() {
        // A bare (non-pooled) server actually closes its port on drop.
        let server = MockServer::builder().start().await;
        let url = Url::parse(&format!("{}/gone", server.uri())).unwrap();
        drop(server);

        let fetcher = HttpFetcher::with_defaults().unwrap();
        let result = fetcher.fetch(Request::get(url)).await;

        assert!(matches!(result, Err(FetchError::Transport(_))));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::with_defaults().unwrap();
        let url = Url::parse(&format!("{}/slow", server.uri())).unwrap();
        let request = Request::get(url).timeout(Duration::from_millis(50));
        let error = fetcher.fetch(request).await.unwrap_err();

        assert!(error.is_timeout());
    }

    #[tokio::test]
    async fn test_json_helper() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manifest.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "demo"})),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::with_defaults().unwrap();
        let url = Url::parse(&format!("{}/manifest.json", server.uri())).unwrap();
        let response = fetcher.fetch(Request::get(url)).await.unwrap();

        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["name"], "demo");
    }
}
