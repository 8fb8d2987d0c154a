use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER, USER_AGENT};

use crate::error::{FetchError, HarvestError};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub type BodyStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Status line, the headers the worker cares about, and a lazily read body.
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub retry_after: Option<String>,
    pub body: BodyStream,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Fetcher: Send + Sync {
    fn get(&self, url: &str) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send;
}

impl<T: Fetcher> Fetcher for &T {
    fn get(&self, url: &str) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send {
        (**self).get(url)
    }
}

impl<T: Fetcher> Fetcher for Arc<T> {
    fn get(&self, url: &str) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send {
        (**self).get(url)
    }
}

#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub user_agent: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_idle_per_host: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(40),
            connect_timeout: Duration::from_secs(10),
            max_idle_per_host: 40,
        }
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(options: &HttpOptions) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&options.user_agent)
                .map_err(|err| HarvestError::HttpSetup(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .pool_max_idle_per_host(options.max_idle_per_host)
            .build()
            .map_err(|err| HarvestError::HttpSetup(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let response = self.client.get(url).send().await?;
        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value: &HeaderValue| value.to_str().ok())
                .map(str::to_string)
        };
        let status = response.status().as_u16();
        let content_type = header(CONTENT_TYPE);
        let retry_after = header(RETRY_AFTER);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(FetchError::from))
            .boxed();
        Ok(FetchResponse {
            status,
            content_type,
            retry_after,
            body,
        })
    }
}

/// Seconds to wait after a 429, from an integer `Retry-After` header.
pub fn retry_after_delay(header: Option<&str>, default: Duration) -> Duration {
    header
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
