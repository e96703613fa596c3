use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use std::time::Duration;
use thiserror::Error;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Media types sent in `Accept` so servers with content negotiation return a feed.
const FEED_ACCEPT: &str = "application/feed+json, application/json;q=0.9, \
    application/atom+xml, application/rss+xml, application/xml;q=0.8, text/xml;q=0.8, */*;q=0.5";

/// Errors that can occur while retrieving a feed document.
///
/// The watcher never surfaces these to its callers: every variant degrades to
/// "no new information" for the check that hit it.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured check timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Status code and body of a completed GET.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP capability injected into the watcher.
///
/// Implementations return whatever status the server answered with; deciding
/// that a non-2xx status is a failure is the caller's job. Cancellation is by
/// dropping the future (the watcher aborts the task that owns it), and the
/// watcher bounds every call with its own timeout.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Issues a GET for `url`.
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute http(s) URL of the feed document
    /// * `headers` - Extra request headers, usually [`feed_request_headers`]
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] only when no usable response was received
    /// (network failure, oversized or truncated body, exhausted retries).
    /// A completed request with an error status is `Ok`.
    async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<HttpResponse, FetchError>;
}

/// Default headers for feed requests.
pub fn feed_request_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(FEED_ACCEPT));
    headers
}

/// [`HttpFetch`] backed by a shared `reqwest::Client`.
///
/// - Rate limiting (HTTP 429) and server errors (5xx) are retried with
///   exponential backoff (1s, 2s, 4s, ...) up to `max_retries` times
/// - Incomplete bodies (fewer bytes than Content-Length) are retried the same way
/// - Bodies are limited to 10MB to prevent memory exhaustion
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    max_retries: u32,
}

impl ReqwestFetcher {
    pub fn new(client: reqwest::Client, max_retries: u32) -> Self {
        Self {
            client,
            max_retries,
        }
    }

    /// Builds a client with the given user agent and per-request timeout.
    pub fn with_user_agent(
        user_agent: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self::new(client, max_retries))
    }

    fn backoff(retry_count: u32) -> Duration {
        Duration::from_secs(1u64 << retry_count.min(6))
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    /// # Behavior
    ///
    /// - 429 is retried with backoff; once `max_retries` is spent the result
    ///   is [`FetchError::RateLimited`]
    /// - 5xx is retried with backoff, then returned as a status
    /// - Other non-2xx statuses are returned at once with an empty body
    /// - A body shorter than its Content-Length is retried, then reported as
    ///   [`FetchError::IncompleteResponse`]
    /// - A body over 10MB fails with [`FetchError::ResponseTooLarge`]
    async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<HttpResponse, FetchError> {
        let mut retry_count = 0;

        loop {
            let response = self
                .client
                .get(url)
                .headers(headers.clone())
                .send()
                .await?;
            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= self.max_retries {
                    return Err(FetchError::RateLimited(self.max_retries));
                }
                let delay = Self::backoff(retry_count);
                tracing::warn!(
                    url = %url,
                    retry = retry_count,
                    delay_secs = delay.as_secs(),
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() && retry_count < self.max_retries {
                let delay = Self::backoff(retry_count);
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    delay_secs = delay.as_secs(),
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // Other statuses are reported as-is; no point reading an error page
            if !status.is_success() {
                return Ok(HttpResponse {
                    status: status.as_u16(),
                    body: Vec::new(),
                });
            }

            match read_limited_bytes(response, MAX_FEED_SIZE).await {
                Ok(body) => {
                    return Ok(HttpResponse {
                        status: status.as_u16(),
                        body,
                    })
                }
                Err(FetchError::IncompleteResponse { expected, received })
                    if retry_count < self.max_retries =>
                {
                    let delay = Self::backoff(retry_count);
                    tracing::debug!(
                        url = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        delay_secs = delay.as_secs(),
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
