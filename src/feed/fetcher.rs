use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use super::parser::{parse_feed, MalformedFeed, RssFeed};

/// Identifying client header sent with every feed request
pub const USER_AGENT: &str = "gator/1.0";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a feed.
///
/// No retry happens here: the scheduler's next tick is the retry.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The body is not a usable RSS document
    #[error(transparent)]
    Malformed(#[from] MalformedFeed),
}

/// Source of parsed feed documents, keyed by URL.
pub trait FeedSource: Send + Sync {
    /// Fetch `url` once and parse the body. Each call is a fresh request.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<RssFeed, FetchError>> + Send;
}

/// Fetches feeds over HTTP with a shared client.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl FeedSource for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<RssFeed, FetchError> {
        fetch_feed(&self.client, url).await
    }
}

/// Builds the HTTP client used for every feed request.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
}

/// Issues one GET against `url` and parses the body as RSS.
///
/// # Errors
///
/// - [`FetchError::Network`] - Connection or TLS errors
/// - [`FetchError::Timeout`] - Request exceeded 30 seconds
/// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
/// - [`FetchError::ResponseTooLarge`] - Response exceeded 10MB
/// - [`FetchError::IncompleteResponse`] - Body shorter than Content-Length
/// - [`FetchError::Malformed`] - Invalid XML or no `<channel>`
pub async fn fetch_feed(client: &reqwest::Client, url: &str) -> Result<RssFeed, FetchError> {
    let response = tokio::time::timeout(
        REQUEST_TIMEOUT,
        client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send(),
    )
    .await
    .map_err(|_| FetchError::Timeout)?
    .map_err(|e| {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(e)
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus(status.as_u16()));
    }

    let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;

    tracing::debug!(url = %url, bytes = bytes.len(), "Fetched feed");
    // Raw bytes: the parser decodes per the document's XML declaration
    Ok(parse_feed(&bytes)?)
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
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Network(e)
            }
        })?;
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
