//! Size-bounded upstream fetching.
//!
//! The [`Upstream`] trait is the HTTP client capability: one GET returning a
//! status, two headers and a body stream. [`ReqwestUpstream`] is the
//! production client. [`BoundedFetcher`] wraps any upstream, rejects non-2xx
//! responses and oversize declared lengths, and hands back the body as a
//! [`BoundedStream`] that fails once the byte ceiling is crossed.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Fixed identifying user agent sent upstream.
pub const USER_AGENT: &str = concat!("imgate/", env!("CARGO_PKG_VERSION"));

const MAX_REDIRECTS: usize = 5;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("upstream returned {}: {message}", status.as_u16())]
    Status { status: StatusCode, message: String },
    #[error("failed to fetch image: {0}")]
    Network(String),
    #[error("timed out fetching image")]
    Timeout,
    #[error("image exceeds {limit} bytes")]
    SizeLimit { limit: u64 },
}

pub type BodyStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Raw upstream response, before any policy is applied.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: BodyStream,
}

/// HTTP GET capability.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn get(&self, url: &Url) -> Result<UpstreamResponse, FetchError>;
}

/// [`Upstream`] backed by a shared `reqwest::Client`.
pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl ReqwestUpstream {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

fn transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e.to_string())
    }
}

#[async_trait]
impl Upstream for ReqwestUpstream {
    async fn get(&self, url: &Url) -> Result<UpstreamResponse, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(transport_error)?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        Ok(UpstreamResponse {
            status: response.status(),
            content_type,
            content_length: response.content_length(),
            body: response.bytes_stream().map_err(transport_error).boxed(),
        })
    }
}

/// A 2xx upstream response whose body is size-bounded.
pub struct FetchedImage {
    pub content_type: Option<String>,
    pub body: BoundedStream,
}

/// Applies the status and size policy on top of an [`Upstream`].
#[derive(Clone)]
pub struct BoundedFetcher {
    upstream: Arc<dyn Upstream>,
    max_bytes: u64,
}

impl BoundedFetcher {
    pub fn new(upstream: Arc<dyn Upstream>, max_bytes: u64) -> Self {
        Self {
            upstream,
            max_bytes,
        }
    }

    pub async fn fetch(&self, url: &Url) -> Result<FetchedImage, FetchError> {
        let response = self.upstream.get(url).await?;
        debug!(%url, status = %response.status, "upstream responded");

        if !response.status.is_success() {
            return Err(FetchError::Status {
                status: response.status,
                message: response
                    .status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string(),
            });
        }

        if response.content_length.is_some_and(|len| len > self.max_bytes) {
            return Err(FetchError::SizeLimit {
                limit: self.max_bytes,
            });
        }

        Ok(FetchedImage {
            content_type: response.content_type,
            body: BoundedStream::new(response.body, self.max_bytes),
        })
    }
}

/// Byte-counting body stream.
///
/// Once more than `limit` bytes have passed through, the crossing poll and
/// every poll after it yield [`FetchError::SizeLimit`]. A caller that has
/// already consumed earlier chunks must discard them.
pub struct BoundedStream {
    inner: BodyStream,
    limit: u64,
    consumed: u64,
    exceeded: bool,
}

impl BoundedStream {
    pub fn new(inner: BodyStream, limit: u64) -> Self {
        Self {
            inner,
            limit,
            consumed: 0,
            exceeded: false,
        }
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Read the whole body into one buffer.
    pub async fn collect_bytes(mut self) -> Result<Bytes, FetchError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for BoundedStream {
    type Item = Result<Bytes, FetchError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.exceeded {
            return Poll::Ready(Some(Err(FetchError::SizeLimit { limit: this.limit })));
        }
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.consumed += chunk.len() as u64;
                if this.consumed > this.limit {
                    this.exceeded = true;
                    Poll::Ready(Some(Err(FetchError::SizeLimit { limit: this.limit })))
                } else {
                    Poll::Ready(Some(Ok(chunk)))
                }
            }
            other => other,
        }
    }
}
