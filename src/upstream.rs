//! Transport to the upstream completion API.
//!
//! The relay talks to the upstream through the [`Upstream`] trait so the
//! handling logic can be exercised against an in-process fake. [`OpenRouter`]
//! is the production implementation on top of `reqwest`.

use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::Stream;
use futures::stream::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::observability::{UPSTREAM_DURATION, UPSTREAM_NON_SUCCESS, UPSTREAM_TRANSPORT_ERRORS};
use crate::types::{SecretKey, UpstreamPayload};

/// A boxed stream of raw body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Where an inbound request came from, forwarded upstream for attribution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOrigin {
    /// The inbound `Referer` header.
    pub referer: Option<String>,
    /// The inbound `Host` header.
    pub host: Option<String>,
}

impl RequestOrigin {
    /// Value for the upstream `HTTP-Referer` header.
    pub fn referer(&self) -> Option<&str> {
        self.referer.as_deref().or(self.host.as_deref())
    }
}

/// A fully read upstream reply.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    /// Upstream status code.
    pub status: u16,
    /// Upstream `Content-Type`, if any.
    pub content_type: Option<String>,
    /// The raw body.
    pub body: Bytes,
}

/// An upstream reply whose body is still arriving.
pub struct UpstreamStream {
    /// Upstream status code.
    pub status: u16,
    /// Upstream `Content-Type`, if any.
    pub content_type: Option<String>,
    /// Body chunks in arrival order.
    pub body: ByteStream,
}

/// The upstream completion API.
///
/// Implementations attach the credential at the transport level only. A
/// non-2xx upstream status is not an error here; it is returned as-is so the
/// relay can pass it through.
#[async_trait::async_trait]
pub trait Upstream: Send + Sync {
    /// Posts `payload` and waits for the complete reply.
    async fn complete(
        &self,
        key: &SecretKey,
        origin: &RequestOrigin,
        payload: &UpstreamPayload,
    ) -> Result<UpstreamReply>;

    /// Posts `payload` and returns as soon as response headers arrive.
    async fn stream(
        &self,
        key: &SecretKey,
        origin: &RequestOrigin,
        payload: &UpstreamPayload,
    ) -> Result<UpstreamStream>;
}

/// OpenRouter-compatible chat completion endpoint.
#[derive(Debug, Clone)]
pub struct OpenRouter {
    client: ReqwestClient,
    api_url: String,
    app_title: String,
    timeout: Duration,
}

impl OpenRouter {
    /// Creates a client for the endpoint named in `config`.
    pub fn new(config: &RelayConfig) -> Result<Self> {
        url::Url::parse(&config.api_url)?;
        // No total timeout on the client: streamed replies may run long. The
        // buffered path sets one per request, the streamed path bounds the
        // wait for headers and the gap between chunks.
        let client = ReqwestClient::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            app_title: config.app_title.clone(),
            timeout: config.timeout,
        })
    }

    /// Create and return headers for an upstream request.
    fn headers(&self, key: &SecretKey, origin: &RequestOrigin) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", key.expose()))
            .map_err(|_| Error::configuration("API key contains invalid header characters"))?;
        bearer.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, bearer);
        if let Some(referer) = origin.referer()
            && let Ok(value) = HeaderValue::from_str(referer)
        {
            headers.insert("HTTP-Referer", value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.app_title) {
            headers.insert("X-Title", value);
        }
        Ok(headers)
    }

    fn request(
        &self,
        key: &SecretKey,
        origin: &RequestOrigin,
        payload: &UpstreamPayload,
    ) -> Result<RequestBuilder> {
        Ok(self
            .client
            .post(&self.api_url)
            .headers(self.headers(key, origin)?)
            .json(payload))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let start = Instant::now();
        let response = builder.send().await.map_err(|e| {
            UPSTREAM_TRANSPORT_ERRORS.click();
            Error::upstream_transport(e.to_string(), Some(Box::new(e)))
        })?;
        UPSTREAM_DURATION.add(start.elapsed().as_secs_f64());
        if !response.status().is_success() {
            UPSTREAM_NON_SUCCESS.click();
            tracing::warn!(status = response.status().as_u16(), "upstream answered non-success");
        }
        Ok(response)
    }
}

fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

#[async_trait::async_trait]
impl Upstream for OpenRouter {
    async fn complete(
        &self,
        key: &SecretKey,
        origin: &RequestOrigin,
        payload: &UpstreamPayload,
    ) -> Result<UpstreamReply> {
        let builder = self.request(key, origin, payload)?.timeout(self.timeout);
        let response = self.send(builder).await?;
        let status = response.status().as_u16();
        let content_type = content_type(&response);
        let body = response.bytes().await.map_err(|e| {
            UPSTREAM_TRANSPORT_ERRORS.click();
            Error::upstream_transport(e.to_string(), Some(Box::new(e)))
        })?;
        Ok(UpstreamReply {
            status,
            content_type,
            body,
        })
    }

    async fn stream(
        &self,
        key: &SecretKey,
        origin: &RequestOrigin,
        payload: &UpstreamPayload,
    ) -> Result<UpstreamStream> {
        let builder = self
            .request(key, origin, payload)?
            .header(header::ACCEPT, "text/event-stream");
        let response = tokio::time::timeout(self.timeout, self.send(builder))
            .await
            .map_err(|_| {
                UPSTREAM_TRANSPORT_ERRORS.click();
                Error::upstream_transport(
                    format!("no response headers within {}s", self.timeout.as_secs()),
                    None,
                )
            })??;
        let status = response.status().as_u16();
        let content_type = content_type(&response);
        let body = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| {
                Error::streaming(format!("Error in upstream stream: {e}"), Some(Box::new(e)))
            })
        });
        Ok(UpstreamStream {
            status,
            content_type,
            body: idle_limited(Box::pin(body), self.timeout),
        })
    }
}

/// Ends `body` with a streaming error once it goes `idle` without a chunk.
pub(crate) fn idle_limited(body: ByteStream, idle: Duration) -> ByteStream {
    let limited = futures::stream::unfold(Some(body), move |body| async move {
        let mut body = body?;
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(chunk)) => Some((chunk, Some(body))),
            Ok(None) => None,
            Err(_) => {
                UPSTREAM_TRANSPORT_ERRORS.click();
                tracing::warn!(idle_secs = idle.as_secs(), "upstream stream went idle");
                let err = Error::streaming(
                    format!("upstream sent nothing for {}s", idle.as_secs()),
                    None,
                );
                Some((Err(err), None))
            }
        }
    });
    Box::pin(limited)
}
