use futures::stream::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use serde_json::Value;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{ChatSettings, RelayRequest};
use crate::upstream::ByteStream;

/// Default relay base URL.
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How a conversation session reaches the relay.
///
/// A transport returns the raw reply body for a successful (2xx) exchange.
/// Anything else is an error: transport failures as `UpstreamTransport`,
/// non-2xx replies as `UpstreamStatus` carrying the relay's message.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Posts one chat request and returns the reply body as it arrives.
    async fn send(&self, request: &RelayRequest) -> Result<ByteStream>;
}

/// HTTP client for a chat relay.
#[derive(Debug, Clone)]
pub struct RelayClient {
    client: ReqwestClient,
    base_url: url::Url,
}

impl RelayClient {
    /// Create a client for the relay at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = url::Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = ReqwestClient::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self { client, base_url })
    }

    /// The relay's base URL.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Fetch the relay's client-safe settings.
    pub async fn fetch_settings(&self) -> Result<ChatSettings> {
        let response = self
            .client
            .get(self.endpoint("api/chat-config")?)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;
        let response = Self::check_status(response).await?;
        let body = response.bytes().await.map_err(transport_error)?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(Error::upstream_status(
            status.as_u16(),
            error_message(status.as_u16(), &body),
        ))
    }

    fn default_headers(stream: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let accept = if stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        headers.insert(header::ACCEPT, HeaderValue::from_static(accept));
        headers
    }
}

#[async_trait::async_trait]
impl Transport for RelayClient {
    async fn send(&self, request: &RelayRequest) -> Result<ByteStream> {
        let response = self
            .client
            .post(self.endpoint("api/chat")?)
            .headers(Self::default_headers(request.stream))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        let response = Self::check_status(response).await?;
        let body = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| {
                Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });
        Ok(Box::pin(body))
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    Error::upstream_transport(e.to_string(), Some(Box::new(e)))
}

/// The human-readable message for a non-2xx relay reply.
///
/// Prefers `error.message` (upstream error objects), then an `error` string
/// (relay error bodies), then `API Error: <status>`.
pub fn error_message(status: u16, body: &[u8]) -> String {
    let parsed = serde_json::from_slice::<Value>(body).ok();
    match parsed.as_ref().and_then(|v| v.get("error")) {
        Some(Value::Object(error)) => match error.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => format!("API Error: {status}"),
        },
        Some(Value::String(message)) if !message.is_empty() => message.clone(),
        _ => format!("API Error: {status}"),
    }
}
