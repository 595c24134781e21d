//! The credential-holding relay.
//!
//! [`Relay::handle`] takes the raw body of an inbound chat request, checks
//! that a credential is configured, validates the body, injects the system
//! prompt and model parameters, and forwards the request upstream either
//! buffered or streamed. Once streamed headers are set the relay is a
//! byte-transparent pipe: chunks are forwarded exactly as they arrive.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::observability::{
    RELAY_REJECTED, RELAY_REQUESTS, RELAY_STREAM_BYTES, RELAY_STREAMED_REQUESTS,
};
use crate::types::{Message, RelayRequest, Role, TOP_P, UpstreamPayload};
use crate::upstream::{ByteStream, RequestOrigin, Upstream};

/// What the relay sends back to its caller.
pub enum RelayReply {
    /// A complete body with the upstream status passed through.
    Buffered {
        /// Upstream status code.
        status: u16,
        /// Upstream `Content-Type`, if any.
        content_type: Option<String>,
        /// Upstream body, unmodified.
        body: Bytes,
    },
    /// A live body forwarded chunk by chunk.
    Streamed {
        /// Upstream status code.
        status: u16,
        /// Upstream `Content-Type`, if any.
        content_type: Option<String>,
        /// Upstream chunks, unmodified and in arrival order.
        body: ByteStream,
    },
}

impl RelayReply {
    /// The status code the caller sees.
    pub fn status(&self) -> u16 {
        match self {
            RelayReply::Buffered { status, .. } | RelayReply::Streamed { status, .. } => *status,
        }
    }

    /// True for the streamed variant.
    pub fn is_streamed(&self) -> bool {
        matches!(self, RelayReply::Streamed { .. })
    }
}

impl std::fmt::Debug for RelayReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayReply::Buffered { status, body, .. } => f
                .debug_struct("Buffered")
                .field("status", status)
                .field("len", &body.len())
                .finish(),
            RelayReply::Streamed { status, .. } => {
                f.debug_struct("Streamed").field("status", status).finish()
            }
        }
    }
}

/// Ensures the messages sent upstream start with a system prompt.
///
/// When `messages` is empty or does not start with a system message, the
/// configured prompt is prepended; otherwise the caller's own system message
/// is kept and nothing is added.
pub fn preprocess_messages(messages: &[Message], system_prompt: &str) -> Vec<Message> {
    let mut prepared = Vec::with_capacity(messages.len() + 1);
    if messages.first().map(|m| m.role) != Some(Role::System) {
        prepared.push(Message::system(system_prompt));
    }
    prepared.extend_from_slice(messages);
    prepared
}

/// Decodes an inbound chat request body.
pub fn parse_request(body: &[u8]) -> Result<RelayRequest> {
    serde_json::from_slice::<RelayRequest>(body)
        .map_err(|_| Error::validation("messages required", Some("messages".to_string())))
}

/// Forwards chat requests upstream on behalf of clients.
#[derive(Clone)]
pub struct Relay {
    config: Arc<RelayConfig>,
    upstream: Arc<dyn Upstream>,
}

impl Relay {
    /// Creates a relay with the given configuration and upstream.
    pub fn new(config: Arc<RelayConfig>, upstream: Arc<dyn Upstream>) -> Self {
        Self { config, upstream }
    }

    /// The configuration this relay was built with.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Builds the upstream payload for a decoded request.
    pub fn payload(&self, request: &RelayRequest) -> UpstreamPayload {
        UpstreamPayload {
            model: self.config.model.clone(),
            messages: preprocess_messages(&request.messages, &self.config.system_prompt),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: TOP_P,
            stream: request.stream,
        }
    }

    /// Handles one inbound chat request body.
    ///
    /// # Errors
    ///
    /// - `Configuration` when no usable key is configured; no upstream call
    ///   is attempted.
    /// - `Validation` when the body is not `{messages: [...], stream?}`.
    /// - `UpstreamTransport` when the upstream cannot be reached.
    ///
    /// A non-2xx upstream status is not an error: it is passed through in
    /// the reply.
    pub async fn handle(&self, body: &[u8], origin: &RequestOrigin) -> Result<RelayReply> {
        RELAY_REQUESTS.click();
        let key = self.config.credentials().inspect_err(|_| {
            RELAY_REJECTED.click();
            tracing::warn!("chat request refused: relay has no usable API key");
        })?;
        let request = parse_request(body).inspect_err(|_| {
            RELAY_REJECTED.click();
        })?;
        let payload = self.payload(&request);
        tracing::debug!(
            model = %payload.model,
            messages = payload.messages.len(),
            stream = payload.stream,
            "forwarding chat request"
        );

        if payload.stream {
            RELAY_STREAMED_REQUESTS.click();
            let upstream = self.upstream.stream(key, origin, &payload).await?;
            let body = upstream.body.inspect(|chunk| {
                if let Ok(bytes) = chunk {
                    RELAY_STREAM_BYTES.count(bytes.len() as u64);
                }
            });
            Ok(RelayReply::Streamed {
                status: upstream.status,
                content_type: upstream.content_type,
                body: Box::pin(body),
            })
        } else {
            let upstream = self.upstream.complete(key, origin, &payload).await?;
            Ok(RelayReply::Buffered {
                status: upstream.status,
                content_type: upstream.content_type,
                body: upstream.body,
            })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeUpstream;
    use super::*;
    use serde_json::json;

    fn relay_with(key: Option<&str>, upstream: Arc<FakeUpstream>) -> Relay {
        let config = RelayConfig::new(key.map(String::from))
            .with_system_prompt("You answer questions about our services.");
        Relay::new(Arc::new(config), upstream)
    }

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn preprocess_prepends_when_missing() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let prepared = preprocess_messages(&history, "prompt");
        assert_eq!(prepared[0], Message::system("prompt"));
        assert_eq!(&prepared[1..], &history[..]);

        let prepared = preprocess_messages(&[], "prompt");
        assert_eq!(prepared, vec![Message::system("prompt")]);
    }

    #[test]
    fn preprocess_keeps_existing_system() {
        let history = vec![Message::system("mine"), Message::user("hi")];
        let prepared = preprocess_messages(&history, "prompt");
        assert_eq!(prepared, history);
    }

    #[test]
    fn preprocess_only_looks_at_first_message() {
        let history = vec![Message::user("hi"), Message::system("late")];
        let prepared = preprocess_messages(&history, "prompt");
        assert_eq!(prepared.len(), 3);
        assert_eq!(prepared[0], Message::system("prompt"));
    }

    #[tokio::test]
    async fn buffered_passes_status_and_body_through() {
        let upstream = Arc::new(FakeUpstream::new(
            200,
            vec![br#"{"choices":[{"message":{"content":"We offer X and Y."}}]}"#],
        ));
        let relay = relay_with(Some("sk-live"), upstream.clone());
        let reply = relay
            .handle(
                &body(json!({"messages": [{"role": "user", "content": "hi"}]})),
                &RequestOrigin::default(),
            )
            .await
            .unwrap();
        match reply {
            RelayReply::Buffered { status, body, .. } => {
                assert_eq!(status, 200);
                assert_eq!(
                    &body[..],
                    br#"{"choices":[{"message":{"content":"We offer X and Y."}}]}"#
                );
            }
            other => panic!("expected buffered reply, got {other:?}"),
        }

        let payloads = upstream.payloads.lock().unwrap();
        let payload = &payloads[0];
        assert_eq!(payload.model, crate::config::DEFAULT_MODEL);
        assert_eq!(payload.top_p, 0.95);
        assert!(!payload.stream);
        assert_eq!(
            payload.messages[0],
            Message::system("You answer questions about our services.")
        );
        assert_eq!(upstream.keys.lock().unwrap()[0], "sk-live");
    }

    #[tokio::test]
    async fn upstream_error_status_is_not_remapped() {
        let upstream = Arc::new(FakeUpstream::new(
            402,
            vec![br#"{"error":{"message":"Insufficient credits"}}"#],
        ));
        let relay = relay_with(Some("sk-live"), upstream);
        let reply = relay
            .handle(&body(json!({"messages": []})), &RequestOrigin::default())
            .await
            .unwrap();
        assert_eq!(reply.status(), 402);
    }

    #[tokio::test]
    async fn streamed_chunks_forwarded_unmodified() {
        let chunks: Vec<&'static [u8]> = vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"We \"}}]}\n\nda",
            b"ta: {\"choices\":[{\"delta\":{\"content\":\"offer\"}}]}\n\n",
            b"data: [DONE]\n\n",
        ];
        let upstream = Arc::new(FakeUpstream::new(200, chunks.clone()));
        let relay = relay_with(Some("sk-live"), upstream.clone());
        let reply = relay
            .handle(
                &body(json!({"messages": [{"role": "user", "content": "hi"}], "stream": true})),
                &RequestOrigin::default(),
            )
            .await
            .unwrap();
        let RelayReply::Streamed { status, body, .. } = reply else {
            panic!("expected streamed reply");
        };
        assert_eq!(status, 200);
        let forwarded = body
            .map(|chunk| chunk.unwrap().to_vec())
            .collect::<Vec<_>>()
            .await;
        let expected = chunks.iter().map(|c| c.to_vec()).collect::<Vec<_>>();
        assert_eq!(forwarded, expected);
        assert!(upstream.payloads.lock().unwrap()[0].stream);
    }

    #[tokio::test]
    async fn missing_key_fails_before_upstream() {
        let upstream = Arc::new(FakeUpstream::new(200, vec![b"{}"]));
        let relay = relay_with(None, upstream.clone());
        let err = relay
            .handle(&body(json!({"messages": []})), &RequestOrigin::default())
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(err.http_status(), 503);
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn configuration_checked_before_body() {
        let upstream = Arc::new(FakeUpstream::new(200, vec![b"{}"]));
        let relay = relay_with(Some("YOUR_OPENROUTER_API_KEY"), upstream.clone());
        let err = relay
            .handle(b"not json", &RequestOrigin::default())
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn malformed_bodies_are_validation_errors() {
        let upstream = Arc::new(FakeUpstream::new(200, vec![b"{}"]));
        let relay = relay_with(Some("sk-live"), upstream.clone());
        for bad in [
            b"not json".to_vec(),
            body(json!({"stream": true})),
            body(json!({"messages": "hello"})),
            body(json!([])),
            body(json!({"messages": [{"role": "wizard", "content": "x"}]})),
        ] {
            let err = relay
                .handle(&bad, &RequestOrigin::default())
                .await
                .unwrap_err();
            assert!(err.is_validation(), "{err}");
            assert_eq!(err.http_status(), 400);
        }
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn transport_failure_is_500_with_cause() {
        let upstream = Arc::new(FakeUpstream::unreachable());
        let relay = relay_with(Some("sk-live"), upstream);
        let err = relay
            .handle(&body(json!({"messages": []})), &RequestOrigin::default())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 500);
        assert_eq!(
            err.response_body()["error"],
            "API request failed: connection refused"
        );
    }
}
