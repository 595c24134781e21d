//! Core chat session management.
//!
//! This module provides the `ChatSession` struct which owns the conversation
//! history and drives one exchange at a time through a [`Transport`].

use std::future::Future;
use std::time::{Duration, Instant};

use futures::StreamExt;

use crate::Error;
use crate::accumulating_stream::AccumulatingStream;
use crate::client::Transport;
use crate::error::Result;
use crate::markdown;
use crate::observability::{SESSION_ERRORS, SESSION_REPLIES, SESSION_REPLY_DURATION};
use crate::render::Renderer;
use crate::sse::decode_deltas;
use crate::types::{CompletionResponse, ConversationHistory, RelayRequest};

/// How long a reply may go without any progress before it fails.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// How often a pending reply checks the renderer for an interrupt.
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// A chat session that manages conversation state and relay interactions.
///
/// Sending takes `&mut self`, so a session never has more than one request
/// in flight and its history cannot change underneath a reply. Dropping the
/// future returned by a send abandons the reply and closes its connection;
/// the user message stays in the history.
///
/// A reply that makes no progress for the idle timeout fails through the
/// error path, and the renderer's interrupt flag is honoured while waiting.
pub struct ChatSession<T: Transport> {
    transport: T,
    history: ConversationHistory,
    system_prompt: Option<String>,
    stream: bool,
    idle_timeout: Duration,
}

impl<T: Transport> ChatSession<T> {
    /// Creates a new session that requests streamed replies.
    ///
    /// The history starts empty. Until [`set_system_prompt`] is called it
    /// holds no system message and its first element is the first user
    /// message; the relay then supplies its own system prompt upstream.
    ///
    /// [`set_system_prompt`]: ChatSession::set_system_prompt
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            history: ConversationHistory::new(),
            system_prompt: None,
            stream: true,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Sets how long a reply may stall before it fails.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sets whether replies are requested as streams.
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Returns true if replies are requested as streams.
    pub fn streaming(&self) -> bool {
        self.stream
    }

    /// The transport this session sends through.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sets the system prompt.
    ///
    /// The history keeps at most one system message, always first. Setting
    /// the same prompt twice leaves the history unchanged.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        self.history.set_system_prompt(prompt.clone());
        self.system_prompt = Some(prompt);
    }

    /// Returns the current system prompt, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Clears the conversation history.
    ///
    /// The system prompt is remembered and re-seeded on the next send.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// The conversation so far.
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Sends a user message using the session's streaming preference.
    pub async fn send(&mut self, user_input: &str, renderer: &mut dyn Renderer) -> Result<String> {
        if self.stream {
            self.send_streaming(user_input, renderer).await
        } else {
            self.send_buffered(user_input, renderer).await
        }
    }

    /// Sends a user message and waits for the complete reply.
    ///
    /// On success the reply is appended to the history and passed to
    /// `renderer.finish_response`. On failure the error is reported through
    /// `renderer.print_error` and no assistant message is appended.
    pub async fn send_buffered(
        &mut self,
        user_input: &str,
        renderer: &mut dyn Renderer,
    ) -> Result<String> {
        let start = Instant::now();
        let idle = self.idle_timeout;
        let request = self.begin(user_input, false);
        let sent = wait_for(self.transport.send(&request), idle, renderer).await;
        let mut body = settle(sent, idle, renderer)?;

        let mut buf = Vec::new();
        loop {
            let next = wait_for(body.next(), idle, renderer)
                .await
                .map(Option::transpose);
            match settle(next, idle, renderer)? {
                Some(chunk) => buf.extend_from_slice(&chunk),
                None => break,
            }
        }
        let text = parse_completion(&buf).map_err(|err| fail(err, renderer))?;
        renderer.render_markup(&markdown::render(&text));
        Ok(self.complete(text, start, renderer))
    }

    /// Sends a user message and streams the reply.
    ///
    /// This method:
    /// 1. Adds the user message to history
    /// 2. Sends a streaming request to the relay
    /// 3. Renders every delta, and the markup of the reply so far, as it arrives
    /// 4. Adds the complete assistant reply to history
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the stream fails or stalls
    /// past the idle timeout, or the renderer asks to interrupt. The history
    /// then ends with the user message.
    pub async fn send_streaming(
        &mut self,
        user_input: &str,
        renderer: &mut dyn Renderer,
    ) -> Result<String> {
        let start = Instant::now();
        let idle = self.idle_timeout;
        let request = self.begin(user_input, true);
        let sent = wait_for(self.transport.send(&request), idle, renderer).await;
        let body = settle(sent, idle, renderer)?;

        let (mut deltas, text_rx) = AccumulatingStream::new(decode_deltas(body));
        loop {
            let next = wait_for(deltas.next(), idle, renderer)
                .await
                .map(Option::transpose);
            let Some(delta) = settle(next, idle, renderer)? else {
                break;
            };
            renderer.print_delta(&delta);
            renderer.render_markup(&markdown::render(deltas.text()));
            if renderer.should_interrupt() {
                return Err(interrupt(renderer));
            }
        }

        tracing::debug!(deltas = deltas.deltas(), "reply stream drained");
        let text = match text_rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::streaming("stream closed before completion", None)),
        };
        match text {
            Ok(text) => Ok(self.complete(text, start, renderer)),
            Err(err) => Err(fail(err, renderer)),
        }
    }

    fn begin(&mut self, user_input: &str, stream: bool) -> RelayRequest {
        if self.history.is_empty()
            && let Some(prompt) = &self.system_prompt
        {
            self.history.set_system_prompt(prompt.clone());
        }
        self.history.push_user(user_input);
        tracing::debug!(messages = self.history.len(), stream, "sending chat request");
        RelayRequest::new(self.history.messages().to_vec(), stream)
    }

    fn complete(&mut self, text: String, start: Instant, renderer: &mut dyn Renderer) -> String {
        self.history.push_assistant(text.clone());
        SESSION_REPLIES.click();
        SESSION_REPLY_DURATION.add(start.elapsed().as_secs_f64());
        renderer.finish_response(&text);
        text
    }
}

/// Outcome of waiting on one step of an exchange.
enum Wait<T> {
    Ready(T),
    Interrupted,
    Idle,
}

impl<T> Wait<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Wait<U> {
        match self {
            Wait::Ready(value) => Wait::Ready(f(value)),
            Wait::Interrupted => Wait::Interrupted,
            Wait::Idle => Wait::Idle,
        }
    }
}

/// Drives `fut` until it resolves, the renderer asks to interrupt, or
/// `idle` passes.
async fn wait_for<F: Future>(fut: F, idle: Duration, renderer: &mut dyn Renderer) -> Wait<F::Output> {
    let deadline = tokio::time::Instant::now() + idle;
    tokio::pin!(fut);
    loop {
        if let Ok(output) = tokio::time::timeout(INTERRUPT_POLL, fut.as_mut()).await {
            return Wait::Ready(output);
        }
        if renderer.should_interrupt() {
            return Wait::Interrupted;
        }
        if tokio::time::Instant::now() >= deadline {
            return Wait::Idle;
        }
    }
}

/// Reports anything but a ready value through the renderer.
fn settle<T>(wait: Wait<Result<T>>, idle: Duration, renderer: &mut dyn Renderer) -> Result<T> {
    match wait {
        Wait::Ready(Ok(value)) => Ok(value),
        Wait::Ready(Err(err)) => Err(fail(err, renderer)),
        Wait::Interrupted => Err(interrupt(renderer)),
        Wait::Idle => {
            let err = Error::streaming(
                format!("no response from the relay for {}s", idle.as_secs()),
                None,
            );
            Err(fail(err, renderer))
        }
    }
}

fn parse_completion(buf: &[u8]) -> Result<String> {
    let response: CompletionResponse = serde_json::from_slice(buf).map_err(|e| {
        Error::serialization("Invalid response format", Some(Box::new(e)))
    })?;
    response
        .text()
        .map(str::to_string)
        .ok_or_else(|| Error::serialization("Invalid response format", None))
}

fn interrupt(renderer: &mut dyn Renderer) -> Error {
    SESSION_ERRORS.click();
    renderer.print_interrupted();
    Error::streaming("reply interrupted", None)
}

fn fail(err: Error, renderer: &mut dyn Renderer) -> Error {
    SESSION_ERRORS.click();
    tracing::warn!(error = %err, "chat exchange failed");
    renderer.print_error(&user_message(&err));
    err
}

/// The message shown to the user for a failed exchange.
pub fn user_message(err: &Error) -> String {
    match err {
        Error::UpstreamStatus { message, .. } => message.clone(),
        Error::UpstreamTransport { message, .. } => format!("Could not reach the relay: {message}"),
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use bytes::Bytes;
    use futures::stream;

    use super::*;
    use crate::upstream::ByteStream;

    /// One scripted reply.
    pub(crate) enum Scripted {
        /// The body yields these chunks and ends.
        Body(Vec<Vec<u8>>),
        /// The body yields these chunks and then never another.
        Stall(Vec<Vec<u8>>),
        /// The request is never answered.
        Hang,
    }

    /// Transport that replays scripted replies and records requests.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub(crate) replies: Mutex<VecDeque<Result<Scripted>>>,
        pub(crate) requests: Mutex<Vec<RelayRequest>>,
    }

    fn owned(chunks: &[&[u8]]) -> Vec<Vec<u8>> {
        chunks.iter().map(|c| c.to_vec()).collect()
    }

    impl FakeTransport {
        pub(crate) fn reply(self, chunks: &[&[u8]]) -> Self {
            self.replies
                .lock()
                .unwrap()
                .push_back(Ok(Scripted::Body(owned(chunks))));
            self
        }

        pub(crate) fn stall_after(self, chunks: &[&[u8]]) -> Self {
            self.replies
                .lock()
                .unwrap()
                .push_back(Ok(Scripted::Stall(owned(chunks))));
            self
        }

        pub(crate) fn hang(self) -> Self {
            self.replies.lock().unwrap().push_back(Ok(Scripted::Hang));
            self
        }

        pub(crate) fn fail(self, err: Error) -> Self {
            self.replies.lock().unwrap().push_back(Err(err));
            self
        }
    }

    #[async_trait::async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, request: &RelayRequest) -> Result<ByteStream> {
            self.requests.lock().unwrap().push(request.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::upstream_transport("no scripted reply", None)))?;
            let chunks = |chunks: Vec<Vec<u8>>| {
                stream::iter(
                    chunks
                        .into_iter()
                        .map(|c| Ok::<_, Error>(Bytes::from(c)))
                        .collect::<Vec<_>>(),
                )
            };
            match reply {
                Scripted::Body(body) => Ok(Box::pin(chunks(body))),
                Scripted::Stall(body) => Ok(Box::pin(chunks(body).chain(stream::pending()))),
                Scripted::Hang => std::future::pending().await,
            }
        }
    }

    /// Renderer that records every callback.
    #[derive(Default)]
    pub(crate) struct RecordingRenderer {
        pub(crate) deltas: Vec<String>,
        pub(crate) markups: Vec<String>,
        pub(crate) completed: Vec<String>,
        pub(crate) errors: Vec<String>,
        pub(crate) interrupted: usize,
        pub(crate) interrupt_after: Option<usize>,
        pub(crate) interrupt_flag: Option<Arc<AtomicBool>>,
    }

    impl Renderer for RecordingRenderer {
        fn print_delta(&mut self, delta: &str) {
            self.deltas.push(delta.to_string());
        }

        fn render_markup(&mut self, markup: &str) {
            self.markups.push(markup.to_string());
        }

        fn finish_response(&mut self, text: &str) {
            self.completed.push(text.to_string());
        }

        fn print_error(&mut self, error: &str) {
            self.errors.push(error.to_string());
        }

        fn print_info(&mut self, _: &str) {}

        fn print_interrupted(&mut self) {
            self.interrupted += 1;
        }

        fn should_interrupt(&self) -> bool {
            self.interrupt_after
                .is_some_and(|limit| self.deltas.len() >= limit)
                || self
                    .interrupt_flag
                    .as_ref()
                    .is_some_and(|flag| flag.load(Ordering::SeqCst))
        }
    }
}
