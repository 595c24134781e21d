//! Accumulates streamed text deltas into a complete reply while passing them through.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::Error;

/// A stream wrapper that accumulates text deltas into the full reply.
///
/// This allows rendering tokens as they arrive while simultaneously building
/// the final text without a second buffer. When the stream is fully drained,
/// the accumulated text is sent via the oneshot channel returned by `new()`;
/// if any item was an error, the first error is sent instead.
pub struct AccumulatingStream {
    inner: Pin<Box<dyn Stream<Item = Result<String, Error>> + Send>>,
    text_tx: Option<tokio::sync::oneshot::Sender<Result<String, Error>>>,
    text: String,
    deltas: usize,
    error: Option<Error>,
}

impl AccumulatingStream {
    /// Wraps a delta stream to accumulate its text.
    ///
    /// Returns the stream and a receiver that will contain the accumulated
    /// text once the stream is fully drained.
    pub fn new<S>(stream: S) -> (Self, tokio::sync::oneshot::Receiver<Result<String, Error>>)
    where
        S: Stream<Item = Result<String, Error>> + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let this = Self {
            inner: Box::pin(stream),
            text_tx: Some(tx),
            text: String::new(),
            deltas: 0,
            error: None,
        };
        (this, rx)
    }

    /// The text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of deltas seen so far.
    pub fn deltas(&self) -> usize {
        self.deltas
    }

    fn finalize(&mut self) -> Result<String, Error> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(std::mem::take(&mut self.text)),
        }
    }
}

impl Stream for AccumulatingStream {
    type Item = Result<String, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(delta))) => {
                self.text.push_str(&delta);
                self.deltas += 1;
                Poll::Ready(Some(Ok(delta)))
            }
            Poll::Ready(Some(Err(e))) => {
                if self.error.is_none() {
                    self.error = Some(e.clone());
                }
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                if let Some(tx) = self.text_tx.take() {
                    let _ = tx.send(self.finalize());
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
