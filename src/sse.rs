//! Server-Sent Events (SSE) decoding for streamed chat replies.
//!
//! The relay forwards upstream bytes untouched, so the client sees the
//! upstream's own framing: lines of the form `data: <json>` separated by
//! blank lines, ending with `data: [DONE]`. This module turns an arbitrary
//! chunking of those bytes into an ordered sequence of text deltas.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::observability::{STREAM_FRAMES, STREAM_FRAMES_SKIPPED};
use crate::types::CompletionChunk;

/// Prefix of a line carrying a frame payload.
pub const DATA_PREFIX: &str = "data:";

/// Payload that terminates the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit of a streamed reply.
#[derive(Debug)]
pub enum Frame {
    /// A non-empty text fragment.
    Delta(String),
    /// The termination sentinel.
    Done,
    /// A well-formed frame reporting an upstream failure.
    Error(Error),
}

#[derive(Deserialize)]
struct WireFrame {
    #[serde(flatten)]
    chunk: CompletionChunk,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

impl WireError {
    fn into_error(self) -> Error {
        let status = self
            .code
            .as_ref()
            .and_then(serde_json::Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(500);
        let message = self
            .message
            .unwrap_or_else(|| "stream terminated by upstream error".to_string());
        Error::upstream_status(status, message)
    }
}

/// Incremental line decoder.
///
/// Bytes are split on `\n` before any UTF-8 decoding, so a multi-byte
/// character split across chunks is reassembled in the carried-over tail.
/// Once the sentinel or an error frame is seen, further input is ignored.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    tail: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    /// Create a decoder with an empty tail.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the sentinel or an error frame has been decoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode every complete line in `chunk` plus the carried-over tail.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.finished {
            return frames;
        }
        self.tail.extend_from_slice(chunk);
        let mut start = 0;
        while let Some(offset) = self.tail[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(frame) = self.decode_line(&self.tail[start..end]) {
                let terminal = !matches!(frame, Frame::Delta(_));
                frames.push(frame);
                if terminal {
                    self.finished = true;
                    self.tail.clear();
                    return frames;
                }
            }
            start = end + 1;
        }
        self.tail.drain(..start);
        frames
    }

    /// Decode whatever is left in the tail as a final line.
    pub fn finish(&mut self) -> Vec<Frame> {
        if self.finished || self.tail.is_empty() {
            self.tail.clear();
            return Vec::new();
        }
        let tail = std::mem::take(&mut self.tail);
        let frame = self.decode_line(&tail);
        self.finished = true;
        frame.into_iter().collect()
    }

    fn decode_line(&self, line: &[u8]) -> Option<Frame> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let line = match std::str::from_utf8(line).map_err(Error::from) {
            Ok(line) => line,
            Err(err) => {
                STREAM_FRAMES_SKIPPED.click();
                tracing::debug!(error = %err, "skipping stream line");
                return None;
            }
        };
        // Blank separators, `event:` lines and `:` comments carry nothing.
        let payload = line.strip_prefix(DATA_PREFIX)?;
        let payload = payload.strip_prefix(' ').unwrap_or(payload);
        if payload == DONE_SENTINEL {
            return Some(Frame::Done);
        }
        STREAM_FRAMES.click();
        match serde_json::from_str::<WireFrame>(payload) {
            Ok(WireFrame {
                error: Some(error), ..
            }) => Some(Frame::Error(error.into_error())),
            Ok(WireFrame { chunk, .. }) => {
                let text = chunk.delta_text();
                if text.is_empty() {
                    None
                } else {
                    Some(Frame::Delta(text.to_string()))
                }
            }
            Err(err) => {
                STREAM_FRAMES_SKIPPED.click();
                let err = Error::stream_frame(format!("{err}"), Some(Box::new(err)));
                tracing::debug!(error = %err, "skipping stream frame");
                None
            }
        }
    }
}

/// Decode a stream of raw body chunks into a stream of text deltas.
///
/// The sequence ends after the sentinel (the byte stream is dropped, even if
/// more bytes would follow), at the end of input, or after yielding one
/// error: a transport error from `bytes` or an upstream error frame.
/// Malformed frames are skipped.
pub fn decode_deltas<S>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = Result<Bytes>> + Unpin + Send,
{
    let state = (Some(bytes), FrameDecoder::new(), VecDeque::new());
    stream::unfold(
        state,
        |(mut bytes, mut decoder, mut pending): (Option<S>, FrameDecoder, VecDeque<Frame>)| async move {
            loop {
                match pending.pop_front() {
                    Some(Frame::Delta(text)) => {
                        return Some((Ok(text), (bytes, decoder, pending)));
                    }
                    Some(Frame::Done) => return None,
                    Some(Frame::Error(err)) => {
                        return Some((Err(err), (None, decoder, VecDeque::new())));
                    }
                    None => {}
                }
                let inner = bytes.as_mut()?;
                match inner.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.feed(&chunk)),
                    Some(Err(err)) => return Some((Err(err), (None, decoder, pending))),
                    None => {
                        pending.extend(decoder.finish());
                        bytes = None;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> String {
        let payload = serde_json::json!({"choices": [{"delta": {"content": text}}]});
        format!("data: {payload}\n\n")
    }

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = Result<Bytes>> + Unpin + Send {
        let owned = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p)))
            .collect::<Vec<_>>();
        stream::iter(owned)
    }

    async fn collect(parts: &[&[u8]]) -> Vec<Result<String>> {
        decode_deltas(chunks(parts)).collect().await
    }

    async fn collect_text(parts: &[&[u8]]) -> String {
        collect(parts)
            .await
            .into_iter()
            .map(|d| d.unwrap())
            .collect()
    }

    fn sample() -> Vec<u8> {
        let mut body = String::new();
        body.push_str(": OPENROUTER PROCESSING\n\n");
        body.push_str(&frame("We "));
        body.push_str(&frame("offer "));
        body.push_str(&frame("naïve "));
        body.push_str(&frame("X and Y."));
        body.push_str("data: [DONE]\n\n");
        body.into_bytes()
    }

    #[tokio::test]
    async fn decodes_single_chunk() {
        let body = sample();
        let deltas = collect(&[&body]).await;
        let deltas = deltas.into_iter().map(|d| d.unwrap()).collect::<Vec<_>>();
        assert_eq!(deltas, vec!["We ", "offer ", "naïve ", "X and Y."]);
    }

    #[tokio::test]
    async fn chunk_boundaries_do_not_change_text() {
        let body = sample();
        let whole = collect_text(&[&body]).await;
        for size in [1, 2, 3, 7, 16, 33] {
            let parts = body.chunks(size).collect::<Vec<_>>();
            assert_eq!(collect_text(&parts).await, whole, "chunk size {size}");
        }
        // Split inside the two-byte 'ï'.
        let split = body.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let parts = [&body[..split], &body[split..]];
        assert_eq!(collect_text(&parts).await, whole);
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let good = frame("after");
        let parts: Vec<&[u8]> = vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"before \"}}\n\n",
            b"data: {not json}\n\n",
            good.as_bytes(),
            b"data: [DONE]\n\n",
        ];
        assert_eq!(collect_text(&parts).await, "after");

        let first = frame("before ");
        let parts: Vec<&[u8]> = vec![first.as_bytes(), b"data: {oops\n\n", good.as_bytes()];
        assert_eq!(collect_text(&parts).await, "before after");
    }

    #[tokio::test]
    async fn done_terminates_even_with_trailing_bytes() {
        let first = frame("only");
        let late = frame("ignored");
        let parts: Vec<&[u8]> = vec![first.as_bytes(), b"data: [DONE]\n\n", late.as_bytes()];
        let deltas = collect(&parts).await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].as_ref().unwrap(), "only");
    }

    #[tokio::test]
    async fn accepts_crlf_and_missing_space() {
        let parts: Vec<&[u8]> = vec![
            b"data:{\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\r\n\r\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\r\n\r\ndata: [DONE]\r\n",
        ];
        assert_eq!(collect_text(&parts).await, "ab");
    }

    #[tokio::test]
    async fn empty_deltas_are_not_emitted() {
        let parts: Vec<&[u8]> = vec![
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":null}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n",
        ];
        let deltas = collect(&parts).await;
        assert_eq!(deltas.len(), 1);
    }

    #[tokio::test]
    async fn tail_without_newline_is_flushed() {
        let parts: Vec<&[u8]> = vec![b"data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}"];
        assert_eq!(collect_text(&parts).await, "end");
    }

    #[tokio::test]
    async fn error_frame_ends_sequence() {
        let first = frame("partial");
        let parts: Vec<&[u8]> = vec![
            first.as_bytes(),
            b"data: {\"error\":{\"code\":502,\"message\":\"Provider returned error\"}}\n\n",
            b"data: [DONE]\n\n",
        ];
        let deltas = collect(&parts).await;
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].as_ref().unwrap(), "partial");
        let err = deltas[1].as_ref().unwrap_err();
        assert!(err.is_upstream_status());
        assert_eq!(err.status_code(), Some(502));
        assert!(err.to_string().contains("Provider returned error"));
    }

    #[tokio::test]
    async fn transport_error_ends_sequence() {
        let first = frame("partial");
        let items = vec![
            Ok(Bytes::from(first)),
            Err(Error::streaming("connection reset", None)),
            Ok(Bytes::from(frame("never"))),
        ];
        let deltas: Vec<_> = decode_deltas(stream::iter(items)).collect().await;
        assert_eq!(deltas.len(), 2);
        assert!(deltas[1].is_err());
    }

    #[test]
    fn decoder_ignores_input_after_done() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"data: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n");
        assert!(matches!(frames.as_slice(), [Frame::Done]));
        assert!(decoder.is_finished());
        assert!(decoder.feed(frame("y").as_bytes()).is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn decoder_carries_partial_lines() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: {\"choices\":[{\"delta\":").is_empty());
        let frames = decoder.feed(b"{\"content\":\"hi\"}}]}\n");
        assert!(matches!(frames.as_slice(), [Frame::Delta(t)] if t == "hi"));
    }

    #[test]
    fn sentinel_must_match_exactly() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: [DONE] \n").is_empty());
        assert!(decoder.feed(b"data:  [DONE]\n").is_empty());
        assert!(!decoder.is_finished());
        let frames = decoder.feed(frame("still here").as_bytes());
        assert!(matches!(frames.as_slice(), [Frame::Delta(t)] if t == "still here"));
        let frames = decoder.feed(b"data:[DONE]\r\n");
        assert!(matches!(frames.as_slice(), [Frame::Done]));
    }

    #[test]
    fn invalid_utf8_line_is_skipped() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: \xff\xfe\n").is_empty());
        let frames = decoder.feed(frame("ok").as_bytes());
        assert!(matches!(frames.as_slice(), [Frame::Delta(t)] if t == "ok"));
    }
}
