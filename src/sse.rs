//! Server-sent-event framing and the response envelope the transformer works on.

use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap};

use crate::error::StreamError;

/// Literal payload that terminates a chat-completions stream.
pub const DONE_SENTINEL: &str = "[DONE]";

pub const EVENT_STREAM_MIME: &str = "text/event-stream";

/// Boxed body stream, as produced by `reqwest::Response::bytes_stream`.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

/// Return the payload of a `data:` line, without the single optional space
/// that follows the field name.
#[must_use]
pub fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Whether `line` is the `data: [DONE]` termination sentinel.
#[must_use]
pub fn is_done_line(line: &str) -> bool {
    data_payload(line).is_some_and(|payload| payload.trim() == DONE_SENTINEL)
}

// === Line Framing ===

/// Splits arbitrarily chunked bytes into complete lines.
///
/// A line is only released once its terminating `\n` has arrived, so a
/// sentinel or a multi-byte character split across chunks is reassembled
/// before anyone looks at it.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let mut line = &self.pending[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Release the trailing unterminated line, if any, at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.pending);
        let line = bytes.strip_suffix(b"\r").unwrap_or(&bytes[..]);
        Some(String::from_utf8_lossy(line).into_owned())
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

// === Response Envelope ===

/// A streaming HTTP response: status, headers and an optional body.
pub struct StreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<ByteStream>,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl StreamResponse {
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Option<ByteStream>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Build a response whose body yields the given chunks.
    #[must_use]
    pub fn from_chunks<I, B>(status: StatusCode, headers: HeaderMap, chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let chunks: Vec<Result<Bytes, StreamError>> =
            chunks.into_iter().map(|chunk| Ok(chunk.into())).collect();
        Self::new(
            status,
            headers,
            Some(futures_util::stream::iter(chunks).boxed()),
        )
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    #[must_use]
    pub fn is_event_stream(&self) -> bool {
        self.content_type().is_some_and(|value| {
            value
                .trim()
                .to_ascii_lowercase()
                .starts_with(EVENT_STREAM_MIME)
        })
    }

    /// Drain the body into a string. A missing body reads as empty.
    pub async fn text(self) -> Result<String, StreamError> {
        let Some(mut body) = self.body else {
            return Ok(String::new());
        };
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl From<reqwest::Response> for StreamResponse {
    fn from(response: reqwest::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(StreamError::from))
            .boxed();
        Self::new(status, headers, Some(body))
    }
}

/// Headers for a `text/event-stream` response.
#[must_use]
pub fn event_stream_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        reqwest::header::HeaderValue::from_static(EVENT_STREAM_MIME),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn data_payload_strips_one_optional_space() {
        assert_eq!(data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(data_payload("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(data_payload("data:  x"), Some(" x"));
        assert_eq!(data_payload("event: message"), None);
        assert_eq!(data_payload(": keep-alive"), None);
    }

    #[test]
    fn done_line_detection() {
        assert!(is_done_line("data: [DONE]"));
        assert!(is_done_line("data:[DONE]"));
        assert!(!is_done_line("data: {\"choices\":[]}"));
        assert!(!is_done_line("[DONE]"));
    }

    #[test]
    fn framer_holds_partial_lines_until_terminated() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"data: {\"a\"").is_empty());
        assert!(framer.has_pending());
        assert_eq!(framer.push(b":1}\n\nda"), vec!["data: {\"a\":1}", ""]);
        assert_eq!(framer.push(b"ta: [DO"), Vec::<String>::new());
        assert_eq!(framer.push(b"NE]\r\n"), vec!["data: [DONE]"]);
        assert!(!framer.has_pending());
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn framer_reassembles_split_multibyte_characters() {
        let text = "data: 你好\n";
        let bytes = text.as_bytes();
        let mut framer = LineFramer::new();
        let mut lines = Vec::new();
        for byte in bytes {
            lines.extend(framer.push(std::slice::from_ref(byte)));
        }
        assert_eq!(lines, vec!["data: 你好"]);
    }

    #[test]
    fn framer_releases_unterminated_tail() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"data: [DONE]").is_empty());
        assert_eq!(framer.finish().as_deref(), Some("data: [DONE]"));
    }

    #[tokio::test]
    async fn content_type_detection_ignores_parameters() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("text/event-stream; charset=utf-8"),
        );
        let response = StreamResponse::from_chunks(StatusCode::OK, headers, ["x"]);
        assert!(response.is_event_stream());
        assert_eq!(response.text().await.unwrap(), "x");

        let json = StreamResponse::from_chunks(StatusCode::OK, HeaderMap::new(), ["{}"]);
        assert!(!json.is_event_stream());
    }
}
