//! Single-pass rewriter that folds `reasoning_content` into tagged spans.
//!
//! Reasoning models stream their chain of thought in a separate
//! `reasoning_content` delta field. Renderers that only understand `content`
//! get the reasoning inline, wrapped in a fixed tag pair, with the span
//! closed as soon as ordinary content resumes (or at the `[DONE]` sentinel).
//! Citations sent by search-backed models are appended once as a numbered
//! footnote when the answer stops normally.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use serde::{Deserialize, Serialize};

use crate::models::{Choice, Delta, FINISH_STOP, StreamEvent};
use crate::sse::{ByteStream, LineFramer, StreamResponse, data_payload, is_done_line};

// === Tags ===

/// Tag vocabulary used to delimit a reasoning span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagStyle {
    /// `<think>` / `</think>`
    #[default]
    Thinking,
    /// `<reasoning>` / `</reasoning>`
    Reasoning,
}

impl TagStyle {
    #[must_use]
    pub fn open(self) -> &'static str {
        match self {
            TagStyle::Thinking => "<think>",
            TagStyle::Reasoning => "<reasoning>",
        }
    }

    #[must_use]
    pub fn close(self) -> &'static str {
        match self {
            TagStyle::Thinking => "</think>",
            TagStyle::Reasoning => "</reasoning>",
        }
    }
}

impl fmt::Display for TagStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagStyle::Thinking => f.write_str("thinking"),
            TagStyle::Reasoning => f.write_str("reasoning"),
        }
    }
}

impl FromStr for TagStyle {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "thinking" | "think" => Ok(TagStyle::Thinking),
            "reasoning" => Ok(TagStyle::Reasoning),
            other => Err(format!(
                "invalid tag style '{other}': expected thinking or reasoning"
            )),
        }
    }
}

// === State ===

/// Per-response rewrite state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReasoningState {
    pub in_span: bool,
    /// First non-empty citation list seen on the stream.
    pub citations: Option<Vec<String>>,
    pub citations_appended: bool,
}

/// Render the numbered citation footnote appended to the final content.
#[must_use]
pub fn citation_footnote(citations: &[String]) -> String {
    let mut footnote = String::from("\n\n**Citations:**");
    for (index, url) in citations.iter().enumerate() {
        footnote.push_str(&format!("\n[{}] {url}", index + 1));
    }
    footnote
}

// === Transformer ===

/// Rewrites one SSE response. Create a fresh instance per response.
#[derive(Debug, Clone, Default)]
pub struct ReasoningStreamTransformer {
    tags: TagStyle,
    state: ReasoningState,
}

impl ReasoningStreamTransformer {
    #[must_use]
    pub fn new(tags: TagStyle) -> Self {
        Self {
            tags,
            state: ReasoningState::default(),
        }
    }

    #[must_use]
    pub fn tags(&self) -> TagStyle {
        self.tags
    }

    #[must_use]
    pub fn state(&self) -> &ReasoningState {
        &self.state
    }

    /// Rewrite one complete SSE line into the lines to emit in its place.
    ///
    /// Non-data lines and data lines that are not valid events pass through
    /// untouched. Events that need no rewrite are also emitted byte for byte.
    pub fn transform_line(&mut self, line: &str) -> Vec<String> {
        let Some(payload) = data_payload(line) else {
            return vec![line.to_string()];
        };

        if is_done_line(line) {
            let mut out = Vec::with_capacity(3);
            if self.state.in_span {
                self.state.in_span = false;
                let closing = StreamEvent::content_only(self.tags.close());
                match serde_json::to_string(&closing) {
                    Ok(json) => {
                        out.push(format!("data: {json}"));
                        out.push(String::new());
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Failed to serialize closing reasoning event");
                    }
                }
            }
            out.push(line.to_string());
            return out;
        }

        let event: StreamEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(error = %err, "Passing through unparseable SSE data line");
                return vec![line.to_string()];
            }
        };

        let Some(rewritten) = self.transform_event(event) else {
            return vec![line.to_string()];
        };
        match serde_json::to_string(&rewritten) {
            Ok(json) => vec![format!("data: {json}")],
            Err(err) => {
                tracing::warn!(error = %err, "Failed to serialize rewritten event; passing original");
                vec![line.to_string()]
            }
        }
    }

    /// Apply the rewrite rules to one event. Returns `None` when the event
    /// needs no change.
    pub fn transform_event(&mut self, event: StreamEvent) -> Option<StreamEvent> {
        if self.state.citations.is_none()
            && let Some(citations) = event.citations.as_ref()
            && !citations.is_empty()
        {
            self.state.citations = Some(citations.clone());
        }

        let StreamEvent {
            choices,
            citations,
            extra,
        } = event;

        let mut choices = choices?;
        if choices.is_empty() {
            return None;
        }
        let first = choices.remove(0);
        let (first, changed) = self.transform_choice(first);
        if !changed {
            return None;
        }
        choices.insert(0, first);

        Some(StreamEvent {
            choices: Some(choices),
            citations,
            extra,
        })
    }

    fn transform_choice(&mut self, choice: Choice) -> (Choice, bool) {
        let Choice {
            delta,
            finish_reason,
            extra,
        } = choice;

        let reason = finish_reason.as_ref().and_then(Option::as_deref);
        let footnote = match (reason, &self.state.citations) {
            (Some(FINISH_STOP), Some(citations)) if !self.state.citations_appended => {
                Some(citation_footnote(citations))
            }
            _ => None,
        };

        let delta = match (delta, footnote.is_some()) {
            (Some(delta), _) => Some(delta),
            (None, true) => Some(Delta::default()),
            (None, false) => None,
        };

        let mut changed = false;
        let delta = delta.map(|delta| {
            let (delta, folded) = self.fold_reasoning(delta);
            changed |= folded;
            delta
        });

        let delta = match footnote {
            Some(footnote) => {
                self.state.citations_appended = true;
                changed = true;
                delta.map(|delta| append_content(delta, &footnote))
            }
            None => delta,
        };

        (
            Choice {
                delta,
                finish_reason,
                extra,
            },
            changed,
        )
    }

    fn fold_reasoning(&mut self, delta: Delta) -> (Delta, bool) {
        let had_reasoning_key = delta.reasoning_content.is_some();
        let reasoning = delta.reasoning().map(str::to_string);
        let Delta {
            content,
            reasoning_content: _,
            extra,
        } = delta;
        let existing = content.clone().flatten().unwrap_or_default();

        let rewritten = match (reasoning, self.state.in_span) {
            (Some(reasoning), false) => {
                self.state.in_span = true;
                Some(format!("{}{reasoning}{existing}", self.tags.open()))
            }
            (Some(reasoning), true) => Some(format!("{reasoning}{existing}")),
            (None, true) => {
                self.state.in_span = false;
                Some(format!("{}{existing}", self.tags.close()))
            }
            (None, false) => None,
        };

        let changed = had_reasoning_key || rewritten.is_some();
        let content = match rewritten {
            Some(text) => Some(Some(text)),
            None => content,
        };

        (
            Delta {
                content,
                reasoning_content: None,
                extra,
            },
            changed,
        )
    }

    /// Wrap a response so its body is rewritten as it is read.
    ///
    /// Responses that are not `text/event-stream`, or carry no body, are
    /// returned unchanged.
    #[must_use]
    pub fn transform_response(self, response: StreamResponse) -> StreamResponse {
        if !response.is_event_stream() {
            return response;
        }
        let StreamResponse {
            status,
            mut headers,
            body,
        } = response;
        let Some(mut upstream) = body else {
            return StreamResponse::new(status, headers, None);
        };
        // The rewritten body has a different length.
        headers.remove(CONTENT_LENGTH);

        let mut transformer = self;
        let stream = async_stream::stream! {
            let mut framer = LineFramer::new();

            while let Some(chunk) = upstream.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };

                let mut out = String::new();
                for line in framer.push(&chunk) {
                    for rewritten in transformer.transform_line(&line) {
                        out.push_str(&rewritten);
                        out.push('\n');
                    }
                }
                if !out.is_empty() {
                    yield Ok(Bytes::from(out));
                }
            }

            if let Some(tail) = framer.finish() {
                let out = transformer.transform_line(&tail).join("\n");
                yield Ok(Bytes::from(out));
            }
        };

        let body: ByteStream = Box::pin(stream);
        StreamResponse::new(status, headers, Some(body))
    }
}

fn append_content(delta: Delta, suffix: &str) -> Delta {
    let Delta {
        content,
        reasoning_content,
        extra,
    } = delta;
    let mut text = content.flatten().unwrap_or_default();
    text.push_str(suffix);
    Delta {
        content: Some(Some(text)),
        reasoning_content,
        extra,
    }
}
