//! Drives one assistant response through the pipeline: register the thread,
//! open the upstream stream, rewrite reasoning spans and pace the visible
//! text to a sink.

use std::future::Future;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::cancellation::CancellationRegistry;
use crate::logging;
use crate::models::StreamEvent;
use crate::error::PacerError;
use crate::pacer::{AdaptiveOutputPacer, OutputSink, PacerConfig, PacerStats};
use crate::reasoning::{ReasoningStreamTransformer, TagStyle};
use crate::sse::{LineFramer, StreamResponse, data_payload, is_done_line};

/// Per-session knobs.
#[derive(Debug, Clone, Default)]
pub struct RelayOptions {
    pub tags: TagStyle,
    pub pacer: PacerConfig,
}

/// Summary of one relayed response.
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    /// Parsed `data:` events, excluding the sentinel.
    pub events: usize,
    /// Characters handed to the pacer.
    pub content_chars: usize,
    pub finish_reason: Option<String>,
    pub cancelled: bool,
    pub stats: PacerStats,
}

/// Run a full session for `thread_id`.
///
/// Any stream already running for the thread is aborted first. `connect`
/// receives the session's cancellation token and opens the upstream
/// response. The registry entry is cleared when the session ends, unless a
/// newer session has taken the thread over.
pub async fn run_session<F, Fut>(
    registry: &CancellationRegistry,
    thread_id: &str,
    options: &RelayOptions,
    sink: impl OutputSink,
    connect: F,
) -> Result<RelayOutcome>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<StreamResponse>>,
{
    let handle = registry.begin(thread_id);
    let token = handle.token();
    tracing::debug!(
        thread_id = handle.thread_id(),
        generation = handle.generation(),
        "Session started"
    );

    let pacer = AdaptiveOutputPacer::new(sink, options.pacer.clone(), Some(token.clone()));

    let result = connect_and_relay(&pacer, &token, options, connect).await;

    registry.finish(&handle);
    if result.is_err() {
        pacer.stop();
    }
    result
}

async fn connect_and_relay<F, Fut>(
    pacer: &AdaptiveOutputPacer,
    token: &CancellationToken,
    options: &RelayOptions,
    connect: F,
) -> Result<RelayOutcome>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<StreamResponse>>,
{
    let response = tokio::select! {
        () = token.cancelled() => None,
        response = connect(token.clone()) => Some(response?),
    };
    let Some(response) = response else {
        pacer.stop();
        return Ok(RelayOutcome::cancelled_before_start(pacer.stats()));
    };
    let transformer = ReasoningStreamTransformer::new(options.tags);
    relay(response, transformer, pacer, token).await
}

/// Relay `response` through `transformer` into `pacer`, waiting until the
/// pacer has drained or `cancel` fires.
pub async fn relay(
    response: StreamResponse,
    transformer: ReasoningStreamTransformer,
    pacer: &AdaptiveOutputPacer,
    cancel: &CancellationToken,
) -> Result<RelayOutcome> {
    let mut collector = Collector::new(pacer);

    if !response.is_event_stream() {
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;
        collector.push_plain(&body);
    } else if let Some(mut body) = transformer.transform_response(response).body {
        let mut framer = LineFramer::new();
        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => {
                    collector.cancelled = true;
                    break;
                }
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.context("Upstream stream failed")?;
            for line in framer.push(&chunk) {
                collector.push_line(&line);
            }
            if collector.cancelled || collector.done {
                break;
            }
        }
        if !collector.cancelled
            && let Some(tail) = framer.finish()
        {
            collector.push_line(&tail);
        }
    }

    let cancelled = collector.cancelled || !drain(pacer, cancel).await;
    if cancelled {
        pacer.stop();
        logging::debug("Session cancelled; pending output discarded");
    }

    Ok(RelayOutcome {
        events: collector.events,
        content_chars: collector.content_chars,
        finish_reason: collector.finish_reason,
        cancelled,
        stats: pacer.stats(),
    })
}

/// Wait for the pacer to emit everything. Returns false when cancelled.
async fn drain(pacer: &AdaptiveOutputPacer, cancel: &CancellationToken) -> bool {
    let (tx, rx) = oneshot::channel();
    pacer.complete(move || {
        let _ = tx.send(());
    });
    tokio::select! {
        () = cancel.cancelled() => false,
        // The callback is dropped, closing the channel, when the pacer aborts.
        result = rx => result.is_ok(),
    }
}

struct Collector<'a> {
    pacer: &'a AdaptiveOutputPacer,
    events: usize,
    content_chars: usize,
    finish_reason: Option<String>,
    cancelled: bool,
    done: bool,
}

impl<'a> Collector<'a> {
    fn new(pacer: &'a AdaptiveOutputPacer) -> Self {
        Self {
            pacer,
            events: 0,
            content_chars: 0,
            finish_reason: None,
            cancelled: false,
            done: false,
        }
    }

    fn push_line(&mut self, line: &str) {
        if self.done || self.cancelled {
            return;
        }
        if is_done_line(line) {
            self.done = true;
            return;
        }
        let Some(payload) = data_payload(line) else {
            return;
        };
        let event: StreamEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(error = %err, "Skipping unparseable event");
                return;
            }
        };
        self.events += 1;
        if let Some(reason) = event.finish_reason() {
            self.finish_reason = Some(reason.to_string());
        }
        if let Some(content) = event.content() {
            self.push_text(content);
        }
    }

    /// Non-streaming responses: a chat-completions JSON body, or raw text.
    fn push_plain(&mut self, body: &str) {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let choice = parsed
            .as_ref()
            .and_then(|value| value.pointer("/choices/0"));
        match choice.and_then(|choice| choice.pointer("/message/content")?.as_str()) {
            Some(content) => {
                self.events += 1;
                self.finish_reason = choice
                    .and_then(|choice| choice.get("finish_reason")?.as_str())
                    .map(str::to_string);
                self.push_text(content);
            }
            None => self.push_text(body),
        }
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.pacer.add_chunk(text) {
            Ok(()) => self.content_chars += text.chars().count(),
            Err(PacerError::Closed(phase)) => {
                tracing::debug!(%phase, "Pacer closed; stopping relay");
                self.cancelled = true;
            }
            Err(err) => {
                logging::warn(format!("Dropping text: {err}"));
            }
        }
    }
}

impl RelayOutcome {
    fn cancelled_before_start(stats: PacerStats) -> Self {
        Self {
            events: 0,
            content_chars: 0,
            finish_reason: None,
            cancelled: true,
            stats,
        }
    }
}
