//! Adaptive output pacer.
//!
//! Text handed to [`AdaptiveOutputPacer::add_chunk`] is tokenized and
//! released to an [`OutputSink`] one token at a time, sleeping between
//! tokens according to [`timing::token_delay`]. The pacing loop is a single
//! tokio task per pacer; a loop epoch makes any superseded loop exit at its
//! next step, so two loops never emit for the same pacer.

pub mod config;
pub mod timing;
pub mod tokenizer;

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use config::{PacerConfig, PacerConfigUpdate};
pub use tokenizer::{Token, TokenCategory, tokenize};

use crate::error::PacerError;
use crate::logging;

/// Destination for paced text.
///
/// `emit` runs while the pacer holds its internal lock; a sink must not call
/// back into the pacer that feeds it.
pub trait OutputSink: Send + 'static {
    fn emit(&mut self, text: &str);
}

impl<F> OutputSink for F
where
    F: FnMut(&str) + Send + 'static,
{
    fn emit(&mut self, text: &str) {
        self(text);
    }
}

/// Lifecycle of a pacing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacerPhase {
    Idle,
    Streaming,
    Flushed,
    Completed,
    Stopped,
}

impl PacerPhase {
    /// Terminal phases reject new text until `reset`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Flushed | Self::Completed | Self::Stopped)
    }
}

impl fmt::Display for PacerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Flushed => "flushed",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Snapshot of pacer progress.
#[derive(Debug, Clone, PartialEq)]
pub struct PacerStats {
    pub total_output_chars: usize,
    pub elapsed: Duration,
    /// Emitted characters per second over `elapsed`.
    pub average_speed: f64,
    /// Characters accepted but not yet emitted.
    pub buffered_chars: usize,
    pub queued_tokens: usize,
    pub is_streaming: bool,
}

type DoneCallback = Box<dyn FnOnce() + Send + 'static>;

struct PacerState {
    phase: PacerPhase,
    config: PacerConfig,
    cancel: Option<CancellationToken>,

    // Raw text not yet tokenized.
    buffer: String,
    buffer_chars: usize,
    queue: VecDeque<Token>,
    queued_chars: usize,

    loop_running: bool,
    epoch: u64,
    halt: CancellationToken,

    completing: bool,
    on_done: Vec<DoneCallback>,

    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    total_output_chars: usize,

    sink: Box<dyn OutputSink>,
}

/// What the loop does after one step.
enum Step {
    Exit,
    Finalize(Vec<DoneCallback>),
    Sleep(Duration),
    Idle,
}

impl PacerState {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn pending_chars(&self) -> usize {
        self.buffer_chars + self.queued_chars
    }

    fn mark_started(&mut self) {
        if self.phase == PacerPhase::Idle {
            self.phase = PacerPhase::Streaming;
        }
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    fn finish_as(&mut self, phase: PacerPhase) {
        self.phase = phase;
        self.finished_at = Some(Instant::now());
    }

    fn emit(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.sink.emit(text);
        self.total_output_chars += text.chars().count();
    }

    /// Emit every queued token then the untokenized buffer, as one write.
    fn emit_all(&mut self) {
        let mut text = String::new();
        for token in self.queue.drain(..) {
            text.push_str(&token.content);
        }
        text.push_str(&mem::take(&mut self.buffer));
        self.queued_chars = 0;
        self.buffer_chars = 0;
        self.emit(&text);
    }

    fn clear_pending(&mut self) {
        self.buffer.clear();
        self.buffer_chars = 0;
        self.queue.clear();
        self.queued_chars = 0;
    }

    fn halt_loop(&mut self) {
        if self.loop_running {
            self.halt.cancel();
            self.loop_running = false;
        }
        self.epoch += 1;
    }

    /// Cancellation observed: drop everything without emitting.
    fn abort(&mut self) {
        self.halt_loop();
        self.clear_pending();
        self.completing = false;
        let dropped = mem::take(&mut self.on_done).len();
        if self.phase != PacerPhase::Stopped {
            self.finish_as(PacerPhase::Stopped);
        }
        tracing::debug!(dropped_callbacks = dropped, "Pacer cancelled");
    }

    fn tokenize_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let text = mem::take(&mut self.buffer);
        self.buffer_chars = 0;
        for token in timing::schedule(&text, self.queued_chars, &self.config) {
            self.queued_chars += token.char_len();
            self.queue.push_back(token);
        }
    }

    fn step(&mut self, epoch: u64) -> Step {
        if epoch != self.epoch || !self.loop_running {
            return Step::Exit;
        }
        if self.is_cancelled() {
            self.abort();
            return Step::Exit;
        }
        if self.phase != PacerPhase::Streaming {
            self.loop_running = false;
            return Step::Exit;
        }

        self.tokenize_buffer();
        if let Some(token) = self.queue.pop_front() {
            self.queued_chars = self.queued_chars.saturating_sub(token.char_len());
            self.emit(&token.content);
            return Step::Sleep(token.delay);
        }

        if self.completing {
            self.completing = false;
            self.loop_running = false;
            self.finish_as(PacerPhase::Completed);
            return Step::Finalize(mem::take(&mut self.on_done));
        }
        Step::Idle
    }
}

struct Shared {
    state: StdMutex<PacerState>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PacerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

async fn cancelled(token: Option<CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn run_loop(
    shared: Arc<Shared>,
    epoch: u64,
    halt: CancellationToken,
    cancel: Option<CancellationToken>,
) {
    loop {
        let step = shared.lock().step(epoch);
        match step {
            Step::Exit => return,
            Step::Finalize(callbacks) => {
                for callback in callbacks {
                    callback();
                }
                return;
            }
            Step::Sleep(delay) => {
                tokio::select! {
                    () = halt.cancelled() => return,
                    () = cancelled(cancel.clone()) => {}
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Step::Idle => {
                tokio::select! {
                    () = halt.cancelled() => return,
                    () = cancelled(cancel.clone()) => {}
                    () = shared.wake.notified() => {}
                    () = tokio::time::sleep(timing::IDLE_POLL) => {}
                }
            }
        }
    }
}

// === Pacer ===

/// Releases text to a sink at a reading pace.
pub struct AdaptiveOutputPacer {
    shared: Arc<Shared>,
}

impl fmt::Debug for AdaptiveOutputPacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("AdaptiveOutputPacer")
            .field("phase", &state.phase)
            .field("config", &state.config)
            .field("pending_chars", &state.pending_chars())
            .finish_non_exhaustive()
    }
}

impl AdaptiveOutputPacer {
    /// Create an idle pacer. An invalid `config` falls back to defaults.
    pub fn new(
        sink: impl OutputSink,
        config: PacerConfig,
        cancel: Option<CancellationToken>,
    ) -> Self {
        let config = match config.validate() {
            Ok(()) => config,
            Err(err) => {
                logging::warn(format!("{err}; using default pacer settings"));
                PacerConfig::default()
            }
        };
        let state = PacerState {
            phase: PacerPhase::Idle,
            config,
            cancel,
            buffer: String::new(),
            buffer_chars: 0,
            queue: VecDeque::new(),
            queued_chars: 0,
            loop_running: false,
            epoch: 0,
            halt: CancellationToken::new(),
            completing: false,
            on_done: Vec::new(),
            started_at: None,
            finished_at: None,
            total_output_chars: 0,
            sink: Box::new(sink),
        };
        Self {
            shared: Arc::new(Shared {
                state: StdMutex::new(state),
                wake: Notify::new(),
            }),
        }
    }

    /// Start the loop if none is running. Without a tokio runtime the pending
    /// text is emitted unpaced. Returns false when no loop could be started.
    fn ensure_loop(&self, state: &mut PacerState) -> bool {
        if state.loop_running {
            return true;
        }
        let Ok(handle) = Handle::try_current() else {
            logging::debug("No tokio runtime; emitting text unpaced");
            state.emit_all();
            return false;
        };
        state.epoch += 1;
        state.loop_running = true;
        state.halt = CancellationToken::new();
        handle.spawn(run_loop(
            Arc::clone(&self.shared),
            state.epoch,
            state.halt.clone(),
            state.cancel.clone(),
        ));
        true
    }

    /// Queue text for paced output.
    pub fn add_chunk(&self, text: &str) -> Result<(), PacerError> {
        let mut state = self.shared.lock();
        if state.phase.is_terminal() {
            return Err(PacerError::Closed(state.phase));
        }
        if state.is_cancelled() {
            state.abort();
            return Err(PacerError::Closed(PacerPhase::Stopped));
        }
        if text.is_empty() {
            return Ok(());
        }

        state.mark_started();
        state.buffer.push_str(text);
        state.buffer_chars += text.chars().count();

        if !state.config.enabled {
            state.emit_all();
            return Ok(());
        }

        if state.pending_chars() > state.config.max_buffer_size {
            tracing::debug!(
                pending = state.pending_chars(),
                limit = state.config.max_buffer_size,
                "Pacer buffer overflow; flushing"
            );
            state.halt_loop();
            state.emit_all();
            return Ok(());
        }

        if self.ensure_loop(&mut state) {
            drop(state);
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    /// Run `on_done` once everything accepted so far has been emitted.
    ///
    /// If the cancellation signal has fired the callback is dropped and
    /// nothing more is emitted.
    pub fn complete(&self, on_done: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.lock();

        if !state.config.enabled {
            state.emit_all();
            if !state.phase.is_terminal() {
                state.halt_loop();
                state.finish_as(PacerPhase::Completed);
            }
            drop(state);
            on_done();
            return;
        }

        match state.phase {
            PacerPhase::Stopped => {
                logging::debug("complete() on a stopped pacer; callback dropped");
            }
            PacerPhase::Flushed | PacerPhase::Completed => {
                drop(state);
                on_done();
            }
            PacerPhase::Idle => {
                if state.is_cancelled() {
                    state.abort();
                    return;
                }
                state.finish_as(PacerPhase::Completed);
                drop(state);
                on_done();
            }
            PacerPhase::Streaming => {
                if state.is_cancelled() {
                    state.abort();
                    return;
                }
                state.on_done.push(Box::new(on_done));
                state.completing = true;
                if self.ensure_loop(&mut state) {
                    drop(state);
                    self.shared.wake.notify_one();
                } else {
                    state.completing = false;
                    state.finish_as(PacerPhase::Completed);
                    let callbacks = mem::take(&mut state.on_done);
                    drop(state);
                    for callback in callbacks {
                        callback();
                    }
                }
            }
        }
    }

    /// Emit everything pending right away and end the session as `Flushed`.
    /// A pending completion callback fires afterwards.
    pub fn flush(&self) {
        let mut state = self.shared.lock();
        if state.phase.is_terminal() {
            return;
        }
        if state.is_cancelled() {
            state.abort();
            return;
        }
        state.halt_loop();
        state.emit_all();
        state.completing = false;
        state.finish_as(PacerPhase::Flushed);
        let callbacks = mem::take(&mut state.on_done);
        drop(state);
        for callback in callbacks {
            callback();
        }
    }

    /// Halt pacing and discard pending text without emitting it.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        state.halt_loop();
        state.clear_pending();
        state.completing = false;
        state.on_done.clear();
        if state.phase != PacerPhase::Stopped {
            state.finish_as(PacerPhase::Stopped);
        }
    }

    /// Return to `Idle` with empty buffers and fresh stats, bound to `cancel`.
    pub fn reset(&self, cancel: Option<CancellationToken>) {
        let mut state = self.shared.lock();
        state.halt_loop();
        state.clear_pending();
        state.completing = false;
        state.on_done.clear();
        state.phase = PacerPhase::Idle;
        state.cancel = cancel;
        state.started_at = None;
        state.finished_at = None;
        state.total_output_chars = 0;
    }

    /// Change settings on a live pacer.
    ///
    /// Turning pacing off, or shrinking the buffer below what is pending,
    /// flushes the pending text immediately.
    pub fn update_config(&self, update: PacerConfigUpdate) -> Result<(), PacerError> {
        let mut state = self.shared.lock();
        let merged = state.config.merged(&update)?;
        state.config = merged;

        if state.is_cancelled() {
            state.abort();
            return Ok(());
        }
        if !state.config.enabled {
            state.emit_all();
            if !state.completing {
                state.halt_loop();
            }
        } else if state.pending_chars() > state.config.max_buffer_size {
            state.emit_all();
        }
        drop(state);
        self.shared.wake.notify_one();
        Ok(())
    }

    #[must_use]
    pub fn phase(&self) -> PacerPhase {
        self.shared.lock().phase
    }

    #[must_use]
    pub fn config(&self) -> PacerConfig {
        self.shared.lock().config.clone()
    }

    #[must_use]
    pub fn stats(&self) -> PacerStats {
        let state = self.shared.lock();
        let elapsed = match state.started_at {
            Some(started) => state
                .finished_at
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(started),
            None => Duration::ZERO,
        };
        let seconds = elapsed.as_secs_f64();
        let average_speed = if seconds > 0.0 {
            state.total_output_chars as f64 / seconds
        } else {
            0.0
        };
        PacerStats {
            total_output_chars: state.total_output_chars,
            elapsed,
            average_speed,
            buffered_chars: state.pending_chars(),
            queued_tokens: state.queue.len(),
            is_streaming: state.phase == PacerPhase::Streaming,
        }
    }
}

impl Drop for AdaptiveOutputPacer {
    fn drop(&mut self) {
        self.shared.lock().halt_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::oneshot;

    type Emitted = Arc<StdMutex<Vec<String>>>;

    fn recording_sink() -> (Emitted, impl OutputSink) {
        let emitted: Emitted = Arc::new(StdMutex::new(Vec::new()));
        let sink_log = Arc::clone(&emitted);
        let sink = move |text: &str| sink_log.lock().unwrap().push(text.to_string());
        (emitted, sink)
    }

    fn joined(emitted: &Emitted) -> String {
        emitted.lock().unwrap().concat()
    }

    async fn settle(millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn preserves_order_and_content() {
        let (emitted, sink) = recording_sink();
        let pacer = AdaptiveOutputPacer::new(sink, PacerConfig::default(), None);
        let input = ["Hello, ", "world. ", "你好！", "```rust\nfn main() {}\n```"];
        for chunk in input {
            pacer.add_chunk(chunk).unwrap();
        }

        let (tx, rx) = oneshot::channel();
        pacer.complete(move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();

        assert_eq!(joined(&emitted), input.concat());
        assert_eq!(pacer.phase(), PacerPhase::Completed);
        assert!(emitted.lock().unwrap().len() > 1, "output should be paced");
    }

    #[tokio::test(start_paused = true)]
    async fn first_token_goes_out_before_the_rest() {
        let (emitted, sink) = recording_sink();
        let pacer = AdaptiveOutputPacer::new(sink, PacerConfig::default(), None);
        pacer.add_chunk("alpha beta").unwrap();

        settle(1).await;
        assert_eq!(*emitted.lock().unwrap(), vec!["alpha".to_string()]);
        let stats = pacer.stats();
        assert_eq!(stats.queued_tokens, 2);
        assert_eq!(stats.buffered_chars, 5);
        assert!(stats.is_streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_flushes_everything_at_once() {
        let (emitted, sink) = recording_sink();
        let config = PacerConfig {
            max_buffer_size: 8,
            ..PacerConfig::default()
        };
        let pacer = AdaptiveOutputPacer::new(sink, config, None);
        pacer.add_chunk("abc ").unwrap();
        pacer.add_chunk("defghijkl").unwrap();

        assert_eq!(*emitted.lock().unwrap(), vec!["abc defghijkl".to_string()]);
        assert_eq!(pacer.phase(), PacerPhase::Streaming);

        pacer.add_chunk("mn").unwrap();
        let (tx, rx) = oneshot::channel();
        pacer.complete(move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();
        assert_eq!(joined(&emitted), "abc defghijklmn");
    }

    #[test]
    fn disabled_pacer_forwards_synchronously() {
        let (emitted, sink) = recording_sink();
        let pacer = AdaptiveOutputPacer::new(sink, PacerConfig::disabled(), None);
        pacer.add_chunk("one ").unwrap();
        pacer.add_chunk("two").unwrap();
        assert_eq!(
            *emitted.lock().unwrap(),
            vec!["one ".to_string(), "two".to_string()]
        );

        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        pacer.complete(move || flag.store(true, Ordering::SeqCst));
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(pacer.phase(), PacerPhase::Completed);
    }

    #[test]
    fn without_a_runtime_text_is_emitted_unpaced() {
        let (emitted, sink) = recording_sink();
        let pacer = AdaptiveOutputPacer::new(sink, PacerConfig::default(), None);
        pacer.add_chunk("no runtime here").unwrap();
        assert_eq!(joined(&emitted), "no runtime here");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_emission_and_drops_callback() {
        let (emitted, sink) = recording_sink();
        let token = CancellationToken::new();
        let pacer = AdaptiveOutputPacer::new(sink, PacerConfig::default(), Some(token.clone()));
        pacer.add_chunk("one two three four").unwrap();
        settle(1).await;
        assert_eq!(joined(&emitted), "one");

        token.cancel();
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        pacer.complete(move || flag.store(true, Ordering::SeqCst));

        settle(5_000).await;
        assert_eq!(joined(&emitted), "one");
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(pacer.phase(), PacerPhase::Stopped);
        assert_eq!(pacer.stats().buffered_chars, 0);
        assert_eq!(
            pacer.add_chunk("more"),
            Err(PacerError::Closed(PacerPhase::Stopped))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn loop_observes_cancellation_while_sleeping() {
        let (emitted, sink) = recording_sink();
        let token = CancellationToken::new();
        let pacer = AdaptiveOutputPacer::new(sink, PacerConfig::default(), Some(token.clone()));
        pacer.add_chunk("first second third").unwrap();
        settle(1).await;

        token.cancel();
        settle(5_000).await;
        assert_eq!(joined(&emitted), "first");
        assert_eq!(pacer.phase(), PacerPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn config_changes_after_cancellation_discard_pending_text() {
        let (emitted, sink) = recording_sink();
        let token = CancellationToken::new();
        let pacer = AdaptiveOutputPacer::new(sink, PacerConfig::default(), Some(token.clone()));
        pacer.add_chunk("one two three four").unwrap();
        settle(1).await;

        token.cancel();
        pacer
            .update_config(PacerConfigUpdate {
                enabled: Some(false),
                ..PacerConfigUpdate::default()
            })
            .unwrap();
        assert_eq!(joined(&emitted), "one");
        assert_eq!(pacer.phase(), PacerPhase::Stopped);
        assert_eq!(pacer.stats().buffered_chars, 0);

        pacer
            .update_config(PacerConfigUpdate {
                enabled: Some(true),
                max_buffer_size: Some(1),
                ..PacerConfigUpdate::default()
            })
            .unwrap();
        settle(5_000).await;
        assert_eq!(joined(&emitted), "one");
    }

    #[tokio::test(start_paused = true)]
    async fn shrinking_the_buffer_after_cancellation_emits_nothing() {
        let (emitted, sink) = recording_sink();
        let token = CancellationToken::new();
        let pacer = AdaptiveOutputPacer::new(sink, PacerConfig::default(), Some(token.clone()));
        pacer.add_chunk("alpha beta gamma").unwrap();
        settle(1).await;

        token.cancel();
        pacer
            .update_config(PacerConfigUpdate {
                max_buffer_size: Some(2),
                ..PacerConfigUpdate::default()
            })
            .unwrap();
        settle(5_000).await;
        assert_eq!(joined(&emitted), "alpha");
        assert_eq!(pacer.phase(), PacerPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_emits_rest_and_fires_pending_callback() {
        let (emitted, sink) = recording_sink();
        let pacer = AdaptiveOutputPacer::new(sink, PacerConfig::default(), None);
        pacer.add_chunk("some text here").unwrap();
        settle(1).await;

        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        pacer.complete(move || flag.store(true, Ordering::SeqCst));
        pacer.flush();

        assert!(called.load(Ordering::SeqCst));
        assert_eq!(pacer.phase(), PacerPhase::Flushed);
        assert_eq!(
            *emitted.lock().unwrap(),
            vec!["some".to_string(), " text here".to_string()]
        );

        settle(5_000).await;
        assert_eq!(emitted.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_and_reset_allows_reuse() {
        let (emitted, sink) = recording_sink();
        let pacer = AdaptiveOutputPacer::new(sink, PacerConfig::default(), None);
        pacer.add_chunk("never shown").unwrap();
        pacer.stop();
        settle(1_000).await;
        assert!(emitted.lock().unwrap().is_empty());
        assert_eq!(
            pacer.add_chunk("rejected"),
            Err(PacerError::Closed(PacerPhase::Stopped))
        );

        pacer.reset(None);
        assert_eq!(pacer.phase(), PacerPhase::Idle);
        assert_eq!(pacer.stats().total_output_chars, 0);

        pacer.add_chunk("hi").unwrap();
        let (tx, rx) = oneshot::channel();
        pacer.complete(move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();
        assert_eq!(joined(&emitted), "hi");
        assert_eq!(pacer.stats().total_output_chars, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn complete_on_idle_pacer_fires_immediately() {
        let (_emitted, sink) = recording_sink();
        let pacer = AdaptiveOutputPacer::new(sink, PacerConfig::default(), None);
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        pacer.complete(move || flag.store(true, Ordering::SeqCst));
        assert!(called.load(Ordering::SeqCst));
        assert_eq!(pacer.phase(), PacerPhase::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_live_flushes_pending_text() {
        let (emitted, sink) = recording_sink();
        let pacer = AdaptiveOutputPacer::new(sink, PacerConfig::default(), None);
        pacer.add_chunk("paced words then rest").unwrap();
        settle(1).await;
        assert_eq!(joined(&emitted), "paced");

        pacer
            .update_config(PacerConfigUpdate {
                enabled: Some(false),
                ..PacerConfigUpdate::default()
            })
            .unwrap();
        assert_eq!(joined(&emitted), "paced words then rest");
        assert_eq!(pacer.stats().buffered_chars, 0);

        pacer.add_chunk("!").unwrap();
        assert_eq!(joined(&emitted), "paced words then rest!");
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_update_is_rejected_and_config_kept() {
        let (_emitted, sink) = recording_sink();
        let pacer = AdaptiveOutputPacer::new(sink, PacerConfig::default(), None);
        let err = pacer
            .update_config(PacerConfigUpdate {
                max_speed: Some(1.0),
                ..PacerConfigUpdate::default()
            })
            .unwrap_err();
        assert!(matches!(err, PacerError::InvalidConfig(_)));
        assert_eq!(pacer.config(), PacerConfig::default());
    }

    #[tokio::test(start_paused = true)]
    async fn stats_track_output_over_time() {
        let (_emitted, sink) = recording_sink();
        let pacer = AdaptiveOutputPacer::new(sink, PacerConfig::default(), None);
        pacer.add_chunk("abc def").unwrap();
        let (tx, rx) = oneshot::channel();
        pacer.complete(move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();

        let stats = pacer.stats();
        assert_eq!(stats.total_output_chars, 7);
        assert!(stats.elapsed > Duration::ZERO);
        assert!(stats.average_speed > 0.0);
        assert!(!stats.is_streaming);
    }
}
