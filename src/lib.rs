//! Assistant-response streaming pipeline.
//!
//! Three pieces sit between a chat-completions endpoint and the terminal:
//!
//! - [`cancellation::CancellationRegistry`] keeps at most one live
//!   cancellation token per conversation thread.
//! - [`reasoning::ReasoningStreamTransformer`] rewrites the SSE body so
//!   `reasoning_content` deltas become tagged spans inside `content`, and
//!   appends a citation footnote once.
//! - [`pacer::AdaptiveOutputPacer`] releases text at a reading pace chosen
//!   per token from its script and the backlog.
//!
//! [`relay::run_session`] wires them together for one response.

pub mod cancellation;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod pacer;
pub mod reasoning;
pub mod relay;
pub mod sse;

pub use cancellation::{AbortSignal, CancellationRegistry, StreamHandle};
pub use error::{AbortError, PacerError, StreamError};
pub use pacer::{AdaptiveOutputPacer, OutputSink, PacerConfig, PacerConfigUpdate, PacerPhase};
pub use reasoning::{ReasoningStreamTransformer, TagStyle};
pub use sse::StreamResponse;
