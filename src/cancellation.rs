//! Per-thread cancellation registry.
//!
//! Each logical conversation thread owns at most one live cancellation
//! token. Starting a new stream for a thread aborts its predecessor while
//! the registry lock is held, so two valid tokens never coexist for one id.

use std::collections::HashMap;
use std::sync::{Mutex as StdMutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::error::AbortError;
use crate::logging;

/// Something a registry entry can abort.
pub trait AbortSignal: Clone + Send + Sync + 'static {
    /// Create a fresh, not-yet-aborted signal.
    fn fresh() -> Self;

    /// Abort the signal. Implementations may fail; the registry isolates
    /// failures per entry.
    fn abort(&self) -> Result<(), AbortError>;

    fn is_aborted(&self) -> bool;
}

impl AbortSignal for CancellationToken {
    fn fresh() -> Self {
        CancellationToken::new()
    }

    fn abort(&self) -> Result<(), AbortError> {
        self.cancel();
        Ok(())
    }

    fn is_aborted(&self) -> bool {
        self.is_cancelled()
    }
}

/// Returned by [`CancellationRegistry::begin`]; identifies one stream.
#[derive(Debug, Clone)]
pub struct StreamHandle<S = CancellationToken> {
    thread_id: String,
    generation: u64,
    signal: S,
}

impl<S: AbortSignal> StreamHandle<S> {
    #[must_use]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The signal to hand to the network call and the pacer.
    #[must_use]
    pub fn signal(&self) -> &S {
        &self.signal
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }
}

impl StreamHandle<CancellationToken> {
    /// Clone of the underlying token.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.signal.clone()
    }
}

struct Entry<S> {
    generation: u64,
    signal: S,
}

struct RegistryInner<S> {
    entries: HashMap<String, Entry<S>>,
    next_generation: u64,
}

/// In-memory map of thread id to its live cancellation signal.
///
/// Construct one per application and share it (e.g. behind an `Arc`).
pub struct CancellationRegistry<S: AbortSignal = CancellationToken> {
    inner: StdMutex<RegistryInner<S>>,
}

impl<S: AbortSignal> Default for CancellationRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: AbortSignal> CancellationRegistry<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: StdMutex::new(RegistryInner {
                entries: HashMap::new(),
                next_generation: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner<S>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start a stream for `thread_id`, aborting any stream already registered
    /// for it first.
    pub fn begin(&self, thread_id: impl Into<String>) -> StreamHandle<S> {
        self.begin_with(thread_id, S::fresh())
    }

    /// Like [`begin`](Self::begin) but registers a caller-provided signal.
    pub fn begin_with(&self, thread_id: impl Into<String>, signal: S) -> StreamHandle<S> {
        let thread_id = thread_id.into();
        let mut inner = self.lock();

        if let Some(previous) = inner.entries.remove(&thread_id) {
            if let Err(err) = previous.signal.abort() {
                logging::warn(format!(
                    "Failed to abort superseded stream for thread {thread_id}: {err}"
                ));
            }
            tracing::debug!(
                thread_id = %thread_id,
                generation = previous.generation,
                "Aborted superseded stream"
            );
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.entries.insert(
            thread_id.clone(),
            Entry {
                generation,
                signal: signal.clone(),
            },
        );

        StreamHandle {
            thread_id,
            generation,
            signal,
        }
    }

    /// Abort and remove the stream for `thread_id`. Returns whether one existed.
    pub fn cancel(&self, thread_id: &str) -> bool {
        let removed = self.lock().entries.remove(thread_id);
        let Some(entry) = removed else {
            return false;
        };
        if let Err(err) = entry.signal.abort() {
            logging::warn(format!(
                "Failed to abort stream for thread {thread_id}: {err}"
            ));
        }
        tracing::debug!(thread_id = %thread_id, "Stream cancelled");
        true
    }

    /// Abort and remove every entry. A failing abort is logged and does not
    /// stop the remaining entries from being processed.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, Entry<S>)> = self.lock().entries.drain().collect();
        let count = drained.len();
        let mut failures = 0usize;

        for (thread_id, entry) in drained {
            if let Err(err) = entry.signal.abort() {
                failures += 1;
                logging::warn(format!(
                    "Failed to abort stream for thread {thread_id}: {err}"
                ));
            }
        }

        if count > 0 {
            tracing::debug!(count, failures, "Cancelled all streams");
        }
        count
    }

    /// Clear the registry entry for a stream that ended on its own.
    ///
    /// Does nothing when the thread has since been taken over by a newer
    /// stream. Returns whether an entry was removed.
    pub fn finish(&self, handle: &StreamHandle<S>) -> bool {
        let mut inner = self.lock();
        let owned = inner
            .entries
            .get(&handle.thread_id)
            .is_some_and(|entry| entry.generation == handle.generation);
        if owned {
            inner.entries.remove(&handle.thread_id);
        }
        owned
    }

    #[must_use]
    pub fn is_active(&self, thread_id: &str) -> bool {
        self.lock().entries.contains_key(thread_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
