//! Blocking, peekable streams over (possibly infinite) ordered sequences.
//!
//! A [`BlockingStream`] is pulled, never pushed: consumers peek at the head
//! without waiting, wait up to a deadline for the next item, or wait
//! indefinitely and consume it. Waiting suspends the calling task and can be
//! cut short from elsewhere through the stream's [`StreamControl`].
//!
//! Implementations:
//! - `InMemoryEventStream`: live tail of an in-memory event store
//! - [`FilteringStream`]: hides elements rejected by a predicate
//! - [`MergedStream`]: interleaves several tracked event streams

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::warn;

mod control;
mod filtering;
mod merged;
mod token;

pub(crate) use control::deadline_passed;
pub use control::StreamControl;
pub use filtering::FilteringStream;
pub use merged::MergedStream;
pub use token::{MergedToken, TrackedEvent, TrackingToken};

/// Default wake-up granularity for stream waits.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Result type for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors that can occur while reading a stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("Stream is closed")]
    Closed,

    #[error("Wait on stream was interrupted")]
    Interrupted,
}

/// A boxed stream, the form in which streams are layered on each other.
pub type BoxedStream<T> = Box<dyn BlockingStream<T>>;

/// Pull-based, peekable, timeout-aware stream.
///
/// Implementors provide the non-blocking primitives (`peek`, `try_next`) and
/// one waiting primitive (`await_available`); the consumer-facing blocking
/// operations are derived from those.
#[async_trait]
pub trait BlockingStream<T: Send + 'static>: Send {
    /// The next item, if one is ready now. Never waits.
    ///
    /// A later `try_next`/`next_available` returns this same item.
    fn peek(&mut self) -> Result<Option<T>>;

    /// Consumes the next item if one is ready now. Never waits.
    fn try_next(&mut self) -> Result<Option<T>>;

    /// Waits until an item is ready or `deadline` passes.
    ///
    /// `None` waits indefinitely. Returns `Err(Interrupted)` when the wait is
    /// interrupted through the stream's control and `Err(Closed)` once the
    /// stream is closed.
    async fn await_available(&mut self, deadline: Option<Instant>) -> Result<bool>;

    /// Releases underlying resources. Idempotent.
    fn close(&mut self);

    /// Handle for interrupting or closing this stream from another task.
    fn control(&self) -> StreamControl;

    /// Whether an item is ready right now.
    fn has_next_available(&mut self) -> Result<bool> {
        Ok(self.peek()?.is_some())
    }

    /// Waits up to `timeout` for an item to become ready.
    ///
    /// A zero timeout checks once. An interrupted wait reports `false` and
    /// leaves the stream usable.
    async fn has_next_available_within(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now().checked_add(timeout);
        match self.await_available(deadline).await {
            Err(StreamError::Interrupted) => {
                warn!("Stream consumer was interrupted, reporting no element available");
                Ok(false)
            }
            other => other,
        }
    }

    /// Waits indefinitely for the next item and consumes it.
    async fn next_available(&mut self) -> Result<T> {
        loop {
            if let Some(item) = self.try_next()? {
                return Ok(item);
            }
            self.await_available(None).await?;
        }
    }
}
