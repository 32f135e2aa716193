//! Stream that hides elements rejected by a predicate.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::trace;

use super::control::deadline_passed;
use super::{BlockingStream, BoxedStream, Result, StreamControl};

/// Predicate deciding which elements a [`FilteringStream`] exposes.
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Wraps a stream and permanently skips elements that fail `keep`.
///
/// Filtering is transparent: `peek`, `try_next` and the readiness checks
/// only ever report elements that pass the predicate. Rejected elements are
/// consumed from the delegate and discarded as a side effect of those calls.
pub struct FilteringStream<T> {
    delegate: BoxedStream<T>,
    keep: Predicate<T>,
}

impl<T: Send + 'static> FilteringStream<T> {
    pub fn new(delegate: BoxedStream<T>, keep: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            delegate,
            keep: Arc::new(keep),
        }
    }

    /// Skips rejected elements that are ready now.
    ///
    /// Returns whether the delegate's head is an element that passes.
    fn skip_rejected(&mut self) -> Result<bool> {
        while let Some(head) = self.delegate.peek()? {
            if (self.keep)(&head) {
                return Ok(true);
            }
            trace!("Skipping filtered stream element");
            self.delegate.try_next()?;
        }
        Ok(false)
    }
}

#[async_trait]
impl<T: Send + 'static> BlockingStream<T> for FilteringStream<T> {
    fn peek(&mut self) -> Result<Option<T>> {
        if !self.skip_rejected()? {
            return Ok(None);
        }
        self.delegate.peek()
    }

    fn try_next(&mut self) -> Result<Option<T>> {
        if !self.skip_rejected()? {
            return Ok(None);
        }
        self.delegate.try_next()
    }

    // Every wait on the delegate shares the caller's deadline, so time spent
    // skipping is deducted from the remaining budget.
    async fn await_available(&mut self, deadline: Option<Instant>) -> Result<bool> {
        loop {
            if self.skip_rejected()? {
                return Ok(true);
            }
            if deadline_passed(deadline) {
                return Ok(false);
            }
            if !self.delegate.await_available(deadline).await? {
                return Ok(false);
            }
        }
    }

    fn close(&mut self) {
        self.delegate.close();
    }

    fn control(&self) -> StreamControl {
        self.delegate.control()
    }
}
