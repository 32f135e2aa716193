//! Out-of-band control of a stream: interrupting waits and closing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Result, StreamError};

#[derive(Debug, Default)]
struct ControlState {
    closed: AtomicBool,
    interrupted: AtomicBool,
    wake: Notify,
}

/// Cloneable handle shared by a stream and anyone who needs to stop it.
///
/// `interrupt` behaves like a thread interrupt flag: it wakes a task that is
/// currently waiting on the stream, or, if none is, makes the next wait
/// return immediately. `close` is permanent.
#[derive(Debug, Clone, Default)]
pub struct StreamControl {
    inner: Arc<ControlState>,
}

impl StreamControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes the waiting consumer with an `Interrupted` outcome.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
        self.inner.wake.notify_waiters();
    }

    /// Marks the stream closed and wakes any waiting consumer.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.wake.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Fails with `Closed` once the stream has been closed.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        Ok(())
    }

    /// Fails if the stream is closed or a pending interrupt is set.
    ///
    /// Consumes the interrupt.
    pub fn check(&self) -> Result<()> {
        self.ensure_open()?;
        if self.inner.interrupted.swap(false, Ordering::SeqCst) {
            return Err(StreamError::Interrupted);
        }
        Ok(())
    }

    /// Suspends for at most one `granularity` step, never past `deadline`.
    ///
    /// Returns early when the stream is interrupted or closed, or when `data`
    /// is notified.
    pub(crate) async fn idle(
        &self,
        deadline: Option<Instant>,
        granularity: Duration,
        data: Option<&Notify>,
    ) -> Result<()> {
        let step = match deadline {
            Some(deadline) => granularity.min(deadline.saturating_duration_since(Instant::now())),
            None => granularity,
        };

        let woken = self.inner.wake.notified();
        tokio::pin!(woken);
        woken.as_mut().enable();
        // Registered before checking, so an interrupt issued now is not lost.
        self.check()?;

        match data {
            Some(data) => {
                tokio::select! {
                    _ = &mut woken => {}
                    _ = data.notified() => {}
                    _ = tokio::time::sleep(step) => {}
                }
            }
            None => {
                tokio::select! {
                    _ = &mut woken => {}
                    _ = tokio::time::sleep(step) => {}
                }
            }
        }

        self.check()
    }
}

/// Whether `deadline` has passed. `None` never passes.
pub(crate) fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}
