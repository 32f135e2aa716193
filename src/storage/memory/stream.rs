//! Live tail over an in-memory event log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::event_store::SharedLog;
use crate::stream::{
    deadline_passed, BlockingStream, Result, StreamControl, TrackedEvent, TrackingToken,
};

/// Stream over an [`InMemoryEventStore`](super::InMemoryEventStore) log.
///
/// Tokens are [`TrackingToken::Position`] holding the log index.
pub struct InMemoryEventStream {
    log: Arc<SharedLog>,
    next: usize,
    control: StreamControl,
    poll_interval: Duration,
}

impl InMemoryEventStream {
    pub(super) fn new(log: Arc<SharedLog>, next: usize, poll_interval: Duration) -> Self {
        Self {
            log,
            next,
            control: StreamControl::new(),
            poll_interval,
        }
    }
}

#[async_trait]
impl BlockingStream<TrackedEvent> for InMemoryEventStream {
    fn peek(&mut self) -> Result<Option<TrackedEvent>> {
        self.control.ensure_open()?;
        Ok(self.log.read().log.get(self.next).map(|event| TrackedEvent {
            token: TrackingToken::Position(self.next as u64),
            event: event.clone(),
        }))
    }

    fn try_next(&mut self) -> Result<Option<TrackedEvent>> {
        let next = self.peek()?;
        if next.is_some() {
            self.next += 1;
        }
        Ok(next)
    }

    async fn await_available(&mut self, deadline: Option<Instant>) -> Result<bool> {
        loop {
            if self.peek()?.is_some() {
                return Ok(true);
            }
            if deadline_passed(deadline) {
                return Ok(false);
            }
            self.control
                .idle(deadline, self.poll_interval, Some(&self.log.appended))
                .await?;
        }
    }

    fn close(&mut self) {
        self.control.close();
    }

    fn control(&self) -> StreamControl {
        self.control.clone()
    }
}
