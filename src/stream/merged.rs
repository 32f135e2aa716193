//! Interleaving of several tracked event streams into one.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::control::deadline_passed;
use super::{
    BlockingStream, BoxedStream, MergedToken, Result, StreamControl, TrackedEvent, TrackingToken,
};

struct Source {
    name: String,
    stream: BoxedStream<TrackedEvent>,
}

/// Merges named event streams, preserving each source's internal order.
///
/// Among the sources whose head is ready, the event with the earliest
/// timestamp goes first; ties go to the source registered first. Tokens
/// handed out are [`TrackingToken::Merged`] and record the last consumed
/// position of every source, so the merge can be reopened from any of them.
///
/// Closing through a [`StreamControl`] handle from another task releases the
/// sources the next time the merge is read or wakes up.
pub struct MergedStream {
    sources: Vec<Source>,
    token: MergedToken,
    head: Option<usize>,
    control: StreamControl,
    poll_interval: Duration,
    released: bool,
}

impl MergedStream {
    /// Creates a merge over `sources`, already positioned at `token`.
    pub fn new(
        sources: Vec<(String, BoxedStream<TrackedEvent>)>,
        token: MergedToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sources: sources
                .into_iter()
                .map(|(name, stream)| Source { name, stream })
                .collect(),
            token,
            head: None,
            control: StreamControl::new(),
            poll_interval,
            released: false,
        }
    }

    /// The token of the last consumed event.
    pub fn token(&self) -> &MergedToken {
        &self.token
    }

    /// Picks the source whose head goes next, keeping the choice stable
    /// until that head is consumed.
    fn select_head(&mut self) -> Result<Option<usize>> {
        self.ensure_open()?;
        if let Some(index) = self.head {
            if self.sources[index].stream.peek()?.is_some() {
                return Ok(Some(index));
            }
            self.head = None;
        }

        let mut earliest: Option<(usize, chrono::DateTime<chrono::Utc>)> = None;
        for (index, source) in self.sources.iter_mut().enumerate() {
            if let Some(tracked) = source.stream.peek()? {
                let timestamp = tracked.event.timestamp;
                if earliest.map_or(true, |(_, best)| timestamp < best) {
                    earliest = Some((index, timestamp));
                }
            }
        }

        self.head = earliest.map(|(index, _)| index);
        Ok(self.head)
    }

    /// Fails with `Closed` once closed, closing the sources on first sight.
    fn ensure_open(&mut self) -> Result<()> {
        if let Err(e) = self.control.ensure_open() {
            self.release_sources();
            return Err(e);
        }
        Ok(())
    }

    fn release_sources(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for source in &mut self.sources {
            source.stream.close();
        }
    }

    fn merged(&self, index: usize, tracked: TrackedEvent) -> (MergedToken, TrackedEvent) {
        let name = &self.sources[index].name;
        let token = match tracked.token.position() {
            Some(position) => self.token.advanced(name, position),
            None => self.token.clone(),
        };
        let event = TrackedEvent {
            token: TrackingToken::Merged(token.clone()),
            event: tracked.event,
        };
        (token, event)
    }
}

#[async_trait]
impl BlockingStream<TrackedEvent> for MergedStream {
    fn peek(&mut self) -> Result<Option<TrackedEvent>> {
        let Some(index) = self.select_head()? else {
            return Ok(None);
        };
        Ok(self.sources[index]
            .stream
            .peek()?
            .map(|tracked| self.merged(index, tracked).1))
    }

    fn try_next(&mut self) -> Result<Option<TrackedEvent>> {
        let Some(index) = self.select_head()? else {
            return Ok(None);
        };
        let Some(tracked) = self.sources[index].stream.try_next()? else {
            return Ok(None);
        };
        self.head = None;
        let (token, event) = self.merged(index, tracked);
        self.token = token;
        Ok(Some(event))
    }

    async fn await_available(&mut self, deadline: Option<Instant>) -> Result<bool> {
        loop {
            if self.select_head()?.is_some() {
                return Ok(true);
            }
            if deadline_passed(deadline) {
                return Ok(false);
            }
            if let Err(e) = self.control.idle(deadline, self.poll_interval, None).await {
                self.ensure_open()?;
                return Err(e);
            }
        }
    }

    fn close(&mut self) {
        self.control.close();
        self.release_sources();
    }

    fn control(&self) -> StreamControl {
        self.control.clone()
    }
}
