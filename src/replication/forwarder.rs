//! Background replication of shared events from a local store.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ReplicationError, Replicator, Result};
use crate::config::ForwarderConfig;
use crate::message::SharedEventTypes;
use crate::storage::{EventStorage, PositionStore, StorageError};
use crate::stream::{BoxedStream, StreamControl, TrackedEvent, TrackingToken};

/// Process-wide table of origins that have a running forwarder.
#[derive(Debug, Default)]
pub struct ForwarderClaims {
    running: Mutex<HashSet<String>>,
}

impl ForwarderClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `origin`. `None` if a forwarder for it is already running.
    pub fn claim(self: &Arc<Self>, origin: &str) -> Option<ForwarderClaim> {
        let inserted = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(origin.to_string());
        inserted.then(|| ForwarderClaim {
            claims: self.clone(),
            origin: origin.to_string(),
        })
    }

    pub fn is_running(&self, origin: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(origin)
    }
}

/// Held by a running forwarder; releases the origin when dropped.
#[derive(Debug)]
pub struct ForwarderClaim {
    claims: Arc<ForwarderClaims>,
    origin: String,
}

impl Drop for ForwarderClaim {
    fn drop(&mut self) {
        self.claims
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.origin);
    }
}

/// Tails a module's local store and copies shared events to the global store.
///
/// The position of the last handled local event is checkpointed after the
/// event is stored globally, never before, so a restart resumes without gaps.
/// Delivery is at-least-once; the global store ignores re-delivered events.
pub struct GlobalEventForwarder {
    origin: String,
    process_name: String,
    local: Arc<dyn EventStorage>,
    replicator: Arc<Replicator>,
    shared: SharedEventTypes,
    positions: Arc<dyn PositionStore>,
    config: ForwarderConfig,
}

impl GlobalEventForwarder {
    pub fn new(
        local: Arc<dyn EventStorage>,
        replicator: Arc<Replicator>,
        shared: SharedEventTypes,
        positions: Arc<dyn PositionStore>,
        config: ForwarderConfig,
    ) -> Self {
        let origin = replicator.origin().to_string();
        Self {
            process_name: format!("{origin}.global-forwarder"),
            origin,
            local,
            replicator,
            shared,
            positions,
            config,
        }
    }

    /// Name the forwarder's position is checkpointed under.
    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    /// Spawns the forwarder, resuming from the last checkpoint.
    ///
    /// Fails with `ForwarderAlreadyRunning` while another forwarder holds
    /// the same origin in `claims`.
    pub async fn start(self, claims: &Arc<ForwarderClaims>) -> Result<ForwarderHandle> {
        let claim = claims
            .claim(&self.origin)
            .ok_or_else(|| ReplicationError::ForwarderAlreadyRunning {
                origin: self.origin.clone(),
            })?;

        let position = match self.positions.load_position(&self.process_name).await? {
            None => None,
            Some(TrackingToken::Position(position)) => Some(position),
            Some(other) => return Err(StorageError::IncompatibleToken(other).into()),
        };
        let stream = self.local.open_stream(position)?;
        let control = stream.control();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            origin = %self.origin,
            position = ?position,
            "Global event forwarder started"
        );
        let origin = self.origin.clone();
        let task = tokio::spawn(async move {
            self.run(stream, shutdown_rx).await;
            drop(claim);
        });

        Ok(ForwarderHandle {
            origin,
            control,
            shutdown: shutdown_tx,
            task,
        })
    }

    async fn run(self, mut stream: BoxedStream<TrackedEvent>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                proceed = self.step(&mut stream) => {
                    if !proceed {
                        break;
                    }
                }
            }
        }
        stream.close();
        info!(origin = %self.origin, "Global event forwarder stopped");
    }

    /// Handles at most one local event. Returns `false` once the stream is
    /// unusable.
    async fn step(&self, stream: &mut BoxedStream<TrackedEvent>) -> bool {
        match stream
            .has_next_available_within(self.config.poll_timeout())
            .await
        {
            Ok(true) => {}
            Ok(false) => return true,
            Err(e) => {
                debug!(origin = %self.origin, error = %e, "Local stream ended");
                return false;
            }
        }

        let tracked = match stream.peek() {
            Ok(Some(tracked)) => tracked,
            Ok(None) => return true,
            Err(_) => return false,
        };

        if self.shared.is_shared_event(&tracked.event) {
            self.replicator
                .replicate_until_stored(&tracked.event, &self.config)
                .await;
        }

        if stream.try_next().is_err() {
            return false;
        }
        if let Err(e) = self
            .positions
            .save_position(&self.process_name, tracked.token)
            .await
        {
            warn!(origin = %self.origin, error = %e, "Failed to save forwarder position");
        }
        true
    }
}

/// Handle to a running forwarder.
///
/// Dropping the handle stops the forwarder as well.
#[derive(Debug)]
pub struct ForwarderHandle {
    origin: String,
    control: StreamControl,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ForwarderHandle {
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the forwarder and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.control.close();
        if let Err(e) = self.task.await {
            warn!(origin = %self.origin, error = %e, "Forwarder task ended abnormally");
        }
    }
}
