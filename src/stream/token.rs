//! Tracking tokens: resumable positions in event streams.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::message::EventMessage;

/// Position of the last consumed event in a merged stream, per source.
///
/// A source missing from the map has not been consumed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergedToken {
    positions: BTreeMap<String, u64>,
}

impl MergedToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last consumed position of `source`.
    pub fn position(&self, source: &str) -> Option<u64> {
        self.positions.get(source).copied()
    }

    /// Returns a copy with `source` advanced to `position`.
    pub fn advanced(&self, source: &str, position: u64) -> Self {
        let mut next = self.clone();
        next.positions.insert(source.to_string(), position);
        next
    }

    /// Whether every source position in `other` has been reached by `self`.
    pub fn covers(&self, other: &MergedToken) -> bool {
        other
            .positions
            .iter()
            .all(|(source, position)| self.position(source).is_some_and(|own| own >= *position))
    }
}

/// Opaque cursor into an event stream.
///
/// Absence of a token means "from the beginning".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingToken {
    /// Index of an event in a single store's append log.
    Position(u64),
    /// Per-source positions in a merged stream.
    Merged(MergedToken),
}

impl TrackingToken {
    /// The single-store position, if this is one.
    pub fn position(&self) -> Option<u64> {
        match self {
            TrackingToken::Position(position) => Some(*position),
            TrackingToken::Merged(_) => None,
        }
    }
}

/// An event together with the token that resumes the stream after it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEvent {
    pub token: TrackingToken,
    pub event: EventMessage,
}
