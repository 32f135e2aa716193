//! Message envelopes routed by the broker.
//!
//! Commands, queries and events share the same shape: a stable routing
//! name, an opaque JSON payload and a string-to-string metadata map.
//! Events that belong to an aggregate additionally carry the aggregate
//! identifier and a sequence number scoped to that identifier.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Metadata key holding the module that produced a replicated event.
pub const ORIGIN_KEY: &str = "origin";

/// Message metadata. Insertion order is irrelevant.
pub type MetaData = HashMap<String, String>;

/// A command addressed to exactly one handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub identifier: Uuid,
    pub name: String,
    pub payload: Value,
    #[serde(default)]
    pub meta_data: MetaData,
}

impl CommandMessage {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            identifier: Uuid::new_v4(),
            name: name.into(),
            payload,
            meta_data: MetaData::new(),
        }
    }

    /// Returns a copy with `key` set to `value` in the metadata.
    pub fn and_meta_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta_data.insert(key.into(), value.into());
        self
    }
}

/// A query answered by one (direct) or many (scatter-gather) handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMessage {
    pub identifier: Uuid,
    pub name: String,
    pub payload: Value,
    #[serde(default)]
    pub meta_data: MetaData,
}

impl QueryMessage {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            identifier: Uuid::new_v4(),
            name: name.into(),
            payload,
            meta_data: MetaData::new(),
        }
    }

    pub fn and_meta_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta_data.insert(key.into(), value.into());
        self
    }
}

/// Aggregate coordinates of a domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub sequence: u64,
}

/// An event, optionally bound to an aggregate.
///
/// `event_type` is the routing name of the event and the key looked up in
/// [`SharedEventTypes`] to decide whether the event is replicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub identifier: Uuid,
    pub event_type: String,
    pub payload: Value,
    #[serde(default)]
    pub meta_data: MetaData,
    pub timestamp: DateTime<Utc>,
    pub domain: Option<DomainInfo>,
}

impl EventMessage {
    /// Creates an event that does not belong to any aggregate.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            identifier: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            meta_data: MetaData::new(),
            timestamp: Utc::now(),
            domain: None,
        }
    }

    /// Creates a domain event for `aggregate_id` at `sequence`.
    pub fn domain(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        sequence: u64,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            domain: Some(DomainInfo {
                aggregate_type: aggregate_type.into(),
                aggregate_id: aggregate_id.into(),
                sequence,
            }),
            ..Self::new(event_type, payload)
        }
    }

    pub fn and_meta_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta_data.insert(key.into(), value.into());
        self
    }

    pub fn aggregate_id(&self) -> Option<&str> {
        self.domain.as_ref().map(|d| d.aggregate_id.as_str())
    }

    pub fn sequence(&self) -> Option<u64> {
        self.domain.as_ref().map(|d| d.sequence)
    }

    /// The module that produced this event, if it was replicated.
    pub fn origin(&self) -> Option<&str> {
        self.meta_data.get(ORIGIN_KEY).map(String::as_str)
    }

    /// Returns a copy renumbered to `sequence`. Non-domain events are unchanged.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        if let Some(domain) = self.domain.as_mut() {
            domain.sequence = sequence;
        }
        self
    }
}

/// Side table of event types that are visible to every module.
///
/// Resolved once at startup; events whose type is listed here are copied
/// from a module's local store into the shared store.
#[derive(Debug, Clone, Default)]
pub struct SharedEventTypes {
    types: HashSet<String>,
}

impl SharedEventTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `event_type` as shared.
    pub fn with(mut self, event_type: impl Into<String>) -> Self {
        self.types.insert(event_type.into());
        self
    }

    pub fn is_shared(&self, event_type: &str) -> bool {
        self.types.contains(event_type)
    }

    pub fn is_shared_event(&self, event: &EventMessage) -> bool {
        self.is_shared(&event.event_type)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for SharedEventTypes {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            types: iter.into_iter().map(Into::into).collect(),
        }
    }
}
