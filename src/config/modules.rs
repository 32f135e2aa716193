//! Per-module configuration.

use serde::Deserialize;

/// How shared events reach the global store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    /// Replicated inside `publish`, before it returns.
    Synchronous,
    /// Replicated by the background forwarder tailing the local store.
    #[default]
    Forwarded,
}

/// One logical module sharing the broker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Module identity, stamped as the origin of the events it replicates.
    pub name: String,
    /// Whether the module keeps its own event store next to the global one.
    pub local_event_store: bool,
    /// Whether the module's merged stream hides events it originated.
    pub origin_filtering: bool,
    pub replication: ReplicationMode,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            local_event_store: true,
            origin_filtering: true,
            replication: ReplicationMode::default(),
        }
    }
}

impl ModuleConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// A module that reads and writes the global store directly.
    pub fn global_only(name: impl Into<String>) -> Self {
        Self {
            local_event_store: false,
            ..Self::new(name)
        }
    }

    pub fn with_replication(mut self, replication: ReplicationMode) -> Self {
        self.replication = replication;
        self
    }

    pub fn with_origin_filtering(mut self, origin_filtering: bool) -> Self {
        self.origin_filtering = origin_filtering;
        self
    }
}
