//! The process-wide broker shared by every module.
//!
//! One [`EmbeddedBroker`] is constructed by the host process and handed to
//! each module as it starts. It owns the routing tables, the global event
//! store and the replication bookkeeping that must be shared across modules:
//!
//! - [`CommandRouter`]: one owner per command name, process-wide
//! - [`QueryRouter`]: any number of answerers per query name
//! - global store: events of shared types, visible to every module
//! - [`AggregateSequencer`] / [`ForwarderClaims`]: serialized global
//!   sequencing and at most one forwarder per module
//!
//! Modules never talk to each other directly; [`EmbeddedBroker::connect`]
//! returns a [`Module`] whose buses and event store route through the broker.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{BrokerConfig, ModuleConfig, ReplicationMode};
use crate::message::SharedEventTypes;
use crate::replication::{
    AggregateSequencer, ForwarderClaims, GlobalEventStore, LocalAndGlobalEventStore,
    ModuleEventStore, ReplicationError,
};
use crate::routing::{CommandRouter, QueryRouter};
use crate::storage::{EventStorage, InMemoryEventStore, InMemoryPositionStore, PositionStore};

mod module;

pub use module::{Module, ModuleCommandBus, ModuleQueryBus};

/// Errors that can occur while connecting a module.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error("Module '{name}' is not configured")]
    ModuleNotConfigured { name: String },
}

/// Shared core every module-local bus talks to.
pub struct EmbeddedBroker {
    config: BrokerConfig,
    commands: CommandRouter,
    queries: QueryRouter,
    global: Arc<dyn EventStorage>,
    shared: SharedEventTypes,
    sequencer: Arc<AggregateSequencer>,
    claims: Arc<ForwarderClaims>,
    positions: Arc<dyn PositionStore>,
}

impl EmbeddedBroker {
    /// Broker over the given global store, checkpointing forwarders in memory.
    pub fn new(config: BrokerConfig, global: Arc<dyn EventStorage>) -> Self {
        let shared = config.shared_event_types();
        info!(
            global = %global.name(),
            shared_event_types = shared.len(),
            "Embedded broker created"
        );
        Self {
            config,
            commands: CommandRouter::new(),
            queries: QueryRouter::new(),
            global,
            shared,
            sequencer: Arc::new(AggregateSequencer::new()),
            claims: Arc::new(ForwarderClaims::new()),
            positions: Arc::new(InMemoryPositionStore::new()),
        }
    }

    /// Broker with an in-memory global store.
    pub fn in_memory(config: BrokerConfig) -> Self {
        let global =
            InMemoryEventStore::new("global").with_poll_interval(config.streams.poll_interval());
        Self::new(config, Arc::new(global))
    }

    /// Checkpoints forwarder positions in `positions`.
    pub fn with_position_store(mut self, positions: Arc<dyn PositionStore>) -> Self {
        self.positions = positions;
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn command_router(&self) -> &CommandRouter {
        &self.commands
    }

    pub fn query_router(&self) -> &QueryRouter {
        &self.queries
    }

    pub fn global_store(&self) -> &Arc<dyn EventStorage> {
        &self.global
    }

    pub fn shared_event_types(&self) -> &SharedEventTypes {
        &self.shared
    }

    pub fn is_forwarder_running(&self, module: &str) -> bool {
        self.claims.is_running(module)
    }

    /// Connects a module.
    ///
    /// A module configured with a local event store gets `local`, or a fresh
    /// in-memory store if none is given, and publishes through a
    /// [`LocalAndGlobalEventStore`]. In forwarded mode its forwarder is
    /// started here. A module without a local store works on the global
    /// store directly.
    pub async fn connect(
        &self,
        module: ModuleConfig,
        local: Option<Arc<dyn EventStorage>>,
    ) -> Result<Module, BrokerError> {
        let commands = ModuleCommandBus::new(module.name.clone(), self.commands.clone());
        let queries = ModuleQueryBus::new(
            module.name.clone(),
            self.queries.clone(),
            self.config.queries.scatter_gather_timeout(),
        );

        if !module.local_event_store {
            if local.is_some() {
                warn!(module = %module.name, "Module has no local event store configured, ignoring the one provided");
            }
            info!(module = %module.name, "Module connected to global event store");
            let events: Arc<dyn ModuleEventStore> =
                Arc::new(GlobalEventStore::new(module.name.clone(), self.global.clone()));
            return Ok(Module::new(module.name, commands, queries, events, None));
        }

        let local: Arc<dyn EventStorage> = match local {
            Some(local) => local,
            None => Arc::new(
                InMemoryEventStore::new(format!("{}-local", module.name))
                    .with_poll_interval(self.config.streams.poll_interval()),
            ),
        };
        let adapter = LocalAndGlobalEventStore::new(
            module.name.clone(),
            local,
            self.global.clone(),
            self.shared.clone(),
        )
        .with_replication(module.replication)
        .with_retry(self.config.forwarder.clone())
        .with_origin_filtering(module.origin_filtering)
        .with_poll_interval(self.config.streams.poll_interval())
        .with_sequencer(self.sequencer.clone())
        .with_forwarder_claims(self.claims.clone());

        let forwarder = match module.replication {
            ReplicationMode::Forwarded => Some(
                adapter
                    .start_forwarder(self.positions.clone(), self.config.forwarder.clone())
                    .await?,
            ),
            ReplicationMode::Synchronous => None,
        };

        info!(
            module = %module.name,
            replication = ?module.replication,
            origin_filtering = module.origin_filtering,
            "Module connected with local event store"
        );
        Ok(Module::new(
            module.name,
            commands,
            queries,
            Arc::new(adapter),
            forwarder,
        ))
    }

    /// Connects the module named `name` from the broker configuration.
    pub async fn connect_configured(
        &self,
        name: &str,
        local: Option<Arc<dyn EventStorage>>,
    ) -> Result<Module, BrokerError> {
        let module = self
            .config
            .modules
            .iter()
            .find(|module| module.name == name)
            .cloned()
            .ok_or_else(|| BrokerError::ModuleNotConfigured {
                name: name.to_string(),
            })?;
        self.connect(module, local).await
    }

    /// Connects every configured module, each with a fresh local store.
    pub async fn connect_all(&self) -> Result<Vec<Module>, BrokerError> {
        let mut modules = Vec::with_capacity(self.config.modules.len());
        for module in &self.config.modules {
            modules.push(self.connect(module.clone(), None).await?);
        }
        Ok(modules)
    }
}
