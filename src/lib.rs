//! Embedded Broker - in-process command/query/event bus
//!
//! Lets several logical modules share one process while keeping the
//! semantics of a distributed bus: exclusive command ownership, query
//! fan-out with a bounded deadline, and module-local event stores whose
//! shared events are replicated into a process-wide global store.

pub mod broker;
pub mod config;
pub mod message;
pub mod registration;
pub mod replication;
pub mod routing;
pub mod storage;
pub mod stream;
pub mod utils;

pub use broker::{BrokerError, EmbeddedBroker, Module};
pub use config::BrokerConfig;
