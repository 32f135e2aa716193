//! In-memory storage implementations.
//!
//! Used as the default global store, as module-local stores, and in tests.

mod event_store;
mod position_store;
mod stream;

pub use event_store::InMemoryEventStore;
pub use position_store::InMemoryPositionStore;
pub use stream::InMemoryEventStream;
