//! In-memory PositionStore implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::storage::{PositionStore, Result};
use crate::stream::TrackingToken;

/// Position store that keeps tokens in memory, keyed by process name.
#[derive(Default)]
pub struct InMemoryPositionStore {
    positions: RwLock<HashMap<String, TrackingToken>>,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for InMemoryPositionStore {
    async fn load_position(&self, process: &str) -> Result<Option<TrackingToken>> {
        Ok(self.positions.read().await.get(process).cloned())
    }

    async fn save_position(&self, process: &str, token: TrackingToken) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(process.to_string(), token);
        Ok(())
    }
}
