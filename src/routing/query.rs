//! Query routing: direct queries and scatter-gather.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::{FutureExt, Stream};
use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{HandlerResult, QueryError, QueryTarget};
use crate::message::QueryMessage;
use crate::registration::Registration;

/// Result of a direct query.
pub type Result<T> = std::result::Result<T, QueryError>;

type TargetTable = RwLock<HashMap<String, Vec<QueryTarget>>>;

/// Routes queries to every target subscribed under the query's name.
#[derive(Clone, Default)]
pub struct QueryRouter {
    targets: Arc<TargetTable>,
}

impl QueryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `target` as an answerer for `name`.
    ///
    /// Subscribing a target that is already present does not add it twice.
    pub fn subscribe(&self, name: impl Into<String>, target: QueryTarget) -> Registration {
        let name = name.into();
        {
            let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
            let answerers = targets.entry(name.clone()).or_default();
            if !answerers.contains(&target) {
                answerers.push(target.clone());
                info!(query.name = %name, handler = %target.label(), "Query handler subscribed");
            }
        }

        let targets = Arc::downgrade(&self.targets);
        Registration::new(move || {
            let Some(targets) = targets.upgrade() else {
                return false;
            };
            let mut targets = targets.write().unwrap_or_else(PoisonError::into_inner);
            let Some(answerers) = targets.get_mut(&name) else {
                return false;
            };
            let before = answerers.len();
            answerers.retain(|answerer| *answerer != target);
            let removed = answerers.len() != before;
            if answerers.is_empty() {
                targets.remove(&name);
            }
            if removed {
                info!(query.name = %name, handler = %target.label(), "Query handler unsubscribed");
            }
            removed
        })
    }

    /// Current answerers for `name`, in subscription order.
    pub fn targets(&self, name: &str) -> Vec<QueryTarget> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Asks the single answerer for `query`'s name.
    ///
    /// Fails immediately with `NoHandler` or `AmbiguousHandler` when there is
    /// not exactly one.
    pub async fn query(&self, query: QueryMessage) -> Result<Value> {
        let mut targets = self.targets(&query.name);
        let target = match targets.len() {
            0 => {
                warn!(query.name = %query.name, "No handler subscribed for query");
                return Err(QueryError::NoHandler { name: query.name });
            }
            1 => targets.remove(0),
            count => {
                return Err(QueryError::AmbiguousHandler {
                    name: query.name,
                    count,
                });
            }
        };

        let name = query.name.clone();
        match AssertUnwindSafe(target.handler().handle(query))
            .catch_unwind()
            .await
        {
            Ok(result) => result.map_err(QueryError::Handler),
            Err(_) => {
                error!(query.name = %name, handler = %target.label(), "Query handler panicked");
                Err(QueryError::HandlerPanicked { name })
            }
        }
    }

    /// Asks every answerer for `query`'s name concurrently.
    ///
    /// The returned sequence yields answers as they arrive until `timeout`
    /// has elapsed. Failed, panicking or late answerers contribute nothing.
    /// Must be called from within a Tokio runtime.
    pub fn scatter_gather(&self, query: QueryMessage, timeout: Duration) -> ScatterGather {
        let targets = self.targets(&query.name);
        debug!(
            query.name = %query.name,
            targets = targets.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Scatter-gather query issued"
        );

        let mut pending = JoinSet::new();
        for target in targets {
            let query = query.clone();
            pending.spawn(async move {
                let label = target.label().to_string();
                (label, target.handler().handle(query).await)
            });
        }

        ScatterGather {
            name: query.name,
            pending,
            deadline: Instant::now().checked_add(timeout),
        }
    }
}

/// Lazily gathered answers of a scatter-gather query.
///
/// Every pull waits at most until the shared deadline. Dropping the sequence
/// aborts answerers that have not replied yet.
pub struct ScatterGather {
    name: String,
    pending: JoinSet<(String, HandlerResult)>,
    deadline: Option<Instant>,
}

impl ScatterGather {
    /// The next answer, or `None` once every answerer replied or the
    /// deadline passed.
    pub async fn next(&mut self) -> Option<Value> {
        loop {
            let joined = match self.deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.pending.join_next()).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            debug!(
                                query.name = %self.name,
                                outstanding = self.pending.len(),
                                "Scatter-gather deadline reached"
                            );
                            self.pending.abort_all();
                            return None;
                        }
                    }
                }
                None => self.pending.join_next().await,
            };

            match joined? {
                Ok((_, Ok(answer))) => return Some(answer),
                Ok((label, Err(e))) => {
                    debug!(query.name = %self.name, handler = %label, error = %e, "Answerer failed");
                }
                Err(e) => {
                    warn!(query.name = %self.name, error = %e, "Answerer did not complete");
                }
            }
        }
    }

    /// Waits for every answer that arrives before the deadline.
    pub async fn collect(mut self) -> Vec<Value> {
        let mut answers = Vec::new();
        while let Some(answer) = self.next().await {
            answers.push(answer);
        }
        answers
    }

    pub fn into_stream(self) -> impl Stream<Item = Value> + Send {
        futures::stream::unfold(self, |mut gather| async move {
            gather.next().await.map(|answer| (answer, gather))
        })
    }
}
