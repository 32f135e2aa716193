//! Command and query routing.
//!
//! This module contains:
//! - `CommandHandler` / `QueryHandler` traits: the uniform capability a
//!   handler target exposes
//! - [`HandlerTarget`]: a handler plus the identity routers compare it by
//! - [`CommandRouter`]: exclusive ownership, one handler per command name
//! - [`QueryRouter`]: any number of answerers per query name
//! - [`Interceptors`]: dispatch and handler interceptors of a module bus

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::message::{CommandMessage, QueryMessage};

pub mod command;
pub mod intercept;
pub mod query;

pub use command::{CommandCallback, CommandRouter, LoggingCallback};
pub use intercept::{
    ChainHandler, InterceptorChain, Interceptors, MessageDispatchInterceptor,
    MessageHandlerInterceptor,
};
pub use query::{QueryRouter, ScatterGather};

// ============================================================================
// Errors
// ============================================================================

/// Failure produced by a handler target.
///
/// Routers never inspect or rewrite it; it reaches the caller unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Result a handler target produces.
pub type HandlerResult = std::result::Result<Value, HandlerError>;

/// Errors raised when registering handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("Command '{name}' is already handled by '{owner}'")]
    AlreadyOwned { name: String, owner: String },
}

/// Outcome of dispatching a command, as seen by the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("No handler subscribed for command '{name}'")]
    NoHandler { name: String },

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("Handler for command '{name}' panicked")]
    HandlerPanicked { name: String },
}

/// Outcome of a direct query, as seen by the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("No handler subscribed for query '{name}'")]
    NoHandler { name: String },

    #[error("Query '{name}' has {count} handlers; a direct query needs exactly one")]
    AmbiguousHandler { name: String, count: usize },

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("Handler for query '{name}' panicked")]
    HandlerPanicked { name: String },
}

// ============================================================================
// Handler traits
// ============================================================================

/// Something that can execute a command and produce a result.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: CommandMessage) -> HandlerResult;
}

/// Something that can answer a query and produce a result.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn handle(&self, query: QueryMessage) -> HandlerResult;
}

/// Adapts an async closure into a handler.
pub struct HandlerFn<F, M> {
    f: F,
    _message: PhantomData<fn(M)>,
}

impl<F, M> HandlerFn<F, M> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> CommandHandler for HandlerFn<F, CommandMessage>
where
    F: Fn(CommandMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, command: CommandMessage) -> HandlerResult {
        (self.f)(command).await
    }
}

#[async_trait]
impl<F, Fut> QueryHandler for HandlerFn<F, QueryMessage>
where
    F: Fn(QueryMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, query: QueryMessage) -> HandlerResult {
        (self.f)(query).await
    }
}

/// Command handler from an async closure.
pub fn command_handler<F, Fut>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(CommandMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(HandlerFn::<F, CommandMessage>::new(f))
}

/// Query handler from an async closure.
pub fn query_handler<F, Fut>(f: F) -> Arc<dyn QueryHandler>
where
    F: Fn(QueryMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(HandlerFn::<F, QueryMessage>::new(f))
}

// ============================================================================
// Handler targets
// ============================================================================

/// A registered handler.
///
/// Targets are compared by identity: two targets are equal only if one is a
/// clone of the other, regardless of what handler they wrap.
pub struct HandlerTarget<H: ?Sized> {
    id: Uuid,
    label: String,
    handler: Arc<H>,
}

pub type CommandTarget = HandlerTarget<dyn CommandHandler>;
pub type QueryTarget = HandlerTarget<dyn QueryHandler>;

impl<H: ?Sized> HandlerTarget<H> {
    /// Wraps `handler` under a fresh identity. `label` shows up in logs and
    /// in `AlreadyOwned` errors.
    pub fn new(label: impl Into<String>, handler: Arc<H>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            handler,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }
}

impl<H: ?Sized> Clone for HandlerTarget<H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            label: self.label.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<H: ?Sized> PartialEq for HandlerTarget<H> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<H: ?Sized> Eq for HandlerTarget<H> {}

impl<H: ?Sized> fmt::Debug for HandlerTarget<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTarget")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}
