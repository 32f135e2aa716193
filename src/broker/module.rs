//! A module's connection to the broker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{info, warn};

use crate::message::{CommandMessage, QueryMessage};
use crate::registration::Registration;
use crate::replication::{ForwarderHandle, ModuleEventStore};
use crate::routing::{
    CommandCallback, CommandError, CommandHandler, CommandRouter, CommandTarget, HandlerError,
    HandlerResult, Interceptors, LoggingCallback, MessageDispatchInterceptor,
    MessageHandlerInterceptor, QueryError, QueryHandler, QueryRouter, QueryTarget, RoutingError,
    ScatterGather,
};

/// Registrations a bus made on behalf of its module.
#[derive(Default)]
struct Owned {
    registrations: Mutex<Vec<Arc<Registration>>>,
}

impl Owned {
    /// Keeps `registration` for shutdown and hands back a handle to it.
    fn track(&self, registration: Registration) -> Registration {
        let registration = Arc::new(registration);
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(registration.clone());
        Registration::new(move || registration.cancel())
    }

    /// Cancels everything still registered. Returns how many were removed.
    fn cancel_all(&self) -> usize {
        let registrations: Vec<_> = self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        registrations.iter().filter(|r| r.cancel()).count()
    }
}

type HandlerTable = RwLock<HashMap<String, Arc<dyn CommandHandler>>>;

/// The single target a module claims command names with.
///
/// Looks the module's own handler up by command name and runs it through the
/// module's handler interceptors.
struct ModuleCommandHandler {
    handlers: HandlerTable,
    interceptors: Arc<Interceptors<CommandMessage>>,
}

#[async_trait]
impl CommandHandler for ModuleCommandHandler {
    async fn handle(&self, command: CommandMessage) -> HandlerResult {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&command.name)
            .cloned();
        let Some(handler) = handler else {
            return Err(HandlerError::new(format!(
                "Command '{}' was released before it could be handled",
                command.name
            )));
        };

        let invoke = move |command: CommandMessage| -> BoxFuture<'static, HandlerResult> {
            let handler = handler.clone();
            async move { handler.handle(command).await }.boxed()
        };
        self.interceptors.handle(command, &invoke).await
    }
}

/// Command bus of one module, backed by the broker's command router.
///
/// Every command name the module claims is owned by the same target, so
/// subscribing a name the module already owns replaces its handler instead
/// of failing.
pub struct ModuleCommandBus {
    module: String,
    router: CommandRouter,
    dispatcher: Arc<ModuleCommandHandler>,
    target: CommandTarget,
    interceptors: Arc<Interceptors<CommandMessage>>,
    owned: Owned,
}

impl ModuleCommandBus {
    pub(super) fn new(module: String, router: CommandRouter) -> Self {
        let interceptors = Arc::new(Interceptors::new());
        let dispatcher = Arc::new(ModuleCommandHandler {
            handlers: RwLock::new(HashMap::new()),
            interceptors: interceptors.clone(),
        });
        let target = CommandTarget::new(module.clone(), dispatcher.clone());
        Self {
            module,
            router,
            dispatcher,
            target,
            interceptors,
            owned: Owned::default(),
        }
    }

    /// Claims `name` for `handler` on behalf of this module.
    ///
    /// Cancelling the registration releases the name unless the handler has
    /// since been replaced by a later subscribe.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<Registration, RoutingError> {
        let name = name.into();
        let claim = {
            let mut handlers = self
                .dispatcher
                .handlers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let claim = self.router.subscribe(name.clone(), self.target.clone())?;
            let previous = handlers.insert(name.clone(), handler.clone());
            if previous.is_some_and(|previous| !Arc::ptr_eq(&previous, &handler)) {
                warn!(module = %self.module, command.name = %name, "Replacing command handler");
            }
            claim
        };

        let dispatcher = Arc::downgrade(&self.dispatcher);
        let registration = Registration::new(move || {
            let Some(dispatcher) = dispatcher.upgrade() else {
                return false;
            };
            let mut handlers = dispatcher
                .handlers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match handlers.get(&name) {
                Some(current) if Arc::ptr_eq(current, &handler) => {
                    handlers.remove(&name);
                    claim.cancel()
                }
                _ => false,
            }
        });
        Ok(self.owned.track(registration))
    }

    /// Rewrites every command this module sends before it is routed.
    pub fn register_dispatch_interceptor(
        &self,
        interceptor: Arc<dyn MessageDispatchInterceptor<CommandMessage>>,
    ) -> Registration {
        self.owned.track(self.interceptors.register_dispatch(interceptor))
    }

    /// Wraps every invocation of this module's command handlers.
    pub fn register_handler_interceptor(
        &self,
        interceptor: Arc<dyn MessageHandlerInterceptor<CommandMessage>>,
    ) -> Registration {
        self.owned.track(self.interceptors.register_handler(interceptor))
    }

    pub async fn dispatch(&self, command: CommandMessage, callback: impl CommandCallback) {
        let command = self.interceptors.before_dispatch(command);
        self.router.dispatch(command, callback).await
    }

    /// Dispatches without a caller-side callback; failures are logged.
    pub async fn dispatch_and_log(&self, command: CommandMessage) {
        self.dispatch(command, LoggingCallback).await
    }

    pub async fn send(&self, command: CommandMessage) -> Result<Value, CommandError> {
        let command = self.interceptors.before_dispatch(command);
        self.router.send(command).await
    }

    /// Releases every command name this module claimed.
    pub fn shutdown(&self) {
        let released = self.owned.cancel_all();
        info!(module = %self.module, released, "Command bus shut down");
    }
}

/// Query handler running behind its module's handler interceptors.
struct InterceptedQueryHandler {
    handler: Arc<dyn QueryHandler>,
    interceptors: Arc<Interceptors<QueryMessage>>,
}

#[async_trait]
impl QueryHandler for InterceptedQueryHandler {
    async fn handle(&self, query: QueryMessage) -> HandlerResult {
        let handler = self.handler.clone();
        let invoke = move |query: QueryMessage| -> BoxFuture<'static, HandlerResult> {
            let handler = handler.clone();
            async move { handler.handle(query).await }.boxed()
        };
        self.interceptors.handle(query, &invoke).await
    }
}

/// Query bus of one module, backed by the broker's query router.
pub struct ModuleQueryBus {
    module: String,
    router: QueryRouter,
    scatter_gather_timeout: Duration,
    interceptors: Arc<Interceptors<QueryMessage>>,
    owned: Owned,
}

impl ModuleQueryBus {
    pub(super) fn new(module: String, router: QueryRouter, scatter_gather_timeout: Duration) -> Self {
        Self {
            module,
            router,
            scatter_gather_timeout,
            interceptors: Arc::new(Interceptors::new()),
            owned: Owned::default(),
        }
    }

    /// Adds `handler` as an answerer of `name`.
    pub fn subscribe(&self, name: impl Into<String>, handler: Arc<dyn QueryHandler>) -> Registration {
        let handler = Arc::new(InterceptedQueryHandler {
            handler,
            interceptors: self.interceptors.clone(),
        });
        let registration = self
            .router
            .subscribe(name, QueryTarget::new(self.module.clone(), handler));
        self.owned.track(registration)
    }

    /// Rewrites every query this module sends before it is routed.
    pub fn register_dispatch_interceptor(
        &self,
        interceptor: Arc<dyn MessageDispatchInterceptor<QueryMessage>>,
    ) -> Registration {
        self.owned.track(self.interceptors.register_dispatch(interceptor))
    }

    /// Wraps every invocation of this module's query handlers.
    pub fn register_handler_interceptor(
        &self,
        interceptor: Arc<dyn MessageHandlerInterceptor<QueryMessage>>,
    ) -> Registration {
        self.owned.track(self.interceptors.register_handler(interceptor))
    }

    pub async fn query(&self, query: QueryMessage) -> Result<Value, QueryError> {
        let query = self.interceptors.before_dispatch(query);
        self.router.query(query).await
    }

    /// Scatter-gather with the broker's configured deadline.
    pub fn scatter_gather(&self, query: QueryMessage) -> ScatterGather {
        self.scatter_gather_within(query, self.scatter_gather_timeout)
    }

    pub fn scatter_gather_within(&self, query: QueryMessage, timeout: Duration) -> ScatterGather {
        let query = self.interceptors.before_dispatch(query);
        self.router.scatter_gather(query, timeout)
    }

    /// Withdraws every answerer this module added.
    pub fn shutdown(&self) {
        let released = self.owned.cancel_all();
        info!(module = %self.module, released, "Query bus shut down");
    }
}

/// A module connected to an [`EmbeddedBroker`](super::EmbeddedBroker).
pub struct Module {
    name: String,
    commands: ModuleCommandBus,
    queries: ModuleQueryBus,
    events: Arc<dyn ModuleEventStore>,
    forwarder: Option<ForwarderHandle>,
}

impl Module {
    pub(super) fn new(
        name: String,
        commands: ModuleCommandBus,
        queries: ModuleQueryBus,
        events: Arc<dyn ModuleEventStore>,
        forwarder: Option<ForwarderHandle>,
    ) -> Self {
        Self {
            name,
            commands,
            queries,
            events,
            forwarder,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn commands(&self) -> &ModuleCommandBus {
        &self.commands
    }

    pub fn queries(&self) -> &ModuleQueryBus {
        &self.queries
    }

    pub fn events(&self) -> &Arc<dyn ModuleEventStore> {
        &self.events
    }

    /// Whether this module's forwarder is still running.
    pub fn is_forwarding(&self) -> bool {
        self.forwarder
            .as_ref()
            .is_some_and(ForwarderHandle::is_running)
    }

    /// Stops the forwarder and withdraws every handler the module registered.
    pub async fn shutdown(self) {
        if let Some(forwarder) = self.forwarder {
            forwarder.shutdown().await;
        }
        self.commands.shutdown();
        self.queries.shutdown();
        info!(module = %self.name, "Module disconnected");
    }
}
