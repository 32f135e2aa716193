//! Command routing with exclusive ownership.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{CommandError, CommandTarget, RoutingError};
use crate::message::CommandMessage;
use crate::registration::Registration;

/// Result of dispatching a command.
pub type Result<T> = std::result::Result<T, CommandError>;

/// Receives the outcome of a dispatched command.
pub trait CommandCallback: Send + 'static {
    fn on_result(self, command: &CommandMessage, result: Result<Value>);
}

impl<F> CommandCallback for F
where
    F: FnOnce(&CommandMessage, Result<Value>) + Send + 'static,
{
    fn on_result(self, command: &CommandMessage, result: Result<Value>) {
        self(command, result)
    }
}

/// Callback for fire-and-forget dispatch: logs failures, discards results.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCallback;

impl CommandCallback for LoggingCallback {
    fn on_result(self, command: &CommandMessage, result: Result<Value>) {
        match result {
            Ok(_) => debug!(
                command.name = %command.name,
                command.id = %command.identifier,
                "Command handled"
            ),
            Err(e) => warn!(
                command.name = %command.name,
                command.id = %command.identifier,
                error = %e,
                "Command failed"
            ),
        }
    }
}

type OwnerTable = RwLock<HashMap<String, CommandTarget>>;

/// Routes each command name to the single target that owns it.
///
/// The owner table is shared by every module in the process, so a command
/// name has at most one physical owner regardless of how many modules try
/// to claim it.
#[derive(Clone, Default)]
pub struct CommandRouter {
    owners: Arc<OwnerTable>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `name` for `target`.
    ///
    /// Fails with `AlreadyOwned` if another target owns the name. Claiming a
    /// name the same target already owns succeeds and returns another
    /// registration for the same claim; whichever is cancelled first removes it.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        target: CommandTarget,
    ) -> std::result::Result<Registration, RoutingError> {
        let name = name.into();
        {
            let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
            match owners.get(&name) {
                Some(owner) if *owner == target => {
                    debug!(command.name = %name, handler = %target.label(), "Command already owned by handler");
                }
                Some(owner) => {
                    return Err(RoutingError::AlreadyOwned {
                        name,
                        owner: owner.label().to_string(),
                    });
                }
                None => {
                    owners.insert(name.clone(), target.clone());
                    info!(command.name = %name, handler = %target.label(), "Command handler subscribed");
                }
            }
        }

        let owners = Arc::downgrade(&self.owners);
        Ok(Registration::new(move || {
            let Some(owners) = owners.upgrade() else {
                return false;
            };
            let mut owners = owners.write().unwrap_or_else(PoisonError::into_inner);
            if owners.get(&name) != Some(&target) {
                return false;
            }
            owners.remove(&name);
            info!(command.name = %name, handler = %target.label(), "Command handler unsubscribed");
            true
        }))
    }

    /// The current owner of `name`.
    pub fn owner(&self, name: &str) -> Option<CommandTarget> {
        self.owners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names that currently have an owner, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .owners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Routes `command` to its owner and hands the outcome to `callback`.
    ///
    /// Every outcome, including a missing handler or a panicking one, is
    /// delivered through the callback.
    pub async fn dispatch(&self, command: CommandMessage, callback: impl CommandCallback) {
        let result = self.route(&command).await;
        callback.on_result(&command, result);
    }

    /// Routes `command` to its owner and returns the outcome.
    pub async fn send(&self, command: CommandMessage) -> Result<Value> {
        self.route(&command).await
    }

    async fn route(&self, command: &CommandMessage) -> Result<Value> {
        let Some(target) = self.owner(&command.name) else {
            warn!(command.name = %command.name, "No handler subscribed for command");
            return Err(CommandError::NoHandler {
                name: command.name.clone(),
            });
        };

        let outcome = AssertUnwindSafe(target.handler().handle(command.clone()))
            .catch_unwind()
            .await;
        match outcome {
            Ok(result) => result.map_err(CommandError::Handler),
            Err(_) => {
                error!(
                    command.name = %command.name,
                    handler = %target.label(),
                    "Command handler panicked"
                );
                Err(CommandError::HandlerPanicked {
                    name: command.name.clone(),
                })
            }
        }
    }
}
