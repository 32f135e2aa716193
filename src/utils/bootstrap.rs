//! Bootstrap utilities for the embedded-broker binary.

use std::future::Future;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with EMBEDDED_BROKER_LOG environment variable.
///
/// Defaults to "info" level if EMBEDDED_BROKER_LOG is not set. Safe to call
/// more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
    if result.is_err() {
        warn!("Tracing subscriber already installed");
    }
}

/// Runs `run` until it finishes or Ctrl+C is received.
///
/// Returns `None` when interrupted.
pub async fn run_until_ctrl_c<F: Future>(run: F) -> Option<F::Output> {
    tokio::select! {
        output = run => Some(output),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            None
        }
    }
}
