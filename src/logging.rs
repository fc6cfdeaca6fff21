//! Logging setup and the per-component log context.

use std::path::Path;

use tracing::Span;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::events::SupportedNetwork;

/// Identifies which listener a log line came from. Handed to every component
/// at construction instead of a module-level logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    pub network: SupportedNetwork,
    pub chain: String,
}

impl LogContext {
    pub fn new(network: SupportedNetwork, chain: impl Into<String>) -> Self {
        Self {
            network,
            chain: chain.into(),
        }
    }

    pub fn span(&self, component: &'static str) -> Span {
        tracing::info_span!(
            "chain_events",
            network = %self.network,
            chain = %self.chain,
            component
        )
    }
}

/// File logging with a daily rotation. The returned guard must be held for
/// the lifetime of the process or buffered lines are lost.
pub fn init_file_logging(dir: impl AsRef<Path>, file_name: &str) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("Logger has already been set up, continuing...");
    }
    guard
}

/// Stdout logging, used when no log directory is configured.
pub fn init_stdout_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("Logger has already been set up, continuing...");
    }
}
