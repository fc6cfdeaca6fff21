//! Error types for the chain-events pipeline.

use thiserror::Error;

/// Errors surfaced by listeners, subscribers and storage fetchers.
///
/// Live-path enrichment failures are logged and swallowed by the processors;
/// everything else propagates to the caller.
#[derive(Debug, Error)]
pub enum ChainEventsError {
    #[error("failed to connect to {url}: {reason}")]
    Connection { url: String, reason: String },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("failed to decode {event} log: {reason}")]
    Decode { event: String, reason: String },

    #[error("current block number unavailable")]
    BlockNumberUnavailable,

    #[error("invalid contract address '{0}'")]
    InvalidAddress(String),

    #[error("invalid entity id '{0}'")]
    InvalidEntityId(String),

    #[error("{0} not found in chain storage")]
    NotFound(String),

    #[error("listener is not initialized")]
    NotInitialized,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl ChainEventsError {
    pub(crate) fn rpc(err: impl std::fmt::Display) -> Self {
        Self::Rpc(err.to_string())
    }

    pub(crate) fn decode(event: &str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            event: event.to_string(),
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChainEventsError>;
