//! Chain event ingestion: live subscriptions and storage backfill for EVM
//! contract families and Substrate pallets, normalized into a chain-agnostic
//! event envelope and dispatched to an ordered chain of handlers.

pub mod chains;
pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod handlers;
pub mod listener;
pub mod logging;
pub mod provider;
pub mod state;
pub mod subscriber;

#[cfg(test)]
mod test_utils;

pub use chains::commonwealth::CommonwealthListener;
pub use chains::erc20::Erc20Listener;
pub use chains::substrate::SubstrateListener;
pub use chains::RawEvent;
pub use config::{AppConfig, ListenerOptions};
pub use error::{ChainEventsError, Result};
pub use events::{CWEvent, EventKind, SupportedNetwork};
pub use fetcher::{DisconnectedRange, StorageFetcher};
pub use listener::{ChainListener, EventHandler, EventProcessor};
pub use state::PipelineState;
