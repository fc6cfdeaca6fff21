use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use tracing::info;

use super::{event_name, Erc20Processor, Erc20StorageFetcher};
use crate::config::ListenerOptions;
use crate::error::Result;
use crate::events::EventKind;
use crate::fetcher::DisconnectedRange;
use crate::listener::{ChainListener, Connection, EventHandler, ListenerCore};
use crate::provider::{Erc20Api, EvmClient};
use crate::state::PipelineState;
use crate::subscriber::{Subscriber, WatchedContract};

/// Watches a set of ERC20 tokens on one endpoint.
pub struct Erc20Listener {
    core: ListenerCore<dyn Erc20Api>,
}

impl Erc20Listener {
    pub fn new(options: ListenerOptions) -> Self {
        Self {
            core: ListenerCore::new(options),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.core.dispatcher_mut().add_handler(handler);
        self
    }

    pub fn with_excluded_events(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.core.dispatcher_mut().exclude(kinds);
        self
    }

    /// Builds the processor, subscriber and fetcher around an existing handle.
    pub async fn init_with(&mut self, api: Arc<dyn Erc20Api>) -> Result<()> {
        let options = self.core.options().clone();
        let log = self.core.log().clone();

        let subscriber = Arc::new(Subscriber::new(api.clone(), event_name, &log));
        let processor = Arc::new(Erc20Processor::new(
            api.clone(),
            Arc::new(Arc::downgrade(&subscriber)),
            options.enricher.clone(),
            &log,
        ));
        let pipeline = self.core.pipeline(processor, self.core.dispatcher().clone());
        let fetcher = Arc::new(Erc20StorageFetcher::new(
            api.clone(),
            subscriber.clone(),
            options.enricher.clone(),
            options.max_block_range,
            &log,
        ));

        for contract in &options.contracts {
            let total_supply = api.total_supply(contract.address).await?;
            subscriber
                .add_contract(WatchedContract {
                    contract: contract.address,
                    total_supply: Some(total_supply),
                    origin: contract.origin.clone(),
                })
                .await?;
        }

        self.core.set_connection(Connection {
            api,
            pipeline,
            subscriber,
            fetcher,
        });
        info!(
            parent: self.core.span(),
            "Initialized ERC20 listener for {} token(s)",
            options.contracts.len()
        );
        Ok(())
    }

    /// Starts watching another token at runtime, see [`Subscriber::add_new_token`].
    pub async fn add_new_token(&self, token: Address, origin: Option<String>) -> Result<()> {
        let retry = &self.core.options().retry;
        self.core
            .connection()?
            .subscriber
            .add_new_token(
                token,
                origin,
                Duration::from_millis(retry.delay_ms),
                retry.max_retries,
            )
            .await;
        Ok(())
    }

    pub fn is_watching(&self, token: &Address) -> bool {
        self.core
            .connection()
            .map(|c| c.subscriber.contains(token))
            .unwrap_or(false)
    }

    pub fn core(&self) -> &ListenerCore<dyn Erc20Api> {
        &self.core
    }
}

#[async_trait]
impl ChainListener for Erc20Listener {
    async fn init(&mut self) -> Result<()> {
        let api = EvmClient::connect(&self.core.options().url).await?;
        self.init_with(Arc::new(api)).await
    }

    async fn subscribe(&self) -> Result<()> {
        self.core.subscribe().await
    }

    fn unsubscribe(&self) {
        self.core.unsubscribe()
    }

    async fn latest_block_number(&self) -> Result<u64> {
        self.core.latest_block_number().await
    }

    async fn is_connected(&self) -> bool {
        self.core.is_connected().await
    }

    async fn process_missed_blocks(&self, range: Option<DisconnectedRange>) -> Result<usize> {
        self.core.process_missed_blocks(range).await
    }

    fn options(&self) -> &ListenerOptions {
        self.core.options()
    }

    fn state(&self) -> Arc<PipelineState> {
        self.core.state()
    }
}
