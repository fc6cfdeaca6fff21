//! Chain API seam. Components talk to the chain only through these traits,
//! so a listener owns exactly one handle and tests can substitute their own.

pub mod substrate;

use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::pubsub::PubSubFrontend;
use alloy::rpc::types::{Filter, Log};
use alloy::sol;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use url::Url;

use crate::chains::bytes32_to_string;
use crate::error::{ChainEventsError, Result};

pub use substrate::{
    PublicProposal, ReferendumStatus, SubstrateApi, SubstrateClient, TreasuryProposal,
};

pub type WsProvider = RootProvider<PubSubFrontend>;
pub type LogStream = BoxStream<'static, Log>;

sol! {
    #[sol(rpc)]
    interface IERC20Supply {
        function totalSupply() external view returns (uint256);
    }

    #[sol(rpc)]
    interface IProjectView {
        function name() external view returns (bytes32);
        function beneficiary() external view returns (address);
        function threshold() external view returns (uint256);
        function deadline() external view returns (uint256);
        function totalFunding() external view returns (uint256);
    }
}

/// Scoped `eth_getLogs` query: one event signature, a set of emitters, an
/// inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub addresses: Vec<Address>,
    pub topic0: Option<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogQuery {
    fn to_filter(&self) -> Filter {
        let filter = Filter::new()
            .address(self.addresses.clone())
            .from_block(self.from_block)
            .to_block(self.to_block);
        match self.topic0 {
            Some(topic) => filter.event_signature(topic),
            None => filter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMetadata {
    pub name: String,
    pub beneficiary: Address,
    pub threshold: U256,
    pub deadline: u64,
}

#[async_trait]
pub trait EvmApi: Send + Sync {
    async fn block_number(&self) -> Result<u64>;
    async fn logs(&self, query: &LogQuery) -> Result<Vec<Log>>;
    /// Opens a live log subscription for the given emitters.
    async fn subscribe_logs(&self, addresses: &[Address]) -> Result<LogStream>;
    async fn is_connected(&self) -> bool;
}

#[async_trait]
pub trait Erc20Api: EvmApi {
    async fn total_supply(&self, token: Address) -> Result<U256>;
}

#[async_trait]
pub trait ProjectApi: EvmApi {
    async fn project_metadata(&self, project: Address) -> Result<ProjectMetadata>;
    async fn total_funding(&self, project: Address) -> Result<U256>;
}

/// WebSocket-backed implementation over an alloy provider.
pub struct EvmClient {
    provider: Arc<WsProvider>,
    url: String,
}

impl EvmClient {
    pub async fn connect(rpc_url: &str) -> Result<Self> {
        let url = Url::parse(rpc_url)?;
        let ws = WsConnect::new(url);
        let provider = ProviderBuilder::new()
            .on_ws(ws)
            .await
            .map_err(|e| ChainEventsError::Connection {
                url: rpc_url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            provider: Arc::new(provider),
            url: rpc_url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EvmApi for EvmClient {
    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(ChainEventsError::rpc)
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<Log>> {
        self.provider
            .get_logs(&query.to_filter())
            .await
            .map_err(ChainEventsError::rpc)
    }

    async fn subscribe_logs(&self, addresses: &[Address]) -> Result<LogStream> {
        let filter = Filter::new().address(addresses.to_vec());
        let sub = self
            .provider
            .subscribe_logs(&filter)
            .await
            .map_err(ChainEventsError::rpc)?;
        Ok(sub.into_stream().boxed())
    }

    async fn is_connected(&self) -> bool {
        self.provider.get_block_number().await.is_ok()
    }
}

#[async_trait]
impl Erc20Api for EvmClient {
    async fn total_supply(&self, token: Address) -> Result<U256> {
        let contract = IERC20Supply::new(token, self.provider.clone());
        let supply = contract
            .totalSupply()
            .call()
            .await
            .map_err(ChainEventsError::rpc)?;
        Ok(supply._0)
    }
}

#[async_trait]
impl ProjectApi for EvmClient {
    async fn project_metadata(&self, project: Address) -> Result<ProjectMetadata> {
        let contract = IProjectView::new(project, self.provider.clone());
        let name = contract.name().call().await.map_err(ChainEventsError::rpc)?._0;
        let beneficiary = contract
            .beneficiary()
            .call()
            .await
            .map_err(ChainEventsError::rpc)?
            ._0;
        let threshold = contract
            .threshold()
            .call()
            .await
            .map_err(ChainEventsError::rpc)?
            ._0;
        let deadline = contract
            .deadline()
            .call()
            .await
            .map_err(ChainEventsError::rpc)?
            ._0;
        Ok(ProjectMetadata {
            name: bytes32_to_string(&name),
            beneficiary,
            threshold,
            deadline: deadline.saturating_to::<u64>(),
        })
    }

    async fn total_funding(&self, project: Address) -> Result<U256> {
        let contract = IProjectView::new(project, self.provider.clone());
        let funding = contract
            .totalFunding()
            .call()
            .await
            .map_err(ChainEventsError::rpc)?;
        Ok(funding._0)
    }
}
