use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use tracing::{debug, info, Span};

use super::{enricher, event_name, EventKind};
use crate::chains::{fmt_address, RawEvent};
use crate::config::EnricherConfig;
use crate::error::{ChainEventsError, Result};
use crate::events::CWEvent;
use crate::fetcher::{fetch_logs_chunked, resolve_range, sort_by_block, DisconnectedRange, StorageFetcher};
use crate::logging::LogContext;
use crate::provider::{Erc20Api, LogQuery};
use crate::subscriber::ContractSource;

/// Rebuilds ERC20 history from `eth_getLogs`, one query per token and kind.
/// The token list is read from `tokens` on every fetch.
pub struct Erc20StorageFetcher {
    api: Arc<dyn Erc20Api>,
    tokens: Arc<dyn ContractSource>,
    config: EnricherConfig,
    max_block_range: u64,
    span: Span,
}

impl Erc20StorageFetcher {
    pub fn new(
        api: Arc<dyn Erc20Api>,
        tokens: Arc<dyn ContractSource>,
        config: EnricherConfig,
        max_block_range: u64,
        log: &LogContext,
    ) -> Self {
        Self {
            api,
            tokens,
            config,
            max_block_range,
            span: log.span("storage_fetcher"),
        }
    }

    async fn fetch_token(
        &self,
        token: Address,
        origin: Option<&str>,
        total_supply: Option<U256>,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<CWEvent>> {
        let mut events = Vec::new();
        for kind in EventKind::ALL {
            let query = LogQuery {
                addresses: vec![token],
                topic0: Some(kind.signature_hash()),
                from_block,
                to_block,
            };
            let logs = fetch_logs_chunked(self.api.as_ref(), query, self.max_block_range).await?;
            debug!(
                parent: &self.span,
                "Fetched {} {} log(s) for {}",
                logs.len(),
                kind.as_str(),
                fmt_address(&token)
            );
            for log in &logs {
                let raw = RawEvent::from_rpc_log(log, event_name);
                let enriched = enricher::enrich(
                    self.api.as_ref(),
                    raw.block_number,
                    kind,
                    &raw,
                    &self.config,
                    total_supply,
                )
                .await?;
                if let Some(event) = enriched {
                    events.push(event.with_origin(origin));
                }
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl StorageFetcher for Erc20StorageFetcher {
    async fn fetch(&self, range: Option<DisconnectedRange>) -> Result<Vec<CWEvent>> {
        let Some((from_block, to_block)) = resolve_range(self.api.as_ref(), range, &self.span).await? else {
            return Ok(vec![]);
        };
        info!(
            parent: &self.span,
            "Fetching ERC20 events for range: {}-{}.",
            from_block,
            to_block
        );

        let tokens = self.tokens.contracts();
        let limit = range.and_then(|r| r.max_results).unwrap_or(tokens.len());
        let mut results = Vec::new();
        for token in tokens.iter().take(limit) {
            results.extend(
                self.fetch_token(
                    token.contract,
                    token.origin.as_deref(),
                    token.total_supply,
                    from_block,
                    to_block,
                )
                .await?,
            );
        }
        sort_by_block(&mut results);
        Ok(results)
    }

    async fn fetch_one(&self, id: &str) -> Result<Vec<CWEvent>> {
        let token: Address = id
            .parse()
            .map_err(|_| ChainEventsError::InvalidAddress(id.to_string()))?;
        let head = self
            .api
            .block_number()
            .await
            .map_err(|_| ChainEventsError::BlockNumberUnavailable)?;
        let tracked = self.tokens.find(&token);
        let origin = tracked.as_ref().and_then(|t| t.origin.clone());
        let total_supply = tracked.and_then(|t| t.total_supply);

        let mut events = self
            .fetch_token(token, origin.as_deref(), total_supply, 0, head)
            .await?;
        sort_by_block(&mut events);
        Ok(events)
    }
}
