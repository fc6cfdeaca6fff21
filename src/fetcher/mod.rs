//! Backfill: rebuilding historical events from chain storage for a block range.

use alloy::rpc::types::Log;
use async_trait::async_trait;
use tracing::{error, Span};

use crate::error::{ChainEventsError, Result};
use crate::events::CWEvent;
use crate::provider::{EvmApi, LogQuery};

/// A block range that the live subscription may have missed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisconnectedRange {
    pub start_block: Option<u64>,
    pub end_block: Option<u64>,
    /// Caps the number of contracts (or storage entities) whose history is
    /// rebuilt.
    pub max_results: Option<usize>,
}

impl DisconnectedRange {
    pub fn from_block(start_block: u64) -> Self {
        Self {
            start_block: Some(start_block),
            ..Default::default()
        }
    }

    pub fn between(start_block: u64, end_block: u64) -> Self {
        Self {
            start_block: Some(start_block),
            end_block: Some(end_block),
            max_results: None,
        }
    }
}

#[async_trait]
pub trait StorageFetcher: Send + Sync {
    /// Every event in `range`, ascending by block number. Enrichment errors
    /// propagate: a backfill either covers the range or fails.
    async fn fetch(&self, range: Option<DisconnectedRange>) -> Result<Vec<CWEvent>>;

    /// Every event of one entity: a contract address on EVM chain-bases,
    /// `<entity-kind>/<index>` on Substrate.
    async fn fetch_one(&self, id: &str) -> Result<Vec<CWEvent>>;
}

/// Closes an open-ended range against the current head.
///
/// Returns `Ok(None)` for ranges that cannot contain anything (logged), and
/// an error if the head cannot be determined.
pub async fn resolve_range<A: EvmApi + ?Sized>(
    api: &A,
    range: Option<DisconnectedRange>,
    span: &Span,
) -> Result<Option<(u64, u64)>> {
    let head = api
        .block_number()
        .await
        .map_err(|_| ChainEventsError::BlockNumberUnavailable)?;
    clamp_range(head, range, span)
}

/// [`resolve_range`] against an already known head.
pub fn clamp_range(
    head: u64,
    range: Option<DisconnectedRange>,
    span: &Span,
) -> Result<Option<(u64, u64)>> {
    if head == 0 {
        error!(parent: span, "Failed to fetch current block! Aborting fetch.");
        return Err(ChainEventsError::BlockNumberUnavailable);
    }

    let range = range.unwrap_or_default();
    let start = range.start_block.unwrap_or(0);
    if start >= head {
        error!(parent: span, "Start block {} greater than current block {}!", start, head);
        return Ok(None);
    }
    if let Some(end) = range.end_block {
        if start >= end {
            error!(parent: span, "Invalid fetch range: {}-{}.", start, end);
            return Ok(None);
        }
    }
    let end = range.end_block.unwrap_or(head).min(head);
    Ok(Some((start, end)))
}

/// Runs a log query over `[from, to]` in windows of at most `max_range`
/// blocks, for nodes that reject wide `eth_getLogs` ranges.
pub async fn fetch_logs_chunked<A: EvmApi + ?Sized>(
    api: &A,
    query: LogQuery,
    max_range: u64,
) -> Result<Vec<Log>> {
    let (from, to) = (query.from_block, query.to_block);
    if to < from {
        return Ok(vec![]);
    }
    let max_range = max_range.max(1);
    let mut all_logs = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(max_range - 1).min(to);
        let chunk = LogQuery {
            from_block: start,
            to_block: end,
            ..query.clone()
        };
        all_logs.extend(api.logs(&chunk).await?);
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    Ok(all_logs)
}

/// Stable sort by block number; events sharing a block keep fetch order.
pub fn sort_by_block(events: &mut [CWEvent]) {
    events.sort_by_key(|e| e.block_number);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockEvmApi;

    #[tokio::test]
    async fn open_range_runs_to_head() {
        let api = MockEvmApi::new();
        api.set_head(Some(500));
        let span = Span::none();
        assert_eq!(resolve_range(&api, None, &span).await.unwrap(), Some((0, 500)));
        assert_eq!(
            resolve_range(&api, Some(DisconnectedRange::from_block(100)), &span)
                .await
                .unwrap(),
            Some((100, 500))
        );
        assert_eq!(
            resolve_range(&api, Some(DisconnectedRange::between(10, 20)), &span)
                .await
                .unwrap(),
            Some((10, 20))
        );
    }

    #[tokio::test]
    async fn empty_ranges_yield_nothing() {
        let api = MockEvmApi::new();
        api.set_head(Some(500));
        let span = Span::none();
        assert_eq!(
            resolve_range(&api, Some(DisconnectedRange::from_block(600)), &span)
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            resolve_range(&api, Some(DisconnectedRange::between(20, 10)), &span)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn missing_head_is_fatal() {
        let api = MockEvmApi::new();
        api.set_head(None);
        let err = resolve_range(&api, None, &Span::none()).await.unwrap_err();
        assert!(matches!(err, ChainEventsError::BlockNumberUnavailable));

        api.set_head(Some(0));
        assert!(resolve_range(&api, None, &Span::none()).await.is_err());
    }

    #[tokio::test]
    async fn chunks_wide_ranges() {
        let api = MockEvmApi::new();
        let query = LogQuery {
            addresses: vec![],
            topic0: None,
            from_block: 0,
            to_block: 2_500,
        };
        fetch_logs_chunked(&api, query, 1_000).await.unwrap();
        let windows: Vec<_> = api
            .queries
            .lock()
            .unwrap()
            .iter()
            .map(|q| (q.from_block, q.to_block))
            .collect();
        assert_eq!(windows, vec![(0, 999), (1_000, 1_999), (2_000, 2_500)]);
    }
}
