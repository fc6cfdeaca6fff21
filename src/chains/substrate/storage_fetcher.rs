use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, Span};

use super::{enricher, parse_type, EventData};
use crate::config::EnricherConfig;
use crate::error::{ChainEventsError, Result};
use crate::events::{CWEvent, EntityKind, SupportedNetwork};
use crate::fetcher::{clamp_range, sort_by_block, DisconnectedRange, StorageFetcher};
use crate::logging::LogContext;
use crate::provider::{ReferendumStatus, SubstrateApi};

/// Backfill for Substrate chains.
///
/// A range with a start block is replayed block by block. Without one, the
/// originating event of every democracy proposal, ongoing referendum and
/// treasury proposal still in storage is synthesized at the current head.
pub struct SubstrateStorageFetcher {
    api: Arc<dyn SubstrateApi>,
    config: EnricherConfig,
    span: Span,
}

impl SubstrateStorageFetcher {
    pub fn new(api: Arc<dyn SubstrateApi>, config: EnricherConfig, log: &LogContext) -> Self {
        Self {
            api,
            config,
            span: log.span("storage_fetcher"),
        }
    }

    async fn head(&self) -> Result<u64> {
        let head = self
            .api
            .block_number()
            .await
            .map_err(|_| ChainEventsError::BlockNumberUnavailable)?;
        if head == 0 {
            error!(parent: &self.span, "Failed to fetch current block! Aborting fetch.");
            return Err(ChainEventsError::BlockNumberUnavailable);
        }
        Ok(head)
    }

    async fn replay(&self, from_block: u64, to_block: u64) -> Result<Vec<CWEvent>> {
        info!(
            parent: &self.span,
            "Replaying blocks for range: {}-{}.",
            from_block,
            to_block
        );
        let mut events = Vec::new();
        for block in from_block..=to_block {
            for raw in self.api.events_at(block).await? {
                let Some(kind) = parse_type(&raw.section, &raw.method) else {
                    continue;
                };
                if let Some(event) = enricher::enrich(self.api.as_ref(), kind, &raw, &self.config).await? {
                    events.push(event);
                }
            }
        }
        sort_by_block(&mut events);
        Ok(events)
    }

    /// Current entities, as of the chain head.
    pub async fn fetch_entities(&self, max_results: Option<usize>) -> Result<Vec<CWEvent>> {
        let head = self.head().await?;
        let mut events = self.democracy_proposals(head, None).await?;
        events.extend(self.referenda(head, None).await?);
        events.extend(self.treasury_proposals(head, None).await?);
        if let Some(limit) = max_results {
            events.truncate(limit);
        }
        info!(parent: &self.span, "Fetch complete.");
        Ok(events)
    }

    async fn democracy_proposals(&self, head: u64, only: Option<u32>) -> Result<Vec<CWEvent>> {
        let mut events = Vec::new();
        for proposal in self.api.public_proposals(head).await? {
            if only.is_some_and(|index| index != proposal.index) {
                continue;
            }
            let Some(deposit) = self.api.deposit_of(proposal.index, head).await? else {
                continue;
            };
            events.push(CWEvent::new(
                head,
                SupportedNetwork::Substrate,
                EventData::DemocracyProposed {
                    proposal_index: proposal.index,
                    proposal_hash: proposal.proposal_hash,
                    deposit: deposit.to_string(),
                    proposer: proposal.proposer.clone(),
                },
                [proposal.proposer],
            ));
        }
        info!(parent: &self.span, "Found {} democracy proposals!", events.len());
        Ok(events)
    }

    async fn referenda(&self, head: u64, only: Option<u32>) -> Result<Vec<CWEvent>> {
        let indices: Vec<u32> = match only {
            Some(index) => vec![index],
            None => self.api.referendum_range(head).await?.collect(),
        };
        let mut events = Vec::new();
        for index in indices {
            let Some(ReferendumStatus::Ongoing {
                end,
                proposal_hash,
                threshold,
                ..
            }) = self.api.referendum_info(index, head).await?
            else {
                continue;
            };
            events.push(CWEvent::new(
                head,
                SupportedNetwork::Substrate,
                EventData::DemocracyStarted {
                    referendum_index: index,
                    proposal_hash,
                    vote_threshold: threshold,
                    end_block: end,
                },
                [],
            ));
        }
        info!(parent: &self.span, "Found {} democracy referenda!", events.len());
        Ok(events)
    }

    async fn treasury_proposals(&self, head: u64, only: Option<u32>) -> Result<Vec<CWEvent>> {
        let indices: Vec<u32> = match only {
            Some(index) => vec![index],
            None => (0..self.api.treasury_proposal_count(head).await?).collect(),
        };
        let mut events = Vec::new();
        for index in indices {
            let Some(proposal) = self.api.treasury_proposal(index, head).await? else {
                continue;
            };
            events.push(CWEvent::new(
                head,
                SupportedNetwork::Substrate,
                EventData::TreasuryProposed {
                    proposal_index: index,
                    proposer: proposal.proposer.clone(),
                    value: proposal.value.to_string(),
                    beneficiary: proposal.beneficiary,
                    bond: proposal.bond.to_string(),
                },
                [proposal.proposer],
            ));
        }
        info!(parent: &self.span, "Found {} treasury proposals!", events.len());
        Ok(events)
    }
}

/// `democracy-proposal/3` and the like.
fn parse_entity_id(id: &str) -> Result<(EntityKind, u32)> {
    let invalid = || ChainEventsError::InvalidEntityId(id.to_string());
    let (kind, index) = id.split_once('/').ok_or_else(invalid)?;
    let kind = [
        EntityKind::DemocracyProposal,
        EntityKind::DemocracyReferendum,
        EntityKind::TreasuryProposal,
    ]
    .into_iter()
    .find(|k| k.as_str() == kind)
    .ok_or_else(invalid)?;
    Ok((kind, index.parse().map_err(|_| invalid())?))
}

#[async_trait]
impl StorageFetcher for SubstrateStorageFetcher {
    async fn fetch(&self, range: Option<DisconnectedRange>) -> Result<Vec<CWEvent>> {
        match range {
            Some(range) if range.start_block.is_some() => {
                let head = self.head().await?;
                match clamp_range(head, Some(range), &self.span)? {
                    Some((from_block, to_block)) => self.replay(from_block, to_block).await,
                    None => Ok(vec![]),
                }
            }
            _ => self.fetch_entities(range.and_then(|r| r.max_results)).await,
        }
    }

    async fn fetch_one(&self, id: &str) -> Result<Vec<CWEvent>> {
        let (kind, index) = parse_entity_id(id)?;
        let head = self.head().await?;
        let events = match kind {
            EntityKind::DemocracyProposal => self.democracy_proposals(head, Some(index)).await?,
            EntityKind::DemocracyReferendum => self.referenda(head, Some(index)).await?,
            EntityKind::TreasuryProposal => self.treasury_proposals(head, Some(index)).await?,
            EntityKind::Project => vec![],
        };
        if events.is_empty() {
            error!(parent: &self.span, "No {} found with id {}!", kind.as_str(), index);
        }
        Ok(events)
    }
}
