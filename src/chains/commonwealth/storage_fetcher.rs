use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use tracing::{debug, info, Span};

use super::{enricher, event_name, EventData, EventKind};
use crate::chains::{fmt_address, RawEvent};
use crate::error::{ChainEventsError, Result};
use crate::events::{self, is_entity_completed, CWEvent};
use crate::fetcher::{fetch_logs_chunked, resolve_range, sort_by_block, DisconnectedRange, StorageFetcher};
use crate::logging::LogContext;
use crate::provider::{LogQuery, ProjectApi};
use crate::subscriber::{ContractSource, WatchedContract};

/// Rebuilds project history: factory `ProjectCreated` logs discover projects,
/// then each project's own logs are replayed. Projects already tracked by
/// `projects` are replayed as well, whether or not their creation falls in
/// the range.
pub struct CommonwealthStorageFetcher {
    api: Arc<dyn ProjectApi>,
    factory: Option<Address>,
    projects: Arc<dyn ContractSource>,
    max_block_range: u64,
    span: Span,
}

struct ProjectHistory {
    project: Address,
    origin: Option<String>,
    events: Vec<CWEvent>,
}

impl CommonwealthStorageFetcher {
    pub fn new(
        api: Arc<dyn ProjectApi>,
        factory: Option<Address>,
        projects: Arc<dyn ContractSource>,
        max_block_range: u64,
        log: &LogContext,
    ) -> Self {
        Self {
            api,
            factory,
            projects,
            max_block_range,
            span: log.span("storage_fetcher"),
        }
    }

    /// Like [`StorageFetcher::fetch`], but projects that already succeeded or
    /// failed are only included when `fetch_all_completed` is set. Use the
    /// filtered form to seed an entity list; replaying missed blocks needs
    /// every event.
    pub async fn fetch_with(
        &self,
        range: Option<DisconnectedRange>,
        fetch_all_completed: bool,
    ) -> Result<Vec<CWEvent>> {
        let Some((from_block, to_block)) = resolve_range(self.api.as_ref(), range, &self.span).await? else {
            return Ok(vec![]);
        };
        info!(
            parent: &self.span,
            "Fetching project events for range: {}-{}.",
            from_block,
            to_block
        );

        let mut histories = self.created_in(from_block, to_block).await?;
        for tracked in self.tracked_projects() {
            if !histories.iter().any(|h| h.project == tracked.contract) {
                histories.push(ProjectHistory {
                    project: tracked.contract,
                    origin: tracked.origin,
                    events: vec![],
                });
            }
        }

        let limit = range
            .and_then(|r| r.max_results)
            .unwrap_or(histories.len());
        let mut results = Vec::new();
        for mut history in histories.into_iter().take(limit) {
            let events = self
                .project_events(history.project, history.origin.as_deref(), from_block, to_block)
                .await?;
            history.events.extend(events);
            if !fetch_all_completed && is_entity_completed(&history.events) {
                debug!(
                    parent: &self.span,
                    "Skipping completed project {}",
                    fmt_address(&history.project)
                );
                continue;
            }
            results.extend(history.events);
        }
        sort_by_block(&mut results);
        Ok(results)
    }

    /// One history per project the factory created in the range, seeded
    /// with its enriched `ProjectCreated` event.
    async fn created_in(&self, from_block: u64, to_block: u64) -> Result<Vec<ProjectHistory>> {
        let Some(factory) = self.factory else {
            return Ok(vec![]);
        };
        let query = LogQuery {
            addresses: vec![factory],
            topic0: Some(EventKind::ProjectCreated.signature_hash()),
            from_block,
            to_block,
        };
        let logs = fetch_logs_chunked(self.api.as_ref(), query, self.max_block_range).await?;
        debug!(parent: &self.span, "Found {} created project(s)", logs.len());

        let mut histories = Vec::with_capacity(logs.len());
        for log in &logs {
            let raw = RawEvent::from_rpc_log(log, event_name);
            let event =
                enricher::enrich(self.api.as_ref(), raw.block_number, EventKind::ProjectCreated, &raw)
                    .await?;
            let project: Address = match &event.data {
                events::EventData::Commonwealth(EventData::ProjectCreated { id, .. }) => id
                    .parse()
                    .map_err(|_| ChainEventsError::InvalidAddress(id.clone()))?,
                _ => continue,
            };
            let origin = self.origin_of(&project);
            histories.push(ProjectHistory {
                project,
                events: vec![event.with_origin(origin.as_deref())],
                origin,
            });
        }
        Ok(histories)
    }

    async fn project_events(
        &self,
        project: Address,
        origin: Option<&str>,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<CWEvent>> {
        let mut events = Vec::new();
        for kind in EventKind::PROJECT {
            let query = LogQuery {
                addresses: vec![project],
                topic0: Some(kind.signature_hash()),
                from_block,
                to_block,
            };
            let logs = fetch_logs_chunked(self.api.as_ref(), query, self.max_block_range).await?;
            for log in &logs {
                let raw = RawEvent::from_rpc_log(log, event_name);
                let event = enricher::enrich(self.api.as_ref(), raw.block_number, kind, &raw).await?;
                events.push(event.with_origin(origin));
            }
        }
        Ok(events)
    }

    /// Watched contracts other than the factory itself.
    fn tracked_projects(&self) -> Vec<WatchedContract> {
        self.projects
            .contracts()
            .into_iter()
            .filter(|entry| Some(entry.contract) != self.factory)
            .collect()
    }

    fn origin_of(&self, project: &Address) -> Option<String> {
        self.projects.find(project).and_then(|entry| entry.origin)
    }
}

#[async_trait]
impl StorageFetcher for CommonwealthStorageFetcher {
    async fn fetch(&self, range: Option<DisconnectedRange>) -> Result<Vec<CWEvent>> {
        self.fetch_with(range, true).await
    }

    async fn fetch_one(&self, id: &str) -> Result<Vec<CWEvent>> {
        let project: Address = id
            .parse()
            .map_err(|_| ChainEventsError::InvalidAddress(id.to_string()))?;
        let head = self
            .api
            .block_number()
            .await
            .map_err(|_| ChainEventsError::BlockNumberUnavailable)?;

        let mut events: Vec<CWEvent> = self
            .created_in(0, head)
            .await?
            .into_iter()
            .filter(|h| h.project == project)
            .flat_map(|h| h.events)
            .collect();
        let origin = self.origin_of(&project);
        events.extend(
            self.project_events(project, origin.as_deref(), 0, head)
                .await?,
        );
        sort_by_block(&mut events);
        Ok(events)
    }
}
