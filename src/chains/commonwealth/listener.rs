use std::sync::{Arc, Weak};

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, Span};

use super::{event_name, CommonwealthProcessor, CommonwealthStorageFetcher, EventData};
use crate::chains::fmt_address;
use crate::config::ListenerOptions;
use crate::error::{ChainEventsError, Result};
use crate::events::{self, CWEvent, EventKind};
use crate::fetcher::DisconnectedRange;
use crate::listener::{ChainListener, Connection, EventHandler, ListenerCore};
use crate::provider::{EvmClient, ProjectApi};
use crate::state::PipelineState;
use crate::subscriber::{Subscriber, WatchedContract};

type ProjectSubscriber = Subscriber<dyn ProjectApi>;

/// Adds every newly created project to the watch-list. Runs ahead of the
/// user's handlers and passes their input through untouched.
struct ProjectWatcher {
    subscriber: Weak<ProjectSubscriber>,
    span: Span,
}

#[async_trait]
impl EventHandler for ProjectWatcher {
    async fn handle(&self, event: &CWEvent, previous: Option<Value>) -> eyre::Result<Option<Value>> {
        let events::EventData::Commonwealth(EventData::ProjectCreated { id, .. }) = &event.data else {
            return Ok(previous);
        };
        let Some(subscriber) = self.subscriber.upgrade() else {
            return Ok(previous);
        };

        let project: Address = id.parse()?;
        let entry = WatchedContract::new(project, event.chain.clone());
        match subscriber.add_contract(entry).await {
            Ok(true) => info!(parent: &self.span, "Watching new project {}", fmt_address(&project)),
            Ok(false) => {}
            Err(e) => error!(
                parent: &self.span,
                "Failed to watch new project {}: {}",
                fmt_address(&project),
                e
            ),
        }
        Ok(previous)
    }

    fn name(&self) -> &str {
        "project-watcher"
    }
}

/// Watches a project factory and the projects it has deployed.
pub struct CommonwealthListener {
    core: ListenerCore<dyn ProjectApi>,
    fetcher: Option<Arc<CommonwealthStorageFetcher>>,
}

impl CommonwealthListener {
    pub fn new(options: ListenerOptions) -> Self {
        Self {
            core: ListenerCore::new(options),
            fetcher: None,
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

    pub async fn init_with(&mut self, api: Arc<dyn ProjectApi>) -> Result<()> {
        let options = self.core.options().clone();
        let log = self.core.log().clone();

        let subscriber = Arc::new(Subscriber::new(api.clone(), event_name, &log));
        let mut dispatcher = self.core.dispatcher().clone();
        dispatcher.prepend_handler(Arc::new(ProjectWatcher {
            subscriber: Arc::downgrade(&subscriber),
            span: log.span("project_watcher"),
        }));
        let processor = Arc::new(CommonwealthProcessor::new(api.clone(), &log));
        let pipeline = self.core.pipeline(processor, dispatcher);
        let fetcher = Arc::new(CommonwealthStorageFetcher::new(
            api.clone(),
            options.factory,
            subscriber.clone(),
            options.max_block_range,
            &log,
        ));

        if let Some(factory) = options.factory {
            subscriber
                .add_contract(WatchedContract::new(factory, None))
                .await?;
        }
        for contract in &options.contracts {
            subscriber
                .add_contract(WatchedContract::new(contract.address, contract.origin.clone()))
                .await?;
        }

        self.fetcher = Some(fetcher.clone());
        self.core.set_connection(Connection {
            api,
            pipeline,
            subscriber,
            fetcher,
        });
        info!(
            parent: self.core.span(),
            "Initialized commonwealth listener for {} project(s)",
            options.contracts.len()
        );
        Ok(())
    }

    /// Backfill that can include projects which have already completed.
    pub async fn fetch_with(
        &self,
        range: Option<DisconnectedRange>,
        fetch_all_completed: bool,
    ) -> Result<Vec<CWEvent>> {
        let fetcher = self.fetcher.as_ref().ok_or(ChainEventsError::NotInitialized)?;
        fetcher.fetch_with(range, fetch_all_completed).await
    }

    pub fn is_watching(&self, project: &Address) -> bool {
        self.core
            .connection()
            .map(|c| c.subscriber.contains(project))
            .unwrap_or(false)
    }

    pub fn core(&self) -> &ListenerCore<dyn ProjectApi> {
        &self.core
    }
}

#[async_trait]
impl ChainListener for CommonwealthListener {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::commonwealth::{Back, ProjectCreated, Succeeded};
    use crate::events::SupportedNetwork;
    use crate::provider::ProjectMetadata;
    use crate::test_utils::{rpc_log, MockEvmApi, RecordingHandler};
    use alloy::primitives::{address, U256};
    use std::sync::Mutex;
    use std::time::Duration;

    const FACTORY: Address = address!("00000000000000000000000000000000000000fa");
    const GARDEN: Address = address!("00000000000000000000000000000000000000a1");

    fn options() -> ListenerOptions {
        ListenerOptions::new("cw", SupportedNetwork::Commonwealth, "ws://localhost:8546")
            .with_factory(FACTORY)
    }

    fn seeded() -> Arc<MockEvmApi> {
        let api = Arc::new(MockEvmApi::new());
        api.set_project(
            GARDEN,
            ProjectMetadata {
                name: "garden".into(),
                beneficiary: Address::ZERO,
                threshold: U256::from(100),
                deadline: 2_000_000_000,
            },
            10,
        );
        api
    }

    fn back_log(block: u64) -> alloy::rpc::types::Log {
        rpc_log(
            GARDEN,
            block,
            &Back {
                sender: Address::repeat_byte(0x33),
                token: Address::ZERO,
                amount: U256::from(10),
            },
        )
    }

    async fn wait_for(seen: &Arc<Mutex<Vec<(&'static str, u64)>>>, count: usize) {
        for _ in 0..200 {
            if seen.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {count} handler calls");
    }

    #[tokio::test]
    async fn created_projects_are_watched_live() {
        let api = seeded();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listener = CommonwealthListener::new(options())
            .with_handler(Arc::new(RecordingHandler::new("a", seen.clone())));
        listener.init_with(api.clone()).await.unwrap();
        listener.subscribe().await.unwrap();
        assert!(!listener.is_watching(&GARDEN));

        api.emit(rpc_log(
            FACTORY,
            10,
            &ProjectCreated {
                index: U256::ZERO,
                project: GARDEN,
            },
        ));
        wait_for(&seen, 1).await;
        assert!(listener.is_watching(&GARDEN));

        api.emit(back_log(11));
        wait_for(&seen, 2).await;
        assert_eq!(*seen.lock().unwrap(), vec![("a", 10), ("a", 11)]);
    }

    #[tokio::test]
    async fn catch_up_discovers_projects_before_subscribing() {
        let api = seeded();
        api.push_log(rpc_log(
            FACTORY,
            10,
            &ProjectCreated {
                index: U256::ZERO,
                project: GARDEN,
            },
        ));
        api.push_log(back_log(12));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listener = CommonwealthListener::new(options())
            .with_handler(Arc::new(RecordingHandler::new("a", seen.clone())));
        listener.init_with(api.clone()).await.unwrap();

        let count = listener.process_missed_blocks(None).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(*seen.lock().unwrap(), vec![("a", 10), ("a", 12)]);
        assert!(listener.is_watching(&GARDEN));

        listener.subscribe().await.unwrap();
        assert_eq!(api.live_subscriptions(), 2);
    }

    #[tokio::test]
    async fn catch_up_replays_projects_that_completed_in_range() {
        let api = seeded();
        api.push_log(rpc_log(
            FACTORY,
            10,
            &ProjectCreated {
                index: U256::ZERO,
                project: GARDEN,
            },
        ));
        api.push_log(back_log(12));
        api.push_log(rpc_log(
            GARDEN,
            14,
            &Succeeded {
                timestamp: U256::from(1),
                amount: U256::from(10),
            },
        ));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listener = CommonwealthListener::new(options())
            .with_handler(Arc::new(RecordingHandler::new("a", seen.clone())));
        listener.init_with(api.clone()).await.unwrap();

        let count = listener
            .process_missed_blocks(Some(DisconnectedRange::from_block(5)))
            .await
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(*seen.lock().unwrap(), vec![("a", 10), ("a", 12), ("a", 14)]);
    }

    #[tokio::test]
    async fn catch_up_covers_projects_discovered_live() {
        let api = seeded();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listener = CommonwealthListener::new(options())
            .with_handler(Arc::new(RecordingHandler::new("a", seen.clone())));
        listener.init_with(api.clone()).await.unwrap();
        listener.subscribe().await.unwrap();

        api.emit(rpc_log(
            FACTORY,
            10,
            &ProjectCreated {
                index: U256::ZERO,
                project: GARDEN,
            },
        ));
        wait_for(&seen, 1).await;
        assert!(listener.is_watching(&GARDEN));

        // Missed while disconnected; the factory log itself is outside the range.
        api.push_log(back_log(30));
        let count = listener
            .process_missed_blocks(Some(DisconnectedRange::from_block(20)))
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(*seen.lock().unwrap(), vec![("a", 10), ("a", 30)]);
    }

    #[tokio::test]
    async fn known_projects_are_watched_from_init() {
        let api = seeded();
        let mut listener =
            CommonwealthListener::new(options().with_contract(GARDEN, Some("garden")));
        listener.init_with(api.clone()).await.unwrap();
        assert!(listener.is_watching(&FACTORY));
        assert!(listener.is_watching(&GARDEN));

        let events = listener.fetch_with(None, true).await.unwrap();
        assert!(events.is_empty());
    }
}
