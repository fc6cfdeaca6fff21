use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn, Span};

use super::{BlockPoller, SubstrateEvent, SubstrateProcessor, SubstrateStorageFetcher};
use crate::config::ListenerOptions;
use crate::error::{ChainEventsError, Result};
use crate::events::{CWEvent, EventKind};
use crate::fetcher::{DisconnectedRange, StorageFetcher};
use crate::listener::{ChainListener, Dispatcher, EventHandler, EventProcessor, Pipeline};
use crate::logging::LogContext;
use crate::provider::{SubstrateApi, SubstrateClient};
use crate::state::PipelineState;

struct Connection {
    api: Arc<dyn SubstrateApi>,
    pipeline: Arc<Pipeline<SubstrateEvent>>,
    poller: BlockPoller,
    fetcher: Arc<SubstrateStorageFetcher>,
}

/// Follows balance transfers, democracy and treasury events of one Substrate
/// chain. Every event is labeled with the listener's name.
pub struct SubstrateListener {
    options: ListenerOptions,
    log: LogContext,
    span: Span,
    dispatcher: Dispatcher,
    state: Arc<PipelineState>,
    connection: Option<Connection>,
}

impl SubstrateListener {
    pub fn new(options: ListenerOptions) -> Self {
        let log = LogContext::new(options.network, options.name.clone());
        Self {
            span: log.span("listener"),
            log,
            options,
            dispatcher: Dispatcher::new(),
            state: Arc::new(PipelineState::new()),
            connection: None,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.dispatcher.add_handler(handler);
        self
    }

    pub fn with_excluded_events(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.dispatcher.exclude(kinds);
        self
    }

    pub async fn init_with(&mut self, api: Arc<dyn SubstrateApi>) -> Result<()> {
        let processor: Arc<dyn EventProcessor<SubstrateEvent>> = Arc::new(SubstrateProcessor::new(
            api.clone(),
            self.options.enricher.clone(),
            &self.log,
        ));
        let pipeline = Arc::new(Pipeline::new(
            processor,
            self.dispatcher.clone(),
            self.state.clone(),
            self.log.span("processor"),
        ));
        let poller = BlockPoller::new(
            api.clone(),
            Duration::from_millis(self.options.poll_interval_ms),
            &self.log,
        );
        let fetcher = Arc::new(SubstrateStorageFetcher::new(
            api.clone(),
            self.options.enricher.clone(),
            &self.log,
        ));

        if let Some(previous) = self.connection.take() {
            previous.pipeline.next_epoch();
            previous.poller.unsubscribe();
        }
        self.connection = Some(Connection {
            api,
            pipeline,
            poller,
            fetcher,
        });
        info!(
            parent: &self.span,
            "Initialized substrate listener, polling every {}ms",
            self.options.poll_interval_ms
        );
        Ok(())
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or(ChainEventsError::NotInitialized)
    }

    fn origin(&self) -> Option<String> {
        Some(self.options.name.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.connection.is_some()
    }

    /// Drops the chain handle. `init` must be called again before use.
    pub fn deinit(&mut self) {
        self.unsubscribe();
        self.connection = None;
    }

    pub async fn process_block(&self, raw: SubstrateEvent) -> Result<usize> {
        let pipeline = &self.connection()?.pipeline;
        Ok(pipeline
            .process_block(raw, self.origin(), pipeline.current_epoch())
            .await)
    }

    pub async fn handle_event(&self, event: &CWEvent) -> Option<Value> {
        match &self.connection {
            Some(connection) => connection.pipeline.handle_event(event).await,
            None => {
                self.dispatcher
                    .handle_event(event, &self.state, &self.span)
                    .await
            }
        }
    }

    /// Current state of one democracy or treasury entity, by
    /// `<entity-kind>/<index>`.
    pub async fn fetch_one(&self, id: &str) -> Result<Vec<CWEvent>> {
        self.connection()?.fetcher.fetch_one(id).await
    }
}

#[async_trait]
impl ChainListener for SubstrateListener {
    async fn init(&mut self) -> Result<()> {
        let api = SubstrateClient::connect(&self.options.url).await?;
        self.init_with(Arc::new(api)).await
    }

    async fn subscribe(&self) -> Result<()> {
        let Some(connection) = &self.connection else {
            warn!(parent: &self.span, "Listener not initialized, call init() before subscribe()");
            return Ok(());
        };
        let (epoch, sink) = connection.pipeline.open_epoch();
        connection.poller.subscribe(sink, self.origin()).await?;
        info!(parent: &self.span, "Subscribed (epoch {})", epoch);
        Ok(())
    }

    fn unsubscribe(&self) {
        if let Some(connection) = &self.connection {
            connection.pipeline.next_epoch();
            connection.poller.unsubscribe();
        }
    }

    async fn latest_block_number(&self) -> Result<u64> {
        self.connection()?.api.block_number().await
    }

    async fn is_connected(&self) -> bool {
        match &self.connection {
            Some(connection) => connection.poller.is_subscribed() && connection.api.is_connected().await,
            None => false,
        }
    }

    async fn process_missed_blocks(&self, range: Option<DisconnectedRange>) -> Result<usize> {
        let connection = self.connection()?;
        info!(parent: &self.span, "Fetching missed events for range {:?}", range);
        let events = connection.fetcher.fetch(range).await?;
        let count = events.len();
        let origin = self.origin();
        for event in events {
            connection
                .pipeline
                .handle_event(&event.with_origin(origin.as_deref()))
                .await;
        }
        info!(parent: &self.span, "Dispatched {} missed event(s)", count);
        Ok(count)
    }

    fn options(&self) -> &ListenerOptions {
        &self.options
    }

    fn state(&self) -> Arc<PipelineState> {
        self.state.clone()
    }
}
