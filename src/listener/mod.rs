//! Listener façade: wires a chain API handle, a processor and a subscriber
//! together and dispatches normalized events to registered handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, warn, Span};

use crate::chains::{BlockScoped, RawEvent};
use crate::config::ListenerOptions;
use crate::error::{ChainEventsError, Result};
use crate::events::{CWEvent, EventKind};
use crate::fetcher::{DisconnectedRange, StorageFetcher};
use crate::logging::LogContext;
use crate::provider::EvmApi;
use crate::state::PipelineState;
use crate::subscriber::{RawEventSink, Subscriber};

/// Turns one raw event into zero or more normalized events. Never fails:
/// events that cannot be enriched are logged and dropped.
#[async_trait]
pub trait EventProcessor<R = RawEvent>: Send + Sync
where
    R: Send + Sync + 'static,
{
    async fn process(&self, raw: &R, origin: Option<&str>) -> Vec<CWEvent>;
}

/// Downstream consumer of normalized events.
///
/// Handlers run in registration order; each receives the value returned by
/// the previous one. An error stops the chain for that event only.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &CWEvent, previous: Option<Value>) -> eyre::Result<Option<Value>>;

    /// Kinds this handler never sees.
    fn excluded_events(&self) -> &[EventKind] {
        &[]
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Ordered handler chain plus a listener-wide exclusion list.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
    excluded: Vec<EventKind>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Runs `handler` ahead of every handler registered so far.
    pub fn prepend_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(0, handler);
    }

    pub fn exclude(&mut self, kinds: impl IntoIterator<Item = EventKind>) {
        self.excluded.extend(kinds);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handler chain for one event. Returns the last handler's result.
    pub async fn handle_event(
        &self,
        event: &CWEvent,
        state: &PipelineState,
        span: &Span,
    ) -> Option<Value> {
        let kind = event.kind();
        state.record_dispatch(kind);
        if self.excluded.contains(&kind) {
            debug!(parent: span, "Skipping excluded event kind {}", kind);
            return None;
        }

        let mut previous = None;
        for handler in &self.handlers {
            if handler.excluded_events().contains(&kind) {
                continue;
            }
            match handler.handle(event, previous.take()).await {
                Ok(result) => previous = result,
                Err(e) => {
                    error!(
                        parent: span,
                        "Event handler {} failed on {} at block {}: {:#}",
                        handler.name(),
                        kind,
                        event.block_number,
                        e
                    );
                    state.record_handler_failure();
                    break;
                }
            }
        }
        previous
    }
}

/// Processor and handler chain of an initialized listener.
///
/// Raw events are processed one at a time. Every subscription opens a new
/// epoch; events whose processing began in an older epoch are discarded
/// instead of being dispatched after an unsubscribe.
pub struct Pipeline<R: Send + Sync + 'static = RawEvent> {
    processor: Arc<dyn EventProcessor<R>>,
    dispatcher: Dispatcher,
    state: Arc<PipelineState>,
    epoch: AtomicU64,
    gate: tokio::sync::Mutex<()>,
    span: Span,
}

impl<R> Pipeline<R>
where
    R: BlockScoped + Send + Sync + 'static,
{
    pub fn new(
        processor: Arc<dyn EventProcessor<R>>,
        dispatcher: Dispatcher,
        state: Arc<PipelineState>,
        span: Span,
    ) -> Self {
        Self {
            processor,
            dispatcher,
            state,
            epoch: AtomicU64::new(0),
            gate: tokio::sync::Mutex::new(()),
            span,
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Opens a new epoch and returns it with a sink bound to it.
    pub fn open_epoch(self: &Arc<Self>) -> (u64, Arc<dyn RawEventSink<R>>) {
        let epoch = self.next_epoch();
        let sink = Arc::new(EpochSink {
            pipeline: self.clone(),
            epoch,
        });
        (epoch, sink)
    }

    /// Processes a raw event and dispatches its results in order. Returns the
    /// number of events dispatched.
    pub async fn process_block(&self, raw: R, origin: Option<String>, epoch: u64) -> usize {
        let _gate = self.gate.lock().await;
        let block_number = raw.block_number();
        self.state.record_raw(block_number);

        let events = self.processor.process(&raw, origin.as_deref()).await;
        if events.is_empty() {
            self.state.record_dropped();
            return 0;
        }
        if self.current_epoch() != epoch {
            debug!(
                parent: &self.span,
                "Discarding {} event(s) from block {} of a closed subscription",
                events.len(),
                block_number
            );
            self.state.record_stale(events.len() as u64);
            return 0;
        }

        for event in &events {
            self.dispatcher.handle_event(event, &self.state, &self.span).await;
        }
        events.len()
    }

    pub async fn handle_event(&self, event: &CWEvent) -> Option<Value> {
        self.dispatcher.handle_event(event, &self.state, &self.span).await
    }
}

/// Binds a pipeline to the subscription epoch it was handed out for.
struct EpochSink<R: Send + Sync + 'static> {
    pipeline: Arc<Pipeline<R>>,
    epoch: u64,
}

#[async_trait]
impl<R> RawEventSink<R> for EpochSink<R>
where
    R: BlockScoped + Send + Sync + 'static,
{
    async fn on_event(&self, raw: R, origin: Option<String>) {
        self.pipeline.process_block(raw, origin, self.epoch).await;
    }
}

/// Everything a listener owns once `init` has succeeded.
pub struct Connection<A: ?Sized> {
    pub api: Arc<A>,
    pub pipeline: Arc<Pipeline>,
    pub subscriber: Arc<Subscriber<A>>,
    pub fetcher: Arc<dyn StorageFetcher>,
}

/// Chain-independent listener state and behaviour. Chain-bases wrap it and
/// supply the `init` that builds the [`Connection`].
pub struct ListenerCore<A: ?Sized> {
    options: ListenerOptions,
    log: LogContext,
    span: Span,
    dispatcher: Dispatcher,
    state: Arc<PipelineState>,
    connection: Option<Connection<A>>,
}

impl<A> ListenerCore<A>
where
    A: EvmApi + ?Sized + 'static,
{
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

    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    pub fn log(&self) -> &LogContext {
        &self.log
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn state(&self) -> Arc<PipelineState> {
        self.state.clone()
    }

    /// Handlers added after `init` only take effect on the next `init`.
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn connection(&self) -> Result<&Connection<A>> {
        self.connection.as_ref().ok_or(ChainEventsError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.connection.is_some()
    }

    pub fn pipeline(&self, processor: Arc<dyn EventProcessor>, dispatcher: Dispatcher) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            processor,
            dispatcher,
            self.state.clone(),
            self.log.span("processor"),
        ))
    }

    pub fn set_connection(&mut self, connection: Connection<A>) {
        if let Some(previous) = self.connection.take() {
            previous.pipeline.next_epoch();
            previous.subscriber.unsubscribe();
        }
        self.connection = Some(connection);
    }

    pub async fn subscribe(&self) -> Result<()> {
        let Some(connection) = &self.connection else {
            warn!(parent: &self.span, "Listener not initialized, call init() before subscribe()");
            return Ok(());
        };
        let (epoch, sink) = connection.pipeline.open_epoch();
        connection.subscriber.subscribe(sink).await?;
        info!(parent: &self.span, "Subscribed (epoch {})", epoch);
        Ok(())
    }

    pub fn unsubscribe(&self) {
        if let Some(connection) = &self.connection {
            connection.pipeline.next_epoch();
            connection.subscriber.unsubscribe();
        }
    }

    /// Drops the chain handle. `init` must be called again before use.
    pub fn deinit(&mut self) {
        self.unsubscribe();
        self.connection = None;
    }

    pub async fn latest_block_number(&self) -> Result<u64> {
        self.connection()?.api.block_number().await
    }

    /// Both the chain handle and the live subscription must be up.
    pub async fn is_connected(&self) -> bool {
        match &self.connection {
            Some(connection) => {
                connection.subscriber.is_subscribed() && connection.api.is_connected().await
            }
            None => false,
        }
    }

    pub async fn process_block(&self, raw: RawEvent, origin: Option<String>) -> Result<usize> {
        let pipeline = &self.connection()?.pipeline;
        Ok(pipeline
            .process_block(raw, origin, pipeline.current_epoch())
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

    /// Backfills `range` through the storage fetcher and dispatches every
    /// recovered event in block order.
    pub async fn process_missed_blocks(&self, range: Option<DisconnectedRange>) -> Result<usize> {
        let connection = self.connection()?;
        info!(parent: &self.span, "Fetching missed events for range {:?}", range);
        let events = connection.fetcher.fetch(range).await?;
        for event in &events {
            connection.pipeline.handle_event(event).await;
        }
        info!(parent: &self.span, "Dispatched {} missed event(s)", events.len());
        Ok(events.len())
    }
}

/// Uniform surface over every chain-base's listener.
#[async_trait]
pub trait ChainListener: Send + Sync {
    /// Connects to the chain and builds the processor and subscriber.
    async fn init(&mut self) -> Result<()>;
    async fn subscribe(&self) -> Result<()>;
    fn unsubscribe(&self);
    async fn latest_block_number(&self) -> Result<u64>;
    async fn is_connected(&self) -> bool;
    async fn process_missed_blocks(&self, range: Option<DisconnectedRange>) -> Result<usize>;
    fn options(&self) -> &ListenerOptions;
    fn state(&self) -> Arc<PipelineState>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::erc20;
    use crate::events::SupportedNetwork;
    use crate::test_utils::RecordingHandler;
    use std::sync::Mutex;

    fn event(block: u64) -> CWEvent {
        CWEvent::new(
            block,
            SupportedNetwork::Erc20,
            erc20::EventData::Transfer {
                from: "0xA".into(),
                to: "0xB".into(),
                value: "1".into(),
            },
            [],
        )
    }

    #[tokio::test]
    async fn failing_handler_stops_chain_for_that_event_only() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher.add_handler(Arc::new(RecordingHandler::new("a", seen.clone()).failing()));
        dispatcher.add_handler(Arc::new(RecordingHandler::new("b", seen.clone())));
        let state = PipelineState::new();

        dispatcher.handle_event(&event(1), &state, &Span::none()).await;
        dispatcher.handle_event(&event(2), &state, &Span::none()).await;

        assert_eq!(*seen.lock().unwrap(), vec![("a", 1), ("a", 2)]);
        assert_eq!(state.snapshot().handler_failures, 2);
        assert_eq!(state.snapshot().dispatched, 2);
    }

    #[tokio::test]
    async fn later_events_reach_every_handler_after_a_failure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher.add_handler(Arc::new(RecordingHandler::new("a", seen.clone()).failing_at(1)));
        dispatcher.add_handler(Arc::new(RecordingHandler::new("b", seen.clone())));
        let state = PipelineState::new();

        dispatcher.handle_event(&event(1), &state, &Span::none()).await;
        dispatcher.handle_event(&event(2), &state, &Span::none()).await;

        assert_eq!(*seen.lock().unwrap(), vec![("a", 1), ("a", 2), ("b", 2)]);
        assert_eq!(state.snapshot().handler_failures, 1);
    }

    #[tokio::test]
    async fn excluded_kinds_are_skipped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher.add_handler(Arc::new(
            RecordingHandler::new("a", seen.clone())
                .excluding(vec![erc20::EventKind::Transfer.into()]),
        ));
        dispatcher.add_handler(Arc::new(RecordingHandler::new("b", seen.clone())));
        let state = PipelineState::new();

        dispatcher.handle_event(&event(1), &state, &Span::none()).await;
        assert_eq!(*seen.lock().unwrap(), vec![("b", 1)]);

        dispatcher.exclude([erc20::EventKind::Transfer.into()]);
        dispatcher.handle_event(&event(2), &state, &Span::none()).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    struct Passthrough;

    #[async_trait]
    impl EventHandler for Passthrough {
        async fn handle(&self, event: &CWEvent, _previous: Option<Value>) -> eyre::Result<Option<Value>> {
            Ok(Some(serde_json::json!(event.block_number)))
        }
    }

    struct Expect(u64);

    #[async_trait]
    impl EventHandler for Expect {
        async fn handle(&self, _event: &CWEvent, previous: Option<Value>) -> eyre::Result<Option<Value>> {
            eyre::ensure!(previous == Some(serde_json::json!(self.0)), "unexpected previous result");
            Ok(previous)
        }
    }

    struct EchoProcessor;

    #[async_trait]
    impl EventProcessor for EchoProcessor {
        async fn process(&self, raw: &RawEvent, _origin: Option<&str>) -> Vec<CWEvent> {
            vec![event(raw.block_number)]
        }
    }

    fn raw(block: u64) -> RawEvent {
        let log = alloy::primitives::Log {
            address: alloy::primitives::Address::ZERO,
            data: Default::default(),
        };
        RawEvent::new("Transfer", block, log)
    }

    #[tokio::test]
    async fn results_of_a_closed_epoch_are_discarded() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher.add_handler(Arc::new(RecordingHandler::new("a", seen.clone())));
        assert_eq!(dispatcher.len(), 1);
        let state = Arc::new(PipelineState::new());
        let pipeline = Pipeline::new(Arc::new(EchoProcessor), dispatcher, state.clone(), Span::none());

        let epoch = pipeline.next_epoch();
        assert_eq!(pipeline.process_block(raw(1), None, epoch).await, 1);

        pipeline.next_epoch();
        assert_eq!(pipeline.process_block(raw(2), None, epoch).await, 0);
        assert_eq!(*seen.lock().unwrap(), vec![("a", 1)]);
        assert_eq!(state.snapshot().stale, 1);
        assert_eq!(state.snapshot().raw_events, 2);
    }

    #[tokio::test]
    async fn uninitialized_core_still_dispatches_directly() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut core: ListenerCore<crate::test_utils::MockEvmApi> = ListenerCore::new(
            ListenerOptions::new("t", SupportedNetwork::Erc20, "ws://localhost:8546"),
        );
        core.dispatcher_mut()
            .add_handler(Arc::new(RecordingHandler::new("a", seen.clone())));

        assert!(matches!(
            core.process_block(raw(3), None).await,
            Err(ChainEventsError::NotInitialized)
        ));
        core.handle_event(&event(4)).await;
        assert_eq!(*seen.lock().unwrap(), vec![("a", 4)]);

        core.deinit();
        assert!(!core.is_initialized());
        assert!(!core.is_connected().await);
    }

    #[tokio::test]
    async fn previous_result_is_chained() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add_handler(Arc::new(Passthrough));
        dispatcher.add_handler(Arc::new(Expect(9)));
        let state = PipelineState::new();

        let result = dispatcher.handle_event(&event(9), &state, &Span::none()).await;
        assert_eq!(result, Some(serde_json::json!(9)));
        assert_eq!(state.snapshot().handler_failures, 0);
    }
}
