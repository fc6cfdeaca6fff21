use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn, Span};

use super::SubstrateEvent;
use crate::error::Result;
use crate::logging::LogContext;
use crate::provider::SubstrateApi;
use crate::subscriber::RawEventSink;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Follows the chain head by polling, handing each new block's events to the
/// sink in block order.
///
/// A failed read is retried on the next tick from the same block, so no block
/// is skipped and none is delivered twice.
pub struct BlockPoller {
    api: Arc<dyn SubstrateApi>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl BlockPoller {
    pub fn new(api: Arc<dyn SubstrateApi>, interval: Duration, log: &LogContext) -> Self {
        Self {
            api,
            interval,
            task: Mutex::new(None),
            span: log.span("subscriber"),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.task).is_some()
    }

    /// Starts polling from the block after the current head. Calling this
    /// while already subscribed is a no-op.
    pub async fn subscribe(
        &self,
        sink: Arc<dyn RawEventSink<SubstrateEvent>>,
        origin: Option<String>,
    ) -> Result<()> {
        if self.is_subscribed() {
            warn!(parent: &self.span, "Already subscribed, ignoring subscribe call");
            return Ok(());
        }

        let head = self.api.block_number().await?;
        info!(parent: &self.span, "Polling for blocks after {}", head);

        let api = self.api.clone();
        let interval = self.interval;
        let span = self.span.clone();
        let handle = tokio::spawn(async move {
            let mut next = head + 1;
            loop {
                if let Err(e) = deliver_new_blocks(api.as_ref(), &mut next, sink.as_ref(), &origin).await {
                    warn!(parent: &span, "Failed to poll block {}, retrying: {}", next, e);
                }
                tokio::time::sleep(interval).await;
            }
        });

        let mut task = lock(&self.task);
        if task.is_some() {
            handle.abort();
        } else {
            *task = Some(handle);
        }
        Ok(())
    }

    /// Stops polling. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
            info!(parent: &self.span, "Stopped polling");
        }
    }
}

async fn deliver_new_blocks(
    api: &dyn SubstrateApi,
    next: &mut u64,
    sink: &dyn RawEventSink<SubstrateEvent>,
    origin: &Option<String>,
) -> Result<()> {
    let head = api.block_number().await?;
    while *next <= head {
        for raw in api.events_at(*next).await? {
            sink.on_event(raw, origin.clone()).await;
        }
        *next += 1;
    }
    Ok(())
}

impl Drop for BlockPoller {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}
