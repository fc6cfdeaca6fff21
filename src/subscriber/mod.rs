//! Live log subscriptions over a growable watch-list of contracts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use futures_util::StreamExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Span};

use crate::chains::{fmt_address, RawEvent};
use crate::error::Result;
use crate::logging::LogContext;
use crate::provider::{Erc20Api, EvmApi};

/// Receives every raw event a subscription delivers, one at a time.
#[async_trait]
pub trait RawEventSink<R = RawEvent>: Send + Sync
where
    R: Send + 'static,
{
    async fn on_event(&self, raw: R, origin: Option<String>);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedContract {
    pub contract: Address,
    /// Cached at registration for tokens, `None` for other contracts.
    pub total_supply: Option<U256>,
    pub origin: Option<String>,
}

impl WatchedContract {
    pub fn new(contract: Address, origin: Option<String>) -> Self {
        Self {
            contract,
            total_supply: None,
            origin,
        }
    }
}

/// Ordered set of watched contracts, unique by address.
#[derive(Debug, Default, Clone)]
pub struct WatchList {
    entries: Vec<WatchedContract>,
}

impl WatchList {
    pub fn contains(&self, contract: &Address) -> bool {
        self.entries.iter().any(|e| e.contract == *contract)
    }

    pub fn get(&self, contract: &Address) -> Option<&WatchedContract> {
        self.entries.iter().find(|e| e.contract == *contract)
    }

    /// Returns `false` and leaves the list untouched on a duplicate address.
    pub fn insert(&mut self, entry: WatchedContract) -> bool {
        if self.contains(&entry.contract) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn remove(&mut self, contract: &Address) -> Option<WatchedContract> {
        let index = self.entries.iter().position(|e| e.contract == *contract)?;
        Some(self.entries.remove(index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchedContract> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read access to the contracts a listener currently tracks. Backfill and
/// enrichment query it at use time, so contracts added at runtime are seen.
pub trait ContractSource: Send + Sync {
    fn contracts(&self) -> Vec<WatchedContract>;

    fn find(&self, contract: &Address) -> Option<WatchedContract> {
        self.contracts().into_iter().find(|e| e.contract == *contract)
    }
}

impl ContractSource for Vec<WatchedContract> {
    fn contracts(&self) -> Vec<WatchedContract> {
        self.clone()
    }
}

/// Components reachable from the subscriber's own sink hold it weakly.
impl<T: ContractSource> ContractSource for Weak<T> {
    fn contracts(&self) -> Vec<WatchedContract> {
        self.upgrade().map(|source| source.contracts()).unwrap_or_default()
    }

    fn find(&self, contract: &Address) -> Option<WatchedContract> {
        self.upgrade().and_then(|source| source.find(contract))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the watch-list and one log stream per watched contract.
///
/// Each stream is drained by its own task, which awaits the sink before
/// pulling the next log, so nothing is buffered here.
pub struct Subscriber<A: ?Sized> {
    api: Arc<A>,
    resolve: fn(&B256) -> Option<&'static str>,
    watch_list: Mutex<WatchList>,
    sink: Mutex<Option<Arc<dyn RawEventSink>>>,
    tasks: Mutex<HashMap<Address, JoinHandle<()>>>,
    span: Span,
}

impl<A> Subscriber<A>
where
    A: EvmApi + ?Sized + 'static,
{
    pub fn new(
        api: Arc<A>,
        resolve: fn(&B256) -> Option<&'static str>,
        log: &LogContext,
    ) -> Self {
        Self {
            api,
            resolve,
            watch_list: Mutex::new(WatchList::default()),
            sink: Mutex::new(None),
            tasks: Mutex::new(HashMap::new()),
            span: log.span("subscriber"),
        }
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.sink).is_some()
    }

    pub fn contains(&self, contract: &Address) -> bool {
        lock(&self.watch_list).contains(contract)
    }

    pub fn watched(&self) -> Vec<WatchedContract> {
        lock(&self.watch_list).iter().cloned().collect()
    }

    pub fn watched_addresses(&self) -> Vec<Address> {
        lock(&self.watch_list).iter().map(|e| e.contract).collect()
    }

    pub fn origin_of(&self, contract: &Address) -> Option<String> {
        lock(&self.watch_list)
            .get(contract)
            .and_then(|e| e.origin.clone())
    }

    /// Attaches a live stream for every contract currently watched. Calling
    /// this while already subscribed is a no-op.
    pub async fn subscribe(&self, sink: Arc<dyn RawEventSink>) -> Result<()> {
        {
            let mut current = lock(&self.sink);
            if current.is_some() {
                warn!(parent: &self.span, "Already subscribed, ignoring subscribe call");
                return Ok(());
            }
            *current = Some(sink.clone());
        }

        let watched = self.watched();
        info!(
            parent: &self.span,
            "Subscribing to {} contract(s)",
            watched.len()
        );
        for entry in &watched {
            if let Err(e) = self.attach(entry, sink.clone()).await {
                self.unsubscribe();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drops every stream and forgets the watch-list. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        let tasks: Vec<_> = lock(&self.tasks).drain().collect();
        for (_, handle) in &tasks {
            handle.abort();
        }
        lock(&self.watch_list).clear();
        if lock(&self.sink).take().is_some() {
            info!(
                parent: &self.span,
                "Unsubscribed from {} contract(s)",
                tasks.len()
            );
        }
    }

    /// Adds a contract to the watch-list, attaching a stream right away when
    /// subscribed. Returns `Ok(false)` if the contract was already watched.
    pub async fn add_contract(&self, entry: WatchedContract) -> Result<bool> {
        if !lock(&self.watch_list).insert(entry.clone()) {
            info!(
                parent: &self.span,
                "Contract {} is already being monitored",
                fmt_address(&entry.contract)
            );
            return Ok(false);
        }

        let sink = lock(&self.sink).clone();
        if let Some(sink) = sink {
            if let Err(e) = self.attach(&entry, sink).await {
                lock(&self.watch_list).remove(&entry.contract);
                return Err(e);
            }
        }
        debug!(
            parent: &self.span,
            "Watching contract {}",
            fmt_address(&entry.contract)
        );
        Ok(true)
    }

    pub fn remove_contract(&self, contract: &Address) -> bool {
        if let Some(handle) = lock(&self.tasks).remove(contract) {
            handle.abort();
        }
        lock(&self.watch_list).remove(contract).is_some()
    }

    async fn attach(&self, entry: &WatchedContract, sink: Arc<dyn RawEventSink>) -> Result<()> {
        let mut stream = self.api.subscribe_logs(&[entry.contract]).await?;
        let resolve = self.resolve;
        let origin = entry.origin.clone();
        let contract = entry.contract;
        let span = self.span.clone();

        let handle = tokio::spawn(async move {
            while let Some(log) = stream.next().await {
                if log.removed {
                    debug!(parent: &span, "Skipping removed log from {}", fmt_address(&contract));
                    continue;
                }
                let raw = RawEvent::from_rpc_log(&log, resolve);
                sink.on_event(raw, origin.clone()).await;
            }
            warn!(parent: &span, "Log stream for {} ended", fmt_address(&contract));
        });

        if let Some(previous) = lock(&self.tasks).insert(contract, handle) {
            previous.abort();
        }
        Ok(())
    }
}

impl<A> ContractSource for Subscriber<A>
where
    A: EvmApi + ?Sized + 'static,
{
    fn contracts(&self) -> Vec<WatchedContract> {
        self.watched()
    }

    fn find(&self, contract: &Address) -> Option<WatchedContract> {
        lock(&self.watch_list).get(contract).cloned()
    }
}

impl<A> Subscriber<A>
where
    A: Erc20Api + ?Sized + 'static,
{
    /// Starts monitoring a token, caching its total supply.
    ///
    /// Connection failures are retried up to `max_retries` times, `retry_delay`
    /// apart. When retries run out the token is given up on with an error log;
    /// the watch-list tells callers whether it was added.
    pub async fn add_new_token(
        &self,
        token: Address,
        origin: Option<String>,
        retry_delay: Duration,
        max_retries: u32,
    ) {
        if self.contains(&token) {
            info!(
                parent: &self.span,
                "Token {} is already being monitored",
                fmt_address(&token)
            );
            return;
        }

        let mut attempt = 0;
        loop {
            match self.try_add_token(token, origin.clone()).await {
                Ok(_) => return,
                Err(e) if attempt < max_retries => {
                    attempt += 1;
                    let jitter_ms = rand::rng().random_range(0..=retry_delay.as_millis() as u64 / 10);
                    warn!(
                        parent: &self.span,
                        "Failed to add token {} ({}), retry {}/{}",
                        fmt_address(&token),
                        e,
                        attempt,
                        max_retries
                    );
                    tokio::time::sleep(retry_delay + Duration::from_millis(jitter_ms)).await;
                }
                Err(e) => {
                    error!(
                        parent: &self.span,
                        "Giving up on token {} after {} retries: {}",
                        fmt_address(&token),
                        max_retries,
                        e
                    );
                    return;
                }
            }
        }
    }

    async fn try_add_token(&self, token: Address, origin: Option<String>) -> Result<bool> {
        let total_supply = self.api.total_supply(token).await?;
        self.add_contract(WatchedContract {
            contract: token,
            total_supply: Some(total_supply),
            origin,
        })
        .await
    }
}

impl<A: ?Sized> Drop for Subscriber<A> {
    fn drop(&mut self) {
        for (_, handle) in lock(&self.tasks).drain() {
            handle.abort();
        }
    }
}
