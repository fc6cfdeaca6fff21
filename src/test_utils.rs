//! In-memory chain API and log builders shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use eyre::eyre;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::chains::substrate::SubstrateEvent;
use crate::chains::RawEvent;
use crate::error::{ChainEventsError, Result};
use crate::events::{CWEvent, EventKind};
use crate::listener::EventHandler;
use crate::provider::{
    Erc20Api, EvmApi, LogQuery, LogStream, ProjectApi, ProjectMetadata, PublicProposal,
    ReferendumStatus, SubstrateApi, TreasuryProposal,
};

pub struct MockEvmApi {
    head: Mutex<Option<u64>>,
    logs: Mutex<Vec<Log>>,
    supplies: Mutex<HashMap<Address, U256>>,
    projects: Mutex<HashMap<Address, ProjectMetadata>>,
    funding: Mutex<HashMap<Address, U256>>,
    live: Mutex<Vec<(Vec<Address>, UnboundedSender<Log>)>>,
    pub queries: Mutex<Vec<LogQuery>>,
    pub supply_calls: AtomicU32,
    /// Number of upcoming chain reads that fail before reads succeed again.
    pub failing_reads: AtomicU32,
    pub connected: AtomicBool,
}

impl MockEvmApi {
    pub fn new() -> Self {
        Self {
            head: Mutex::new(Some(1_000)),
            logs: Mutex::new(Vec::new()),
            supplies: Mutex::new(HashMap::new()),
            projects: Mutex::new(HashMap::new()),
            funding: Mutex::new(HashMap::new()),
            live: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            supply_calls: AtomicU32::new(0),
            failing_reads: AtomicU32::new(0),
            connected: AtomicBool::new(true),
        }
    }

    pub fn set_head(&self, head: Option<u64>) {
        *self.head.lock().unwrap() = head;
    }

    pub fn set_supply(&self, token: Address, supply: u64) {
        self.supplies.lock().unwrap().insert(token, U256::from(supply));
    }

    pub fn set_project(&self, project: Address, metadata: ProjectMetadata, funding: u64) {
        self.projects.lock().unwrap().insert(project, metadata);
        self.funding.lock().unwrap().insert(project, U256::from(funding));
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    pub fn push_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    /// Delivers a log to every live subscription watching its emitter.
    pub fn emit(&self, log: Log) {
        let live = self.live.lock().unwrap();
        for (addresses, tx) in live.iter() {
            if addresses.contains(&log.address()) {
                let _ = tx.send(log.clone());
            }
        }
    }

    pub fn live_subscriptions(&self) -> usize {
        self.live
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }

    fn check_read(&self) -> Result<()> {
        let failing = self.failing_reads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_reads.store(failing - 1, Ordering::SeqCst);
            return Err(ChainEventsError::Rpc("execution reverted".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl EvmApi for MockEvmApi {
    async fn block_number(&self) -> Result<u64> {
        (*self.head.lock().unwrap()).ok_or_else(|| ChainEventsError::Rpc("no head".into()))
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<Log>> {
        self.queries.lock().unwrap().push(query.clone());
        let logs = self.logs.lock().unwrap();
        Ok(logs
            .iter()
            .filter(|log| query.addresses.is_empty() || query.addresses.contains(&log.address()))
            .filter(|log| match query.topic0 {
                Some(topic) => log.topics().first() == Some(&topic),
                None => true,
            })
            .filter(|log| {
                let block = log.block_number.unwrap_or_default();
                block >= query.from_block && block <= query.to_block
            })
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self, addresses: &[Address]) -> Result<LogStream> {
        self.check_read()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.live.lock().unwrap().push((addresses.to_vec(), tx));
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|log| (log, rx))
        });
        Ok(stream.boxed())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Erc20Api for MockEvmApi {
    async fn total_supply(&self, token: Address) -> Result<U256> {
        self.supply_calls.fetch_add(1, Ordering::SeqCst);
        self.check_read()?;
        self.supplies
            .lock()
            .unwrap()
            .get(&token)
            .copied()
            .ok_or_else(|| ChainEventsError::Rpc(format!("no token at {token}")))
    }
}

#[async_trait]
impl ProjectApi for MockEvmApi {
    async fn project_metadata(&self, project: Address) -> Result<ProjectMetadata> {
        self.check_read()?;
        self.projects
            .lock()
            .unwrap()
            .get(&project)
            .cloned()
            .ok_or_else(|| ChainEventsError::Rpc(format!("no project at {project}")))
    }

    async fn total_funding(&self, project: Address) -> Result<U256> {
        self.check_read()?;
        Ok(self
            .funding
            .lock()
            .unwrap()
            .get(&project)
            .copied()
            .unwrap_or_default())
    }
}

/// Well-known dev accounts as (hex public key, SS58).
pub const ALICE: (&str, &str) = (
    "0xd43593c715fdd31c61141abd04a99fd6822c8558854ccde39a5684e7a56da27d",
    "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY",
);
pub const BOB: (&str, &str) = (
    "0x8eaf04151687736326c9fea17e25fc5287613693c912909cb226aa4794f26a48",
    "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty",
);

/// Substrate node whose storage ignores the block it is read at.
pub struct MockSubstrateApi {
    head: Mutex<Option<u64>>,
    blocks: Mutex<HashMap<u64, Vec<SubstrateEvent>>>,
    issuance: Mutex<u128>,
    issuance_calls: AtomicU32,
    proposals: Mutex<Vec<PublicProposal>>,
    deposits: Mutex<HashMap<u32, u128>>,
    referenda: Mutex<BTreeMap<u32, ReferendumStatus>>,
    treasury: Mutex<BTreeMap<u32, TreasuryProposal>>,
    pub event_reads: Mutex<Vec<u64>>,
    pub failing_reads: AtomicU32,
    pub connected: AtomicBool,
}

impl MockSubstrateApi {
    pub fn new() -> Self {
        Self {
            head: Mutex::new(Some(1_000)),
            blocks: Mutex::new(HashMap::new()),
            issuance: Mutex::new(1_000_000_000),
            issuance_calls: AtomicU32::new(0),
            proposals: Mutex::new(Vec::new()),
            deposits: Mutex::new(HashMap::new()),
            referenda: Mutex::new(BTreeMap::new()),
            treasury: Mutex::new(BTreeMap::new()),
            event_reads: Mutex::new(Vec::new()),
            failing_reads: AtomicU32::new(0),
            connected: AtomicBool::new(true),
        }
    }

    pub fn set_head(&self, head: Option<u64>) {
        *self.head.lock().unwrap() = head;
    }

    pub fn head(&self) -> Option<u64> {
        *self.head.lock().unwrap()
    }

    pub fn push_event(&self, event: SubstrateEvent) {
        self.blocks
            .lock()
            .unwrap()
            .entry(event.block_number)
            .or_default()
            .push(event);
    }

    pub fn set_issuance(&self, issuance: u128) {
        *self.issuance.lock().unwrap() = issuance;
    }

    pub fn issuance_calls(&self) -> u32 {
        self.issuance_calls.load(Ordering::SeqCst)
    }

    pub fn add_public_proposal(&self, proposal: PublicProposal) {
        self.proposals.lock().unwrap().push(proposal);
    }

    pub fn set_deposit(&self, index: u32, deposit: u128) {
        self.deposits.lock().unwrap().insert(index, deposit);
    }

    pub fn set_referendum(&self, index: u32, status: ReferendumStatus) {
        self.referenda.lock().unwrap().insert(index, status);
    }

    pub fn set_treasury_proposal(&self, index: u32, proposal: TreasuryProposal) {
        self.treasury.lock().unwrap().insert(index, proposal);
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<()> {
        let failing = self.failing_reads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_reads.store(failing - 1, Ordering::SeqCst);
            return Err(ChainEventsError::Rpc("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SubstrateApi for MockSubstrateApi {
    async fn block_number(&self) -> Result<u64> {
        self.check_read()?;
        self.head().ok_or_else(|| ChainEventsError::Rpc("no head".into()))
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn events_at(&self, block_number: u64) -> Result<Vec<SubstrateEvent>> {
        self.check_read()?;
        self.event_reads.lock().unwrap().push(block_number);
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .get(&block_number)
            .cloned()
            .unwrap_or_default())
    }

    async fn total_issuance(&self, _at: u64) -> Result<u128> {
        self.issuance_calls.fetch_add(1, Ordering::SeqCst);
        self.check_read()?;
        Ok(*self.issuance.lock().unwrap())
    }

    async fn public_proposals(&self, _at: u64) -> Result<Vec<PublicProposal>> {
        self.check_read()?;
        Ok(self.proposals.lock().unwrap().clone())
    }

    async fn deposit_of(&self, index: u32, _at: u64) -> Result<Option<u128>> {
        self.check_read()?;
        Ok(self.deposits.lock().unwrap().get(&index).copied())
    }

    async fn referendum_range(&self, _at: u64) -> Result<Range<u32>> {
        self.check_read()?;
        let referenda = self.referenda.lock().unwrap();
        let start = referenda.keys().next().copied().unwrap_or(0);
        let end = referenda.keys().next_back().map_or(0, |last| last + 1);
        Ok(start..end)
    }

    async fn referendum_info(&self, index: u32, _at: u64) -> Result<Option<ReferendumStatus>> {
        self.check_read()?;
        Ok(self.referenda.lock().unwrap().get(&index).cloned())
    }

    async fn treasury_proposal_count(&self, _at: u64) -> Result<u32> {
        self.check_read()?;
        Ok(self
            .treasury
            .lock()
            .unwrap()
            .keys()
            .next_back()
            .map_or(0, |last| last + 1))
    }

    async fn treasury_proposal(&self, index: u32, _at: u64) -> Result<Option<TreasuryProposal>> {
        self.check_read()?;
        Ok(self.treasury.lock().unwrap().get(&index).cloned())
    }
}

pub fn rpc_log<E: SolEvent>(address: Address, block_number: u64, event: &E) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address,
            data: event.encode_log_data(),
        },
        block_number: Some(block_number),
        ..Default::default()
    }
}

pub fn raw_event<E: SolEvent>(name: &str, address: Address, block_number: u64, event: &E) -> RawEvent {
    let log = rpc_log(address, block_number, event);
    RawEvent::new(name, block_number, log.inner)
}

/// Handler that records what it saw, optionally failing on every call or
/// only on events from one block.
pub struct RecordingHandler {
    pub name: &'static str,
    pub seen: Arc<Mutex<Vec<(&'static str, u64)>>>,
    pub fail: bool,
    pub fail_at: Option<u64>,
    pub excluded: Vec<EventKind>,
}

impl RecordingHandler {
    pub fn new(name: &'static str, seen: Arc<Mutex<Vec<(&'static str, u64)>>>) -> Self {
        Self {
            name,
            seen,
            fail: false,
            fail_at: None,
            excluded: Vec::new(),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn failing_at(mut self, block: u64) -> Self {
        self.fail_at = Some(block);
        self
    }

    pub fn excluding(mut self, kinds: Vec<EventKind>) -> Self {
        self.excluded = kinds;
        self
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &CWEvent, previous: Option<Value>) -> eyre::Result<Option<Value>> {
        self.seen.lock().unwrap().push((self.name, event.block_number));
        if self.fail || self.fail_at == Some(event.block_number) {
            return Err(eyre!("{} failed", self.name));
        }
        Ok(previous)
    }

    fn excluded_events(&self) -> &[EventKind] {
        &self.excluded
    }
}
