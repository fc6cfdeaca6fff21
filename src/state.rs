use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::events::EventKind;

/// Running counters for one listener's pipeline.
#[derive(Debug)]
pub struct PipelineState {
    pub last_block: AtomicU64,
    pub last_event_time: Mutex<Option<Instant>>,
    pub raw_events: AtomicU64,
    pub dispatched: AtomicU64,
    pub dropped: AtomicU64,
    pub stale: AtomicU64,
    pub handler_failures: AtomicU64,
    pub kind_counts: Mutex<HashMap<EventKind, u64>>,
}

/// Point-in-time copy of [`PipelineState`] for status logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    pub last_block: u64,
    pub raw_events: u64,
    pub dispatched: u64,
    pub dropped: u64,
    pub stale: u64,
    pub handler_failures: u64,
    pub seconds_since_last_event: Option<u64>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            last_block: AtomicU64::new(0),
            last_event_time: Mutex::new(None),
            raw_events: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            kind_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_raw(&self, block: u64) {
        self.raw_events.fetch_add(1, Ordering::Relaxed);
        self.last_block.fetch_max(block, Ordering::Relaxed);
        if let Ok(mut time) = self.last_event_time.lock() {
            *time = Some(Instant::now());
        }
    }

    /// A raw event that produced no normalized event (unknown, filtered or failed).
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self, count: u64) {
        self.stale.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self, kind: EventKind) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut counts) = self.kind_counts.lock() {
            *counts.entry(kind).or_insert(0) += 1;
        }
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn kind_count(&self, kind: EventKind) -> u64 {
        self.kind_counts
            .lock()
            .map(|counts| counts.get(&kind).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let seconds_since_last_event = self
            .last_event_time
            .lock()
            .ok()
            .and_then(|time| time.map(|t| t.elapsed().as_secs()));
        StateSnapshot {
            last_block: self.last_block.load(Ordering::Relaxed),
            raw_events: self.raw_events.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            seconds_since_last_event,
        }
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
