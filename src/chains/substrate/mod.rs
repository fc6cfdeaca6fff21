//! Substrate pallets: balance transfers, democracy and treasury.

pub mod enricher;
pub mod labeler;
pub mod listener;
pub mod processor;
pub mod storage_fetcher;
pub mod subscriber;

use alloy::hex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subxt::utils::AccountId32;
use tracing::info;

use super::BlockScoped;
use crate::error::{ChainEventsError, Result};

pub use listener::SubstrateListener;
pub use processor::SubstrateProcessor;
pub use storage_fetcher::SubstrateStorageFetcher;
pub use subscriber::BlockPoller;

/// One event from a block's `System.Events`, with its fields flattened into
/// positional JSON values.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstrateEvent {
    /// Pallet name, e.g. `Balances`.
    pub section: String,
    /// Variant name, e.g. `Transfer`.
    pub method: String,
    pub block_number: u64,
    pub args: Vec<Value>,
}

impl SubstrateEvent {
    pub fn new(
        section: impl Into<String>,
        method: impl Into<String>,
        block_number: u64,
        args: Vec<Value>,
    ) -> Self {
        Self {
            section: section.into(),
            method: method.into(),
            block_number,
            args,
        }
    }

    pub fn name(&self) -> String {
        format!("{}.{}", self.section, self.method)
    }

    pub(crate) fn arg(&self, position: usize) -> Result<&Value> {
        self.args
            .get(position)
            .ok_or_else(|| ChainEventsError::decode(&self.name(), format!("missing argument {position}")))
    }

    pub(crate) fn index_arg(&self, position: usize) -> Result<u32> {
        as_index(self.arg(position)?)
            .ok_or_else(|| ChainEventsError::decode(&self.name(), format!("argument {position} is not an index")))
    }

    pub(crate) fn amount_arg(&self, position: usize) -> Result<u128> {
        as_amount(self.arg(position)?)
            .ok_or_else(|| ChainEventsError::decode(&self.name(), format!("argument {position} is not a balance")))
    }

    pub(crate) fn account_arg(&self, position: usize) -> Result<String> {
        account(self.arg(position)?)
            .ok_or_else(|| ChainEventsError::decode(&self.name(), format!("argument {position} is not an account")))
    }
}

impl BlockScoped for SubstrateEvent {
    fn block_number(&self) -> u64 {
        self.block_number
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    BalanceTransfer,
    DemocracyProposed,
    DemocracySeconded,
    DemocracyTabled,
    DemocracyStarted,
    DemocracyPassed,
    DemocracyNotPassed,
    DemocracyCancelled,
    DemocracyExecuted,
    TreasuryProposed,
    TreasuryAwarded,
    TreasuryRejected,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::BalanceTransfer,
        EventKind::DemocracyProposed,
        EventKind::DemocracySeconded,
        EventKind::DemocracyTabled,
        EventKind::DemocracyStarted,
        EventKind::DemocracyPassed,
        EventKind::DemocracyNotPassed,
        EventKind::DemocracyCancelled,
        EventKind::DemocracyExecuted,
        EventKind::TreasuryProposed,
        EventKind::TreasuryAwarded,
        EventKind::TreasuryRejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BalanceTransfer => "balance-transfer",
            EventKind::DemocracyProposed => "democracy-proposed",
            EventKind::DemocracySeconded => "democracy-seconded",
            EventKind::DemocracyTabled => "democracy-tabled",
            EventKind::DemocracyStarted => "democracy-started",
            EventKind::DemocracyPassed => "democracy-passed",
            EventKind::DemocracyNotPassed => "democracy-not-passed",
            EventKind::DemocracyCancelled => "democracy-cancelled",
            EventKind::DemocracyExecuted => "democracy-executed",
            EventKind::TreasuryProposed => "treasury-proposed",
            EventKind::TreasuryAwarded => "treasury-awarded",
            EventKind::TreasuryRejected => "treasury-rejected",
        }
    }

    /// Pallet and variant name the runtime emits this kind under.
    pub fn native_name(&self) -> (&'static str, &'static str) {
        match self {
            EventKind::BalanceTransfer => ("Balances", "Transfer"),
            EventKind::DemocracyProposed => ("Democracy", "Proposed"),
            EventKind::DemocracySeconded => ("Democracy", "Seconded"),
            EventKind::DemocracyTabled => ("Democracy", "Tabled"),
            EventKind::DemocracyStarted => ("Democracy", "Started"),
            EventKind::DemocracyPassed => ("Democracy", "Passed"),
            EventKind::DemocracyNotPassed => ("Democracy", "NotPassed"),
            EventKind::DemocracyCancelled => ("Democracy", "Cancelled"),
            EventKind::DemocracyExecuted => ("Democracy", "Executed"),
            EventKind::TreasuryProposed => ("Treasury", "Proposed"),
            EventKind::TreasuryAwarded => ("Treasury", "Awarded"),
            EventKind::TreasuryRejected => ("Treasury", "Rejected"),
        }
    }
}

/// Balances are decimal strings; indices and block numbers are numbers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum EventData {
    BalanceTransfer {
        sender: String,
        dest: String,
        value: String,
    },
    DemocracyProposed {
        proposal_index: u32,
        proposal_hash: String,
        deposit: String,
        proposer: String,
    },
    DemocracySeconded {
        proposal_index: u32,
        who: String,
    },
    DemocracyTabled {
        proposal_index: u32,
    },
    DemocracyStarted {
        referendum_index: u32,
        proposal_hash: String,
        vote_threshold: String,
        end_block: u64,
    },
    DemocracyPassed {
        referendum_index: u32,
        dispatch_block: Option<u64>,
    },
    DemocracyNotPassed {
        referendum_index: u32,
    },
    DemocracyCancelled {
        referendum_index: u32,
    },
    DemocracyExecuted {
        referendum_index: u32,
        execution_ok: bool,
    },
    TreasuryProposed {
        proposal_index: u32,
        proposer: String,
        value: String,
        beneficiary: String,
        bond: String,
    },
    TreasuryAwarded {
        proposal_index: u32,
        value: String,
        beneficiary: String,
    },
    TreasuryRejected {
        proposal_index: u32,
    },
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::BalanceTransfer { .. } => EventKind::BalanceTransfer,
            EventData::DemocracyProposed { .. } => EventKind::DemocracyProposed,
            EventData::DemocracySeconded { .. } => EventKind::DemocracySeconded,
            EventData::DemocracyTabled { .. } => EventKind::DemocracyTabled,
            EventData::DemocracyStarted { .. } => EventKind::DemocracyStarted,
            EventData::DemocracyPassed { .. } => EventKind::DemocracyPassed,
            EventData::DemocracyNotPassed { .. } => EventKind::DemocracyNotPassed,
            EventData::DemocracyCancelled { .. } => EventKind::DemocracyCancelled,
            EventData::DemocracyExecuted { .. } => EventKind::DemocracyExecuted,
            EventData::TreasuryProposed { .. } => EventKind::TreasuryProposed,
            EventData::TreasuryAwarded { .. } => EventKind::TreasuryAwarded,
            EventData::TreasuryRejected { .. } => EventKind::TreasuryRejected,
        }
    }
}

/// Maps a pallet event to its kind. Unknown names are logged and dropped.
pub fn parse_type(section: &str, method: &str) -> Option<EventKind> {
    let kind = EventKind::ALL
        .into_iter()
        .find(|kind| kind.native_name() == (section, method));
    if kind.is_none() {
        info!(network = "substrate", "Unknown event name: {}.{}", section, method);
    }
    kind
}

pub(crate) fn as_index(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Balances above `u64::MAX` arrive as decimal strings.
pub(crate) fn as_amount(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Renders a 32-byte account id in SS58. Strings that are not hex are taken
/// to be SS58 already.
pub(crate) fn account(value: &Value) -> Option<String> {
    let text = value.as_str()?;
    let Some(digits) = text.strip_prefix("0x") else {
        return Some(text.to_string());
    };
    let bytes: [u8; 32] = hex::decode(digits).ok()?.try_into().ok()?;
    Some(AccountId32(bytes).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_kind_parses_from_its_native_name() {
        for kind in EventKind::ALL {
            let (section, method) = kind.native_name();
            assert_eq!(parse_type(section, method), Some(kind));
        }
    }

    #[test]
    fn unknown_and_miscased_names_are_dropped() {
        assert_eq!(parse_type("System", "ExtrinsicSuccess"), None);
        assert_eq!(parse_type("balances", "transfer"), None);
        assert_eq!(parse_type("Treasury", "Transfer"), None);
    }

    #[test]
    fn accounts_render_as_ss58() {
        let alice = "0xd43593c715fdd31c61141abd04a99fd6822c8558854ccde39a5684e7a56da27d";
        assert_eq!(
            account(&json!(alice)).as_deref(),
            Some("5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY")
        );
        assert_eq!(account(&json!("5Grw")).as_deref(), Some("5Grw"));
        assert_eq!(account(&json!("0x1234")), None);
        assert_eq!(account(&json!(7)), None);
    }

    #[test]
    fn amounts_accept_numbers_and_decimal_strings() {
        assert_eq!(as_amount(&json!(42)), Some(42));
        assert_eq!(
            as_amount(&json!("340282366920938463463374607431768211455")),
            Some(u128::MAX)
        );
        assert_eq!(as_amount(&json!(-1)), None);
        assert_eq!(as_index(&json!(4_294_967_296u64)), None);
    }

    #[test]
    fn missing_arguments_are_decode_errors() {
        let raw = SubstrateEvent::new("Treasury", "Rejected", 3, vec![]);
        assert!(matches!(raw.index_arg(0), Err(ChainEventsError::Decode { .. })));
    }
}
