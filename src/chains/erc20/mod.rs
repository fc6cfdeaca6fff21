//! ERC20 token transfers and approvals.

pub mod enricher;
pub mod labeler;
pub mod listener;
pub mod processor;
pub mod storage_fetcher;

use alloy::primitives::B256;
use alloy::sol;
use alloy::sol_types::SolEvent;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use listener::Erc20Listener;
pub use processor::Erc20Processor;
pub use storage_fetcher::Erc20StorageFetcher;

sol! {
    #[derive(Debug)]
    event Transfer(address indexed from, address indexed to, uint256 value);

    #[derive(Debug)]
    event Approval(address indexed owner, address indexed spender, uint256 value);
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Approval,
    Transfer,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::Approval, EventKind::Transfer];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Approval => "approval",
            EventKind::Transfer => "transfer",
        }
    }

    pub fn signature_hash(&self) -> B256 {
        match self {
            EventKind::Approval => Approval::SIGNATURE_HASH,
            EventKind::Transfer => Transfer::SIGNATURE_HASH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventData {
    Approval {
        owner: String,
        spender: String,
        value: String,
    },
    Transfer {
        from: String,
        to: String,
        value: String,
    },
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::Approval { .. } => EventKind::Approval,
            EventData::Transfer { .. } => EventKind::Transfer,
        }
    }
}

/// Resolves the native event name of an ERC20 log from its topic0.
pub fn event_name(topic0: &B256) -> Option<&'static str> {
    if *topic0 == Transfer::SIGNATURE_HASH {
        Some("Transfer")
    } else if *topic0 == Approval::SIGNATURE_HASH {
        Some("Approval")
    } else {
        None
    }
}

/// Maps a native event name to its kind. Unknown names are not an error:
/// they are logged and the event is skipped.
pub fn parse_type(name: &str) -> Option<EventKind> {
    match name {
        "Approval" => Some(EventKind::Approval),
        "Transfer" => Some(EventKind::Transfer),
        _ => {
            info!(network = "erc20", "Unknown event name: {}", name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_names() {
        assert_eq!(parse_type("Transfer"), Some(EventKind::Transfer));
        assert_eq!(parse_type("Approval"), Some(EventKind::Approval));
    }

    #[test]
    fn unknown_name_is_dropped() {
        assert_eq!(parse_type("FooBar"), None);
        assert_eq!(parse_type("transfer"), None);
    }

    #[test]
    fn signatures_resolve_back_to_names() {
        for kind in EventKind::ALL {
            let name = event_name(&kind.signature_hash()).unwrap();
            assert_eq!(parse_type(name), Some(kind));
        }
        assert_eq!(event_name(&B256::ZERO), None);
    }
}
