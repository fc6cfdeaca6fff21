//! Commonwealth crowdfunding: a project factory and the projects it deploys.

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

pub use listener::CommonwealthListener;
pub use processor::CommonwealthProcessor;
pub use storage_fetcher::CommonwealthStorageFetcher;

sol! {
    #[derive(Debug)]
    event ProjectCreated(uint256 index, address project);

    #[derive(Debug)]
    event Back(address indexed sender, address indexed token, uint256 amount);

    #[derive(Debug)]
    event Curate(address indexed sender, address indexed token, uint256 amount);

    #[derive(Debug)]
    event Succeeded(uint256 timestamp, uint256 amount);

    #[derive(Debug)]
    event Failed();

    #[derive(Debug)]
    event Withdraw(address indexed sender, address indexed token, uint256 amount, bytes32 withdrawalType);
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    ProjectCreated,
    ProjectBacked,
    ProjectCurated,
    ProjectSucceeded,
    ProjectFailed,
    ProjectWithdraw,
}

impl EventKind {
    /// Kinds emitted by project contracts, as opposed to the factory.
    pub const PROJECT: [EventKind; 5] = [
        EventKind::ProjectBacked,
        EventKind::ProjectCurated,
        EventKind::ProjectSucceeded,
        EventKind::ProjectFailed,
        EventKind::ProjectWithdraw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProjectCreated => "project-created",
            EventKind::ProjectBacked => "project-backed",
            EventKind::ProjectCurated => "project-curated",
            EventKind::ProjectSucceeded => "project-succeeded",
            EventKind::ProjectFailed => "project-failed",
            EventKind::ProjectWithdraw => "project-withdraw",
        }
    }

    pub fn signature_hash(&self) -> B256 {
        match self {
            EventKind::ProjectCreated => ProjectCreated::SIGNATURE_HASH,
            EventKind::ProjectBacked => Back::SIGNATURE_HASH,
            EventKind::ProjectCurated => Curate::SIGNATURE_HASH,
            EventKind::ProjectSucceeded => Succeeded::SIGNATURE_HASH,
            EventKind::ProjectFailed => Failed::SIGNATURE_HASH,
            EventKind::ProjectWithdraw => Withdraw::SIGNATURE_HASH,
        }
    }

    /// Whether this kind ends a project's lifecycle.
    pub fn is_completion(&self) -> bool {
        matches!(self, EventKind::ProjectSucceeded | EventKind::ProjectFailed)
    }
}

/// `id` is always the project contract address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum EventData {
    ProjectCreated {
        id: String,
        index: String,
        name: String,
        beneficiary: String,
        threshold: String,
        deadline: u64,
    },
    ProjectBacked {
        id: String,
        sender: String,
        token: String,
        amount: String,
        total_funding: String,
    },
    ProjectCurated {
        id: String,
        sender: String,
        token: String,
        amount: String,
        total_funding: String,
    },
    ProjectSucceeded {
        id: String,
        timestamp: String,
        amount: String,
    },
    ProjectFailed {
        id: String,
    },
    ProjectWithdraw {
        id: String,
        sender: String,
        token: String,
        amount: String,
        withdrawal_type: String,
    },
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::ProjectCreated { .. } => EventKind::ProjectCreated,
            EventData::ProjectBacked { .. } => EventKind::ProjectBacked,
            EventData::ProjectCurated { .. } => EventKind::ProjectCurated,
            EventData::ProjectSucceeded { .. } => EventKind::ProjectSucceeded,
            EventData::ProjectFailed { .. } => EventKind::ProjectFailed,
            EventData::ProjectWithdraw { .. } => EventKind::ProjectWithdraw,
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            EventData::ProjectCreated { id, .. }
            | EventData::ProjectBacked { id, .. }
            | EventData::ProjectCurated { id, .. }
            | EventData::ProjectSucceeded { id, .. }
            | EventData::ProjectFailed { id }
            | EventData::ProjectWithdraw { id, .. } => id,
        }
    }
}

/// Resolves the native event name of a factory or project log from its topic0.
pub fn event_name(topic0: &B256) -> Option<&'static str> {
    match *topic0 {
        t if t == ProjectCreated::SIGNATURE_HASH => Some("ProjectCreated"),
        t if t == Back::SIGNATURE_HASH => Some("Back"),
        t if t == Curate::SIGNATURE_HASH => Some("Curate"),
        t if t == Succeeded::SIGNATURE_HASH => Some("Succeeded"),
        t if t == Failed::SIGNATURE_HASH => Some("Failed"),
        t if t == Withdraw::SIGNATURE_HASH => Some("Withdraw"),
        _ => None,
    }
}

pub fn parse_type(name: &str) -> Option<EventKind> {
    match name {
        "ProjectCreated" => Some(EventKind::ProjectCreated),
        "Back" => Some(EventKind::ProjectBacked),
        "Curate" => Some(EventKind::ProjectCurated),
        "Succeeded" => Some(EventKind::ProjectSucceeded),
        "Failed" => Some(EventKind::ProjectFailed),
        "Withdraw" => Some(EventKind::ProjectWithdraw),
        _ => {
            info!(network = "commonwealth", "Unknown event name: {}", name);
            None
        }
    }
}
