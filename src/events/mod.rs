//! Chain-agnostic event envelope shared by every chain-base.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chains::{commonwealth, erc20, substrate};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SupportedNetwork {
    Erc20,
    Commonwealth,
    Substrate,
}

impl SupportedNetwork {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportedNetwork::Erc20 => "erc20",
            SupportedNetwork::Commonwealth => "commonwealth",
            SupportedNetwork::Substrate => "substrate",
        }
    }
}

impl fmt::Display for SupportedNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every event kind the pipeline understands, across chain-bases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum EventKind {
    Erc20(erc20::EventKind),
    Commonwealth(commonwealth::EventKind),
    Substrate(substrate::EventKind),
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Erc20(kind) => kind.as_str(),
            EventKind::Commonwealth(kind) => kind.as_str(),
            EventKind::Substrate(kind) => kind.as_str(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<erc20::EventKind> for EventKind {
    fn from(kind: erc20::EventKind) -> Self {
        EventKind::Erc20(kind)
    }
}

impl From<commonwealth::EventKind> for EventKind {
    fn from(kind: commonwealth::EventKind) -> Self {
        EventKind::Commonwealth(kind)
    }
}

impl From<substrate::EventKind> for EventKind {
    fn from(kind: substrate::EventKind) -> Self {
        EventKind::Substrate(kind)
    }
}

/// Kind-tagged payload. Serializes as `{ "kind": "...", ...fields }` with
/// addresses and amounts as strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EventData {
    Erc20(erc20::EventData),
    Commonwealth(commonwealth::EventData),
    Substrate(substrate::EventData),
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::Erc20(data) => data.kind().into(),
            EventData::Commonwealth(data) => data.kind().into(),
            EventData::Substrate(data) => data.kind().into(),
        }
    }
}

impl From<erc20::EventData> for EventData {
    fn from(data: erc20::EventData) -> Self {
        EventData::Erc20(data)
    }
}

impl From<commonwealth::EventData> for EventData {
    fn from(data: commonwealth::EventData) -> Self {
        EventData::Commonwealth(data)
    }
}

impl From<substrate::EventData> for EventData {
    fn from(data: substrate::EventData) -> Self {
        EventData::Substrate(data)
    }
}

/// A normalized chain event. Built once by an enricher and never mutated
/// afterwards, apart from the origin label attached by the processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CWEvent {
    pub block_number: u64,
    pub network: SupportedNetwork,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    /// Parties to the event, who should not be notified of their own action.
    #[serde(default)]
    pub exclude_addresses: BTreeSet<String>,
    pub data: EventData,
}

impl CWEvent {
    pub fn new(
        block_number: u64,
        network: SupportedNetwork,
        data: impl Into<EventData>,
        exclude_addresses: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            block_number,
            network,
            chain: None,
            exclude_addresses: exclude_addresses.into_iter().collect(),
            data: data.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }

    pub(crate) fn with_origin(mut self, origin: Option<&str>) -> Self {
        if let Some(origin) = origin {
            self.chain = Some(origin.to_string());
        }
        self
    }
}

/// Human readable rendering of an event, used for notifications.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventLabel {
    pub heading: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_url: Option<String>,
}

/// Labels any event, dispatching on its chain-base.
pub fn label(event: &CWEvent) -> EventLabel {
    let chain_id = event.chain.as_deref().unwrap_or(event.network.as_str());
    match &event.data {
        EventData::Erc20(data) => erc20::labeler::label(event.block_number, chain_id, data),
        EventData::Commonwealth(data) => {
            commonwealth::labeler::label(event.block_number, chain_id, data)
        }
        EventData::Substrate(data) => substrate::labeler::label(event.block_number, chain_id, data),
    }
}

/// Long-lived on-chain objects that events refer to.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Project,
    DemocracyProposal,
    DemocracyReferendum,
    TreasuryProposal,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::DemocracyProposal => "democracy-proposal",
            EntityKind::DemocracyReferendum => "democracy-referendum",
            EntityKind::TreasuryProposal => "treasury-proposal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityEventKind {
    Create,
    Update,
    Vote,
    Complete,
}

/// Maps an event kind to the entity it touches, if any.
pub fn event_to_entity(kind: EventKind) -> Option<(EntityKind, EntityEventKind)> {
    match kind {
        EventKind::Erc20(_) => None,
        EventKind::Commonwealth(kind) => {
            use commonwealth::EventKind as Cw;
            let step = match kind {
                Cw::ProjectCreated => EntityEventKind::Create,
                Cw::ProjectBacked | Cw::ProjectCurated | Cw::ProjectWithdraw => {
                    EntityEventKind::Update
                }
                Cw::ProjectSucceeded | Cw::ProjectFailed => EntityEventKind::Complete,
            };
            Some((EntityKind::Project, step))
        }
        EventKind::Substrate(kind) => {
            use substrate::EventKind as Sub;
            use EntityEventKind::{Complete, Create, Update};
            match kind {
                Sub::BalanceTransfer => None,
                Sub::DemocracyProposed => Some((EntityKind::DemocracyProposal, Create)),
                Sub::DemocracySeconded => Some((EntityKind::DemocracyProposal, Update)),
                Sub::DemocracyTabled => Some((EntityKind::DemocracyProposal, Complete)),
                Sub::DemocracyStarted => Some((EntityKind::DemocracyReferendum, Create)),
                Sub::DemocracyPassed => Some((EntityKind::DemocracyReferendum, Update)),
                Sub::DemocracyNotPassed | Sub::DemocracyCancelled | Sub::DemocracyExecuted => {
                    Some((EntityKind::DemocracyReferendum, Complete))
                }
                Sub::TreasuryProposed => Some((EntityKind::TreasuryProposal, Create)),
                Sub::TreasuryAwarded | Sub::TreasuryRejected => {
                    Some((EntityKind::TreasuryProposal, Complete))
                }
            }
        }
    }
}

pub fn is_entity_completed(events: &[CWEvent]) -> bool {
    events.iter().any(|event| {
        matches!(
            event_to_entity(event.kind()),
            Some((_, EntityEventKind::Complete))
        )
    })
}
