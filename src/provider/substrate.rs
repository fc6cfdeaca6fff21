//! Substrate chain API over subxt's dynamic interface. Events and storage
//! are decoded against runtime metadata and normalized to JSON, so no
//! per-runtime codegen is needed.

use std::ops::Range;

use alloy::hex;
use async_trait::async_trait;
use serde_json::{json, Map, Value as Json};
use subxt::backend::legacy::rpc_methods::NumberOrHex;
use subxt::backend::legacy::LegacyRpcMethods;
use subxt::backend::rpc::RpcClient;
use subxt::dynamic::Value as Key;
use subxt::ext::scale_value::{Composite, Primitive, Value, ValueDef};
use subxt::utils::H256;
use subxt::{OnlineClient, PolkadotConfig};
use url::Url;

use crate::chains::substrate::{account, as_amount, as_index, SubstrateEvent};
use crate::error::{ChainEventsError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicProposal {
    pub index: u32,
    pub proposal_hash: String,
    pub proposer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferendumStatus {
    Ongoing {
        end: u64,
        proposal_hash: String,
        threshold: String,
        /// Blocks between passing and enactment.
        delay: u64,
    },
    Finished {
        approved: bool,
        end: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreasuryProposal {
    pub proposer: String,
    pub value: u128,
    pub beneficiary: String,
    pub bond: u128,
}

/// Every read is pinned to a block number.
#[async_trait]
pub trait SubstrateApi: Send + Sync {
    async fn block_number(&self) -> Result<u64>;
    async fn is_connected(&self) -> bool;
    async fn events_at(&self, block_number: u64) -> Result<Vec<SubstrateEvent>>;
    async fn total_issuance(&self, at: u64) -> Result<u128>;
    async fn public_proposals(&self, at: u64) -> Result<Vec<PublicProposal>>;
    async fn deposit_of(&self, index: u32, at: u64) -> Result<Option<u128>>;
    /// Referendum indices that may still hold an info entry.
    async fn referendum_range(&self, at: u64) -> Result<Range<u32>>;
    async fn referendum_info(&self, index: u32, at: u64) -> Result<Option<ReferendumStatus>>;
    async fn treasury_proposal_count(&self, at: u64) -> Result<u32>;
    async fn treasury_proposal(&self, index: u32, at: u64) -> Result<Option<TreasuryProposal>>;
}

pub struct SubstrateClient {
    client: OnlineClient<PolkadotConfig>,
    rpc: LegacyRpcMethods<PolkadotConfig>,
    url: String,
}

impl SubstrateClient {
    pub async fn connect(rpc_url: &str) -> Result<Self> {
        Url::parse(rpc_url)?;
        let connection_error = |e: subxt::Error| ChainEventsError::Connection {
            url: rpc_url.to_string(),
            reason: e.to_string(),
        };
        let rpc_client = RpcClient::from_url(rpc_url)
            .await
            .map_err(connection_error)?;
        let client = OnlineClient::<PolkadotConfig>::from_rpc_client(rpc_client.clone())
            .await
            .map_err(connection_error)?;
        Ok(Self {
            client,
            rpc: LegacyRpcMethods::new(rpc_client),
            url: rpc_url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn block_hash(&self, number: u64) -> Result<H256> {
        self.rpc
            .chain_get_block_hash(Some(NumberOrHex::Number(number)))
            .await
            .map_err(ChainEventsError::rpc)?
            .ok_or_else(|| ChainEventsError::NotFound(format!("block {number}")))
    }

    async fn storage(&self, at: u64, pallet: &str, entry: &str, keys: Vec<Key>) -> Result<Option<Json>> {
        let hash = self.block_hash(at).await?;
        let query = subxt::dynamic::storage(pallet, entry, keys);
        let thunk = self
            .client
            .storage()
            .at(hash)
            .fetch(&query)
            .await
            .map_err(ChainEventsError::rpc)?;
        match thunk {
            Some(thunk) => Ok(Some(to_json(&thunk.to_value().map_err(ChainEventsError::rpc)?))),
            None => Ok(None),
        }
    }

    async fn storage_index(&self, at: u64, pallet: &str, entry: &str) -> Result<u32> {
        match self.storage(at, pallet, entry, vec![]).await? {
            Some(value) => as_index(&value).ok_or_else(|| malformed(pallet, entry)),
            None => Ok(0),
        }
    }
}

fn malformed(pallet: &str, entry: &str) -> ChainEventsError {
    ChainEventsError::decode(&format!("{pallet}.{entry}"), "unexpected storage layout")
}

fn index_key(index: u32) -> Vec<Key> {
    vec![Key::u128(u128::from(index))]
}

#[async_trait]
impl SubstrateApi for SubstrateClient {
    async fn block_number(&self) -> Result<u64> {
        let block = self
            .client
            .blocks()
            .at_latest()
            .await
            .map_err(ChainEventsError::rpc)?;
        Ok(block.number().into())
    }

    async fn is_connected(&self) -> bool {
        self.rpc.system_health().await.is_ok()
    }

    async fn events_at(&self, block_number: u64) -> Result<Vec<SubstrateEvent>> {
        let hash = self.block_hash(block_number).await?;
        let block = self
            .client
            .blocks()
            .at(hash)
            .await
            .map_err(ChainEventsError::rpc)?;
        let events = block.events().await.map_err(ChainEventsError::rpc)?;

        let mut decoded = Vec::new();
        for event in events.iter() {
            let event = event.map_err(ChainEventsError::rpc)?;
            let fields = event.field_values().map_err(ChainEventsError::rpc)?;
            decoded.push(SubstrateEvent::new(
                event.pallet_name(),
                event.variant_name(),
                block_number,
                field_args(&fields),
            ));
        }
        Ok(decoded)
    }

    async fn total_issuance(&self, at: u64) -> Result<u128> {
        let value = self
            .storage(at, "Balances", "TotalIssuance", vec![])
            .await?
            .ok_or_else(|| ChainEventsError::NotFound("Balances.TotalIssuance".into()))?;
        as_amount(&value).ok_or_else(|| malformed("Balances", "TotalIssuance"))
    }

    async fn public_proposals(&self, at: u64) -> Result<Vec<PublicProposal>> {
        match self.storage(at, "Democracy", "PublicProps", vec![]).await? {
            Some(value) => parse_public_proposals(&value).ok_or_else(|| malformed("Democracy", "PublicProps")),
            None => Ok(vec![]),
        }
    }

    async fn deposit_of(&self, index: u32, at: u64) -> Result<Option<u128>> {
        match self.storage(at, "Democracy", "DepositOf", index_key(index)).await? {
            Some(value) => parse_deposit(&value)
                .map(Some)
                .ok_or_else(|| malformed("Democracy", "DepositOf")),
            None => Ok(None),
        }
    }

    async fn referendum_range(&self, at: u64) -> Result<Range<u32>> {
        let lowest = self.storage_index(at, "Democracy", "LowestUnbaked").await?;
        let count = self.storage_index(at, "Democracy", "ReferendumCount").await?;
        Ok(lowest..count)
    }

    async fn referendum_info(&self, index: u32, at: u64) -> Result<Option<ReferendumStatus>> {
        match self.storage(at, "Democracy", "ReferendumInfoOf", index_key(index)).await? {
            Some(value) => parse_referendum(&value)
                .map(Some)
                .ok_or_else(|| malformed("Democracy", "ReferendumInfoOf")),
            None => Ok(None),
        }
    }

    async fn treasury_proposal_count(&self, at: u64) -> Result<u32> {
        self.storage_index(at, "Treasury", "ProposalCount").await
    }

    async fn treasury_proposal(&self, index: u32, at: u64) -> Result<Option<TreasuryProposal>> {
        match self.storage(at, "Treasury", "Proposals", index_key(index)).await? {
            Some(value) => parse_treasury_proposal(&value)
                .map(Some)
                .ok_or_else(|| malformed("Treasury", "Proposals")),
            None => Ok(None),
        }
    }
}

/// Event fields in declaration order, whether the runtime names them or not.
pub fn field_args<T>(fields: &Composite<T>) -> Vec<Json> {
    match fields {
        Composite::Named(fields) => fields.iter().map(|(_, value)| to_json(value)).collect(),
        Composite::Unnamed(values) => values.iter().map(to_json).collect(),
    }
}

/// Lossless JSON rendering of a decoded SCALE value.
///
/// Integers beyond `u64` become decimal strings. 32-byte arrays (hashes and
/// account ids) become `0x` hex. Single-field tuples are unwrapped. Variants
/// without fields become their name, others `{ name: fields }`.
pub fn to_json<T>(value: &Value<T>) -> Json {
    match &value.value {
        ValueDef::Primitive(primitive) => primitive_to_json(primitive),
        ValueDef::Composite(composite) => composite_to_json(composite),
        ValueDef::Variant(variant) => match &variant.values {
            Composite::Named(fields) if fields.is_empty() => Json::String(variant.name.clone()),
            Composite::Unnamed(values) if values.is_empty() => Json::String(variant.name.clone()),
            fields => {
                let mut map = Map::new();
                map.insert(variant.name.clone(), composite_to_json(fields));
                Json::Object(map)
            }
        },
        ValueDef::BitSequence(_) => Json::Null,
    }
}

fn composite_to_json<T>(composite: &Composite<T>) -> Json {
    match composite {
        Composite::Named(fields) => Json::Object(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), to_json(value)))
                .collect::<Map<_, _>>(),
        ),
        Composite::Unnamed(values) => {
            if let Some(bytes) = as_bytes32(values) {
                return Json::String(format!("0x{}", hex::encode(bytes)));
            }
            match values.as_slice() {
                [] => Json::Null,
                [single] => to_json(single),
                values => Json::Array(values.iter().map(to_json).collect()),
            }
        }
    }
}

fn as_bytes32<T>(values: &[Value<T>]) -> Option<Vec<u8>> {
    if values.len() != 32 {
        return None;
    }
    values
        .iter()
        .map(|value| match &value.value {
            ValueDef::Primitive(Primitive::U128(n)) => u8::try_from(*n).ok(),
            _ => None,
        })
        .collect()
}

fn primitive_to_json(primitive: &Primitive) -> Json {
    match primitive {
        Primitive::Bool(b) => Json::Bool(*b),
        Primitive::Char(c) => Json::String(c.to_string()),
        Primitive::String(s) => Json::String(s.clone()),
        Primitive::U128(n) => match u64::try_from(*n) {
            Ok(n) => json!(n),
            Err(_) => Json::String(n.to_string()),
        },
        Primitive::I128(n) => match i64::try_from(*n) {
            Ok(n) => json!(n),
            Err(_) => Json::String(n.to_string()),
        },
        Primitive::U256(bytes) | Primitive::I256(bytes) => Json::String(format!("0x{}", hex::encode(bytes))),
    }
}

/// Preimage references are either a bare hash or a `Bounded` call, which
/// carries its hash in a `hash` field or as its only field.
fn proposal_hash(value: &Json) -> Option<String> {
    match value {
        Json::String(hash) => Some(hash.clone()),
        Json::Object(fields) => fields
            .get("hash")
            .or_else(|| fields.values().next())
            .and_then(proposal_hash),
        _ => None,
    }
}

fn field<'a>(value: &'a Json, name: &str) -> Option<&'a Json> {
    value.as_object()?.get(name)
}

/// `Vec<(PropIndex, Hash | Bounded, AccountId)>`
pub(crate) fn parse_public_proposals(value: &Json) -> Option<Vec<PublicProposal>> {
    let entries = match value {
        Json::Null => return Some(vec![]),
        Json::Array(entries) if entries.len() == 3 && entries[0].is_number() => {
            std::slice::from_ref(value)
        }
        Json::Array(entries) => entries.as_slice(),
        _ => return None,
    };
    entries
        .iter()
        .map(|entry| {
            let [index, hash, proposer] = entry.as_array()?.as_slice() else {
                return None;
            };
            Some(PublicProposal {
                index: as_index(index)?,
                proposal_hash: proposal_hash(hash)?,
                proposer: account(proposer)?,
            })
        })
        .collect()
}

/// Either `(Vec<AccountId>, Balance)` or the older `(Balance, Vec<AccountId>)`.
pub(crate) fn parse_deposit(value: &Json) -> Option<u128> {
    value.as_array()?.iter().find_map(as_amount)
}

pub(crate) fn parse_referendum(value: &Json) -> Option<ReferendumStatus> {
    if let Some(ongoing) = field(value, "Ongoing") {
        let hash = field(ongoing, "proposal").or_else(|| field(ongoing, "proposal_hash"))?;
        return Some(ReferendumStatus::Ongoing {
            end: as_index(field(ongoing, "end")?)?.into(),
            proposal_hash: proposal_hash(hash)?,
            threshold: field(ongoing, "threshold")?.as_str()?.to_string(),
            delay: as_index(field(ongoing, "delay")?)?.into(),
        });
    }
    let finished = field(value, "Finished")?;
    Some(ReferendumStatus::Finished {
        approved: field(finished, "approved")?.as_bool()?,
        end: as_index(field(finished, "end")?)?.into(),
    })
}

pub(crate) fn parse_treasury_proposal(value: &Json) -> Option<TreasuryProposal> {
    Some(TreasuryProposal {
        proposer: account(field(value, "proposer")?)?,
        value: as_amount(field(value, "value")?)?,
        beneficiary: account(field(value, "beneficiary")?)?,
        bond: as_amount(field(value, "bond")?)?,
    })
}
