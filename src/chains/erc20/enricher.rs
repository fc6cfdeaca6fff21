use alloy::primitives::{Address, U256};
use alloy::sol_types::SolEvent;

use super::{Approval, EventData, EventKind, Transfer};
use crate::chains::{fmt_address, RawEvent};
use crate::config::EnricherConfig;
use crate::error::{ChainEventsError, Result};
use crate::events::{CWEvent, SupportedNetwork};
use crate::provider::Erc20Api;

const PERMILL: u64 = 1_000_000;

/// Turns a raw ERC20 log of a known kind into a normalized event.
///
/// Returns `Ok(None)` when the event is below the configured significance
/// threshold. `cached_supply` is the token supply recorded when the token was
/// registered; the chain is only asked when it is absent. Decode and
/// chain-read failures are returned to the caller, which decides whether to
/// drop or propagate them.
pub async fn enrich(
    api: &dyn Erc20Api,
    block_number: u64,
    kind: EventKind,
    raw: &RawEvent,
    config: &EnricherConfig,
    cached_supply: Option<U256>,
) -> Result<Option<CWEvent>> {
    match kind {
        EventKind::Transfer => {
            let decoded = Transfer::decode_log(&raw.log, true)
                .map_err(|e| ChainEventsError::decode(&raw.name, e))?;
            let Transfer { from, to, value } = decoded.data;
            if is_insignificant(api, raw.address, value, config, cached_supply).await? {
                return Ok(None);
            }

            let from = fmt_address(&from);
            let to = fmt_address(&to);
            Ok(Some(CWEvent::new(
                block_number,
                SupportedNetwork::Erc20,
                EventData::Transfer {
                    from: from.clone(),
                    to: to.clone(),
                    value: value.to_string(),
                },
                [from, to],
            )))
        }
        EventKind::Approval => {
            let decoded = Approval::decode_log(&raw.log, true)
                .map_err(|e| ChainEventsError::decode(&raw.name, e))?;
            let Approval {
                owner,
                spender,
                value,
            } = decoded.data;
            if is_insignificant(api, raw.address, value, config, cached_supply).await? {
                return Ok(None);
            }

            let owner = fmt_address(&owner);
            let spender = fmt_address(&spender);
            Ok(Some(CWEvent::new(
                block_number,
                SupportedNetwork::Erc20,
                EventData::Approval {
                    owner: owner.clone(),
                    spender: spender.clone(),
                    value: value.to_string(),
                },
                [owner, spender],
            )))
        }
    }
}

/// Needs the token supply only when a threshold is configured.
async fn is_insignificant(
    api: &dyn Erc20Api,
    token: Address,
    value: U256,
    config: &EnricherConfig,
    cached_supply: Option<U256>,
) -> Result<bool> {
    let threshold = config.balance_transfer_threshold_permill;
    if threshold == 0 {
        return Ok(false);
    }
    let total_supply = match cached_supply {
        Some(supply) => supply,
        None => api.total_supply(token).await?,
    };
    Ok(below_threshold(value, total_supply, threshold))
}

/// `value * 1_000_000 / threshold < total_supply`, with 0 meaning no threshold.
pub fn below_threshold(value: U256, total_supply: U256, threshold_permill: u64) -> bool {
    if threshold_permill == 0 {
        return false;
    }
    value.saturating_mul(U256::from(PERMILL)) / U256::from(threshold_permill) < total_supply
}
