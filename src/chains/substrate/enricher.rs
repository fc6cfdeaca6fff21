use serde_json::Value;

use super::{EventData, EventKind, SubstrateEvent};
use crate::config::EnricherConfig;
use crate::error::{ChainEventsError, Result};
use crate::events::{CWEvent, SupportedNetwork};
use crate::provider::{ReferendumStatus, SubstrateApi};

const PERMILL: u128 = 1_000_000;

/// Turns a pallet event of a known kind into a normalized event, reading
/// whatever the event itself does not carry from storage at its block.
///
/// Returns `Ok(None)` for balance transfers below the configured share of
/// total issuance.
pub async fn enrich(
    api: &dyn SubstrateApi,
    kind: EventKind,
    raw: &SubstrateEvent,
    config: &EnricherConfig,
) -> Result<Option<CWEvent>> {
    let block_number = raw.block_number;
    let event = |data: EventData, exclude: Vec<String>| {
        Some(CWEvent::new(block_number, SupportedNetwork::Substrate, data, exclude))
    };

    match kind {
        EventKind::BalanceTransfer => {
            let sender = raw.account_arg(0)?;
            let dest = raw.account_arg(1)?;
            let value = raw.amount_arg(2)?;
            let threshold = config.balance_transfer_threshold_permill;
            if threshold != 0 {
                let total_issuance = api.total_issuance(block_number).await?;
                if below_threshold(value, total_issuance, threshold) {
                    return Ok(None);
                }
            }
            Ok(event(
                EventData::BalanceTransfer {
                    sender: sender.clone(),
                    dest: dest.clone(),
                    value: value.to_string(),
                },
                vec![sender, dest],
            ))
        }
        EventKind::DemocracyProposed => {
            let proposal_index = raw.index_arg(0)?;
            let deposit = raw.amount_arg(1)?;
            let proposal = api
                .public_proposals(block_number)
                .await?
                .into_iter()
                .find(|p| p.index == proposal_index)
                .ok_or_else(|| ChainEventsError::NotFound(format!("democracy proposal {proposal_index}")))?;
            Ok(event(
                EventData::DemocracyProposed {
                    proposal_index,
                    proposal_hash: proposal.proposal_hash,
                    deposit: deposit.to_string(),
                    proposer: proposal.proposer.clone(),
                },
                vec![proposal.proposer],
            ))
        }
        EventKind::DemocracySeconded => {
            let who = raw.account_arg(0)?;
            let proposal_index = raw.index_arg(1)?;
            Ok(event(
                EventData::DemocracySeconded {
                    proposal_index,
                    who: who.clone(),
                },
                vec![who],
            ))
        }
        EventKind::DemocracyTabled => Ok(event(
            EventData::DemocracyTabled {
                proposal_index: raw.index_arg(0)?,
            },
            vec![],
        )),
        EventKind::DemocracyStarted => {
            let referendum_index = raw.index_arg(0)?;
            let vote_threshold = raw
                .arg(1)?
                .as_str()
                .ok_or_else(|| ChainEventsError::decode(&raw.name(), "threshold is not a variant"))?
                .to_string();
            let Some(ReferendumStatus::Ongoing {
                end, proposal_hash, ..
            }) = api.referendum_info(referendum_index, block_number).await?
            else {
                return Err(ChainEventsError::NotFound(format!(
                    "ongoing referendum {referendum_index}"
                )));
            };
            Ok(event(
                EventData::DemocracyStarted {
                    referendum_index,
                    proposal_hash,
                    vote_threshold,
                    end_block: end,
                },
                vec![],
            ))
        }
        EventKind::DemocracyPassed => {
            let referendum_index = raw.index_arg(0)?;
            // The referendum is already finished at this block; its enactment
            // delay is only visible in the parent block's state.
            let parent = block_number.saturating_sub(1);
            let dispatch_block = match api.referendum_info(referendum_index, parent).await? {
                Some(ReferendumStatus::Ongoing { end, delay, .. }) => Some(end + delay),
                _ => None,
            };
            Ok(event(
                EventData::DemocracyPassed {
                    referendum_index,
                    dispatch_block,
                },
                vec![],
            ))
        }
        EventKind::DemocracyNotPassed => Ok(event(
            EventData::DemocracyNotPassed {
                referendum_index: raw.index_arg(0)?,
            },
            vec![],
        )),
        EventKind::DemocracyCancelled => Ok(event(
            EventData::DemocracyCancelled {
                referendum_index: raw.index_arg(0)?,
            },
            vec![],
        )),
        EventKind::DemocracyExecuted => {
            let referendum_index = raw.index_arg(0)?;
            let execution_ok = execution_ok(raw.arg(1)?)
                .ok_or_else(|| ChainEventsError::decode(&raw.name(), "unrecognized dispatch result"))?;
            Ok(event(
                EventData::DemocracyExecuted {
                    referendum_index,
                    execution_ok,
                },
                vec![],
            ))
        }
        EventKind::TreasuryProposed => {
            let proposal_index = raw.index_arg(0)?;
            let proposal = api
                .treasury_proposal(proposal_index, block_number)
                .await?
                .ok_or_else(|| ChainEventsError::NotFound(format!("treasury proposal {proposal_index}")))?;
            Ok(event(
                EventData::TreasuryProposed {
                    proposal_index,
                    proposer: proposal.proposer.clone(),
                    value: proposal.value.to_string(),
                    beneficiary: proposal.beneficiary,
                    bond: proposal.bond.to_string(),
                },
                vec![proposal.proposer],
            ))
        }
        EventKind::TreasuryAwarded => Ok(event(
            EventData::TreasuryAwarded {
                proposal_index: raw.index_arg(0)?,
                value: raw.amount_arg(1)?.to_string(),
                beneficiary: raw.account_arg(2)?,
            },
            vec![],
        )),
        EventKind::TreasuryRejected => Ok(event(
            EventData::TreasuryRejected {
                proposal_index: raw.index_arg(0)?,
            },
            vec![],
        )),
    }
}

/// `value * 1_000_000 / threshold < total_issuance`, with 0 meaning no threshold.
pub fn below_threshold(value: u128, total_issuance: u128, threshold_permill: u64) -> bool {
    if threshold_permill == 0 {
        return false;
    }
    value.saturating_mul(PERMILL) / u128::from(threshold_permill) < total_issuance
}

/// Older runtimes report a bool, newer ones a `DispatchResult`.
fn execution_ok(result: &Value) -> Option<bool> {
    match result {
        Value::Bool(ok) => Some(*ok),
        Value::String(variant) => Some(variant == "Ok"),
        Value::Object(fields) if fields.contains_key("Ok") => Some(true),
        Value::Object(fields) if fields.contains_key("Err") => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{PublicProposal, TreasuryProposal};
    use crate::test_utils::{MockSubstrateApi, ALICE, BOB};
    use serde_json::json;

    fn transfer(value: u64) -> SubstrateEvent {
        SubstrateEvent::new(
            "Balances",
            "Transfer",
            40,
            vec![json!(ALICE.0), json!(BOB.0), json!(value)],
        )
    }

    fn threshold(permill: u64) -> EnricherConfig {
        EnricherConfig {
            balance_transfer_threshold_permill: permill,
        }
    }

    #[tokio::test]
    async fn transfer_excludes_both_parties() {
        let api = MockSubstrateApi::new();
        let event = enrich(&api, EventKind::BalanceTransfer, &transfer(5), &threshold(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.block_number, 40);
        assert_eq!(
            event.data,
            EventData::BalanceTransfer {
                sender: ALICE.1.into(),
                dest: BOB.1.into(),
                value: "5".into(),
            }
            .into()
        );
        assert!(event.exclude_addresses.contains(ALICE.1));
        assert!(event.exclude_addresses.contains(BOB.1));
        assert_eq!(api.issuance_calls(), 0);
    }

    #[tokio::test]
    async fn small_transfers_are_filtered_against_issuance() {
        let api = MockSubstrateApi::new();
        api.set_issuance(1_000_000);
        // 1% of issuance
        let config = threshold(10_000);
        assert!(enrich(&api, EventKind::BalanceTransfer, &transfer(9_999), &config)
            .await
            .unwrap()
            .is_none());
        assert!(enrich(&api, EventKind::BalanceTransfer, &transfer(10_000), &config)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn proposed_reads_the_proposer_from_storage() {
        let api = MockSubstrateApi::new();
        api.add_public_proposal(PublicProposal {
            index: 3,
            proposal_hash: "0xabcd".into(),
            proposer: ALICE.1.into(),
        });
        let raw = SubstrateEvent::new("Democracy", "Proposed", 12, vec![json!(3), json!("1000")]);
        let event = enrich(&api, EventKind::DemocracyProposed, &raw, &threshold(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event.data,
            EventData::DemocracyProposed {
                proposal_index: 3,
                proposal_hash: "0xabcd".into(),
                deposit: "1000".into(),
                proposer: ALICE.1.into(),
            }
            .into()
        );
        assert_eq!(event.exclude_addresses.len(), 1);

        let missing = SubstrateEvent::new("Democracy", "Proposed", 12, vec![json!(4), json!(1)]);
        assert!(matches!(
            enrich(&api, EventKind::DemocracyProposed, &missing, &threshold(0)).await,
            Err(ChainEventsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn started_and_passed_use_referendum_info() {
        let api = MockSubstrateApi::new();
        api.set_referendum(
            0,
            ReferendumStatus::Ongoing {
                end: 100,
                proposal_hash: "0xfeed".into(),
                threshold: "SimpleMajority".into(),
                delay: 20,
            },
        );
        let started = SubstrateEvent::new("Democracy", "Started", 50, vec![json!(0), json!("SimpleMajority")]);
        let event = enrich(&api, EventKind::DemocracyStarted, &started, &threshold(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event.data,
            EventData::DemocracyStarted {
                referendum_index: 0,
                proposal_hash: "0xfeed".into(),
                vote_threshold: "SimpleMajority".into(),
                end_block: 100,
            }
            .into()
        );

        let passed = SubstrateEvent::new("Democracy", "Passed", 100, vec![json!(0)]);
        let event = enrich(&api, EventKind::DemocracyPassed, &passed, &threshold(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event.data,
            EventData::DemocracyPassed {
                referendum_index: 0,
                dispatch_block: Some(120),
            }
            .into()
        );
    }

    #[tokio::test]
    async fn started_without_ongoing_info_fails() {
        let api = MockSubstrateApi::new();
        api.set_referendum(1, ReferendumStatus::Finished { approved: false, end: 9 });
        let started = SubstrateEvent::new("Democracy", "Started", 50, vec![json!(1), json!("SimpleMajority")]);
        assert!(enrich(&api, EventKind::DemocracyStarted, &started, &threshold(0))
            .await
            .is_err());
    }

    #[test]
    fn dispatch_results() {
        assert_eq!(execution_ok(&json!(true)), Some(true));
        assert_eq!(execution_ok(&json!({ "Ok": null })), Some(true));
        assert_eq!(execution_ok(&json!({ "Err": { "BadOrigin": null } })), Some(false));
        assert_eq!(execution_ok(&json!(3)), None);
    }

    #[tokio::test]
    async fn treasury_proposed_excludes_the_proposer() {
        let api = MockSubstrateApi::new();
        api.set_treasury_proposal(
            2,
            TreasuryProposal {
                proposer: ALICE.1.into(),
                value: 500,
                beneficiary: BOB.1.into(),
                bond: 25,
            },
        );
        let raw = SubstrateEvent::new("Treasury", "Proposed", 7, vec![json!(2)]);
        let event = enrich(&api, EventKind::TreasuryProposed, &raw, &threshold(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.exclude_addresses.iter().collect::<Vec<_>>(), vec![ALICE.1]);
        assert!(matches!(
            &event.data,
            crate::events::EventData::Substrate(EventData::TreasuryProposed { bond, .. }) if bond == "25"
        ));
    }

    #[test]
    fn threshold_boundary() {
        assert!(below_threshold(9, 1_000, 10_000));
        assert!(!below_threshold(10, 1_000, 10_000));
        assert!(!below_threshold(0, 1_000, 0));
        assert!(!below_threshold(u128::MAX, u128::MAX, 1));
    }
}
