use alloy::sol_types::SolEvent;

use super::{Back, Curate, EventData, EventKind, Failed, ProjectCreated, Succeeded, Withdraw};
use crate::chains::{bytes32_to_string, fmt_address, RawEvent};
use crate::error::{ChainEventsError, Result};
use crate::events::{CWEvent, SupportedNetwork};
use crate::provider::ProjectApi;

fn decode<E: SolEvent>(raw: &RawEvent) -> Result<E> {
    E::decode_log(&raw.log, true)
        .map(|decoded| decoded.data)
        .map_err(|e| ChainEventsError::decode(&raw.name, e))
}

/// Turns a raw factory or project log of a known kind into a normalized
/// event. Project events carry their emitting contract as the project id.
pub async fn enrich(
    api: &dyn ProjectApi,
    block_number: u64,
    kind: EventKind,
    raw: &RawEvent,
) -> Result<CWEvent> {
    let project = fmt_address(&raw.address);
    let (data, exclude) = match kind {
        EventKind::ProjectCreated => {
            let ProjectCreated { index, project } = decode::<ProjectCreated>(raw)?;
            let metadata = api.project_metadata(project).await?;
            let data = EventData::ProjectCreated {
                id: fmt_address(&project),
                index: index.to_string(),
                name: metadata.name,
                beneficiary: fmt_address(&metadata.beneficiary),
                threshold: metadata.threshold.to_string(),
                deadline: metadata.deadline,
            };
            (data, vec![])
        }
        EventKind::ProjectBacked => {
            let Back {
                sender,
                token,
                amount,
            } = decode::<Back>(raw)?;
            let total_funding = api.total_funding(raw.address).await?;
            let sender = fmt_address(&sender);
            let data = EventData::ProjectBacked {
                id: project,
                sender: sender.clone(),
                token: fmt_address(&token),
                amount: amount.to_string(),
                total_funding: total_funding.to_string(),
            };
            (data, vec![sender])
        }
        EventKind::ProjectCurated => {
            let Curate {
                sender,
                token,
                amount,
            } = decode::<Curate>(raw)?;
            let total_funding = api.total_funding(raw.address).await?;
            let sender = fmt_address(&sender);
            let data = EventData::ProjectCurated {
                id: project,
                sender: sender.clone(),
                token: fmt_address(&token),
                amount: amount.to_string(),
                total_funding: total_funding.to_string(),
            };
            (data, vec![sender])
        }
        EventKind::ProjectSucceeded => {
            let Succeeded { timestamp, amount } = decode::<Succeeded>(raw)?;
            let data = EventData::ProjectSucceeded {
                id: project,
                timestamp: timestamp.to_string(),
                amount: amount.to_string(),
            };
            (data, vec![])
        }
        EventKind::ProjectFailed => {
            let Failed {} = decode::<Failed>(raw)?;
            (EventData::ProjectFailed { id: project }, vec![])
        }
        EventKind::ProjectWithdraw => {
            let Withdraw {
                sender,
                token,
                amount,
                withdrawalType: withdrawal_type,
            } = decode::<Withdraw>(raw)?;
            let sender = fmt_address(&sender);
            let data = EventData::ProjectWithdraw {
                id: project,
                sender: sender.clone(),
                token: fmt_address(&token),
                amount: amount.to_string(),
                withdrawal_type: bytes32_to_string(&withdrawal_type),
            };
            (data, vec![sender])
        }
    };

    Ok(CWEvent::new(
        block_number,
        SupportedNetwork::Commonwealth,
        data,
        exclude,
    ))
}
