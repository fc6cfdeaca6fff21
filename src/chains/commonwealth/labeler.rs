use super::EventData;
use crate::chains::short_address;
use crate::events::EventLabel;

pub fn label(_block_number: u64, chain_id: &str, data: &EventData) -> EventLabel {
    let link_url = Some(format!("/{}/project/{}", chain_id, data.project_id()));
    let (heading, label) = match data {
        EventData::ProjectCreated {
            id, name, threshold, ..
        } => (
            "New Project",
            format!(
                "Project \"{}\" ({}) was created with a funding threshold of {}.",
                name,
                short_address(id),
                threshold
            ),
        ),
        EventData::ProjectBacked {
            id, sender, amount, ..
        } => (
            "Project Backed",
            format!(
                "{} backed project {} with {}.",
                short_address(sender),
                short_address(id),
                amount
            ),
        ),
        EventData::ProjectCurated {
            id, sender, amount, ..
        } => (
            "Project Curated",
            format!(
                "{} curated project {} with {}.",
                short_address(sender),
                short_address(id),
                amount
            ),
        ),
        EventData::ProjectSucceeded { id, amount, .. } => (
            "Project Succeeded",
            format!(
                "Project {} reached its threshold, raising {}.",
                short_address(id),
                amount
            ),
        ),
        EventData::ProjectFailed { id } => (
            "Project Failed",
            format!(
                "Project {} did not reach its threshold before the deadline.",
                short_address(id)
            ),
        ),
        EventData::ProjectWithdraw {
            id,
            sender,
            amount,
            withdrawal_type,
            ..
        } => (
            "Project Withdrawal",
            format!(
                "{} withdrew {} from project {} ({}).",
                short_address(sender),
                amount,
                short_address(id),
                withdrawal_type
            ),
        ),
    };

    EventLabel {
        heading: heading.to_string(),
        label,
        link_url,
    }
}
