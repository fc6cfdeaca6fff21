use super::EventData;
use crate::chains::short_address;
use crate::events::EventLabel;

fn democracy_proposal_link(chain_id: &str, index: u32) -> Option<String> {
    Some(format!("/{chain_id}/proposal/democracyproposal/{index}"))
}

fn referendum_link(chain_id: &str, index: u32) -> Option<String> {
    Some(format!("/{chain_id}/proposal/referendum/{index}"))
}

fn treasury_link(chain_id: &str, index: u32) -> Option<String> {
    Some(format!("/{chain_id}/proposal/treasuryproposal/{index}"))
}

fn labeled(heading: &str, label: String, link_url: Option<String>) -> EventLabel {
    EventLabel {
        heading: heading.to_string(),
        label,
        link_url,
    }
}

/// Describes a pallet event in plain English for notifications.
pub fn label(block_number: u64, chain_id: &str, data: &EventData) -> EventLabel {
    match data {
        EventData::BalanceTransfer { sender, dest, value } => labeled(
            "Balance Transferred",
            format!(
                "{} transferred {} to {}.",
                short_address(sender),
                value,
                short_address(dest)
            ),
            None,
        ),
        EventData::DemocracyProposed {
            proposal_index,
            deposit,
            ..
        } => labeled(
            "Democracy Proposal Created",
            format!("Democracy proposal {proposal_index} was introduced with a deposit of {deposit}."),
            democracy_proposal_link(chain_id, *proposal_index),
        ),
        EventData::DemocracySeconded { proposal_index, who } => labeled(
            "Democracy Proposal Seconded",
            format!(
                "Democracy proposal {} was seconded by {}.",
                proposal_index,
                short_address(who)
            ),
            democracy_proposal_link(chain_id, *proposal_index),
        ),
        EventData::DemocracyTabled { proposal_index } => labeled(
            "Democracy Proposal Tabled",
            format!("Democracy proposal {proposal_index} was tabled as a referendum."),
            democracy_proposal_link(chain_id, *proposal_index),
        ),
        EventData::DemocracyStarted {
            referendum_index,
            end_block,
            ..
        } => labeled(
            "Democracy Referendum Started",
            if *end_block > 0 {
                format!(
                    "Referendum {referendum_index} started voting, and will be in voting until block {end_block}."
                )
            } else {
                format!("Referendum {referendum_index} started voting.")
            },
            referendum_link(chain_id, *referendum_index),
        ),
        EventData::DemocracyPassed {
            referendum_index,
            dispatch_block,
        } => labeled(
            "Democracy Referendum Passed",
            match dispatch_block {
                Some(at) => format!("Referendum {referendum_index} passed, and will be executed on block {at}."),
                None => format!(
                    "Referendum {referendum_index} passed, and was executed on block {block_number}."
                ),
            },
            referendum_link(chain_id, *referendum_index),
        ),
        EventData::DemocracyNotPassed { referendum_index } => labeled(
            "Democracy Referendum Failed",
            format!("Referendum {referendum_index} failed."),
            referendum_link(chain_id, *referendum_index),
        ),
        EventData::DemocracyCancelled { referendum_index } => labeled(
            "Democracy Referendum Cancelled",
            format!("Referendum {referendum_index} was cancelled."),
            referendum_link(chain_id, *referendum_index),
        ),
        EventData::DemocracyExecuted {
            referendum_index,
            execution_ok,
        } => labeled(
            "Democracy Referendum Executed",
            format!(
                "Referendum {} was executed {}.",
                referendum_index,
                if *execution_ok { "successfully" } else { "unsuccessfully" }
            ),
            referendum_link(chain_id, *referendum_index),
        ),
        EventData::TreasuryProposed {
            proposal_index,
            proposer,
            value,
            ..
        } => labeled(
            "Treasury Proposal Created",
            format!(
                "Treasury proposal {} was introduced by {} for {}.",
                proposal_index,
                short_address(proposer),
                value
            ),
            treasury_link(chain_id, *proposal_index),
        ),
        EventData::TreasuryAwarded {
            proposal_index,
            value,
            beneficiary,
        } => labeled(
            "Treasury Proposal Awarded",
            format!(
                "Treasury proposal {} was awarded to {} for {}.",
                proposal_index,
                short_address(beneficiary),
                value
            ),
            treasury_link(chain_id, *proposal_index),
        ),
        EventData::TreasuryRejected { proposal_index } => labeled(
            "Treasury Proposal Rejected",
            format!("Treasury proposal {proposal_index} was rejected."),
            treasury_link(chain_id, *proposal_index),
        ),
    }
}
