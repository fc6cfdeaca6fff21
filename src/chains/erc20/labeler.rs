use super::EventData;
use crate::chains::short_address;
use crate::events::EventLabel;

/// Describes an ERC20 event in plain English for notifications.
pub fn label(_block_number: u64, chain_id: &str, data: &EventData) -> EventLabel {
    match data {
        EventData::Approval {
            owner,
            spender,
            value,
        } => EventLabel {
            heading: "Approval".to_string(),
            label: format!(
                "{} approved {} to spend {} {} tokens.",
                short_address(owner),
                short_address(spender),
                value,
                chain_id
            ),
            link_url: None,
        },
        EventData::Transfer { from, to, value } => EventLabel {
            heading: "Transfer".to_string(),
            label: format!(
                "Transfer of {} {} tokens from {} to {}.",
                value,
                chain_id,
                short_address(from),
                short_address(to)
            ),
            link_url: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_transfer() {
        let label = label(
            1,
            "usdc",
            &EventData::Transfer {
                from: "0x1111111111111111111111111111111111111111".into(),
                to: "0x2222222222222222222222222222222222222222".into(),
                value: "42".into(),
            },
        );
        assert_eq!(label.heading, "Transfer");
        assert_eq!(label.label, "Transfer of 42 usdc tokens from 0x1111…1111 to 0x2222…2222.");
    }
}
