//! Chain-bases and the raw event adapter they share.

pub mod commonwealth;
pub mod erc20;
pub mod substrate;

use alloy::primitives::{Address, FixedBytes, Log, B256};

/// Name reported for logs that carry no topics at all.
pub const ANONYMOUS_EVENT: &str = "anonymous";

/// A chain-native log, tagged with the event name its chain-base knows it by.
///
/// Names are resolved from topic0; logs with an unknown signature keep the
/// hex signature as their name so the type parser can report and drop them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub name: String,
    pub block_number: u64,
    pub address: Address,
    pub log: Log,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, block_number: u64, log: Log) -> Self {
        Self {
            name: name.into(),
            block_number,
            address: log.address,
            log,
        }
    }

    pub fn from_rpc_log(
        log: &alloy::rpc::types::Log,
        resolve: fn(&B256) -> Option<&'static str>,
    ) -> Self {
        let name = match log.topics().first() {
            Some(topic) => resolve(topic)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{topic:#x}")),
            None => ANONYMOUS_EVENT.to_string(),
        };
        Self::new(name, log.block_number.unwrap_or_default(), log.inner.clone())
    }
}

/// Anything the pipeline can process: every raw event knows its block.
pub trait BlockScoped {
    fn block_number(&self) -> u64;
}

impl BlockScoped for RawEvent {
    fn block_number(&self) -> u64 {
        self.block_number
    }
}

pub(crate) fn fmt_address(address: &Address) -> String {
    address.to_checksum(None)
}

/// Decodes a right-padded `bytes32` string field.
pub(crate) fn bytes32_to_string(bytes: &FixedBytes<32>) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(32);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Shortens long addresses for display, e.g. `0x1234…cdef`.
pub(crate) fn short_address(address: &str) -> String {
    if address.len() < 16 {
        return address.to_string();
    }
    format!("{}…{}", &address[..6], &address[address.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256, LogData};

    #[test]
    fn unknown_topic_keeps_hex_name() {
        let topic = b256!("00000000000000000000000000000000000000000000000000000000000000ff");
        let log = alloy::rpc::types::Log {
            inner: Log {
                address: address!("0000000000000000000000000000000000000001"),
                data: LogData::new_unchecked(vec![topic], Default::default()),
            },
            block_number: Some(9),
            ..Default::default()
        };
        let raw = RawEvent::from_rpc_log(&log, |_| None);
        assert_eq!(raw.block_number, 9);
        assert_eq!(raw.name, format!("{topic:#x}"));
    }

    #[test]
    fn bytes32_strings_are_trimmed() {
        let mut bytes = [0u8; 32];
        bytes[..5].copy_from_slice(b"hello");
        assert_eq!(bytes32_to_string(&FixedBytes::from(bytes)), "hello");
    }

    #[test]
    fn short_address_keeps_short_values() {
        assert_eq!(short_address("0xabc"), "0xabc");
        assert_eq!(
            short_address("0x1234567890abcdef1234567890abcdef12345678"),
            "0x1234…5678"
        );
    }
}
