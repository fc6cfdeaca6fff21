//! Built-in event handlers.

pub mod webhook;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::events::{CWEvent, EventKind};
use crate::listener::EventHandler;

pub use webhook::WebhookHandler;

/// Logs every event it sees and passes the previous result through.
#[derive(Debug, Default)]
pub struct LoggingHandler {
    verbose: bool,
    excluded: Vec<EventKind>,
}

impl LoggingHandler {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            excluded: Vec::new(),
        }
    }

    pub fn excluding(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.excluded.extend(kinds);
        self
    }
}

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &CWEvent, previous: Option<Value>) -> eyre::Result<Option<Value>> {
        let chain = event.chain.as_deref().unwrap_or(event.network.as_str());
        if self.verbose {
            info!(chain, "Received event: {}", serde_json::to_string(event)?);
        } else {
            info!(chain, "Received {} event at block {}", event.kind(), event.block_number);
        }
        Ok(previous)
    }

    fn excluded_events(&self) -> &[EventKind] {
        &self.excluded
    }

    fn name(&self) -> &str {
        "logging"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::erc20;
    use crate::events::SupportedNetwork;
    use serde_json::json;

    #[tokio::test]
    async fn passes_previous_result_through() {
        let event = CWEvent::new(
            3,
            SupportedNetwork::Erc20,
            erc20::EventData::Approval {
                owner: "0xA".into(),
                spender: "0xB".into(),
                value: "1".into(),
            },
            [],
        );
        let handler = LoggingHandler::new(true);
        let result = handler.handle(&event, Some(json!("kept"))).await.unwrap();
        assert_eq!(result, Some(json!("kept")));

        let approval: EventKind = erc20::EventKind::Approval.into();
        let quiet = LoggingHandler::new(false).excluding([approval]);
        assert_eq!(quiet.excluded_events(), [approval].as_slice());
    }
}
