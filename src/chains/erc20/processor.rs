use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, Span};

use super::{enricher, parse_type};
use crate::chains::RawEvent;
use crate::config::EnricherConfig;
use crate::events::CWEvent;
use crate::listener::EventProcessor;
use crate::logging::LogContext;
use crate::provider::Erc20Api;
use crate::subscriber::ContractSource;

pub struct Erc20Processor {
    api: Arc<dyn Erc20Api>,
    tokens: Arc<dyn ContractSource>,
    config: EnricherConfig,
    span: Span,
}

impl Erc20Processor {
    /// `tokens` supplies the total supply cached for each watched token.
    pub fn new(
        api: Arc<dyn Erc20Api>,
        tokens: Arc<dyn ContractSource>,
        config: EnricherConfig,
        log: &LogContext,
    ) -> Self {
        Self {
            api,
            tokens,
            config,
            span: log.span("processor"),
        }
    }
}

#[async_trait]
impl EventProcessor for Erc20Processor {
    async fn process(&self, raw: &RawEvent, origin: Option<&str>) -> Vec<CWEvent> {
        let Some(kind) = parse_type(&raw.name) else {
            return vec![];
        };

        let cached_supply = self.tokens.find(&raw.address).and_then(|t| t.total_supply);
        let enriched = enricher::enrich(
            self.api.as_ref(),
            raw.block_number,
            kind,
            raw,
            &self.config,
            cached_supply,
        )
        .await;
        match enriched {
            Ok(Some(event)) => vec![event.with_origin(origin)],
            Ok(None) => vec![],
            Err(e) => {
                error!(
                    parent: &self.span,
                    "Failed to enrich event. Block number: {}, Name/Kind: {}, Error Message: {}",
                    raw.block_number,
                    raw.name,
                    e
                );
                vec![]
            }
        }
    }
}
