use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, Span};

use super::{enricher, parse_type, SubstrateEvent};
use crate::config::EnricherConfig;
use crate::events::CWEvent;
use crate::listener::EventProcessor;
use crate::logging::LogContext;
use crate::provider::SubstrateApi;

pub struct SubstrateProcessor {
    api: Arc<dyn SubstrateApi>,
    config: EnricherConfig,
    span: Span,
}

impl SubstrateProcessor {
    pub fn new(api: Arc<dyn SubstrateApi>, config: EnricherConfig, log: &LogContext) -> Self {
        Self {
            api,
            config,
            span: log.span("processor"),
        }
    }
}

#[async_trait]
impl EventProcessor<SubstrateEvent> for SubstrateProcessor {
    async fn process(&self, raw: &SubstrateEvent, origin: Option<&str>) -> Vec<CWEvent> {
        let Some(kind) = parse_type(&raw.section, &raw.method) else {
            return vec![];
        };

        match enricher::enrich(self.api.as_ref(), kind, raw, &self.config).await {
            Ok(Some(event)) => vec![event.with_origin(origin)],
            Ok(None) => vec![],
            Err(e) => {
                error!(
                    parent: &self.span,
                    "Failed to enrich event. Block number: {}, Name/Kind: {}, Error Message: {}",
                    raw.block_number,
                    raw.name(),
                    e
                );
                vec![]
            }
        }
    }
}
