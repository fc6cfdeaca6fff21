use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, Span};

use super::{enricher, parse_type};
use crate::chains::RawEvent;
use crate::events::CWEvent;
use crate::listener::EventProcessor;
use crate::logging::LogContext;
use crate::provider::ProjectApi;

pub struct CommonwealthProcessor {
    api: Arc<dyn ProjectApi>,
    span: Span,
}

impl CommonwealthProcessor {
    pub fn new(api: Arc<dyn ProjectApi>, log: &LogContext) -> Self {
        Self {
            api,
            span: log.span("processor"),
        }
    }
}

#[async_trait]
impl EventProcessor for CommonwealthProcessor {
    async fn process(&self, raw: &RawEvent, origin: Option<&str>) -> Vec<CWEvent> {
        let Some(kind) = parse_type(&raw.name) else {
            return vec![];
        };

        match enricher::enrich(self.api.as_ref(), raw.block_number, kind, raw).await {
            Ok(event) => vec![event.with_origin(origin)],
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
