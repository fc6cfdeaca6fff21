use std::sync::Arc;
use std::time::Duration;

use chain_events::config::{AppConfig, HandlersConfig, ListenerOptions};
use chain_events::handlers::{LoggingHandler, WebhookHandler};
use chain_events::logging::{init_file_logging, init_stdout_logging};
use chain_events::{
    ChainListener, CommonwealthListener, DisconnectedRange, Erc20Listener, EventHandler,
    SubstrateListener, SupportedNetwork,
};
use dotenv::dotenv;
use eyre::{Result, WrapErr};
use tracing::{error, info, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

fn build_listener(
    options: ListenerOptions,
    handlers: &HandlersConfig,
    webhook: Option<Arc<WebhookHandler>>,
) -> Box<dyn ChainListener> {
    let mut chain: Vec<Arc<dyn EventHandler>> = Vec::new();
    if handlers.log_events {
        chain.push(Arc::new(LoggingHandler::new(options.verbose)));
    }
    if let Some(webhook) = webhook {
        chain.push(webhook);
    }

    match options.network {
        SupportedNetwork::Erc20 => Box::new(
            chain
                .into_iter()
                .fold(Erc20Listener::new(options), |l, h| l.with_handler(h)),
        ),
        SupportedNetwork::Commonwealth => Box::new(
            chain
                .into_iter()
                .fold(CommonwealthListener::new(options), |l, h| l.with_handler(h)),
        ),
        SupportedNetwork::Substrate => Box::new(
            chain
                .into_iter()
                .fold(SubstrateListener::new(options), |l, h| l.with_handler(h)),
        ),
    }
}

/// Connects, replays missed blocks when asked to, then goes live.
async fn start(listener: &mut dyn ChainListener) -> chain_events::Result<()> {
    listener.init().await?;

    let options = listener.options();
    match (options.skip_catchup, options.start_block) {
        (true, _) => info!("[{}] Skipping catch-up", options.name),
        (false, None) => info!("[{}] No start block configured, skipping catch-up", options.name),
        (false, Some(start_block)) => {
            let name = options.name.clone();
            info!("[{}] Catching up from block {}", name, start_block);
            match listener
                .process_missed_blocks(Some(DisconnectedRange::from_block(start_block)))
                .await
            {
                Ok(count) => info!("[{}] Catch-up dispatched {} event(s)", name, count),
                Err(e) => warn!("[{}] Catch-up failed, continuing with live events: {}", name, e),
            }
        }
    }

    listener.subscribe().await
}

async fn log_status(listeners: &[Box<dyn ChainListener>]) {
    for listener in listeners {
        let name = &listener.options().name;
        let snap = listener.state().snapshot();
        let head = match listener.latest_block_number().await {
            Ok(head) => head.to_string(),
            Err(_) => "unknown".to_string(),
        };
        info!(
            "[{}] connected: {}, head: {}, last block: {}, raw: {}, dispatched: {}, dropped: {}, stale: {}, handler failures: {}",
            name,
            listener.is_connected().await,
            head,
            snap.last_block,
            snap.raw_events,
            snap.dispatched,
            snap.dropped,
            snap.stale,
            snap.handler_failures
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let _guard = match std::env::var("LOG_DIR") {
        Ok(dir) => Some(init_file_logging(dir, "chain-events.log")),
        Err(_) => {
            init_stdout_logging();
            None
        }
    };

    info!("Starting chain-events");

    let config = AppConfig::new().wrap_err("Failed to load config")?;
    config.validate()?;
    info!("Configuration Loaded: {} listener(s)", config.listeners.len());
    info!(
        "  Webhook: {}",
        if config.handlers.webhook_url.is_empty() { "Disabled" } else { "Enabled" }
    );

    let webhook = Some(Arc::new(WebhookHandler::new(config.handlers.clone())))
        .filter(|w| w.is_configured());

    let mut listeners = Vec::new();
    for options in config.listeners.clone() {
        let name = options.name.clone();
        let mut listener = build_listener(options, &config.handlers, webhook.clone());
        match start(listener.as_mut()).await {
            Ok(()) => {
                info!("[{}] Listener active", name);
                listeners.push(listener);
            }
            Err(e) => error!("[{}] Failed to start listener: {}", name, e),
        }
    }
    if listeners.is_empty() {
        eyre::bail!("No listener could be started");
    }

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = status.tick() => log_status(&listeners).await,
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down");
    for listener in &listeners {
        listener.unsubscribe();
    }
    Ok(())
}
