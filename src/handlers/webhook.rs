use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::HandlersConfig;
use crate::events::{self, CWEvent, EventKind, EventLabel, SupportedNetwork};
use crate::listener::EventHandler;

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    fields: Vec<EmbedField>,
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct DiscordPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
struct TelegramPayload {
    chat_id: String,
    text: String,
    parse_mode: String,
}

/// Posts labelled events to a Discord-style webhook and/or a Telegram chat.
/// Identical notifications inside the cooldown window are suppressed.
pub struct WebhookHandler {
    client: Client,
    config: HandlersConfig,
    last_sent: Mutex<HashMap<String, Instant>>,
    cooldown: Duration,
    excluded: Vec<EventKind>,
}

impl WebhookHandler {
    pub fn new(config: HandlersConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            last_sent: Mutex::new(HashMap::new()),
            cooldown: DEFAULT_COOLDOWN,
            excluded: Vec::new(),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn excluding(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.excluded.extend(kinds);
        self
    }

    /// Whether any delivery target is configured at all.
    pub fn is_configured(&self) -> bool {
        !self.config.webhook_url.is_empty() || self.telegram_target().is_some()
    }

    /// Records the notification and returns `false` if an identical one went
    /// out within the cooldown. Entries whose cooldown has lapsed are dropped.
    async fn should_send(&self, key: &str) -> bool {
        let mut history = self.last_sent.lock().await;
        let cooldown = self.cooldown;
        history.retain(|_, last| last.elapsed() < cooldown);
        if history.contains_key(key) {
            return false;
        }
        history.insert(key.to_string(), Instant::now());
        true
    }

    fn telegram_target(&self) -> Option<(&str, &str)> {
        let token = self.config.telegram_bot_token.as_deref().filter(|t| !t.is_empty())?;
        let chat_id = self.config.telegram_chat_id.as_deref().filter(|c| !c.is_empty())?;
        Some((token, chat_id))
    }

    async fn send_discord(&self, event: &CWEvent, label: &EventLabel) {
        if self.config.webhook_url.is_empty() {
            return;
        }
        let payload = discord_payload(event, label);
        let result = self
            .client
            .post(&self.config.webhook_url)
            .json(&payload)
            .send()
            .await
            .and_then(|response| response.error_for_status());
        match result {
            Ok(_) => info!("Webhook notification sent for {}", event.kind()),
            Err(e) => error!("Failed to send webhook notification: {}", e),
        }
    }

    async fn send_telegram(&self, event: &CWEvent, label: &EventLabel) {
        let Some((token, chat_id)) = self.telegram_target() else {
            return;
        };
        let payload = TelegramPayload {
            chat_id: chat_id.to_string(),
            text: format!(
                "*{}*\n\n{}\n*Block:* {}",
                label.heading, label.label, event.block_number
            ),
            parse_mode: "Markdown".to_string(),
        };
        let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
        let result = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .and_then(|response| response.error_for_status());
        match result {
            Ok(_) => info!("Telegram notification sent for {}", event.kind()),
            Err(e) => error!("Failed to send Telegram notification: {}", e),
        }
    }
}

fn network_color(network: SupportedNetwork) -> u32 {
    match network {
        SupportedNetwork::Erc20 => 0x3498DB,
        SupportedNetwork::Commonwealth => 0x2ECC71,
        SupportedNetwork::Substrate => 0xE6007A,
    }
}

fn discord_payload(event: &CWEvent, label: &EventLabel) -> DiscordPayload {
    let chain = event.chain.as_deref().unwrap_or(event.network.as_str());
    DiscordPayload {
        content: None,
        embeds: vec![DiscordEmbed {
            title: label.heading.clone(),
            description: label.label.clone(),
            color: network_color(event.network),
            url: label.link_url.clone(),
            fields: vec![
                EmbedField {
                    name: "Chain".to_string(),
                    value: chain.to_string(),
                    inline: true,
                },
                EmbedField {
                    name: "Block".to_string(),
                    value: event.block_number.to_string(),
                    inline: true,
                },
            ],
        }],
    }
}

#[async_trait]
impl EventHandler for WebhookHandler {
    async fn handle(&self, event: &CWEvent, previous: Option<Value>) -> eyre::Result<Option<Value>> {
        let label = events::label(event);
        let key = format!("{}:{}", label.heading, label.label);
        if !self.should_send(&key).await {
            warn!("Notification suppressed (cooldown): {}", label.label);
            return Ok(previous);
        }

        self.send_discord(event, &label).await;
        self.send_telegram(event, &label).await;
        Ok(previous)
    }

    fn excluded_events(&self) -> &[EventKind] {
        &self.excluded
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::commonwealth;

    fn failed_project() -> CWEvent {
        CWEvent::new(
            88,
            SupportedNetwork::Commonwealth,
            commonwealth::EventData::ProjectFailed {
                id: "0x00000000000000000000000000000000000000A1".into(),
            },
            [],
        )
    }

    #[tokio::test]
    async fn repeated_notifications_are_suppressed() {
        let handler = WebhookHandler::new(HandlersConfig::default());
        assert!(handler.should_send("a").await);
        assert!(!handler.should_send("a").await);
        assert!(handler.should_send("b").await);

        let eager = WebhookHandler::new(HandlersConfig::default()).with_cooldown(Duration::ZERO);
        assert!(eager.should_send("a").await);
        assert!(eager.should_send("a").await);
    }

    #[tokio::test]
    async fn expired_entries_are_pruned() {
        let handler = WebhookHandler::new(HandlersConfig::default())
            .with_cooldown(Duration::from_millis(20));
        for key in ["a", "b", "c"] {
            assert!(handler.should_send(key).await);
        }
        assert_eq!(handler.last_sent.lock().await.len(), 3);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(handler.should_send("d").await);
        let history = handler.last_sent.lock().await;
        assert_eq!(history.len(), 1);
        assert!(history.contains_key("d"));
    }

    #[test]
    fn telegram_needs_token_and_chat() {
        let mut config = HandlersConfig::default();
        assert!(!WebhookHandler::new(config.clone()).is_configured());

        config.telegram_bot_token = Some("token".into());
        assert!(!WebhookHandler::new(config.clone()).is_configured());

        config.telegram_chat_id = Some("42".into());
        assert!(WebhookHandler::new(config).is_configured());
    }

    #[test]
    fn discord_embed_carries_label_and_block() {
        let event = failed_project();
        let payload = discord_payload(&event, &events::label(&event));
        let json = serde_json::to_value(&payload).unwrap();
        let embed = &json["embeds"][0];
        assert_eq!(embed["title"], "Project Failed");
        assert_eq!(embed["fields"][1]["value"], "88");
        assert_eq!(embed["fields"][0]["value"], "commonwealth");
        assert!(embed["url"].as_str().unwrap().starts_with("/commonwealth/project/"));
    }

    #[tokio::test]
    async fn unconfigured_handler_passes_through() {
        let handler = WebhookHandler::new(HandlersConfig::default());
        let result = handler
            .handle(&failed_project(), Some(Value::Bool(true)))
            .await
            .unwrap();
        assert_eq!(result, Some(Value::Bool(true)));
    }
}
