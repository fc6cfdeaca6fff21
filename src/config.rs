use alloy::primitives::Address;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use url::Url;

use crate::events::SupportedNetwork;

const DEFAULT_MAX_BLOCK_RANGE: u64 = 2_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 6_000;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct EnricherConfig {
    /// Value-bearing events are only emitted when
    /// `value * 1_000_000 / threshold >= total supply`. 0 emits everything.
    #[serde(default)]
    pub balance_transfer_threshold_permill: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ContractConfig {
    pub address: Address,
    /// Label attached to every event this contract produces.
    #[serde(default)]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

/// Per-listener configuration snapshot. A listener keeps the copy it was
/// built with for its whole lifetime.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ListenerOptions {
    pub name: String,
    pub network: SupportedNetwork,
    pub url: String,
    /// Tokens (erc20) or already-known projects (commonwealth). Unused on
    /// substrate.
    #[serde(default)]
    pub contracts: Vec<ContractConfig>,
    /// Project factory, commonwealth only.
    #[serde(default)]
    pub factory: Option<Address>,
    #[serde(default)]
    pub enricher: EnricherConfig,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub skip_catchup: bool,
    #[serde(default)]
    pub start_block: Option<u64>,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    /// How often a substrate listener asks for new blocks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl ListenerOptions {
    pub fn new(name: impl Into<String>, network: SupportedNetwork, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            network,
            url: url.into(),
            contracts: Vec::new(),
            factory: None,
            enricher: EnricherConfig::default(),
            verbose: false,
            skip_catchup: false,
            start_block: None,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_contract(mut self, address: Address, origin: Option<&str>) -> Self {
        self.contracts.push(ContractConfig {
            address,
            origin: origin.map(str::to_string),
        });
        self
    }

    pub fn with_factory(mut self, factory: Address) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_threshold(mut self, permill: u64) -> Self {
        self.enricher.balance_transfer_threshold_permill = permill;
        self
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HandlersConfig {
    #[serde(default = "default_true")]
    pub log_events: bool,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

impl Default for HandlersConfig {
    fn default() -> Self {
        Self {
            log_events: true,
            webhook_url: String::new(),
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub listeners: Vec<ListenerOptions>,
    #[serde(default)]
    pub handlers: HandlersConfig,
}

impl AppConfig {
    /// Loads `config.{toml,yaml,json}` from the working directory, with
    /// `CHAIN_EVENTS__*` environment variables layered on top.
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config"))
            .add_source(Environment::with_prefix("CHAIN_EVENTS").separator("__"));

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }

    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Rejects endpoints that are not valid URLs before any connection is attempted.
    pub fn validate(&self) -> crate::Result<()> {
        for listener in &self.listeners {
            Url::parse(&listener.url)?;
        }
        Ok(())
    }
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_block_range() -> u64 {
    DEFAULT_MAX_BLOCK_RANGE
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_true() -> bool {
    true
}
