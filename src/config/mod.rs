//! Configuration management for the signal relay.
//!
//! Loads settings from a JSON config file layered with environment
//! variables. The resulting [`Config`] is built once at startup and shared
//! read-only with every request handler.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix for environment overrides, e.g. `SIGNAL_RELAY__GATEIO__LEVERAGE=5`.
const ENV_PREFIX: &str = "SIGNAL_RELAY";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gate.io credentials and sizing parameters
    #[serde(default)]
    pub gateio: GateioConfig,
    /// Instrument filtering and symbol normalization
    #[serde(default)]
    pub trading: TradingConfig,
    /// Webhook listener
    #[serde(default)]
    pub server: ServerConfig,
    /// Chat notifications
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateioConfig {
    /// API key for authentication
    #[serde(default, rename = "apiKey", alias = "apikey", alias = "api_key")]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret: String,
    /// Fixed capital per trade, in quote currency (USDT)
    #[serde(default = "default_capital")]
    pub capital: Decimal,
    /// Leverage multiplier applied to every position
    #[serde(default = "default_leverage")]
    pub leverage: u8,
    /// Use the futures testnet instead of production
    #[serde(default)]
    pub testnet: bool,
    /// Override the REST host (mainly for local testing)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Settlement currency of the futures book
    #[serde(default = "default_settle")]
    pub settle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Instrument traded for every signal
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Token that a symbol must contain to be traded (case-insensitive)
    #[serde(default = "default_allowed_token")]
    pub allowed_token: String,
    /// Quote suffix used when normalizing exchange tickers
    #[serde(default = "default_quote")]
    pub quote: String,
    /// Trade the payload's `symbol` field instead of `symbol` when present
    #[serde(default)]
    pub honor_payload_symbol: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// WeCom group robot URL; notifications are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notifier_enabled")]
    pub enabled: bool,
}

fn default_capital() -> Decimal {
    Decimal::new(30, 0)
}

fn default_leverage() -> u8 {
    3
}

fn default_settle() -> String {
    "usdt".to_string()
}

fn default_symbol() -> String {
    "ETH/USDT:USDT".to_string()
}

fn default_allowed_token() -> String {
    "ETH".to_string()
}

fn default_quote() -> String {
    "USDT".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_notifier_enabled() -> bool {
    true
}

impl Config {
    /// Load configuration from a JSON file plus environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let config = config::Config::builder()
            .add_source(config::File::new(
                &path.to_string_lossy(),
                config::FileFormat::Json,
            ))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to build configuration from {}", path.display()))?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    ///
    /// Credentials are only required when orders go to the real exchange.
    pub fn validate(&self, paper: bool) -> Result<()> {
        anyhow::ensure!(
            self.gateio.capital > Decimal::ZERO,
            "capital must be greater than 0"
        );

        anyhow::ensure!(self.gateio.leverage >= 1, "leverage must be >= 1");

        if !paper {
            anyhow::ensure!(
                !self.gateio.api_key.is_empty() && !self.gateio.secret.is_empty(),
                "gateio.apiKey and gateio.secret are required for live trading"
            );
        }

        anyhow::ensure!(
            !self.trading.allowed_token.trim().is_empty(),
            "trading.allowed_token must not be empty"
        );

        anyhow::ensure!(self.server.port != 0, "server.port must be non-zero");

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateio: GateioConfig::default(),
            trading: TradingConfig::default(),
            server: ServerConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }
}

impl Default for GateioConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret: String::new(),
            capital: default_capital(),
            leverage: default_leverage(),
            testnet: false,
            base_url: None,
            settle: default_settle(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            allowed_token: default_allowed_token(),
            quote: default_quote(),
            honor_payload_symbol: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            enabled: default_notifier_enabled(),
        }
    }
}
