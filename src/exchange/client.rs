//! Gate.io APIv4 futures REST client.

use crate::config::GateioConfig;
use crate::exchange::traits::ExchangeAdapter;
use crate::exchange::types::*;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha512};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

const BASE_URL: &str = "https://api.gateio.ws";
const TESTNET_URL: &str = "https://fx-api-testnet.gateio.ws";
const API_PREFIX: &str = "/api/v4";

/// Client tag attached to every order (Gate.io requires the `t-` prefix).
const ORDER_TAG: &str = "t-signal-relay";

/// Gate.io USDT-settled perpetual futures client.
pub struct GateClient {
    http: Client,
    api_key: String,
    secret: String,
    base_url: String,
    settle: String,
    /// Contract specs keyed by unified symbol, loaded on first use
    markets: RwLock<HashMap<String, MarketInfo>>,
}

impl GateClient {
    /// Create a new Gate.io client from configuration.
    pub fn new(config: &GateioConfig) -> Result<Self> {
        let base_url = match &config.base_url {
            Some(url) => url.clone(),
            None if config.testnet => TESTNET_URL.to_string(),
            None => BASE_URL.to_string(),
        };
        Self::with_base_url(config, &base_url)
    }

    /// Create a client against an explicit REST host.
    pub fn with_base_url(config: &GateioConfig, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret: config.secret.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            settle: config.settle.to_lowercase(),
            markets: RwLock::new(HashMap::new()),
        })
    }

    /// Generate the HMAC-SHA512 signature for an authenticated request.
    ///
    /// The signed payload is `METHOD\nPATH\nQUERY\nhex(sha512(body))\nTIMESTAMP`.
    fn sign(&self, method: &Method, path: &str, query: &str, body: &str, timestamp: i64) -> String {
        let body_hash = hex::encode(Sha512::digest(body.as_bytes()));
        let payload = format!(
            "{}\n{}\n{}\n{}\n{}",
            method.as_str(),
            path,
            query,
            body_hash,
            timestamp
        );

        let mut mac = Hmac::<Sha512>::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query: &str,
        body: Option<String>,
        signed: bool,
    ) -> Result<T> {
        let path = format!("{}{}", API_PREFIX, endpoint);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json");

        if signed {
            let timestamp = chrono::Utc::now().timestamp();
            let signature =
                self.sign(&method, &path, query, body.as_deref().unwrap_or(""), timestamp);
            request = request
                .header("KEY", &self.api_key)
                .header("Timestamp", timestamp.to_string())
                .header("SIGN", signature);
        }

        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {} {}", method, path))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<GateApiError>(&text)
                .map(|e| e.to_string())
                .unwrap_or(text);
            anyhow::bail!("Gate.io API error {}: {}", status, detail);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", path))
    }

    /// Cached market for a symbol, loading it if needed.
    async fn market(&self, symbol: &str) -> Result<MarketInfo> {
        if let Some(market) = self.markets.read().await.get(symbol) {
            return Ok(market.clone());
        }

        let id = contract_id(symbol)?;
        let endpoint = format!("/futures/{}/contracts/{}", self.settle, id);
        let contract: GateContract = self
            .request(Method::GET, &endpoint, "", None, false)
            .await
            .with_context(|| format!("Failed to load contract {}", id))?;

        let market = MarketInfo {
            symbol: symbol.to_string(),
            id: contract.name,
            contract_size: contract.quanto_multiplier,
            min_amount: Decimal::from(contract.order_size_min) * contract.quanto_multiplier,
        };

        debug!(
            %symbol,
            contract_size = %market.contract_size,
            min_amount = %market.min_amount,
            "Loaded market"
        );

        self.markets
            .write()
            .await
            .insert(symbol.to_string(), market.clone());
        Ok(market)
    }
}

#[async_trait]
impl ExchangeAdapter for GateClient {
    #[instrument(skip(self))]
    async fn load_market(&self, symbol: &str) -> Result<MarketInfo> {
        self.market(symbol).await
    }

    #[instrument(skip(self))]
    async fn fetch_positions(&self, symbol: &str) -> Result<Vec<Position>> {
        let market = self.market(symbol).await?;
        let endpoint = format!("/futures/{}/positions", self.settle);
        let positions: Vec<GatePosition> = self
            .request(Method::GET, &endpoint, "holding=true", None, true)
            .await
            .context("Failed to fetch positions")?;

        let held: Vec<GatePosition> = positions
            .into_iter()
            .filter(|p| p.contract == market.id && p.size != 0)
            .collect();
        anyhow::ensure!(
            !held.iter().any(GatePosition::is_dual_mode),
            "{} is held in dual position mode; switch the account to single mode",
            market.id
        );

        Ok(held
            .into_iter()
            .map(|p| Position {
                symbol: symbol.to_string(),
                contracts: Decimal::from(p.size) * market.contract_size,
                entry_price: p.entry_price,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let id = contract_id(symbol)?;
        let endpoint = format!("/futures/{}/tickers", self.settle);
        let query = format!("contract={}", urlencoding::encode(&id));
        let tickers: Vec<GateTicker> = self
            .request(Method::GET, &endpoint, &query, None, false)
            .await
            .context("Failed to fetch ticker")?;

        let ticker = tickers
            .into_iter()
            .find(|t| t.contract == id)
            .ok_or_else(|| anyhow!("No ticker returned for {}", id))?;

        Ok(Ticker {
            symbol: symbol.to_string(),
            last: ticker.last,
            mark_price: ticker.mark_price,
        })
    }

    #[instrument(skip(self))]
    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<()> {
        let id = contract_id(symbol)?;
        let endpoint = format!("/futures/{}/positions/{}/leverage", self.settle, id);
        let query = format!("leverage={}", leverage);

        // Single mode answers with one position, dual mode with both legs.
        let response: serde_json::Value = self
            .request(Method::POST, &endpoint, &query, None, true)
            .await
            .context("Failed to set leverage")?;
        anyhow::ensure!(
            !is_dual_mode_response(&response),
            "{} is in dual position mode; switch the account to single mode",
            id
        );

        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_market_order(&self, order: &MarketOrder) -> Result<OrderReceipt> {
        let market = self.market(&order.symbol).await?;
        let contracts = (order.amount / market.contract_size)
            .trunc()
            .to_i64()
            .ok_or_else(|| anyhow!("Order amount {} out of range", order.amount))?;
        anyhow::ensure!(
            contracts > 0,
            "Order amount {} is below one contract ({})",
            order.amount,
            market.contract_size
        );

        let size = match order.side {
            OrderSide::Buy => contracts,
            OrderSide::Sell => -contracts,
        };
        let request = GateOrderRequest {
            contract: market.id.clone(),
            size,
            price: "0".to_string(),
            tif: "ioc".to_string(),
            reduce_only: order.reduce_only,
            text: ORDER_TAG.to_string(),
        };
        let body = serde_json::to_string(&request).context("Failed to encode order")?;

        debug!("Placing futures order: {:?}", request);

        let endpoint = format!("/futures/{}/orders", self.settle);
        let placed: GateOrder = self
            .request(Method::POST, &endpoint, "", Some(body), true)
            .await
            .context("Failed to place futures order")?;

        Ok(OrderReceipt {
            id: placed.id.to_string(),
            symbol: order.symbol.clone(),
            side: order.side,
            amount: Decimal::from(placed.size.abs()) * market.contract_size,
            fill_price: placed.fill_price.filter(|p| !p.is_zero()),
            status: placed.finish_as.unwrap_or(placed.status),
        })
    }
}

fn is_dual_mode_response(response: &serde_json::Value) -> bool {
    match response {
        serde_json::Value::Array(legs) => legs.len() > 1 || legs.iter().any(is_dual_mode_response),
        serde_json::Value::Object(position) => position
            .get("mode")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|mode| mode.starts_with("dual")),
        _ => false,
    }
}

/// Convert a unified symbol (`ETH/USDT:USDT`) to a Gate.io contract id
/// (`ETH_USDT`).
pub fn contract_id(symbol: &str) -> Result<String> {
    let pair = symbol.split(':').next().unwrap_or(symbol);
    let (base, quote) = pair
        .split_once('/')
        .ok_or_else(|| anyhow!("Symbol {} is not in BASE/QUOTE:SETTLE form", symbol))?;
    anyhow::ensure!(
        !base.is_empty() && !quote.is_empty(),
        "Symbol {} is missing base or quote",
        symbol
    );
    Ok(format!("{}_{}", base.to_uppercase(), quote.to_uppercase()))
}
