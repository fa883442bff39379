//! In-memory exchange for paper trading and tests.
//!
//! Positions, leverage and fills are simulated locally. Market data comes
//! either from values seeded with the `with_*` builders or, in paper
//! trading, from an upstream adapter such as the live [`GateClient`].
//!
//! Every adapter call is recorded in order so tests can assert on call
//! sequences. Individual operations can be made to fail or to stall.
//!
//! [`GateClient`]: super::GateClient

use super::traits::ExchangeAdapter;
use super::types::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Adapter operation, used for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    LoadMarket,
    FetchPositions,
    FetchTicker,
    SetLeverage,
    CreateOrder,
}

/// A recorded adapter call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeCall {
    LoadMarket(String),
    FetchPositions(String),
    FetchTicker(String),
    SetLeverage { symbol: String, leverage: u8 },
    CreateOrder(MarketOrder),
}

impl ExchangeCall {
    pub fn operation(&self) -> Operation {
        match self {
            ExchangeCall::LoadMarket(_) => Operation::LoadMarket,
            ExchangeCall::FetchPositions(_) => Operation::FetchPositions,
            ExchangeCall::FetchTicker(_) => Operation::FetchTicker,
            ExchangeCall::SetLeverage { .. } => Operation::SetLeverage,
            ExchangeCall::CreateOrder(_) => Operation::CreateOrder,
        }
    }
}

/// Simulated account state.
#[derive(Debug, Default)]
pub struct MockTradingState {
    /// Signed position size per symbol in base units
    pub positions: HashMap<String, Decimal>,
    pub entry_prices: HashMap<String, Decimal>,
    pub leverage: HashMap<String, u8>,
    pub prices: HashMap<String, Decimal>,
    pub markets: HashMap<String, MarketInfo>,
    pub calls: Vec<ExchangeCall>,
    pub failures: HashSet<Operation>,
    /// Delay applied after recording a call, before it takes effect
    pub latency: HashMap<Operation, Duration>,
}

/// Mock client that simulates a perpetual futures venue.
pub struct MockExchange {
    state: RwLock<MockTradingState>,
    upstream: Option<Arc<dyn ExchangeAdapter>>,
    order_id_counter: AtomicU64,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchange {
    /// Create an empty mock exchange.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockTradingState::default()),
            upstream: None,
            order_id_counter: AtomicU64::new(1),
        }
    }

    /// Paper exchange that reads tickers and contract specs from `upstream`
    /// while keeping positions and orders local.
    pub fn with_upstream(upstream: Arc<dyn ExchangeAdapter>) -> Self {
        Self {
            upstream: Some(upstream),
            ..Self::new()
        }
    }

    /// Seed trading rules for a symbol.
    pub fn with_market(mut self, market: MarketInfo) -> Self {
        self.state
            .get_mut()
            .markets
            .insert(market.symbol.clone(), market);
        self
    }

    /// Seed the last traded price for a symbol.
    pub fn with_price(mut self, symbol: &str, price: Decimal) -> Self {
        self.state
            .get_mut()
            .prices
            .insert(symbol.to_string(), price);
        self
    }

    /// Seed an existing position (signed base units).
    pub fn with_position(mut self, symbol: &str, contracts: Decimal) -> Self {
        self.state
            .get_mut()
            .positions
            .insert(symbol.to_string(), contracts);
        self
    }

    /// Make every call of `operation` fail.
    pub fn with_failure(mut self, operation: Operation) -> Self {
        self.state.get_mut().failures.insert(operation);
        self
    }

    /// Stall every call of `operation` for `delay` before it takes effect.
    pub fn with_latency(mut self, operation: Operation, delay: Duration) -> Self {
        self.state.get_mut().latency.insert(operation, delay);
        self
    }

    /// Update the simulated price.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.state
            .write()
            .await
            .prices
            .insert(symbol.to_string(), price);
    }

    /// All adapter calls in the order they were made.
    pub async fn calls(&self) -> Vec<ExchangeCall> {
        self.state.read().await.calls.clone()
    }

    /// Submitted orders in submission order.
    pub async fn orders(&self) -> Vec<MarketOrder> {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                ExchangeCall::CreateOrder(order) => Some(order.clone()),
                _ => None,
            })
            .collect()
    }

    /// Current signed position for a symbol.
    pub async fn position(&self, symbol: &str) -> Decimal {
        self.state
            .read()
            .await
            .positions
            .get(symbol)
            .copied()
            .unwrap_or_default()
    }

    /// Current leverage for a symbol, if set.
    pub async fn leverage(&self, symbol: &str) -> Option<u8> {
        self.state.read().await.leverage.get(symbol).copied()
    }

    /// Record a call, then fail or stall it if requested.
    async fn record(&self, call: ExchangeCall) -> Result<()> {
        let operation = call.operation();
        let delay = {
            let mut state = self.state.write().await;
            state.calls.push(call);
            if state.failures.contains(&operation) {
                anyhow::bail!("Simulated {:?} failure", operation);
            }
            state.latency.get(&operation).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchange {
    async fn load_market(&self, symbol: &str) -> Result<MarketInfo> {
        self.record(ExchangeCall::LoadMarket(symbol.to_string()))
            .await?;

        if let Some(market) = self.state.read().await.markets.get(symbol) {
            return Ok(market.clone());
        }

        let upstream = self
            .upstream
            .as_ref()
            .ok_or_else(|| anyhow!("Unknown market {}", symbol))?;
        let market = upstream.load_market(symbol).await?;
        self.state
            .write()
            .await
            .markets
            .insert(symbol.to_string(), market.clone());
        Ok(market)
    }

    async fn fetch_positions(&self, symbol: &str) -> Result<Vec<Position>> {
        self.record(ExchangeCall::FetchPositions(symbol.to_string()))
            .await?;

        let state = self.state.read().await;
        let positions = state
            .positions
            .get(symbol)
            .filter(|qty| !qty.is_zero())
            .map(|qty| Position {
                symbol: symbol.to_string(),
                contracts: *qty,
                entry_price: state.entry_prices.get(symbol).copied(),
            })
            .into_iter()
            .collect();
        Ok(positions)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.record(ExchangeCall::FetchTicker(symbol.to_string()))
            .await?;

        if let Some(upstream) = &self.upstream {
            let ticker = upstream.fetch_ticker(symbol).await?;
            self.set_price(symbol, ticker.last).await;
            return Ok(ticker);
        }

        let last = self
            .state
            .read()
            .await
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow!("No price for {}", symbol))?;

        Ok(Ticker {
            symbol: symbol.to_string(),
            last,
            mark_price: Some(last),
        })
    }

    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<()> {
        self.record(ExchangeCall::SetLeverage {
            symbol: symbol.to_string(),
            leverage,
        })
        .await?;

        self.state
            .write()
            .await
            .leverage
            .insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn create_market_order(&self, order: &MarketOrder) -> Result<OrderReceipt> {
        self.record(ExchangeCall::CreateOrder(order.clone())).await?;
        anyhow::ensure!(
            order.amount > Decimal::ZERO,
            "Order amount must be positive, got {}",
            order.amount
        );

        let mut state = self.state.write().await;
        let fill_price = state.prices.get(&order.symbol).copied();
        let current = state
            .positions
            .get(&order.symbol)
            .copied()
            .unwrap_or_default();

        let signed = match order.side {
            OrderSide::Buy => order.amount,
            OrderSide::Sell => -order.amount,
        };

        let filled = if order.reduce_only {
            let reduces = (current > Decimal::ZERO && signed < Decimal::ZERO)
                || (current < Decimal::ZERO && signed > Decimal::ZERO);
            anyhow::ensure!(
                reduces,
                "Reduce-only {} order for {} would not reduce position {}",
                order.side,
                order.symbol,
                current
            );
            order.amount.min(current.abs())
        } else {
            order.amount
        };

        let updated = match order.side {
            OrderSide::Buy => current + filled,
            OrderSide::Sell => current - filled,
        };

        if updated.is_zero() {
            state.positions.remove(&order.symbol);
            state.entry_prices.remove(&order.symbol);
        } else {
            if current.is_zero() || current.is_sign_negative() != updated.is_sign_negative() {
                if let Some(price) = fill_price {
                    state.entry_prices.insert(order.symbol.clone(), price);
                }
            }
            state.positions.insert(order.symbol.clone(), updated);
        }

        let id = self.order_id_counter.fetch_add(1, Ordering::SeqCst);
        debug!(
            symbol = %order.symbol,
            side = %order.side,
            amount = %filled,
            position = %updated,
            "Mock order filled"
        );
        info!(
            "[PAPER] {} {} {} @ {}",
            order.side,
            filled,
            order.symbol,
            fill_price.map(|p| p.to_string()).unwrap_or_else(|| "market".to_string())
        );

        Ok(OrderReceipt {
            id: format!("paper-{}", id),
            symbol: order.symbol.clone(),
            side: order.side,
            amount: filled,
            fill_price,
            status: "filled".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const ETH: &str = "ETH/USDT:USDT";

    fn eth_market() -> MarketInfo {
        MarketInfo {
            symbol: ETH.to_string(),
            id: "ETH_USDT".to_string(),
            contract_size: dec!(0.001),
            min_amount: dec!(0.001),
        }
    }

    #[tokio::test]
    async fn test_mock_order_execution() {
        let exchange = MockExchange::new()
            .with_market(eth_market())
            .with_price(ETH, dec!(2000));

        let receipt = exchange
            .create_market_order(&MarketOrder::new(ETH, OrderSide::Buy, dec!(0.5)))
            .await
            .unwrap();

        assert_eq!(receipt.amount, dec!(0.5));
        assert_eq!(receipt.fill_price, Some(dec!(2000)));
        assert_eq!(exchange.position(ETH).await, dec!(0.5));

        let positions = exchange.fetch_positions(ETH).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].entry_price, Some(dec!(2000)));
    }

    #[tokio::test]
    async fn test_close_position_reduces_to_zero() {
        let exchange = MockExchange::new()
            .with_price(ETH, dec!(2000))
            .with_position(ETH, dec!(-1));

        exchange
            .create_market_order(&MarketOrder::new(ETH, OrderSide::Buy, dec!(1)).reduce_only())
            .await
            .unwrap();

        assert_eq!(exchange.position(ETH).await, Decimal::ZERO);
        assert!(exchange.fetch_positions(ETH).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reduce_only_cannot_open() {
        let exchange = MockExchange::new().with_price(ETH, dec!(2000));

        let result = exchange
            .create_market_order(&MarketOrder::new(ETH, OrderSide::Sell, dec!(1)).reduce_only())
            .await;

        assert!(result.is_err());
        assert_eq!(exchange.position(ETH).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_failure_injection_still_records_call() {
        let exchange = MockExchange::new()
            .with_price(ETH, dec!(2000))
            .with_failure(Operation::FetchTicker);

        assert!(exchange.fetch_ticker(ETH).await.is_err());
        assert_eq!(
            exchange.calls().await,
            vec![ExchangeCall::FetchTicker(ETH.to_string())]
        );
    }

    #[tokio::test]
    async fn test_upstream_supplies_market_data() {
        let upstream = Arc::new(
            MockExchange::new()
                .with_market(eth_market())
                .with_price(ETH, dec!(2100)),
        );
        let paper = MockExchange::with_upstream(upstream.clone());

        let ticker = paper.fetch_ticker(ETH).await.unwrap();
        assert_eq!(ticker.last, dec!(2100));
        assert_eq!(paper.load_market(ETH).await.unwrap().min_amount, dec!(0.001));

        paper
            .create_market_order(&MarketOrder::new(ETH, OrderSide::Sell, dec!(0.2)))
            .await
            .unwrap();

        // Orders never reach the upstream venue
        assert!(upstream.orders().await.is_empty());
        assert_eq!(paper.position(ETH).await, dec!(-0.2));
    }

    #[tokio::test]
    async fn test_latency_stalls_after_recording() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_price(ETH, dec!(2000))
                .with_latency(Operation::FetchTicker, Duration::from_millis(200)),
        );

        let pending = tokio::spawn({
            let exchange = exchange.clone();
            async move { exchange.fetch_ticker(ETH).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Call is visible while it is still in flight
        assert_eq!(
            exchange.calls().await,
            vec![ExchangeCall::FetchTicker(ETH.to_string())]
        );
        assert!(!pending.is_finished());
        assert_eq!(pending.await.unwrap().unwrap().last, dec!(2000));
    }
}
