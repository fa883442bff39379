//! Position replacement and sizing.
//!
//! Every signal flattens whatever is open on the symbol and then opens a
//! fresh position sized from fixed capital and leverage. Position direction
//! is never tracked locally; it is re-read from the exchange each time.

use crate::config::GateioConfig;
use crate::exchange::{ExchangeAdapter, MarketOrder, OrderReceipt, OrderSide, Position};
use crate::notify::Notifier;
use crate::utils::safe_div;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

/// Net exposure on a symbol as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Flat,
    Long(Decimal),
    Short(Decimal),
}

impl PositionState {
    /// Net the signed quantities of all reported positions.
    pub fn from_positions(positions: &[Position]) -> Self {
        let net: Decimal = positions.iter().map(|p| p.contracts).sum();
        if net > Decimal::ZERO {
            PositionState::Long(net)
        } else if net < Decimal::ZERO {
            PositionState::Short(net.abs())
        } else {
            PositionState::Flat
        }
    }

    /// Reduce-only order that flattens this state.
    pub fn closing_order(&self, symbol: &str) -> Option<MarketOrder> {
        match *self {
            PositionState::Flat => None,
            PositionState::Long(qty) => {
                Some(MarketOrder::new(symbol, OrderSide::Sell, qty).reduce_only())
            }
            PositionState::Short(qty) => {
                Some(MarketOrder::new(symbol, OrderSide::Buy, qty).reduce_only())
            }
        }
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionState::Flat => f.write_str("flat"),
            PositionState::Long(qty) => write!(f, "long {}", qty),
            PositionState::Short(qty) => write!(f, "short {}", qty),
        }
    }
}

/// Exchange step at which an open attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStage {
    SetLeverage,
    FetchPrice,
    Precision,
    LoadMarket,
    SubmitOrder,
}

impl fmt::Display for TradeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TradeStage::SetLeverage => "set leverage",
            TradeStage::FetchPrice => "fetch price",
            TradeStage::Precision => "amount precision",
            TradeStage::LoadMarket => "load market",
            TradeStage::SubmitOrder => "submit order",
        };
        f.write_str(name)
    }
}

/// Why a position could not be opened.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error("{stage} failed: {error:#}")]
    Exchange {
        stage: TradeStage,
        error: anyhow::Error,
    },

    #[error("invalid price {price} for {symbol}")]
    InvalidPrice { symbol: String, price: Decimal },

    #[error(
        "insufficient quantity: {amount:.4} < {min_amount}, need at least {required_capital:.2}U capital"
    )]
    BelowMinimum {
        amount: Decimal,
        min_amount: Decimal,
        required_capital: Decimal,
    },

    #[error("order quantity for {symbol} rounds to zero")]
    ZeroQuantity { symbol: String },
}

impl TradeError {
    fn exchange(stage: TradeStage) -> impl FnOnce(anyhow::Error) -> Self {
        move |error| TradeError::Exchange { stage, error }
    }
}

/// A successfully opened position.
#[derive(Debug, Clone)]
pub struct OpenedPosition {
    pub symbol: String,
    pub side: OrderSide,
    /// Reference price used for sizing (last trade)
    pub price: Decimal,
    pub amount: Decimal,
    pub leverage: u8,
    pub capital: Decimal,
    /// Whether an existing position was flattened first
    pub replaced_existing: bool,
    pub order: OrderReceipt,
}

/// Raw order quantity for a fixed capital budget.
pub fn order_quantity(capital: Decimal, leverage: u8, price: Decimal) -> Decimal {
    safe_div(capital * Decimal::from(leverage), price)
}

/// Capital needed for `min_amount` to be affordable at `price`.
pub fn required_capital(min_amount: Decimal, price: Decimal, leverage: u8) -> Decimal {
    safe_div(min_amount * price, Decimal::from(leverage))
}

/// Closes and opens positions on a single exchange.
pub struct PositionManager {
    exchange: Arc<dyn ExchangeAdapter>,
    notifier: Arc<dyn Notifier>,
    capital: Decimal,
    leverage: u8,
    /// One lock per symbol around the close-then-open sequence
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PositionManager {
    pub fn new(
        exchange: Arc<dyn ExchangeAdapter>,
        notifier: Arc<dyn Notifier>,
        config: &GateioConfig,
    ) -> Self {
        Self {
            exchange,
            notifier,
            capital: config.capital,
            leverage: config.leverage,
            locks: DashMap::new(),
        }
    }

    fn symbol_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        self.locks.entry(symbol.to_string()).or_default().clone()
    }

    /// Forget a symbol's lock once nobody holds or waits on it.
    fn release_lock(&self, symbol: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks
            .remove_if(symbol, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Re-fetch positions and reduce them to a net state.
    pub async fn position_state(&self, symbol: &str) -> anyhow::Result<PositionState> {
        let positions = self.exchange.fetch_positions(symbol).await?;
        Ok(PositionState::from_positions(&positions))
    }

    /// Flatten any open position on `symbol`.
    ///
    /// Returns whether a closing order was placed. Exchange errors are
    /// logged and reported as `false`.
    pub async fn close_position(&self, symbol: &str) -> bool {
        let lock = self.symbol_lock(symbol);
        let closed = {
            let _guard = lock.lock().await;
            self.close_unlocked(symbol).await
        };
        self.release_lock(symbol, lock);
        closed
    }

    async fn close_unlocked(&self, symbol: &str) -> bool {
        let state = match self.position_state(symbol).await {
            Ok(state) => state,
            Err(e) => {
                error!(%symbol, error = %format!("{:#}", e), "Failed to close position");
                return false;
            }
        };

        let Some(order) = state.closing_order(symbol) else {
            return false;
        };

        match self.exchange.create_market_order(&order).await {
            Ok(receipt) => {
                info!(
                    %symbol,
                    %state,
                    order_id = %receipt.id,
                    amount = %order.amount,
                    "Position closed"
                );
                let side = match state {
                    PositionState::Short(_) => "short",
                    _ => "long",
                };
                self.notifier
                    .notify(&format!("Closed position: {} {} {}", symbol, side, order.amount))
                    .await;
                true
            }
            Err(e) => {
                error!(%symbol, %state, error = %format!("{:#}", e), "Failed to close position");
                false
            }
        }
    }

    /// Replace whatever is open on `symbol` with a fresh position on `side`.
    ///
    /// The whole sequence runs under the symbol's lock, so concurrent
    /// signals for one symbol are applied one after another.
    #[instrument(skip(self), fields(capital = %self.capital, leverage = self.leverage))]
    pub async fn open_position(
        &self,
        side: OrderSide,
        symbol: &str,
    ) -> Result<OpenedPosition, TradeError> {
        let lock = self.symbol_lock(symbol);
        let result = {
            let _guard = lock.lock().await;
            let result = self.open_unlocked(side, symbol).await;
            self.report_open(side, symbol, &result).await;
            result
        };
        self.release_lock(symbol, lock);
        result
    }

    async fn report_open(
        &self,
        side: OrderSide,
        symbol: &str,
        result: &Result<OpenedPosition, TradeError>,
    ) {
        match result {
            Ok(opened) => {
                info!(
                    %symbol,
                    %side,
                    amount = %opened.amount,
                    price = %opened.price,
                    order_id = %opened.order.id,
                    "Position opened"
                );
                self.notifier.notify(&success_message(opened)).await;
            }
            Err(e @ TradeError::BelowMinimum { .. }) => {
                warn!(%symbol, %side, "{}", e);
                self.notifier.notify(&format!("⚠️ {}", e)).await;
            }
            Err(e) => {
                error!(%symbol, %side, error = %e, "Failed to open position");
                self.notifier
                    .notify(&format!("Trade failed: {} {} - {}", symbol, side, e))
                    .await;
            }
        }
    }

    async fn open_unlocked(
        &self,
        side: OrderSide,
        symbol: &str,
    ) -> Result<OpenedPosition, TradeError> {
        self.exchange
            .set_leverage(symbol, self.leverage)
            .await
            .map_err(TradeError::exchange(TradeStage::SetLeverage))?;

        let replaced_existing = self.close_unlocked(symbol).await;

        let ticker = self
            .exchange
            .fetch_ticker(symbol)
            .await
            .map_err(TradeError::exchange(TradeStage::FetchPrice))?;
        let price = ticker.last;
        if price <= Decimal::ZERO {
            return Err(TradeError::InvalidPrice {
                symbol: symbol.to_string(),
                price,
            });
        }

        let raw_amount = order_quantity(self.capital, self.leverage, price);
        let amount = self
            .exchange
            .amount_to_precision(symbol, raw_amount)
            .await
            .map_err(TradeError::exchange(TradeStage::Precision))?;

        let market = self
            .exchange
            .load_market(symbol)
            .await
            .map_err(TradeError::exchange(TradeStage::LoadMarket))?;

        if market.min_amount > Decimal::ZERO && amount < market.min_amount {
            return Err(TradeError::BelowMinimum {
                amount,
                min_amount: market.min_amount,
                required_capital: required_capital(market.min_amount, price, self.leverage),
            });
        }

        if amount <= Decimal::ZERO {
            return Err(TradeError::ZeroQuantity {
                symbol: symbol.to_string(),
            });
        }

        let order = self
            .exchange
            .create_market_order(&MarketOrder::new(symbol, side, amount))
            .await
            .map_err(TradeError::exchange(TradeStage::SubmitOrder))?;

        Ok(OpenedPosition {
            symbol: symbol.to_string(),
            side,
            price,
            amount,
            leverage: self.leverage,
            capital: self.capital,
            replaced_existing,
            order,
        })
    }
}

fn success_message(opened: &OpenedPosition) -> String {
    format!(
        "Trade executed:\n{}\nSide: {}\nPrice: {}\nAmount: {}\nLeverage: {}x\nCapital: {}U",
        opened.symbol, opened.side, opened.price, opened.amount, opened.leverage, opened.capital
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ExchangeCall, MarketInfo, MockExchange, Operation};
    use async_trait::async_trait;
    use mockall::mock;
    use mockall::predicate::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const ETH: &str = "ETH/USDT:USDT";

    mock! {
        pub Sink {}

        #[async_trait]
        impl Notifier for Sink {
            async fn notify(&self, message: &str);
        }
    }

    fn eth_market(min_amount: Decimal) -> MarketInfo {
        MarketInfo {
            symbol: ETH.to_string(),
            id: "ETH_USDT".to_string(),
            contract_size: dec!(0.001),
            min_amount,
        }
    }

    fn sizing() -> GateioConfig {
        GateioConfig {
            capital: dec!(30),
            leverage: 3,
            ..GateioConfig::default()
        }
    }

    fn manager(exchange: Arc<MockExchange>, notifier: MockSink) -> PositionManager {
        PositionManager::new(exchange, Arc::new(notifier), &sizing())
    }

    #[test]
    fn test_order_quantity() {
        assert_eq!(order_quantity(dec!(30), 3, dec!(2000)), dec!(0.045));
        assert_eq!(order_quantity(dec!(30), 3, Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_required_capital() {
        let required = required_capital(dec!(0.05), dec!(2000), 3);
        assert_eq!(required.round_dp(2), dec!(33.33));
    }

    #[test]
    fn test_position_state_nets_positions() {
        let pos = |qty| Position {
            symbol: ETH.to_string(),
            contracts: qty,
            entry_price: None,
        };

        assert_eq!(PositionState::from_positions(&[]), PositionState::Flat);
        assert_eq!(
            PositionState::from_positions(&[pos(dec!(0.3))]),
            PositionState::Long(dec!(0.3))
        );
        assert_eq!(
            PositionState::from_positions(&[pos(dec!(0.1)), pos(dec!(-0.4))]),
            PositionState::Short(dec!(0.3))
        );
    }

    #[test]
    fn test_closing_order_is_opposite_and_reduce_only() {
        let order = PositionState::Long(dec!(0.5)).closing_order(ETH).unwrap();
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.amount, dec!(0.5));
        assert!(order.reduce_only);

        assert!(PositionState::Flat.closing_order(ETH).is_none());
    }

    #[tokio::test]
    async fn test_open_from_flat() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_market(eth_market(dec!(0.001)))
                .with_price(ETH, dec!(2000)),
        );
        let mut notifier = MockSink::new();
        notifier
            .expect_notify()
            .withf(|message: &str| message.starts_with("Trade executed:") && message.contains("0.045"))
            .times(1)
            .return_const(());

        let manager = manager(exchange.clone(), notifier);
        let opened = manager.open_position(OrderSide::Buy, ETH).await.unwrap();

        assert_eq!(opened.amount, dec!(0.045));
        assert_eq!(opened.price, dec!(2000));
        assert!(!opened.replaced_existing);
        assert_eq!(exchange.leverage(ETH).await, Some(3));
        assert_eq!(
            exchange.orders().await,
            vec![MarketOrder::new(ETH, OrderSide::Buy, dec!(0.045))]
        );
    }

    #[tokio::test]
    async fn test_open_replaces_opposite_position() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_market(eth_market(dec!(0.001)))
                .with_price(ETH, dec!(2000))
                .with_position(ETH, dec!(-0.2)),
        );
        let mut notifier = MockSink::new();
        notifier
            .expect_notify()
            .with(eq("Closed position: ETH/USDT:USDT short 0.2"))
            .times(1)
            .return_const(());
        notifier
            .expect_notify()
            .withf(|message: &str| message.starts_with("Trade executed:"))
            .times(1)
            .return_const(());

        let manager = manager(exchange.clone(), notifier);
        let opened = manager.open_position(OrderSide::Buy, ETH).await.unwrap();

        assert!(opened.replaced_existing);
        let orders = exchange.orders().await;
        assert_eq!(orders.len(), 2);
        assert_eq!(
            orders[0],
            MarketOrder::new(ETH, OrderSide::Buy, dec!(0.2)).reduce_only()
        );
        assert_eq!(orders[1], MarketOrder::new(ETH, OrderSide::Buy, dec!(0.045)));
        assert_eq!(exchange.position(ETH).await, dec!(0.045));
    }

    #[tokio::test]
    async fn test_same_direction_still_closes_and_reopens() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_market(eth_market(dec!(0.001)))
                .with_price(ETH, dec!(2000))
                .with_position(ETH, dec!(0.1)),
        );
        let mut notifier = MockSink::new();
        notifier.expect_notify().times(2).return_const(());

        let manager = manager(exchange.clone(), notifier);
        manager.open_position(OrderSide::Buy, ETH).await.unwrap();

        let orders = exchange.orders().await;
        assert_eq!(orders[0].side, OrderSide::Sell);
        assert!(orders[0].reduce_only);
        assert_eq!(exchange.position(ETH).await, dec!(0.045));
    }

    #[tokio::test]
    async fn test_below_minimum_places_no_order() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_market(eth_market(dec!(0.05)))
                .with_price(ETH, dec!(2000)),
        );
        let mut notifier = MockSink::new();
        notifier
            .expect_notify()
            .withf(|message: &str| message.contains("33.33") && message.contains("0.05"))
            .times(1)
            .return_const(());

        let manager = manager(exchange.clone(), notifier);
        let err = manager.open_position(OrderSide::Buy, ETH).await.unwrap_err();

        match err {
            TradeError::BelowMinimum {
                amount,
                min_amount,
                required_capital,
            } => {
                assert_eq!(amount, dec!(0.045));
                assert_eq!(min_amount, dec!(0.05));
                assert_eq!(required_capital.round_dp(2), dec!(33.33));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(exchange.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_below_minimum_still_closes_existing() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_market(eth_market(dec!(0.05)))
                .with_price(ETH, dec!(2000))
                .with_position(ETH, dec!(0.5)),
        );
        let mut notifier = MockSink::new();
        notifier.expect_notify().times(2).return_const(());

        let manager = manager(exchange.clone(), notifier);
        assert!(manager.open_position(OrderSide::Sell, ETH).await.is_err());

        let orders = exchange.orders().await;
        assert_eq!(orders.len(), 1);
        assert!(orders[0].reduce_only);
        assert_eq!(exchange.position(ETH).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_leverage_failure_aborts_before_any_order() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_market(eth_market(dec!(0.001)))
                .with_price(ETH, dec!(2000))
                .with_failure(Operation::SetLeverage),
        );
        let mut notifier = MockSink::new();
        notifier
            .expect_notify()
            .withf(|message: &str| message.starts_with("Trade failed: ETH/USDT:USDT buy"))
            .times(1)
            .return_const(());

        let manager = manager(exchange.clone(), notifier);
        let err = manager.open_position(OrderSide::Buy, ETH).await.unwrap_err();

        assert!(matches!(
            err,
            TradeError::Exchange {
                stage: TradeStage::SetLeverage,
                ..
            }
        ));
        assert_eq!(exchange.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_close_failure_is_not_fatal() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_market(eth_market(dec!(0.001)))
                .with_price(ETH, dec!(2000))
                .with_failure(Operation::FetchPositions),
        );
        let mut notifier = MockSink::new();
        notifier.expect_notify().times(1).return_const(());

        let manager = manager(exchange.clone(), notifier);
        assert!(!manager.close_position(ETH).await);

        let opened = manager.open_position(OrderSide::Sell, ETH).await.unwrap();
        assert!(!opened.replaced_existing);
        assert_eq!(exchange.position(ETH).await, dec!(-0.045));
    }

    #[tokio::test]
    async fn test_order_failure_is_reported() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_market(eth_market(dec!(0.001)))
                .with_price(ETH, dec!(2000))
                .with_failure(Operation::CreateOrder),
        );
        let mut notifier = MockSink::new();
        notifier
            .expect_notify()
            .withf(|message: &str| message.contains("submit order failed"))
            .times(1)
            .return_const(());

        let manager = manager(exchange.clone(), notifier);
        let err = manager.open_position(OrderSide::Buy, ETH).await.unwrap_err();

        assert!(matches!(
            err,
            TradeError::Exchange {
                stage: TradeStage::SubmitOrder,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_call_sequence() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_market(eth_market(dec!(0.001)))
                .with_price(ETH, dec!(2000)),
        );
        let mut notifier = MockSink::new();
        notifier.expect_notify().return_const(());

        let manager = manager(exchange.clone(), notifier);
        manager.open_position(OrderSide::Buy, ETH).await.unwrap();

        let operations: Vec<Operation> = exchange
            .calls()
            .await
            .iter()
            .map(ExchangeCall::operation)
            .collect();
        assert_eq!(
            operations,
            vec![
                Operation::SetLeverage,
                Operation::FetchPositions,
                Operation::FetchTicker,
                Operation::LoadMarket,
                Operation::LoadMarket,
                Operation::CreateOrder,
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_price_places_no_order() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_market(eth_market(dec!(0.001)))
                .with_price(ETH, Decimal::ZERO),
        );
        let mut notifier = MockSink::new();
        notifier
            .expect_notify()
            .withf(|message: &str| {
                message.starts_with("Trade failed: ETH/USDT:USDT buy") && message.contains("invalid price")
            })
            .times(1)
            .return_const(());

        let manager = manager(exchange.clone(), notifier);
        let err = manager.open_position(OrderSide::Buy, ETH).await.unwrap_err();

        assert!(matches!(err, TradeError::InvalidPrice { price, .. } if price.is_zero()));
        assert!(exchange.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_quantity_truncated_to_zero_places_no_order() {
        // Whole-unit contracts with no venue minimum: 0.045 truncates to 0
        let market = MarketInfo {
            contract_size: dec!(1),
            ..eth_market(Decimal::ZERO)
        };
        let exchange = Arc::new(
            MockExchange::new()
                .with_market(market)
                .with_price(ETH, dec!(2000)),
        );
        let mut notifier = MockSink::new();
        notifier
            .expect_notify()
            .withf(|message: &str| {
                message.starts_with("Trade failed: ETH/USDT:USDT sell") && message.contains("rounds to zero")
            })
            .times(1)
            .return_const(());

        let manager = manager(exchange.clone(), notifier);
        let err = manager.open_position(OrderSide::Sell, ETH).await.unwrap_err();

        assert!(matches!(err, TradeError::ZeroQuantity { .. }));
        assert!(exchange.orders().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_signals_do_not_stack() {
        // Stall between reading positions and ordering, so unserialized
        // signals would all see a flat book and each open a position.
        let exchange = Arc::new(
            MockExchange::new()
                .with_market(eth_market(dec!(0.001)))
                .with_price(ETH, dec!(2000))
                .with_latency(Operation::FetchTicker, Duration::from_millis(100)),
        );
        let mut notifier = MockSink::new();
        notifier.expect_notify().return_const(());
        let manager = Arc::new(manager(exchange.clone(), notifier));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.open_position(OrderSide::Buy, ETH).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(exchange.position(ETH).await, dec!(0.045));

        // One open from flat, then close-and-reopen for each later signal
        let orders = exchange.orders().await;
        assert_eq!(orders.len(), 7);
        assert_eq!(orders.iter().filter(|o| o.reduce_only).count(), 3);
    }

    #[tokio::test]
    async fn test_symbol_locks_are_released() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_market(eth_market(dec!(0.001)))
                .with_price(ETH, dec!(2000)),
        );
        let mut notifier = MockSink::new();
        notifier.expect_notify().return_const(());
        let manager = manager(exchange.clone(), notifier);

        manager.open_position(OrderSide::Buy, ETH).await.unwrap();
        assert!(manager.close_position(ETH).await);
        // Unknown symbols fail but must not leave a lock behind either
        assert!(manager.open_position(OrderSide::Buy, "XETH/USDT:USDT").await.is_err());

        assert!(manager.locks.is_empty());
    }
}
