//! Venue-agnostic trading interface.
//!
//! The position manager only talks to the exchange through
//! [`ExchangeAdapter`], so the live REST client and the in-memory paper
//! exchange are interchangeable.

use super::types::{MarketInfo, MarketOrder, OrderReceipt, Position, Ticker};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Authenticated trading primitives of a single perpetuals venue.
///
/// All symbols are unified identifiers (`BASE/QUOTE:SETTLE`) and all
/// quantities are in base asset units.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Load trading rules (precision, minimum size) for a symbol.
    async fn load_market(&self, symbol: &str) -> anyhow::Result<MarketInfo>;

    /// Truncate `amount` to the precision the venue accepts for `symbol`.
    async fn amount_to_precision(&self, symbol: &str, amount: Decimal) -> anyhow::Result<Decimal> {
        let market = self.load_market(symbol).await?;
        Ok(market.amount_to_precision(amount))
    }

    /// Fetch open positions for a symbol. Flat symbols may return an empty
    /// list or zero-sized entries.
    async fn fetch_positions(&self, symbol: &str) -> anyhow::Result<Vec<Position>>;

    /// Fetch the latest ticker for a symbol.
    async fn fetch_ticker(&self, symbol: &str) -> anyhow::Result<Ticker>;

    /// Set leverage for a symbol. Idempotent.
    async fn set_leverage(&self, symbol: &str, leverage: u8) -> anyhow::Result<()>;

    /// Submit a market order.
    async fn create_market_order(&self, order: &MarketOrder) -> anyhow::Result<OrderReceipt>;
}
