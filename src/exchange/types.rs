//! Type definitions for the exchange adapter and Gate.io API payloads.
//!
//! Quantities in the venue-agnostic types are always expressed in base
//! asset units (e.g. ETH). Gate.io sizes futures in integer contracts; the
//! client converts using [`MarketInfo::contract_size`].

use crate::utils::round_down_to_lot;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open position as reported by the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    /// Signed size in base units (negative = short)
    pub contracts: Decimal,
    pub entry_price: Option<Decimal>,
}

/// Last traded price for a symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticker {
    pub symbol: String,
    pub last: Decimal,
    pub mark_price: Option<Decimal>,
}

/// Trading rules for an instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketInfo {
    /// Unified symbol, e.g. `ETH/USDT:USDT`
    pub symbol: String,
    /// Venue-native identifier, e.g. `ETH_USDT`
    pub id: String,
    /// Base units per contract; also the quantity step
    pub contract_size: Decimal,
    /// Minimum order quantity in base units (0 = no minimum)
    pub min_amount: Decimal,
}

impl MarketInfo {
    /// Truncate a quantity to the step the venue accepts.
    pub fn amount_to_precision(&self, amount: Decimal) -> Decimal {
        round_down_to_lot(amount, self.contract_size)
    }
}

/// Market order request in base units.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub amount: Decimal,
    /// Only reduce an existing position, never open a new one
    pub reduce_only: bool,
}

impl MarketOrder {
    pub fn new(symbol: impl Into<String>, side: OrderSide, amount: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            amount,
            reduce_only: false,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

/// Exchange acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReceipt {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub amount: Decimal,
    pub fill_price: Option<Decimal>,
    pub status: String,
}

// ==================== Gate.io APIv4 Futures Payloads ====================

/// Futures contract specification.
#[derive(Debug, Clone, Deserialize)]
pub struct GateContract {
    pub name: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub quanto_multiplier: Decimal,
    pub order_size_min: i64,
}

/// Futures ticker.
#[derive(Debug, Clone, Deserialize)]
pub struct GateTicker {
    pub contract: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub last: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub mark_price: Option<Decimal>,
}

/// Futures position; `size` is a signed contract count.
#[derive(Debug, Clone, Deserialize)]
pub struct GatePosition {
    pub contract: String,
    pub size: i64,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub entry_price: Option<Decimal>,
    /// `single`, or `dual_long`/`dual_short` in hedge mode
    #[serde(default)]
    pub mode: Option<String>,
}

impl GatePosition {
    pub fn is_dual_mode(&self) -> bool {
        self.mode.as_deref().is_some_and(|mode| mode.starts_with("dual"))
    }
}

/// Futures order request. Market orders use price `0` with `ioc`.
#[derive(Debug, Clone, Serialize)]
pub struct GateOrderRequest {
    pub contract: String,
    /// Signed contract count (positive = buy, negative = sell)
    pub size: i64,
    pub price: String,
    pub tif: String,
    pub reduce_only: bool,
    /// Client tag, must start with `t-`
    pub text: String,
}

/// Futures order as returned after submission.
#[derive(Debug, Clone, Deserialize)]
pub struct GateOrder {
    pub id: i64,
    pub size: i64,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub fill_price: Option<Decimal>,
    pub status: String,
    #[serde(default)]
    pub finish_as: Option<String>,
}

/// Error body returned by Gate.io on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct GateApiError {
    pub label: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl fmt::Display for GateApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) if !message.is_empty() => write!(f, "{}: {}", self.label, message),
            _ => f.write_str(&self.label),
        }
    }
}
