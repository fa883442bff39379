//! Inbound webhook signals.
//!
//! TradingView alerts post a JSON body such as `{"action": "buy"}`. Only
//! `action` is required; other fields are ignored unless symbol override is
//! enabled in the trading config.

mod intake;

pub use intake::{IntakeError, IntakeOutcome, SignalIntake};

use crate::exchange::OrderSide;
use serde_json::Value;
use thiserror::Error;

/// Reasons a webhook body is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignalError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("missing action parameter")]
    MissingAction,

    #[error("unsupported action '{0}', expected buy or sell")]
    UnknownAction(String),
}

/// A validated trade signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeSignal {
    pub side: OrderSide,
    /// Raw `symbol` field from the payload, if any
    pub symbol: Option<String>,
}

impl TradeSignal {
    /// Parse a raw request body.
    pub fn from_slice(body: &[u8]) -> Result<Self, SignalError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| SignalError::InvalidJson(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Validate a decoded JSON body.
    pub fn from_value(value: &Value) -> Result<Self, SignalError> {
        let body = value.as_object().ok_or(SignalError::NotAnObject)?;

        let action = match body.get("action") {
            Some(action) if !is_falsy(action) => action,
            _ => return Err(SignalError::MissingAction),
        };

        let side = match action.as_str().map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "buy" => OrderSide::Buy,
            Some(s) if s == "sell" => OrderSide::Sell,
            Some(s) => return Err(SignalError::UnknownAction(s)),
            None => return Err(SignalError::UnknownAction(action.to_string())),
        };

        let symbol = body
            .get("symbol")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Self { side, symbol })
    }
}

/// JSON truthiness: null, false, 0, "" and empty containers are falsy.
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Whether `symbol` refers to the allowed instrument (case-insensitive).
pub fn is_allowed(symbol: &str, token: &str) -> bool {
    symbol.to_uppercase().contains(&token.to_uppercase())
}

/// Convert an exchange ticker to a unified perpetual symbol.
///
/// `ETHUSDT` becomes `ETH/USDT:USDT`, `FOO` becomes `FOO/USDT:USDT`, and
/// anything already containing `/` is returned unchanged.
pub fn normalize_symbol(symbol: &str, quote: &str) -> String {
    if symbol.contains('/') {
        return symbol.to_string();
    }

    let base = symbol
        .strip_suffix(quote)
        .filter(|base| !base.is_empty())
        .unwrap_or(symbol);
    format!("{}/{}:{}", base, quote, quote)
}
