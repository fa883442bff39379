//! Signal intake: validate, filter, normalize, dispatch.

use super::{is_allowed, normalize_symbol, SignalError, TradeSignal};
use crate::config::TradingConfig;
use crate::trading::{OpenedPosition, PositionManager, TradeError};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Result of a signal that passed validation.
#[derive(Debug, Clone)]
pub enum IntakeOutcome {
    Executed(OpenedPosition),
    /// Symbol is not the traded instrument; nothing was sent to the exchange
    Ignored { symbol: String, message: String },
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Invalid(#[from] SignalError),

    #[error(transparent)]
    Trade(#[from] TradeError),
}

/// Entry point for webhook bodies.
pub struct SignalIntake {
    trading: TradingConfig,
    manager: Arc<PositionManager>,
}

impl SignalIntake {
    pub fn new(trading: TradingConfig, manager: Arc<PositionManager>) -> Self {
        Self { trading, manager }
    }

    /// Symbol a signal trades: the configured instrument, or the payload's
    /// own symbol when overrides are enabled.
    pub fn target_symbol<'a>(&'a self, signal: &'a TradeSignal) -> &'a str {
        match &signal.symbol {
            Some(symbol) if self.trading.honor_payload_symbol => symbol,
            _ => &self.trading.symbol,
        }
    }

    /// Parse a raw webhook body and act on it.
    pub async fn handle(&self, body: &[u8]) -> Result<IntakeOutcome, IntakeError> {
        let signal = TradeSignal::from_slice(body)?;
        self.dispatch(&signal).await
    }

    /// Act on a validated signal.
    pub async fn dispatch(&self, signal: &TradeSignal) -> Result<IntakeOutcome, IntakeError> {
        let raw_symbol = self.target_symbol(signal);

        if !is_allowed(raw_symbol, &self.trading.allowed_token) {
            info!(symbol = %raw_symbol, "Ignoring signal for untraded symbol");
            return Ok(IntakeOutcome::Ignored {
                symbol: raw_symbol.to_string(),
                message: format!(
                    "Only {} trade signals are accepted",
                    self.trading.allowed_token.to_uppercase()
                ),
            });
        }

        let symbol = normalize_symbol(raw_symbol, &self.trading.quote);
        info!(%symbol, side = %signal.side, "Dispatching signal");

        let opened = self.manager.open_position(signal.side, &symbol).await?;
        Ok(IntakeOutcome::Executed(opened))
    }
}
