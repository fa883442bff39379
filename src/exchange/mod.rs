//! Exchange integrations.
//!
//! ## Gate.io
//! Authenticated REST access to USDT-settled perpetual futures:
//! - Contract specs (quantity step, minimum size)
//! - Tickers
//! - Positions and leverage
//! - Market orders
//!
//! ## Paper
//! [`MockExchange`] simulates fills locally, optionally reading market data
//! from a live venue.

mod client;
pub mod mock;
mod traits;
mod types;

pub use client::{contract_id, GateClient};
pub use mock::{ExchangeCall, MockExchange, Operation};
pub use traits::ExchangeAdapter;
pub use types::*;
