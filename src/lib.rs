//! # Signal Relay
//!
//! Relays TradingView webhook alerts to Gate.io USDT perpetual futures.
//! Each `buy`/`sell` signal flattens the current position and opens a new
//! one sized from fixed capital and leverage.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Gate.io REST client and in-memory paper exchange
//! - `notify`: Best-effort chat notifications
//! - `trading`: Position replacement and sizing
//! - `signal`: Webhook payload validation and symbol normalization
//! - `server`: HTTP routes
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod exchange;
pub mod notify;
pub mod server;
pub mod signal;
pub mod trading;
pub mod utils;

pub use config::Config;
