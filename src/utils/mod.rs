//! Shared utilities.

pub mod decimal;

pub use decimal::{round_down_to_lot, safe_div};
