//! Trade execution.
//!
//! Contains the core logic for:
//! - Reading the net position on a symbol
//! - Flattening existing positions
//! - Sizing new positions from fixed capital and leverage

mod position_manager;

pub use position_manager::{
    order_quantity, required_capital, OpenedPosition, PositionManager, PositionState, TradeError,
    TradeStage,
};
