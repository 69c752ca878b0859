//! Position management module

pub mod exit;
pub mod manager;

pub use exit::{check_exit, ExitReason, ExitRules};
pub use manager::{DailyStats, Position, PositionManager, PositionState};
