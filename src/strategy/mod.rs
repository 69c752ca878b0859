//! Strategy system
//!
//! - `engine` - registry and task lifecycle for running strategies
//! - `types` - the shared `Strategy` contract, configuration and context
//! - `pingpong`, `grid`, `momentum`, `mean_reversion`, `arbitrage_leg` - the
//!   strategy types
//! - `history` - rolling price window used by the polling strategies
//! - `sizing` - half-Kelly trade sizing

pub mod arbitrage_leg;
pub mod engine;
pub mod grid;
pub mod history;
pub mod mean_reversion;
pub mod momentum;
pub mod pingpong;
pub mod sizing;
pub mod types;

pub use engine::{StrategyCommand, StrategyEngine};
pub use grid::{GridBook, GridLevel};
pub use history::PriceHistory;
pub use sizing::KellySizer;
pub use types::{
    Strategy, StrategyConfig, StrategyContext, StrategyInfo, StrategyKind, StrategyServices,
    StrategyStatus,
};
