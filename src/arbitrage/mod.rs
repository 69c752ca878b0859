//! Cross-chain arbitrage detection and execution

pub mod monitor;
pub mod opportunity;

pub use monitor::ArbitrageMonitor;
pub use opportunity::{find_opportunities, ArbitrageOpportunity, SpreadFilter, VenueQuote};
