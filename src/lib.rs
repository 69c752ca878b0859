//! Cross-chain trader library
//!
//! Security screening, signal generation, MEV-aware execution, strategies,
//! position management and cross-chain arbitrage across several networks.

pub mod analytics;
pub mod arbitrage;
pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod feed;
pub mod position;
pub mod retry;
pub mod security;
pub mod signal;
pub mod strategy;
pub mod trader;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use trader::{Backends, Trader};
