//! MEV-aware order execution

pub mod executor;
pub mod mev;
pub mod wallet_lock;

pub use executor::{ExecutionReport, OrderExecutor};
pub use mev::{
    MempoolHeuristics, MempoolRisk, MempoolRiskEstimator, MempoolSource, MevProtector, PendingTx,
};
pub use wallet_lock::WalletLocks;
