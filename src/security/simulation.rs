//! Transaction simulation
//!
//! Orders are dry-run against chain state before anything is signed. The
//! honeypot check uses a simulated buy and sell; the arbitrage monitor
//! simulates both legs before execution.

use async_trait::async_trait;
use serde::Serialize;

use crate::chain::OrderRequest;
use crate::error::{Error, Result};

/// Outcome of a dry-run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationResult {
    pub success: bool,
    pub error: Option<String>,
    pub gas_used: Option<u64>,
    pub logs: Vec<String>,
}

impl SimulationResult {
    pub fn ok(gas_used: u64) -> Self {
        Self {
            success: true,
            gas_used: Some(gas_used),
            ..Default::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Convert a failed simulation into `SimulationFailure`
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(Error::SimulationFailure(
                self.error.unwrap_or_else(|| "simulation reported failure".to_string()),
            ))
        }
    }
}

#[async_trait]
pub trait TransactionSimulator: Send + Sync {
    async fn simulate(&self, order: &OrderRequest) -> Result<SimulationResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_simulation_maps_to_simulation_failure() {
        let err = SimulationResult::failed("TRANSFER_FROM_FAILED")
            .into_result()
            .unwrap_err();
        assert!(matches!(err, Error::SimulationFailure(ref m) if m == "TRANSFER_FROM_FAILED"));
        assert!(SimulationResult::ok(21_000).into_result().is_ok());
    }
}
