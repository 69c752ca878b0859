//! Arbitrage leg: runs the monitor's cycle for one watched token on the
//! strategy's own schedule

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::types::{Strategy, StrategyContext, StrategyKind};
use crate::arbitrage::ArbitrageMonitor;
use crate::error::{Error, Result};

#[derive(Default)]
pub struct ArbitrageLeg {
    monitor: Option<Arc<ArbitrageMonitor>>,
    executed: u64,
}

impl ArbitrageLeg {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Strategy for ArbitrageLeg {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ArbitrageLeg
    }

    async fn init(&mut self, ctx: &StrategyContext) -> Result<()> {
        let monitor = ctx.services.arbitrage.clone().ok_or_else(|| {
            Error::InvalidConfiguration("arbitrage monitor is not enabled".to_string())
        })?;
        if !monitor.watches(&ctx.token) {
            return Err(Error::InvalidConfiguration(format!(
                "{} is not a watched arbitrage token",
                ctx.token
            )));
        }
        self.monitor = Some(monitor);
        Ok(())
    }

    async fn tick(&mut self, ctx: &StrategyContext) -> Result<()> {
        let Some(monitor) = &self.monitor else {
            return Err(Error::Internal("arbitrage leg not initialised".to_string()));
        };
        if monitor.run_cycle(Some(&ctx.token)).await?.is_some() {
            self.executed += 1;
        }
        Ok(())
    }

    async fn stop(&mut self, ctx: &StrategyContext) -> Result<()> {
        info!("Arbitrage leg for {} stopped after {} executions", ctx.token, self.executed);
        Ok(())
    }
}
