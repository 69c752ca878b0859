//! Momentum strategy driven by the combined indicator signal

use async_trait::async_trait;
use tracing::{debug, info};

use super::history::PriceHistory;
use super::types::{Strategy, StrategyConfig, StrategyContext, StrategyKind};
use crate::error::Result;
use crate::position::PositionState;

pub struct Momentum {
    config: StrategyConfig,
    history: PriceHistory,
}

impl Momentum {
    pub fn new(config: StrategyConfig, warmup: usize) -> Self {
        Self {
            history: PriceHistory::new(config.window().max(warmup)),
            config,
        }
    }
}

#[async_trait]
impl Strategy for Momentum {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Momentum
    }

    async fn init(&mut self, ctx: &StrategyContext) -> Result<()> {
        self.history.push(ctx.price().await?);
        info!(
            "Momentum on {}:{} (warmup {} samples)",
            ctx.network,
            ctx.token,
            ctx.services.signals.warmup_len()
        );
        Ok(())
    }

    async fn tick(&mut self, ctx: &StrategyContext) -> Result<()> {
        self.history.push(ctx.price().await?);
        if self.history.len() < ctx.services.signals.warmup_len() {
            return Ok(());
        }

        let signal = ctx.services.signals.evaluate(&self.history.prices());
        let position = ctx.position().await;

        if signal.should_buy() && position.is_none() {
            let amount = ctx.trade_amount(self.config.amount, self.history.volatility());
            if amount > 0.0 {
                info!(
                    "Momentum buy on {}:{} ({:.1}% confidence: {})",
                    ctx.network,
                    ctx.token,
                    signal.confidence,
                    signal.indicators.join(", ")
                );
                ctx.open_position(amount).await?;
            }
        } else if signal.should_sell()
            && position.is_some_and(|p| p.state == PositionState::Open)
        {
            info!(
                "Momentum sell on {}:{} ({:.1}% confidence)",
                ctx.network, ctx.token, signal.confidence
            );
            ctx.close_position().await?;
        } else {
            debug!("Momentum hold on {}:{} ({:?})", ctx.network, ctx.token, signal.direction);
        }
        Ok(())
    }

    async fn stop(&mut self, _ctx: &StrategyContext) -> Result<()> {
        Ok(())
    }
}
