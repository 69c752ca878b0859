//! Mean-reversion strategy
//!
//! Buys when price sits more than `threshold` standard deviations below its
//! moving average and sells when it sits that far above.

use async_trait::async_trait;
use tracing::{debug, info};

use super::history::PriceHistory;
use super::types::{
    Strategy, StrategyConfig, StrategyContext, StrategyKind, DEFAULT_DEVIATION_THRESHOLD,
    DEFAULT_MEAN_PERIOD,
};
use crate::error::Result;
use crate::position::PositionState;
use crate::signal::indicators::mean_std;

pub struct MeanReversion {
    config: StrategyConfig,
    period: usize,
    threshold: f64,
    history: PriceHistory,
}

impl MeanReversion {
    pub fn new(config: StrategyConfig) -> Self {
        let period = config.period.unwrap_or(DEFAULT_MEAN_PERIOD);
        Self {
            threshold: config.threshold.unwrap_or(DEFAULT_DEVIATION_THRESHOLD),
            history: PriceHistory::new(config.window().max(period)),
            period,
            config,
        }
    }
}

/// Z-score of the latest price against the trailing `period` samples
pub fn deviation(prices: &[f64], period: usize) -> Option<f64> {
    if period < 2 || prices.len() < period {
        return None;
    }
    let window = &prices[prices.len() - period..];
    let (mean, std) = mean_std(window)?;
    if std <= f64::EPSILON {
        return None;
    }
    let latest = *window.last()?;
    Some((latest - mean) / std)
}

#[async_trait]
impl Strategy for MeanReversion {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MeanReversion
    }

    async fn init(&mut self, ctx: &StrategyContext) -> Result<()> {
        self.history.push(ctx.price().await?);
        info!(
            "Mean reversion on {}:{} (period {}, threshold {}σ)",
            ctx.network, ctx.token, self.period, self.threshold
        );
        Ok(())
    }

    async fn tick(&mut self, ctx: &StrategyContext) -> Result<()> {
        self.history.push(ctx.price().await?);
        let Some(z) = deviation(&self.history.prices(), self.period) else {
            return Ok(());
        };

        let position = ctx.position().await;
        if z <= -self.threshold && position.is_none() {
            let amount = ctx.trade_amount(self.config.amount, self.history.volatility());
            if amount > 0.0 {
                info!("Mean reversion buy on {}:{} (z = {:.2})", ctx.network, ctx.token, z);
                ctx.open_position(amount).await?;
            }
        } else if z >= self.threshold
            && position.is_some_and(|p| p.state == PositionState::Open)
        {
            info!("Mean reversion sell on {}:{} (z = {:.2})", ctx.network, ctx.token, z);
            ctx.close_position().await?;
        } else {
            debug!("Mean reversion hold on {}:{} (z = {:.2})", ctx.network, ctx.token, z);
        }
        Ok(())
    }

    async fn stop(&mut self, _ctx: &StrategyContext) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::paper::{PaperMarket, TokenProfile};
    use crate::config::Config;
    use crate::trader::{Backends, Trader};
    use crate::types::{Network, Side};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    async fn is_open(trader: &Trader, token: &str) -> bool {
        trader
            .positions()
            .get_position(Network::Bsc, token)
            .await
            .is_some_and(|p| p.state == PositionState::Open)
    }

    #[test]
    fn test_deviation_needs_full_period() {
        assert_eq!(deviation(&[1.0, 2.0], 3), None);
        assert_eq!(deviation(&[1.0, 1.0, 1.0], 3), None);
    }

    #[test]
    fn test_deviation_sign() {
        let mut prices = vec![10.0; 19];
        prices.push(7.0);
        let z = deviation(&prices, 20).unwrap();
        assert!(z < -2.0, "z = {}", z);

        let mut prices = vec![10.0; 19];
        prices.push(13.0);
        assert!(deviation(&prices, 20).unwrap() > 2.0);
    }

    #[test]
    fn test_deviation_uses_trailing_window() {
        // Old outlier falls outside the period
        let mut prices = vec![100.0];
        prices.extend([10.0, 11.0, 10.0, 11.0]);
        let z = deviation(&prices, 4).unwrap();
        assert!((z - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_trades_the_stretch_back_to_the_mean() {
        const TOKEN: &str = "0xrevert";
        let market = Arc::new(PaperMarket::new(9));
        market.set_profile(Network::Bsc, TOKEN, TokenProfile::clean(10.0));
        let trader = Trader::new(
            Config::default(),
            Backends::paper(market.clone(), Duration::from_millis(10)),
        );
        let config = StrategyConfig {
            amount: Some(1.0),
            interval_ms: Some(5),
            period: Some(5),
            threshold: Some(1.5),
            ..StrategyConfig::for_token(TOKEN)
        };
        let id = trader
            .engine()
            .start_strategy(StrategyKind::MeanReversion, Network::Bsc, config)
            .await
            .unwrap();

        // A flat series has no deviation to act on
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(market.fills().is_empty());

        // Four samples at 10 then one at 8 is two deviations low
        market.set_price(Network::Bsc, TOKEN, 8.0).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !is_open(&trader, TOKEN).await && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(is_open(&trader, TOKEN).await);

        // Let the window settle at 8, then stretch two deviations high
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(market.fills().len(), 1);
        market.set_price(Network::Bsc, TOKEN, 11.0).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while market.fills().len() < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let sides: Vec<Side> = market.fills().iter().map(|f| f.order.side).collect();
        assert_eq!(sides, vec![Side::Buy, Side::Sell]);
        trader.engine().stop_strategy(&id).await.unwrap();
    }
}
