//! Ping-pong strategy
//!
//! Buys a dip below the recent high, then waits for the profit target or the
//! loss limit and sells, over and over.

use async_trait::async_trait;
use tracing::{debug, info};

use super::history::PriceHistory;
use super::types::{Strategy, StrategyConfig, StrategyContext, StrategyKind};
use crate::config::NetworkConfig;
use crate::error::Result;
use crate::position::PositionState;
use crate::types::pct_change;

pub struct PingPong {
    config: StrategyConfig,
    min_profit: f64,
    max_loss: f64,
    history: PriceHistory,
}

impl PingPong {
    pub fn new(config: StrategyConfig, network: &NetworkConfig) -> Self {
        Self {
            min_profit: config.min_profit.unwrap_or(network.min_profit),
            max_loss: config.max_loss.unwrap_or(network.max_loss),
            history: PriceHistory::new(config.window()),
            config,
        }
    }
}

/// Whether `price` sits at least `min_dip_pct` below the window high
pub fn dip_triggered(history: &PriceHistory, price: f64, min_dip_pct: f64) -> bool {
    if history.len() < 2 {
        return false;
    }
    match history.high() {
        Some(high) if high > 0.0 => -pct_change(high, price) >= min_dip_pct,
        _ => false,
    }
}

/// Whether an open leg should be sold at `profit_pct`
pub fn exit_triggered(profit_pct: f64, min_profit: f64, max_loss: f64) -> bool {
    profit_pct >= min_profit || -profit_pct >= max_loss
}

#[async_trait]
impl Strategy for PingPong {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PingPong
    }

    async fn init(&mut self, ctx: &StrategyContext) -> Result<()> {
        let price = ctx.price().await?;
        self.history.push(price);
        info!(
            "Ping-pong on {}:{} (dip/profit {}%, max loss {}%)",
            ctx.network, ctx.token, self.min_profit, self.max_loss
        );
        Ok(())
    }

    async fn tick(&mut self, ctx: &StrategyContext) -> Result<()> {
        let price = ctx.price().await?;
        self.history.push(price);

        match ctx.position().await {
            Some(position) if position.state == PositionState::Open => {
                let profit = pct_change(position.entry_price, price);
                if exit_triggered(profit, self.min_profit, self.max_loss) {
                    info!("Ping-pong selling {}:{} at {:+.2}%", ctx.network, ctx.token, profit);
                    ctx.close_position().await?;
                }
            }
            Some(position) => {
                debug!("Ping-pong waiting on {:?} position {}", position.state, position.key);
            }
            None => {
                if dip_triggered(&self.history, price, self.min_profit) {
                    let amount = ctx.trade_amount(self.config.amount, self.history.volatility());
                    if amount <= 0.0 {
                        debug!("Ping-pong sized 0 for {}:{}, skipping", ctx.network, ctx.token);
                        return Ok(());
                    }
                    info!("Ping-pong buying dip on {}:{} at {}", ctx.network, ctx.token, price);
                    ctx.open_position(amount).await?;
                }
            }
        }
        Ok(())
    }

    async fn stop(&mut self, ctx: &StrategyContext) -> Result<()> {
        debug!("Ping-pong on {}:{} stopped", ctx.network, ctx.token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::paper::{PaperMarket, TokenProfile};
    use crate::config::Config;
    use crate::position::Position;
    use crate::trader::{Backends, Trader};
    use crate::types::{Network, Side};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    const TOKEN: &str = "0xpingpong";

    async fn position_when<F: Fn(Option<&Position>) -> bool>(trader: &Trader, check: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            let position = trader.positions().get_position(Network::Eth, TOKEN).await;
            if check(position.as_ref()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[test]
    fn test_dip_trigger() {
        let mut history = PriceHistory::new(10);
        history.push(100.0);
        assert!(!dip_triggered(&history, 100.0, 2.0));

        history.push(99.0);
        assert!(!dip_triggered(&history, 99.0, 2.0));
        history.push(97.5);
        assert!(dip_triggered(&history, 97.5, 2.0));
    }

    #[test]
    fn test_exit_trigger() {
        assert!(exit_triggered(2.0, 2.0, 5.0));
        assert!(exit_triggered(-5.0, 2.0, 5.0));
        assert!(!exit_triggered(1.0, 2.0, 5.0));
        assert!(!exit_triggered(-4.9, 2.0, 5.0));
    }

    #[tokio::test]
    async fn test_buys_the_dip_and_sells_the_bounce() {
        let market = Arc::new(PaperMarket::new(5));
        market.set_profile(Network::Eth, TOKEN, TokenProfile::clean(100.0));
        let trader = Trader::new(
            Config::default(),
            Backends::paper(market.clone(), Duration::from_millis(10)),
        );
        let config = StrategyConfig {
            amount: Some(2.0),
            interval_ms: Some(5),
            min_profit: Some(5.0),
            max_loss: Some(10.0),
            ..StrategyConfig::for_token(TOKEN)
        };
        let id = trader
            .engine()
            .start_strategy(StrategyKind::PingPong, Network::Eth, config)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(market.fills().is_empty());

        // 6% under the window high
        market.set_price(Network::Eth, TOKEN, 94.0).unwrap();
        assert!(position_when(&trader, |p| p.is_some_and(|p| p.state == PositionState::Open)).await);
        let position = trader.positions().get_position(Network::Eth, TOKEN).await.unwrap();
        assert_eq!(position.entry_price, 94.0);
        assert_eq!(position.amount, 2.0);

        // Below the profit target nothing happens
        market.set_price(Network::Eth, TOKEN, 97.0).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(market.fills().len(), 1);

        market.set_price(Network::Eth, TOKEN, 99.0).unwrap();
        assert!(position_when(&trader, |p| p.is_none()).await);
        let sides: Vec<Side> = market.fills().iter().map(|f| f.order.side).collect();
        assert_eq!(sides, vec![Side::Buy, Side::Sell]);
        assert!(trader.positions().get_daily_stats().await.net_pnl > 0.0);

        trader.engine().stop_strategy(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_loss_limit_sells() {
        let market = Arc::new(PaperMarket::new(5));
        market.set_profile(Network::Eth, TOKEN, TokenProfile::clean(100.0));
        let trader = Trader::new(
            Config::default(),
            Backends::paper(market.clone(), Duration::from_millis(10)),
        );
        let config = StrategyConfig {
            amount: Some(1.0),
            interval_ms: Some(5),
            min_profit: Some(5.0),
            max_loss: Some(3.0),
            ..StrategyConfig::for_token(TOKEN)
        };
        let id = trader
            .engine()
            .start_strategy(StrategyKind::PingPong, Network::Eth, config)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        market.set_price(Network::Eth, TOKEN, 94.0).unwrap();
        assert!(position_when(&trader, |p| p.is_some_and(|p| p.state == PositionState::Open)).await);
        market.set_price(Network::Eth, TOKEN, 90.0).unwrap();

        // The leg is sold at a loss; the next dip may already buy again
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut stats = trader.positions().get_daily_stats().await;
        while stats.losing_trades == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
            stats = trader.positions().get_daily_stats().await;
        }
        assert_eq!(stats.losing_trades, 1);
        assert!((stats.net_pnl + 4.0).abs() < 1e-9);
        assert_eq!(market.fills()[1].order.side, Side::Sell);
        trader.engine().stop_strategy(&id).await.unwrap();
    }
}
