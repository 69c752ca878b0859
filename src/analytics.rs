//! In-memory portfolio analytics
//!
//! Periodic snapshots of open exposure plus the realized trades seen on the
//! event bus, kept in bounded rolling windows. Nothing is persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::config::AnalyticsConfig;
use crate::events::TradeEvent;
use crate::position::{ExitReason, PositionManager};
use crate::types::Network;

/// Snapshots per year used for annualisation
const PERIODS_PER_YEAR: f64 = 252.0;

/// A realized trade
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub network: Network,
    pub token: String,
    pub reason: ExitReason,
    pub realized_profit: f64,
    pub profit_pct: f64,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub total_value: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    /// Annualised, as a fraction
    pub volatility: f64,
    pub sharpe_ratio: f64,
    /// Percent
    pub max_drawdown: f64,
    /// Percent of realized trades that made money
    pub win_rate: f64,
    pub realized_pnl: f64,
    pub taken_at: DateTime<Utc>,
}

/// Step returns between consecutive values
pub fn returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

pub fn annualized_volatility(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    (variance * PERIODS_PER_YEAR).sqrt()
}

pub fn sharpe_ratio(returns: &[f64], volatility: f64, risk_free_rate: f64) -> f64 {
    if returns.is_empty() || volatility == 0.0 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let excess = mean - risk_free_rate / PERIODS_PER_YEAR;
    excess * PERIODS_PER_YEAR.sqrt() / volatility
}

/// Largest peak-to-trough decline, percent
pub fn max_drawdown_pct(values: &[f64]) -> f64 {
    let Some(first) = values.first() else {
        return 0.0;
    };
    let mut peak = *first;
    let mut worst: f64 = 0.0;
    for &value in values {
        peak = peak.max(value);
        if peak > 0.0 {
            worst = worst.max((peak - value) / peak);
        }
    }
    worst * 100.0
}

#[derive(Default)]
struct Window {
    snapshots: VecDeque<PortfolioSnapshot>,
    trades: VecDeque<TradeRecord>,
}

pub struct PortfolioAnalyzer {
    config: AnalyticsConfig,
    positions: Arc<PositionManager>,
    window: RwLock<Window>,
}

impl PortfolioAnalyzer {
    pub fn new(config: AnalyticsConfig, positions: Arc<PositionManager>) -> Self {
        Self {
            config,
            positions,
            window: RwLock::new(Window::default()),
        }
    }

    pub async fn record_trade(&self, trade: TradeRecord) {
        let mut window = self.window.write().await;
        window.trades.push_back(trade);
        while window.trades.len() > self.config.history_len.max(1) {
            window.trades.pop_front();
        }
    }

    /// Take a snapshot of current exposure and append it to the window
    pub async fn analyze(&self) -> PortfolioSnapshot {
        let total_value = self.positions.total_position_value().await;
        let pnl = self.positions.total_unrealized_pnl().await;
        let cost = total_value - pnl;

        let mut window = self.window.write().await;
        let mut values: Vec<f64> = window.snapshots.iter().map(|s| s.total_value).collect();
        values.push(total_value);

        let step_returns = returns(&values);
        let volatility = annualized_volatility(&step_returns);
        let wins = window.trades.iter().filter(|t| t.realized_profit > 0.0).count();
        let win_rate = if window.trades.is_empty() {
            0.0
        } else {
            wins as f64 / window.trades.len() as f64 * 100.0
        };

        let snapshot = PortfolioSnapshot {
            total_value,
            pnl,
            pnl_percent: if cost > 0.0 { pnl / cost * 100.0 } else { 0.0 },
            volatility,
            sharpe_ratio: sharpe_ratio(&step_returns, volatility, self.config.risk_free_rate),
            max_drawdown: max_drawdown_pct(&values),
            win_rate,
            realized_pnl: window.trades.iter().map(|t| t.realized_profit).sum(),
            taken_at: Utc::now(),
        };

        window.snapshots.push_back(snapshot.clone());
        while window.snapshots.len() > self.config.history_len.max(1) {
            window.snapshots.pop_front();
        }
        snapshot
    }

    pub async fn latest(&self) -> Option<PortfolioSnapshot> {
        self.window.read().await.snapshots.back().cloned()
    }

    pub async fn trades(&self) -> Vec<TradeRecord> {
        self.window.read().await.trades.iter().cloned().collect()
    }

    /// Record closed positions from the bus and snapshot on an interval
    pub async fn run(
        &self,
        mut events: broadcast::Receiver<TradeEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.interval_ms.max(1)));
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    let s = self.analyze().await;
                    info!(
                        "Portfolio: value {:.4}, pnl {:+.4} ({:+.2}%), drawdown {:.2}%, win rate {:.1}%",
                        s.total_value, s.pnl, s.pnl_percent, s.max_drawdown, s.win_rate
                    );
                }
                event = events.recv() => match event {
                    Ok(TradeEvent::PositionClosed { network, token, reason, realized_profit, profit_pct, .. }) => {
                        debug!("Recording closed trade {}:{} ({})", network, token, reason);
                        self.record_trade(TradeRecord {
                            network,
                            token,
                            reason,
                            realized_profit,
                            profit_pct,
                            closed_at: Utc::now(),
                        })
                        .await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Analytics lagged, {} events lost", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_skip_zero_base() {
        assert_eq!(returns(&[100.0, 110.0, 99.0]), vec![0.1, -0.1]);
        assert!(returns(&[0.0, 1.0]).is_empty());
        assert!(returns(&[5.0]).is_empty());
    }

    #[test]
    fn test_volatility_and_sharpe() {
        assert_eq!(annualized_volatility(&[]), 0.0);
        assert_eq!(annualized_volatility(&[0.01, 0.01, 0.01]), 0.0);
        assert_eq!(sharpe_ratio(&[0.01, 0.01], 0.0, 0.02), 0.0);

        let r = [0.02, -0.01, 0.03, 0.0];
        let vol = annualized_volatility(&r);
        assert!(vol > 0.0);
        assert!(sharpe_ratio(&r, vol, 0.02) > 0.0);
    }

    #[test]
    fn test_max_drawdown() {
        assert_eq!(max_drawdown_pct(&[]), 0.0);
        let dd = max_drawdown_pct(&[100.0, 120.0, 90.0, 130.0, 117.0]);
        assert!((dd - 25.0).abs() < 1e-9);
    }
}
