//! Shared types for the strategy system

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::sizing::KellySizer;
use crate::arbitrage::ArbitrageMonitor;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::execution::{ExecutionReport, OrderExecutor};
use crate::position::{ExitReason, Position, PositionManager};
use crate::security::SecurityGate;
use crate::signal::SignalEngine;
use crate::types::Network;

/// Strategy type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    PingPong,
    Grid,
    Momentum,
    MeanReversion,
    ArbitrageLeg,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::PingPong => "ping_pong",
            StrategyKind::Grid => "grid",
            StrategyKind::Momentum => "momentum",
            StrategyKind::MeanReversion => "mean_reversion",
            StrategyKind::ArbitrageLeg => "arbitrage_leg",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "ping_pong" | "pingpong" => Ok(StrategyKind::PingPong),
            "grid" => Ok(StrategyKind::Grid),
            "momentum" => Ok(StrategyKind::Momentum),
            "mean_reversion" | "meanreversion" => Ok(StrategyKind::MeanReversion),
            "arbitrage_leg" | "arbitrage" => Ok(StrategyKind::ArbitrageLeg),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown strategy type '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle of a strategy instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Per-instance strategy parameters
///
/// Unset thresholds fall back to the network configuration, and an unset
/// amount is decided by the half-Kelly sizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Token address, or the watched symbol for an arbitrage leg
    pub token: String,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    /// Ping-pong: dip below the window high that triggers a buy, and the
    /// profit that triggers the sell
    #[serde(default)]
    pub min_profit: Option<f64>,
    #[serde(default)]
    pub max_loss: Option<f64>,
    #[serde(default)]
    pub lower_price: Option<f64>,
    #[serde(default)]
    pub upper_price: Option<f64>,
    #[serde(default)]
    pub grid_levels: Option<usize>,
    /// Mean reversion: lookback period and z-score threshold
    #[serde(default)]
    pub period: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Price samples kept for indicators
    #[serde(default)]
    pub window: Option<usize>,
}

pub const DEFAULT_MEAN_PERIOD: usize = 20;
pub const DEFAULT_DEVIATION_THRESHOLD: f64 = 2.0;
pub const DEFAULT_WINDOW: usize = 50;

impl StrategyConfig {
    pub fn for_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }

    /// Reject parameters the strategy cannot run with
    pub fn validate(&self, kind: StrategyKind) -> Result<()> {
        let invalid = |msg: String| -> Result<()> {
            Err(Error::InvalidConfiguration(format!("{}: {}", kind, msg)))
        };

        if self.token.trim().is_empty() {
            return invalid("token is required".to_string());
        }
        if let Some(amount) = self.amount {
            if !(amount > 0.0 && amount.is_finite()) {
                return invalid(format!("amount must be positive, got {}", amount));
            }
        }
        if self.interval_ms == Some(0) {
            return invalid("interval must be positive".to_string());
        }
        for (name, value) in [("min_profit", self.min_profit), ("max_loss", self.max_loss)] {
            if let Some(v) = value {
                if v <= 0.0 {
                    return invalid(format!("{} must be positive, got {}", name, v));
                }
            }
        }

        match kind {
            StrategyKind::Grid => {
                let (Some(lower), Some(upper)) = (self.lower_price, self.upper_price) else {
                    return invalid("grid requires lower_price and upper_price".to_string());
                };
                if !(lower > 0.0 && upper > lower) {
                    return invalid(format!("grid requires 0 < lower < upper, got {}..{}", lower, upper));
                }
                if self.grid_levels.unwrap_or(0) < 2 {
                    return invalid("grid requires at least two levels".to_string());
                }
            }
            StrategyKind::MeanReversion => {
                if self.period.unwrap_or(DEFAULT_MEAN_PERIOD) < 2 {
                    return invalid("period must be at least 2".to_string());
                }
                if self.threshold.unwrap_or(DEFAULT_DEVIATION_THRESHOLD) <= 0.0 {
                    return invalid("threshold must be positive".to_string());
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn window(&self) -> usize {
        self.window.unwrap_or(DEFAULT_WINDOW).max(2)
    }
}

/// Snapshot of a registered strategy
#[derive(Debug, Clone, Serialize)]
pub struct StrategyInfo {
    pub id: String,
    pub kind: StrategyKind,
    pub network: Network,
    pub token: String,
    pub status: StrategyStatus,
    pub started_at: DateTime<Utc>,
}

/// Services a running strategy may call
#[derive(Clone)]
pub struct StrategyServices {
    pub executor: Arc<OrderExecutor>,
    pub gate: Arc<SecurityGate>,
    pub positions: Arc<PositionManager>,
    pub signals: SignalEngine,
    pub arbitrage: Option<Arc<ArbitrageMonitor>>,
    pub sizer: KellySizer,
    pub events: EventBus,
}

/// What a strategy instance sees on every call
pub struct StrategyContext {
    pub id: String,
    pub network: Network,
    pub token: String,
    pub services: StrategyServices,
}

impl StrategyContext {
    pub async fn price(&self) -> Result<f64> {
        self.services.executor.price(self.network, &self.token).await
    }

    /// Screen the token and open a managed position
    pub async fn open_position(&self, amount: f64) -> Result<Position> {
        let assessment = self.services.gate.assess(self.network, &self.token).await;
        self.services.positions.open_position(&assessment, amount).await
    }

    pub async fn close_position(&self) -> Result<f64> {
        self.services
            .positions
            .close_position(self.network, &self.token, ExitReason::Strategy)
            .await
    }

    pub async fn position(&self) -> Option<Position> {
        self.services.positions.get_position(self.network, &self.token).await
    }

    /// Screen the token, then buy outside the position manager
    pub async fn screened_buy(&self, amount: f64, price: f64) -> Result<ExecutionReport> {
        let assessment = self.services.gate.assess(self.network, &self.token).await;
        if !assessment.safe {
            return Err(Error::SecurityCheckFailure {
                token: assessment.key().to_string(),
                reason: assessment.risks.join("; "),
            });
        }
        self.services
            .executor
            .buy(self.network, &self.token, amount, price)
            .await
    }

    pub async fn sell(&self, amount: f64, price: f64) -> Result<ExecutionReport> {
        self.services
            .executor
            .sell(self.network, &self.token, amount, price)
            .await
    }

    /// Configured amount, or a half-Kelly size for the observed volatility
    pub fn trade_amount(&self, configured: Option<f64>, volatility: f64) -> f64 {
        configured.unwrap_or_else(|| self.services.sizer.size(volatility))
    }
}

/// Uniform contract every strategy type implements
#[async_trait]
pub trait Strategy: Send {
    fn kind(&self) -> StrategyKind;

    async fn init(&mut self, ctx: &StrategyContext) -> Result<()>;

    /// One polling cycle
    async fn tick(&mut self, ctx: &StrategyContext) -> Result<()>;

    async fn stop(&mut self, ctx: &StrategyContext) -> Result<()>;
}
