//! Exit rules for open positions
//!
//! Take-profit wins over stop-loss, which wins over the trailing stop. The
//! trailing stop only arms once the position is in profit beyond the
//! activation threshold.

use serde::Serialize;
use std::fmt;

use crate::config::NetworkConfig;
use crate::types::pct_change;

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    Manual,
    Strategy,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::TakeProfit => "take profit",
            ExitReason::StopLoss => "stop loss",
            ExitReason::TrailingStop => "trailing stop",
            ExitReason::Manual => "manual",
            ExitReason::Strategy => "strategy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitRules {
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    /// `(activation_pct, distance_pct)` when the trailing stop is enabled
    pub trailing: Option<(f64, f64)>,
}

impl ExitRules {
    pub fn from_network(config: &NetworkConfig) -> Self {
        let trailing = &config.trailing_stop;
        Self {
            take_profit_pct: config.take_profit,
            stop_loss_pct: config.stop_loss.abs(),
            trailing: trailing
                .enabled
                .then_some((trailing.activation_pct, trailing.distance_pct)),
        }
    }
}

/// Evaluate the exit rules for one price observation
pub fn check_exit(rules: &ExitRules, entry_price: f64, current_price: f64, peak_price: f64) -> Option<ExitReason> {
    if entry_price <= 0.0 {
        return None;
    }

    let profit_pct = pct_change(entry_price, current_price);
    if profit_pct >= rules.take_profit_pct {
        return Some(ExitReason::TakeProfit);
    }

    if -profit_pct >= rules.stop_loss_pct {
        return Some(ExitReason::StopLoss);
    }

    if let Some((activation_pct, distance_pct)) = rules.trailing {
        let peak_profit_pct = pct_change(entry_price, peak_price);
        let drawdown_pct = -pct_change(peak_price, current_price);
        if peak_profit_pct > activation_pct && drawdown_pct >= distance_pct {
            return Some(ExitReason::TrailingStop);
        }
    }

    None
}
