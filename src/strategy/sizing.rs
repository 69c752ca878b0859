//! Half-Kelly position sizing
//!
//! Used when a strategy is started without an explicit amount. The Kelly
//! fraction is scaled down by volatility and capped at a share of capital.

use crate::config::SizingConfig;

/// Floor for the volatility adjustment
const MIN_VOLATILITY_ADJUSTMENT: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct KellySizer {
    config: SizingConfig,
}

impl KellySizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Raw Kelly fraction `p - (1 - p) / b`, never negative
    pub fn kelly_fraction(&self) -> f64 {
        let p = self.config.win_rate;
        let b = self.config.profit_ratio;
        if b <= 0.0 {
            return 0.0;
        }
        (p - (1.0 - p) / b).max(0.0)
    }

    /// Position size for the given volatility (fraction, e.g. 0.2 = 20%)
    pub fn size(&self, volatility: f64) -> f64 {
        let capital = self.config.capital.max(0.0);
        let volatility = if volatility.is_finite() { volatility.max(0.0) } else { 1.0 };
        let adjustment = (1.0 - volatility).max(MIN_VOLATILITY_ADJUSTMENT);
        let size = capital * self.kelly_fraction() * self.config.kelly_fraction * adjustment;
        size.min(capital * self.config.max_capital_fraction)
    }
}

impl Default for KellySizer {
    fn default() -> Self {
        Self::new(SizingConfig::default())
    }
}
