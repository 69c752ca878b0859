//! Configuration loading and validation

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Error;
use crate::types::Network;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default = "default_networks")]
    pub networks: BTreeMap<Network, NetworkConfig>,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub mev: MevConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub signals: SignalConfig,
    #[serde(default)]
    pub arbitrage: ArbitrageConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub strategy: StrategyEngineConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

/// Limits shared across every network
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Maximum number of order submissions in flight across all wallets
    #[serde(default = "default_max_concurrent_trades")]
    pub max_concurrent_trades: usize,
    /// Liquidity floor (USD) applied on top of each network's own minimum
    #[serde(default = "default_global_min_liquidity")]
    pub global_min_liquidity: f64,
    /// Maximum tolerated slippage in percent
    #[serde(default = "default_global_max_slippage")]
    pub global_max_slippage: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrailingStopConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Profit (percent) the position must exceed before the trailing stop arms
    #[serde(default = "default_trailing_activation")]
    pub activation_pct: f64,
    /// Drawdown from peak (percent) that fires the trailing stop
    #[serde(default = "default_trailing_distance")]
    pub distance_pct: f64,
}

/// Per-network trading parameters
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Primary endpoint first, then backups in failover order
    #[serde(default)]
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_min_profit")]
    pub min_profit: f64,
    #[serde(default = "default_max_loss")]
    pub max_loss: f64,
    #[serde(default = "default_take_profit")]
    pub take_profit: f64,
    #[serde(default = "default_stop_loss")]
    pub stop_loss: f64,
    #[serde(default)]
    pub trailing_stop: TrailingStopConfig,
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Minimum pool liquidity in USD
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: f64,
    /// Maximum price impact in percent
    #[serde(default = "default_max_price_impact")]
    pub max_price_impact: f64,
    #[serde(default = "default_gas_multiplier")]
    pub gas_multiplier: f64,
    /// Native fee unit: gwei on EVM networks, SOL on Solana
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price: f64,
    #[serde(default = "default_priority_fee")]
    pub priority_fee: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Top-holder share (percent) above which concentration is flagged
    #[serde(default = "default_max_holder_concentration")]
    pub max_holder_concentration_pct: f64,
    /// Top-10 holder share (percent) above which rug-pull distribution risk is flagged
    #[serde(default = "default_max_top10_concentration")]
    pub max_top10_concentration_pct: f64,
    #[serde(default = "default_min_liquidity_lock_days")]
    pub min_liquidity_lock_days: u64,
    /// Candidates with fewer holders are skipped before screening
    #[serde(default = "default_min_holders")]
    pub min_holders: u64,
    /// Maximum age of an assessment accepted when opening a position
    #[serde(default = "default_decision_window_secs")]
    pub decision_window_secs: u64,
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MevConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_high_risk_fee_multiplier")]
    pub high_risk_fee_multiplier: f64,
    /// Tag orders for private submission when the network supports it
    #[serde(default = "default_true")]
    pub private_submission: bool,
    /// Pending same-side orders on a token that mark the mempool as contested
    #[serde(default = "default_similar_pending_threshold")]
    pub similar_pending_threshold: usize,
    #[serde(default)]
    pub known_bots: Vec<String>,
    /// Recent transactions scanned for sandwich patterns
    #[serde(default = "default_sandwich_lookback")]
    pub sandwich_lookback: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    /// Consecutive connection failures before switching to the next endpoint
    #[serde(default = "default_failover_threshold")]
    pub failover_threshold: u32,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_oversold")]
    pub oversold: f64,
    #[serde(default = "default_overbought")]
    pub overbought: f64,
    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,
    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,
    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,
    /// Histogram must exceed +threshold to vote buy, fall below -threshold to vote sell
    #[serde(default)]
    pub macd_threshold: f64,
    #[serde(default = "default_bb_period")]
    pub bb_period: usize,
    #[serde(default = "default_bb_std_dev")]
    pub bb_std_dev: f64,
    /// Band position below this votes buy, above 1 - this votes sell
    #[serde(default = "default_band_threshold")]
    pub band_threshold: f64,
    /// Price samples retained per strategy
    #[serde(default = "default_history_len")]
    pub history_len: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArbitrageVenueConfig {
    pub network: Network,
    pub dex: String,
    /// Token address on this network
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchedTokenConfig {
    pub symbol: String,
    pub venues: Vec<ArbitrageVenueConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArbitrageConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_arb_min_profit")]
    pub min_profit_percent: f64,
    #[serde(default = "default_arb_min_liquidity")]
    pub min_liquidity: f64,
    /// Amount bought on the source leg
    #[serde(default = "default_arb_trade_amount")]
    pub trade_amount: f64,
    #[serde(default = "default_arb_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub watched: Vec<WatchedTokenConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Tick-to-tick change (percent) reported as a significant move
    #[serde(default = "default_significant_move_pct")]
    pub significant_move_pct: f64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

/// Half-Kelly position sizing
#[derive(Debug, Clone, Deserialize)]
pub struct SizingConfig {
    /// Capital available to a strategy when no explicit amount is configured
    #[serde(default = "default_capital")]
    pub capital: f64,
    #[serde(default = "default_win_rate")]
    pub win_rate: f64,
    #[serde(default = "default_profit_ratio")]
    pub profit_ratio: f64,
    #[serde(default = "default_kelly_fraction")]
    pub kelly_fraction: f64,
    /// Hard cap as a fraction of capital
    #[serde(default = "default_max_capital_fraction")]
    pub max_capital_fraction: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyEngineConfig {
    #[serde(default = "default_max_concurrent_strategies")]
    pub max_concurrent_strategies: usize,
    #[serde(default = "default_check_interval_ms")]
    pub default_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_analytics_history")]
    pub history_len: usize,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    #[serde(default = "default_analytics_interval_ms")]
    pub interval_ms: u64,
}

// Default value functions
fn default_true() -> bool { true }
fn default_max_concurrent_trades() -> usize { 3 }
fn default_global_min_liquidity() -> f64 { 1000.0 }
fn default_global_max_slippage() -> f64 { 1.0 }
fn default_trailing_activation() -> f64 { 20.0 }
fn default_trailing_distance() -> f64 { 10.0 }
fn default_min_profit() -> f64 { 2.0 }
fn default_max_loss() -> f64 { 5.0 }
fn default_take_profit() -> f64 { 50.0 }
fn default_stop_loss() -> f64 { 20.0 }
fn default_max_positions() -> usize { 5 }
fn default_check_interval_ms() -> u64 { 3000 }
fn default_min_liquidity() -> f64 { 10000.0 }
fn default_max_price_impact() -> f64 { 3.0 }
fn default_gas_multiplier() -> f64 { 1.1 }
fn default_max_gas_price() -> f64 { 5.0 }
fn default_priority_fee() -> f64 { 1.0 }
fn default_max_holder_concentration() -> f64 { 5.0 }
fn default_max_top10_concentration() -> f64 { 50.0 }
fn default_min_liquidity_lock_days() -> u64 { 30 }
fn default_min_holders() -> u64 { 50 }
fn default_decision_window_secs() -> u64 { 60 }
fn default_check_timeout_ms() -> u64 { 10_000 }
fn default_high_risk_fee_multiplier() -> f64 { 1.5 }
fn default_similar_pending_threshold() -> usize { 3 }
fn default_sandwich_lookback() -> usize { 50 }
fn default_retry_base_delay_ms() -> u64 { 1000 }
fn default_retry_max_delay_ms() -> u64 { 16_000 }
fn default_retry_attempts() -> u32 { 3 }
fn default_failover_threshold() -> u32 { 3 }
fn default_call_timeout_ms() -> u64 { 15_000 }
fn default_rsi_period() -> usize { 14 }
fn default_oversold() -> f64 { 30.0 }
fn default_overbought() -> f64 { 70.0 }
fn default_macd_fast() -> usize { 12 }
fn default_macd_slow() -> usize { 26 }
fn default_macd_signal() -> usize { 9 }
fn default_bb_period() -> usize { 20 }
fn default_bb_std_dev() -> f64 { 2.0 }
fn default_band_threshold() -> f64 { 0.05 }
fn default_history_len() -> usize { 100 }
fn default_arb_min_profit() -> f64 { 2.0 }
fn default_arb_min_liquidity() -> f64 { 10000.0 }
fn default_arb_trade_amount() -> f64 { 1.0 }
fn default_arb_interval_ms() -> u64 { 5000 }
fn default_significant_move_pct() -> f64 { 5.0 }
fn default_channel_capacity() -> usize { 1024 }
fn default_reconnect_base_ms() -> u64 { 1000 }
fn default_reconnect_max_ms() -> u64 { 30_000 }
fn default_max_reconnect_attempts() -> u32 { 5 }
fn default_capital() -> f64 { 1.0 }
fn default_win_rate() -> f64 { 0.55 }
fn default_profit_ratio() -> f64 { 1.5 }
fn default_kelly_fraction() -> f64 { 0.5 }
fn default_max_capital_fraction() -> f64 { 0.1 }
fn default_max_concurrent_strategies() -> usize { 10 }
fn default_analytics_history() -> usize { 1000 }
fn default_risk_free_rate() -> f64 { 0.02 }
fn default_analytics_interval_ms() -> u64 { 60_000 }

/// Network-specific values that differ from the generic field defaults:
/// (network, min_liquidity, max_gas_price, priority_fee)
const NETWORK_DEFAULTS: [(Network, f64, f64, f64); 3] = [
    (Network::Eth, 50_000.0, 150.0, 3.0),
    (Network::Bsc, 10_000.0, 5.0, 1.0),
    (Network::Solana, 5_000.0, 0.000005, 0.000001),
];

impl NetworkConfig {
    /// Defaults for a specific network
    pub fn for_network(network: Network) -> Self {
        let mut cfg = Self::default();
        if let Some((_, min_liquidity, max_gas_price, priority_fee)) =
            NETWORK_DEFAULTS.iter().find(|(n, ..)| *n == network)
        {
            cfg.min_liquidity = *min_liquidity;
            cfg.max_gas_price = *max_gas_price;
            cfg.priority_fee = *priority_fee;
        }
        cfg
    }

    /// Effective liquidity floor for this network
    pub fn effective_min_liquidity(&self, global: &GlobalConfig) -> f64 {
        self.min_liquidity.max(global.global_min_liquidity)
    }
}

fn default_networks() -> BTreeMap<Network, NetworkConfig> {
    Network::ALL
        .iter()
        .map(|n| (*n, NetworkConfig::for_network(*n)))
        .collect()
}

impl Config {
    /// Load configuration from file and environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut builder = config::Config::builder();
        // Per-network defaults, so a partial [networks.x] table still picks up the right values
        for (network, min_liquidity, max_gas_price, priority_fee) in NETWORK_DEFAULTS {
            let prefix = format!("networks.{}", network.as_str());
            builder = builder
                .set_default(format!("{}.min_liquidity", prefix), min_liquidity)?
                .set_default(format!("{}.max_gas_price", prefix), max_gas_price)?
                .set_default(format!("{}.priority_fee", prefix), priority_fee)?;
        }

        let settings = builder
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix TRADER_)
            .add_source(
                config::Environment::with_prefix("TRADER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Error> {
        let invalid = |msg: String| Err(Error::InvalidConfiguration(msg));

        if self.global.max_concurrent_trades == 0 {
            return invalid("global.max_concurrent_trades must be at least 1".into());
        }
        if !(0.0..=100.0).contains(&self.global.global_max_slippage) {
            return invalid("global.global_max_slippage must be within 0..=100".into());
        }
        if self.global.global_min_liquidity < 0.0 {
            return invalid("global.global_min_liquidity cannot be negative".into());
        }

        if !self.networks.values().any(|n| n.enabled) {
            return invalid("at least one network must be enabled".into());
        }

        for (network, net) in &self.networks {
            if net.take_profit <= 0.0 {
                return invalid(format!("networks.{}.take_profit must be positive", network));
            }
            if net.stop_loss == 0.0 {
                return invalid(format!("networks.{}.stop_loss must be non-zero", network));
            }
            if net.min_profit <= 0.0 || net.max_loss <= 0.0 {
                return invalid(format!(
                    "networks.{}: min_profit and max_loss must be positive",
                    network
                ));
            }
            if net.trailing_stop.enabled && net.trailing_stop.distance_pct <= 0.0 {
                return invalid(format!(
                    "networks.{}.trailing_stop.distance_pct must be positive",
                    network
                ));
            }
            if net.max_positions == 0 {
                return invalid(format!("networks.{}.max_positions must be at least 1", network));
            }
            if net.check_interval_ms == 0 {
                return invalid(format!("networks.{}.check_interval_ms must be positive", network));
            }
            if net.gas_multiplier < 1.0 {
                return invalid(format!("networks.{}.gas_multiplier must be >= 1.0", network));
            }
            if net.max_gas_price <= 0.0 || net.priority_fee < 0.0 {
                return invalid(format!("networks.{}: invalid fee parameters", network));
            }
            for endpoint in &net.rpc_urls {
                if let Err(e) = url::Url::parse(endpoint) {
                    return invalid(format!(
                        "networks.{}: invalid rpc url {}: {}",
                        network,
                        mask_url(endpoint),
                        e
                    ));
                }
            }
        }

        if !(3..=5).contains(&self.retry.max_attempts) {
            return invalid(format!(
                "retry.max_attempts must be between 3 and 5, got {}",
                self.retry.max_attempts
            ));
        }
        if self.retry.base_delay_ms == 0 || self.retry.failover_threshold == 0 {
            return invalid("retry.base_delay_ms and retry.failover_threshold must be positive".into());
        }

        if self.mev.high_risk_fee_multiplier < 1.0 {
            return invalid("mev.high_risk_fee_multiplier must be >= 1.0".into());
        }

        let s = &self.signals;
        if s.oversold >= s.overbought || s.overbought > 100.0 || s.oversold < 0.0 {
            return invalid("signals: oversold must be below overbought within 0..=100".into());
        }
        if s.macd_fast == 0 || s.macd_fast >= s.macd_slow || s.macd_signal == 0 {
            return invalid("signals: macd periods must satisfy 0 < fast < slow, signal > 0".into());
        }
        if s.rsi_period == 0 || s.bb_period < 2 || !(0.0..0.5).contains(&s.band_threshold) {
            return invalid("signals: invalid rsi/bollinger parameters".into());
        }

        if !(0.0..=1.0).contains(&self.sizing.win_rate)
            || self.sizing.profit_ratio <= 0.0
            || !(0.0..=1.0).contains(&self.sizing.max_capital_fraction)
        {
            return invalid("sizing: win_rate and max_capital_fraction must be within 0..=1".into());
        }

        if self.strategy.max_concurrent_strategies == 0 {
            return invalid("strategy.max_concurrent_strategies must be at least 1".into());
        }

        if self.arbitrage.enabled {
            let evm = evm_address_pattern()?;
            let solana = solana_address_pattern()?;
            for watched in &self.arbitrage.watched {
                if watched.venues.len() < 2 {
                    return invalid(format!(
                        "arbitrage.watched {}: at least two venues are required",
                        watched.symbol
                    ));
                }
                for venue in &watched.venues {
                    let pattern = if venue.network.is_evm() { &evm } else { &solana };
                    if !pattern.is_match(&venue.address) {
                        return invalid(format!(
                            "arbitrage.watched {}: invalid {} address {}",
                            watched.symbol, venue.network, venue.address
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Configuration for a network, if it is configured and enabled
    pub fn network(&self, network: Network) -> Option<&NetworkConfig> {
        self.networks.get(&network).filter(|n| n.enabled)
    }

    /// Enabled networks in a stable order
    pub fn enabled_networks(&self) -> Vec<Network> {
        self.networks
            .iter()
            .filter(|(_, n)| n.enabled)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Get a display-safe version of the config (endpoint secrets masked)
    pub fn masked_display(&self) -> String {
        let mut out = format!(
            r#"Configuration:
  Global:
    max_concurrent_trades: {}
    global_min_liquidity: {} USD
    global_max_slippage: {}%
  Security:
    max_holder_concentration: {}%
    min_liquidity_lock: {} days
    decision_window: {}s
  MEV:
    enabled: {}
    high_risk_fee_multiplier: {}
    private_submission: {}
  Retry:
    base_delay: {}ms
    max_attempts: {}
    failover_threshold: {}
  Strategies:
    max_concurrent: {}
  Arbitrage:
    enabled: {}
    min_profit: {}%
    watched: {}
"#,
            self.global.max_concurrent_trades,
            self.global.global_min_liquidity,
            self.global.global_max_slippage,
            self.security.max_holder_concentration_pct,
            self.security.min_liquidity_lock_days,
            self.security.decision_window_secs,
            self.mev.enabled,
            self.mev.high_risk_fee_multiplier,
            self.mev.private_submission,
            self.retry.base_delay_ms,
            self.retry.max_attempts,
            self.retry.failover_threshold,
            self.strategy.max_concurrent_strategies,
            self.arbitrage.enabled,
            self.arbitrage.min_profit_percent,
            self.arbitrage.watched.len(),
        );

        for (network, net) in &self.networks {
            let endpoints: Vec<String> = net.rpc_urls.iter().map(|u| mask_url(u)).collect();
            out.push_str(&format!(
                r#"  Network {}:
    enabled: {}
    endpoints: {:?}
    take_profit: {}%
    stop_loss: {}%
    trailing_stop: {} (activation {}%, distance {}%)
    max_positions: {}
    min_liquidity: {} USD
    max_gas_price: {}
"#,
                network,
                net.enabled,
                endpoints,
                net.take_profit,
                net.stop_loss,
                net.trailing_stop.enabled,
                net.trailing_stop.activation_pct,
                net.trailing_stop.distance_pct,
                net.max_positions,
                net.min_liquidity,
                net.max_gas_price,
            ));
        }

        out
    }
}

fn evm_address_pattern() -> std::result::Result<Regex, Error> {
    Regex::new(r"^0x[0-9a-fA-F]{40}$").map_err(|e| Error::Internal(e.to_string()))
}

fn solana_address_pattern() -> std::result::Result<Regex, Error> {
    Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").map_err(|e| Error::Internal(e.to_string()))
}

/// Mask API keys in URLs
pub fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_concurrent_trades: default_max_concurrent_trades(),
            global_min_liquidity: default_global_min_liquidity(),
            global_max_slippage: default_global_max_slippage(),
        }
    }
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            activation_pct: default_trailing_activation(),
            distance_pct: default_trailing_distance(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rpc_urls: Vec::new(),
            min_profit: default_min_profit(),
            max_loss: default_max_loss(),
            take_profit: default_take_profit(),
            stop_loss: default_stop_loss(),
            trailing_stop: TrailingStopConfig::default(),
            max_positions: default_max_positions(),
            check_interval_ms: default_check_interval_ms(),
            min_liquidity: default_min_liquidity(),
            max_price_impact: default_max_price_impact(),
            gas_multiplier: default_gas_multiplier(),
            max_gas_price: default_max_gas_price(),
            priority_fee: default_priority_fee(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_holder_concentration_pct: default_max_holder_concentration(),
            max_top10_concentration_pct: default_max_top10_concentration(),
            min_liquidity_lock_days: default_min_liquidity_lock_days(),
            min_holders: default_min_holders(),
            decision_window_secs: default_decision_window_secs(),
            check_timeout_ms: default_check_timeout_ms(),
        }
    }
}

impl Default for MevConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            high_risk_fee_multiplier: default_high_risk_fee_multiplier(),
            private_submission: true,
            similar_pending_threshold: default_similar_pending_threshold(),
            known_bots: Vec::new(),
            sandwich_lookback: default_sandwich_lookback(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            max_attempts: default_retry_attempts(),
            failover_threshold: default_failover_threshold(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            oversold: default_oversold(),
            overbought: default_overbought(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            macd_signal: default_macd_signal(),
            macd_threshold: 0.0,
            bb_period: default_bb_period(),
            bb_std_dev: default_bb_std_dev(),
            band_threshold: default_band_threshold(),
            history_len: default_history_len(),
        }
    }
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_profit_percent: default_arb_min_profit(),
            min_liquidity: default_arb_min_liquidity(),
            trade_amount: default_arb_trade_amount(),
            interval_ms: default_arb_interval_ms(),
            watched: Vec::new(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            significant_move_pct: default_significant_move_pct(),
            channel_capacity: default_channel_capacity(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            capital: default_capital(),
            win_rate: default_win_rate(),
            profit_ratio: default_profit_ratio(),
            kelly_fraction: default_kelly_fraction(),
            max_capital_fraction: default_max_capital_fraction(),
        }
    }
}

impl Default for StrategyEngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_strategies: default_max_concurrent_strategies(),
            default_interval_ms: default_check_interval_ms(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            history_len: default_analytics_history(),
            risk_free_rate: default_risk_free_rate(),
            interval_ms: default_analytics_interval_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            networks: default_networks(),
            security: SecurityConfig::default(),
            mev: MevConfig::default(),
            retry: RetryConfig::default(),
            signals: SignalConfig::default(),
            arbitrage: ArbitrageConfig::default(),
            feed: FeedConfig::default(),
            sizing: SizingConfig::default(),
            strategy: StrategyEngineConfig::default(),
            analytics: AnalyticsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.networks.len(), 3);
        assert_eq!(config.networks[&Network::Eth].min_liquidity, 50_000.0);
        assert_eq!(config.networks[&Network::Bsc].min_liquidity, 10_000.0);
        assert_eq!(config.networks[&Network::Solana].max_gas_price, 0.000005);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.mev.high_risk_fee_multiplier, 1.5);
    }

    #[test]
    fn test_load_partial_file_keeps_network_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[global]
max_concurrent_trades = 2

[networks.bsc]
take_profit = 40.0
rpc_urls = ["https://bsc-dataseed.binance.org", "https://bsc-backup.example.com?key=abc"]

[networks.solana]
enabled = false
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.global.max_concurrent_trades, 2);
        let bsc = &config.networks[&Network::Bsc];
        assert_eq!(bsc.take_profit, 40.0);
        assert_eq!(bsc.min_liquidity, 10_000.0);
        assert_eq!(bsc.rpc_urls.len(), 2);
        assert!(config.network(Network::Solana).is_none());
        assert_eq!(config.enabled_networks(), vec![Network::Eth, Network::Bsc]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.retry.max_attempts = 9;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(_))
        ));

        let mut config = Config::default();
        config.signals.oversold = 80.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        if let Some(net) = config.networks.get_mut(&Network::Eth) {
            net.rpc_urls = vec!["not a url".into()];
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_arbitrage_addresses() {
        let mut config = Config::default();
        config.arbitrage.enabled = true;
        config.arbitrage.watched = vec![WatchedTokenConfig {
            symbol: "USDC".into(),
            venues: vec![
                ArbitrageVenueConfig {
                    network: Network::Eth,
                    dex: "uniswap".into(),
                    address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".into(),
                },
                ArbitrageVenueConfig {
                    network: Network::Solana,
                    dex: "raydium".into(),
                    address: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".into(),
                },
            ],
        }];
        assert!(config.validate().is_ok());

        config.arbitrage.watched[0].venues[0].address = "0x1234".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(
            mask_url("https://api.example.com"),
            "https://api.example.com"
        );
    }

    #[test]
    fn test_masked_display_hides_keys() {
        let mut config = Config::default();
        if let Some(net) = config.networks.get_mut(&Network::Eth) {
            net.rpc_urls = vec!["https://mainnet.example.com?apikey=secret".into()];
        }
        let shown = config.masked_display();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("Network eth"));
    }
}
