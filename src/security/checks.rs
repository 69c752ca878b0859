//! Individual security checks
//!
//! On-chain facts come from a [`ContractInspector`]; the detection rules
//! applied to those facts live here.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use super::simulation::TransactionSimulator;
use crate::chain::{FeeParams, OrderRequest};
use crate::config::{NetworkConfig, SecurityConfig};
use crate::error::Result;
use crate::types::{Network, Side};

/// Bytecode fragments associated with honeypot contracts
pub const SUSPICIOUS_PATTERNS: [(&str, &str); 2] = [
    (
        "360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc",
        "upgradeable proxy implementation slot",
    ),
    ("5d3b1d30", "transfer restriction selector"),
];

pub const OWNERSHIP_WEIGHT: u32 = 30;
pub const LIQUIDITY_LOCK_WEIGHT: u32 = 40;
pub const DISTRIBUTION_WEIGHT: u32 = 30;

/// Amount used for the simulated honeypot round trip
const PROBE_AMOUNT: f64 = 0.001;

const RENOUNCED_OWNERS: [&str; 3] = [
    "0x0000000000000000000000000000000000000000",
    "0x000000000000000000000000000000000000dead",
    "11111111111111111111111111111111",
];

/// Liquidity pool lock status
#[derive(Debug, Clone, Serialize)]
pub struct LiquidityLock {
    pub locked: bool,
    pub unlock_at: Option<DateTime<Utc>>,
}

/// Holder distribution snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HolderDistribution {
    pub holder_count: u64,
    /// Share held by the largest holder, percent
    pub top_holder_pct: f64,
    /// Share held by the ten largest holders, percent
    pub top10_pct: f64,
}

/// Source of on-chain facts about a token contract
#[async_trait]
pub trait ContractInspector: Send + Sync {
    /// Deployed bytecode as hex
    async fn bytecode(&self, network: Network, token: &str) -> Result<String>;

    /// Current owner, `None` when the contract has no owner
    async fn owner(&self, network: Network, token: &str) -> Result<Option<String>>;

    async fn liquidity_lock(&self, network: Network, token: &str) -> Result<LiquidityLock>;

    async fn holder_distribution(&self, network: Network, token: &str)
        -> Result<HolderDistribution>;

    async fn is_verified(&self, network: Network, token: &str) -> Result<bool>;

    /// Pool liquidity in USD
    async fn liquidity_usd(&self, network: Network, token: &str) -> Result<f64>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HoneypotResult {
    pub is_honeypot: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RugPullResult {
    /// Weighted sub-score in 0..=100
    pub risk_score: u32,
    pub risk_factors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LiquidityResult {
    pub liquidity_usd: f64,
    pub required_usd: f64,
    pub sufficient: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConcentrationResult {
    pub top_holder_pct: f64,
    pub max_allowed_pct: f64,
    pub excessive: bool,
}

/// Bytecode pattern match followed by a simulated buy and sell
pub async fn detect_honeypot(
    inspector: &dyn ContractInspector,
    simulator: &dyn TransactionSimulator,
    network: Network,
    network_config: &NetworkConfig,
    token: &str,
) -> Result<HoneypotResult> {
    let code = inspector.bytecode(network, token).await?;
    let code = code.trim_start_matches("0x").to_ascii_lowercase();

    for (pattern, label) in SUSPICIOUS_PATTERNS {
        if code.contains(pattern) {
            return Ok(HoneypotResult {
                is_honeypot: true,
                reason: Some(format!("suspicious code pattern ({})", label)),
            });
        }
    }

    for side in [Side::Buy, Side::Sell] {
        let probe = OrderRequest {
            network,
            token: token.to_string(),
            side,
            amount: PROBE_AMOUNT,
            fees: FeeParams::from_network(network_config),
            private_submission: false,
            max_slippage_pct: 100.0,
        };
        let sim = simulator.simulate(&probe).await?;
        if !sim.success {
            debug!("Honeypot probe {} failed for {}: {:?}", side, token, sim.error);
            return Ok(HoneypotResult {
                is_honeypot: true,
                reason: Some(format!(
                    "simulated {} failed: {}",
                    side,
                    sim.error.unwrap_or_else(|| "unknown".to_string())
                )),
            });
        }
    }

    Ok(HoneypotResult::default())
}

/// Ownership, liquidity lock and distribution weighted 30/40/30
pub async fn detect_rug_pull(
    inspector: &dyn ContractInspector,
    config: &SecurityConfig,
    network: Network,
    token: &str,
) -> Result<RugPullResult> {
    let (owner, lock, distribution) = tokio::try_join!(
        inspector.owner(network, token),
        inspector.liquidity_lock(network, token),
        inspector.holder_distribution(network, token),
    )?;

    let mut result = RugPullResult::default();

    if !is_renounced(owner.as_deref()) {
        result.risk_factors.push("Ownership not renounced".to_string());
        result.risk_score += OWNERSHIP_WEIGHT;
    }

    let min_lock_until = Utc::now() + Duration::days(config.min_liquidity_lock_days as i64);
    let lock_ok = lock.locked && lock.unlock_at.map_or(true, |t| t >= min_lock_until);
    if !lock_ok {
        result.risk_factors.push(if lock.locked {
            format!(
                "Liquidity unlocks within {} days",
                config.min_liquidity_lock_days
            )
        } else {
            "Liquidity not locked".to_string()
        });
        result.risk_score += LIQUIDITY_LOCK_WEIGHT;
    }

    if distribution.top10_pct > config.max_top10_concentration_pct {
        result.risk_factors.push(format!(
            "Top 10 holders own {:.1}% of supply",
            distribution.top10_pct
        ));
        result.risk_score += DISTRIBUTION_WEIGHT;
    }

    Ok(result)
}

pub async fn check_liquidity(
    inspector: &dyn ContractInspector,
    network: Network,
    token: &str,
    required_usd: f64,
) -> Result<LiquidityResult> {
    let liquidity_usd = inspector.liquidity_usd(network, token).await?;
    Ok(LiquidityResult {
        liquidity_usd,
        required_usd,
        sufficient: liquidity_usd >= required_usd,
    })
}

pub async fn check_verification(
    inspector: &dyn ContractInspector,
    network: Network,
    token: &str,
) -> Result<bool> {
    inspector.is_verified(network, token).await
}

pub async fn check_holder_concentration(
    inspector: &dyn ContractInspector,
    config: &SecurityConfig,
    network: Network,
    token: &str,
) -> Result<ConcentrationResult> {
    let distribution = inspector.holder_distribution(network, token).await?;
    Ok(ConcentrationResult {
        top_holder_pct: distribution.top_holder_pct,
        max_allowed_pct: config.max_holder_concentration_pct,
        excessive: distribution.top_holder_pct > config.max_holder_concentration_pct,
    })
}

fn is_renounced(owner: Option<&str>) -> bool {
    match owner {
        None => true,
        Some(addr) => {
            let addr = addr.trim();
            addr.is_empty()
                || RENOUNCED_OWNERS
                    .iter()
                    .any(|r| r.eq_ignore_ascii_case(addr))
        }
    }
}
