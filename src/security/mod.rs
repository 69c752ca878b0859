//! Security gate
//!
//! Runs the honeypot, rug-pull, liquidity, verification and holder
//! concentration checks concurrently and folds them into a score and a
//! verdict. Any failing check makes the whole assessment fail closed.

pub mod checks;
pub mod simulation;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, NetworkConfig, SecurityConfig};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::types::{Network, PriceKey};

pub use checks::{
    ConcentrationResult, ContractInspector, HolderDistribution, HoneypotResult, LiquidityLock,
    LiquidityResult, RugPullResult,
};
pub use simulation::{SimulationResult, TransactionSimulator};

/// Minimum score for a safe verdict
pub const SAFE_SCORE_THRESHOLD: u32 = 70;

pub const HONEYPOT_PENALTY: i64 = 100;
pub const LIQUIDITY_PENALTY: i64 = 20;
pub const UNVERIFIED_PENALTY: i64 = 10;
pub const CONCENTRATION_PENALTY: i64 = 15;

pub const CHECK_FAILED_RISK: &str = "Security check failed";

/// Raw outputs of the five checks
#[derive(Debug, Clone, Serialize)]
pub struct SubResults {
    pub honeypot: HoneypotResult,
    pub rug_pull: RugPullResult,
    pub liquidity: LiquidityResult,
    pub contract_verified: bool,
    pub holder_concentration: ConcentrationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityAssessment {
    pub network: Network,
    pub token: String,
    pub safe: bool,
    pub score: u32,
    pub risks: Vec<String>,
    /// `None` when a check failed and the gate closed
    pub checks: Option<SubResults>,
    pub assessed_at: DateTime<Utc>,
}

impl SecurityAssessment {
    pub fn key(&self) -> PriceKey {
        PriceKey::new(self.network, self.token.clone())
    }

    /// Fail-closed verdict used whenever any check errors
    pub fn failed(network: Network, token: &str) -> Self {
        Self {
            network,
            token: token.to_string(),
            safe: false,
            score: 0,
            risks: vec![CHECK_FAILED_RISK.to_string()],
            checks: None,
            assessed_at: Utc::now(),
        }
    }

    /// Whether this assessment was produced within `window` of now
    pub fn is_fresh(&self, window: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.assessed_at);
        age.to_std().map_or(true, |age| age <= window)
    }

    /// Whether any recorded risk mentions `needle`
    pub fn has_risk(&self, needle: &str) -> bool {
        self.risks.iter().any(|r| r.contains(needle))
    }
}

/// Fold sub-results into `(score, risks, safe)`
///
/// Score starts at 100 and is clamped to 0..=100. Any recorded risk makes the
/// verdict unsafe regardless of the score.
pub fn aggregate(sub: &SubResults) -> (u32, Vec<String>, bool) {
    let mut score: i64 = 100;
    let mut risks = Vec::new();

    if sub.honeypot.is_honeypot {
        score -= HONEYPOT_PENALTY;
        risks.push(format!(
            "Honeypot detected: {}",
            sub.honeypot.reason.as_deref().unwrap_or("unknown reason")
        ));
    }

    if sub.rug_pull.risk_score > 0 || !sub.rug_pull.risk_factors.is_empty() {
        score -= i64::from(sub.rug_pull.risk_score.min(100));
        risks.extend(sub.rug_pull.risk_factors.iter().cloned());
    }

    if !sub.liquidity.sufficient {
        score -= LIQUIDITY_PENALTY;
        risks.push(format!(
            "Insufficient liquidity: {:.0} USD < {:.0} USD",
            sub.liquidity.liquidity_usd, sub.liquidity.required_usd
        ));
    }

    if !sub.contract_verified {
        score -= UNVERIFIED_PENALTY;
        risks.push("Contract not verified".to_string());
    }

    if sub.holder_concentration.excessive {
        score -= CONCENTRATION_PENALTY;
        risks.push(format!(
            "High holder concentration: top holder owns {:.1}% (max {:.1}%)",
            sub.holder_concentration.top_holder_pct, sub.holder_concentration.max_allowed_pct
        ));
    }

    let score = score.clamp(0, 100) as u32;
    let safe = score >= SAFE_SCORE_THRESHOLD && risks.is_empty();
    (score, risks, safe)
}

pub struct SecurityGate {
    inspector: Arc<dyn ContractInspector>,
    simulator: Arc<dyn TransactionSimulator>,
    config: SecurityConfig,
    networks: BTreeMap<Network, NetworkConfig>,
    global_min_liquidity: f64,
    events: EventBus,
}

impl SecurityGate {
    pub fn new(
        config: &Config,
        inspector: Arc<dyn ContractInspector>,
        simulator: Arc<dyn TransactionSimulator>,
        events: EventBus,
    ) -> Self {
        Self {
            inspector,
            simulator,
            config: config.security.clone(),
            networks: config.networks.clone(),
            global_min_liquidity: config.global.global_min_liquidity,
            events,
        }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Liquidity floor for a network in USD
    pub fn required_liquidity(&self, network: Network) -> f64 {
        self.networks
            .get(&network)
            .map_or(self.global_min_liquidity, |n| {
                n.min_liquidity.max(self.global_min_liquidity)
            })
    }

    /// Assess a token. Never returns an error: failures yield an unsafe verdict.
    pub async fn assess(&self, network: Network, token: &str) -> SecurityAssessment {
        match self.run_checks(network, token).await {
            Ok(sub) => {
                let (score, risks, safe) = aggregate(&sub);
                if safe {
                    info!("{}:{} passed security gate (score {})", network, token, score);
                } else {
                    info!(
                        "{}:{} rejected by security gate (score {}): {}",
                        network,
                        token,
                        score,
                        risks.join("; ")
                    );
                }
                SecurityAssessment {
                    network,
                    token: token.to_string(),
                    safe,
                    score,
                    risks,
                    checks: Some(sub),
                    assessed_at: Utc::now(),
                }
            }
            Err(e) => {
                warn!("Security check failed for {}:{}: {}", network, token, e);
                self.events.emit_error(
                    format!("security:{}:{}", network, token),
                    &Error::SecurityCheckFailure {
                        token: token.to_string(),
                        reason: e.to_string(),
                    },
                );
                SecurityAssessment::failed(network, token)
            }
        }
    }

    async fn run_checks(&self, network: Network, token: &str) -> Result<SubResults> {
        let inspector = self.inspector.as_ref();
        let simulator = self.simulator.as_ref();
        let network_config = self
            .networks
            .get(&network)
            .cloned()
            .unwrap_or_else(|| NetworkConfig::for_network(network));
        let required = self.required_liquidity(network);

        let all = async {
            tokio::try_join!(
                checks::detect_honeypot(inspector, simulator, network, &network_config, token),
                checks::detect_rug_pull(inspector, &self.config, network, token),
                checks::check_liquidity(inspector, network, token, required),
                checks::check_verification(inspector, network, token),
                checks::check_holder_concentration(inspector, &self.config, network, token),
            )
        };

        let timeout = Duration::from_millis(self.config.check_timeout_ms);
        let (honeypot, rug_pull, liquidity, contract_verified, holder_concentration) =
            tokio::time::timeout(timeout, all)
                .await
                .map_err(|_| Error::RpcTimeout(self.config.check_timeout_ms))??;

        Ok(SubResults {
            honeypot,
            rug_pull,
            liquidity,
            contract_verified,
            holder_concentration,
        })
    }
}
