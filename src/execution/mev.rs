//! MEV protection
//!
//! Every order is wrapped before it reaches a chain adapter: fees come from
//! the network configuration, the maximum fee is escalated when the mempool
//! looks contested, and the order may be tagged for private submission. A
//! failed risk estimate never blocks the order; it goes out unmodified.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chain::OrderRequest;
use crate::config::MevConfig;
use crate::error::Result;
use crate::types::{Network, Side};

/// A transaction observed in the mempool or a recent block
#[derive(Debug, Clone, Serialize)]
pub struct PendingTx {
    pub hash: String,
    pub from: String,
    pub token: String,
    pub side: Side,
    pub amount: f64,
    pub seen_at: DateTime<Utc>,
}

/// Source of mempool and recent-block transactions for a network
#[async_trait]
pub trait MempoolSource: Send + Sync {
    async fn pending(&self, network: Network) -> Result<Vec<PendingTx>>;

    /// Most recent confirmed swaps, oldest first
    async fn recent(&self, network: Network, limit: usize) -> Result<Vec<PendingTx>>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MempoolRisk {
    pub high: bool,
    pub details: Vec<String>,
}

#[async_trait]
pub trait MempoolRiskEstimator: Send + Sync {
    async fn estimate(&self, order: &OrderRequest) -> Result<MempoolRisk>;
}

/// Flags similar pending orders, known adversarial senders and recent sandwiches
pub struct MempoolHeuristics {
    source: Arc<dyn MempoolSource>,
    similar_pending_threshold: usize,
    known_bots: HashSet<String>,
    sandwich_lookback: usize,
}

impl MempoolHeuristics {
    pub fn new(source: Arc<dyn MempoolSource>, config: &MevConfig) -> Self {
        Self {
            source,
            similar_pending_threshold: config.similar_pending_threshold.max(1),
            known_bots: config
                .known_bots
                .iter()
                .map(|a| a.to_ascii_lowercase())
                .collect(),
            sandwich_lookback: config.sandwich_lookback,
        }
    }

    fn is_known_bot(&self, address: &str) -> bool {
        self.known_bots.contains(&address.to_ascii_lowercase())
    }
}

/// Whether `txs` (oldest first) contain a buy-victim-sell pattern on `token`
/// by the same outer sender
pub fn find_sandwich(txs: &[PendingTx], token: &str) -> Option<String> {
    let on_token: Vec<&PendingTx> = txs.iter().filter(|t| t.token == token).collect();
    for (i, front) in on_token.iter().enumerate() {
        if front.side != Side::Buy {
            continue;
        }
        for (j, victim) in on_token.iter().enumerate().skip(i + 1) {
            if victim.from == front.from {
                continue;
            }
            let closed = on_token
                .iter()
                .skip(j + 1)
                .any(|back| back.from == front.from && back.side == Side::Sell);
            if closed {
                return Some(front.from.clone());
            }
        }
    }
    None
}

#[async_trait]
impl MempoolRiskEstimator for MempoolHeuristics {
    async fn estimate(&self, order: &OrderRequest) -> Result<MempoolRisk> {
        let (pending, recent) = tokio::try_join!(
            self.source.pending(order.network),
            self.source.recent(order.network, self.sandwich_lookback),
        )?;

        let mut risk = MempoolRisk::default();

        let similar = pending
            .iter()
            .filter(|t| t.token == order.token && t.side == order.side)
            .count();
        if similar >= self.similar_pending_threshold {
            risk.details
                .push(format!("{} similar pending {} orders", similar, order.side));
        }

        if let Some(bot) = pending
            .iter()
            .find(|t| t.token == order.token && self.is_known_bot(&t.from))
        {
            risk.details
                .push(format!("known adversarial sender {} pending on token", bot.from));
        }

        if let Some(attacker) = find_sandwich(&recent, &order.token) {
            risk.details
                .push(format!("recent sandwich by {} on token", attacker));
        }

        risk.high = !risk.details.is_empty();
        Ok(risk)
    }
}

pub struct MevProtector {
    estimator: Arc<dyn MempoolRiskEstimator>,
    config: MevConfig,
}

impl MevProtector {
    pub fn new(estimator: Arc<dyn MempoolRiskEstimator>, config: MevConfig) -> Self {
        Self { estimator, config }
    }

    /// Apply fee escalation and the private-submission flag
    pub async fn protect(&self, order: OrderRequest) -> OrderRequest {
        if !self.config.enabled {
            return order;
        }

        let risk = match self.estimator.estimate(&order).await {
            Ok(risk) => risk,
            Err(e) => {
                warn!(
                    "MEV risk estimation failed for {}:{}, sending unmodified: {}",
                    order.network, order.token, e
                );
                return order;
            }
        };

        let mut protected = order;
        if self.config.private_submission {
            protected.private_submission = true;
        }
        if risk.high {
            warn!(
                "High MEV risk on {}:{}: {}",
                protected.network,
                protected.token,
                risk.details.join("; ")
            );
            protected.fees.max_fee_per_gas *= self.config.high_risk_fee_multiplier;
        } else {
            debug!("MEV risk low for {}:{}", protected.network, protected.token);
        }
        protected
    }
}
