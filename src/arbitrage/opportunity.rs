//! Pairwise spread detection

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{pct_change, Network};

/// Price and depth observed on one (network, exchange) venue
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueQuote {
    pub network: Network,
    pub dex: String,
    /// Token address on this venue's network
    pub address: String,
    pub price: f64,
    pub liquidity: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrageOpportunity {
    pub token: String,
    pub source_network: Network,
    pub source_dex: String,
    pub source_address: String,
    pub target_network: Network,
    pub target_dex: String,
    pub target_address: String,
    pub source_price: f64,
    pub target_price: f64,
    pub profit_percent: f64,
    /// Price difference times the configured trade amount
    pub estimated_profit: f64,
    /// Shallower of the two legs, USD
    pub liquidity: f64,
    /// 100 minus the weaker leg's security score, 0 until validated
    pub risk_score: u32,
    pub detected_at: DateTime<Utc>,
}

/// Thresholds applied to every (source, target) pair
#[derive(Debug, Clone, Copy)]
pub struct SpreadFilter {
    pub min_profit_percent: f64,
    pub min_liquidity: f64,
    pub trade_amount: f64,
}

/// Every ordered pair where the target pays more than the source, filtered
/// and ranked by descending profit
pub fn find_opportunities(
    token: &str,
    quotes: &[VenueQuote],
    filter: SpreadFilter,
) -> Vec<ArbitrageOpportunity> {
    let now = Utc::now();
    let mut found = Vec::new();

    for source in quotes {
        for target in quotes {
            if std::ptr::eq(source, target) || source.price <= 0.0 || target.price <= source.price {
                continue;
            }
            let profit_percent = pct_change(source.price, target.price);
            let liquidity = source.liquidity.min(target.liquidity);
            if profit_percent < filter.min_profit_percent || liquidity < filter.min_liquidity {
                continue;
            }
            found.push(ArbitrageOpportunity {
                token: token.to_string(),
                source_network: source.network,
                source_dex: source.dex.clone(),
                source_address: source.address.clone(),
                target_network: target.network,
                target_dex: target.dex.clone(),
                target_address: target.address.clone(),
                source_price: source.price,
                target_price: target.price,
                profit_percent,
                estimated_profit: (target.price - source.price) * filter.trade_amount,
                liquidity,
                risk_score: 0,
                detected_at: now,
            });
        }
    }

    rank(&mut found);
    found
}

/// Sort descending by profit percent
pub fn rank(opportunities: &mut [ArbitrageOpportunity]) {
    opportunities.sort_by(|a, b| b.profit_percent.total_cmp(&a.profit_percent));
}
