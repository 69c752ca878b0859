//! Shared domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Supported blockchain networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[serde(alias = "ethereum")]
    Eth,
    Bsc,
    Solana,
}

impl Network {
    pub const ALL: [Network; 3] = [Network::Eth, Network::Bsc, Network::Solana];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Eth => "eth",
            Network::Bsc => "bsc",
            Network::Solana => "solana",
        }
    }

    /// Whether token addresses on this network are EVM hex addresses
    pub fn is_evm(&self) -> bool {
        matches!(self, Network::Eth | Network::Bsc)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eth" | "ethereum" => Ok(Network::Eth),
            "bsc" => Ok(Network::Bsc),
            "solana" | "sol" => Ok(Network::Solana),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown network '{}'",
                other
            ))),
        }
    }
}

/// Composite (network, token) key used by the price hub and the position map
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriceKey {
    pub network: Network,
    pub token: String,
}

impl PriceKey {
    pub fn new(network: Network, token: impl Into<String>) -> Self {
        Self {
            network,
            token: token.into(),
        }
    }
}

impl fmt::Display for PriceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.network, self.token)
    }
}

/// A token candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub address: String,
    pub network: Network,
    pub symbol: String,
    pub decimals: u8,
    /// Liquidity in USD
    pub liquidity: f64,
    pub volume_24h: f64,
    pub holder_count: u64,
    /// Last observed price, refreshed by ticks
    #[serde(default)]
    pub price: f64,
}

impl Token {
    pub fn key(&self) -> PriceKey {
        PriceKey::new(self.network, self.address.clone())
    }

    /// Refresh the mutable market fields from a tick
    pub fn apply_tick(&mut self, tick: &PriceTick) {
        self.price = tick.price;
        self.volume_24h = tick.volume_24h;
        self.liquidity = tick.liquidity;
    }
}

/// A price observation for one (network, token)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub network: Network,
    pub token: String,
    pub price: f64,
    pub volume_24h: f64,
    pub liquidity: f64,
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    pub fn key(&self) -> PriceKey {
        PriceKey::new(self.network, self.token.clone())
    }
}

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

/// Percentage change from `from` to `to`
pub fn pct_change(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        return 0.0;
    }
    (to - from) / from * 100.0
}
