//! Chain adapter contract and registry
//!
//! Each network is reached through one [`ChainAdapter`]. The core never
//! depends on chain-specific encoding beyond this trait.

pub mod failover;
pub mod paper;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::types::{Network, Side};

pub use failover::FailoverAdapter;

/// Fee parameters attached to every order
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeeParams {
    pub max_fee_per_gas: f64,
    pub max_priority_fee_per_gas: f64,
}

impl FeeParams {
    /// Base fees for a network: the configured cap and the scaled priority fee
    pub fn from_network(config: &NetworkConfig) -> Self {
        Self {
            max_fee_per_gas: config.max_gas_price,
            max_priority_fee_per_gas: config.priority_fee * config.gas_multiplier,
        }
    }
}

/// A buy or sell handed to a chain adapter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub network: Network,
    pub token: String,
    pub side: Side,
    pub amount: f64,
    pub fees: FeeParams,
    /// Submit through a private relay instead of the public mempool
    pub private_submission: bool,
    pub max_slippage_pct: f64,
}

impl OrderRequest {
    pub fn new(
        network: Network,
        token: impl Into<String>,
        side: Side,
        amount: f64,
        config: &NetworkConfig,
        max_slippage_pct: f64,
    ) -> Self {
        Self {
            network,
            token: token.into(),
            side,
            amount,
            fees: FeeParams::from_network(config),
            private_submission: false,
            max_slippage_pct,
        }
    }
}

/// Uniform capability set implemented once per network
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn network(&self) -> Network;

    /// Identity of the signing wallet; submissions are serialized per wallet
    fn wallet_id(&self) -> String {
        format!("{}:default", self.network())
    }

    async fn init(&self) -> Result<()>;

    /// Returns `Ok(false)` when the chain rejected the order
    async fn buy(&self, order: &OrderRequest) -> Result<bool>;

    async fn sell(&self, order: &OrderRequest) -> Result<bool>;

    async fn check_price(&self, token: &str) -> Result<f64>;

    /// Price on a specific exchange; adapters quoting a single venue ignore `dex`
    async fn check_price_on(&self, dex: &str, token: &str) -> Result<f64> {
        let _ = dex;
        self.check_price(token).await
    }

    async fn analyze_liquidity(&self, token: &str) -> Result<bool>;
}

/// Adapters keyed by network
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Network, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) {
        let network = adapter.network();
        if self.adapters.insert(network, adapter).is_some() {
            info!("Replaced chain adapter for {}", network);
        }
    }

    pub fn get(&self, network: Network) -> Result<Arc<dyn ChainAdapter>> {
        self.adapters
            .get(&network)
            .cloned()
            .ok_or_else(|| Error::AdapterNotFound(network.to_string()))
    }

    pub fn networks(&self) -> Vec<Network> {
        let mut networks: Vec<Network> = self.adapters.keys().copied().collect();
        networks.sort();
        networks
    }

    /// Initialise every adapter concurrently; any failure aborts startup
    pub async fn init_all(&self) -> Result<()> {
        let results = join_all(self.adapters.values().map(|adapter| {
            let adapter = adapter.clone();
            async move { (adapter.network(), adapter.init().await) }
        }))
        .await;

        for (network, result) in results {
            match result {
                Ok(()) => info!("Chain adapter for {} initialised", network),
                Err(e) => {
                    error!("Chain adapter for {} failed to initialise: {}", network, e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
