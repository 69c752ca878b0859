//! Paper trading market
//!
//! An in-process market used for dry runs and tests. It stands in for every
//! external oracle the core depends on: chain adapters, the contract
//! inspector, the transaction simulator, the mempool and the price stream.
//! Prices follow a seeded random walk so runs are reproducible.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{ChainAdapter, OrderRequest};
use crate::error::{Error, Result};
use crate::execution::mev::{MempoolSource, PendingTx};
use crate::feed::PriceTransport;
use crate::security::checks::{ContractInspector, HolderDistribution, LiquidityLock};
use crate::security::simulation::{SimulationResult, TransactionSimulator};
use crate::types::{Network, PriceKey, PriceTick, Side};

/// Everything the paper market knows about one token
#[derive(Debug, Clone)]
pub struct TokenProfile {
    pub price: f64,
    pub liquidity_usd: f64,
    pub volume_24h: f64,
    pub bytecode: String,
    pub owner: Option<String>,
    pub liquidity_locked: bool,
    pub unlock_at: Option<DateTime<Utc>>,
    pub holder_count: u64,
    pub top_holder_pct: f64,
    pub top10_pct: f64,
    pub verified: bool,
    /// Sells revert, as with a honeypot
    pub sell_blocked: bool,
    /// Maximum relative move per random-walk step
    pub volatility: f64,
}

impl TokenProfile {
    /// A token that passes every security check
    pub fn clean(price: f64) -> Self {
        Self {
            price,
            liquidity_usd: 1_000_000.0,
            volume_24h: 250_000.0,
            bytecode: "0x608060405234801561001057600080fd5b50".to_string(),
            owner: None,
            liquidity_locked: true,
            unlock_at: None,
            holder_count: 2_500,
            top_holder_pct: 2.0,
            top10_pct: 20.0,
            verified: true,
            sell_blocked: false,
            volatility: 0.01,
        }
    }
}

/// A submission the paper market accepted
#[derive(Debug, Clone)]
pub struct PaperFill {
    pub order: OrderRequest,
    pub price: f64,
    pub filled_at: DateTime<Utc>,
}

pub struct PaperMarket {
    profiles: DashMap<PriceKey, TokenProfile>,
    /// Per-exchange price overrides, keyed by (token key, dex)
    venue_prices: DashMap<(PriceKey, String), f64>,
    fills: Mutex<Vec<PaperFill>>,
    rng: Mutex<StdRng>,
}

impl PaperMarket {
    pub fn new(seed: u64) -> Self {
        Self {
            profiles: DashMap::new(),
            venue_prices: DashMap::new(),
            fills: Mutex::new(Vec::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn set_profile(&self, network: Network, token: &str, profile: TokenProfile) {
        self.profiles.insert(PriceKey::new(network, token), profile);
    }

    pub fn set_price(&self, network: Network, token: &str, price: f64) -> Result<()> {
        let mut profile = self.profile_mut(network, token)?;
        profile.price = price;
        Ok(())
    }

    pub fn set_venue_price(&self, network: Network, dex: &str, token: &str, price: f64) {
        self.venue_prices
            .insert((PriceKey::new(network, token), dex.to_string()), price);
    }

    pub fn profile(&self, network: Network, token: &str) -> Result<TokenProfile> {
        self.profiles
            .get(&PriceKey::new(network, token))
            .map(|p| p.clone())
            .ok_or_else(|| unknown(network, token))
    }

    fn profile_mut(
        &self,
        network: Network,
        token: &str,
    ) -> Result<dashmap::mapref::one::RefMut<'_, PriceKey, TokenProfile>> {
        self.profiles
            .get_mut(&PriceKey::new(network, token))
            .ok_or_else(|| unknown(network, token))
    }

    pub fn tokens(&self) -> Vec<PriceKey> {
        let mut keys: Vec<PriceKey> = self.profiles.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn fills(&self) -> Vec<PaperFill> {
        self.fills.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Advance one random-walk step for `key` and return the resulting tick
    pub fn step(&self, key: &PriceKey) -> Option<PriceTick> {
        let mut profile = self.profiles.get_mut(key)?;
        let shock: f64 = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(-1.0..=1.0),
            Err(_) => 0.0,
        };
        let next = profile.price * (1.0 + shock * profile.volatility);
        if next.is_finite() && next > 0.0 {
            profile.price = next;
        }
        Some(PriceTick {
            network: key.network,
            token: key.token.clone(),
            price: profile.price,
            volume_24h: profile.volume_24h,
            liquidity: profile.liquidity_usd,
            timestamp: Utc::now(),
        })
    }

    fn fill(&self, order: &OrderRequest) -> Result<bool> {
        let profile = self.profile(order.network, &order.token)?;
        if order.side == Side::Sell && profile.sell_blocked {
            debug!("Paper sell of {}:{} reverted", order.network, order.token);
            return Ok(false);
        }
        if let Ok(mut fills) = self.fills.lock() {
            fills.push(PaperFill {
                order: order.clone(),
                price: profile.price,
                filled_at: Utc::now(),
            });
        }
        Ok(true)
    }
}

fn unknown(network: Network, token: &str) -> Error {
    Error::Internal(format!("paper market has no token {}:{}", network, token))
}

#[async_trait]
impl ContractInspector for PaperMarket {
    async fn bytecode(&self, network: Network, token: &str) -> Result<String> {
        Ok(self.profile(network, token)?.bytecode)
    }

    async fn owner(&self, network: Network, token: &str) -> Result<Option<String>> {
        Ok(self.profile(network, token)?.owner)
    }

    async fn liquidity_lock(&self, network: Network, token: &str) -> Result<LiquidityLock> {
        let profile = self.profile(network, token)?;
        Ok(LiquidityLock {
            locked: profile.liquidity_locked,
            unlock_at: profile.unlock_at,
        })
    }

    async fn holder_distribution(&self, network: Network, token: &str) -> Result<HolderDistribution> {
        let profile = self.profile(network, token)?;
        Ok(HolderDistribution {
            holder_count: profile.holder_count,
            top_holder_pct: profile.top_holder_pct,
            top10_pct: profile.top10_pct,
        })
    }

    async fn is_verified(&self, network: Network, token: &str) -> Result<bool> {
        Ok(self.profile(network, token)?.verified)
    }

    async fn liquidity_usd(&self, network: Network, token: &str) -> Result<f64> {
        Ok(self.profile(network, token)?.liquidity_usd)
    }
}

#[async_trait]
impl TransactionSimulator for PaperMarket {
    async fn simulate(&self, order: &OrderRequest) -> Result<SimulationResult> {
        let profile = self
            .profile(order.network, &order.token)
            .map_err(|e| Error::SimulationFailure(e.to_string()))?;
        if order.side == Side::Sell && profile.sell_blocked {
            return Ok(SimulationResult::failed("TRANSFER_FROM_FAILED"));
        }
        Ok(SimulationResult::ok(if order.network.is_evm() { 150_000 } else { 5_000 }))
    }
}

#[async_trait]
impl MempoolSource for PaperMarket {
    async fn pending(&self, _network: Network) -> Result<Vec<PendingTx>> {
        Ok(Vec::new())
    }

    async fn recent(&self, _network: Network, _limit: usize) -> Result<Vec<PendingTx>> {
        Ok(Vec::new())
    }
}

/// Chain adapter backed by the paper market
pub struct PaperAdapter {
    network: Network,
    market: Arc<PaperMarket>,
}

impl PaperAdapter {
    pub fn new(network: Network, market: Arc<PaperMarket>) -> Self {
        Self { network, market }
    }
}

#[async_trait]
impl ChainAdapter for PaperAdapter {
    fn network(&self) -> Network {
        self.network
    }

    fn wallet_id(&self) -> String {
        format!("{}:paper", self.network)
    }

    async fn init(&self) -> Result<()> {
        info!("Paper adapter ready for {}", self.network);
        Ok(())
    }

    async fn buy(&self, order: &OrderRequest) -> Result<bool> {
        self.market.fill(order)
    }

    async fn sell(&self, order: &OrderRequest) -> Result<bool> {
        self.market.fill(order)
    }

    async fn check_price(&self, token: &str) -> Result<f64> {
        Ok(self.market.profile(self.network, token)?.price)
    }

    async fn check_price_on(&self, dex: &str, token: &str) -> Result<f64> {
        let venue = (PriceKey::new(self.network, token), dex.to_string());
        match self.market.venue_prices.get(&venue) {
            Some(price) => Ok(*price),
            None => self.check_price(token).await,
        }
    }

    async fn analyze_liquidity(&self, token: &str) -> Result<bool> {
        Ok(self.market.profile(self.network, token)?.liquidity_usd > 0.0)
    }
}

/// Price stream that walks every subscribed token once per interval
pub struct PaperTransport {
    market: Arc<PaperMarket>,
    interval: Duration,
    subscribed: Arc<DashSet<PriceKey>>,
}

impl PaperTransport {
    pub fn new(market: Arc<PaperMarket>, interval: Duration) -> Self {
        Self {
            market,
            interval,
            subscribed: Arc::new(DashSet::new()),
        }
    }
}

#[async_trait]
impl PriceTransport for PaperTransport {
    async fn connect(&self) -> Result<mpsc::Receiver<PriceTick>> {
        let (tx, rx) = mpsc::channel(256);
        let market = self.market.clone();
        let subscribed = self.subscribed.clone();
        let period = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let keys: Vec<PriceKey> = subscribed.iter().map(|k| k.clone()).collect();
                for key in keys {
                    if let Some(tick) = market.step(&key) {
                        if tx.send(tick).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn subscribe(&self, key: &PriceKey) -> Result<()> {
        self.subscribed.insert(key.clone());
        Ok(())
    }

    async fn unsubscribe(&self, key: &PriceKey) -> Result<()> {
        self.subscribed.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;

    #[test]
    fn test_random_walk_is_reproducible() {
        let walk = |seed| {
            let market = PaperMarket::new(seed);
            market.set_profile(Network::Bsc, "0xa", TokenProfile::clean(1.0));
            let key = PriceKey::new(Network::Bsc, "0xa");
            (0..10)
                .map(|_| market.step(&key).unwrap().price)
                .collect::<Vec<_>>()
        };
        assert_eq!(walk(42), walk(42));
        assert!(walk(42).iter().all(|p| *p > 0.0));
    }

    #[tokio::test]
    async fn test_blocked_sell_is_rejected() {
        let market = Arc::new(PaperMarket::new(3));
        market.set_profile(
            Network::Eth,
            "0xpot",
            TokenProfile {
                sell_blocked: true,
                ..TokenProfile::clean(1.0)
            },
        );
        let adapter = PaperAdapter::new(Network::Eth, market.clone());
        let config = NetworkConfig::for_network(Network::Eth);

        let buy = OrderRequest::new(Network::Eth, "0xpot", Side::Buy, 1.0, &config, 1.0);
        let sell = OrderRequest::new(Network::Eth, "0xpot", Side::Sell, 1.0, &config, 1.0);
        assert!(adapter.buy(&buy).await.unwrap());
        assert!(!adapter.sell(&sell).await.unwrap());
        assert_eq!(market.fills().len(), 1);

        assert!(!market.simulate(&sell).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_venue_price_override() {
        let market = Arc::new(PaperMarket::new(3));
        market.set_profile(Network::Solana, "So1", TokenProfile::clean(10.0));
        market.set_venue_price(Network::Solana, "raydium", "So1", 10.5);
        let adapter = PaperAdapter::new(Network::Solana, market);

        assert_eq!(adapter.check_price_on("raydium", "So1").await.unwrap(), 10.5);
        assert_eq!(adapter.check_price_on("orca", "So1").await.unwrap(), 10.0);
        assert!(adapter.check_price("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_transport_streams_subscribed_tokens() {
        let market = Arc::new(PaperMarket::new(5));
        market.set_profile(Network::Bsc, "0xa", TokenProfile::clean(1.0));
        market.set_profile(Network::Bsc, "0xb", TokenProfile::clean(2.0));
        let transport = PaperTransport::new(market, Duration::from_millis(5));

        transport
            .subscribe(&PriceKey::new(Network::Bsc, "0xa"))
            .await
            .unwrap();
        let mut rx = transport.connect().await.unwrap();
        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.token, "0xa");
    }
}
