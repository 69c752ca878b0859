//! Trader
//!
//! Builds every service from the configuration and the external backends,
//! wires them together, runs the background tasks and shuts them down in
//! order.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analytics::PortfolioAnalyzer;
use crate::arbitrage::ArbitrageMonitor;
use crate::chain::paper::{PaperAdapter, PaperMarket, PaperTransport};
use crate::chain::{AdapterRegistry, ChainAdapter, FailoverAdapter};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::execution::{MempoolHeuristics, MempoolSource, MevProtector, OrderExecutor};
use crate::feed::{FeedConnection, PriceFeedHub, PriceTransport};
use crate::position::{Position, PositionManager};
use crate::retry::RetryPolicy;
use crate::security::{ContractInspector, SecurityAssessment, SecurityGate, TransactionSimulator};
use crate::signal::SignalEngine;
use crate::strategy::{KellySizer, StrategyEngine, StrategyServices};
use crate::types::{Network, Token};

const EVENT_BUS_CAPACITY: usize = 1024;

/// External collaborators the core talks to
pub struct Backends {
    pub adapters: AdapterRegistry,
    pub inspector: Arc<dyn ContractInspector>,
    pub simulator: Arc<dyn TransactionSimulator>,
    pub mempool: Arc<dyn MempoolSource>,
    pub transport: Arc<dyn PriceTransport>,
}

impl Backends {
    /// Everything backed by one simulated market
    pub fn paper(market: Arc<PaperMarket>, tick_interval: Duration) -> Self {
        let mut adapters = AdapterRegistry::new();
        for network in Network::ALL {
            adapters.register(Arc::new(PaperAdapter::new(network, market.clone())));
        }
        Self {
            adapters,
            inspector: market.clone(),
            simulator: market.clone(),
            mempool: market.clone(),
            transport: Arc::new(PaperTransport::new(market, tick_interval)),
        }
    }

    /// Paper market with one simulated endpoint per configured RPC URL,
    /// behind failover
    pub fn paper_with_failover(
        market: Arc<PaperMarket>,
        config: &Config,
        tick_interval: Duration,
    ) -> Result<Self> {
        let mut backends = Self::paper(market.clone(), tick_interval);
        let mut adapters = AdapterRegistry::new();
        for network in config.enabled_networks() {
            let endpoints = config
                .network(network)
                .map_or(1, |n| n.rpc_urls.len().max(1));
            let endpoints: Vec<Arc<dyn ChainAdapter>> = (0..endpoints)
                .map(|_| Arc::new(PaperAdapter::new(network, market.clone())) as Arc<dyn ChainAdapter>)
                .collect();
            adapters.register(Arc::new(FailoverAdapter::new(
                network,
                endpoints,
                config.retry.failover_threshold,
            )?));
        }
        backends.adapters = adapters;
        Ok(backends)
    }
}

pub struct Trader {
    config: Config,
    events: EventBus,
    hub: PriceFeedHub,
    executor: Arc<OrderExecutor>,
    gate: Arc<SecurityGate>,
    positions: Arc<PositionManager>,
    engine: Arc<StrategyEngine>,
    arbitrage: Option<Arc<ArbitrageMonitor>>,
    analytics: Arc<PortfolioAnalyzer>,
    feed: Arc<FeedConnection>,
    sizer: KellySizer,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Trader {
    pub fn new(config: Config, backends: Backends) -> Self {
        let events = EventBus::new(EVENT_BUS_CAPACITY);
        let hub = PriceFeedHub::new(config.feed.significant_move_pct, events.clone());

        let mev = MevProtector::new(
            Arc::new(MempoolHeuristics::new(backends.mempool, &config.mev)),
            config.mev.clone(),
        );
        let executor = Arc::new(OrderExecutor::new(
            &config,
            backends.adapters,
            mev,
            RetryPolicy::new(&config.retry),
            events.clone(),
        ));
        let gate = Arc::new(SecurityGate::new(
            &config,
            backends.inspector.clone(),
            backends.simulator.clone(),
            events.clone(),
        ));
        let positions = Arc::new(PositionManager::new(
            &config,
            executor.clone(),
            hub.clone(),
            events.clone(),
        ));
        let arbitrage = config.arbitrage.enabled.then(|| {
            Arc::new(ArbitrageMonitor::new(
                config.arbitrage.clone(),
                executor.clone(),
                gate.clone(),
                backends.inspector.clone(),
                backends.simulator.clone(),
                events.clone(),
            ))
        });
        let sizer = KellySizer::new(config.sizing.clone());

        let services = StrategyServices {
            executor: executor.clone(),
            gate: gate.clone(),
            positions: positions.clone(),
            signals: SignalEngine::new(config.signals.clone()),
            arbitrage: arbitrage.clone(),
            sizer: sizer.clone(),
            events: events.clone(),
        };
        let engine = Arc::new(StrategyEngine::new(&config, services));
        let analytics = Arc::new(PortfolioAnalyzer::new(config.analytics.clone(), positions.clone()));
        let feed = Arc::new(FeedConnection::new(
            backends.transport,
            hub.clone(),
            config.feed.clone(),
        ));
        let (shutdown, _) = broadcast::channel(1);

        Self {
            config,
            events,
            hub,
            executor,
            gate,
            positions,
            engine,
            arbitrage,
            analytics,
            feed,
            sizer,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn hub(&self) -> &PriceFeedHub {
        &self.hub
    }

    pub fn executor(&self) -> &Arc<OrderExecutor> {
        &self.executor
    }

    pub fn gate(&self) -> &Arc<SecurityGate> {
        &self.gate
    }

    pub fn positions(&self) -> &Arc<PositionManager> {
        &self.positions
    }

    pub fn engine(&self) -> &Arc<StrategyEngine> {
        &self.engine
    }

    pub fn arbitrage(&self) -> Option<&Arc<ArbitrageMonitor>> {
        self.arbitrage.as_ref()
    }

    pub fn analytics(&self) -> &Arc<PortfolioAnalyzer> {
        &self.analytics
    }

    pub fn feed(&self) -> &Arc<FeedConnection> {
        &self.feed
    }

    /// Receiver for the shutdown signal, for tasks spawned outside the trader
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Initialise adapters and spawn the background tasks
    pub async fn start(&self) -> Result<()> {
        self.executor.registry().init_all().await?;

        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Err(Error::Internal("trader already started".to_string()));
        }

        let positions = self.positions.clone();
        let shutdown = self.shutdown.subscribe();
        let events = self.events.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = positions.run(shutdown).await {
                error!("Position manager stopped: {}", e);
                events.emit_error("positions", &e);
            }
        }));

        let feed = self.feed.clone();
        let shutdown = self.shutdown.subscribe();
        let events = self.events.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = feed.run(shutdown).await {
                error!("Price feed stopped: {}", e);
                events.emit_error("feed", &e);
            }
        }));

        if let Some(monitor) = &self.arbitrage {
            let monitor = monitor.clone();
            let shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move { monitor.run(shutdown).await }));
        }

        let analytics = self.analytics.clone();
        let trade_events = self.events.subscribe();
        let shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            analytics.run(trade_events, shutdown).await
        }));

        info!("Trader started with {} background tasks", tasks.len());
        Ok(())
    }

    /// Screen a detected token and open a position when it passes.
    /// Returns `None` when the token is skipped.
    pub async fn evaluate_candidate(&self, token: &Token) -> Result<Option<Position>> {
        let min_holders = self.gate.config().min_holders;
        if token.holder_count < min_holders {
            debug!(
                "Skipping {}:{} ({} holders < {})",
                token.network, token.address, token.holder_count, min_holders
            );
            return Ok(None);
        }

        let assessment: SecurityAssessment = self.gate.assess(token.network, &token.address).await;
        if !assessment.safe {
            info!(
                "Skipping {} ({}:{}): {}",
                token.symbol,
                token.network,
                token.address,
                assessment.risks.join("; ")
            );
            return Ok(None);
        }

        if !self.executor.liquidity_ok(token.network, &token.address).await? {
            info!("Skipping {}: adapter reports no usable liquidity", token.symbol);
            return Ok(None);
        }

        let amount = self.sizer.size(0.0);
        if amount <= 0.0 {
            warn!("Sizer returned 0 for {}, not trading", token.symbol);
            return Ok(None);
        }
        let position = self.positions.open_position(&assessment, amount).await?;
        Ok(Some(position))
    }

    /// Stop strategies, then every background task. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.engine.stop_all().await;
        if self.shutdown.send(()).is_err() {
            debug!("No background tasks listening for shutdown");
        }
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Background task failed: {}", e);
            }
        }
        info!("Trader stopped");
    }
}

/// Candidate intake over a channel fed by an external detector
pub async fn run_intake(
    trader: Arc<Trader>,
    mut candidates: tokio::sync::mpsc::Receiver<Token>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            candidate = candidates.recv() => {
                let Some(token) = candidate else { break };
                match trader.evaluate_candidate(&token).await {
                    Ok(Some(position)) => info!(
                        "Opened {} at {} (amount {})",
                        position.key, position.entry_price, position.amount
                    ),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Candidate {} failed: {}", token.symbol, e);
                        trader
                            .events()
                            .emit_error(format!("intake:{}:{}", token.network, token.address), &e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::paper::TokenProfile;

    fn token(address: &str, holders: u64) -> Token {
        Token {
            address: address.to_string(),
            network: Network::Eth,
            symbol: "TKN".to_string(),
            decimals: 18,
            liquidity: 0.0,
            volume_24h: 0.0,
            holder_count: holders,
            price: 0.0,
        }
    }

    fn trader(market: Arc<PaperMarket>) -> Trader {
        Trader::new(Config::default(), Backends::paper(market, Duration::from_millis(10)))
    }

    #[tokio::test]
    async fn test_candidate_opens_position() {
        let market = Arc::new(PaperMarket::new(9));
        market.set_profile(Network::Eth, "0xgood", TokenProfile::clean(2.0));
        let trader = trader(market.clone());

        let position = trader
            .evaluate_candidate(&token("0xgood", 500))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(position.entry_price, 2.0);
        assert_eq!(trader.positions().position_count().await, 1);
        assert_eq!(market.fills().len(), 1);
    }

    #[tokio::test]
    async fn test_candidate_with_few_holders_is_skipped() {
        let market = Arc::new(PaperMarket::new(9));
        market.set_profile(Network::Eth, "0xnew", TokenProfile::clean(2.0));
        let trader = trader(market.clone());

        assert!(trader.evaluate_candidate(&token("0xnew", 3)).await.unwrap().is_none());
        assert!(market.fills().is_empty());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let market = Arc::new(PaperMarket::new(9));
        let trader = trader(market);
        trader.start().await.unwrap();
        assert!(trader.start().await.is_err());
        trader.shutdown().await;
        trader.shutdown().await;
    }
}
