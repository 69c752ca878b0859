//! Position management
//!
//! Owns every open position. Positions are driven by price ticks pushed from
//! the feed hub; each tick refreshes the price and peak, evaluates the exit
//! rules and, when one fires, closes the position through the order executor.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

use super::exit::{check_exit, ExitReason, ExitRules};
use crate::config::{Config, NetworkConfig};
use crate::error::{Error, Result};
use crate::events::{EventBus, TradeEvent};
use crate::execution::OrderExecutor;
use crate::feed::{PriceFeedHub, Subscription};
use crate::security::SecurityAssessment;
use crate::types::{pct_change, Network, PriceKey, PriceTick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionState {
    Pending,
    Open,
    Closing,
    Closed,
}

/// A single position in a token
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub key: PriceKey,
    pub entry_price: f64,
    pub current_price: f64,
    /// Highest price seen since open, for the trailing stop
    pub peak_price: f64,
    pub amount: f64,
    pub opened_at: DateTime<Utc>,
    pub state: PositionState,
    /// Set when closing starts; retries reuse it
    pub exit_reason: Option<ExitReason>,
    #[serde(skip)]
    sell_in_flight: bool,
}

impl Position {
    fn pending(key: PriceKey, amount: f64) -> Self {
        Self {
            key,
            entry_price: 0.0,
            current_price: 0.0,
            peak_price: 0.0,
            amount,
            opened_at: Utc::now(),
            state: PositionState::Pending,
            exit_reason: None,
            sell_in_flight: false,
        }
    }

    fn observe(&mut self, price: f64) {
        self.current_price = price;
        if price > self.peak_price {
            self.peak_price = price;
        }
    }

    pub fn profit_pct(&self) -> f64 {
        pct_change(self.entry_price, self.current_price)
    }

    pub fn unrealized_pnl(&self) -> f64 {
        (self.current_price - self.entry_price) * self.amount
    }

    pub fn is_profitable(&self) -> bool {
        self.unrealized_pnl() > 0.0
    }

    fn occupies_slot(&self) -> bool {
        self.state != PositionState::Closed
    }
}

/// Daily trading statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct DailyStats {
    pub date: String,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_profit: f64,
    pub total_loss: f64,
    pub net_pnl: f64,
}

impl DailyStats {
    pub fn new() -> Self {
        Self {
            date: Utc::now().format("%Y-%m-%d").to_string(),
            ..Default::default()
        }
    }

    pub fn record_trade(&mut self, pnl: f64) {
        self.total_trades += 1;
        if pnl >= 0.0 {
            self.winning_trades += 1;
            self.total_profit += pnl;
        } else {
            self.losing_trades += 1;
            self.total_loss += pnl.abs();
        }
        self.net_pnl = self.total_profit - self.total_loss;
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        (self.winning_trades as f64 / self.total_trades as f64) * 100.0
    }
}

type PositionMap = Arc<RwLock<HashMap<PriceKey, Position>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimStage {
    /// Buy submitted, position still Pending
    Opening,
    /// Sell submitted, `sell_in_flight` set
    Selling,
    /// Sell confirmed, entry not yet removed
    Sold,
}

/// Holds an in-flight open or sell on a key. If the future driving it is
/// dropped before `release`, the entry is put back into a state the next
/// tick or call can act on.
struct Claim {
    positions: PositionMap,
    key: PriceKey,
    stage: ClaimStage,
    armed: bool,
}

impl Claim {
    fn new(positions: &PositionMap, key: &PriceKey, stage: ClaimStage) -> Self {
        Self {
            positions: positions.clone(),
            key: key.clone(),
            stage,
            armed: true,
        }
    }

    fn advance(&mut self, stage: ClaimStage) {
        self.stage = stage;
    }

    fn release(mut self) {
        self.armed = false;
    }
}

fn abandon(positions: &mut HashMap<PriceKey, Position>, key: &PriceKey, stage: ClaimStage) {
    match stage {
        ClaimStage::Opening => {
            if positions.get(key).is_some_and(|p| p.state == PositionState::Pending) {
                positions.remove(key);
            }
        }
        ClaimStage::Selling => {
            if let Some(position) = positions.get_mut(key) {
                position.sell_in_flight = false;
            }
        }
        ClaimStage::Sold => {
            positions.remove(key);
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!("{:?} of {} abandoned mid-flight", self.stage, self.key);
        if let Ok(mut positions) = self.positions.try_write() {
            abandon(&mut positions, &self.key, self.stage);
            return;
        }
        // The map is busy; finish the cleanup once it frees up
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let positions = self.positions.clone();
            let key = self.key.clone();
            let stage = self.stage;
            handle.spawn(async move {
                abandon(&mut *positions.write().await, &key, stage);
            });
        }
    }
}

/// Position manager
pub struct PositionManager {
    positions: PositionMap,
    daily_stats: Mutex<DailyStats>,
    networks: BTreeMap<Network, NetworkConfig>,
    decision_window: Duration,
    executor: Arc<OrderExecutor>,
    hub: PriceFeedHub,
    subscriptions: DashMap<PriceKey, Subscription>,
    tick_tx: mpsc::Sender<PriceTick>,
    tick_rx: Mutex<Option<mpsc::Receiver<PriceTick>>>,
    events: EventBus,
}

impl PositionManager {
    pub fn new(config: &Config, executor: Arc<OrderExecutor>, hub: PriceFeedHub, events: EventBus) -> Self {
        let (tick_tx, tick_rx) = mpsc::channel(config.feed.channel_capacity.max(1));
        Self {
            positions: Arc::new(RwLock::new(HashMap::new())),
            daily_stats: Mutex::new(DailyStats::new()),
            networks: config.networks.clone(),
            decision_window: Duration::from_secs(config.security.decision_window_secs),
            executor,
            hub,
            subscriptions: DashMap::new(),
            tick_tx,
            tick_rx: Mutex::new(Some(tick_rx)),
            events,
        }
    }

    fn network_config(&self, network: Network) -> Result<&NetworkConfig> {
        self.networks
            .get(&network)
            .filter(|c| c.enabled)
            .ok_or_else(|| Error::InvalidConfiguration(format!("network {} not enabled", network)))
    }

    /// Open a position for a token that just passed the security gate
    pub async fn open_position(&self, assessment: &SecurityAssessment, amount: f64) -> Result<Position> {
        let key = assessment.key();

        if !assessment.safe {
            return Err(Error::SecurityCheckFailure {
                token: key.to_string(),
                reason: assessment.risks.join("; "),
            });
        }
        if !assessment.is_fresh(self.decision_window) {
            return Err(Error::AssessmentRejected(format!(
                "assessment for {} is older than {}s",
                key,
                self.decision_window.as_secs()
            )));
        }
        if amount <= 0.0 || !amount.is_finite() {
            return Err(Error::ExecutionFailure(format!("invalid position amount {}", amount)));
        }
        let max_positions = self.network_config(key.network)?.max_positions;

        // Reserve the key before any await so concurrent opens cannot race
        {
            let mut positions = self.positions.write().await;
            if positions.contains_key(&key) {
                return Err(Error::PositionExists(key.to_string()));
            }
            let on_network = positions
                .values()
                .filter(|p| p.key.network == key.network && p.occupies_slot())
                .count();
            if on_network >= max_positions {
                return Err(Error::PositionLimitReached {
                    network: key.network.to_string(),
                    max: max_positions,
                });
            }
            positions.insert(key.clone(), Position::pending(key.clone(), amount));
        }

        let claim = Claim::new(&self.positions, &key, ClaimStage::Opening);
        let bought = async {
            let price = self.executor.price(key.network, &key.token).await?;
            self.executor.buy(key.network, &key.token, amount, price).await
        }
        .await;

        let report = match bought {
            Ok(report) => report,
            Err(e) => {
                self.positions.write().await.remove(&key);
                claim.release();
                warn!("Opening {} failed: {}", key, e);
                return Err(e);
            }
        };

        let position = {
            let mut positions = self.positions.write().await;
            let position = positions
                .get_mut(&key)
                .ok_or_else(|| Error::PositionNotFound(key.to_string()))?;
            position.entry_price = report.price;
            position.current_price = report.price;
            position.peak_price = report.price;
            position.opened_at = Utc::now();
            position.state = PositionState::Open;
            position.clone()
        };
        claim.release();

        self.subscriptions
            .insert(key.clone(), self.hub.subscribe(key.clone(), self.tick_tx.clone()));

        info!("Opened position in {} at {} (amount {})", key, position.entry_price, amount);
        self.events.emit(TradeEvent::PositionOpened {
            network: key.network,
            token: key.token.clone(),
            entry_price: position.entry_price,
            amount,
        });

        Ok(position)
    }

    /// Apply one price tick to the tracked position for its key, closing it
    /// when an exit rule fires
    pub async fn on_tick(&self, tick: &PriceTick) {
        if let Some((key, reason)) = self.evaluate(tick).await {
            self.settle_or_defer(key, reason).await;
        }
    }

    /// Refresh the position for `tick` and claim its sell if one is due
    async fn evaluate(&self, tick: &PriceTick) -> Option<(PriceKey, ExitReason)> {
        let key = tick.key();
        let rules = ExitRules::from_network(self.network_config(key.network).ok()?);

        let mut positions = self.positions.write().await;
        let position = positions.get_mut(&key)?;
        let reason = match position.state {
            PositionState::Open => {
                position.observe(tick.price);
                let reason =
                    check_exit(&rules, position.entry_price, position.current_price, position.peak_price)?;
                info!(
                    "{} triggered for {} at {} ({:+.2}%)",
                    reason,
                    key,
                    tick.price,
                    position.profit_pct()
                );
                position.state = PositionState::Closing;
                position.exit_reason = Some(reason);
                reason
            }
            PositionState::Closing if !position.sell_in_flight => {
                position.observe(tick.price);
                position.exit_reason?
            }
            _ => return None,
        };
        position.sell_in_flight = true;
        Some((key, reason))
    }

    fn settle_or_defer(&self, key: PriceKey, reason: ExitReason) -> impl Future<Output = ()> + '_ {
        async move {
            if let Err(e) = self.settle(&key, reason).await {
                debug!("Close of {} deferred to the next tick: {}", key, e);
            }
        }
    }

    /// Close a position outside the exit rules (manual or strategy driven)
    pub async fn close_position(&self, network: Network, token: &str, reason: ExitReason) -> Result<f64> {
        let key = PriceKey::new(network, token);
        // Pushed ticks may lag a strategy's own polling; sell at a fresh quote
        let quote = self.executor.price(network, token).await;
        let reason = {
            let mut positions = self.positions.write().await;
            let position = positions
                .get_mut(&key)
                .ok_or_else(|| Error::PositionNotFound(key.to_string()))?;
            match position.state {
                PositionState::Open | PositionState::Closing if !position.sell_in_flight => {
                    match &quote {
                        Ok(price) => position.observe(*price),
                        Err(e) => debug!("Closing {} at last tick price {}: {}", key, position.current_price, e),
                    }
                    position.state = PositionState::Closing;
                    position.sell_in_flight = true;
                    *position.exit_reason.get_or_insert(reason)
                }
                PositionState::Pending => {
                    return Err(Error::ExecutionFailure(format!("{} is still opening", key)));
                }
                _ => {
                    return Err(Error::ExecutionFailure(format!("{} is already closing", key)));
                }
            }
        };
        self.settle(&key, reason).await
    }

    /// Sell a Closing position; on success remove it and report the profit.
    /// The caller has already set `sell_in_flight`.
    async fn settle(&self, key: &PriceKey, reason: ExitReason) -> Result<f64> {
        let mut claim = Claim::new(&self.positions, key, ClaimStage::Selling);
        let (amount, entry_price, exit_price) = {
            let positions = self.positions.read().await;
            let position = positions
                .get(key)
                .ok_or_else(|| Error::PositionNotFound(key.to_string()))?;
            (position.amount, position.entry_price, position.current_price)
        };

        if let Err(e) = self
            .executor
            .sell(key.network, &key.token, amount, exit_price)
            .await
        {
            warn!("Closing {} failed, position stays closing: {}", key, e);
            if let Some(position) = self.positions.write().await.get_mut(key) {
                position.sell_in_flight = false;
            }
            claim.release();
            self.events.emit_error(format!("close position {}", key), &e);
            return Err(e);
        }

        claim.advance(ClaimStage::Sold);
        self.subscriptions.remove(key);
        self.positions.write().await.remove(key);
        claim.release();

        let realized_profit = (exit_price - entry_price) * amount;
        let profit_pct = pct_change(entry_price, exit_price);
        self.daily_stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record_trade(realized_profit);

        info!(
            "Closed position in {} ({}) at {}, P&L {:.6} ({:+.2}%)",
            key, reason, exit_price, realized_profit, profit_pct
        );
        self.events.emit(TradeEvent::PositionClosed {
            network: key.network,
            token: key.token.clone(),
            reason,
            entry_price,
            exit_price,
            realized_profit,
            profit_pct,
        });
        Ok(realized_profit)
    }

    /// Consume pushed ticks until shutdown
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut ticks = self
            .tick_rx
            .lock()
            .map_err(|e| Error::Internal(e.to_string()))?
            .take()
            .ok_or_else(|| Error::Internal("position manager already running".to_string()))?;

        info!("Position manager running");
        // Sells run alongside the tick loop so one slow exit cannot hold up
        // the others; `sell_in_flight` keeps each key to a single sell
        let mut closing = FuturesUnordered::new();
        loop {
            tokio::select! {
                tick = ticks.recv() => match tick {
                    Some(tick) => {
                        if let Some((key, reason)) = self.evaluate(&tick).await {
                            closing.push(self.settle_or_defer(key, reason));
                        }
                    }
                    None => break,
                },
                Some(()) = closing.next(), if !closing.is_empty() => {}
                _ = shutdown.recv() => break,
            }
        }
        info!("Position manager stopped");
        Ok(())
    }

    pub async fn get_position(&self, network: Network, token: &str) -> Option<Position> {
        let positions = self.positions.read().await;
        positions.get(&PriceKey::new(network, token)).cloned()
    }

    pub async fn get_all_positions(&self) -> Vec<Position> {
        let positions = self.positions.read().await;
        let mut all: Vec<Position> = positions.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    pub async fn position_count(&self) -> usize {
        self.positions.read().await.len()
    }

    /// Sum of amount × current price over open positions
    pub async fn total_position_value(&self) -> f64 {
        let positions = self.positions.read().await;
        positions
            .values()
            .filter(|p| p.state != PositionState::Pending)
            .map(|p| p.amount * p.current_price)
            .sum()
    }

    pub async fn total_unrealized_pnl(&self) -> f64 {
        let positions = self.positions.read().await;
        positions
            .values()
            .filter(|p| p.state != PositionState::Pending)
            .map(|p| p.unrealized_pnl())
            .sum()
    }

    pub async fn get_daily_stats(&self) -> DailyStats {
        self.daily_stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Reset daily stats (call at UTC midnight)
    pub async fn reset_daily_stats(&self) {
        *self.daily_stats.lock().unwrap_or_else(|e| e.into_inner()) = DailyStats::new();
        info!("Daily stats reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::paper::{PaperAdapter, PaperMarket, TokenProfile};
    use crate::chain::AdapterRegistry;
    use crate::execution::{MempoolHeuristics, MevProtector};
    use crate::retry::RetryPolicy;

    struct Harness {
        market: Arc<PaperMarket>,
        executor: Arc<OrderExecutor>,
        manager: PositionManager,
        hub: PriceFeedHub,
        events: EventBus,
    }

    fn harness(config: Config) -> Harness {
        let events = EventBus::default();
        let market = Arc::new(PaperMarket::new(11));
        let mut registry = AdapterRegistry::new();
        for network in Network::ALL {
            registry.register(Arc::new(PaperAdapter::new(network, market.clone())));
        }
        let mev = MevProtector::new(
            Arc::new(MempoolHeuristics::new(market.clone(), &config.mev)),
            config.mev.clone(),
        );
        let retry = RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 3,
            call_timeout: Duration::from_secs(1),
        };
        let executor = Arc::new(OrderExecutor::new(&config, registry, mev, retry, events.clone()));
        let hub = PriceFeedHub::new(config.feed.significant_move_pct, events.clone());
        let manager = PositionManager::new(&config, executor.clone(), hub.clone(), events.clone());
        Harness {
            market,
            executor,
            manager,
            hub,
            events,
        }
    }

    fn safe(network: Network, token: &str) -> SecurityAssessment {
        SecurityAssessment {
            network,
            token: token.to_string(),
            safe: true,
            score: 100,
            risks: Vec::new(),
            checks: None,
            assessed_at: Utc::now(),
        }
    }

    fn tick(token: &str, price: f64) -> PriceTick {
        tick_on(Network::Eth, token, price)
    }

    fn tick_on(network: Network, token: &str, price: f64) -> PriceTick {
        PriceTick {
            network,
            token: token.to_string(),
            price,
            volume_24h: 0.0,
            liquidity: 0.0,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_take_profit_closes_position() {
        let h = harness(Config::default());
        h.market.set_profile(Network::Eth, "0xa", TokenProfile::clean(100.0));
        let mut events = h.events.subscribe();

        let opened = h.manager.open_position(&safe(Network::Eth, "0xa"), 2.0).await.unwrap();
        assert_eq!(opened.state, PositionState::Open);
        assert_eq!(opened.entry_price, 100.0);

        for price in [120.0, 140.0] {
            h.manager.on_tick(&tick("0xa", price)).await;
            assert!(h.manager.get_position(Network::Eth, "0xa").await.is_some());
        }
        h.manager.on_tick(&tick("0xa", 151.0)).await;
        assert!(h.manager.get_position(Network::Eth, "0xa").await.is_none());

        let mut closed = None;
        while let Ok(event) = events.try_recv() {
            if let TradeEvent::PositionClosed { reason, exit_price, realized_profit, .. } = event {
                closed = Some((reason, exit_price, realized_profit));
            }
        }
        let (reason, exit_price, realized_profit) = closed.unwrap();
        assert_eq!(reason, ExitReason::TakeProfit);
        assert_eq!(exit_price, 151.0);
        assert!((realized_profit - 102.0).abs() < 1e-9);
        assert_eq!(h.manager.get_daily_stats().await.winning_trades, 1);
        assert!(h.hub.active_keys().is_empty());
    }

    #[tokio::test]
    async fn test_unsafe_or_stale_assessment_rejected() {
        let h = harness(Config::default());
        h.market.set_profile(Network::Eth, "0xa", TokenProfile::clean(1.0));

        let mut unsafe_assessment = safe(Network::Eth, "0xa");
        unsafe_assessment.safe = false;
        unsafe_assessment.risks = vec!["Contract not verified".into()];
        assert!(matches!(
            h.manager.open_position(&unsafe_assessment, 1.0).await,
            Err(Error::SecurityCheckFailure { .. })
        ));

        let mut stale = safe(Network::Eth, "0xa");
        stale.assessed_at = Utc::now() - chrono::Duration::seconds(600);
        assert!(matches!(
            h.manager.open_position(&stale, 1.0).await,
            Err(Error::AssessmentRejected(_))
        ));

        assert!(h.market.fills().is_empty());
        assert_eq!(h.manager.position_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_and_limit() {
        let mut config = Config::default();
        if let Some(eth) = config.networks.get_mut(&Network::Eth) {
            eth.max_positions = 1;
        }
        let h = harness(config);
        h.market.set_profile(Network::Eth, "0xa", TokenProfile::clean(1.0));
        h.market.set_profile(Network::Eth, "0xb", TokenProfile::clean(1.0));
        h.market.set_profile(Network::Bsc, "0xb", TokenProfile::clean(1.0));

        h.manager.open_position(&safe(Network::Eth, "0xa"), 1.0).await.unwrap();
        assert!(matches!(
            h.manager.open_position(&safe(Network::Eth, "0xa"), 1.0).await,
            Err(Error::PositionExists(_))
        ));
        assert!(matches!(
            h.manager.open_position(&safe(Network::Eth, "0xb"), 1.0).await,
            Err(Error::PositionLimitReached { max: 1, .. })
        ));
        // Limits are per network
        h.manager.open_position(&safe(Network::Bsc, "0xb"), 1.0).await.unwrap();
        assert_eq!(h.manager.position_count().await, 2);
    }

    #[tokio::test]
    async fn test_failed_buy_removes_pending() {
        let h = harness(Config::default());
        let err = h
            .manager
            .open_position(&safe(Network::Eth, "0xmissing"), 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(h.manager.position_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_close_stays_closing_until_retry_succeeds() {
        let h = harness(Config::default());
        h.market.set_profile(Network::Eth, "0xa", TokenProfile::clean(100.0));
        h.manager.open_position(&safe(Network::Eth, "0xa"), 1.0).await.unwrap();

        h.market.set_profile(
            Network::Eth,
            "0xa",
            TokenProfile {
                sell_blocked: true,
                ..TokenProfile::clean(100.0)
            },
        );
        h.manager.on_tick(&tick("0xa", 70.0)).await;
        let position = h.manager.get_position(Network::Eth, "0xa").await.unwrap();
        assert_eq!(position.state, PositionState::Closing);
        assert_eq!(position.exit_reason, Some(ExitReason::StopLoss));

        // Price recovers, but the retry keeps the original reason
        h.market.set_profile(Network::Eth, "0xa", TokenProfile::clean(100.0));
        let mut events = h.events.subscribe();
        h.manager.on_tick(&tick("0xa", 99.0)).await;
        assert!(h.manager.get_position(Network::Eth, "0xa").await.is_none());
        let reason = loop {
            if let TradeEvent::PositionClosed { reason, .. } = events.recv().await.unwrap() {
                break reason;
            }
        };
        assert_eq!(reason, ExitReason::StopLoss);
    }

    #[tokio::test]
    async fn test_manual_close() {
        let h = harness(Config::default());
        h.market.set_profile(Network::Solana, "So1", TokenProfile::clean(10.0));
        h.manager.open_position(&safe(Network::Solana, "So1"), 3.0).await.unwrap();

        // No tick has arrived since the open; the close quotes the market
        h.market.set_price(Network::Solana, "So1", 12.0).unwrap();
        let pnl = h
            .manager
            .close_position(Network::Solana, "So1", ExitReason::Manual)
            .await
            .unwrap();
        assert_eq!(pnl, 6.0);
        assert!(matches!(
            h.manager.close_position(Network::Solana, "So1", ExitReason::Manual).await,
            Err(Error::PositionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ticks_flow_from_hub() {
        let h = Arc::new(harness(Config::default()));
        h.market.set_profile(Network::Eth, "0xa", TokenProfile::clean(100.0));
        h.manager.open_position(&safe(Network::Eth, "0xa"), 1.0).await.unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let runner = tokio::spawn({
            let h = h.clone();
            async move { h.manager.run(shutdown_rx).await }
        });

        let mut events = h.events.subscribe();
        h.hub.publish(tick("0xa", 155.0));
        let reason = loop {
            if let TradeEvent::PositionClosed { reason, .. } = events.recv().await.unwrap() {
                break reason;
            }
        };
        assert_eq!(reason, ExitReason::TakeProfit);

        shutdown_tx.send(()).unwrap();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_open_frees_the_key() {
        let h = harness(Config::default());
        h.market.set_profile(Network::Eth, "0xa", TokenProfile::clean(100.0));

        // The buy queues behind a busy wallet and the caller gives up
        let wallet = h.executor.wallet_locks().acquire("eth:paper").await;
        let attempt = tokio::time::timeout(
            Duration::from_millis(50),
            h.manager.open_position(&safe(Network::Eth, "0xa"), 1.0),
        )
        .await;
        assert!(attempt.is_err());
        drop(wallet);

        assert!(h.manager.get_position(Network::Eth, "0xa").await.is_none());
        assert!(h.market.fills().is_empty());
        assert!(!h.executor.wallet_locks().is_locked("eth:paper"));

        let reopened = h.manager.open_position(&safe(Network::Eth, "0xa"), 1.0).await.unwrap();
        assert_eq!(reopened.state, PositionState::Open);
    }

    #[tokio::test]
    async fn test_dropped_close_is_retried_by_the_next_tick() {
        let h = harness(Config::default());
        h.market.set_profile(Network::Eth, "0xa", TokenProfile::clean(100.0));
        h.manager.open_position(&safe(Network::Eth, "0xa"), 1.0).await.unwrap();

        let wallet = h.executor.wallet_locks().acquire("eth:paper").await;
        let attempt = tokio::time::timeout(
            Duration::from_millis(50),
            h.manager.close_position(Network::Eth, "0xa", ExitReason::Manual),
        )
        .await;
        assert!(attempt.is_err());
        drop(wallet);

        let position = h.manager.get_position(Network::Eth, "0xa").await.unwrap();
        assert_eq!(position.state, PositionState::Closing);
        assert!(!position.sell_in_flight);
        assert_eq!(h.market.fills().len(), 1);

        let mut events = h.events.subscribe();
        h.manager.on_tick(&tick("0xa", 101.0)).await;
        assert!(h.manager.get_position(Network::Eth, "0xa").await.is_none());
        let reason = loop {
            if let TradeEvent::PositionClosed { reason, .. } = events.recv().await.unwrap() {
                break reason;
            }
        };
        assert_eq!(reason, ExitReason::Manual);
        assert_eq!(h.market.fills().len(), 2);
    }

    #[tokio::test]
    async fn test_slow_close_does_not_hold_up_other_exits() {
        let h = Arc::new(harness(Config::default()));
        h.market.set_profile(Network::Eth, "0xa", TokenProfile::clean(100.0));
        h.market.set_profile(Network::Bsc, "0xb", TokenProfile::clean(100.0));
        h.manager.open_position(&safe(Network::Eth, "0xa"), 1.0).await.unwrap();
        h.manager.open_position(&safe(Network::Bsc, "0xb"), 1.0).await.unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let runner = tokio::spawn({
            let h = h.clone();
            async move { h.manager.run(shutdown_rx).await }
        });

        let mut events = h.events.subscribe();
        let wallet = h.executor.wallet_locks().acquire("eth:paper").await;
        h.hub.publish(tick_on(Network::Eth, "0xa", 155.0));
        h.hub.publish(tick_on(Network::Bsc, "0xb", 155.0));

        let first = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let TradeEvent::PositionClosed { network, .. } = events.recv().await.unwrap() {
                    break network;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(first, Network::Bsc);
        let stuck = h.manager.get_position(Network::Eth, "0xa").await.unwrap();
        assert_eq!(stuck.state, PositionState::Closing);

        drop(wallet);
        let second = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let TradeEvent::PositionClosed { network, .. } = events.recv().await.unwrap() {
                    break network;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(second, Network::Eth);

        shutdown_tx.send(()).unwrap();
        runner.await.unwrap().unwrap();
    }

    #[test]
    fn test_daily_stats() {
        let mut stats = DailyStats::new();
        stats.record_trade(0.01);
        stats.record_trade(-0.005);
        stats.record_trade(0.02);

        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.losing_trades, 1);
        assert!((stats.win_rate() - 66.67).abs() < 0.1);
    }
}
