//! Cross-chain arbitrage monitor
//!
//! Every cycle quotes each watched token on all of its venues, emits the
//! qualifying spreads, validates them top-down and executes at most one.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::opportunity::{find_opportunities, ArbitrageOpportunity, SpreadFilter, VenueQuote};
use crate::config::{ArbitrageConfig, ArbitrageVenueConfig, WatchedTokenConfig};
use crate::error::{Error, Result};
use crate::events::{EventBus, TradeEvent};
use crate::execution::OrderExecutor;
use crate::security::{ContractInspector, SecurityGate, TransactionSimulator};
use crate::types::Side;

pub struct ArbitrageMonitor {
    config: ArbitrageConfig,
    executor: Arc<OrderExecutor>,
    gate: Arc<SecurityGate>,
    inspector: Arc<dyn ContractInspector>,
    simulator: Arc<dyn TransactionSimulator>,
    events: EventBus,
    /// Held for the whole buy/sell pair
    execution: Mutex<()>,
}

impl ArbitrageMonitor {
    pub fn new(
        config: ArbitrageConfig,
        executor: Arc<OrderExecutor>,
        gate: Arc<SecurityGate>,
        inspector: Arc<dyn ContractInspector>,
        simulator: Arc<dyn TransactionSimulator>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            executor,
            gate,
            inspector,
            simulator,
            events,
            execution: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ArbitrageConfig {
        &self.config
    }

    /// Whether `symbol` is among the watched tokens
    pub fn watches(&self, symbol: &str) -> bool {
        self.config
            .watched
            .iter()
            .any(|w| w.symbol.eq_ignore_ascii_case(symbol))
    }

    fn filter(&self) -> SpreadFilter {
        SpreadFilter {
            min_profit_percent: self.config.min_profit_percent,
            min_liquidity: self.config.min_liquidity,
            trade_amount: self.config.trade_amount,
        }
    }

    async fn quote(&self, venue: &ArbitrageVenueConfig) -> Result<VenueQuote> {
        let (price, liquidity) = tokio::try_join!(
            self.executor.price_on(venue.network, &venue.dex, &venue.address),
            self.inspector.liquidity_usd(venue.network, &venue.address),
        )?;
        Ok(VenueQuote {
            network: venue.network,
            dex: venue.dex.clone(),
            address: venue.address.clone(),
            price,
            liquidity,
        })
    }

    /// Quotes for every venue of `watched`. Venues that fail are skipped.
    pub async fn quotes(&self, watched: &WatchedTokenConfig) -> Vec<VenueQuote> {
        let results = join_all(watched.venues.iter().map(|v| self.quote(v))).await;
        results
            .into_iter()
            .zip(&watched.venues)
            .filter_map(|(result, venue)| match result {
                Ok(quote) => Some(quote),
                Err(e) => {
                    warn!(
                        "Quote failed for {} on {}/{}: {}",
                        watched.symbol, venue.network, venue.dex, e
                    );
                    None
                }
            })
            .collect()
    }

    /// Ranked opportunities across watched tokens, optionally only `only`.
    /// Every opportunity found is emitted.
    pub async fn scan(&self, only: Option<&str>) -> Vec<ArbitrageOpportunity> {
        let mut all = Vec::new();
        for watched in &self.config.watched {
            if only.is_some_and(|s| !watched.symbol.eq_ignore_ascii_case(s)) {
                continue;
            }
            let quotes = self.quotes(watched).await;
            let found = find_opportunities(&watched.symbol, &quotes, self.filter());
            debug!(
                "{}: {} quotes, {} opportunities",
                watched.symbol,
                quotes.len(),
                found.len()
            );
            all.extend(found);
        }
        super::opportunity::rank(&mut all);

        for opportunity in &all {
            info!(
                "Arbitrage {}: {}/{} {} -> {}/{} {} ({:+.2}%)",
                opportunity.token,
                opportunity.source_network,
                opportunity.source_dex,
                opportunity.source_price,
                opportunity.target_network,
                opportunity.target_dex,
                opportunity.target_price,
                opportunity.profit_percent
            );
            self.events
                .emit(TradeEvent::ArbitrageOpportunity(opportunity.clone()));
        }
        all
    }

    /// Gate both legs and simulate both orders
    pub async fn validate(&self, opportunity: &ArbitrageOpportunity) -> Result<ArbitrageOpportunity> {
        let (source, target) = tokio::join!(
            self.gate
                .assess(opportunity.source_network, &opportunity.source_address),
            self.gate
                .assess(opportunity.target_network, &opportunity.target_address),
        );
        for assessment in [&source, &target] {
            if !assessment.safe {
                return Err(Error::SecurityCheckFailure {
                    token: assessment.key().to_string(),
                    reason: assessment.risks.join("; "),
                });
            }
        }

        let amount = self.config.trade_amount;
        let buy = self.executor.order(
            opportunity.source_network,
            &opportunity.source_address,
            Side::Buy,
            amount,
        )?;
        let sell = self.executor.order(
            opportunity.target_network,
            &opportunity.target_address,
            Side::Sell,
            amount,
        )?;
        let (buy_sim, sell_sim) =
            tokio::try_join!(self.simulator.simulate(&buy), self.simulator.simulate(&sell))?;
        buy_sim.into_result()?;
        sell_sim.into_result()?;

        let mut validated = opportunity.clone();
        validated.risk_score = 100 - source.score.min(target.score).min(100);
        Ok(validated)
    }

    /// Buy on the source venue, then sell on the target venue
    pub async fn execute(&self, opportunity: &ArbitrageOpportunity) -> Result<()> {
        let _guard = self.execution.lock().await;
        let amount = self.config.trade_amount;

        self.executor
            .buy(
                opportunity.source_network,
                &opportunity.source_address,
                amount,
                opportunity.source_price,
            )
            .await?;
        self.executor
            .sell(
                opportunity.target_network,
                &opportunity.target_address,
                amount,
                opportunity.target_price,
            )
            .await
            .map_err(|e| {
                Error::ExecutionFailure(format!(
                    "{} sell leg on {} failed after buy: {}",
                    opportunity.token, opportunity.target_network, e
                ))
            })?;

        info!(
            "Arbitrage executed for {}: est. profit {:.6} ({:+.2}%)",
            opportunity.token, opportunity.estimated_profit, opportunity.profit_percent
        );
        Ok(())
    }

    /// One monitoring cycle. Returns the executed opportunity, if any.
    pub async fn run_cycle(&self, only: Option<&str>) -> Result<Option<ArbitrageOpportunity>> {
        for opportunity in self.scan(only).await {
            match self.validate(&opportunity).await {
                Ok(validated) => {
                    self.execute(&validated).await?;
                    return Ok(Some(validated));
                }
                Err(e) => {
                    debug!(
                        "Skipping {} {} -> {}: {}",
                        opportunity.token, opportunity.source_network, opportunity.target_network, e
                    );
                }
            }
        }
        Ok(None)
    }

    /// Poll until shutdown
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.interval_ms.max(1)));
        info!(
            "Arbitrage monitor watching {} tokens every {}ms",
            self.config.watched.len(),
            self.config.interval_ms
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Arbitrage monitor stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle(None).await {
                        warn!("Arbitrage cycle failed: {}", e);
                        self.events.emit_error("arbitrage", &e);
                    }
                }
            }
        }
    }
}
