//! CLI command implementations

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::chain::paper::{PaperMarket, TokenProfile};
use crate::config::Config;
use crate::events::{EventBus, TradeEvent};
use crate::security::SecurityGate;
use crate::strategy::{StrategyConfig, StrategyKind};
use crate::trader::{Backends, Trader};
use crate::types::Network;

/// Paper price stream period
const PAPER_TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// A strategy requested on the command line as `kind:network:token`
#[derive(Debug, Clone, PartialEq)]
pub struct StrategySpec {
    pub kind: StrategyKind,
    pub network: Network,
    pub token: String,
}

impl std::str::FromStr for StrategySpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let (Some(kind), Some(network), Some(token)) = (parts.next(), parts.next(), parts.next())
        else {
            bail!("expected kind:network:token, got '{}'", s);
        };
        if token.is_empty() {
            bail!("missing token in '{}'", s);
        }
        Ok(Self {
            kind: kind.parse()?,
            network: network.parse()?,
            token: token.to_string(),
        })
    }
}

/// Start the trader
pub async fn start(config: &Config, dry_run: bool, strategies: &[StrategySpec]) -> Result<()> {
    if !dry_run {
        bail!("no live chain adapters are linked into this build; run with --dry-run");
    }
    warn!("Running in DRY-RUN mode against a simulated market - no real trades will be executed");

    let market = Arc::new(PaperMarket::new(rand::random()));
    for spec in strategies {
        market.set_profile(spec.network, &spec.token, TokenProfile::clean(1.0));
    }
    for watched in &config.arbitrage.watched {
        for venue in &watched.venues {
            market.set_profile(venue.network, &venue.address, TokenProfile::clean(1.0));
        }
    }

    let backends = Backends::paper_with_failover(market, config, PAPER_TICK_INTERVAL)
        .context("Failed to build paper backends")?;
    let trader = Arc::new(Trader::new(config.clone(), backends));

    let mut events = trader.events().subscribe();
    let mut shutdown = trader.shutdown_signal();
    let logger = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                event = events.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => warn!("Event log lagged by {}", n),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    trader.start().await.context("Failed to start trader")?;

    for spec in strategies {
        let config = StrategyConfig::for_token(spec.token.clone());
        match trader.engine().start_strategy(spec.kind, spec.network, config).await {
            Ok(id) => info!("{} on {}:{} running as {}", spec.kind, spec.network, spec.token, id),
            Err(e) => error!("Could not start {} on {}:{}: {}", spec.kind, spec.network, spec.token, e),
        }
    }

    info!("Trader running, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Shutting down...");
    trader.shutdown().await;
    if let Err(e) = logger.await {
        warn!("Event logger ended abnormally: {}", e);
    }

    if let Some(snapshot) = trader.analytics().latest().await {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    Ok(())
}

fn log_event(event: &TradeEvent) {
    match serde_json::to_string(event) {
        Ok(json) => match event {
            TradeEvent::Error { .. } => warn!(target: "events", "{}", json),
            _ => info!(target: "events", "{}", json),
        },
        Err(e) => warn!("Unserialisable event: {}", e),
    }
}

/// Show current configuration (endpoints masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Token facts for a what-if screening
#[derive(Debug, Clone)]
pub struct CheckProfile {
    pub liquidity: f64,
    pub holders: u64,
    pub top_holder_pct: f64,
    pub top10_pct: f64,
    pub owner: Option<String>,
    pub unverified: bool,
    pub unlocked: bool,
}

/// Run the security gate against a token with the given facts and print
/// the assessment
pub async fn check(config: &Config, network: Network, token: &str, profile: CheckProfile) -> Result<()> {
    let market = Arc::new(PaperMarket::new(0));
    market.set_profile(
        network,
        token,
        TokenProfile {
            liquidity_usd: profile.liquidity,
            holder_count: profile.holders,
            top_holder_pct: profile.top_holder_pct,
            top10_pct: profile.top10_pct,
            owner: profile.owner,
            verified: !profile.unverified,
            liquidity_locked: !profile.unlocked,
            ..TokenProfile::clean(1.0)
        },
    );

    let gate = SecurityGate::new(config, market.clone(), market, EventBus::default());
    let assessment = gate.assess(network, token).await;
    println!("{}", serde_json::to_string_pretty(&assessment)?);

    if assessment.safe {
        info!("{}:{} is safe (score {})", network, token, assessment.score);
    } else {
        warn!("{}:{} is NOT safe (score {})", network, token, assessment.score);
    }
    Ok(())
}
