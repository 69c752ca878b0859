//! Strategy Engine
//!
//! Owns every running strategy instance. Each instance is a tokio task with
//! its own polling interval and a control channel; stopping sends a command
//! and awaits the task, dropping any in-flight tick.

use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::arbitrage_leg::ArbitrageLeg;
use super::grid::Grid;
use super::mean_reversion::MeanReversion;
use super::momentum::Momentum;
use super::pingpong::PingPong;
use super::types::{
    Strategy, StrategyConfig, StrategyContext, StrategyInfo, StrategyKind, StrategyServices,
    StrategyStatus,
};
use crate::config::{Config, NetworkConfig, StrategyEngineConfig};
use crate::error::{Error, Result};
use crate::events::TradeEvent;
use crate::types::Network;

/// Commands accepted by a running strategy task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyCommand {
    Stop,
}

struct StrategyHandle {
    info: StrategyInfo,
    control: mpsc::Sender<StrategyCommand>,
    status: watch::Receiver<StrategyStatus>,
    task: JoinHandle<()>,
}

impl StrategyHandle {
    fn snapshot(&self) -> StrategyInfo {
        StrategyInfo {
            status: *self.status.borrow(),
            ..self.info.clone()
        }
    }
}

type Registry = Arc<RwLock<HashMap<String, StrategyHandle>>>;

pub struct StrategyEngine {
    config: StrategyEngineConfig,
    networks: BTreeMap<Network, NetworkConfig>,
    services: StrategyServices,
    strategies: Registry,
}

impl StrategyEngine {
    pub fn new(config: &Config, services: StrategyServices) -> Self {
        Self {
            config: config.strategy.clone(),
            networks: config.networks.clone(),
            services,
            strategies: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn network_config(&self, network: Network) -> NetworkConfig {
        self.networks
            .get(&network)
            .cloned()
            .unwrap_or_else(|| NetworkConfig::for_network(network))
    }

    fn build(&self, kind: StrategyKind, network: Network, config: StrategyConfig) -> Box<dyn Strategy> {
        match kind {
            StrategyKind::PingPong => Box::new(PingPong::new(config, &self.network_config(network))),
            StrategyKind::Grid => Box::new(Grid::new(config)),
            StrategyKind::Momentum => {
                Box::new(Momentum::new(config, self.services.signals.warmup_len()))
            }
            StrategyKind::MeanReversion => Box::new(MeanReversion::new(config)),
            StrategyKind::ArbitrageLeg => Box::new(ArbitrageLeg::new()),
        }
    }

    fn check_deployable(&self, kind: StrategyKind, config: &StrategyConfig) -> Result<()> {
        config.validate(kind)?;
        if kind == StrategyKind::ArbitrageLeg {
            let watched = self
                .services
                .arbitrage
                .as_ref()
                .is_some_and(|m| m.watches(&config.token));
            if !watched {
                return Err(Error::InvalidConfiguration(format!(
                    "{}: {} is not a watched arbitrage token",
                    kind, config.token
                )));
            }
        }
        Ok(())
    }

    /// Validate, register and spawn a strategy. Returns its id.
    pub async fn start_strategy(
        &self,
        kind: StrategyKind,
        network: Network,
        config: StrategyConfig,
    ) -> Result<String> {
        self.check_deployable(kind, &config)?;

        let interval = Duration::from_millis(
            config
                .interval_ms
                .or_else(|| self.networks.get(&network).map(|n| n.check_interval_ms))
                .unwrap_or(self.config.default_interval_ms)
                .max(1),
        );
        let token = config.token.clone();

        let mut strategies = self.strategies.write().await;
        if strategies.len() >= self.config.max_concurrent_strategies {
            return Err(Error::StrategyRejected(format!(
                "at capacity ({} strategies)",
                self.config.max_concurrent_strategies
            )));
        }
        if strategies.values().any(|h| {
            h.info.kind == kind && h.info.network == network && h.info.token == token
        }) {
            return Err(Error::StrategyRejected(format!(
                "{} already active for {}:{}",
                kind, network, token
            )));
        }

        let id = Uuid::new_v4().to_string();
        let strategy = self.build(kind, network, config);
        let ctx = StrategyContext {
            id: id.clone(),
            network,
            token: token.clone(),
            services: self.services.clone(),
        };
        let (control_tx, control_rx) = mpsc::channel(4);
        let (status_tx, status_rx) = watch::channel(StrategyStatus::Starting);

        let task = tokio::spawn(drive(
            strategy,
            ctx,
            interval,
            control_rx,
            status_tx,
            self.strategies.clone(),
        ));

        let info = StrategyInfo {
            id: id.clone(),
            kind,
            network,
            token: token.clone(),
            status: StrategyStatus::Starting,
            started_at: Utc::now(),
        };
        strategies.insert(
            id.clone(),
            StrategyHandle {
                info,
                control: control_tx,
                status: status_rx,
                task,
            },
        );
        info!(
            "Started {} strategy {} on {}:{} every {:?}",
            kind, id, network, token, interval
        );
        // Emitted under the registry lock so a failed init cannot report
        // the stop first
        self.services.events.emit(TradeEvent::StrategyStarted {
            id: id.clone(),
            kind,
            network,
            token,
        });
        drop(strategies);
        Ok(id)
    }

    /// Stop a strategy and wait for its task to finish
    pub async fn stop_strategy(&self, id: &str) -> Result<()> {
        let handle = self
            .strategies
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::StrategyNotFound(id.to_string()))?;
        let kind = handle.info.kind;
        shutdown(handle).await;
        info!("Stopped {} strategy {}", kind, id);
        self.services.events.emit(TradeEvent::StrategyStopped {
            id: id.to_string(),
            kind,
        });
        Ok(())
    }

    /// Stop every strategy. Safe to call repeatedly.
    pub async fn stop_all(&self) {
        let handles: Vec<(String, StrategyHandle)> =
            self.strategies.write().await.drain().collect();
        if handles.is_empty() {
            return;
        }
        info!("Stopping {} strategies", handles.len());

        let stopped = join_all(handles.into_iter().map(|(id, handle)| async move {
            let kind = handle.info.kind;
            shutdown(handle).await;
            (id, kind)
        }))
        .await;

        for (id, kind) in stopped {
            self.services
                .events
                .emit(TradeEvent::StrategyStopped { id, kind });
        }
    }

    pub async fn list(&self) -> Vec<StrategyInfo> {
        let mut infos: Vec<StrategyInfo> = self
            .strategies
            .read()
            .await
            .values()
            .map(StrategyHandle::snapshot)
            .collect();
        infos.sort_by_key(|i| i.started_at);
        infos
    }

    pub async fn get(&self, id: &str) -> Option<StrategyInfo> {
        self.strategies.read().await.get(id).map(StrategyHandle::snapshot)
    }

    pub async fn count(&self) -> usize {
        self.strategies.read().await.len()
    }
}

async fn shutdown(handle: StrategyHandle) {
    // The task may already be gone after a failed init
    if handle.control.send(StrategyCommand::Stop).await.is_err() {
        debug!("Strategy {} already exited", handle.info.id);
    }
    if let Err(e) = handle.task.await {
        error!("Strategy {} task failed: {}", handle.info.id, e);
    }
}

/// Body of a strategy task
async fn drive(
    mut strategy: Box<dyn Strategy>,
    ctx: StrategyContext,
    interval: Duration,
    mut control: mpsc::Receiver<StrategyCommand>,
    status: watch::Sender<StrategyStatus>,
    registry: Registry,
) {
    let label = format!("strategy:{}:{}", strategy.kind(), ctx.id);

    let init = tokio::select! {
        biased;
        _ = control.recv() => None,
        result = strategy.init(&ctx) => Some(result),
    };
    match init {
        None => {
            status.send_replace(StrategyStatus::Stopped);
            return;
        }
        Some(Err(e)) => {
            error!("{} failed to initialise: {}", label, e);
            ctx.services.events.emit_error(label, &e);
            status.send_replace(StrategyStatus::Stopped);
            // A concurrent stop may already have deregistered and reported it
            if registry.write().await.remove(&ctx.id).is_some() {
                ctx.services.events.emit(TradeEvent::StrategyStopped {
                    id: ctx.id.clone(),
                    kind: strategy.kind(),
                });
            }
            return;
        }
        Some(Ok(())) => {}
    }

    status.send_replace(StrategyStatus::Running);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = control.recv() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    biased;
                    _ = control.recv() => break,
                    result = strategy.tick(&ctx) => {
                        if let Err(e) = result {
                            warn!("{} tick failed: {}", label, e);
                            ctx.services.events.emit_error(label.clone(), &e);
                        }
                    }
                }
            }
        }
    }

    status.send_replace(StrategyStatus::Stopping);
    if let Err(e) = strategy.stop(&ctx).await {
        warn!("{} stop hook failed: {}", label, e);
    }
    status.send_replace(StrategyStatus::Stopped);
}
