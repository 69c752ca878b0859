//! Order executor
//!
//! The single path from the core to chain adapters. Every submission is MEV
//! protected, serialized on the adapter's wallet, bounded by the global trade
//! limit and retried with exponential backoff.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::mev::MevProtector;
use super::wallet_lock::WalletLocks;
use crate::chain::{AdapterRegistry, OrderRequest};
use crate::config::{Config, NetworkConfig};
use crate::error::{Error, Result};
use crate::events::{EventBus, TradeEvent};
use crate::retry::RetryPolicy;
use crate::types::{Network, Side};

/// What was actually sent
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub order: OrderRequest,
    pub price: f64,
}

pub struct OrderExecutor {
    registry: AdapterRegistry,
    mev: MevProtector,
    locks: WalletLocks,
    retry: RetryPolicy,
    trade_slots: Arc<Semaphore>,
    networks: BTreeMap<Network, NetworkConfig>,
    max_slippage_pct: f64,
    events: EventBus,
}

impl OrderExecutor {
    pub fn new(
        config: &Config,
        registry: AdapterRegistry,
        mev: MevProtector,
        retry: RetryPolicy,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            mev,
            locks: WalletLocks::new(),
            retry,
            trade_slots: Arc::new(Semaphore::new(config.global.max_concurrent_trades.max(1))),
            networks: config.networks.clone(),
            max_slippage_pct: config.global.global_max_slippage,
            events,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn wallet_locks(&self) -> &WalletLocks {
        &self.locks
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Unprotected order with the network's base fee parameters
    pub fn order(&self, network: Network, token: &str, side: Side, amount: f64) -> Result<OrderRequest> {
        let config = self
            .networks
            .get(&network)
            .ok_or_else(|| Error::InvalidConfiguration(format!("network {} not configured", network)))?;
        Ok(OrderRequest::new(
            network,
            token,
            side,
            amount,
            config,
            self.max_slippage_pct,
        ))
    }

    pub async fn buy(&self, network: Network, token: &str, amount: f64, price: f64) -> Result<ExecutionReport> {
        let order = self.order(network, token, Side::Buy, amount)?;
        self.execute(order, price).await
    }

    pub async fn sell(&self, network: Network, token: &str, amount: f64, price: f64) -> Result<ExecutionReport> {
        let order = self.order(network, token, Side::Sell, amount)?;
        self.execute(order, price).await
    }

    /// Protect, serialize on the wallet and submit with retries
    pub async fn execute(&self, order: OrderRequest, price: f64) -> Result<ExecutionReport> {
        if order.amount <= 0.0 || !order.amount.is_finite() {
            return Err(Error::ExecutionFailure(format!(
                "invalid order amount {}",
                order.amount
            )));
        }
        let adapter = self.registry.get(order.network)?;
        let order = self.mev.protect(order).await;

        let wallet = adapter.wallet_id();
        let _wallet_guard = self.locks.acquire(&wallet).await;
        let _slot = self
            .trade_slots
            .acquire()
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        let label = format!("{} {}:{}", order.side, order.network, order.token);
        let result = self
            .retry
            .run(&label, || {
                let adapter = adapter.clone();
                let order = order.clone();
                async move {
                    let accepted = match order.side {
                        Side::Buy => adapter.buy(&order).await?,
                        Side::Sell => adapter.sell(&order).await?,
                    };
                    if accepted {
                        Ok(())
                    } else {
                        Err(Error::ExecutionFailure(format!(
                            "{} rejected by {} adapter",
                            order.side, order.network
                        )))
                    }
                }
            })
            .await;

        match result {
            Ok(()) => {
                info!(
                    "{} {} of {}:{} at {} (max fee {}, private {})",
                    order.side,
                    order.amount,
                    order.network,
                    order.token,
                    price,
                    order.fees.max_fee_per_gas,
                    order.private_submission
                );
                self.events.emit(TradeEvent::TradePlaced {
                    network: order.network,
                    token: order.token.clone(),
                    side: order.side,
                    amount: order.amount,
                    price,
                    max_fee: order.fees.max_fee_per_gas,
                    private: order.private_submission,
                    timestamp: Utc::now(),
                });
                Ok(ExecutionReport { order, price })
            }
            Err(e) => {
                warn!("{} failed: {}", label, e);
                Err(e)
            }
        }
    }

    /// Current price with retries
    pub async fn price(&self, network: Network, token: &str) -> Result<f64> {
        let adapter = self.registry.get(network)?;
        let label = format!("price {}:{}", network, token);
        self.retry
            .run(&label, || {
                let adapter = adapter.clone();
                let token = token.to_string();
                async move { adapter.check_price(&token).await }
            })
            .await
    }

    /// Price on a specific exchange with retries
    pub async fn price_on(&self, network: Network, dex: &str, token: &str) -> Result<f64> {
        let adapter = self.registry.get(network)?;
        let label = format!("price {}:{}@{}", network, token, dex);
        self.retry
            .run(&label, || {
                let adapter = adapter.clone();
                let token = token.to_string();
                let dex = dex.to_string();
                async move { adapter.check_price_on(&dex, &token).await }
            })
            .await
    }

    /// Adapter-side liquidity sanity check with retries
    pub async fn liquidity_ok(&self, network: Network, token: &str) -> Result<bool> {
        let adapter = self.registry.get(network)?;
        let label = format!("liquidity {}:{}", network, token);
        self.retry
            .run(&label, || {
                let adapter = adapter.clone();
                let token = token.to_string();
                async move { adapter.analyze_liquidity(&token).await }
            })
            .await
    }
}
