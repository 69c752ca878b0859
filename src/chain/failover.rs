//! Backup-endpoint fallback
//!
//! Wraps one adapter per RPC endpoint of a network. After a configured number
//! of consecutive `ConnectionLost` failures the next endpoint becomes active.
//! Running past the last endpoint is fatal for the network: every later call
//! fails with `EndpointsExhausted`.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

use super::{ChainAdapter, OrderRequest};
use crate::error::{Error, Result};
use crate::types::Network;

#[derive(Debug, Default)]
struct FailoverState {
    active: usize,
    consecutive_failures: u32,
    exhausted: bool,
}

pub struct FailoverAdapter {
    network: Network,
    endpoints: Vec<Arc<dyn ChainAdapter>>,
    threshold: u32,
    state: Mutex<FailoverState>,
}

impl FailoverAdapter {
    pub fn new(network: Network, endpoints: Vec<Arc<dyn ChainAdapter>>, threshold: u32) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "no endpoints configured for {}",
                network
            )));
        }
        Ok(Self {
            network,
            endpoints,
            threshold: threshold.max(1),
            state: Mutex::new(FailoverState::default()),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FailoverState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Index of the endpoint currently in use
    pub fn active_index(&self) -> usize {
        self.state().active
    }

    fn current(&self) -> Result<(usize, Arc<dyn ChainAdapter>)> {
        let state = self.state();
        if state.exhausted {
            return Err(Error::EndpointsExhausted(self.network.to_string()));
        }
        Ok((state.active, self.endpoints[state.active].clone()))
    }

    /// Record the outcome of a call made against endpoint `idx`
    fn observe<T>(&self, idx: usize, result: Result<T>) -> Result<T> {
        let mut state = self.state();
        match &result {
            Ok(_) => {
                if state.active == idx {
                    state.consecutive_failures = 0;
                }
            }
            Err(e) if e.is_connection_lost() && state.active == idx && !state.exhausted => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.threshold {
                    state.consecutive_failures = 0;
                    if idx + 1 < self.endpoints.len() {
                        state.active = idx + 1;
                        warn!(
                            "{}: switching to backup endpoint {} after repeated connection failures",
                            self.network, state.active
                        );
                    } else {
                        state.exhausted = true;
                        error!("{}: all {} endpoints exhausted", self.network, self.endpoints.len());
                        return Err(Error::EndpointsExhausted(self.network.to_string()));
                    }
                }
            }
            Err(_) => {}
        }
        result
    }
}

#[async_trait]
impl ChainAdapter for FailoverAdapter {
    fn network(&self) -> Network {
        self.network
    }

    fn wallet_id(&self) -> String {
        self.endpoints[0].wallet_id()
    }

    async fn init(&self) -> Result<()> {
        loop {
            let (idx, endpoint) = self.current()?;
            let result = endpoint.init().await;
            match self.observe(idx, result) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_connection_lost() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn buy(&self, order: &OrderRequest) -> Result<bool> {
        let (idx, endpoint) = self.current()?;
        let result = endpoint.buy(order).await;
        self.observe(idx, result)
    }

    async fn sell(&self, order: &OrderRequest) -> Result<bool> {
        let (idx, endpoint) = self.current()?;
        let result = endpoint.sell(order).await;
        self.observe(idx, result)
    }

    async fn check_price(&self, token: &str) -> Result<f64> {
        let (idx, endpoint) = self.current()?;
        let result = endpoint.check_price(token).await;
        self.observe(idx, result)
    }

    async fn check_price_on(&self, dex: &str, token: &str) -> Result<f64> {
        let (idx, endpoint) = self.current()?;
        let result = endpoint.check_price_on(dex, token).await;
        self.observe(idx, result)
    }

    async fn analyze_liquidity(&self, token: &str) -> Result<bool> {
        let (idx, endpoint) = self.current()?;
        let result = endpoint.analyze_liquidity(token).await;
        self.observe(idx, result)
    }
}
