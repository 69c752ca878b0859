//! Price transport connection manager
//!
//! Owns the link to the external price stream. On every (re)connect the
//! active subscriptions are replayed so no subscriber notices the outage.
//! Reconnect delays double from the configured base up to the cap, and the
//! manager gives up after the configured number of consecutive failures.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{KeyChange, PriceFeedHub};
use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::types::{PriceKey, PriceTick};

/// External source of price ticks
#[async_trait]
pub trait PriceTransport: Send + Sync {
    /// Open a stream; the receiver yields `None` once the link drops
    async fn connect(&self) -> Result<mpsc::Receiver<PriceTick>>;
    async fn subscribe(&self, key: &PriceKey) -> Result<()>;
    async fn unsubscribe(&self, key: &PriceKey) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting before reconnect attempt `attempt`
    Backoff { attempt: u32 },
}

enum SessionEnd {
    Shutdown,
    Closed,
}

pub struct FeedConnection {
    transport: Arc<dyn PriceTransport>,
    hub: PriceFeedHub,
    config: FeedConfig,
    state: watch::Sender<ConnectionState>,
}

impl FeedConnection {
    pub fn new(transport: Arc<dyn PriceTransport>, hub: PriceFeedHub, config: FeedConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            hub,
            config,
            state,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.config.reconnect_base_ms);
        let cap = Duration::from_millis(self.config.reconnect_max_ms.max(self.config.reconnect_base_ms));
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        base.saturating_mul(factor).min(cap)
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("Price feed {:?} -> {:?}", prev, next);
        }
    }

    /// Keep the transport connected until shutdown or the reconnect budget runs out
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut failures = 0u32;

        loop {
            self.set_state(ConnectionState::Connecting);

            match self.session(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => {
                    info!("Price feed shutting down");
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                Ok(SessionEnd::Closed) => {
                    // The link was up, so the failure streak starts over
                    failures = 1;
                }
                Err(e) => {
                    error!("Price feed connect failed: {}", e);
                    failures += 1;
                }
            }

            if failures > self.config.max_reconnect_attempts {
                error!(
                    "Max reconnect attempts ({}) reached, giving up",
                    self.config.max_reconnect_attempts
                );
                self.set_state(ConnectionState::Disconnected);
                return Err(Error::ConnectionLost(
                    "price feed: max reconnect attempts reached".to_string(),
                ));
            }

            let delay = self.reconnect_delay(failures);
            self.set_state(ConnectionState::Backoff { attempt: failures });
            warn!(
                "Reconnecting price feed in {:?} (attempt {}/{})",
                delay, failures, self.config.max_reconnect_attempts
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.recv() => {
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            }
        }
    }

    async fn resubscribe_all(&self) -> Result<()> {
        let keys = self.hub.active_keys();
        for key in &keys {
            self.transport.subscribe(key).await?;
        }
        if !keys.is_empty() {
            info!("Subscribed to {} price key(s)", keys.len());
        }
        Ok(())
    }

    async fn session(&self, shutdown: &mut broadcast::Receiver<()>) -> Result<SessionEnd> {
        // Listen for key changes before the snapshot so none fall in between
        let mut changes = self.hub.key_changes();
        let mut ticks = self.transport.connect().await?;
        self.resubscribe_all().await?;
        self.set_state(ConnectionState::Connected);
        info!("Price feed connected");

        loop {
            tokio::select! {
                tick = ticks.recv() => match tick {
                    Some(tick) => {
                        self.hub.publish(tick);
                    }
                    None => {
                        warn!("Price stream ended");
                        return Ok(SessionEnd::Closed);
                    }
                },
                change = changes.recv() => match change {
                    Ok(KeyChange::Added(key)) => {
                        if let Err(e) = self.transport.subscribe(&key).await {
                            warn!("Subscribe {} failed: {}", key, e);
                            return Ok(SessionEnd::Closed);
                        }
                    }
                    Ok(KeyChange::Removed(key)) => {
                        if let Err(e) = self.transport.unsubscribe(&key).await {
                            warn!("Unsubscribe {} failed: {}", key, e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Missed {} subscription changes, resyncing", n);
                        if let Err(e) = self.resubscribe_all().await {
                            warn!("Resync failed: {}", e);
                            return Ok(SessionEnd::Closed);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(SessionEnd::Shutdown),
                },
                _ = shutdown.recv() => return Ok(SessionEnd::Shutdown),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::types::Network;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedTransport {
        fail_connects: AtomicU32,
        connects: AtomicU32,
        stream: Mutex<Option<mpsc::Sender<PriceTick>>>,
        subscribed: Mutex<Vec<PriceKey>>,
    }

    impl ScriptedTransport {
        fn failing(n: u32) -> Self {
            Self {
                fail_connects: AtomicU32::new(n),
                ..Default::default()
            }
        }

        fn close_stream(&self) {
            self.stream.lock().unwrap().take();
        }

        async fn push(&self, tick: PriceTick) {
            let tx = self.stream.lock().unwrap().clone();
            tx.unwrap().send(tick).await.unwrap();
        }

        fn subscribe_count(&self, key: &PriceKey) -> usize {
            self.subscribed.lock().unwrap().iter().filter(|k| *k == key).count()
        }
    }

    #[async_trait]
    impl PriceTransport for ScriptedTransport {
        async fn connect(&self) -> Result<mpsc::Receiver<PriceTick>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let remaining = self.fail_connects.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_connects.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::ConnectionLost("refused".into()));
            }
            let (tx, rx) = mpsc::channel(16);
            *self.stream.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        async fn subscribe(&self, key: &PriceKey) -> Result<()> {
            self.subscribed.lock().unwrap().push(key.clone());
            Ok(())
        }

        async fn unsubscribe(&self, _key: &PriceKey) -> Result<()> {
            Ok(())
        }
    }

    fn config(max_attempts: u32) -> FeedConfig {
        FeedConfig {
            reconnect_base_ms: 1,
            reconnect_max_ms: 4,
            max_reconnect_attempts: max_attempts,
            ..FeedConfig::default()
        }
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_reconnect_delay_doubles_and_caps() {
        let conn = FeedConnection::new(
            Arc::new(ScriptedTransport::default()),
            PriceFeedHub::new(5.0, EventBus::default()),
            FeedConfig {
                reconnect_base_ms: 1000,
                reconnect_max_ms: 30_000,
                ..FeedConfig::default()
            },
        );
        assert_eq!(conn.reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(conn.reconnect_delay(2), Duration::from_secs(2));
        assert_eq!(conn.reconnect_delay(4), Duration::from_secs(8));
        assert_eq!(conn.reconnect_delay(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let transport = Arc::new(ScriptedTransport::failing(100));
        let conn = FeedConnection::new(
            transport.clone(),
            PriceFeedHub::new(5.0, EventBus::default()),
            config(2),
        );
        let (_tx, rx) = broadcast::channel(1);

        let err = conn.run(rx).await.unwrap_err();
        assert!(err.is_connection_lost());
        assert_eq!(transport.connects.load(Ordering::SeqCst), 3);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_resubscribes_after_reconnect() {
        let hub = PriceFeedHub::new(50.0, EventBus::default());
        let key = PriceKey::new(Network::Bsc, "0xabc");
        let (tick_tx, mut tick_rx) = mpsc::channel(8);
        let _sub = hub.subscribe(key.clone(), tick_tx);

        let transport = Arc::new(ScriptedTransport::failing(1));
        let conn = Arc::new(FeedConnection::new(transport.clone(), hub, config(5)));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn({
            let conn = conn.clone();
            async move { conn.run(shutdown_rx).await }
        });

        wait_until(|| conn.state() == ConnectionState::Connected).await;
        assert_eq!(transport.subscribe_count(&key), 1);

        transport
            .push(PriceTick {
                network: Network::Bsc,
                token: "0xabc".into(),
                price: 2.5,
                volume_24h: 0.0,
                liquidity: 0.0,
                timestamp: Utc::now(),
            })
            .await;
        assert_eq!(tick_rx.recv().await.unwrap().price, 2.5);

        transport.close_stream();
        wait_until(|| {
            transport.connects.load(Ordering::SeqCst) == 3
                && conn.state() == ConnectionState::Connected
        })
        .await;
        assert_eq!(transport.subscribe_count(&key), 2);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
