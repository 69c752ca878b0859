//! Price feed hub
//!
//! Fans price ticks from the external transport out to subscribers. The hub
//! keeps the last-known tick per (network, token), drops ticks older than the
//! last one delivered for the same key, and reports significant tick-to-tick
//! moves on the event bus.

pub mod connection;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::events::{EventBus, TradeEvent};
use crate::types::{pct_change, PriceKey, PriceTick};

pub use connection::{ConnectionState, FeedConnection, PriceTransport};

/// Notifies the connection manager which keys the transport must carry
#[derive(Debug, Clone, PartialEq)]
pub enum KeyChange {
    Added(PriceKey),
    Removed(PriceKey),
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<PriceTick>,
}

struct HubInner {
    subscribers: DashMap<PriceKey, Vec<Subscriber>>,
    last: DashMap<PriceKey, PriceTick>,
    next_id: AtomicU64,
    significant_move_pct: f64,
    key_changes: broadcast::Sender<KeyChange>,
    events: EventBus,
}

#[derive(Clone)]
pub struct PriceFeedHub {
    inner: Arc<HubInner>,
}

/// Active subscription; dropping it unsubscribes
pub struct Subscription {
    hub: PriceFeedHub,
    key: PriceKey,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &PriceKey {
        &self.key
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.key, self.id);
    }
}

impl PriceFeedHub {
    pub fn new(significant_move_pct: f64, events: EventBus) -> Self {
        let (key_changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(HubInner {
                subscribers: DashMap::new(),
                last: DashMap::new(),
                next_id: AtomicU64::new(1),
                significant_move_pct,
                key_changes,
                events,
            }),
        }
    }

    /// Deliver ticks for `key` to `tx` until the returned handle is dropped
    pub fn subscribe(&self, key: PriceKey, tx: mpsc::Sender<PriceTick>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let first = {
            let mut entry = self.inner.subscribers.entry(key.clone()).or_default();
            entry.push(Subscriber { id, tx });
            entry.len() == 1
        };
        if first {
            debug!("First subscriber for {}", key);
            let _ = self.inner.key_changes.send(KeyChange::Added(key.clone()));
        }
        Subscription {
            hub: self.clone(),
            key,
            id,
        }
    }

    fn unsubscribe(&self, key: &PriceKey, id: u64) {
        let emptied = match self.inner.subscribers.get_mut(key) {
            Some(mut subs) => {
                subs.retain(|s| s.id != id);
                subs.is_empty()
            }
            None => false,
        };
        if emptied {
            self.inner
                .subscribers
                .remove_if(key, |_, subs| subs.is_empty());
            debug!("Last subscriber left {}", key);
            let _ = self.inner.key_changes.send(KeyChange::Removed(key.clone()));
        }
    }

    /// Stream of subscribe/unsubscribe notifications
    pub fn key_changes(&self) -> broadcast::Receiver<KeyChange> {
        self.inner.key_changes.subscribe()
    }

    /// Keys with at least one subscriber
    pub fn active_keys(&self) -> Vec<PriceKey> {
        let mut keys: Vec<PriceKey> = self
            .inner
            .subscribers
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn last_known(&self, key: &PriceKey) -> Option<PriceTick> {
        self.inner.last.get(key).map(|t| t.clone())
    }

    /// Publish a tick. Returns false when the tick was rejected.
    pub fn publish(&self, tick: PriceTick) -> bool {
        if !tick.price.is_finite() || tick.price <= 0.0 {
            warn!("Dropping invalid price {} for {}:{}", tick.price, tick.network, tick.token);
            return false;
        }

        let key = tick.key();
        let previous = match self.inner.last.entry(key.clone()) {
            Entry::Occupied(mut o) => {
                if tick.timestamp < o.get().timestamp {
                    debug!(
                        "Dropping stale tick for {} ({} < {})",
                        key,
                        tick.timestamp,
                        o.get().timestamp
                    );
                    return false;
                }
                Some(o.insert(tick.clone()))
            }
            Entry::Vacant(v) => {
                v.insert(tick.clone());
                None
            }
        };

        self.deliver(&key, &tick);

        if let Some(prev) = previous {
            let change = pct_change(prev.price, tick.price);
            if change.abs() >= self.inner.significant_move_pct {
                info!(
                    "Significant move on {}: {:.2}% ({} -> {})",
                    key, change, prev.price, tick.price
                );
                self.inner.events.emit(TradeEvent::SignificantPriceMove {
                    network: tick.network,
                    token: tick.token.clone(),
                    previous_price: prev.price,
                    price: tick.price,
                    change_pct: change,
                });
            }
        }
        true
    }

    fn deliver(&self, key: &PriceKey, tick: &PriceTick) {
        let mut closed = Vec::new();
        if let Some(subs) = self.inner.subscribers.get(key) {
            for sub in subs.iter() {
                match sub.tx.try_send(tick.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("Subscriber {} for {} is full, tick dropped", sub.id, key);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(sub.id),
                }
            }
        }
        for id in closed {
            self.unsubscribe(key, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Network;
    use chrono::{Duration, Utc};

    fn tick(token: &str, price: f64, offset_ms: i64) -> PriceTick {
        PriceTick {
            network: Network::Eth,
            token: token.to_string(),
            price,
            volume_24h: 0.0,
            liquidity: 0.0,
            timestamp: Utc::now() + Duration::milliseconds(offset_ms),
        }
    }

    #[tokio::test]
    async fn test_delivers_to_subscribers_and_tracks_last() {
        let hub = PriceFeedHub::new(5.0, EventBus::default());
        let (tx, mut rx) = mpsc::channel(8);
        let key = PriceKey::new(Network::Eth, "0xa");
        let _sub = hub.subscribe(key.clone(), tx);

        assert!(hub.publish(tick("0xa", 1.0, 0)));
        assert!(hub.publish(tick("0xb", 9.0, 0)));
        assert_eq!(rx.recv().await.unwrap().price, 1.0);
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.last_known(&key).unwrap().price, 1.0);
    }

    #[tokio::test]
    async fn test_stale_ticks_are_dropped() {
        let hub = PriceFeedHub::new(50.0, EventBus::default());
        let (tx, mut rx) = mpsc::channel(8);
        let _sub = hub.subscribe(PriceKey::new(Network::Eth, "0xa"), tx);

        assert!(hub.publish(tick("0xa", 1.0, 1_000)));
        assert!(!hub.publish(tick("0xa", 2.0, 0)));
        assert!(hub.publish(tick("0xa", 3.0, 2_000)));

        assert_eq!(rx.recv().await.unwrap().price, 1.0);
        assert_eq!(rx.recv().await.unwrap().price, 3.0);
    }

    #[tokio::test]
    async fn test_invalid_price_rejected() {
        let hub = PriceFeedHub::new(5.0, EventBus::default());
        assert!(!hub.publish(tick("0xa", 0.0, 0)));
        assert!(!hub.publish(tick("0xa", f64::NAN, 0)));
    }

    #[tokio::test]
    async fn test_significant_move_emitted() {
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let hub = PriceFeedHub::new(5.0, bus);

        hub.publish(tick("0xa", 100.0, 0));
        hub.publish(tick("0xa", 103.0, 1));
        hub.publish(tick("0xa", 110.0, 2));

        match events.recv().await.unwrap() {
            TradeEvent::SignificantPriceMove { previous_price, price, .. } => {
                assert_eq!(previous_price, 103.0);
                assert_eq!(price, 110.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropping_subscription_announces_removal() {
        let hub = PriceFeedHub::new(5.0, EventBus::default());
        let mut changes = hub.key_changes();
        let key = PriceKey::new(Network::Solana, "So1");

        let (tx, _rx) = mpsc::channel(1);
        let first = hub.subscribe(key.clone(), tx.clone());
        let second = hub.subscribe(key.clone(), tx);
        assert_eq!(changes.recv().await.unwrap(), KeyChange::Added(key.clone()));
        assert_eq!(hub.active_keys(), vec![key.clone()]);

        drop(first);
        assert_eq!(hub.active_keys(), vec![key.clone()]);
        drop(second);
        assert_eq!(changes.recv().await.unwrap(), KeyChange::Removed(key));
        assert!(hub.active_keys().is_empty());
    }

    #[tokio::test]
    async fn test_closed_receivers_are_pruned() {
        let hub = PriceFeedHub::new(5.0, EventBus::default());
        let key = PriceKey::new(Network::Eth, "0xa");
        let (tx, rx) = mpsc::channel(1);
        let sub = hub.subscribe(key.clone(), tx);
        drop(rx);
        hub.publish(tick("0xa", 1.0, 0));
        assert!(hub.active_keys().is_empty());
        drop(sub);
    }
}
