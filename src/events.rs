//! Outbound event bus
//!
//! Consumers (dashboard, loggers) subscribe to a broadcast channel. Emitting
//! never waits for a consumer: slow receivers lag and lose the oldest events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::arbitrage::ArbitrageOpportunity;
use crate::position::ExitReason;
use crate::strategy::StrategyKind;
use crate::types::{Network, Side};

/// Events published by the trading core
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TradeEvent {
    TradePlaced {
        network: Network,
        token: String,
        side: Side,
        amount: f64,
        price: f64,
        max_fee: f64,
        private: bool,
        timestamp: DateTime<Utc>,
    },
    PositionOpened {
        network: Network,
        token: String,
        entry_price: f64,
        amount: f64,
    },
    PositionClosed {
        network: Network,
        token: String,
        reason: ExitReason,
        entry_price: f64,
        exit_price: f64,
        realized_profit: f64,
        profit_pct: f64,
    },
    SignificantPriceMove {
        network: Network,
        token: String,
        previous_price: f64,
        price: f64,
        change_pct: f64,
    },
    ArbitrageOpportunity(ArbitrageOpportunity),
    StrategyStarted {
        id: String,
        kind: StrategyKind,
        network: Network,
        token: String,
    },
    StrategyStopped {
        id: String,
        kind: StrategyKind,
    },
    Error {
        context: String,
        message: String,
    },
}

/// Broadcast-based event bus
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TradeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<TradeEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: TradeEvent) {
        if self.tx.send(event).is_err() {
            trace!("Event dropped, no subscribers");
        }
    }

    /// Publish an error event with context
    pub fn emit_error(&self, context: impl Into<String>, err: &dyn std::fmt::Display) {
        self.emit(TradeEvent::Error {
            context: context.into(),
            message: err.to_string(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_does_not_block() {
        let bus = EventBus::new(2);
        for _ in 0..10 {
            bus.emit_error("test", &"boom");
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit_error("intake", &"bad token");
        match rx.recv().await.unwrap() {
            TradeEvent::Error { context, message } => {
                assert_eq!(context, "intake");
                assert_eq!(message, "bad token");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.emit_error("ctx", &i);
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = TradeEvent::StrategyStopped {
            id: "abc".into(),
            kind: StrategyKind::Grid,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"strategyStopped""#));
    }
}
