//! Round lifecycle events pushed to clients.
//!
//! The engine emits fire-and-forget; it never depends on delivery
//! succeeding. The publisher is injected at construction so no component
//! reaches for a global transport handle.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events broadcast over the push channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    /// A new round began. Carries the commit hash, not the crash point.
    RoundStart {
        round_number: u64,
        crash_point_hash: String,
        message: String,
    },

    /// The multiplier clock advanced
    MultiplierUpdate { multiplier: f64 },

    /// The round reached its crash point
    RoundCrash {
        round_number: u64,
        final_multiplier: f64,
    },

    /// A player locked in a payout
    PlayerCashout {
        player_id: String,
        payout_crypto: f64,
        payout_usd: f64,
        at_multiplier: f64,
    },
}

/// Sink for engine events. `emit` must not block and must not fail the
/// caller.
pub trait EventPublisher: Send + Sync {
    fn emit(&self, event: GameEvent);
}

/// Fan-out publisher backed by a tokio broadcast channel.
///
/// Slow or absent subscribers drop events; the engine is never back-pressured
/// by the push channel.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<GameEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn emit(&self, event: GameEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

/// Publisher that discards everything. Useful in tests.
pub struct NullPublisher;

impl EventPublisher for NullPublisher {
    fn emit(&self, _event: GameEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = GameEvent::RoundCrash {
            round_number: 3,
            final_multiplier: 2.5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "round_crash");
        assert_eq!(json["round_number"], 3);
        assert_eq!(json["final_multiplier"], 2.5);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let publisher = BroadcastPublisher::new(16);
        let mut rx = publisher.subscribe();

        publisher.emit(GameEvent::MultiplierUpdate { multiplier: 1.01 });
        let event = rx.recv().await.unwrap();
        assert_eq!(event, GameEvent::MultiplierUpdate { multiplier: 1.01 });
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let publisher = BroadcastPublisher::new(16);
        publisher.emit(GameEvent::MultiplierUpdate { multiplier: 1.5 });
    }
}
