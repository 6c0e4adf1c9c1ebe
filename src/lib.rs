//! Crashcore - Crash-Game Round Engine
//!
//! A continuously repeating "crash" betting game: each round has a hidden,
//! pre-determined crash multiplier derived via commit-reveal; a visible
//! multiplier grows on a fixed tick; players bet while the round runs and
//! must cash out before the crash point to win.
//!
//! The [`engine::RoundEngine`] serializes every tick, bet and cashout
//! through one command queue, so round state and wallet balances are never
//! mutated by racing callers.

pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod fairness;
pub mod oracle;
pub mod store;
pub mod types;
pub mod wallet;

pub use config::{ConfigLoader, CrashcoreConfig, EngineConfig};
pub use engine::RoundEngine;
pub use errors::{EngineResult, GameError};
pub use events::{BroadcastPublisher, EventPublisher, GameEvent};
pub use oracle::{CachingPriceOracle, PriceOracle, StaticPriceOracle};
pub use store::{MemoryRoundStore, RoundStore};
pub use types::{Currency, RoundSnapshot, RoundStatus, RoundSummary};
pub use wallet::WalletLedger;
