//! Error taxonomy for round, wallet and oracle operations.
//!
//! Every rejected operation carries a specific kind and a human-readable
//! reason. No operation partially applies under any error path: a failed
//! bet or cashout leaves the wallet exactly as it found it.

use crate::types::Currency;
use thiserror::Error;

/// Root error type for all engine operations
#[derive(Debug, Error)]
pub enum GameError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient {currency} balance: have {available}, need {required}")]
    InsufficientFunds {
        currency: Currency,
        available: f64,
        required: f64,
    },

    #[error("no active round")]
    NoActiveRound,

    #[error("too late: round {round_number} already crashed at {final_multiplier:.2}x")]
    AlreadyCrashed {
        round_number: u64,
        final_multiplier: f64,
    },

    #[error("player {0} already cashed out this round")]
    DuplicateCashout(String),

    #[error("no price available for {0}")]
    PriceUnavailable(Currency),

    #[error("persistence failed: {0}")]
    Persistence(String),

    /// The engine's command channel is closed (process shutting down).
    #[error("round engine is not running")]
    EngineStopped,
}

/// Convenience alias used throughout the crate
pub type EngineResult<T> = Result<T, GameError>;
