//! Core domain types for the crash game.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a persisted round record.
pub type RoundId = Uuid;

/// Supported betting currencies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Btc,
    Eth,
}

impl Currency {
    /// List of all supported currencies
    pub fn all_supported() -> Vec<Self> {
        vec![Currency::Btc, Currency::Eth]
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Btc => write!(f, "BTC"),
            Currency::Eth => write!(f, "ETH"),
        }
    }
}

/// Round lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Waiting,
    Running,
    Crashed,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Waiting => write!(f, "waiting"),
            RoundStatus::Running => write!(f, "running"),
            RoundStatus::Crashed => write!(f, "crashed"),
        }
    }
}

/// A bet placed against a running round. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub player_id: String,
    pub usd_amount: f64,
    pub crypto_amount: f64,
    pub currency: Currency,
    pub price_at_time: f64,
    pub timestamp: DateTime<Utc>,
}

/// A cashout resolving one bet at the multiplier it was processed at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cashout {
    pub player_id: String,
    pub payout_crypto: f64,
    pub payout_usd: f64,
    pub at_multiplier: f64,
    pub timestamp: DateTime<Utc>,
}

/// One play cycle from start to crash.
///
/// Never deleted: appended-to while running, then sealed when the multiplier
/// clock reaches the crash point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub round_number: u64,
    pub crash_point: f64,
    pub status: RoundStatus,
    pub bets: Vec<Bet>,
    pub cashouts: Vec<Cashout>,
    pub created_at: DateTime<Utc>,
}

/// Kind of ledger entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Bet,
    Cashout,
}

/// Audit-log entry paired with exactly one Bet or Cashout record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub player_id: String,
    pub usd_amount: f64,
    pub crypto_amount: f64,
    pub currency: Currency,
    pub tx_type: TransactionType,
    pub price_at_time: f64,
    pub tx_hash: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    /// Ledger entry for a placed bet
    pub fn for_bet(bet: &Bet) -> Self {
        Self {
            player_id: bet.player_id.clone(),
            usd_amount: bet.usd_amount,
            crypto_amount: bet.crypto_amount,
            currency: bet.currency,
            tx_type: TransactionType::Bet,
            price_at_time: bet.price_at_time,
            tx_hash: Uuid::new_v4(),
            timestamp: bet.timestamp,
        }
    }

    /// Ledger entry for a cashout, priced at the originating bet's rate
    pub fn for_cashout(cashout: &Cashout, currency: Currency, price_at_time: f64) -> Self {
        Self {
            player_id: cashout.player_id.clone(),
            usd_amount: cashout.payout_usd,
            crypto_amount: cashout.payout_crypto,
            currency,
            tx_type: TransactionType::Cashout,
            price_at_time,
            tx_hash: Uuid::new_v4(),
            timestamp: cashout.timestamp,
        }
    }
}

/// Point-in-time view of the live round.
///
/// Always a value copy; callers never hold a reference into engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round_number: u64,
    pub status: RoundStatus,
    pub current_multiplier: f64,
    pub crash_point_hash: String,
}

/// Round outcome summary for history queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round_number: u64,
    pub crash_point: f64,
    pub total_bets: usize,
    pub total_cashouts: usize,
    pub status: RoundStatus,
}

/// Response for an accepted bet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetReceipt {
    pub round_number: u64,
    pub crypto_amount: f64,
    pub price_at_time: f64,
}

/// Response for a successful cashout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashoutReceipt {
    pub payout_crypto: f64,
    pub payout_usd: f64,
    pub at_multiplier: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_serde_roundtrip() {
        let json = serde_json::to_string(&Currency::Btc).unwrap();
        assert_eq!(json, "\"BTC\"");
        let back: Currency = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Currency::Btc);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&RoundStatus::Running).unwrap(),
            "\"running\""
        );
    }

    #[test]
    fn test_ledger_entry_mirrors_bet() {
        let bet = Bet {
            player_id: "p1".to_string(),
            usd_amount: 25.0,
            crypto_amount: 0.001,
            currency: Currency::Btc,
            price_at_time: 25_000.0,
            timestamp: Utc::now(),
        };

        let record = TransactionRecord::for_bet(&bet);
        assert_eq!(record.tx_type, TransactionType::Bet);
        assert_eq!(record.usd_amount, bet.usd_amount);
        assert_eq!(record.crypto_amount, bet.crypto_amount);
        assert_eq!(record.currency, bet.currency);
    }
}
