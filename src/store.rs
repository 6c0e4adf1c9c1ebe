//! Durable persistence of rounds, their bet/cashout sub-records and the
//! transaction log.
//!
//! The trait is the seam a database-backed implementation plugs into; the
//! in-memory implementation below is the reference used by the demo binary
//! and the test suite. Appending a bet or cashout persists its paired
//! ledger entry in the same critical section, so no error path can leave an
//! orphaned record or an unpaired ledger entry; the engine only ever has
//! to roll back the wallet.

use crate::errors::{EngineResult, GameError};
use crate::types::{
    Bet, Cashout, Round, RoundId, RoundStatus, RoundSummary, TransactionRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Storage contract consumed by the round engine.
#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Persist a new round. Creation is the `waiting -> running` edge, so
    /// the record is born with status `running`.
    async fn create_round(&self, round_number: u64, crash_point: f64) -> EngineResult<RoundId>;

    /// Append a bet and its ledger entry atomically.
    async fn append_bet(
        &self,
        round_id: RoundId,
        bet: Bet,
        record: TransactionRecord,
    ) -> EngineResult<()>;

    /// Append a cashout and its ledger entry atomically.
    async fn append_cashout(
        &self,
        round_id: RoundId,
        cashout: Cashout,
        record: TransactionRecord,
    ) -> EngineResult<()>;

    async fn set_status(&self, round_id: RoundId, status: RoundStatus) -> EngineResult<()>;

    /// The currently running round, if any. Used for startup recovery.
    async fn find_running_round(&self) -> EngineResult<Option<Round>>;

    /// Round summaries, newest first.
    async fn list_recent_rounds(&self, limit: usize) -> EngineResult<Vec<RoundSummary>>;

    /// A player's ledger entries, newest first.
    async fn list_transactions(
        &self,
        player_id: &str,
        limit: usize,
    ) -> EngineResult<Vec<TransactionRecord>>;
}

#[derive(Default)]
struct StoreInner {
    rounds: Vec<Round>,
    transactions: Vec<TransactionRecord>,
}

impl StoreInner {
    fn round_mut(&mut self, round_id: RoundId) -> EngineResult<&mut Round> {
        self.rounds
            .iter_mut()
            .find(|r| r.id == round_id)
            .ok_or_else(|| GameError::NotFound(format!("round {}", round_id)))
    }
}

/// In-memory [`RoundStore`].
pub struct MemoryRoundStore {
    inner: Mutex<StoreInner>,
}

impl MemoryRoundStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
        }
    }
}

impl Default for MemoryRoundStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoundStore for MemoryRoundStore {
    async fn create_round(&self, round_number: u64, crash_point: f64) -> EngineResult<RoundId> {
        let mut inner = self.inner.lock().await;

        // Single-writer sanity guard: the engine must seal the previous
        // round before creating the next one.
        if let Some(running) = inner
            .rounds
            .iter()
            .find(|r| r.status == RoundStatus::Running)
        {
            return Err(GameError::Persistence(format!(
                "round {} is still running",
                running.round_number
            )));
        }

        let round = Round {
            id: Uuid::new_v4(),
            round_number,
            crash_point,
            status: RoundStatus::Running,
            bets: Vec::new(),
            cashouts: Vec::new(),
            created_at: Utc::now(),
        };
        let id = round.id;
        inner.rounds.push(round);
        Ok(id)
    }

    async fn append_bet(
        &self,
        round_id: RoundId,
        bet: Bet,
        record: TransactionRecord,
    ) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        inner.round_mut(round_id)?.bets.push(bet);
        inner.transactions.push(record);
        Ok(())
    }

    async fn append_cashout(
        &self,
        round_id: RoundId,
        cashout: Cashout,
        record: TransactionRecord,
    ) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        inner.round_mut(round_id)?.cashouts.push(cashout);
        inner.transactions.push(record);
        Ok(())
    }

    async fn set_status(&self, round_id: RoundId, status: RoundStatus) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        inner.round_mut(round_id)?.status = status;
        Ok(())
    }

    async fn find_running_round(&self) -> EngineResult<Option<Round>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rounds
            .iter()
            .rev()
            .find(|r| r.status == RoundStatus::Running)
            .cloned())
    }

    async fn list_recent_rounds(&self, limit: usize) -> EngineResult<Vec<RoundSummary>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rounds
            .iter()
            .rev()
            .take(limit)
            .map(|r| RoundSummary {
                round_number: r.round_number,
                crash_point: r.crash_point,
                total_bets: r.bets.len(),
                total_cashouts: r.cashouts.len(),
                status: r.status,
            })
            .collect())
    }

    async fn list_transactions(
        &self,
        player_id: &str,
        limit: usize,
    ) -> EngineResult<Vec<TransactionRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .transactions
            .iter()
            .rev()
            .filter(|t| t.player_id == player_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
