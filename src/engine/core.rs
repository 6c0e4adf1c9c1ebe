//! The serialized core that owns the live round.
//!
//! Every tick, bet, cashout, snapshot and round start is a [`Command`]
//! processed in arrival order by a single task. Nothing else mutates round
//! state or (for game operations) wallet balances, which is what makes the
//! crash-vs-cashout tie-break well defined: a cashout dequeued after the
//! crash tick observes the sealed round and is rejected.

use crate::config::EngineConfig;
use crate::errors::{EngineResult, GameError};
use crate::events::{EventPublisher, GameEvent};
use crate::fairness;
use crate::oracle;
use crate::store::RoundStore;
use crate::types::{
    Bet, BetReceipt, Cashout, CashoutReceipt, Currency, RoundId, RoundSnapshot, RoundStatus,
    TransactionRecord,
};
use crate::wallet::WalletLedger;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Message processed by the engine task.
pub(crate) enum Command {
    Tick,
    StartRound,
    PlaceBet {
        player_id: String,
        currency: Currency,
        usd_amount: f64,
        price: f64,
        reply: oneshot::Sender<EngineResult<BetReceipt>>,
    },
    Cashout {
        player_id: String,
        reply: oneshot::Sender<EngineResult<CashoutReceipt>>,
    },
    Snapshot {
        reply: oneshot::Sender<EngineResult<RoundSnapshot>>,
    },
    Shutdown,
}

/// Mutable state of the round currently owned by the engine.
struct LiveRound {
    id: RoundId,
    number: u64,
    crash_point: f64,
    commit_hash: String,
    status: RoundStatus,
    multiplier: f64,
    bets: Vec<Bet>,
    cashed_out: HashSet<String>,
    /// Whether the `crashed` transition has been made durable.
    crash_persisted: bool,
}

pub(crate) struct EngineCore {
    config: EngineConfig,
    store: Arc<dyn RoundStore>,
    wallet: Arc<WalletLedger>,
    publisher: Arc<dyn EventPublisher>,
    /// Sender side of our own queue, used to line up the next round start.
    commands: mpsc::Sender<Command>,
    round: Option<LiveRound>,
    next_round_number: u64,
    recovered: bool,
}

impl EngineCore {
    pub(crate) fn new(
        config: EngineConfig,
        store: Arc<dyn RoundStore>,
        wallet: Arc<WalletLedger>,
        publisher: Arc<dyn EventPublisher>,
        commands: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            config,
            store,
            wallet,
            publisher,
            commands,
            round: None,
            next_round_number: 1,
            recovered: false,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Tick => self.handle_tick().await,
                Command::StartRound => self.handle_start_round().await,
                Command::PlaceBet {
                    player_id,
                    currency,
                    usd_amount,
                    price,
                    reply,
                } => {
                    let result = self
                        .handle_place_bet(player_id, currency, usd_amount, price)
                        .await;
                    let _ = reply.send(result);
                }
                Command::Cashout { player_id, reply } => {
                    let result = self.handle_cashout(player_id).await;
                    let _ = reply.send(result);
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Shutdown => break,
            }
        }
        info!("round engine stopped");
    }

    /// Advance the multiplier clock one step.
    async fn handle_tick(&mut self) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        match round.status {
            RoundStatus::Running => {}
            RoundStatus::Crashed if !round.crash_persisted => {
                // An earlier persist attempt failed; keep trying.
                self.resolve_crash().await;
                return;
            }
            _ => return,
        }

        round.multiplier *= 1.0 + self.config.growth_rate;

        if round.multiplier >= round.crash_point {
            round.multiplier = round.crash_point;
            round.status = RoundStatus::Crashed;
            self.resolve_crash().await;
        } else {
            let multiplier = to_cents(round.multiplier);
            self.publisher.emit(GameEvent::MultiplierUpdate { multiplier });
        }
    }

    /// Make the crash transition durable, announce it, and line up the next
    /// round. Returns false while the transition is not yet durable; an
    /// unresolved round blocks all subsequent rounds.
    async fn resolve_crash(&mut self) -> bool {
        let (id, number, crash_point) = match self.round.as_ref() {
            Some(r) if r.status == RoundStatus::Crashed && !r.crash_persisted => {
                (r.id, r.number, r.crash_point)
            }
            _ => return true,
        };

        let mut durable = false;
        let mut backoff = Duration::from_millis(self.config.crash_persist_backoff_ms);
        for attempt in 1..=self.config.crash_persist_attempts {
            match self.store.set_status(id, RoundStatus::Crashed).await {
                Ok(()) => {
                    durable = true;
                    break;
                }
                Err(err) => {
                    warn!(round = number, attempt, error = %err, "failed to persist crash transition");
                    if attempt < self.config.crash_persist_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }
        if !durable {
            error!(
                round = number,
                "crash transition still not durable; new rounds are blocked until it is"
            );
            return false;
        }

        if let Some(round) = self.round.as_mut() {
            round.crash_persisted = true;
        }
        self.publisher.emit(GameEvent::RoundCrash {
            round_number: number,
            final_multiplier: crash_point,
        });
        info!(round = number, crash_point, "round crashed");
        self.next_round_number = number + 1;

        // The crash itself is the primary trigger for the next round; the
        // scheduler cadence is only a liveness backstop.
        if let Err(err) = self.commands.try_send(Command::StartRound) {
            debug!("could not self-enqueue round start: {}", err);
        }
        true
    }

    async fn handle_start_round(&mut self) {
        if let Some(round) = &self.round {
            if round.status == RoundStatus::Running {
                // Only one round may run at a time; a start request while
                // one is live is the backstop firing mid-round.
                debug!(round = round.number, "start requested while a round is running; ignored");
                return;
            }
            if round.status == RoundStatus::Crashed && !round.crash_persisted {
                if !self.resolve_crash().await {
                    return;
                }
            }
        }

        if !self.recovered && !self.recover_from_store().await {
            return;
        }

        let number = self.next_round_number;
        let crash_point = fairness::generate_crash_point(&self.config.seed, number);
        let commit_hash = fairness::commit_hash(&self.config.seed, number);

        match self.store.create_round(number, crash_point).await {
            Ok(id) => {
                self.round = Some(LiveRound {
                    id,
                    number,
                    crash_point,
                    commit_hash: commit_hash.clone(),
                    status: RoundStatus::Running,
                    multiplier: 1.0,
                    bets: Vec::new(),
                    cashed_out: HashSet::new(),
                    crash_persisted: false,
                });
                self.publisher.emit(GameEvent::RoundStart {
                    round_number: number,
                    crash_point_hash: commit_hash,
                    message: format!("Round {} started!", number),
                });
                info!(round = number, "round started");
            }
            Err(err) => {
                error!(round = number, error = %err, "failed to persist new round; scheduler will retry");
            }
        }
    }

    /// One-time startup pass: seal any round a previous process left
    /// running and resume numbering after the highest stored round.
    async fn recover_from_store(&mut self) -> bool {
        match self.store.find_running_round().await {
            Ok(Some(stale)) => {
                if let Err(err) = self.store.set_status(stale.id, RoundStatus::Crashed).await {
                    warn!(round = stale.round_number, error = %err, "failed to seal stale round; retrying on next start");
                    return false;
                }
                warn!(
                    round = stale.round_number,
                    "sealed round left running by a previous run"
                );
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "recovery scan failed; retrying on next start");
                return false;
            }
        }

        match self.store.list_recent_rounds(1).await {
            Ok(rounds) => {
                self.next_round_number = rounds.first().map(|r| r.round_number + 1).unwrap_or(1);
                self.recovered = true;
                true
            }
            Err(err) => {
                warn!(error = %err, "could not determine last round number; retrying on next start");
                false
            }
        }
    }

    /// Bet against the live round. The price was fetched before the command
    /// entered the queue; round status is re-validated here.
    async fn handle_place_bet(
        &mut self,
        player_id: String,
        currency: Currency,
        usd_amount: f64,
        price: f64,
    ) -> EngineResult<BetReceipt> {
        let store = Arc::clone(&self.store);
        let wallet = Arc::clone(&self.wallet);

        let round = match self.round.as_mut() {
            Some(r) if r.status == RoundStatus::Running => r,
            _ => return Err(GameError::NoActiveRound),
        };

        if round.bets.iter().any(|b| b.player_id == player_id) {
            return Err(GameError::Validation(format!(
                "player {} already has a bet in round {}",
                player_id, round.number
            )));
        }

        let crypto_amount = oracle::usd_to_crypto(usd_amount, price)?;
        wallet.debit(&player_id, currency, crypto_amount)?;

        let bet = Bet {
            player_id: player_id.clone(),
            usd_amount,
            crypto_amount,
            currency,
            price_at_time: price,
            timestamp: Utc::now(),
        };
        let record = TransactionRecord::for_bet(&bet);

        if let Err(err) = store.append_bet(round.id, bet.clone(), record).await {
            // A debit with no bet record must never survive.
            if let Err(rollback) = wallet.credit(&player_id, currency, crypto_amount) {
                error!(player = %player_id, error = %rollback, "debit rollback failed; wallet out of sync with records");
            }
            return Err(err);
        }

        round.bets.push(bet);
        Ok(BetReceipt {
            round_number: round.number,
            crypto_amount,
            price_at_time: price,
        })
    }

    async fn handle_cashout(&mut self, player_id: String) -> EngineResult<CashoutReceipt> {
        let store = Arc::clone(&self.store);
        let wallet = Arc::clone(&self.wallet);

        let round = match self.round.as_mut() {
            Some(r) => r,
            None => return Err(GameError::NoActiveRound),
        };
        match round.status {
            RoundStatus::Running => {}
            RoundStatus::Crashed => {
                return Err(GameError::AlreadyCrashed {
                    round_number: round.number,
                    final_multiplier: round.crash_point,
                })
            }
            RoundStatus::Waiting => return Err(GameError::NoActiveRound),
        }

        let bet = round
            .bets
            .iter()
            .find(|b| b.player_id == player_id)
            .cloned()
            .ok_or_else(|| GameError::NotFound(format!("no active bet for player {}", player_id)))?;

        if round.cashed_out.contains(&player_id) {
            return Err(GameError::DuplicateCashout(player_id));
        }

        // The crash tick wins any tie: once the multiplier has reached the
        // crash point the round is over.
        if round.multiplier >= round.crash_point {
            return Err(GameError::AlreadyCrashed {
                round_number: round.number,
                final_multiplier: round.crash_point,
            });
        }

        let at_multiplier = round.multiplier;
        let payout_crypto = bet.crypto_amount * at_multiplier;
        let payout_usd = bet.usd_amount * at_multiplier;

        wallet.credit(&player_id, bet.currency, payout_crypto)?;

        let cashout = Cashout {
            player_id: player_id.clone(),
            payout_crypto,
            payout_usd,
            at_multiplier,
            timestamp: Utc::now(),
        };
        let record = TransactionRecord::for_cashout(&cashout, bet.currency, bet.price_at_time);

        if let Err(err) = store.append_cashout(round.id, cashout, record).await {
            if let Err(rollback) = wallet.debit(&player_id, bet.currency, payout_crypto) {
                error!(player = %player_id, error = %rollback, "credit rollback failed; wallet out of sync with records");
            }
            return Err(err);
        }

        round.cashed_out.insert(player_id.clone());
        self.publisher.emit(GameEvent::PlayerCashout {
            player_id,
            payout_crypto,
            payout_usd,
            at_multiplier,
        });
        Ok(CashoutReceipt {
            payout_crypto,
            payout_usd,
            at_multiplier,
        })
    }

    fn snapshot(&self) -> EngineResult<RoundSnapshot> {
        let round = self.round.as_ref().ok_or(GameError::NoActiveRound)?;
        Ok(RoundSnapshot {
            round_number: round.number,
            status: round.status,
            current_multiplier: to_cents(round.multiplier),
            crash_point_hash: round.commit_hash.clone(),
        })
    }
}

/// Presentation rounding for broadcast multiplier values.
fn to_cents(multiplier: f64) -> f64 {
    (multiplier * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRoundStore;
    use crate::types::RoundSummary;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct RecordingPublisher {
        events: Mutex<Vec<GameEvent>>,
    }

    impl RecordingPublisher {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        fn all(&self) -> Vec<GameEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventPublisher for RecordingPublisher {
        fn emit(&self, event: GameEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    /// Store wrapper that fails a configurable number of calls.
    struct FlakyStore {
        inner: MemoryRoundStore,
        fail_set_status: AtomicU32,
        fail_append_bet: AtomicU32,
        fail_append_cashout: AtomicU32,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryRoundStore::new(),
                fail_set_status: AtomicU32::new(0),
                fail_append_bet: AtomicU32::new(0),
                fail_append_cashout: AtomicU32::new(0),
            }
        }

        fn consume_failure(counter: &AtomicU32) -> bool {
            let mut current = counter.load(Ordering::SeqCst);
            while current > 0 {
                match counter.compare_exchange(
                    current,
                    current - 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => return true,
                    Err(actual) => current = actual,
                }
            }
            false
        }
    }

    #[async_trait]
    impl RoundStore for FlakyStore {
        async fn create_round(&self, round_number: u64, crash_point: f64) -> EngineResult<RoundId> {
            self.inner.create_round(round_number, crash_point).await
        }

        async fn append_bet(
            &self,
            round_id: RoundId,
            bet: Bet,
            record: TransactionRecord,
        ) -> EngineResult<()> {
            if Self::consume_failure(&self.fail_append_bet) {
                return Err(GameError::Persistence("injected append_bet failure".into()));
            }
            self.inner.append_bet(round_id, bet, record).await
        }

        async fn append_cashout(
            &self,
            round_id: RoundId,
            cashout: Cashout,
            record: TransactionRecord,
        ) -> EngineResult<()> {
            if Self::consume_failure(&self.fail_append_cashout) {
                return Err(GameError::Persistence(
                    "injected append_cashout failure".into(),
                ));
            }
            self.inner.append_cashout(round_id, cashout, record).await
        }

        async fn set_status(&self, round_id: RoundId, status: RoundStatus) -> EngineResult<()> {
            if Self::consume_failure(&self.fail_set_status) {
                return Err(GameError::Persistence("injected set_status failure".into()));
            }
            self.inner.set_status(round_id, status).await
        }

        async fn find_running_round(&self) -> EngineResult<Option<crate::types::Round>> {
            self.inner.find_running_round().await
        }

        async fn list_recent_rounds(&self, limit: usize) -> EngineResult<Vec<RoundSummary>> {
            self.inner.list_recent_rounds(limit).await
        }

        async fn list_transactions(
            &self,
            player_id: &str,
            limit: usize,
        ) -> EngineResult<Vec<TransactionRecord>> {
            self.inner.list_transactions(player_id, limit).await
        }
    }

    struct Harness {
        core: EngineCore,
        store: Arc<FlakyStore>,
        wallet: Arc<WalletLedger>,
        events: Arc<RecordingPublisher>,
        _rx: mpsc::Receiver<Command>,
    }

    /// A seed whose first round crashes no earlier than `min`, found
    /// deterministically so tests can tick a known number of times without
    /// tripping the crash.
    fn seed_with_min_crash_point(min: f64) -> String {
        (0u32..)
            .map(|i| format!("test_seed_{}", i))
            .find(|seed| fairness::generate_crash_point(seed, 1) >= min)
            .unwrap()
    }

    fn harness() -> Harness {
        harness_with_seed(seed_with_min_crash_point(3.0))
    }

    fn harness_with_seed(seed: String) -> Harness {
        let store = Arc::new(FlakyStore::new());
        let wallet = Arc::new(WalletLedger::new());
        wallet
            .register_player("alice", HashMap::from([(Currency::Btc, 10.0)]))
            .unwrap();
        wallet
            .register_player("bob", HashMap::from([(Currency::Eth, 10.0)]))
            .unwrap();
        let events = Arc::new(RecordingPublisher::new());

        let config = EngineConfig {
            seed,
            crash_persist_attempts: 3,
            crash_persist_backoff_ms: 1,
            ..EngineConfig::default()
        };
        let (tx, rx) = mpsc::channel(64);
        let core = EngineCore::new(
            config,
            store.clone() as Arc<dyn RoundStore>,
            wallet.clone(),
            events.clone() as Arc<dyn EventPublisher>,
            tx,
        );

        Harness {
            core,
            store,
            wallet,
            events,
            _rx: rx,
        }
    }

    async fn tick_until_crash(core: &mut EngineCore) {
        for _ in 0..2_000 {
            core.handle_tick().await;
            if core
                .round
                .as_ref()
                .map(|r| r.status == RoundStatus::Crashed)
                .unwrap_or(true)
            {
                return;
            }
        }
        panic!("round never crashed");
    }

    #[tokio::test]
    async fn test_round_starts_with_committed_crash_point() {
        let mut h = harness();
        h.core.handle_start_round().await;

        let round = h.core.round.as_ref().unwrap();
        let seed = h.core.config.seed.clone();
        assert_eq!(round.number, 1);
        assert_eq!(round.status, RoundStatus::Running);
        assert_eq!(round.multiplier, 1.0);
        assert_eq!(round.crash_point, fairness::generate_crash_point(&seed, 1));
        assert_eq!(round.commit_hash, fairness::commit_hash(&seed, 1));

        match &h.events.all()[0] {
            GameEvent::RoundStart {
                round_number,
                crash_point_hash,
                ..
            } => {
                assert_eq!(*round_number, 1);
                assert_eq!(*crash_point_hash, fairness::commit_hash(&seed, 1));
            }
            other => panic!("expected round_start, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiplier_grows_one_percent_per_tick() {
        let mut h = harness();
        h.core.handle_start_round().await;

        for _ in 0..5 {
            h.core.handle_tick().await;
        }
        let round = h.core.round.as_ref().unwrap();
        assert!((round.multiplier - 1.01f64.powi(5)).abs() < 1e-12);
        assert_eq!(round.status, RoundStatus::Running);
    }

    #[tokio::test]
    async fn test_round_crashes_at_crash_point_and_advances() {
        let mut h = harness();
        h.core.handle_start_round().await;
        let crash_point = h.core.round.as_ref().unwrap().crash_point;

        tick_until_crash(&mut h.core).await;

        let round = h.core.round.as_ref().unwrap();
        assert_eq!(round.status, RoundStatus::Crashed);
        assert_eq!(round.multiplier, crash_point);
        assert!(round.crash_persisted);
        assert_eq!(h.core.next_round_number, 2);

        let summaries = h.store.list_recent_rounds(1).await.unwrap();
        assert_eq!(summaries[0].status, RoundStatus::Crashed);

        let events = h.events.all();
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::RoundCrash { round_number: 1, final_multiplier } if *final_multiplier == crash_point
        )));
    }

    #[tokio::test]
    async fn test_start_is_rejected_while_round_is_running() {
        let mut h = harness();
        h.core.handle_start_round().await;
        h.core.handle_start_round().await;

        assert_eq!(h.core.round.as_ref().unwrap().number, 1);
        let starts = h
            .events
            .all()
            .iter()
            .filter(|e| matches!(e, GameEvent::RoundStart { .. }))
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn test_bet_debits_wallet_and_persists() {
        let mut h = harness();
        h.core.handle_start_round().await;

        let receipt = h
            .core
            .handle_place_bet("alice".into(), Currency::Btc, 300.0, 30_000.0)
            .await
            .unwrap();

        assert_eq!(receipt.round_number, 1);
        assert!((receipt.crypto_amount - 0.01).abs() < 1e-12);
        assert!((h.wallet.balance("alice", Currency::Btc).unwrap() - 9.99).abs() < 1e-12);

        let summaries = h.store.list_recent_rounds(1).await.unwrap();
        assert_eq!(summaries[0].total_bets, 1);

        let log = h.store.list_transactions("alice", 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].tx_type, crate::types::TransactionType::Bet);
    }

    #[tokio::test]
    async fn test_bet_requires_running_round() {
        let mut h = harness();
        let err = h
            .core
            .handle_place_bet("alice".into(), Currency::Btc, 10.0, 30_000.0)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::NoActiveRound));

        h.core.handle_start_round().await;
        tick_until_crash(&mut h.core).await;

        let err = h
            .core
            .handle_place_bet("alice".into(), Currency::Btc, 10.0, 30_000.0)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::NoActiveRound));
    }

    #[tokio::test]
    async fn test_one_bet_per_player_per_round() {
        let mut h = harness();
        h.core.handle_start_round().await;

        h.core
            .handle_place_bet("alice".into(), Currency::Btc, 10.0, 30_000.0)
            .await
            .unwrap();
        let err = h
            .core
            .handle_place_bet("alice".into(), Currency::Btc, 10.0, 30_000.0)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::Validation(_)));
    }

    #[tokio::test]
    async fn test_bet_rejected_on_insufficient_funds() {
        let mut h = harness();
        h.core.handle_start_round().await;

        // 600k USD at 30k/BTC needs 20 BTC; alice has 10.
        let err = h
            .core
            .handle_place_bet("alice".into(), Currency::Btc, 600_000.0, 30_000.0)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::InsufficientFunds { .. }));
        assert_eq!(h.wallet.balance("alice", Currency::Btc).unwrap(), 10.0);
        assert!(h.store.list_transactions("alice", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bet_debit_rolled_back_on_persistence_failure() {
        let mut h = harness();
        h.core.handle_start_round().await;
        h.store.fail_append_bet.store(1, Ordering::SeqCst);

        let err = h
            .core
            .handle_place_bet("alice".into(), Currency::Btc, 300.0, 30_000.0)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::Persistence(_)));

        // The debit was rolled back and no records survive.
        assert_eq!(h.wallet.balance("alice", Currency::Btc).unwrap(), 10.0);
        assert!(h.core.round.as_ref().unwrap().bets.is_empty());
        assert!(h.store.list_transactions("alice", 10).await.unwrap().is_empty());

        // The next attempt (store healthy again) succeeds.
        h.core
            .handle_place_bet("alice".into(), Currency::Btc, 300.0, 30_000.0)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cashout_pays_at_current_multiplier() {
        let mut h = harness();
        h.core.handle_start_round().await;
        let receipt = h
            .core
            .handle_place_bet("alice".into(), Currency::Btc, 300.0, 30_000.0)
            .await
            .unwrap();

        for _ in 0..5 {
            h.core.handle_tick().await;
        }
        let multiplier = h.core.round.as_ref().unwrap().multiplier;
        assert!(multiplier < h.core.round.as_ref().unwrap().crash_point);

        let cashout = h.core.handle_cashout("alice".into()).await.unwrap();
        assert_eq!(cashout.at_multiplier, multiplier);
        assert!((cashout.payout_crypto - receipt.crypto_amount * multiplier).abs() < 1e-12);
        assert!((cashout.payout_usd - 300.0 * multiplier).abs() < 1e-9);

        let expected_balance = 10.0 - receipt.crypto_amount + cashout.payout_crypto;
        assert!(
            (h.wallet.balance("alice", Currency::Btc).unwrap() - expected_balance).abs() < 1e-12
        );

        let summaries = h.store.list_recent_rounds(1).await.unwrap();
        assert_eq!(summaries[0].total_cashouts, 1);

        assert!(h.events.all().iter().any(|e| matches!(
            e,
            GameEvent::PlayerCashout { player_id, .. } if player_id == "alice"
        )));
    }

    #[tokio::test]
    async fn test_duplicate_cashout_rejected() {
        let mut h = harness();
        h.core.handle_start_round().await;
        h.core
            .handle_place_bet("alice".into(), Currency::Btc, 300.0, 30_000.0)
            .await
            .unwrap();
        h.core.handle_tick().await;

        h.core.handle_cashout("alice".into()).await.unwrap();
        let balance_after_first = h.wallet.balance("alice", Currency::Btc).unwrap();

        let err = h.core.handle_cashout("alice".into()).await.unwrap_err();
        assert!(matches!(err, GameError::DuplicateCashout(_)));
        // Credited exactly once.
        assert_eq!(
            h.wallet.balance("alice", Currency::Btc).unwrap(),
            balance_after_first
        );
    }

    #[tokio::test]
    async fn test_cashout_without_bet_is_not_found() {
        let mut h = harness();
        h.core.handle_start_round().await;

        let err = h.core.handle_cashout("alice".into()).await.unwrap_err();
        assert!(matches!(err, GameError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cashout_after_crash_is_rejected() {
        let mut h = harness();
        h.core.handle_start_round().await;
        h.core
            .handle_place_bet("alice".into(), Currency::Btc, 300.0, 30_000.0)
            .await
            .unwrap();

        tick_until_crash(&mut h.core).await;

        // A cashout queued behind the crash tick observes the sealed round.
        let err = h.core.handle_cashout("alice".into()).await.unwrap_err();
        assert!(matches!(err, GameError::AlreadyCrashed { .. }));
        assert!((h.wallet.balance("alice", Currency::Btc).unwrap() - 9.99).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_cashout_credit_rolled_back_on_persistence_failure() {
        let mut h = harness();
        h.core.handle_start_round().await;
        h.core
            .handle_place_bet("alice".into(), Currency::Btc, 300.0, 30_000.0)
            .await
            .unwrap();
        h.core.handle_tick().await;
        let balance_before = h.wallet.balance("alice", Currency::Btc).unwrap();

        h.store.fail_append_cashout.store(1, Ordering::SeqCst);
        let err = h.core.handle_cashout("alice".into()).await.unwrap_err();
        assert!(matches!(err, GameError::Persistence(_)));
        assert_eq!(
            h.wallet.balance("alice", Currency::Btc).unwrap(),
            balance_before
        );

        // Not marked cashed out, so the retry succeeds.
        h.core.handle_cashout("alice".into()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_persist_retries_until_durable() {
        let mut h = harness();
        h.core.handle_start_round().await;
        h.store.fail_set_status.store(2, Ordering::SeqCst);

        tick_until_crash(&mut h.core).await;

        // Two injected failures, three attempts configured.
        assert!(h.core.round.as_ref().unwrap().crash_persisted);
        let summaries = h.store.list_recent_rounds(1).await.unwrap();
        assert_eq!(summaries[0].status, RoundStatus::Crashed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_crash_blocks_next_round() {
        let mut h = harness();
        h.core.handle_start_round().await;
        h.store.fail_set_status.store(u32::MAX, Ordering::SeqCst);

        tick_until_crash(&mut h.core).await;
        let round = h.core.round.as_ref().unwrap();
        assert!(!round.crash_persisted);
        assert_eq!(h.core.next_round_number, 1);

        // The backstop must not start a fresh round over an unresolved one.
        h.core.handle_start_round().await;
        assert_eq!(h.core.round.as_ref().unwrap().number, 1);
        assert_eq!(h.core.round.as_ref().unwrap().status, RoundStatus::Crashed);

        // Store recovers: the next start attempt resolves, then advances.
        h.store.fail_set_status.store(0, Ordering::SeqCst);
        h.core.handle_start_round().await;
        assert!(h
            .events
            .all()
            .iter()
            .any(|e| matches!(e, GameEvent::RoundCrash { round_number: 1, .. })));
        assert_eq!(h.core.round.as_ref().unwrap().number, 2);
        assert_eq!(h.core.round.as_ref().unwrap().status, RoundStatus::Running);
    }

    #[tokio::test]
    async fn test_recovery_seals_stale_round_and_resumes_numbering() {
        let mut h = harness();
        h.store.create_round(41, 2.5).await.unwrap();

        h.core.handle_start_round().await;

        assert_eq!(h.core.round.as_ref().unwrap().number, 42);
        let summaries = h.store.list_recent_rounds(2).await.unwrap();
        assert_eq!(summaries[1].round_number, 41);
        assert_eq!(summaries[1].status, RoundStatus::Crashed);
        assert_eq!(summaries[0].round_number, 42);
        assert_eq!(summaries[0].status, RoundStatus::Running);
    }

    #[tokio::test]
    async fn test_snapshot_is_a_value_copy() {
        let mut h = harness();
        assert!(matches!(
            h.core.snapshot(),
            Err(GameError::NoActiveRound)
        ));

        h.core.handle_start_round().await;
        let seed = h.core.config.seed.clone();
        let snapshot = h.core.snapshot().unwrap();
        assert_eq!(snapshot.round_number, 1);
        assert_eq!(snapshot.status, RoundStatus::Running);
        assert_eq!(snapshot.current_multiplier, 1.0);
        assert_eq!(snapshot.crash_point_hash, fairness::commit_hash(&seed, 1));
    }
}
