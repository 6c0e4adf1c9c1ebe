//! The round engine: authoritative owner of the current round.
//!
//! [`RoundEngine::spawn`] starts three tasks on the current runtime: the
//! engine core (a single serialized consumer of the command queue), the
//! multiplier clock, and the round scheduler. The clock and scheduler never
//! touch state directly; they enqueue commands into the same queue as
//! player operations, so ticks, bets and cashouts are totally ordered.

mod core;

use self::core::{Command, EngineCore};
use crate::config::EngineConfig;
use crate::errors::{EngineResult, GameError};
use crate::events::EventPublisher;
use crate::oracle::PriceOracle;
use crate::store::RoundStore;
use crate::types::{BetReceipt, CashoutReceipt, Currency, RoundSnapshot, RoundSummary};
use crate::wallet::WalletLedger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

/// Cloneable handle to the engine. This is the only entry point through
/// which bets and cashouts reach the wallet ledger and the round store.
#[derive(Clone)]
pub struct RoundEngine {
    commands: mpsc::Sender<Command>,
    store: Arc<dyn RoundStore>,
    wallet: Arc<WalletLedger>,
    oracle: Arc<dyn PriceOracle>,
}

impl RoundEngine {
    /// Spawn the engine and its timer tasks. The first round starts
    /// immediately; must be called from within a tokio runtime.
    pub fn spawn(
        config: EngineConfig,
        store: Arc<dyn RoundStore>,
        wallet: Arc<WalletLedger>,
        oracle: Arc<dyn PriceOracle>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(config.command_buffer);

        let core = EngineCore::new(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&wallet),
            publisher,
            commands.clone(),
        );
        tokio::spawn(core.run(command_rx));

        // Multiplier clock. Ticks are messages, not callbacks.
        let clock = commands.clone();
        let tick_interval = Duration::from_millis(config.tick_interval_ms);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if clock.send(Command::Tick).await.is_err() {
                    break;
                }
            }
        });

        // Round scheduler: starts the first round immediately, then keeps a
        // fixed-cadence backstop; the start command no-ops while a round is
        // running. The crash transition is the primary trigger for the
        // follow-up round.
        let scheduler = commands.clone();
        let round_interval = Duration::from_millis(config.round_interval_ms);
        tokio::spawn(async move {
            if scheduler.send(Command::StartRound).await.is_err() {
                return;
            }
            let mut interval = tokio::time::interval(round_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await; // the immediate first tick
            loop {
                interval.tick().await;
                if scheduler.send(Command::StartRound).await.is_err() {
                    break;
                }
            }
        });

        Self {
            commands,
            store,
            wallet,
            oracle,
        }
    }

    /// Place a bet against the running round.
    ///
    /// The price lookup happens before the request enters the serialized
    /// section, so a slow oracle never stalls the multiplier clock; the
    /// round status is re-validated once the command is dequeued.
    pub async fn place_bet(
        &self,
        player_id: &str,
        currency: Currency,
        usd_amount: f64,
    ) -> EngineResult<BetReceipt> {
        if !usd_amount.is_finite() || usd_amount <= 0.0 {
            return Err(GameError::Validation(format!(
                "bet amount must be greater than 0, got {}",
                usd_amount
            )));
        }
        if !self.wallet.has_player(player_id) {
            return Err(GameError::NotFound(format!("player {}", player_id)));
        }

        let price = self.oracle.get_price(currency).await?;

        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::PlaceBet {
                player_id: player_id.to_string(),
                currency,
                usd_amount,
                price,
                reply,
            })
            .await
            .map_err(|_| GameError::EngineStopped)?;
        reply_rx.await.map_err(|_| GameError::EngineStopped)?
    }

    /// Cash out the player's bet at the current multiplier.
    pub async fn cashout(&self, player_id: &str) -> EngineResult<CashoutReceipt> {
        if !self.wallet.has_player(player_id) {
            return Err(GameError::NotFound(format!("player {}", player_id)));
        }

        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Cashout {
                player_id: player_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| GameError::EngineStopped)?;
        reply_rx.await.map_err(|_| GameError::EngineStopped)?
    }

    /// Value snapshot of the live round, consistent with the command order.
    pub async fn snapshot(&self) -> EngineResult<RoundSnapshot> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| GameError::EngineStopped)?;
        reply_rx.await.map_err(|_| GameError::EngineStopped)?
    }

    /// Recent round outcomes, newest first.
    pub async fn round_history(&self, limit: usize) -> EngineResult<Vec<RoundSummary>> {
        self.store.list_recent_rounds(limit).await
    }

    /// Stop the engine task. Timer tasks exit once the queue closes.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}
