//! Per-player per-currency balance ledger with atomic debit/credit.
//!
//! Balances are held in a concurrent map keyed by player id; the map's
//! per-entry lock makes every debit and credit a single read-modify-write,
//! so concurrent operations against the same player can never lose an
//! update. A balance is never allowed below zero.

use crate::errors::{EngineResult, GameError};
use crate::types::Currency;
use dashmap::DashMap;
use std::collections::HashMap;

/// Owns every player's wallet for the lifetime of the process.
///
/// All bet/cashout mutations flow through the round engine's serialized
/// context; the entry lock here is the second fence for direct callers.
#[derive(Debug, Default)]
pub struct WalletLedger {
    wallets: DashMap<String, HashMap<Currency, f64>>,
}

impl WalletLedger {
    pub fn new() -> Self {
        Self {
            wallets: DashMap::new(),
        }
    }

    /// Create a wallet with starting balances. Rejects duplicate players.
    pub fn register_player(
        &self,
        player_id: &str,
        initial_balances: HashMap<Currency, f64>,
    ) -> EngineResult<()> {
        if player_id.trim().is_empty() {
            return Err(GameError::Validation("player id must not be empty".into()));
        }
        if initial_balances.values().any(|b| !b.is_finite() || *b < 0.0) {
            return Err(GameError::Validation(format!(
                "initial balances for player {} must be non-negative",
                player_id
            )));
        }

        match self.wallets.entry(player_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(GameError::Validation(format!(
                "player {} is already registered",
                player_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(initial_balances);
                Ok(())
            }
        }
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.wallets.contains_key(player_id)
    }

    pub fn balance(&self, player_id: &str, currency: Currency) -> EngineResult<f64> {
        let wallet = self
            .wallets
            .get(player_id)
            .ok_or_else(|| GameError::NotFound(format!("player {}", player_id)))?;
        Ok(wallet.get(&currency).copied().unwrap_or(0.0))
    }

    /// Full per-currency snapshot of one wallet
    pub fn balances(&self, player_id: &str) -> EngineResult<HashMap<Currency, f64>> {
        let wallet = self
            .wallets
            .get(player_id)
            .ok_or_else(|| GameError::NotFound(format!("player {}", player_id)))?;
        Ok(wallet.clone())
    }

    /// Atomically remove `amount` from the player's balance.
    ///
    /// Fails without side effect when the balance would go negative.
    pub fn debit(&self, player_id: &str, currency: Currency, amount: f64) -> EngineResult<()> {
        validate_amount(amount)?;
        let mut wallet = self
            .wallets
            .get_mut(player_id)
            .ok_or_else(|| GameError::NotFound(format!("player {}", player_id)))?;

        let balance = wallet.entry(currency).or_insert(0.0);
        if *balance < amount {
            return Err(GameError::InsufficientFunds {
                currency,
                available: *balance,
                required: amount,
            });
        }
        *balance -= amount;
        Ok(())
    }

    /// Atomically add `amount` to the player's balance.
    pub fn credit(&self, player_id: &str, currency: Currency, amount: f64) -> EngineResult<()> {
        validate_amount(amount)?;
        let mut wallet = self
            .wallets
            .get_mut(player_id)
            .ok_or_else(|| GameError::NotFound(format!("player {}", player_id)))?;

        *wallet.entry(currency).or_insert(0.0) += amount;
        Ok(())
    }
}

fn validate_amount(amount: f64) -> EngineResult<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(GameError::Validation(format!(
            "amount must be a positive number, got {}",
            amount
        )));
    }
    Ok(())
}
