//! Crashcore demo loop.
//!
//! Boots the round engine against the in-memory store with a static price
//! feed, subscribes to the event stream, and plays a scripted player that
//! bets at round start and cashes out once the multiplier clears a target.

use clap::Parser;
use crashcore::{
    events::GameEvent, BroadcastPublisher, CachingPriceOracle, ConfigLoader, Currency, GameError,
    MemoryRoundStore, RoundEngine, StaticPriceOracle, WalletLedger,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "crashcore", about = "Crash-game round engine demo")]
struct Args {
    /// Optional TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many crashed rounds
    #[arg(long, default_value_t = 3)]
    rounds: u64,

    /// Demo player cashes out once the multiplier reaches this value
    #[arg(long, default_value_t = 1.5)]
    cashout_at: f64,

    /// USD amount the demo player bets each round
    #[arg(long, default_value_t = 50.0)]
    bet_usd: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;

    let store = Arc::new(MemoryRoundStore::new());
    let wallet = Arc::new(WalletLedger::new());
    let oracle = Arc::new(CachingPriceOracle::new(
        Arc::new(StaticPriceOracle::with_default_prices()),
        Duration::from_millis(config.oracle.cache_ttl_ms),
        config.oracle.fallback_prices.clone(),
    ));
    let publisher = Arc::new(BroadcastPublisher::new(1024));

    let player = "demo_player";
    wallet.register_player(player, config.wallet.initial_balances.clone())?;
    info!(player, balances = ?wallet.balances(player)?, "registered demo player");

    let mut events = publisher.subscribe();
    let engine = RoundEngine::spawn(
        config.engine.clone(),
        store,
        wallet.clone(),
        oracle,
        publisher,
    );

    let mut crashes_seen = 0u64;
    let mut cashed_out_this_round = false;

    while crashes_seen < args.rounds {
        match events.recv().await {
            Ok(GameEvent::RoundStart {
                round_number,
                crash_point_hash,
                ..
            }) => {
                info!(round = round_number, commit = %crash_point_hash, "round started");
                cashed_out_this_round = false;
                match engine.place_bet(player, Currency::Btc, args.bet_usd).await {
                    Ok(receipt) => {
                        info!(
                            round = round_number,
                            crypto = receipt.crypto_amount,
                            price = receipt.price_at_time,
                            "bet placed"
                        );
                    }
                    Err(err) => warn!(round = round_number, error = %err, "bet rejected"),
                }
            }
            Ok(GameEvent::MultiplierUpdate { multiplier }) => {
                if multiplier >= args.cashout_at && !cashed_out_this_round {
                    match engine.cashout(player).await {
                        Ok(receipt) => {
                            cashed_out_this_round = true;
                            info!(
                                at = receipt.at_multiplier,
                                payout_crypto = receipt.payout_crypto,
                                payout_usd = receipt.payout_usd,
                                "cashed out"
                            );
                        }
                        Err(GameError::AlreadyCrashed { .. }) => {
                            cashed_out_this_round = true;
                        }
                        Err(err) => warn!(error = %err, "cashout rejected"),
                    }
                }
            }
            Ok(GameEvent::RoundCrash {
                round_number,
                final_multiplier,
            }) => {
                crashes_seen += 1;
                info!(round = round_number, final_multiplier, "round crashed");
            }
            Ok(GameEvent::PlayerCashout { .. }) => {}
            Err(err) => {
                warn!(error = %err, "event stream interrupted");
                break;
            }
        }
    }

    let history = engine.round_history(args.rounds as usize).await?;
    for summary in &history {
        info!(
            round = summary.round_number,
            crash_point = summary.crash_point,
            bets = summary.total_bets,
            cashouts = summary.total_cashouts,
            "round summary"
        );
    }
    info!(balances = ?wallet.balances(player)?, "final demo balances");

    engine.shutdown().await;
    Ok(())
}
