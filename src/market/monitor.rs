//! Stagnancy monitor
//!
//! One task per live mint, polling its state every 5 seconds. A mint
//! retires when trading goes silent for 5 minutes, or when it sits at or
//! below the low-price floor for 30 seconds. Retirement is the one-way
//! live→retired move; a mint that vanished from the live map (someone else
//! retired it) just ends the monitor.

use crate::market::engine::MarketEngine;
use crate::market::state::MintState;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const EMPTY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Retire after this many seconds without a trade.
const NO_TRADE_RETIRE_SECS: i64 = 300;

/// Retire after this many seconds at or below the price floor.
const LOW_PRICE_RETIRE_SECS: i64 = 30;

/// Polls tolerated before giving up on a mint that never traded.
const EMPTY_HISTORY_GIVE_UP: u32 = 20;

/// 3e-8 SOL, the dust floor under which a mint is considered dead.
fn low_price_floor() -> Decimal {
    Decimal::new(30, 9)
}

#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    /// No price history yet.
    Empty,
    /// Still trading, keep watching.
    Active,
    /// Stagnant, move to the historical table.
    Retire,
}

fn evaluate(state: &MintState, now: i64) -> Verdict {
    let Some(last_trade) = state.last_trade_secs() else {
        return Verdict::Empty;
    };

    if now - last_trade > NO_TRADE_RETIRE_SECS {
        return Verdict::Retire;
    }
    if state.current_price <= low_price_floor() && now - last_trade >= LOW_PRICE_RETIRE_SECS {
        return Verdict::Retire;
    }

    Verdict::Active
}

pub async fn run(engine: Arc<MarketEngine>, mint: String, cancel: CancellationToken) {
    let mut empty_polls = 0u32;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(handle) = engine.get(&mint) else {
            break;
        };

        let now = chrono::Utc::now().timestamp();
        let verdict = {
            let state = handle.lock().await;
            evaluate(&state, now)
        };

        match verdict {
            Verdict::Empty => {
                empty_polls += 1;
                if empty_polls >= EMPTY_HISTORY_GIVE_UP {
                    log::info!("No price history for {}, monitor giving up", mint);
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(EMPTY_POLL_INTERVAL) => {}
                }
            }
            Verdict::Active => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(POLL_INTERVAL) => {}
                }
            }
            Verdict::Retire => {
                let sol_usd = engine.sol_price().get().await;
                let record = {
                    let state = handle.lock().await;
                    state.to_stagnant_record(sol_usd)
                };

                match record {
                    Ok(record) => match engine.store().move_to_stagnant(&record) {
                        Ok(()) => {
                            engine.remove(&mint);
                            log::info!(
                                "📦 Retired {} (peak change {:.2}%, final mc {:.2}$)",
                                mint,
                                record.peak_price_change,
                                record.final_market_cap
                            );
                            break;
                        }
                        Err(e) => {
                            log::error!("❌ Retirement of {} failed, will retry: {}", mint, e);
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = sleep(POLL_INTERVAL) => {}
                            }
                        }
                    },
                    Err(e) => {
                        log::error!("❌ Could not serialize retired record for {}: {}", mint, e);
                        break;
                    }
                }
            }
        }
    }

    engine.monitor_finished(&mint);
}
