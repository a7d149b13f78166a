//! Trading session state machine
//!
//! One session per mint, started when the creator is on the leaderboard.
//! The machine buys exactly once, then ticks every 10ms: it walks a profit
//! ladder upward while momentum holds, watches for malicious drawdown, buy
//! drought, and stagnation, and ends the session on the first sell.
//! Condition priority is `malicious > drop-time > sells>buys > safe`.

use crate::analyzer::CreatorScore;
use crate::blacklist::Blacklist;
use crate::config::Settings;
use crate::executor::{
    lamports_to_tokens, priority_fee_lamports, usd_to_lamports, usd_to_microlamports, BuyRequest,
    ReceiptStatus, SellRequest, SwapExecutor, SwapKind, SwapOutcome,
};
use crate::market::state::TradeSide;
use crate::market::MarketEngine;
use crate::reports::Reports;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const TICK: Duration = Duration::from_millis(10);
const ROLLING_WINDOW_SECS: f64 = 5.0;
const STAGNANT_EXIT_SECS: f64 = 1800.0;
const SELL_RETRY_DELAY: Duration = Duration::from_millis(20);
const BUY_DISCOVERY_RETRIES: u32 = 10;
const BUY_DISCOVERY_DELAY: Duration = Duration::from_millis(500);
const COMPUTE_UNITS: u64 = 50_000;

/// 3e-8 SOL, same dust floor the stagnancy monitor uses.
fn price_floor() -> Decimal {
    Decimal::new(30, 9)
}

/// Why a session sold (or why it is about to).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Safe,
    Malicious,
    DropTime,
    SellsOverBuys,
    Stagnant,
}

impl ExitReason {
    pub fn label(&self) -> &'static str {
        match self {
            ExitReason::Safe => "safe",
            ExitReason::Malicious => "malicious",
            ExitReason::DropTime => "drop-time",
            ExitReason::SellsOverBuys => "sells>buys",
            ExitReason::Stagnant => "stagnant",
        }
    }

    /// Reasons that put the creator on the blacklist.
    pub fn blacklists(&self) -> bool {
        matches!(self, ExitReason::Malicious | ExitReason::SellsOverBuys)
    }
}

/// Trust level 2 only for creators with a serious median peak market cap;
/// single-mint creators stay at level 1 regardless.
pub fn trust_level(creator: &CreatorScore) -> u8 {
    if creator.mint_count == 1 {
        1
    } else if creator.median_peak_market_cap >= 50_000.0 {
        2
    } else {
        1
    }
}

/// Profit targets in percent: `step, 2·step, …` capped at `max_target`.
/// Always at least one rung.
pub fn build_increments(step: Decimal, max_target: Decimal) -> Vec<Decimal> {
    let mut increments = vec![step];
    let mut value = step + step;
    while value <= max_target {
        increments.push(value);
        value += step;
    }
    increments
}

/// Clamp the ladder to what remains of the creator's profit range after the
/// open→buy drift consumed part of it. An empty result collapses to the
/// single base rung.
pub fn tighten_increments(
    increments: &[Decimal],
    step: Decimal,
    profit_range: Decimal,
    drift_pct: Decimal,
) -> Vec<Decimal> {
    if increments.len() <= 1 || drift_pct <= Decimal::ZERO {
        return increments.to_vec();
    }
    let personal_range = (profit_range - drift_pct).max(Decimal::ZERO);
    let personal_factor = personal_range / drift_pct;
    let kept: Vec<Decimal> = increments
        .iter()
        .copied()
        .filter(|inc| *inc <= personal_factor * Decimal::from(100))
        .collect();
    if kept.is_empty() {
        vec![step]
    } else {
        kept
    }
}

#[derive(Debug, Clone)]
struct Sample {
    at: DateTime<Utc>,
    price: Decimal,
    swaps: u64,
}

fn secs_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

/// Weighted blend of price trend and transaction momentum over the rolling
/// window, clamped to [0, 100].
fn compute_composite(window: &VecDeque<Sample>, trend_weight: f64, momentum_weight: f64) -> f64 {
    let (Some(first), Some(last)) = (window.front(), window.back()) else {
        return 0.0;
    };
    if window.len() < 2 {
        return 0.0;
    }
    let dt = secs_between(first.at, last.at);
    if dt == 0.0 {
        return 0.0;
    }

    let price_change_pct = if first.price > Decimal::ZERO {
        ((last.price - first.price) / first.price * Decimal::from(100))
            .to_f64()
            .unwrap_or(0.0)
    } else {
        0.0
    };
    let tx_momentum = (last.swaps.saturating_sub(first.swaps)) as f64 / dt * 10.0;

    (trend_weight * price_change_pct + momentum_weight * tx_momentum).clamp(0.0, 100.0)
}

fn pct_change(base: Decimal, value: Decimal) -> Decimal {
    if base > Decimal::ZERO && value > Decimal::ZERO {
        (value - base) / base * Decimal::from(100)
    } else {
        Decimal::ZERO
    }
}

enum BuyAttempt {
    Submitted(String),
    Abort(&'static str),
}

pub struct Session {
    pub mint: String,
    pub name: String,
    pub bonding_curve: String,
    pub owner: String,
    pub creator: CreatorScore,
    pub cfg: Arc<Settings>,
    pub engine: Arc<MarketEngine>,
    pub executor: Arc<dyn SwapExecutor>,
    pub blacklist: Arc<Blacklist>,
    pub reports: Arc<Reports>,
    pub wallet_lamports: Arc<Mutex<u64>>,
    pub open_positions: Arc<AtomicUsize>,
    pub active_sessions: Arc<StdMutex<HashSet<String>>>,
    pub cancel: CancellationToken,
}

impl Session {
    pub async fn run(self) {
        let level = trust_level(&self.creator);
        log::info!(
            "🎯 Session started for {} (creator {}, trust level {})",
            self.mint,
            self.owner,
            level
        );

        let Some(handle) = self.engine.get(&self.mint) else {
            log::warn!("No market state for {}, ending session", self.mint);
            self.finish(false);
            return;
        };

        let profit_range = Decimal::from_f64(self.creator.median_success_ratio)
            .unwrap_or_default()
            .round_dp(2);
        let max_target = profit_range * self.cfg.profit_margin;
        let mut increments = build_increments(self.cfg.price_step_units, max_target);
        let mut current_target_step = 0usize;

        let mut bought = false;
        let mut holding = false;
        let mut buy_tx_id = String::new();
        let mut buy_price = Decimal::ZERO;
        let mut token_balance_raw = 0u64;
        let mut discovery_done = false;
        let mut buy_retry = 0u32;
        let mut ladder_adjusted = false;

        let mut last_price: Option<Decimal> = None;
        let mut last_price_change = Utc::now();
        let mut ref_peak: Option<Decimal> = None;
        let mut last_buys_count = 0u64;
        let mut last_buys_at = Utc::now();
        let mut last_increment_at: Option<DateTime<Utc>> = None;
        let mut window: VecDeque<Sample> = VecDeque::new();

        loop {
            if self.cancel.is_cancelled() {
                log::info!("Session for {} cancelled", self.mint);
                break;
            }

            // Snapshot the market state for this tick.
            let (price, open_price, peak_price, swaps, buys, sells, ledger_position) = {
                let state = handle.lock().await;
                let position = state.holders.get(&self.cfg.wallet_address).and_then(|h| {
                    h.balance_changes
                        .iter()
                        .find(|change| change.kind == TradeSide::Buy)
                        .map(|change| (h.balance, change.price_was))
                });
                (
                    state.current_price,
                    state.open_price,
                    state.high_price,
                    state.tx_counts.swaps,
                    state.tx_counts.buys,
                    state.tx_counts.sells,
                    position,
                )
            };

            // Nothing traded yet; wait for the first swap to price the buy.
            if !bought && price <= Decimal::ZERO {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = sleep(TICK) => {}
                }
                continue;
            }

            if !bought {
                match self.try_buy(price, level).await {
                    BuyAttempt::Submitted(tx_id) => {
                        bought = true;
                        holding = true;
                        buy_tx_id = tx_id;
                        self.open_positions.fetch_add(1, Ordering::SeqCst);
                        continue;
                    }
                    BuyAttempt::Abort(reason) => {
                        log::info!("Ending session for {}: {}", self.mint, reason);
                        break;
                    }
                }
            }

            // Discover our own fill from the holder ledger; fall back to the
            // transaction receipt once the retries run out.
            if !discovery_done {
                if let Some((balance, price_was)) = ledger_position {
                    if balance > Decimal::ZERO && price_was > Decimal::ZERO {
                        token_balance_raw = (balance * Decimal::from(1_000_000u64))
                            .to_u64()
                            .unwrap_or(0);
                        buy_price = price_was;
                    }
                }

                if token_balance_raw == 0 || buy_price <= Decimal::ZERO {
                    buy_retry += 1;
                    if buy_retry > BUY_DISCOVERY_RETRIES {
                        log::info!("Falling back to receipt lookup for {}", self.mint);
                        match self
                            .executor
                            .swap_receipt(&buy_tx_id, &self.mint, SwapKind::Buy)
                            .await
                        {
                            Ok(ReceiptStatus::Filled(receipt))
                                if receipt.balance > 0 && receipt.price > Decimal::ZERO =>
                            {
                                token_balance_raw = receipt.balance;
                                buy_price = receipt.price;
                            }
                            other => {
                                log::warn!(
                                    "⚠️  Buy could not be confirmed for {} ({:?}), ending session",
                                    self.mint,
                                    other.as_ref().map(|_| "no fill").unwrap_or("error")
                                );
                                break;
                            }
                        }
                    } else {
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            _ = sleep(BUY_DISCOVERY_DELAY) => {}
                        }
                        continue;
                    }
                }
                discovery_done = true;
            }

            let self_peak_change = pct_change(buy_price, peak_price);
            let peak_change = pct_change(open_price, peak_price);
            let now = Utc::now();

            // Reference peak for the malicious-drawdown detector.
            if ref_peak.map_or(true, |r| peak_price > r) {
                ref_peak = Some(peak_price);
            }
            let malicious = ref_peak.map_or(false, |r| price < r * Decimal::new(5, 1));

            if buys > last_buys_count {
                last_buys_count = buys;
                last_buys_at = now;
            }
            let is_drop_time = secs_between(last_buys_at, now) >= self.cfg.drop_time_secs;

            let condition = if malicious {
                ExitReason::Malicious
            } else if is_drop_time {
                ExitReason::DropTime
            } else if sells > buys {
                ExitReason::SellsOverBuys
            } else {
                ExitReason::Safe
            };

            // One-time ladder tightening once the open→buy drift is known.
            if !ladder_adjusted {
                if open_price > Decimal::ZERO && buy_price > open_price {
                    let drift = pct_change(open_price, buy_price);
                    increments = tighten_increments(
                        &increments,
                        self.cfg.price_step_units,
                        profit_range,
                        drift,
                    );
                    current_target_step = current_target_step.min(increments.len() - 1);
                }
                ladder_adjusted = true;
            }

            while let Some(front) = window.front() {
                if secs_between(front.at, now) >= ROLLING_WINDOW_SECS {
                    window.pop_front();
                } else {
                    break;
                }
            }
            window.push_back(Sample { at: now, price, swaps });
            let composite = compute_composite(
                &window,
                self.cfg.price_trend_weight.to_f64().unwrap_or(0.0),
                self.cfg.tx_momentum_weight.to_f64().unwrap_or(0.0),
            );

            match condition {
                ExitReason::Malicious | ExitReason::DropTime => current_target_step = 0,
                ExitReason::SellsOverBuys => {
                    if composite < self.cfg.decrement_threshold.to_f64().unwrap_or(0.0) {
                        current_target_step = 0;
                    }
                }
                _ => {
                    if current_target_step < increments.len() - 1 {
                        let current_incr = increments[current_target_step];
                        let next_incr = increments[current_target_step + 1];
                        let threshold = current_incr + (next_incr - current_incr) * Decimal::new(5, 1);
                        let cooled_down = last_increment_at.map_or(true, |at| {
                            secs_between(at, now) > self.cfg.increment_cooldown_secs
                        });
                        if composite > self.cfg.increment_threshold.to_f64().unwrap_or(100.0)
                            && self_peak_change >= threshold
                            && cooled_down
                        {
                            current_target_step += 1;
                            last_increment_at = Some(now);
                        }
                    }
                }
            }
            current_target_step = current_target_step.min(increments.len() - 1);
            let to_sell = increments[current_target_step];

            if self_peak_change >= to_sell || malicious || is_drop_time {
                log::info!(
                    "💰 Selling {} at {:.2}% (target {}%, condition {}, peak change {:.2}%)",
                    self.mint,
                    self_peak_change,
                    to_sell,
                    condition.label(),
                    peak_change
                );
                self.sell(token_balance_raw, condition, buy_price).await;
                break;
            }

            if last_price.map_or(true, |p| p != price) {
                last_price = Some(price);
                last_price_change = now;
                log::debug!(
                    "[{}] price {} target {}% composite {:.2} condition {} b/s {}/{}",
                    self.name,
                    price,
                    to_sell,
                    composite,
                    condition.label(),
                    buys,
                    sells
                );
            }
            let since_change = secs_between(last_price_change, now);

            if since_change > STAGNANT_EXIT_SECS {
                log::info!("{} stagnant for 30m, exiting", self.mint);
                self.sell(token_balance_raw, ExitReason::Stagnant, buy_price).await;
                break;
            }
            if price < price_floor() && since_change > self.cfg.stagnant_under_price_secs {
                log::info!("{} dead under the price floor, exiting", self.mint);
                self.sell(token_balance_raw, ExitReason::Malicious, buy_price).await;
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::info!("Session for {} cancelled", self.mint);
                    break;
                }
                _ = sleep(TICK) => {}
            }
        }

        self.finish(holding);
        log::info!("Session ended for {}", self.mint);
    }

    async fn try_buy(&self, price: Decimal, level: u8) -> BuyAttempt {
        let sol_usd = self.engine.sol_price().get().await;
        let amount_usd = if level == 1 {
            self.cfg.amount_buy_tl_1
        } else {
            self.cfg.amount_buy_tl_2
        };
        let lamports = usd_to_lamports(amount_usd, sol_usd);

        {
            let wallet = self.wallet_lamports.lock().await;
            if *wallet <= lamports {
                log::warn!(
                    "⚠️  Insufficient balance for {} ({} <= {})",
                    self.mint,
                    wallet,
                    lamports
                );
                return BuyAttempt::Abort("insufficient balance");
            }
        }

        let token_amount = lamports_to_tokens(lamports, price);
        let fee = usd_to_microlamports(self.cfg.buy_fee_usd, sol_usd, COMPUTE_UNITS);

        let request = BuyRequest {
            mint: self.mint.clone(),
            bonding_curve: self.bonding_curve.clone(),
            creator: self.owner.clone(),
            lamports,
            token_amount,
            fee_micro_lamports: fee,
            slippage: self.cfg.slippage_amount,
        };

        match self.executor.buy(&request).await {
            Ok(SwapOutcome::Submitted(tx_id)) => {
                {
                    let mut wallet = self.wallet_lamports.lock().await;
                    *wallet = wallet
                        .saturating_sub(lamports + priority_fee_lamports(fee, COMPUTE_UNITS));
                }
                log::info!(
                    "🛒 Buy submitted for {} at {} (trust level {})",
                    self.mint,
                    price,
                    level
                );
                self.reports.record_buy(&self.mint, &self.owner, price, level);
                BuyAttempt::Submitted(tx_id)
            }
            Ok(SwapOutcome::Migrated) => BuyAttempt::Abort("migrated"),
            Ok(SwapOutcome::PriceTooHigh) => BuyAttempt::Abort("PriceTooHigh"),
            Err(e) => {
                log::error!("❌ Buy failed for {}: {}", self.mint, e);
                BuyAttempt::Abort("buy error")
            }
        }
    }

    async fn sell(&self, token_amount: u64, reason: ExitReason, buy_price: Decimal) {
        loop {
            let sol_usd = self.engine.sol_price().get().await;
            let fee = usd_to_microlamports(self.cfg.sell_fee_usd, sol_usd, COMPUTE_UNITS);

            let request = SellRequest {
                mint: self.mint.clone(),
                bonding_curve: self.bonding_curve.clone(),
                creator: self.owner.clone(),
                token_amount,
                min_sol_output: 0,
                fee_micro_lamports: fee,
            };

            let tx_id = match self.executor.sell(&request).await {
                Ok(SwapOutcome::Submitted(tx_id)) => tx_id,
                Ok(SwapOutcome::Migrated) => {
                    log::info!("Bonding curve migrated for {}, ending session", self.mint);
                    return;
                }
                Ok(SwapOutcome::PriceTooHigh) | Err(_) => {
                    log::error!("❌ Sell submission failed for {}", self.mint);
                    return;
                }
            };

            match self
                .executor
                .swap_receipt(&tx_id, &self.mint, SwapKind::Sell)
                .await
            {
                Ok(ReceiptStatus::InstructionError) => {
                    // We have to get out; wait a moment and try again.
                    sleep(SELL_RETRY_DELAY).await;
                    continue;
                }
                Ok(ReceiptStatus::Filled(receipt)) => {
                    let profit = pct_change(buy_price, receipt.price)
                        .to_f64()
                        .unwrap_or(0.0);
                    log::info!(
                        "✅ Sold {} of {} with profit {:.4}% ({})",
                        token_amount,
                        self.mint,
                        profit,
                        reason.label()
                    );
                    if receipt.balance > 0 {
                        *self.wallet_lamports.lock().await = receipt.balance;
                    }
                    self.reports
                        .record_sell(&self.mint, &self.owner, profit, reason.label());

                    if reason.blacklists() {
                        if let Err(e) = self.blacklist.add(&self.owner).await {
                            log::error!("❌ Failed to persist blacklist entry: {}", e);
                        }
                    } else {
                        log::info!("Creator {} exits clean ({})", self.owner, reason.label());
                    }

                    if receipt.balance == 0 || receipt.price == Decimal::ZERO {
                        log::warn!(
                            "⚠️  Sell for {} reported empty fill, check the priority fee",
                            self.mint
                        );
                    }
                    return;
                }
                Ok(ReceiptStatus::NotFound) => {
                    log::warn!("⚠️  Sell receipt not found for {}", self.mint);
                    return;
                }
                Err(e) => {
                    log::error!("❌ Sell receipt lookup failed for {}: {}", self.mint, e);
                    return;
                }
            }
        }
    }

    fn finish(&self, held_position: bool) {
        if held_position {
            self.open_positions.fetch_sub(1, Ordering::SeqCst);
        }
        self.active_sessions.lock().unwrap().remove(&self.mint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CreationEvent, SwapEvent};
    use crate::executor::PaperExecutor;
    use crate::quote::SolPrice;
    use crate::store::Store;
    use std::time::Duration as StdDuration;

    #[test]
    fn test_build_increments() {
        let step = Decimal::from(10);
        assert_eq!(
            build_increments(step, Decimal::from(45)),
            vec![
                Decimal::from(10),
                Decimal::from(20),
                Decimal::from(30),
                Decimal::from(40)
            ]
        );
        // Ceiling below the step still yields the base rung.
        assert_eq!(build_increments(step, Decimal::from(5)), vec![Decimal::from(10)]);
    }

    #[test]
    fn test_ladder_step_never_exceeds_bounds() {
        let increments = build_increments(Decimal::from(10), Decimal::from(100));
        let mut step = 0usize;
        for _ in 0..50 {
            if step < increments.len() - 1 {
                step += 1;
            }
            step = step.min(increments.len() - 1);
            assert!(step <= increments.len() - 1);
        }
        // Reset is the only way down.
        step = 0;
        assert_eq!(increments[step], Decimal::from(10));
    }

    #[test]
    fn test_tighten_increments() {
        let increments = build_increments(Decimal::from(10), Decimal::from(80));

        // Drift 60% of an 80% range leaves a 20% personal range: factor
        // 0.333 → keep rungs up to 33%.
        let tightened = tighten_increments(
            &increments,
            Decimal::from(10),
            Decimal::from(80),
            Decimal::from(60),
        );
        assert_eq!(
            tightened,
            vec![Decimal::from(10), Decimal::from(20), Decimal::from(30)]
        );

        // Drift beyond the whole range collapses to the base rung.
        let collapsed = tighten_increments(
            &increments,
            Decimal::from(10),
            Decimal::from(80),
            Decimal::from(500),
        );
        assert_eq!(collapsed, vec![Decimal::from(10)]);

        // No drift, no change.
        assert_eq!(
            tighten_increments(&increments, Decimal::from(10), Decimal::from(80), Decimal::ZERO),
            increments
        );
    }

    #[test]
    fn test_trust_levels() {
        let mut creator = CreatorScore {
            mint_count: 1,
            median_peak_market_cap: 90_000.0,
            median_market_cap: 0.0,
            median_open_price: 0.0,
            median_high_price: 0.0,
            performance_score: 0.0,
            trust_factor: 1.0,
            avg_success_ratio: 0.0,
            median_success_ratio: 0.0,
            success_count: 1,
            unsuccess_count: 0,
            total_swaps: 10,
        };
        // A single mint is never trusted above level 1.
        assert_eq!(trust_level(&creator), 1);

        creator.mint_count = 3;
        assert_eq!(trust_level(&creator), 2);

        creator.median_peak_market_cap = 10_000.0;
        assert_eq!(trust_level(&creator), 1);
    }

    #[test]
    fn test_composite_is_clamped() {
        let t0 = Utc::now();
        let mut window = VecDeque::new();
        window.push_back(Sample {
            at: t0,
            price: Decimal::from(100),
            swaps: 0,
        });
        window.push_back(Sample {
            at: t0 + chrono::Duration::seconds(5),
            price: Decimal::from(1_000),
            swaps: 500,
        });
        // Massive trend and momentum saturate at 100.
        assert_eq!(compute_composite(&window, 0.6, 0.4), 100.0);

        // Falling price and no swaps floors at 0.
        let mut falling = VecDeque::new();
        falling.push_back(Sample {
            at: t0,
            price: Decimal::from(100),
            swaps: 10,
        });
        falling.push_back(Sample {
            at: t0 + chrono::Duration::seconds(5),
            price: Decimal::from(50),
            swaps: 10,
        });
        assert_eq!(compute_composite(&falling, 0.6, 0.4), 0.0);

        // Fewer than two samples scores zero.
        let mut single = VecDeque::new();
        single.push_back(Sample {
            at: t0,
            price: Decimal::from(100),
            swaps: 10,
        });
        assert_eq!(compute_composite(&single, 0.6, 0.4), 0.0);
    }

    #[test]
    fn test_composite_moderate_momentum() {
        let t0 = Utc::now();
        let mut window = VecDeque::new();
        window.push_back(Sample {
            at: t0,
            price: Decimal::from(100),
            swaps: 10,
        });
        window.push_back(Sample {
            at: t0 + chrono::Duration::seconds(5),
            price: Decimal::from(110),
            swaps: 20,
        });
        // 10% trend * 0.6 + (10 swaps / 5s * 10) * 0.4 = 6 + 8 = 14.
        let score = compute_composite(&window, 0.6, 0.4);
        assert!((score - 14.0).abs() < 1e-6);
    }

    #[test]
    fn test_exit_reason_classification() {
        assert!(ExitReason::Malicious.blacklists());
        assert!(ExitReason::SellsOverBuys.blacklists());
        assert!(!ExitReason::Safe.blacklists());
        assert!(!ExitReason::Stagnant.blacklists());
        assert!(!ExitReason::DropTime.blacklists());
        assert_eq!(ExitReason::DropTime.label(), "drop-time");
    }

    // End-to-end session harness around the paper executor.

    struct Harness {
        engine: Arc<MarketEngine>,
        cfg: Arc<Settings>,
        executor: Arc<PaperExecutor>,
        blacklist: Arc<Blacklist>,
        reports: Arc<Reports>,
        dir: tempfile::TempDir,
    }

    async fn harness(mut cfg: Settings) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        cfg.results_path = dir
            .path()
            .join("results.txt")
            .to_string_lossy()
            .into_owned();
        cfg.blacklist_path = dir
            .path()
            .join("blacklist.txt")
            .to_string_lossy()
            .into_owned();

        let store = Store::open(dir.path().join("s.db")).unwrap();
        let sol = SolPrice::new(cfg.sol_price_fallback);
        let engine = MarketEngine::new(store, sol, CancellationToken::new());
        let executor = Arc::new(PaperExecutor::new(engine.clone(), 10_000_000_000));
        let blacklist = Arc::new(Blacklist::load(&cfg.blacklist_path));
        let reports = Arc::new(Reports::new(&cfg.results_path, dir.path().join("lb.txt")));

        engine
            .on_creation(
                "sig",
                &CreationEvent {
                    name: "Token".to_string(),
                    symbol: "TK".to_string(),
                    uri: String::new(),
                    mint: "M1".to_string(),
                    bonding_curve: "curve".to_string(),
                    user: "creator".to_string(),
                },
            )
            .await
            .unwrap();

        Harness {
            engine,
            cfg: Arc::new(cfg),
            executor,
            blacklist,
            reports,
            dir,
        }
    }

    async fn apply_price(h: &Harness, user: &str, price_units: u64, ts: i64) {
        // With one token in reserve, the price in SOL equals price_units.
        h.engine
            .on_swap(
                "s",
                &SwapEvent {
                    mint: "M1".to_string(),
                    sol_amount: 1,
                    token_amount: 2_000_000_000,
                    is_buy: true,
                    user: user.to_string(),
                    timestamp: ts,
                    virtual_sol_reserves: price_units * 1_000_000_000,
                    virtual_token_reserves: 1_000_000,
                },
            )
            .await
            .unwrap();
    }

    fn session(h: &Harness, creator: CreatorScore) -> Session {
        Session {
            mint: "M1".to_string(),
            name: "Token".to_string(),
            bonding_curve: "curve".to_string(),
            owner: "creator".to_string(),
            creator,
            cfg: h.cfg.clone(),
            engine: h.engine.clone(),
            executor: h.executor.clone(),
            blacklist: h.blacklist.clone(),
            reports: h.reports.clone(),
            wallet_lamports: Arc::new(Mutex::new(10_000_000_000)),
            open_positions: Arc::new(AtomicUsize::new(0)),
            active_sessions: Arc::new(StdMutex::new(HashSet::from(["M1".to_string()]))),
            cancel: CancellationToken::new(),
        }
    }

    fn creator_score() -> CreatorScore {
        CreatorScore {
            mint_count: 2,
            median_peak_market_cap: 60_000.0,
            median_market_cap: 10_000.0,
            median_open_price: 1e-8,
            median_high_price: 5e-8,
            performance_score: 100.0,
            trust_factor: 1.0,
            avg_success_ratio: 60.0,
            median_success_ratio: 60.0,
            success_count: 2,
            unsuccess_count: 0,
            total_swaps: 50,
        }
    }

    #[tokio::test]
    async fn test_profit_take_exits_safe() {
        let mut cfg = Settings::test_defaults();
        cfg.price_step_units = Decimal::from(40);
        let h = harness(cfg).await;

        // Open at 100, our wallet buys at 100, peak reaches 141:
        // self peak change 41% >= the 40% rung.
        apply_price(&h, "someone", 100, 1_000).await;
        apply_price(&h, "test-wallet", 100, 1_001).await;
        apply_price(&h, "someone", 141, 1_002).await;

        let open_positions = Arc::new(AtomicUsize::new(0));
        let mut s = session(&h, creator_score());
        s.open_positions = open_positions.clone();

        tokio::time::timeout(StdDuration::from_secs(10), s.run())
            .await
            .expect("session should finish");

        let results = std::fs::read_to_string(h.dir.path().join("results.txt")).unwrap();
        assert!(results.contains("\"type\":\"buy\""));
        assert!(results.contains("\"reason\":\"safe\""));
        assert!(!h.blacklist.contains("creator").await);
        assert_eq!(open_positions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malicious_drawdown_blacklists_creator() {
        let h = harness(Settings::test_defaults()).await;

        // Buy around 100, peak 120, then collapse to 50 (< half the peak).
        apply_price(&h, "someone", 100, 1_000).await;
        apply_price(&h, "test-wallet", 100, 1_001).await;
        apply_price(&h, "someone", 120, 1_002).await;
        apply_price(&h, "someone", 50, 1_003).await;

        let s = session(&h, creator_score());
        tokio::time::timeout(StdDuration::from_secs(10), s.run())
            .await
            .expect("session should finish");

        let results = std::fs::read_to_string(h.dir.path().join("results.txt")).unwrap();
        assert!(results.contains("\"reason\":\"malicious\""));
        assert!(h.blacklist.contains("creator").await);
    }
}
