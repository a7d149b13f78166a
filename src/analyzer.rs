//! Creator reputation analyzer
//!
//! Reads the retired-mint table in ordered chunks, folds each creator's
//! token outcomes into aggregates, classifies every mint as successful or
//! not against the snipe price, and publishes the leaderboard of creators
//! worth trading on. Everything here is pure over (aggregates, settings):
//! no clock input, so a given table always produces the same board.

use crate::config::Settings;
use crate::market::state::{FinalOhlc, HistoryKey, TxCounts};
use crate::store::{StagnantRecord, Store, StoreError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Rows fetched per chunk from the retired table.
const CHUNK_SIZE: usize = 25_000;

/// Creators re-minting faster than this look like sybil batches.
const MIN_CREATION_GAP_SECS: f64 = 900.0;

/// One retired token, reduced to what scoring needs.
#[derive(Debug, Clone)]
pub struct TokenOutcome {
    pub mint_id: String,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub close_price: Decimal,
    pub peak_market_cap: f64,
    pub final_market_cap: f64,
    pub swaps: u64,
    /// Trade prices in time order, keyed by fractional seconds.
    pub price_points: Vec<(f64, Decimal)>,
}

impl TokenOutcome {
    pub fn first_trade_secs(&self) -> Option<f64> {
        self.price_points.first().map(|(ts, _)| *ts)
    }
}

/// Per-creator aggregate over their retired tokens.
#[derive(Debug, Clone, Default)]
pub struct CreatorAggregates {
    pub mint_count: usize,
    pub median_open_price: f64,
    pub median_peak_price: f64,
    pub median_current_price: f64,
    pub median_peak_market_cap: f64,
    pub median_market_cap: f64,
    /// Gaps between consecutive first-trade timestamps, sorted input.
    pub creation_delays: Vec<f64>,
    pub total_swaps: u64,
}

/// Published leaderboard entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatorScore {
    pub mint_count: usize,
    pub median_peak_market_cap: f64,
    pub median_market_cap: f64,
    pub median_open_price: f64,
    pub median_high_price: f64,
    pub performance_score: f64,
    pub trust_factor: f64,
    pub avg_success_ratio: f64,
    pub median_success_ratio: f64,
    pub success_count: usize,
    pub unsuccess_count: usize,
    pub total_swaps: u64,
}

pub type Leaderboard = HashMap<String, CreatorScore>;

/// Median of the samples: middle element for odd lengths, mean of the two
/// middle elements for even, 0 for empty.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn nonzero(values: impl IntoIterator<Item = f64>) -> Vec<f64> {
    values.into_iter().filter(|v| *v != 0.0).collect()
}

/// Recompute a creator's aggregates from their full token list.
pub fn compute_aggregates(tokens: &[TokenOutcome]) -> CreatorAggregates {
    let to_f64 = |d: Decimal| d.to_f64().unwrap_or(0.0);

    let mut first_trades: Vec<f64> = tokens
        .iter()
        .filter_map(TokenOutcome::first_trade_secs)
        .collect();
    first_trades.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let creation_delays = first_trades.windows(2).map(|w| w[1] - w[0]).collect();

    CreatorAggregates {
        mint_count: tokens.len(),
        median_open_price: median(&nonzero(tokens.iter().map(|t| to_f64(t.open_price)))),
        median_peak_price: median(&nonzero(tokens.iter().map(|t| to_f64(t.high_price)))),
        median_current_price: median(&nonzero(tokens.iter().map(|t| to_f64(t.close_price)))),
        median_peak_market_cap: median(&nonzero(tokens.iter().map(|t| t.peak_market_cap))),
        median_market_cap: median(&nonzero(tokens.iter().map(|t| t.final_market_cap))),
        creation_delays,
        total_swaps: tokens.iter().map(|t| t.swaps).sum(),
    }
}

/// Classify one token against the snipe price.
///
/// The snipe price is the trade closest to `first_trade + sniping_price_time`
/// (earliest wins a tie). Success requires the peak to clear
/// `snipe · ratio` and to occur at or past the minimum swap index; the
/// returned ratio is the percent gain from snipe to peak.
pub fn is_successful_mint(token: &TokenOutcome, cfg: &Settings) -> (bool, f64) {
    let points = &token.price_points;
    if points.is_empty() {
        return (false, 0.0);
    }

    let target = points[0].0 + cfg.sniping_price_time;
    let mut closest = 0;
    for i in 1..points.len() {
        if (points[i].0 - target).abs() < (points[closest].0 - target).abs() {
            closest = i;
        }
    }
    let snipe = points[closest].1;
    if snipe <= Decimal::ZERO {
        return (false, 0.0);
    }

    let peak = token.high_price;
    if peak < snipe * cfg.snipe_price_to_peak_price_ratio {
        return (false, 0.0);
    }

    let peak_index = match points.iter().position(|(_, p)| *p == peak) {
        Some(idx) => idx,
        None => return (false, 0.0),
    };
    if peak_index < cfg.highest_price_min_swaps {
        return (false, 0.0);
    }

    let ratio = ((peak - snipe) / snipe * Decimal::from(100))
        .to_f64()
        .unwrap_or(0.0);
    (true, ratio)
}

/// The two-tier volume/market-cap gate a creator must clear before their
/// tokens are even classified.
pub fn passes_gate(aggregates: &CreatorAggregates, cfg: &Settings) -> bool {
    (aggregates.mint_count >= 2
        && aggregates.median_peak_market_cap >= cfg.median_peak_mc_above_2_mints
        && aggregates.total_swaps >= cfg.total_swaps_above_2_mints)
        || (aggregates.mint_count >= 1
            && aggregates.median_peak_market_cap >= cfg.median_peak_mc_1_mint
            && aggregates.total_swaps >= cfg.total_swaps_1_mint)
}

#[derive(Default)]
struct CreatorEntry {
    tokens: Vec<TokenOutcome>,
    aggregates: CreatorAggregates,
}

pub struct Analyzer {
    store: Store,
    cfg: Arc<Settings>,
    seen_mints: HashSet<String>,
    creators: HashMap<String, CreatorEntry>,
}

impl Analyzer {
    pub fn new(store: Store, cfg: Arc<Settings>) -> Self {
        Self {
            store,
            cfg,
            seen_mints: HashSet::new(),
            creators: HashMap::new(),
        }
    }

    /// Scan the whole retired table in chunks, folding unseen rows into the
    /// per-creator aggregates. Safe to call repeatedly; already-processed
    /// mints are skipped, so refreshes only pay for what is new.
    pub fn analyze_market(&mut self) -> Result<(), StoreError> {
        let mut offset = 0;
        let mut loaded = 0usize;

        loop {
            let chunk = self.store.load_stagnant_chunk(CHUNK_SIZE, offset)?;
            if chunk.is_empty() {
                break;
            }
            offset += chunk.len();
            loaded += chunk.len();
            self.merge_chunk(chunk);
        }

        log::info!(
            "📊 Analyzed {} retired mints across {} creators",
            loaded,
            self.creators.len()
        );
        Ok(())
    }

    fn merge_chunk(&mut self, chunk: Vec<StagnantRecord>) {
        let mut touched = HashSet::new();

        for record in chunk {
            if self.seen_mints.contains(&record.mint_id) {
                continue;
            }
            match parse_record(&record) {
                Ok(token) => {
                    self.seen_mints.insert(record.mint_id.clone());
                    touched.insert(record.owner.clone());
                    self.creators
                        .entry(record.owner.clone())
                        .or_default()
                        .tokens
                        .push(token);
                }
                Err(e) => {
                    log::error!("Skipping undecodable retired row {}: {}", record.mint_id, e);
                }
            }
        }

        for owner in touched {
            if let Some(entry) = self.creators.get_mut(&owner) {
                entry.aggregates = compute_aggregates(&entry.tokens);
            }
        }
    }

    /// Build the leaderboard from current aggregates.
    pub fn build_leaderboard(&self) -> Leaderboard {
        let mut board = Leaderboard::new();

        for (creator, entry) in &self.creators {
            let aggregates = &entry.aggregates;
            if !passes_gate(aggregates, &self.cfg) {
                continue;
            }

            let mut success_count = 0usize;
            let mut unsuccess_count = 0usize;
            let mut success_ratios = Vec::new();
            for token in &entry.tokens {
                let (successful, ratio) = is_successful_mint(token, &self.cfg);
                if successful {
                    success_count += 1;
                    success_ratios.push(ratio);
                } else {
                    unsuccess_count += 1;
                }
            }

            let total_mints = success_count + unsuccess_count;
            if total_mints == 0 {
                continue;
            }
            let trust_factor = success_count as f64 / total_mints as f64;
            if trust_factor < self.cfg.trust_factor_ratio {
                continue;
            }

            // Unsuccessful mints plus rapid-fire re-mints is the sybil
            // batching signature; drop the creator outright.
            if unsuccess_count > 0
                && aggregates
                    .creation_delays
                    .iter()
                    .any(|delay| *delay < MIN_CREATION_GAP_SECS)
            {
                log::info!("Creator {} re-mints too quickly, excluded", creator);
                continue;
            }

            let avg_success_ratio = if success_count > 0 {
                success_ratios.iter().sum::<f64>() / success_count as f64
            } else {
                0.0
            };
            let median_success_ratio = median(&success_ratios);

            let performance_score = aggregates.mint_count as f64
                * aggregates.median_peak_market_cap
                * median_success_ratio
                / aggregates.median_open_price.max(1.0);

            board.insert(
                creator.clone(),
                CreatorScore {
                    mint_count: aggregates.mint_count,
                    median_peak_market_cap: aggregates.median_peak_market_cap,
                    median_market_cap: aggregates.median_market_cap,
                    median_open_price: aggregates.median_open_price,
                    median_high_price: aggregates.median_peak_price,
                    performance_score,
                    trust_factor,
                    avg_success_ratio,
                    median_success_ratio,
                    success_count,
                    unsuccess_count,
                    total_swaps: aggregates.total_swaps,
                },
            );
        }

        board
    }

    pub fn creator_count(&self) -> usize {
        self.creators.len()
    }
}

/// Parse one retired row's JSON blobs. A failure skips only that row.
fn parse_record(record: &StagnantRecord) -> Result<TokenOutcome, serde_json::Error> {
    let history: BTreeMap<HistoryKey, Decimal> = serde_json::from_str(&record.price_history)?;
    let counts: TxCounts = serde_json::from_str(&record.tx_counts)?;
    let ohlc: FinalOhlc = serde_json::from_str(&record.final_ohlc)?;

    let price_points = history
        .iter()
        .map(|(key, price)| (key.as_secs_f64(), *price))
        .collect();

    Ok(TokenOutcome {
        mint_id: record.mint_id.clone(),
        open_price: ohlc.open,
        high_price: ohlc.high,
        close_price: ohlc.close,
        peak_market_cap: record.peak_market_cap,
        final_market_cap: record.final_market_cap,
        swaps: counts.swaps,
        price_points,
    })
}
