//! In-memory state of a live mint
//!
//! `MintState` is the canonical record the session controller reads and the
//! store mirrors. All mutation goes through `apply_swap`, which the engine
//! calls under the per-mint lock, so every field update here can assume
//! exclusive access.

use crate::config::TOTAL_SUPPLY;
use crate::events::{CreationEvent, SwapEvent};
use crate::store::StagnantRecord;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

/// Price-history key: integer second plus a 3-digit disambiguation counter.
///
/// Two swaps landing in the same second get consecutive counters, so keys
/// are unique and strictly increasing in `(secs, seq)` order. Rendered as
/// `"{secs}.{seq:03}"`, which doubles as a fractional timestamp when parsed
/// back as a float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HistoryKey {
    pub secs: i64,
    pub seq: u16,
}

impl std::fmt::Display for HistoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:03}", self.secs, self.seq)
    }
}

#[derive(Debug)]
pub struct InvalidHistoryKey(String);

impl std::fmt::Display for InvalidHistoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid history key: {}", self.0)
    }
}

impl std::error::Error for InvalidHistoryKey {}

impl FromStr for HistoryKey {
    type Err = InvalidHistoryKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (secs, seq) = s.split_once('.').ok_or_else(|| InvalidHistoryKey(s.to_string()))?;
        Ok(Self {
            secs: secs.parse().map_err(|_| InvalidHistoryKey(s.to_string()))?,
            seq: seq.parse().map_err(|_| InvalidHistoryKey(s.to_string()))?,
        })
    }
}

impl HistoryKey {
    /// The key as a fractional second, the form the analyzer sorts by.
    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.seq as f64 / 1000.0
    }
}

impl Serialize for HistoryKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HistoryKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Transaction counters; `swaps == buys + sells` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxCounts {
    pub swaps: u64,
    pub buys: u64,
    pub sells: u64,
}

/// One entry in a holder's balance-change log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceChange {
    #[serde(rename = "type")]
    pub kind: TradeSide,
    /// Price *before* this swap applied.
    pub price_was: Decimal,
    pub amount: Decimal,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Holder {
    pub balance: Decimal,
    pub balance_changes: Vec<BalanceChange>,
}

/// Counter snapshots taken while the mint age was inside each bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeBuckets {
    #[serde(rename = "30sec")]
    pub sec30: TxCounts,
    #[serde(rename = "1min")]
    pub min1: TxCounts,
    #[serde(rename = "2min")]
    pub min2: TxCounts,
    #[serde(rename = "5min")]
    pub min5: TxCounts,
}

/// Serde for the uninitialized-low sentinel: `None` ⇔ `"Infinity"`.
pub mod low_price_serde {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(value: &Option<Decimal>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => Serialize::serialize(d, serializer),
            None => serializer.serialize_str("Infinity"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Decimal>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == "Infinity" {
            return Ok(None);
        }
        Decimal::from_str(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

/// Final OHLC snapshot persisted with a retired mint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalOhlc {
    pub open: Decimal,
    pub high: Decimal,
    #[serde(with = "low_price_serde")]
    pub low: Option<Decimal>,
    pub close: Decimal,
}

/// Canonical live record of one mint.
#[derive(Debug, Clone)]
pub struct MintState {
    pub mint_id: String,
    pub name: String,
    pub symbol: String,
    pub owner: String,
    pub mint_sig: String,
    pub bonding_curve: String,
    /// Unix second the creation event was processed.
    pub created: i64,

    /// First non-zero observed price; never reassigned once set.
    pub open_price: Decimal,
    pub high_price: Decimal,
    /// `None` until the first swap (the `Infinity` sentinel in blobs).
    pub low_price: Option<Decimal>,
    pub current_price: Decimal,

    pub market_cap: Decimal,
    pub price_usd: Decimal,
    pub liquidity: Decimal,
    /// Seconds between the first swap's chain timestamp and our clock,
    /// set once; persisted as the slot delay on retirement.
    pub age: f64,

    pub price_history: BTreeMap<HistoryKey, Decimal>,
    pub tx_counts: TxCounts,
    pub volume: VolumeBuckets,
    pub holders: HashMap<String, Holder>,

    sub_counter: Option<(i64, u16)>,
}

impl MintState {
    pub fn new(event: &CreationEvent, sig: &str, now: i64) -> Self {
        Self {
            mint_id: event.mint.clone(),
            name: event.name.clone(),
            symbol: event.symbol.clone(),
            owner: event.user.clone(),
            mint_sig: sig.to_string(),
            bonding_curve: event.bonding_curve.clone(),
            created: now,
            open_price: Decimal::ZERO,
            high_price: Decimal::ZERO,
            low_price: None,
            current_price: Decimal::ZERO,
            market_cap: Decimal::ZERO,
            price_usd: Decimal::ZERO,
            liquidity: Decimal::ZERO,
            age: 0.0,
            price_history: BTreeMap::new(),
            tx_counts: TxCounts::default(),
            volume: VolumeBuckets::default(),
            holders: HashMap::new(),
            sub_counter: None,
        }
    }

    /// Next unique history key for a swap at integer second `secs`.
    ///
    /// Same second as the previous swap bumps the counter, a new second
    /// resets it to zero.
    fn next_history_key(&mut self, secs: i64) -> HistoryKey {
        let seq = match self.sub_counter {
            Some((last, counter)) if last == secs => counter + 1,
            _ => 0,
        };
        self.sub_counter = Some((secs, seq));
        HistoryKey { secs, seq }
    }

    /// Fold one swap event into the record.
    ///
    /// Zero token reserves yield a zero price; the counters and the holder
    /// ledger still update so the swap is not lost.
    pub fn apply_swap(&mut self, swap: &SwapEvent, sol_price_usd: Decimal, now: i64) {
        let side = if swap.is_buy { TradeSide::Buy } else { TradeSide::Sell };

        self.tx_counts.swaps += 1;
        match side {
            TradeSide::Buy => self.tx_counts.buys += 1,
            TradeSide::Sell => self.tx_counts.sells += 1,
        }

        let vsr = Decimal::from_i128_with_scale(swap.virtual_sol_reserves as i128, 9);
        let vtr = Decimal::from_i128_with_scale(swap.virtual_token_reserves as i128, 6);
        let price = if vtr.is_zero() { Decimal::ZERO } else { vsr / vtr };

        // Holder ledger, with the pre-swap price attached to the change.
        let amount = Decimal::from_i128_with_scale(swap.token_amount as i128, 6);
        let change = BalanceChange {
            kind: side,
            price_was: self.current_price,
            amount,
            timestamp: swap.timestamp,
        };
        let holder = self.holders.entry(swap.user.clone()).or_default();
        if holder.balance_changes.is_empty() {
            holder.balance = match side {
                TradeSide::Buy => amount,
                TradeSide::Sell => -amount,
            };
        } else {
            match side {
                TradeSide::Buy => holder.balance += amount,
                TradeSide::Sell => holder.balance -= amount,
            }
        }
        holder.balance_changes.push(change);

        let key = self.next_history_key(swap.timestamp);
        self.price_history.insert(key, price);

        if self.open_price.is_zero() {
            self.open_price = price;
        }
        if price > self.high_price {
            self.high_price = price;
        }
        self.low_price = Some(match self.low_price {
            Some(low) => low.min(price),
            None => price,
        });
        self.current_price = price;

        self.market_cap = Decimal::from(TOTAL_SUPPLY) * price * sol_price_usd;
        self.price_usd = price * sol_price_usd;
        self.liquidity = (vsr + vtr * price) * sol_price_usd;

        if self.age == 0.0 {
            self.age = (now - swap.timestamp) as f64;
        }

        let elapsed = now - self.created;
        if elapsed <= 30 {
            self.volume.sec30 = self.tx_counts.clone();
        } else if elapsed <= 60 {
            self.volume.min1 = self.tx_counts.clone();
        } else if elapsed <= 120 {
            self.volume.min2 = self.tx_counts.clone();
        } else if elapsed <= 300 {
            self.volume.min5 = self.tx_counts.clone();
        }
    }

    /// Integer second of the most recent trade, if any.
    pub fn last_trade_secs(&self) -> Option<i64> {
        self.price_history.keys().next_back().map(|k| k.secs)
    }

    /// Highest price ever recorded in the history.
    pub fn peak_price(&self) -> Decimal {
        self.price_history
            .values()
            .copied()
            .max()
            .unwrap_or(Decimal::ZERO)
    }

    /// Build the retired-table row for this mint.
    pub fn to_stagnant_record(&self, sol_price_usd: Decimal) -> Result<StagnantRecord, serde_json::Error> {
        use rust_decimal::prelude::ToPrimitive;

        let peak = self.peak_price();
        let peak_price_change = if peak > Decimal::ZERO && self.open_price > Decimal::ZERO {
            ((peak - self.open_price) / self.open_price * Decimal::from(100))
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let peak_market_cap = if peak > Decimal::ZERO {
            (Decimal::from(TOTAL_SUPPLY) * peak * sol_price_usd)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let final_ohlc = FinalOhlc {
            open: self.open_price,
            high: peak,
            low: self.low_price,
            close: self.current_price,
        };

        Ok(StagnantRecord {
            mint_id: self.mint_id.clone(),
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            owner: self.owner.clone(),
            holders: serde_json::to_string(&self.holders)?,
            price_history: serde_json::to_string(&self.price_history)?,
            tx_counts: serde_json::to_string(&self.tx_counts)?,
            volume: serde_json::to_string(&self.volume)?,
            peak_price_change,
            peak_market_cap,
            final_market_cap: self.market_cap.to_f64().unwrap_or(0.0),
            final_ohlc: serde_json::to_string(&final_ohlc)?,
            mint_sig: self.mint_sig.clone(),
            bonding_curve: self.bonding_curve.clone(),
            slot_delay: self.age.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creation() -> CreationEvent {
        CreationEvent {
            name: "Token".to_string(),
            symbol: "TK".to_string(),
            uri: String::new(),
            mint: "MintAAA".to_string(),
            bonding_curve: "CurveAAA".to_string(),
            user: "CreatorAAA".to_string(),
        }
    }

    fn swap(user: &str, is_buy: bool, timestamp: i64, vsr: u64, vtr: u64) -> SwapEvent {
        SwapEvent {
            mint: "MintAAA".to_string(),
            sol_amount: 10_000_000,
            token_amount: 2_000_000_000,
            is_buy,
            user: user.to_string(),
            timestamp,
            virtual_sol_reserves: vsr,
            virtual_token_reserves: vtr,
        }
    }

    // Against a fixed reserve of 1e12 raw token units (1M tokens), the
    // price works out to vsr * 1e-15, so vsr = 10_000_000 prices at 1e-8.
    const VTR: u64 = 1_000_000_000_000;

    #[test]
    fn test_unique_sub_second_keys() {
        let mut state = MintState::new(&creation(), "sig", 1_700_000_000);
        let sol = Decimal::from(200);

        for ts in [1_700_000_000, 1_700_000_000, 1_700_000_001] {
            state.apply_swap(&swap("u1", true, ts, 10_000_000, VTR), sol, ts);
        }

        let keys: Vec<String> = state.price_history.keys().map(|k| k.to_string()).collect();
        assert_eq!(
            keys,
            vec!["1700000000.000", "1700000000.001", "1700000001.000"]
        );

        // Strictly increasing under (secs, seq) ordering.
        let parsed: Vec<HistoryKey> = state.price_history.keys().copied().collect();
        assert!(parsed.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_counter_resets_on_new_second() {
        let mut state = MintState::new(&creation(), "sig", 0);
        let sol = Decimal::ONE;
        for ts in [10, 10, 10, 11, 11, 12] {
            state.apply_swap(&swap("u1", true, ts, 1, VTR), sol, ts);
        }
        let keys: Vec<String> = state.price_history.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["10.000", "10.001", "10.002", "11.000", "11.001", "12.000"]);
    }

    #[test]
    fn test_ohlc_invariants() {
        let mut state = MintState::new(&creation(), "sig", 1_700_000_000);
        let sol = Decimal::from(200);

        // Prices 1e-8, 5e-8, 2e-8, 7e-8.
        for (i, vsr) in [10_000_000u64, 50_000_000, 20_000_000, 70_000_000]
            .iter()
            .enumerate()
        {
            let ts = 1_700_000_000 + i as i64;
            state.apply_swap(&swap("u1", true, ts, *vsr, VTR), sol, ts);
        }

        let e8 = |n: i64| Decimal::new(n, 8);
        assert_eq!(state.open_price, e8(1));
        assert_eq!(state.high_price, e8(7));
        assert_eq!(state.low_price, Some(e8(1)));
        assert_eq!(state.current_price, e8(7));
        assert!(state.high_price >= state.current_price);
        assert!(state.low_price.unwrap() <= state.current_price);
    }

    #[test]
    fn test_counter_consistency() {
        let mut state = MintState::new(&creation(), "sig", 0);
        let sol = Decimal::ONE;
        for (i, is_buy) in [true, true, false, true, false].iter().enumerate() {
            state.apply_swap(&swap("u1", *is_buy, i as i64, 1_000, VTR), sol, i as i64);
        }
        assert_eq!(state.tx_counts.swaps, 5);
        assert_eq!(state.tx_counts.buys, 3);
        assert_eq!(state.tx_counts.sells, 2);
        assert_eq!(
            state.tx_counts.swaps,
            state.tx_counts.buys + state.tx_counts.sells
        );
    }

    #[test]
    fn test_holder_ledger_tracks_balances_and_prior_price() {
        let mut state = MintState::new(&creation(), "sig", 0);
        let sol = Decimal::ONE;

        state.apply_swap(&swap("alice", true, 1, 10_000_000, VTR), sol, 1);
        state.apply_swap(&swap("alice", true, 2, 20_000_000, VTR), sol, 2);
        state.apply_swap(&swap("alice", false, 3, 15_000_000, VTR), sol, 3);

        let alice = &state.holders["alice"];
        // 2000 bought, 2000 bought, 2000 sold (token_amount 2e9 raw, 6 decimals).
        assert_eq!(alice.balance, Decimal::from(2000));
        assert_eq!(alice.balance_changes.len(), 3);

        // First change observed the pre-swap price of zero.
        assert_eq!(alice.balance_changes[0].price_was, Decimal::ZERO);
        // Second change saw the price set by the first swap.
        assert_eq!(alice.balance_changes[1].price_was, Decimal::new(1, 8));
        assert_eq!(alice.balance_changes[0].kind, TradeSide::Buy);
        assert_eq!(alice.balance_changes[2].kind, TradeSide::Sell);
    }

    #[test]
    fn test_seller_enters_ledger_with_negative_balance() {
        let mut state = MintState::new(&creation(), "sig", 0);
        state.apply_swap(&swap("bob", false, 1, 10_000_000, VTR), Decimal::ONE, 1);
        assert_eq!(state.holders["bob"].balance, Decimal::from(-2000));
    }

    #[test]
    fn test_zero_token_reserves_still_counts_swap() {
        let mut state = MintState::new(&creation(), "sig", 0);
        state.apply_swap(&swap("u1", true, 1, 10_000_000, 0), Decimal::ONE, 1);
        assert_eq!(state.tx_counts.swaps, 1);
        assert_eq!(state.current_price, Decimal::ZERO);
        assert_eq!(state.open_price, Decimal::ZERO);
    }

    #[test]
    fn test_open_price_set_once() {
        let mut state = MintState::new(&creation(), "sig", 0);
        let sol = Decimal::ONE;
        state.apply_swap(&swap("u1", true, 1, 10_000_000, VTR), sol, 1);
        let open = state.open_price;
        state.apply_swap(&swap("u1", true, 2, 90_000_000, VTR), sol, 2);
        assert_eq!(state.open_price, open);
    }

    #[test]
    fn test_volume_bucket_by_age() {
        let created = 1_000;
        let mut state = MintState::new(&creation(), "sig", created);
        let sol = Decimal::ONE;

        state.apply_swap(&swap("u1", true, created + 10, 1_000, VTR), sol, created + 10);
        assert_eq!(state.volume.sec30.swaps, 1);
        assert_eq!(state.volume.min1.swaps, 0);

        state.apply_swap(&swap("u1", true, created + 50, 1_000, VTR), sol, created + 50);
        assert_eq!(state.volume.min1.swaps, 2);

        state.apply_swap(&swap("u1", true, created + 299, 1_000, VTR), sol, created + 299);
        assert_eq!(state.volume.min5.swaps, 3);

        // Past the last bucket nothing is overwritten.
        state.apply_swap(&swap("u1", true, created + 400, 1_000, VTR), sol, created + 400);
        assert_eq!(state.volume.min5.swaps, 3);
    }

    #[test]
    fn test_history_key_serde_roundtrip() {
        let mut history = BTreeMap::new();
        history.insert(HistoryKey { secs: 1_700_000_000, seq: 3 }, Decimal::new(5, 8));
        let json = serde_json::to_string(&history).unwrap();
        assert!(json.contains("\"1700000000.003\""));

        let back: BTreeMap<HistoryKey, Decimal> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, history);
    }

    #[test]
    fn test_stagnant_record_final_ohlc() {
        let mut state = MintState::new(&creation(), "sig", 0);
        let sol = Decimal::from(100);
        for (i, units) in [10_000_000u64, 70_000_000, 30_000_000].iter().enumerate() {
            state.apply_swap(&swap("u1", true, i as i64, *units, VTR), sol, i as i64);
        }

        let record = state.to_stagnant_record(sol).unwrap();
        let ohlc: FinalOhlc = serde_json::from_str(&record.final_ohlc).unwrap();
        assert_eq!(ohlc.open, Decimal::new(1, 8));
        assert_eq!(ohlc.high, Decimal::new(7, 8));
        assert_eq!(ohlc.close, Decimal::new(3, 8));
        // Peak change vs open: (7e-8 - 1e-8) / 1e-8 * 100 = 600%.
        assert!((record.peak_price_change - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_low_price_infinity_sentinel() {
        let ohlc = FinalOhlc {
            open: Decimal::ZERO,
            high: Decimal::ZERO,
            low: None,
            close: Decimal::ZERO,
        };
        let json = serde_json::to_string(&ohlc).unwrap();
        assert!(json.contains("\"Infinity\""));
        let back: FinalOhlc = serde_json::from_str(&json).unwrap();
        assert!(back.low.is_none());
    }
}
