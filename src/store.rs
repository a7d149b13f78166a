//! SQLite persistence
//!
//! Two tables: `mints` holds every live token the engine is tracking,
//! `stagnant_mints` is the historical table the reputation analyzer reads.
//! A mint lives in exactly one of the two; retirement moves it across in a
//! single transaction (insert-or-ignore then delete), so replays are
//! harmless and a crash can never leave the row in both.
//!
//! Price-bearing JSON blobs keep decimals as base-10 strings; the
//! uninitialized low price is persisted as `+inf` in its REAL column.

use crate::market::state::MintState;
use rusqlite::{params, Connection};
use rust_decimal::prelude::ToPrimitive;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub enum StoreError {
    Database(String),
    Serialization(serde_json::Error),
    Io(std::io::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

/// Row shape of the `stagnant_mints` table, both for writes at retirement
/// and for the analyzer's chunked reads.
#[derive(Debug, Clone)]
pub struct StagnantRecord {
    pub mint_id: String,
    pub name: String,
    pub symbol: String,
    pub owner: String,
    pub holders: String,
    pub price_history: String,
    pub tx_counts: String,
    pub volume: String,
    pub peak_price_change: f64,
    pub peak_market_cap: f64,
    pub final_market_cap: f64,
    pub final_ohlc: String,
    pub mint_sig: String,
    pub bonding_curve: String,
    pub slot_delay: String,
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS mints (
                mint_id TEXT PRIMARY KEY,
                name TEXT,
                symbol TEXT,
                owner TEXT,
                market_cap REAL,
                price_history TEXT,
                price_usd REAL,
                liquidity REAL,
                open_price REAL,
                high_price REAL,
                low_price REAL,
                current_price REAL,
                age REAL DEFAULT 0,
                tx_counts TEXT,
                volume TEXT,
                holders TEXT,
                mint_sig TEXT,
                bonding_curve TEXT,
                created INTEGER,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS stagnant_mints (
                mint_id TEXT PRIMARY KEY,
                name TEXT,
                symbol TEXT,
                owner TEXT,
                holders TEXT,
                price_history TEXT,
                tx_counts TEXT,
                volume TEXT,
                peak_price_change REAL,
                peak_market_cap REAL,
                final_market_cap REAL,
                final_ohlc TEXT,
                mint_sig TEXT,
                bonding_curve TEXT,
                slot_delay TEXT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_mints_timestamp ON mints(timestamp);
            CREATE INDEX IF NOT EXISTS idx_stagnant_mints_owner ON stagnant_mints(owner);
            CREATE INDEX IF NOT EXISTS idx_stagnant_mints_timestamp ON stagnant_mints(timestamp);",
        )?;

        log::info!("✅ Store initialized with WAL mode");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a freshly created mint. No-op when the mint already exists,
    /// which makes duplicate creation events harmless.
    pub fn insert_mint(&self, state: &MintState) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO mints
             (mint_id, name, symbol, owner, market_cap, price_history, price_usd, liquidity,
              open_price, high_price, low_price, current_price, age, tx_counts, volume,
              holders, mint_sig, bonding_curve, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
             ON CONFLICT(mint_id) DO NOTHING",
            params![
                state.mint_id,
                state.name,
                state.symbol,
                state.owner,
                state.market_cap.to_f64().unwrap_or(0.0),
                serde_json::to_string(&state.price_history)?,
                state.price_usd.to_f64().unwrap_or(0.0),
                state.liquidity.to_f64().unwrap_or(0.0),
                state.open_price.to_f64().unwrap_or(0.0),
                state.high_price.to_f64().unwrap_or(0.0),
                low_price_column(state),
                state.current_price.to_f64().unwrap_or(0.0),
                state.age,
                serde_json::to_string(&state.tx_counts)?,
                serde_json::to_string(&state.volume)?,
                serde_json::to_string(&state.holders)?,
                state.mint_sig,
                state.bonding_curve,
                state.created,
            ],
        )?;
        Ok(())
    }

    /// Write the mutable columns of a live mint after a swap applied.
    pub fn update_mint(&self, state: &MintState) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE mints SET
                market_cap = ?1, price_history = ?2, price_usd = ?3, liquidity = ?4,
                open_price = ?5, high_price = ?6, low_price = ?7, current_price = ?8,
                age = ?9, tx_counts = ?10, volume = ?11, holders = ?12
             WHERE mint_id = ?13",
            params![
                state.market_cap.to_f64().unwrap_or(0.0),
                serde_json::to_string(&state.price_history)?,
                state.price_usd.to_f64().unwrap_or(0.0),
                state.liquidity.to_f64().unwrap_or(0.0),
                state.open_price.to_f64().unwrap_or(0.0),
                state.high_price.to_f64().unwrap_or(0.0),
                low_price_column(state),
                state.current_price.to_f64().unwrap_or(0.0),
                state.age,
                serde_json::to_string(&state.tx_counts)?,
                serde_json::to_string(&state.volume)?,
                serde_json::to_string(&state.holders)?,
                state.mint_id,
            ],
        )?;
        Ok(())
    }

    /// Atomically retire a mint: insert into `stagnant_mints` (ignoring a
    /// replayed row) and delete from `mints`, in one transaction.
    pub fn move_to_stagnant(&self, record: &StagnantRecord) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO stagnant_mints
             (mint_id, name, symbol, owner, holders, price_history, tx_counts, volume,
              peak_price_change, peak_market_cap, final_market_cap, final_ohlc,
              mint_sig, bonding_curve, slot_delay)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(mint_id) DO NOTHING",
            params![
                record.mint_id,
                record.name,
                record.symbol,
                record.owner,
                record.holders,
                record.price_history,
                record.tx_counts,
                record.volume,
                record.peak_price_change,
                record.peak_market_cap,
                record.final_market_cap,
                record.final_ohlc,
                record.mint_sig,
                record.bonding_curve,
                record.slot_delay,
            ],
        )?;
        tx.execute("DELETE FROM mints WHERE mint_id = ?1", params![record.mint_id])?;

        tx.commit()?;
        Ok(())
    }

    /// Load one ordered chunk of retired mints for the analyzer.
    ///
    /// The read runs inside its own transaction, so the chunk sees a
    /// consistent snapshot even while monitors keep retiring mints.
    pub fn load_stagnant_chunk(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StagnantRecord>, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let records = {
            let mut stmt = tx.prepare(
                "SELECT mint_id, name, symbol, owner, holders, price_history, tx_counts,
                        volume, peak_price_change, peak_market_cap, final_market_cap,
                        final_ohlc, mint_sig, bonding_curve, slot_delay
                 FROM stagnant_mints ORDER BY mint_id LIMIT ?1 OFFSET ?2",
            )?;

            let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
                Ok(StagnantRecord {
                    mint_id: row.get(0)?,
                    name: row.get(1)?,
                    symbol: row.get(2)?,
                    owner: row.get(3)?,
                    holders: row.get(4)?,
                    price_history: row.get(5)?,
                    tx_counts: row.get(6)?,
                    volume: row.get(7)?,
                    peak_price_change: row.get(8)?,
                    peak_market_cap: row.get(9)?,
                    final_market_cap: row.get(10)?,
                    final_ohlc: row.get(11)?,
                    mint_sig: row.get(12)?,
                    bonding_curve: row.get(13)?,
                    slot_delay: row.get(14)?,
                })
            })?;

            rows.collect::<Result<Vec<_>, _>>()?
        };

        tx.commit()?;
        Ok(records)
    }

    pub fn live_mint_exists(&self, mint_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM mints WHERE mint_id = ?1",
            params![mint_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn stagnant_mint_exists(&self, mint_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM stagnant_mints WHERE mint_id = ?1",
            params![mint_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn stagnant_count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM stagnant_mints", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn low_price_column(state: &MintState) -> f64 {
    state
        .low_price
        .map(|d| d.to_f64().unwrap_or(f64::INFINITY))
        .unwrap_or(f64::INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CreationEvent;
    use rust_decimal::Decimal;

    fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db")).unwrap();
        (store, dir)
    }

    fn state(mint: &str) -> MintState {
        MintState::new(
            &CreationEvent {
                name: "Token".to_string(),
                symbol: "TK".to_string(),
                uri: String::new(),
                mint: mint.to_string(),
                bonding_curve: "curve".to_string(),
                user: "creator".to_string(),
            },
            "sig",
            1_700_000_000,
        )
    }

    fn record(mint: &str) -> StagnantRecord {
        StagnantRecord {
            mint_id: mint.to_string(),
            name: "Token".to_string(),
            symbol: "TK".to_string(),
            owner: "creator".to_string(),
            holders: "{}".to_string(),
            price_history: "{}".to_string(),
            tx_counts: "{}".to_string(),
            volume: "{}".to_string(),
            peak_price_change: 12.5,
            peak_market_cap: 9_000.0,
            final_market_cap: 4_000.0,
            final_ohlc: "{}".to_string(),
            mint_sig: "sig".to_string(),
            bonding_curve: "curve".to_string(),
            slot_delay: "1.5".to_string(),
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let (store, _dir) = test_store();
        let mut s = state("M1");
        store.insert_mint(&s).unwrap();

        s.current_price = Decimal::new(5, 8);
        store.insert_mint(&s).unwrap(); // conflict, no-op
        assert!(store.live_mint_exists("M1").unwrap());
    }

    #[test]
    fn test_retirement_is_exclusive_and_idempotent() {
        let (store, _dir) = test_store();
        store.insert_mint(&state("M1")).unwrap();

        let rec = record("M1");
        store.move_to_stagnant(&rec).unwrap();
        assert!(!store.live_mint_exists("M1").unwrap());
        assert!(store.stagnant_mint_exists("M1").unwrap());

        // Replay changes nothing.
        store.move_to_stagnant(&rec).unwrap();
        assert_eq!(store.stagnant_count().unwrap(), 1);
    }

    #[test]
    fn test_chunked_load_is_ordered_by_mint_id() {
        let (store, _dir) = test_store();
        for mint in ["C", "A", "B", "D"] {
            store.move_to_stagnant(&record(mint)).unwrap();
        }

        let first = store.load_stagnant_chunk(2, 0).unwrap();
        let second = store.load_stagnant_chunk(2, 2).unwrap();
        let ids: Vec<&str> = first
            .iter()
            .chain(second.iter())
            .map(|r| r.mint_id.as_str())
            .collect();
        assert_eq!(ids, vec!["A", "B", "C", "D"]);

        assert!(store.load_stagnant_chunk(2, 4).unwrap().is_empty());
    }

    #[test]
    fn test_update_writes_through() {
        let (store, _dir) = test_store();
        let mut s = state("M2");
        store.insert_mint(&s).unwrap();

        s.current_price = Decimal::new(42, 9);
        s.tx_counts.swaps = 7;
        store.update_mint(&s).unwrap();

        let conn = store.conn.lock().unwrap();
        let (price, counts): (f64, String) = conn
            .query_row(
                "SELECT current_price, tx_counts FROM mints WHERE mint_id = 'M2'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!((price - 4.2e-8).abs() < 1e-15);
        assert!(counts.contains("\"swaps\":7"));
    }
}
