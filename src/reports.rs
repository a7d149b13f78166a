//! Persisted outputs
//!
//! Trade outcomes go to `results.txt` as JSON lines, one object per event.
//! Each leaderboard refresh appends a timestamped block to
//! `leaderboard.txt`, sorted by performance score.

use crate::analyzer::Leaderboard;
use rust_decimal::Decimal;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;

pub struct Reports {
    results_path: PathBuf,
    leaderboard_path: PathBuf,
}

impl Reports {
    pub fn new(results_path: impl Into<PathBuf>, leaderboard_path: impl Into<PathBuf>) -> Self {
        Self {
            results_path: results_path.into(),
            leaderboard_path: leaderboard_path.into(),
        }
    }

    pub fn record_buy(&self, mint_id: &str, owner: &str, price: Decimal, trust_level: u8) {
        self.append_result(json!({
            "type": "buy",
            "mint_id": mint_id,
            "owner": owner,
            "price": price.to_string(),
            "trust_level": trust_level,
        }));
    }

    pub fn record_sell(&self, mint_id: &str, owner: &str, profit_pct: f64, reason: &str) {
        self.append_result(json!({
            "type": "sell",
            "mint_id": mint_id,
            "owner": owner,
            "profit": profit_pct,
            "reason": reason,
        }));
    }

    fn append_result(&self, value: serde_json::Value) {
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.results_path)
            .and_then(|mut file| writeln!(file, "{}", value));
        if let Err(e) = result {
            log::error!("❌ Failed to write trade result: {}", e);
        }
    }

    /// Append one refresh's leaderboard, best performers first.
    pub fn write_leaderboard(&self, board: &Leaderboard) -> Result<(), std::io::Error> {
        let mut entries: Vec<_> = board.iter().collect();
        entries.sort_by(|a, b| {
            b.1.performance_score
                .partial_cmp(&a.1.performance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.leaderboard_path)?;

        writeln!(file, "{}-", chrono::Utc::now().to_rfc3339())?;
        for (creator, score) in entries {
            writeln!(file, "{}", json!({ creator: score }))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::CreatorScore;

    #[test]
    fn test_results_are_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let reports = Reports::new(dir.path().join("results.txt"), dir.path().join("lb.txt"));

        reports.record_buy("M1", "creator", Decimal::new(5, 8), 2);
        reports.record_sell("M1", "creator", 41.5, "safe");

        let contents = std::fs::read_to_string(dir.path().join("results.txt")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let buy: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(buy["type"], "buy");
        assert_eq!(buy["price"], "0.00000005");

        let sell: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(sell["reason"], "safe");
    }

    #[test]
    fn test_leaderboard_sorted_by_score() {
        let dir = tempfile::tempdir().unwrap();
        let reports = Reports::new(dir.path().join("results.txt"), dir.path().join("lb.txt"));

        let mut board = Leaderboard::new();
        for (creator, score) in [("low", 10.0), ("high", 99.0)] {
            board.insert(
                creator.to_string(),
                CreatorScore {
                    mint_count: 1,
                    median_peak_market_cap: 8_000.0,
                    median_market_cap: 2_000.0,
                    median_open_price: 1e-8,
                    median_high_price: 5e-8,
                    performance_score: score,
                    trust_factor: 1.0,
                    avg_success_ratio: 60.0,
                    median_success_ratio: 60.0,
                    success_count: 1,
                    unsuccess_count: 0,
                    total_swaps: 40,
                },
            );
        }

        reports.write_leaderboard(&board).unwrap();
        let contents = std::fs::read_to_string(dir.path().join("lb.txt")).unwrap();
        let high_pos = contents.find("high").unwrap();
        let low_pos = contents.find("low").unwrap();
        assert!(high_pos < low_pos);
    }
}
