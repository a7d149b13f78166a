//! Per-mint market state engine
//!
//! Owns the in-memory record of every live mint, applies decoded swap
//! events under a per-mint lock, and runs one stagnancy monitor per mint
//! that eventually retires it into the historical table.

pub mod engine;
pub mod monitor;
pub mod state;

pub use engine::MarketEngine;
pub use state::{HistoryKey, MintState, TradeSide, TxCounts};
