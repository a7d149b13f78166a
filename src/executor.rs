//! Swap execution seam
//!
//! Transaction construction and signing live behind `SwapExecutor`; the
//! session controller only speaks this trait. The shipped implementation is
//! a paper executor that fills orders at the market engine's live price and
//! synthesizes receipts, which is enough to run the whole agent dry and to
//! exercise the receipt-fallback path in tests. A signing executor slots in
//! without touching the session code.

use crate::market::MarketEngine;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug)]
pub enum SwapError {
    Transport(String),
    Rejected(String),
}

impl std::fmt::Display for SwapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwapError::Transport(e) => write!(f, "Transport error: {}", e),
            SwapError::Rejected(e) => write!(f, "Swap rejected: {}", e),
        }
    }
}

impl std::error::Error for SwapError {}

/// What a submitted swap came back as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Transaction id to look the receipt up with.
    Submitted(String),
    /// The bonding curve migrated away; nothing more to do on this mint.
    Migrated,
    /// Simulation said the buy would exceed the slippage budget.
    PriceTooHigh,
}

/// Confirmed fill: token units for buys, lamports for sells.
#[derive(Debug, Clone)]
pub struct SwapReceipt {
    pub balance: u64,
    pub price: Decimal,
}

#[derive(Debug, Clone)]
pub enum ReceiptStatus {
    Filled(SwapReceipt),
    /// The transaction landed but the instruction failed; sells retry on this.
    InstructionError,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapKind {
    Buy,
    Sell,
}

#[derive(Debug, Clone)]
pub struct BuyRequest {
    pub mint: String,
    pub bonding_curve: String,
    pub creator: String,
    pub lamports: u64,
    pub token_amount: u64,
    pub fee_micro_lamports: u64,
    pub slippage: Decimal,
}

#[derive(Debug, Clone)]
pub struct SellRequest {
    pub mint: String,
    pub bonding_curve: String,
    pub creator: String,
    pub token_amount: u64,
    pub min_sol_output: u64,
    pub fee_micro_lamports: u64,
}

#[async_trait]
pub trait SwapExecutor: Send + Sync {
    async fn buy(&self, request: &BuyRequest) -> Result<SwapOutcome, SwapError>;

    async fn sell(&self, request: &SellRequest) -> Result<SwapOutcome, SwapError>;

    /// Look up the confirmed fill of a previously submitted swap.
    async fn swap_receipt(
        &self,
        tx_id: &str,
        mint: &str,
        kind: SwapKind,
    ) -> Result<ReceiptStatus, SwapError>;

    async fn wallet_balance(&self) -> Result<u64, SwapError>;
}

const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
const TOKEN_UNITS: u64 = 1_000_000;

/// Dollars to lamports at the given SOL/USD quote.
pub fn usd_to_lamports(usd: Decimal, sol_usd: Decimal) -> u64 {
    if sol_usd <= Decimal::ZERO {
        return 0;
    }
    (usd / sol_usd * Decimal::from(LAMPORTS_PER_SOL))
        .to_u64()
        .unwrap_or(0)
}

/// Dollars to a per-compute-unit priority fee in micro-lamports.
pub fn usd_to_microlamports(usd: Decimal, sol_usd: Decimal, compute_units: u64) -> u64 {
    if sol_usd <= Decimal::ZERO || compute_units == 0 {
        return 0;
    }
    let lamports = usd / sol_usd * Decimal::from(LAMPORTS_PER_SOL);
    (lamports * Decimal::from(1_000_000u64) / Decimal::from(compute_units))
        .to_u64()
        .unwrap_or(0)
}

/// Total lamports a priority fee costs at the given budget.
pub fn priority_fee_lamports(fee_micro_lamports: u64, compute_units: u64) -> u64 {
    ((fee_micro_lamports as u128 * compute_units as u128) / 1_000_000) as u64
}

/// Lamports worth of tokens (raw 6-decimal units) at the given price.
pub fn lamports_to_tokens(lamports: u64, price: Decimal) -> u64 {
    if price <= Decimal::ZERO {
        return 0;
    }
    let sol = Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL);
    (sol / price * Decimal::from(TOKEN_UNITS))
        .to_u64()
        .unwrap_or(0)
}

/// Paper trading executor: fills at the engine's current price.
pub struct PaperExecutor {
    engine: Arc<MarketEngine>,
    lamports: AtomicU64,
    fills: Mutex<HashMap<String, SwapReceipt>>,
    sequence: AtomicU64,
}

impl PaperExecutor {
    pub fn new(engine: Arc<MarketEngine>, starting_lamports: u64) -> Self {
        Self {
            engine,
            lamports: AtomicU64::new(starting_lamports),
            fills: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    async fn current_price(&self, mint: &str) -> Decimal {
        match self.engine.get(mint) {
            Some(handle) => handle.lock().await.current_price,
            None => Decimal::ZERO,
        }
    }

    fn next_tx_id(&self) -> String {
        format!("paper-{}", self.sequence.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl SwapExecutor for PaperExecutor {
    async fn buy(&self, request: &BuyRequest) -> Result<SwapOutcome, SwapError> {
        let price = self.current_price(&request.mint).await;
        if price <= Decimal::ZERO {
            return Ok(SwapOutcome::PriceTooHigh);
        }

        let filled_tokens = lamports_to_tokens(request.lamports, price);
        self.lamports
            .fetch_sub(request.lamports.min(self.lamports.load(Ordering::Relaxed)), Ordering::Relaxed);

        let tx_id = self.next_tx_id();
        self.fills.lock().await.insert(
            tx_id.clone(),
            SwapReceipt {
                balance: filled_tokens,
                price,
            },
        );
        log::info!(
            "💸 Paper buy of {} for {} tokens at {}",
            request.mint,
            filled_tokens,
            price
        );
        Ok(SwapOutcome::Submitted(tx_id))
    }

    async fn sell(&self, request: &SellRequest) -> Result<SwapOutcome, SwapError> {
        let price = self.current_price(&request.mint).await;
        let tokens = Decimal::from(request.token_amount) / Decimal::from(TOKEN_UNITS);
        let proceeds = (tokens * price * Decimal::from(LAMPORTS_PER_SOL))
            .to_u64()
            .unwrap_or(0);

        let balance = self.lamports.fetch_add(proceeds, Ordering::Relaxed) + proceeds;

        let tx_id = self.next_tx_id();
        self.fills.lock().await.insert(
            tx_id.clone(),
            SwapReceipt { balance, price },
        );
        log::info!(
            "💸 Paper sell of {} for {} lamports at {}",
            request.mint,
            proceeds,
            price
        );
        Ok(SwapOutcome::Submitted(tx_id))
    }

    async fn swap_receipt(
        &self,
        tx_id: &str,
        _mint: &str,
        _kind: SwapKind,
    ) -> Result<ReceiptStatus, SwapError> {
        Ok(match self.fills.lock().await.get(tx_id) {
            Some(receipt) => ReceiptStatus::Filled(receipt.clone()),
            None => ReceiptStatus::NotFound,
        })
    }

    async fn wallet_balance(&self) -> Result<u64, SwapError> {
        Ok(self.lamports.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usd_to_lamports() {
        // $10 at $200/SOL = 0.05 SOL.
        assert_eq!(
            usd_to_lamports(Decimal::from(10), Decimal::from(200)),
            50_000_000
        );
        assert_eq!(usd_to_lamports(Decimal::from(10), Decimal::ZERO), 0);
    }

    #[test]
    fn test_lamports_to_tokens() {
        // 0.05 SOL at 1e-8 SOL/token = 5,000,000 tokens = 5e12 raw units.
        assert_eq!(
            lamports_to_tokens(50_000_000, Decimal::new(1, 8)),
            5_000_000_000_000
        );
        assert_eq!(lamports_to_tokens(50_000_000, Decimal::ZERO), 0);
    }

    #[test]
    fn test_priority_fee_roundtrip() {
        // $0.10 at $200/SOL over 50k compute units.
        let micro = usd_to_microlamports(Decimal::new(1, 1), Decimal::from(200), 50_000);
        let lamports = priority_fee_lamports(micro, 50_000);
        // 0.0005 SOL = 500_000 lamports.
        assert_eq!(lamports, 500_000);
    }
}
