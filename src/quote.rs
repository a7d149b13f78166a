//! SOL/USD quote provider
//!
//! Market cap, liquidity, and fee math all need a dollar quote for SOL. The
//! quote is fetched from CoinGecko, refreshed every 60 seconds in the
//! background, and published through a shared handle so consumers always
//! read the current value instead of a startup snapshot. On fetch failure
//! the last known value stays in place.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

const QUOTE_URL: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids=solana&vs_currencies=usd";

const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Shared handle to the current SOL/USD price.
#[derive(Clone)]
pub struct SolPrice {
    inner: Arc<RwLock<Decimal>>,
}

impl SolPrice {
    pub fn new(initial: Decimal) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn get(&self) -> Decimal {
        *self.inner.read().await
    }

    pub async fn set(&self, value: Decimal) {
        *self.inner.write().await = value;
    }
}

#[derive(Deserialize)]
struct QuoteResponse {
    solana: QuoteEntry,
}

#[derive(Deserialize)]
struct QuoteEntry {
    usd: Decimal,
}

/// One-shot fetch of the current SOL/USD quote.
pub async fn fetch_sol_price_usd() -> Result<Decimal, reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response: QuoteResponse = client
        .get(QUOTE_URL)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(response.solana.usd)
}

/// Background refresh loop. Runs until cancelled.
pub async fn refresh_task(price: SolPrice, cancel: CancellationToken) {
    let mut timer = interval(REFRESH_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {
                match fetch_sol_price_usd().await {
                    Ok(quote) => {
                        price.set(quote).await;
                        log::debug!("SOL/USD quote refreshed: {}", quote);
                    }
                    Err(e) => {
                        log::warn!("⚠️  SOL/USD quote fetch failed, keeping last value: {}", e);
                    }
                }
            }
        }
    }
}
