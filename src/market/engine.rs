//! Market engine: the keyed per-mint lock map
//!
//! Every live mint is one `Arc<Mutex<MintState>>` entry; swaps for distinct
//! mints apply in parallel while swaps for the same mint serialize on its
//! lock. The engine writes each applied swap through to the store while the
//! lock is held, so the persisted row can never interleave two updates.

use crate::events::{CreationEvent, SwapEvent};
use crate::market::monitor;
use crate::market::state::MintState;
use crate::quote::SolPrice;
use crate::store::{Store, StoreError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

pub struct MarketEngine {
    store: Store,
    sol_price: SolPrice,
    cancel: CancellationToken,
    mints: Mutex<HashMap<String, Arc<AsyncMutex<MintState>>>>,
    /// Mints with an active stagnancy monitor; at most one per mint.
    monitors: Mutex<HashSet<String>>,
    swap_counter: AtomicU64,
}

impl MarketEngine {
    pub fn new(store: Store, sol_price: SolPrice, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            store,
            sol_price,
            cancel,
            mints: Mutex::new(HashMap::new()),
            monitors: Mutex::new(HashSet::new()),
            swap_counter: AtomicU64::new(0),
        })
    }

    /// Register a freshly minted token and start its stagnancy monitor.
    /// Duplicate creation events for the same mint are no-ops.
    pub async fn on_creation(
        self: &Arc<Self>,
        sig: &str,
        event: &CreationEvent,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();

        let handle = {
            let mut mints = self.mints.lock().unwrap();
            if mints.contains_key(&event.mint) {
                log::debug!("Duplicate creation for {}, ignoring", event.mint);
                return Ok(());
            }
            let handle = Arc::new(AsyncMutex::new(MintState::new(event, sig, now)));
            mints.insert(event.mint.clone(), handle.clone());
            handle
        };

        {
            let state = handle.lock().await;
            self.store.insert_mint(&state)?;
        }

        self.start_monitor(event.mint.clone());
        Ok(())
    }

    /// Apply one swap under the mint's lock and write the row through.
    /// Swaps for mints we are not tracking are silently dropped.
    pub async fn on_swap(&self, _sig: &str, swap: &SwapEvent) -> Result<(), StoreError> {
        let handle = self.mints.lock().unwrap().get(&swap.mint).cloned();
        let Some(handle) = handle else {
            return Ok(());
        };

        let sol_usd = self.sol_price.get().await;
        let now = chrono::Utc::now().timestamp();

        let mut state = handle.lock().await;
        state.apply_swap(swap, sol_usd, now);

        let seen = self.swap_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % 100 == 0 {
            log::info!("📊 Socket latency: {}s", now - swap.timestamp);
        }

        self.store.update_mint(&state)
    }

    /// Handle to a live mint's state, if we are tracking it.
    pub fn get(&self, mint: &str) -> Option<Arc<AsyncMutex<MintState>>> {
        self.mints.lock().unwrap().get(mint).cloned()
    }

    /// Drop a mint from the live map (after retirement). The state stays
    /// readable through any handle a session already holds.
    pub fn remove(&self, mint: &str) {
        self.mints.lock().unwrap().remove(mint);
    }

    pub fn live_count(&self) -> usize {
        self.mints.lock().unwrap().len()
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn sol_price(&self) -> &SolPrice {
        &self.sol_price
    }

    fn start_monitor(self: &Arc<Self>, mint: String) {
        {
            let mut monitors = self.monitors.lock().unwrap();
            if !monitors.insert(mint.clone()) {
                return;
            }
        }

        let engine = self.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            monitor::run(engine, mint, cancel).await;
        });
    }

    pub(crate) fn monitor_finished(&self, mint: &str) {
        self.monitors.lock().unwrap().remove(mint);
    }
}
