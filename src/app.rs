//! Orchestrator
//!
//! Wires the log source into the decoder and market engine, gates new
//! trading sessions on the leaderboard, and keeps the leaderboard fresh in
//! the background. The dispatcher drains the frame queue into one task per
//! frame, tracked so shutdown can join what is still in flight.

use crate::analyzer::{Analyzer, Leaderboard};
use crate::blacklist::Blacklist;
use crate::config::{Settings, LAUNCHPAD_PROGRAM};
use crate::events::{self, CreationEvent, ProgramEvent};
use crate::executor::{PaperExecutor, SwapExecutor};
use crate::logsource::{subscribe_logs, LogFrame};
use crate::market::MarketEngine;
use crate::quote::{self, SolPrice};
use crate::reports::Reports;
use crate::session::Session;
use crate::store::Store;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Paper wallet funding when no real executor is wired in (10 SOL).
const PAPER_WALLET_LAMPORTS: u64 = 10_000_000_000;

/// How long shutdown waits for in-flight frame tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Retry delay when a refresh is deferred by an open position.
const REFRESH_DEFER_DELAY: Duration = Duration::from_secs(15);

pub struct App {
    cfg: Arc<Settings>,
    engine: Arc<MarketEngine>,
    analyzer: Arc<Mutex<Analyzer>>,
    leaderboard: Arc<RwLock<Option<Arc<Leaderboard>>>>,
    blacklist: Arc<Blacklist>,
    reports: Arc<Reports>,
    executor: Arc<dyn SwapExecutor>,
    sol_price: SolPrice,
    active_sessions: Arc<StdMutex<HashSet<String>>>,
    open_positions: Arc<AtomicUsize>,
    updating: Arc<AtomicBool>,
    wallet_lamports: Arc<Mutex<u64>>,
    cancel: CancellationToken,
}

impl App {
    pub fn new(cfg: Arc<Settings>, store: Store, cancel: CancellationToken) -> Arc<Self> {
        let sol_price = SolPrice::new(cfg.sol_price_fallback);
        let engine = MarketEngine::new(store.clone(), sol_price.clone(), cancel.clone());
        let executor = Arc::new(PaperExecutor::new(engine.clone(), PAPER_WALLET_LAMPORTS));
        let analyzer = Arc::new(Mutex::new(Analyzer::new(store, cfg.clone())));
        let blacklist = Arc::new(Blacklist::load(&cfg.blacklist_path));
        let reports = Arc::new(Reports::new(&cfg.results_path, &cfg.leaderboard_path));

        Arc::new(Self {
            cfg,
            engine,
            analyzer,
            leaderboard: Arc::new(RwLock::new(None)),
            blacklist,
            reports,
            executor,
            sol_price,
            active_sessions: Arc::new(StdMutex::new(HashSet::new())),
            open_positions: Arc::new(AtomicUsize::new(0)),
            updating: Arc::new(AtomicBool::new(false)),
            wallet_lamports: Arc::new(Mutex::new(0)),
            cancel,
        })
    }

    pub async fn run(self: Arc<Self>) {
        // Startup quote, then periodic refresh so long sessions never
        // price against a stale dollar value.
        match quote::fetch_sol_price_usd().await {
            Ok(price) => {
                self.sol_price.set(price).await;
                log::info!("SOL/USD quote: {}", price);
            }
            Err(e) => log::warn!(
                "⚠️  SOL/USD fetch failed, starting with fallback {}: {}",
                self.cfg.sol_price_fallback,
                e
            ),
        }
        tokio::spawn(quote::refresh_task(
            self.sol_price.clone(),
            self.cancel.child_token(),
        ));

        match self.executor.wallet_balance().await {
            Ok(lamports) => {
                *self.wallet_lamports.lock().await = lamports;
                log::info!("💰 Wallet funded with {} lamports", lamports);
            }
            Err(e) => log::error!("❌ Could not fetch wallet balance: {}", e),
        }

        tokio::spawn(refresh_loop(self.clone()));

        let (tx, rx) = mpsc::channel::<LogFrame>(self.cfg.channel_buffer);
        tokio::spawn(subscribe_logs(
            self.cfg.ws_url.clone(),
            LAUNCHPAD_PROGRAM.to_string(),
            tx,
            self.cancel.child_token(),
        ));

        self.dispatch(rx).await;
        log::info!("Orchestrator stopped");
    }

    /// Drain the frame queue, one task per frame, until shutdown.
    async fn dispatch(self: &Arc<Self>, mut rx: mpsc::Receiver<LogFrame>) {
        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    let app = self.clone();
                    tasks.spawn(async move { app.handle_frame(frame).await });
                    // Reap whatever already finished to keep the set small.
                    while tasks.try_join_next().is_some() {}
                }
            }
        }

        log::info!("Draining {} in-flight frame tasks...", tasks.len());
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
    }

    async fn handle_frame(self: &Arc<Self>, frame: LogFrame) {
        let parsed = events::scan_logs(&frame.logs);

        for event in parsed.events {
            match event {
                ProgramEvent::Creation(creation) if parsed.is_mint => {
                    if let Err(e) = self.engine.on_creation(&frame.signature, &creation).await {
                        log::error!("❌ Failed to record mint {}: {}", creation.mint, e);
                    }
                    self.maybe_start_session(&creation).await;
                }
                ProgramEvent::Creation(_) => {}
                ProgramEvent::Swap(swap) => {
                    if let Err(e) = self.engine.on_swap(&frame.signature, &swap).await {
                        log::error!("❌ Failed to apply swap on {}: {}", swap.mint, e);
                    }
                }
            }
        }
    }

    /// Open a session when the creator is on the leaderboard and every gate
    /// passes: not blacklisted, no refresh in progress, the single-position
    /// slot is free, and no session already runs on this mint.
    async fn maybe_start_session(self: &Arc<Self>, creation: &CreationEvent) {
        let board = self.leaderboard.read().await.clone();
        let Some(board) = board else { return };
        let Some(creator) = board.get(&creation.user) else {
            return;
        };

        log::info!(
            "✨ Mint {} by leaderboard creator {} (score {:.2})",
            creation.mint,
            creation.user,
            creator.performance_score
        );

        if self.updating.load(Ordering::SeqCst) {
            log::info!("Leaderboard refresh in progress, skipping {}", creation.mint);
            return;
        }
        if self.blacklist.contains(&creation.user).await {
            log::info!("Creator {} is blacklisted, skipping", creation.user);
            return;
        }
        if self.cfg.single_position && self.open_positions.load(Ordering::SeqCst) > 0 {
            log::info!("Position slot busy, skipping {}", creation.mint);
            return;
        }
        {
            let mut sessions = self.active_sessions.lock().unwrap();
            if !sessions.insert(creation.mint.clone()) {
                log::info!("Session for {} already active", creation.mint);
                return;
            }
        }

        let session = Session {
            mint: creation.mint.clone(),
            name: creation.name.clone(),
            bonding_curve: creation.bonding_curve.clone(),
            owner: creation.user.clone(),
            creator: creator.clone(),
            cfg: self.cfg.clone(),
            engine: self.engine.clone(),
            executor: self.executor.clone(),
            blacklist: self.blacklist.clone(),
            reports: self.reports.clone(),
            wallet_lamports: self.wallet_lamports.clone(),
            open_positions: self.open_positions.clone(),
            active_sessions: self.active_sessions.clone(),
            cancel: self.cancel.child_token(),
        };
        tokio::spawn(session.run());
    }
}

/// Rebuild the leaderboard now and then every configured interval,
/// deferring while any session holds a position.
async fn refresh_loop(app: Arc<App>) {
    let interval = Duration::from_secs(app.cfg.leaderboard_update_interval_mins * 60);

    loop {
        if app.cancel.is_cancelled() {
            break;
        }
        if app.open_positions.load(Ordering::SeqCst) > 0 {
            tokio::select! {
                _ = app.cancel.cancelled() => break,
                _ = sleep(REFRESH_DEFER_DELAY) => {}
            }
            continue;
        }

        app.updating.store(true, Ordering::SeqCst);
        app.blacklist.reload().await;
        log::info!("🔄 Starting leaderboard update...");

        // The table scan and median crunching are CPU-bound; keep them off
        // the scheduler threads.
        let analyzer = app.analyzer.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut analyzer = analyzer.blocking_lock();
            analyzer.analyze_market()?;
            Ok::<Leaderboard, crate::store::StoreError>(analyzer.build_leaderboard())
        })
        .await;

        match result {
            Ok(Ok(board)) => {
                log::info!("✅ Leaderboard updated: {} creators qualify", board.len());
                if let Err(e) = app.reports.write_leaderboard(&board) {
                    log::error!("❌ Failed to write leaderboard file: {}", e);
                }
                *app.leaderboard.write().await = Some(Arc::new(board));
            }
            Ok(Err(e)) => log::error!("❌ Leaderboard update failed: {}", e),
            Err(e) => log::error!("❌ Leaderboard task panicked: {}", e),
        }
        app.updating.store(false, Ordering::SeqCst);

        tokio::select! {
            _ = app.cancel.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }
}
