use mintflow::app::App;
use mintflow::config::Settings;
use mintflow::store::Store;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("🚀 Starting mintflow...");

    // Missing or malformed startup configuration is the only fatal path.
    let cfg = Arc::new(Settings::from_env()?);
    log::info!("📊 Configuration:");
    log::info!("   WS_URL: {}", cfg.ws_url);
    log::info!("   DB_PATH: {}", cfg.db_path);
    log::info!(
        "   Leaderboard refresh: every {} min",
        cfg.leaderboard_update_interval_mins
    );

    let store = Store::open(&cfg.db_path)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("⚠️  Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    let app = App::new(cfg, store, cancel);
    app.run().await;

    log::info!("Shutdown complete");
    Ok(())
}
