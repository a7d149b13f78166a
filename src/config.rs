//! Runtime configuration from environment variables
//!
//! Every tunable of the agent lives here. Numeric variables fall back to
//! their defaults with a warning when unparsable; only the websocket URL is
//! required, everything else has a sensible default for a paper run.

use rust_decimal::Decimal;
use std::env;

/// Bonding-curve launchpad program observed by the log subscription.
pub const LAUNCHPAD_PROGRAM: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

/// Fixed token supply minted by the launchpad (1B, 6 decimals).
pub const TOTAL_SUPPLY: u64 = 1_000_000_000;

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Agent configuration.
///
/// Percent-valued knobs (ladder step, thresholds, slippage) and USD amounts
/// are `Decimal` so they compare exactly against computed price changes.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Websocket endpoint for the `logsSubscribe` stream (required).
    pub ws_url: String,

    /// SQLite database path.
    pub db_path: String,

    /// Our wallet address, as it appears in the holder ledger.
    pub wallet_address: String,

    /// Bounded queue size between the log source and the dispatcher.
    pub channel_buffer: usize,

    // Creator gates
    pub total_swaps_above_2_mints: u64,
    pub total_swaps_1_mint: u64,
    pub median_peak_mc_above_2_mints: f64,
    pub median_peak_mc_1_mint: f64,

    // Mint-success classification
    pub highest_price_min_swaps: usize,
    pub snipe_price_to_peak_price_ratio: Decimal,
    pub trust_factor_ratio: f64,
    /// Seconds after the first transaction at which the snipe price samples.
    pub sniping_price_time: f64,

    // Trading amounts
    pub amount_buy_tl_1: Decimal,
    pub amount_buy_tl_2: Decimal,
    pub buy_fee_usd: Decimal,
    pub sell_fee_usd: Decimal,
    pub slippage_amount: Decimal,

    // Profit ladder
    pub price_step_units: Decimal,
    pub profit_margin: Decimal,
    pub price_trend_weight: Decimal,
    pub tx_momentum_weight: Decimal,
    pub increment_threshold: Decimal,
    pub increment_cooldown_secs: f64,
    pub decrement_threshold: Decimal,

    // Session exits
    pub drop_time_secs: f64,
    pub stagnant_under_price_secs: f64,

    /// Minutes between leaderboard refreshes.
    pub leaderboard_update_interval_mins: u64,

    /// Only one session may hold a position at a time.
    pub single_position: bool,

    /// Fallback SOL/USD when the quote endpoint is unreachable.
    pub sol_price_fallback: Decimal,

    // Output files
    pub results_path: String,
    pub leaderboard_path: String,
    pub blacklist_path: String,
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                log::warn!("Invalid {} '{}', using default {}", key, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

impl Settings {
    /// Load settings from the environment.
    ///
    /// `WS_URL` is the only hard requirement; it must be a `ws://` or
    /// `wss://` endpoint.
    pub fn from_env() -> Result<Self, ConfigError> {
        let ws_url = env::var("WS_URL")
            .map_err(|_| ConfigError::MissingVariable("WS_URL".to_string()))?;

        if !ws_url.starts_with("ws://") && !ws_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "WS_URL must start with ws:// or wss://".to_string(),
            ));
        }

        Ok(Self {
            ws_url,
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "mintflow.db".to_string()),
            wallet_address: env::var("WALLET_ADDRESS").unwrap_or_default(),
            channel_buffer: env_parse("CHANNEL_BUFFER", 10_000),

            total_swaps_above_2_mints: env_parse("TOTAL_SWAPS_ABOVE_2_MINTS", 5),
            total_swaps_1_mint: env_parse("TOTAL_SWAPS_1_MINT", 5),
            median_peak_mc_above_2_mints: env_parse("MEDIAN_PEAK_MC_ABOVE_2_MINTS", 7_500.0),
            median_peak_mc_1_mint: env_parse("MEDIAN_PEAK_MC_1_MINT", 7_000.0),

            highest_price_min_swaps: env_parse("HIGHEST_PRICE_MIN_SWAPS", 25),
            snipe_price_to_peak_price_ratio: env_parse(
                "SNIPE_PRICE_TO_PEAK_PRICE_RATIO",
                Decimal::new(15, 1),
            ),
            trust_factor_ratio: env_parse("TRUST_FACTOR_RATIO", 0.5),
            sniping_price_time: env_parse("SNIPING_PRICE_TIME", 1.0),

            amount_buy_tl_1: env_parse("AMOUNT_BUY_TL_1", Decimal::new(10, 0)),
            amount_buy_tl_2: env_parse("AMOUNT_BUY_TL_2", Decimal::new(25, 0)),
            buy_fee_usd: env_parse("BUY_FEE", Decimal::new(1, 1)),
            sell_fee_usd: env_parse("SELL_FEE", Decimal::new(1, 1)),
            slippage_amount: env_parse("SLIPPAGE_AMOUNT", Decimal::new(25, 2)),

            price_step_units: env_parse("PRICE_STEP_UNITS", Decimal::new(10, 0)),
            profit_margin: env_parse("PROFIT_MARGIN", Decimal::new(8, 1)),
            price_trend_weight: env_parse("PRICE_TREND_WEIGHT", Decimal::new(6, 1)),
            tx_momentum_weight: env_parse("TX_MOMENTUM_WEIGHT", Decimal::new(4, 1)),
            increment_threshold: env_parse("INCREMENT_THRESHOLD", Decimal::new(25, 0)),
            increment_cooldown_secs: env_parse("INCREMENT_COOLDOWN", 5.0),
            decrement_threshold: env_parse("DECREMENT_THRESHOLD", Decimal::new(10, 0)),

            drop_time_secs: env_parse("DROP_TIME", 15.0),
            stagnant_under_price_secs: env_parse("STAGNANT_UNDER_PRICE", 13.0),

            leaderboard_update_interval_mins: env_parse("LEADERBOARD_UPDATE_INTERVAL", 30),

            single_position: env_parse("SINGLE_POSITION", true),

            sol_price_fallback: env_parse("SOL_PRICE_FALLBACK", Decimal::new(21011, 2)),

            results_path: env::var("RESULTS_PATH").unwrap_or_else(|_| "results.txt".to_string()),
            leaderboard_path: env::var("LEADERBOARD_PATH")
                .unwrap_or_else(|_| "leaderboard.txt".to_string()),
            blacklist_path: env::var("BLACKLIST_PATH")
                .unwrap_or_else(|_| "blacklist.txt".to_string()),
        })
    }
}

#[cfg(test)]
impl Settings {
    /// Fixed settings for unit tests, independent of the environment.
    pub fn test_defaults() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8900".to_string(),
            db_path: ":memory:".to_string(),
            wallet_address: "test-wallet".to_string(),
            channel_buffer: 100,
            total_swaps_above_2_mints: 5,
            total_swaps_1_mint: 5,
            median_peak_mc_above_2_mints: 7_500.0,
            median_peak_mc_1_mint: 7_000.0,
            highest_price_min_swaps: 25,
            snipe_price_to_peak_price_ratio: Decimal::new(15, 1),
            trust_factor_ratio: 0.5,
            sniping_price_time: 1.0,
            amount_buy_tl_1: Decimal::new(10, 0),
            amount_buy_tl_2: Decimal::new(25, 0),
            buy_fee_usd: Decimal::new(1, 1),
            sell_fee_usd: Decimal::new(1, 1),
            slippage_amount: Decimal::new(25, 2),
            price_step_units: Decimal::new(10, 0),
            profit_margin: Decimal::new(8, 1),
            price_trend_weight: Decimal::new(6, 1),
            tx_momentum_weight: Decimal::new(4, 1),
            increment_threshold: Decimal::new(25, 0),
            increment_cooldown_secs: 5.0,
            decrement_threshold: Decimal::new(10, 0),
            drop_time_secs: 15.0,
            stagnant_under_price_secs: 13.0,
            leaderboard_update_interval_mins: 30,
            single_position: true,
            sol_price_fallback: Decimal::new(21011, 2),
            results_path: "results.txt".to_string(),
            leaderboard_path: "leaderboard.txt".to_string(),
            blacklist_path: "blacklist.txt".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // The tests mutate shared process environment; serialize them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_requires_ws_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("WS_URL");
        assert!(matches!(
            Settings::from_env(),
            Err(ConfigError::MissingVariable(_))
        ));
    }

    #[test]
    fn test_rejects_non_websocket_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("WS_URL", "https://example.com");
        assert!(matches!(
            Settings::from_env(),
            Err(ConfigError::InvalidValue(_))
        ));
        env::remove_var("WS_URL");
    }

    #[test]
    fn test_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("WS_URL", "wss://example.com");
        env::remove_var("PRICE_STEP_UNITS");
        env::remove_var("DROP_TIME");

        let cfg = Settings::from_env().unwrap();
        assert_eq!(cfg.price_step_units, Decimal::new(10, 0));
        assert_eq!(cfg.drop_time_secs, 15.0);
        assert_eq!(cfg.highest_price_min_swaps, 25);
        assert!(cfg.single_position);

        env::remove_var("WS_URL");
    }
}
