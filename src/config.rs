use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub pair_state: PairStateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Venues to build at startup
    #[serde(default)]
    pub exchanges: Vec<ExchangeConfig>,
    /// Managed pairs with capital and watchdog policies
    #[serde(default)]
    pub pairs: Vec<PairConfig>,
}

/// Timer intervals of the three periodic tasks
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Reconciliation tick interval in milliseconds
    #[serde(default = "default_pair_state_interval")]
    pub pair_state_interval_ms: u64,
    /// Watchdog tick interval in milliseconds
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_ms: u64,
    /// Resting-order price maintenance interval in milliseconds
    #[serde(default = "default_price_adjust_interval")]
    pub price_adjust_interval_ms: u64,
    /// Position polling interval in milliseconds
    #[serde(default = "default_position_watch_interval")]
    pub position_watch_interval_ms: u64,
    /// A reconciliation pass running longer than this is reported as stuck
    #[serde(default = "default_tick_block_threshold")]
    pub tick_block_threshold_secs: u64,
}

fn default_pair_state_interval() -> u64 {
    1_000
}

fn default_watchdog_interval() -> u64 {
    30_000
}

fn default_price_adjust_interval() -> u64 {
    3_000
}

fn default_position_watch_interval() -> u64 {
    5_000
}

fn default_tick_block_threshold() -> u64 {
    120
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pair_state_interval_ms: default_pair_state_interval(),
            watchdog_interval_ms: default_watchdog_interval(),
            price_adjust_interval_ms: default_price_adjust_interval(),
            position_watch_interval_ms: default_position_watch_interval(),
            tick_block_threshold_secs: default_tick_block_threshold(),
        }
    }
}

/// Order submission and maintenance settings
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Resubmissions after a retryable venue rejection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed backoff between resubmissions in milliseconds
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// How long an order stays locked while its price is being adjusted
    #[serde(default = "default_adjust_lock_ttl")]
    pub adjust_lock_ttl_secs: u64,
    /// Tickers older than this are ignored by price adjustment
    #[serde(default = "default_ticker_max_age")]
    pub ticker_max_age_ms: i64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    1_500
}

fn default_adjust_lock_ttl() -> u64 {
    60
}

fn default_ticker_max_age() -> i64 {
    10_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            adjust_lock_ttl_secs: default_adjust_lock_ttl(),
            ticker_max_age_ms: default_ticker_max_age(),
        }
    }
}

/// Safety nets of the reconciliation loop
#[derive(Debug, Clone, Deserialize)]
pub struct PairStateConfig {
    /// A pair with more retries than this is canceled
    #[serde(default = "default_pair_max_retries")]
    pub max_retries: u32,
    /// A desired state older than this is canceled
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: i64,
}

fn default_pair_max_retries() -> u32 {
    10
}

fn default_timeout_minutes() -> i64 {
    60
}

impl Default for PairStateConfig {
    fn default() -> Self {
        Self {
            max_retries: default_pair_max_retries(),
            timeout_minutes: default_timeout_minutes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for the daily rolling log file
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

/// Tick and lot size of one symbol
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SymbolSpec {
    pub tick_size: Decimal,
    pub lot_size: Decimal,
}

/// Dry-run venue definition
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,
    #[serde(default = "default_lot_size")]
    pub lot_size: Decimal,
    /// Per-symbol overrides of tick and lot size
    #[serde(default)]
    pub symbols: HashMap<String, SymbolSpec>,
}

fn default_tick_size() -> Decimal {
    Decimal::new(1, 2)
}

fn default_lot_size() -> Decimal {
    Decimal::new(1, 4)
}

impl ExchangeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tick_size: default_tick_size(),
            lot_size: default_lot_size(),
            symbols: HashMap::new(),
        }
    }

    pub fn symbol_spec(&self, symbol: &str) -> SymbolSpec {
        self.symbols.get(symbol).copied().unwrap_or(SymbolSpec {
            tick_size: self.tick_size,
            lot_size: self.lot_size,
        })
    }
}

/// Watchdog policy attached to a pair
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum WatchdogPolicy {
    /// Keep a stop order `percent` away from the entry
    Stoploss { percent: Decimal },
    /// Keep a stop and a take-profit order around the entry
    RiskRewardRatio {
        target_percent: Decimal,
        stop_percent: Decimal,
    },
    /// Close the position once the loss against the ticker reaches `stop` percent
    StoplossWatch { stop: Decimal },
}

impl WatchdogPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            WatchdogPolicy::Stoploss { .. } => "stoploss",
            WatchdogPolicy::RiskRewardRatio { .. } => "risk_reward_ratio",
            WatchdogPolicy::StoplossWatch { .. } => "stoploss_watch",
        }
    }
}

/// One managed pair
#[derive(Debug, Clone, Deserialize)]
pub struct PairConfig {
    pub exchange: String,
    pub symbol: String,
    /// Order size in the base asset
    #[serde(default)]
    pub capital: Option<Decimal>,
    /// Order size in the quote currency, converted with the ticker
    #[serde(default)]
    pub capital_currency: Option<Decimal>,
    #[serde(default)]
    pub watchdogs: Vec<WatchdogPolicy>,
}

impl PairConfig {
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            capital: None,
            capital_currency: None,
            watchdogs: Vec::new(),
        }
    }

    pub fn with_capital(mut self, capital: Decimal) -> Self {
        self.capital = Some(capital);
        self
    }

    pub fn with_capital_currency(mut self, capital_currency: Decimal) -> Self {
        self.capital_currency = Some(capital_currency);
        self
    }

    pub fn with_watchdog(mut self, policy: WatchdogPolicy) -> Self {
        self.watchdogs.push(policy);
        self
    }
}

/// Lookup over the configured pairs
#[derive(Debug, Clone, Default)]
pub struct PairsConfig {
    pairs: Vec<PairConfig>,
}

impl PairsConfig {
    pub fn new(pairs: Vec<PairConfig>) -> Self {
        Self { pairs }
    }

    pub fn find(&self, exchange: &str, symbol: &str) -> Option<&PairConfig> {
        self.pairs
            .iter()
            .find(|p| p.exchange == exchange && p.symbol == symbol)
    }

    /// Watchdog policies of a pair; empty when the pair is unknown
    pub fn watchdogs(&self, exchange: &str, symbol: &str) -> &[WatchdogPolicy] {
        self.find(exchange, symbol)
            .map(|p| p.watchdogs.as_slice())
            .unwrap_or(&[])
    }

    pub fn all(&self) -> &[PairConfig] {
        &self.pairs
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("PAIRSYNC_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (PAIRSYNC__EXECUTION__MAX_RETRIES, etc.)
            .add_source(
                Environment::with_prefix("PAIRSYNC")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn pairs_config(&self) -> PairsConfig {
        PairsConfig::new(self.pairs.clone())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.engine.pair_state_interval_ms == 0
            || self.engine.watchdog_interval_ms == 0
            || self.engine.price_adjust_interval_ms == 0
            || self.engine.position_watch_interval_ms == 0
        {
            errors.push("engine intervals must be positive".to_string());
        }

        if self.pair_state.timeout_minutes <= 0 {
            errors.push("pair_state.timeout_minutes must be positive".to_string());
        }

        for exchange in &self.exchanges {
            if exchange.tick_size <= Decimal::ZERO || exchange.lot_size <= Decimal::ZERO {
                errors.push(format!("exchange {}: tick and lot size must be positive", exchange.name));
            }
        }

        for pair in &self.pairs {
            if !self.exchanges.iter().any(|e| e.name == pair.exchange) {
                errors.push(format!(
                    "pair {}:{} references unknown exchange",
                    pair.exchange, pair.symbol
                ));
            }

            for policy in &pair.watchdogs {
                let invalid = match policy {
                    WatchdogPolicy::Stoploss { percent } => *percent <= Decimal::ZERO,
                    WatchdogPolicy::RiskRewardRatio {
                        target_percent,
                        stop_percent,
                    } => *target_percent <= Decimal::ZERO || *stop_percent <= Decimal::ZERO,
                    WatchdogPolicy::StoplossWatch { stop } => *stop <= Decimal::ZERO,
                };

                if invalid {
                    errors.push(format!(
                        "pair {}:{} watchdog {} needs positive percentages",
                        pair.exchange,
                        pair.symbol,
                        policy.name()
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
