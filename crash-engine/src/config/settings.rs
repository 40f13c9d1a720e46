//! Settings structs and loading logic.
//!
//! All settings have sensible defaults and can be overridden via
//! environment variables or configuration files.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Ethereum RPC configuration.
    pub rpc: RpcSettings,
    /// Database configuration.
    pub database: DatabaseSettings,
    /// API server configuration.
    pub api: ApiSettings,
    /// In-memory cache configuration.
    pub cache: CacheSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Metrics configuration.
    pub metrics: MetricsSettings,
    /// Game/engine tuning constants.
    pub game: GameSettings,
    /// Hot and house wallet addresses.
    pub wallets: WalletAddresses,
}

impl Settings {
    /// Load settings from configuration files and environment variables.
    ///
    /// Files are loaded in this order (later overrides earlier):
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (if exists)
    /// 3. Environment variables with `CRASH__` prefix
    ///
    /// # Arguments
    /// * `environment` - Environment name (e.g., "development", "production")
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration is invalid or cannot be loaded.
    pub fn load(environment: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("rpc.url", "http://localhost:8545")?
            .set_default("rpc.ws_url", "ws://localhost:8546")?
            .set_default("rpc.chain_id", 1)?
            .set_default("rpc.poll_interval_ms", 2000)?
            .set_default("rpc.max_retries", 3)?
            .set_default("rpc.retry_delay_ms", 1000)?
            .set_default("rpc.request_timeout_ms", 30000)?
            .set_default("rpc.batch_size", 200)?
            .set_default("database.url", "postgres://localhost/crash_engine")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout_ms", 5000)?
            .set_default("database.idle_timeout_ms", 600_000)?
            .set_default("api.host", "0.0.0.0")?
            .set_default("api.port", 8080)?
            .set_default("api.cors_origins", vec!["http://localhost:5173"])?
            .set_default("api.request_timeout_ms", 5000)?
            .set_default("api.websocket.max_connections", 10000)?
            .set_default("api.websocket.ping_interval_ms", 30000)?
            .set_default("api.websocket.pong_timeout_ms", 10000)?
            .set_default("api.rate_limit.requests_per_second", 100)?
            .set_default("api.rate_limit.burst_size", 200)?
            .set_default("cache.account_ttl_ms", 10000)?
            .set_default("cache.account_max_capacity", 50_000)?
            .set_default("cache.total_liabilities_ttl_ms", 5000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("logging.file_path", Option::<String>::None)?
            .set_default("metrics.enabled", true)?
            .set_default("metrics.host", "0.0.0.0")?
            .set_default("metrics.port", 9090)?
            // Game constants - see spec §6
            .set_default("game.betting_duration_ms", 15000)?
            .set_default("game.cashout_duration_ms", 3000)?
            .set_default("game.max_crash", 1000.0)?
            .set_default("game.house_edge_divisor", 33)?
            .set_default("game.min_bet_wei", "100000000000000")? // 0.0001 ETH
            .set_default("game.max_bet_wei", "1000000000000000000")? // 1 ETH
            .set_default("game.bet_cooldown_ms", 1000)?
            .set_default("game.max_bets_per_round", 10000)?
            .set_default("game.max_liability_ratio", 0.8)?
            .set_default("game.emergency_threshold", 0.95)?
            .set_default("game.min_reserve_wei", "5000000000000000000")? // 5 ETH
            .set_default("game.confirmations", 12)?
            .set_default("game.reorg_buffer", 25)?
            .set_default("game.cashout_buffer_ms", 24)?
            .set_default("game.resync_window_ms", 300_000)?
            .set_default("game.ledger_max_retries", 5)?
            .set_default("game.scan_batch", 200)?
            .set_default("game.request_timeout_ms", 5000)?
            .set_default("game.chain_degraded_timeout_ms", 30000)?
            .set_default("game.indexer_lag_ceiling_blocks", 100)?
            // Wallet addresses - these MUST be set in production config
            .set_default(
                "wallets.hot_wallet_address",
                "0x0000000000000000000000000000000000000001",
            )?
            .set_default(
                "wallets.house_wallet_address",
                "0x0000000000000000000000000000000000000002",
            )?
            // Load default configuration file
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            // Load environment-specific file
            .add_source(File::with_name(&format!("{config_dir}/{environment}")).required(false))
            // Override with environment variables (CRASH_ prefix)
            .add_source(
                Environment::with_prefix("CRASH")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load settings from a specific file path.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    /// Validate settings and return any validation errors.
    ///
    /// # Errors
    /// Returns a list of validation error messages.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // RPC validation
        if self.rpc.url.is_empty() {
            errors.push("rpc.url cannot be empty".into());
        }
        if self.rpc.chain_id == 0 {
            errors.push("rpc.chain_id must be non-zero".into());
        }
        if self.rpc.batch_size == 0 {
            errors.push("rpc.batch_size must be non-zero".into());
        }

        // Database validation
        if self.database.url.is_empty() {
            errors.push("database.url cannot be empty".into());
        }
        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be non-zero".into());
        }
        if self.database.min_connections > self.database.max_connections {
            errors.push("database.min_connections cannot exceed max_connections".into());
        }

        // API validation
        if self.api.port == 0 {
            errors.push("api.port must be non-zero".into());
        }
        if self.api.rate_limit.requests_per_second == 0 {
            errors.push("api.rate_limit.requests_per_second must be non-zero".into());
        }

        // Cache validation
        if self.cache.account_max_capacity == 0 {
            errors.push("cache.account_max_capacity must be non-zero".into());
        }

        // Game validation
        if self.game.min_bet_wei >= self.game.max_bet_wei {
            errors.push("game.min_bet_wei must be less than game.max_bet_wei".into());
        }
        if self.game.max_crash < 1.0 {
            errors.push("game.max_crash must be >= 1.0".into());
        }
        if self.game.house_edge_divisor == 0 {
            errors.push("game.house_edge_divisor must be non-zero".into());
        }
        if !(0.0..=1.0).contains(&self.game.max_liability_ratio) {
            errors.push("game.max_liability_ratio must be in [0, 1]".into());
        }
        if self.game.emergency_threshold < self.game.max_liability_ratio {
            errors.push("game.emergency_threshold must be >= game.max_liability_ratio".into());
        }
        if self.game.ledger_max_retries == 0 {
            errors.push("game.ledger_max_retries must be non-zero".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Ethereum RPC configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcSettings {
    /// HTTP RPC endpoint URL.
    pub url: String,
    /// WebSocket RPC endpoint URL (for subscriptions).
    pub ws_url: String,
    /// Chain ID (for validation).
    pub chain_id: u64,
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum retry attempts for failed requests.
    pub max_retries: u32,
    /// Delay between retries in milliseconds.
    pub retry_delay_ms: u64,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Number of logs to fetch per request.
    pub batch_size: u64,
}

impl RpcSettings {
    /// Get the polling interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get the retry delay as a `Duration`.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum connections in the pool.
    pub max_connections: u32,
    /// Minimum connections to maintain.
    pub min_connections: u32,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Idle connection timeout in milliseconds.
    pub idle_timeout_ms: u64,
}

impl DatabaseSettings {
    /// Get the connection timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// API server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// WebSocket settings.
    pub websocket: WebSocketSettings,
    /// Rate limiting settings.
    pub rate_limit: RateLimitSettings,
}

impl ApiSettings {
    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get the socket address string.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Ping interval in milliseconds.
    pub ping_interval_ms: u64,
    /// Pong timeout in milliseconds.
    pub pong_timeout_ms: u64,
}

impl WebSocketSettings {
    /// Get the ping interval as a `Duration`.
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Get the pong timeout as a `Duration`.
    #[must_use]
    pub const fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Maximum requests per second per client.
    pub requests_per_second: u32,
    /// Burst size (allows temporary spikes).
    pub burst_size: u32,
}

/// In-memory cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// TTL for account cache entries in milliseconds.
    pub account_ttl_ms: u64,
    /// Maximum capacity for the account cache.
    pub account_max_capacity: u64,
    /// TTL for the cached total-liabilities aggregate in milliseconds.
    pub total_liabilities_ttl_ms: u64,
}

impl CacheSettings {
    /// Get the account cache TTL as a `Duration`.
    #[must_use]
    pub const fn account_ttl(&self) -> Duration {
        Duration::from_millis(self.account_ttl_ms)
    }

    /// Get the total-liabilities cache TTL as a `Duration`.
    #[must_use]
    pub const fn total_liabilities_ttl(&self) -> Duration {
        Duration::from_millis(self.total_liabilities_ttl_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (json, pretty).
    pub format: String,
    /// Optional file path for log output.
    pub file_path: Option<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// Whether metrics are enabled.
    pub enabled: bool,
    /// Host to bind metrics server to.
    pub host: String,
    /// Port for metrics server.
    pub port: u16,
}

impl MetricsSettings {
    /// Get the metrics socket address string.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Game/engine tuning constants, covering every value named in the external
/// interfaces section of the specification.
#[derive(Debug, Clone, Deserialize)]
pub struct GameSettings {
    /// Duration of the betting phase in milliseconds.
    pub betting_duration_ms: u64,
    /// Duration of the cashout phase in milliseconds.
    pub cashout_duration_ms: u64,
    /// Maximum crash multiplier, as a float (displayed to 2 decimals).
    pub max_crash: f64,
    /// Divisor for the instant-crash probability (`1/divisor`).
    pub house_edge_divisor: u64,
    /// Minimum bet size in wei, serialized as a decimal string (fits in `U256`).
    #[serde(with = "wei_as_string")]
    pub min_bet_wei: crate::types::primitives::Wei,
    /// Maximum bet size in wei.
    #[serde(with = "wei_as_string")]
    pub max_bet_wei: crate::types::primitives::Wei,
    /// Minimum time between bets from the same user, in milliseconds.
    pub bet_cooldown_ms: u64,
    /// Maximum number of bets accepted in a single round.
    pub max_bets_per_round: u32,
    /// Maximum ratio of aggregate liability to hot-wallet reserves.
    pub max_liability_ratio: f64,
    /// Ratio above which emergency mode is tripped.
    pub emergency_threshold: f64,
    /// Minimum hot-wallet reserve, below which a top-up is triggered.
    #[serde(with = "wei_as_string")]
    pub min_reserve_wei: crate::types::primitives::Wei,
    /// Number of confirmations required before a deposit is credited.
    pub confirmations: u64,
    /// Number of blocks to re-scan on every pass, covering shallow reorgs.
    pub reorg_buffer: u64,
    /// Epsilon buffer (in milliseconds-equivalent) added to the crash compare.
    pub cashout_buffer_ms: u64,
    /// Minimum retention window for the event fan-out's resume buffer.
    pub resync_window_ms: u64,
    /// Maximum optimistic-concurrency retries before surfacing `CONTENTION`.
    pub ledger_max_retries: u32,
    /// Number of blocks scanned per indexer batch.
    pub scan_batch: u64,
    /// Maximum time a request-style call blocks before returning `TIMEOUT`.
    pub request_timeout_ms: u64,
    /// Time a degraded chain connection is tolerated before `CHAIN_UNAVAILABLE`
    /// is surfaced.
    pub chain_degraded_timeout_ms: u64,
    /// Maximum tolerated `tip - checkpoint` lag, in blocks, before health
    /// reports the indexer as unhealthy.
    pub indexer_lag_ceiling_blocks: u64,
}

impl GameSettings {
    /// Betting phase duration as a `Duration`.
    #[must_use]
    pub const fn betting_duration(&self) -> Duration {
        Duration::from_millis(self.betting_duration_ms)
    }

    /// Cashout phase duration as a `Duration`.
    #[must_use]
    pub const fn cashout_duration(&self) -> Duration {
        Duration::from_millis(self.cashout_duration_ms)
    }

    /// Bet cooldown as a `Duration`.
    #[must_use]
    pub const fn bet_cooldown(&self) -> Duration {
        Duration::from_millis(self.bet_cooldown_ms)
    }

    /// Request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Chain-degraded timeout as a `Duration`.
    #[must_use]
    pub const fn chain_degraded_timeout(&self) -> Duration {
        Duration::from_millis(self.chain_degraded_timeout_ms)
    }

    /// Resync window as a `Duration`.
    #[must_use]
    pub const fn resync_window(&self) -> Duration {
        Duration::from_millis(self.resync_window_ms)
    }
}

/// Serializes/deserializes a `Wei` value as a base-10 decimal string, since
/// configuration sources (TOML, env vars) have no native 256-bit integer.
mod wei_as_string {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::types::primitives::Wei;

    pub fn serialize<S: Serializer>(value: &Wei, serializer: S) -> Result<S::Ok, S::Error> {
        value.as_u256().to_string().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Wei, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Wei::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Hot and house wallet addresses.
///
/// The hot wallet is the account deposits are scanned against and payouts
/// are sent from; the house wallet is the cold backstop that tops up the
/// hot wallet when its reserves fall below `min_reserve_wei`.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletAddresses {
    /// The wallet deposits are credited against and payouts are sent from.
    pub hot_wallet_address: String,
    /// The backstop wallet that tops up the hot wallet.
    pub house_wallet_address: String,
}

impl WalletAddresses {
    /// Parse the hot wallet address.
    ///
    /// # Errors
    /// Returns an error if the address is malformed.
    pub fn hot_wallet(&self) -> Result<crate::types::primitives::EthAddress, String> {
        crate::types::primitives::EthAddress::from_hex(&self.hot_wallet_address)
            .map_err(|e| format!("invalid wallets.hot_wallet_address: {e}"))
    }

    /// Parse the house wallet address.
    ///
    /// # Errors
    /// Returns an error if the address is malformed.
    pub fn house_wallet(&self) -> Result<crate::types::primitives::EthAddress, String> {
        crate::types::primitives::EthAddress::from_hex(&self.house_wallet_address)
            .map_err(|e| format!("invalid wallets.house_wallet_address: {e}"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use crate::types::primitives::Wei;

    use super::*;

    #[test]
    fn rpc_durations() {
        let rpc = RpcSettings {
            url: "http://localhost:8545".into(),
            ws_url: "ws://localhost:8546".into(),
            chain_id: 1,
            poll_interval_ms: 1000,
            max_retries: 3,
            retry_delay_ms: 500,
            request_timeout_ms: 30000,
            batch_size: 100,
        };

        assert_eq!(rpc.poll_interval(), Duration::from_millis(1000));
        assert_eq!(rpc.retry_delay(), Duration::from_millis(500));
        assert_eq!(rpc.request_timeout(), Duration::from_millis(30000));
    }

    #[test]
    fn api_socket_addr() {
        let api = ApiSettings {
            host: "127.0.0.1".into(),
            port: 8080,
            cors_origins: vec![],
            request_timeout_ms: 30000,
            websocket: WebSocketSettings {
                max_connections: 1000,
                ping_interval_ms: 30000,
                pong_timeout_ms: 10000,
            },
            rate_limit: RateLimitSettings {
                requests_per_second: 100,
                burst_size: 200,
            },
        };

        assert_eq!(api.socket_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn validation_catches_zero_connections() {
        let mut settings = create_valid_settings();
        settings.database.max_connections = 0;

        let result = settings.validate();
        assert!(result.is_err());
        let errors = result.unwrap_err();
        assert!(errors.iter().any(|e| e.contains("max_connections")));
    }

    #[test]
    fn validation_catches_min_exceeds_max() {
        let mut settings = create_valid_settings();
        settings.database.min_connections = 20;
        settings.database.max_connections = 10;

        let result = settings.validate();
        assert!(result.is_err());
        let errors = result.unwrap_err();
        assert!(errors.iter().any(|e| e.contains("min_connections")));
    }

    #[test]
    fn validation_catches_inverted_bet_range() {
        let mut settings = create_valid_settings();
        settings.game.min_bet_wei = Wei::from_u128(1_000_000);
        settings.game.max_bet_wei = Wei::from_u128(1_000);

        let result = settings.validate();
        assert!(result.is_err());
        let errors = result.unwrap_err();
        assert!(errors.iter().any(|e| e.contains("min_bet_wei")));
    }

    #[test]
    fn validation_catches_emergency_below_max_ratio() {
        let mut settings = create_valid_settings();
        settings.game.max_liability_ratio = 0.9;
        settings.game.emergency_threshold = 0.8;

        let result = settings.validate();
        assert!(result.is_err());
    }

    fn create_valid_settings() -> Settings {
        Settings {
            rpc: RpcSettings {
                url: "http://localhost:8545".into(),
                ws_url: "ws://localhost:8546".into(),
                chain_id: 1,
                poll_interval_ms: 2000,
                max_retries: 3,
                retry_delay_ms: 1000,
                request_timeout_ms: 30000,
                batch_size: 200,
            },
            database: DatabaseSettings {
                url: "postgres://localhost/test".into(),
                max_connections: 10,
                min_connections: 1,
                connect_timeout_ms: 5000,
                idle_timeout_ms: 600_000,
            },
            api: ApiSettings {
                host: "0.0.0.0".into(),
                port: 8080,
                cors_origins: vec![],
                request_timeout_ms: 5000,
                websocket: WebSocketSettings {
                    max_connections: 10000,
                    ping_interval_ms: 30000,
                    pong_timeout_ms: 10000,
                },
                rate_limit: RateLimitSettings {
                    requests_per_second: 100,
                    burst_size: 200,
                },
            },
            cache: CacheSettings {
                account_ttl_ms: 10000,
                account_max_capacity: 50_000,
                total_liabilities_ttl_ms: 5000,
            },
            logging: LoggingSettings {
                level: "info".into(),
                format: "json".into(),
                file_path: None,
            },
            metrics: MetricsSettings {
                enabled: true,
                host: "0.0.0.0".into(),
                port: 9090,
            },
            game: GameSettings {
                betting_duration_ms: 15000,
                cashout_duration_ms: 3000,
                max_crash: 1000.0,
                house_edge_divisor: 33,
                min_bet_wei: Wei::from_u128(100_000_000_000_000),
                max_bet_wei: Wei::from_u128(1_000_000_000_000_000_000),
                bet_cooldown_ms: 1000,
                max_bets_per_round: 10000,
                max_liability_ratio: 0.8,
                emergency_threshold: 0.95,
                min_reserve_wei: Wei::from_u128(5_000_000_000_000_000_000),
                confirmations: 12,
                reorg_buffer: 25,
                cashout_buffer_ms: 24,
                resync_window_ms: 300_000,
                ledger_max_retries: 5,
                scan_batch: 200,
                request_timeout_ms: 5000,
                chain_degraded_timeout_ms: 30000,
                indexer_lag_ceiling_blocks: 100,
            },
            wallets: WalletAddresses {
                hot_wallet_address: "0x0000000000000000000000000000000000000001".into(),
                house_wallet_address: "0x0000000000000000000000000000000000000002".into(),
            },
        }
    }
}
