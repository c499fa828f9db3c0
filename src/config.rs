//! Configuration module for the depth recorder

use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::{RecorderError, Result};

const DEFAULT_CONFIG_FILE: &str = "depth-recorder.toml";

/// How an exchange delivers order books
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Pushes full books over a websocket
    Streaming,
    /// Needs an explicit, rate-limited request per book
    Polling,
}

/// One exchange to watch
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Human readable name, also the key for order book limit overrides
    pub name: String,
    pub kind: SourceKind,
    /// WebSocket base for streaming sources, REST base for polling ones
    pub endpoint: String,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Markets to watch on every exchange (e.g., ["BTC/EUR", "ETH/EUR"])
    #[serde(default = "default_markets")]
    pub markets: Vec<String>,

    /// Cumulative-quantity targets per market
    #[serde(default = "default_market_depths")]
    pub market_depths: HashMap<String, Vec<Decimal>>,

    #[serde(default = "default_exchanges")]
    pub exchanges: Vec<ExchangeConfig>,

    /// Order book query limit unless overridden per exchange
    #[serde(default = "default_order_book_limit")]
    pub default_order_book_limit: usize,

    #[serde(default = "default_order_book_limits")]
    pub order_book_limits: HashMap<String, usize>,

    /// Polling throttle
    #[serde(default = "default_min_fetch_interval_secs")]
    pub min_fetch_interval_secs: f64,

    /// Rate limit retry settings
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_initial_delay_secs")]
    pub retry_initial_delay_secs: f64,
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    /// Concurrent blocking fetches across all polling exchanges
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// WebSocket reconnection base delay
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Depth records waiting for the sink; further records are dropped
    #[serde(default = "default_sink_queue_capacity")]
    pub sink_queue_capacity: usize,

    /// IPC socket for depth records; records are only logged when unset
    #[serde(default)]
    pub ipc_socket_path: Option<String>,

    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Status logging interval in seconds
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

fn default_markets() -> Vec<String> {
    ["BTC/GBP", "ETH/GBP", "BTC/EUR", "ETH/EUR"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_market_depths() -> HashMap<String, Vec<Decimal>> {
    let btc = vec![Decimal::new(4, 2)];
    let eth = vec![Decimal::new(5, 1)];
    HashMap::from([
        ("BTC/GBP".to_string(), btc.clone()),
        ("BTC/EUR".to_string(), btc),
        ("ETH/GBP".to_string(), eth.clone()),
        ("ETH/EUR".to_string(), eth),
    ])
}

fn default_exchanges() -> Vec<ExchangeConfig> {
    vec![ExchangeConfig {
        name: "Binance".to_string(),
        kind: SourceKind::Streaming,
        endpoint: "wss://stream.binance.com:9443".to_string(),
    }]
}

fn default_order_book_limit() -> usize {
    200
}

fn default_order_book_limits() -> HashMap<String, usize> {
    HashMap::from([("Bitfinex".to_string(), 100), ("Kraken".to_string(), 500)])
}

fn default_min_fetch_interval_secs() -> f64 {
    2.0
}

fn default_retry_max_attempts() -> u32 {
    10
}

fn default_retry_initial_delay_secs() -> f64 {
    1.0
}

fn default_retry_multiplier() -> f64 {
    1.25
}

fn default_worker_pool_size() -> usize {
    8
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_sink_queue_capacity() -> usize {
    1024
}

fn default_health_port() -> u16 {
    9090
}

fn default_status_interval_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from an optional TOML file overlaid with `RECORDER_*`
    /// environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = env::var("RECORDER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_file(&path)
    }

    /// Load from `path` (missing file allowed) and the environment
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("RECORDER")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("markets"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the watchers cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.markets.is_empty() {
            return Err(RecorderError::ConfigError("no markets configured".into()));
        }
        for market in &self.markets {
            let targets = self.depth_targets(market).ok_or_else(|| {
                RecorderError::ConfigError(format!("no depth targets for market {market}"))
            })?;
            if targets.is_empty() || targets.iter().any(|t| *t <= Decimal::ZERO) {
                return Err(RecorderError::ConfigError(format!(
                    "depth targets for {market} must be positive and non-empty"
                )));
            }
            // 0.5 and 0.50 are the same target
            if let Some(dup) = targets
                .iter()
                .enumerate()
                .find_map(|(i, t)| targets[..i].contains(t).then_some(t))
            {
                return Err(RecorderError::ConfigError(format!(
                    "duplicate depth target {dup} for {market}"
                )));
            }
        }
        if self.worker_pool_size == 0 {
            return Err(RecorderError::ConfigError("worker_pool_size must be > 0".into()));
        }
        if self.retry_max_attempts == 0 {
            return Err(RecorderError::ConfigError("retry_max_attempts must be > 0".into()));
        }
        if !self.retry_multiplier.is_finite() || self.retry_multiplier < 1.0 {
            return Err(RecorderError::ConfigError(
                "retry_multiplier must be a finite number >= 1.0".into(),
            ));
        }
        for (name, secs) in [
            ("min_fetch_interval_secs", self.min_fetch_interval_secs),
            ("retry_initial_delay_secs", self.retry_initial_delay_secs),
        ] {
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(RecorderError::ConfigError(format!(
                    "{name} must be a finite, non-negative number of seconds"
                )));
            }
        }
        if self.sink_queue_capacity == 0 {
            return Err(RecorderError::ConfigError("sink_queue_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// Depth targets for a market.
    ///
    /// Lookups ignore case: file sources come back with lowercased map keys.
    pub fn depth_targets(&self, market: &str) -> Option<&[Decimal]> {
        self.market_depths
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(market))
            .map(|(_, targets)| targets.as_slice())
    }

    /// Order book query limit for an exchange
    pub fn order_book_limit(&self, exchange: &str) -> usize {
        self.order_book_limits
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(exchange))
            .map(|(_, limit)| *limit)
            .unwrap_or(self.default_order_book_limit)
    }

    pub fn min_fetch_interval(&self) -> Duration {
        Duration::from_secs_f64(self.min_fetch_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            markets: default_markets(),
            market_depths: default_market_depths(),
            exchanges: default_exchanges(),
            default_order_book_limit: default_order_book_limit(),
            order_book_limits: default_order_book_limits(),
            min_fetch_interval_secs: default_min_fetch_interval_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_secs: default_retry_initial_delay_secs(),
            retry_multiplier: default_retry_multiplier(),
            worker_pool_size: default_worker_pool_size(),
            request_timeout_secs: default_request_timeout_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            sink_queue_capacity: default_sink_queue_capacity(),
            ipc_socket_path: None,
            health_port: default_health_port(),
            status_interval_secs: default_status_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.depth_targets("BTC/EUR"), Some(&[dec!(0.04)][..]));
        assert_eq!(config.depth_targets("ETH/GBP"), Some(&[dec!(0.5)][..]));
        assert_eq!(config.min_fetch_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_order_book_limit_overrides() {
        let config = Config::default();
        assert_eq!(config.order_book_limit("Bitfinex"), 100);
        assert_eq!(config.order_book_limit("Kraken"), 500);
        assert_eq!(config.order_book_limit("Gemini"), 200);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
markets = ["BTC/USD"]
worker_pool_size = 2

[market_depths]
"BTC/USD" = ["0.04", "1"]

[[exchanges]]
name = "Gemini"
kind = "polling"
endpoint = "https://api.gemini.example/v1"
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.markets, vec!["BTC/USD".to_string()]);
        assert_eq!(config.depth_targets("BTC/USD"), Some(&[dec!(0.04), dec!(1)][..]));
        assert_eq!(config.exchanges.len(), 1);
        assert_eq!(config.exchanges[0].kind, SourceKind::Polling);
        assert_eq!(config.worker_pool_size, 2);
        assert_eq!(config.retry_max_attempts, 10);
    }

    #[test]
    fn test_missing_targets_rejected() {
        let config = Config {
            markets: vec!["DOGE/EUR".to_string()],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(RecorderError::ConfigError(_))));
    }

    #[test]
    fn test_non_positive_target_rejected() {
        let mut config = Config::default();
        config
            .market_depths
            .insert("BTC/GBP".to_string(), vec![dec!(0)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_targets_rejected() {
        let mut config = Config::default();
        config
            .market_depths
            .insert("ETH/EUR".to_string(), vec![dec!(0.5), dec!(1), dec!(0.50)]);
        match config.validate() {
            Err(RecorderError::ConfigError(msg)) => assert!(msg.contains("duplicate depth target")),
            other => panic!("expected a config error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        for multiplier in [f64::NAN, f64::INFINITY] {
            let config = Config {
                retry_multiplier: multiplier,
                ..Config::default()
            };
            assert!(config.validate().is_err(), "accepted multiplier {multiplier}");
        }
        for secs in [f64::NAN, f64::INFINITY, -1.0, 1e30] {
            let interval = Config {
                min_fetch_interval_secs: secs,
                ..Config::default()
            };
            assert!(interval.validate().is_err(), "accepted interval {secs}");
            let delay = Config {
                retry_initial_delay_secs: secs,
                ..Config::default()
            };
            assert!(delay.validate().is_err(), "accepted delay {secs}");
        }
    }

    #[test]
    fn test_shrinking_multiplier_rejected() {
        let config = Config {
            retry_multiplier: 0.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
