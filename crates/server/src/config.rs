//! Environment-driven configuration.
//!
//! Every knob has a default suitable for local development; environment
//! variables override. `.env` files are loaded by `main` before this runs.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use store::StoreConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: StoreConfig,
    pub websocket: WebSocketConfig,
    pub auth: AuthConfig,
    pub features: FeatureConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub env: String,
    pub log_level: String,
    pub metrics_port: u16,
    /// How often the auction sweeper runs.
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub ping_interval: Duration,
    pub max_message_size: usize,
    /// Depth of each client's bounded outbound queue.
    pub send_queue_depth: usize,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct FeatureConfig {
    pub enable_logging: bool,
    pub allow_cross_origin: bool,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid value")),
        Err(_) => default,
    }
}

impl Config {
    /// Resolve the full configuration from the environment.
    ///
    /// Panics at startup on a missing `AUTH_SECRET` or malformed numeric
    /// values; there is no sensible way to run without them.
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                port: parse_or("SERVER_PORT", 8080),
                env: env_or("SERVER_ENV", "dev"),
                log_level: env_or("SERVER_LOG_LEVEL", "info"),
                metrics_port: parse_or("METRICS_PORT", 9090),
                sweep_interval: Duration::from_secs(parse_or("SWEEP_INTERVAL_SECS", 60)),
            },
            database: StoreConfig {
                host: env_or("DB_HOST", "localhost"),
                port: parse_or("DB_PORT", 5432),
                user: env_or("DB_USER", "postgres"),
                password: env_or("DB_PASSWORD", "postgres"),
                name: env_or("DB_NAME", "auctions"),
                ssl_mode: env_or("DB_SSLMODE", "disable"),
                max_connections: parse_or("DB_MAX_CONNECTIONS", 10),
            },
            websocket: WebSocketConfig {
                ping_interval: Duration::from_secs(parse_or("WS_PING_INTERVAL_SECS", 30)),
                max_message_size: parse_or("WS_MAX_MESSAGE_SIZE", 64 * 1024),
                send_queue_depth: parse_or("WS_SEND_QUEUE_DEPTH", 32),
            },
            auth: AuthConfig {
                secret_key: env::var("AUTH_SECRET").expect("AUTH_SECRET must be set"),
            },
            features: FeatureConfig {
                enable_logging: parse_or("FEATURES_ENABLE_LOGGING", true),
                allow_cross_origin: parse_or("FEATURES_ALLOW_CROSS_ORIGIN", false),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        env::set_var("AUTH_SECRET", "test-secret");
        let config = Config::from_env();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.websocket.send_queue_depth, 32);
        assert_eq!(config.websocket.ping_interval, Duration::from_secs(30));
        assert_eq!(config.database.port, 5432);
        assert!(!config.features.allow_cross_origin);
    }
}
