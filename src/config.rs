//! Server configuration read from the environment

use chrono::Duration;
use std::net::SocketAddr;
use thiserror::Error;

pub const BIND_ADDR_VAR: &str = "EXCHANGE_BIND_ADDR";
pub const LOG_FILTER_VAR: &str = "RUST_LOG";
pub const HISTORY_WINDOW_VAR: &str = "EXCHANGE_HISTORY_WINDOW_DAYS";

/// Upper bound on the summary window, about a century
pub const MAX_HISTORY_WINDOW_DAYS: i64 = 36_500;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not a valid socket address: {value}")]
    InvalidBindAddr { var: &'static str, value: String },
    #[error("{var} must be between 1 and {} days, got {value}", MAX_HISTORY_WINDOW_DAYS)]
    InvalidHistoryWindow { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// `EnvFilter` directive for the subscriber
    pub log_filter: String,
    /// How far back a trade counts as recent in summaries
    pub history_window_days: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_filter: "info".to_string(),
            history_window_days: 7,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(BIND_ADDR_VAR) {
            config.bind_addr = value.trim().parse().map_err(|_| ConfigError::InvalidBindAddr {
                var: BIND_ADDR_VAR,
                value: value.clone(),
            })?;
        }

        if let Some(value) = lookup(LOG_FILTER_VAR) {
            if !value.trim().is_empty() {
                config.log_filter = value;
            }
        }

        if let Some(value) = lookup(HISTORY_WINDOW_VAR) {
            config.history_window_days = value
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|days| (1..=MAX_HISTORY_WINDOW_DAYS).contains(days))
                .ok_or_else(|| ConfigError::InvalidHistoryWindow {
                    var: HISTORY_WINDOW_VAR,
                    value: value.clone(),
                })?;
        }

        Ok(config)
    }

    pub fn history_window(&self) -> Duration {
        Duration::days(self.history_window_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<&str, &str> = vars.iter().copied().collect();
        move |var| vars.get(var).map(|value| value.to_string())
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.history_window(), Duration::days(7));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            (BIND_ADDR_VAR, "127.0.0.1:9000"),
            (LOG_FILTER_VAR, "spot_exchange_engine=debug"),
            (HISTORY_WINDOW_VAR, "30"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(config.log_filter, "spot_exchange_engine=debug");
        assert_eq!(config.history_window_days, 30);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[(BIND_ADDR_VAR, "not-an-addr")])),
            Err(ConfigError::InvalidBindAddr { .. })
        ));
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[(HISTORY_WINDOW_VAR, "0")])),
            Err(ConfigError::InvalidHistoryWindow { .. })
        ));
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[(HISTORY_WINDOW_VAR, "week")])),
            Err(ConfigError::InvalidHistoryWindow { .. })
        ));
    }

    #[test]
    fn test_history_window_is_bounded() {
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[(HISTORY_WINDOW_VAR, "200000000000000")])),
            Err(ConfigError::InvalidHistoryWindow { .. })
        ));
        let config =
            ServerConfig::from_lookup(lookup(&[(HISTORY_WINDOW_VAR, "36500")])).unwrap();
        assert_eq!(config.history_window(), Duration::days(MAX_HISTORY_WINDOW_DAYS));
    }
}
