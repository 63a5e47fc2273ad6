//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero configuration
//! for local development. Invalid values are logged and ignored.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use causerie_engine::EngineConfig;
use causerie_shared::constants::{DEFAULT_HTTP_PORT, MAX_MESSAGE_LEN, MAX_PAGE_SIZE};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `causerie.db` in the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Webhook receiving push notices. Unset means notices are only logged.
    /// Env: `PUSH_WEBHOOK_URL`
    pub push_webhook_url: Option<String>,

    /// Sustained requests per second per client.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `10`
    pub rate_limit_per_sec: f64,

    /// Burst size per client.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `30`
    pub rate_limit_burst: f64,

    /// Env: `MAX_PAGE_SIZE`
    /// Default: `100`
    pub max_page_size: usize,

    /// Maximum message text length, in characters.
    /// Env: `MAX_MESSAGE_LEN`
    /// Default: `4096`
    pub max_message_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            push_webhook_url: None,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            max_page_size: MAX_PAGE_SIZE,
            max_message_len: MAX_MESSAGE_LEN,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(url) = lookup("PUSH_WEBHOOK_URL") {
            if url.starts_with("http://") || url.starts_with("https://") {
                config.push_webhook_url = Some(url);
            } else if !url.is_empty() {
                tracing::warn!(value = %url, "Invalid PUSH_WEBHOOK_URL, push notices will only be logged");
            }
        }

        parse_into(&lookup, "RATE_LIMIT_PER_SEC", &mut config.rate_limit_per_sec);
        parse_into(&lookup, "RATE_LIMIT_BURST", &mut config.rate_limit_burst);
        parse_into(&lookup, "MAX_PAGE_SIZE", &mut config.max_page_size);
        parse_into(&lookup, "MAX_MESSAGE_LEN", &mut config.max_message_len);

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let max_page_size = self.max_page_size.max(1);
        let defaults = EngineConfig::default();
        EngineConfig {
            max_message_len: self.max_message_len,
            max_page_size,
            default_page_size: defaults.default_page_size.min(max_page_size),
            ..defaults
        }
    }
}

/// Overwrite `target` with the parsed variable. Unparsable or non-positive
/// values keep the default.
fn parse_into<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T)
where
    T: FromStr + PartialOrd + Default,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => *target = value,
        _ => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.database_path.is_none());
        assert!(config.push_webhook_url.is_none());
        assert_eq!(config.rate_limit_per_sec, 10.0);
        assert_eq!(config.rate_limit_burst, 30.0);
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.max_message_len, 4096);
    }

    #[test]
    fn overrides() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/causerie.db"),
            ("PUSH_WEBHOOK_URL", "https://push.example/notify"),
            ("RATE_LIMIT_BURST", "5"),
            ("MAX_PAGE_SIZE", "20"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/causerie.db")));
        assert_eq!(
            config.push_webhook_url.as_deref(),
            Some("https://push.example/notify")
        );
        assert_eq!(config.rate_limit_burst, 5.0);
        assert_eq!(config.engine_config().max_page_size, 20);
        assert_eq!(config.engine_config().default_page_size, 20);
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "not-an-address"),
            ("MAX_PAGE_SIZE", "0"),
            ("MAX_MESSAGE_LEN", "lots"),
            ("PUSH_WEBHOOK_URL", "ftp://nope"),
        ]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.max_message_len, 4096);
        assert!(config.push_webhook_url.is_none());
    }
}
