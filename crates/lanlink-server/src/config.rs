//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use lanlink_shared::constants::{
    DEFAULT_MESSAGE_SECRET, GROUP_RETENTION_HOURS, REAP_INTERVAL_SECS,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `LISTEN_ADDR`
    /// Default: `0.0.0.0:8080`
    pub listen_addr: SocketAddr,

    /// Explicit database file path.  When unset the platform data
    /// directory is used.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Process-wide secret mixed into every conversation key.
    /// Env: `MESSAGE_SECRET`
    /// Default: a fixed constant (development only).
    pub message_secret: String,

    /// Secret used to verify connection auth tokens.
    /// Env: `AUTH_SECRET`
    /// Default: `"dev-auth-secret"` (development only).
    pub auth_secret: String,

    /// Whether loopback clients may join a network (local testing).
    /// Env: `ALLOW_LOOPBACK` (true/false)
    /// Default: `false`
    pub allow_loopback: bool,

    /// Inactive groups older than this many hours are reaped.
    /// Env: `GROUP_RETENTION_HOURS`
    /// Default: `24`
    pub group_retention_hours: i64,

    /// Interval between reaper runs, in seconds.
    /// Env: `REAP_INTERVAL_SECS`
    /// Default: `3600`
    pub reap_interval_secs: u64,

    /// Subnet-prefix to display-name pairs consulted when naming a new
    /// group without an SSID.  Deployment data, not behavior.
    /// Env: `GROUP_NAME_PATTERNS` as `prefix=Name;prefix=Name`
    pub group_name_patterns: Vec<(String, String)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], 8080).into(),
            database_path: None,
            message_secret: DEFAULT_MESSAGE_SECRET.to_string(),
            auth_secret: "dev-auth-secret".to_string(),
            allow_loopback: false,
            group_retention_hours: GROUP_RETENTION_HOURS,
            reap_interval_secs: REAP_INTERVAL_SECS,
            group_name_patterns: vec![
                ("192.168.1".to_string(), "Home WiFi - Main Floor".to_string()),
                ("10.0".to_string(), "Campus Network - Building A".to_string()),
                ("172.16".to_string(), "Hostel WiFi - Block B".to_string()),
            ],
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.listen_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid LISTEN_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Ok(secret) = std::env::var("MESSAGE_SECRET") {
            if !secret.is_empty() {
                config.message_secret = secret;
            }
        }
        if config.message_secret == DEFAULT_MESSAGE_SECRET {
            tracing::warn!("MESSAGE_SECRET not set, using built-in fallback (dev-only)");
        }

        if let Ok(secret) = std::env::var("AUTH_SECRET") {
            if !secret.is_empty() {
                config.auth_secret = secret;
            }
        }

        if let Ok(val) = std::env::var("ALLOW_LOOPBACK") {
            config.allow_loopback = val == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("GROUP_RETENTION_HOURS") {
            if let Ok(hours) = val.parse::<i64>() {
                config.group_retention_hours = hours;
            }
        }

        if let Ok(val) = std::env::var("REAP_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.reap_interval_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("GROUP_NAME_PATTERNS") {
            config.group_name_patterns = parse_name_patterns(&val);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse `prefix=Name;prefix=Name` pairs.  Malformed segments are skipped.
fn parse_name_patterns(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|segment| {
            let (prefix, name) = segment.split_once('=')?;
            let prefix = prefix.trim();
            let name = name.trim();
            if prefix.is_empty() || name.is_empty() {
                return None;
            }
            Some((prefix.to_string(), name.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.group_retention_hours, 24);
        assert!(!config.allow_loopback);
    }

    #[test]
    fn test_parse_name_patterns() {
        let patterns = parse_name_patterns("192.168.1=Home WiFi;10.0=Campus");
        assert_eq!(
            patterns,
            vec![
                ("192.168.1".to_string(), "Home WiFi".to_string()),
                ("10.0".to_string(), "Campus".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_name_patterns_skips_malformed() {
        let patterns = parse_name_patterns("no-separator;=empty;10.0=Campus;");
        assert_eq!(patterns, vec![("10.0".to_string(), "Campus".to_string())]);
    }
}
