//! Application configuration loaded from environment variables.

use chrono::Duration;
use orchestrator::SettlementConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `WEBHOOK_SECRET` — HMAC secret for provider webhooks (unset means
///   every delivery is rejected)
/// - `SWEEP_INTERVAL_SECS` — settlement sweep period (default: `60`)
/// - `HOLD_DAYS` — post-payment hold window (default: `5`)
/// - `CONFIRMATION_DAYS` — client confirmation window (default: `7`)
/// - `LINK_TTL_HOURS` — payment link validity (default: `24`)
/// - `DISPUTE_WINDOW_HOURS` — per-level dispute review window
///   (default: `24`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub webhook_secret: Option<String>,
    pub sweep_interval_secs: u64,
    pub hold_days: i64,
    pub confirmation_days: i64,
    pub link_ttl_hours: i64,
    pub dispute_window_hours: i64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parsed("PORT", 3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            webhook_secret: std::env::var("WEBHOOK_SECRET").ok(),
            sweep_interval_secs: env_parsed("SWEEP_INTERVAL_SECS", 60),
            hold_days: env_parsed("HOLD_DAYS", 5),
            confirmation_days: env_parsed("CONFIRMATION_DAYS", 7),
            link_ttl_hours: env_parsed("LINK_TTL_HOURS", 24),
            dispute_window_hours: env_parsed("DISPUTE_WINDOW_HOURS", 24),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settlement timing derived from the configured windows.
    pub fn settlement(&self) -> SettlementConfig {
        SettlementConfig {
            hold_duration: Duration::days(self.hold_days),
            confirmation_window: Duration::days(self.confirmation_days),
            link_ttl: Duration::hours(self.link_ttl_hours),
            dispute_level_window: Duration::hours(self.dispute_window_hours),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            webhook_secret: None,
            sweep_interval_secs: 60,
            hold_days: 5,
            confirmation_days: 7,
            link_ttl_hours: 24,
            dispute_window_hours: 24,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
