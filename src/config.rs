use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::calendar::{Calendar, CalendarError};

pub const ENV_PREFIX: &str = "ROOMSLOT_";

/// Runtime settings, read once at startup from `ROOMSLOT_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub calendar: Calendar,
    pub lock_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `key` is the unprefixed variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());
        let parsed = |name: &str, default| parse_or(var(name), default);

        let zone = var("TIMEZONE").unwrap_or_else(|| "UTC".into());
        let open = var("OPEN").unwrap_or_else(|| "08:00".into());
        let close = var("CLOSE").unwrap_or_else(|| "20:00".into());
        let calendar = Calendar::parse(&zone, &open, &close).map_err(ConfigError::Calendar)?;

        let tls_cert = var("TLS_CERT");
        let tls_key = var("TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::TlsPair);
        }

        Ok(Self {
            bind: var("BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(var("PORT"), 5433),
            data_dir: PathBuf::from(var("DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: var("PASSWORD").unwrap_or_else(|| "roomslot".into()),
            max_connections: parse_or(var("MAX_CONNECTIONS"), 256),
            compact_threshold: parsed("COMPACT_THRESHOLD", 1000),
            metrics_port: var("METRICS_PORT").and_then(|s| s.parse().ok()),
            tls_cert,
            tls_key,
            calendar,
            lock_timeout: Duration::from_millis(parsed("LOCK_TIMEOUT_MS", 5000)),
            sweep_interval: Duration::from_secs(parsed("SWEEP_INTERVAL_SECS", 60).max(1)),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roomslot.wal")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.data_dir.join("audit.jsonl")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

#[derive(Debug)]
pub enum ConfigError {
    Calendar(CalendarError),
    TlsPair,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Calendar(e) => write!(f, "invalid calendar settings: {e}"),
            ConfigError::TlsPair => write!(
                f,
                "both {ENV_PREFIX}TLS_CERT and {ENV_PREFIX}TLS_KEY must be set, or neither"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.listen_addr(), "0.0.0.0:5433");
        assert_eq!(cfg.password, "roomslot");
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.calendar.zone_name(), "UTC");
        assert_eq!(cfg.lock_timeout, Duration::from_secs(5));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/roomslot.wal"));
        assert_eq!(cfg.audit_path(), PathBuf::from("./data/audit.jsonl"));
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let cfg = Config::from_lookup(lookup(&[
            ("PORT", "6000"),
            ("TIMEZONE", "Europe/Rome"),
            ("OPEN", "09:00"),
            ("CLOSE", "18:30"),
            ("MAX_CONNECTIONS", "lots"),
            ("LOCK_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.calendar.zone_name(), "Europe/Rome");
        assert_eq!(cfg.calendar.close().to_string(), "18:30:00");
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.lock_timeout, Duration::from_millis(250));
    }

    #[test]
    fn invalid_calendar_is_fatal() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("TIMEZONE", "Nowhere/City")])),
            Err(ConfigError::Calendar(CalendarError::UnknownZone(_)))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("OPEN", "21:00")])),
            Err(ConfigError::Calendar(CalendarError::EmptyWindow { .. }))
        ));
    }

    #[test]
    fn tls_needs_both_files() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("TLS_CERT", "cert.pem")])),
            Err(ConfigError::TlsPair)
        ));
    }
}
