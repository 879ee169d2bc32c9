// Runtime configuration from environment variables
//
// AGENT_RUNTIME_SHARED_BACKEND selects PostgreSQL for both the state store and
// the event bus; everything else tunes retention and the connection pool.

use std::time::Duration;

use steprun_core::config::{
    DEFAULT_HISTORY_CAP, DEFAULT_STATE_TTL, DEFAULT_STREAM_MAX_LEN, DEFAULT_STREAM_TTL,
};
use steprun_core::{EventBusLimits, StateStoreLimits};

use crate::error::BackendError;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Which backends the factory builds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendMode {
    /// Process-local maps; state is lost on restart
    #[default]
    InProcess,
    /// PostgreSQL shared by every worker
    Shared,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub mode: BackendMode,
    /// Required in shared mode
    pub database_url: Option<String>,
    pub state_ttl: Duration,
    pub history_cap: usize,
    pub stream_max_len: usize,
    pub stream_ttl: Duration,
    pub sweep_interval: Duration,
    pub max_connections: u32,
    pub probe_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::InProcess,
            database_url: None,
            state_ttl: DEFAULT_STATE_TTL,
            history_cap: DEFAULT_HISTORY_CAP,
            stream_max_len: DEFAULT_STREAM_MAX_LEN,
            stream_ttl: DEFAULT_STREAM_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl RuntimeConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, BackendError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BackendError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let shared = get("AGENT_RUNTIME_SHARED_BACKEND")
            .map(|v| parse_bool("AGENT_RUNTIME_SHARED_BACKEND", &v))
            .transpose()?
            .unwrap_or(false);
        let mode = if shared {
            BackendMode::Shared
        } else {
            BackendMode::InProcess
        };

        Ok(Self {
            mode,
            database_url: get("DATABASE_URL"),
            state_ttl: seconds(get("AGENT_RUNTIME_STATE_TTL_SECS"), "AGENT_RUNTIME_STATE_TTL_SECS")?
                .unwrap_or(defaults.state_ttl),
            history_cap: number(get("AGENT_RUNTIME_HISTORY_CAP"), "AGENT_RUNTIME_HISTORY_CAP")?
                .unwrap_or(defaults.history_cap),
            stream_max_len: number(get("AGENT_RUNTIME_STREAM_MAX_LEN"), "AGENT_RUNTIME_STREAM_MAX_LEN")?
                .unwrap_or(defaults.stream_max_len),
            stream_ttl: seconds(get("AGENT_RUNTIME_STREAM_TTL_SECS"), "AGENT_RUNTIME_STREAM_TTL_SECS")?
                .unwrap_or(defaults.stream_ttl),
            sweep_interval: seconds(
                get("AGENT_RUNTIME_SWEEP_INTERVAL_SECS"),
                "AGENT_RUNTIME_SWEEP_INTERVAL_SECS",
            )?
            .unwrap_or(defaults.sweep_interval),
            max_connections: number(
                get("AGENT_RUNTIME_DB_MAX_CONNECTIONS"),
                "AGENT_RUNTIME_DB_MAX_CONNECTIONS",
            )?
            .unwrap_or(defaults.max_connections),
            probe_timeout: number::<u64>(
                get("AGENT_RUNTIME_PROBE_TIMEOUT_MS"),
                "AGENT_RUNTIME_PROBE_TIMEOUT_MS",
            )?
            .map(Duration::from_millis)
            .unwrap_or(defaults.probe_timeout),
        })
    }

    /// Database URL, required once shared mode is on
    pub fn require_database_url(&self) -> Result<&str, BackendError> {
        self.database_url
            .as_deref()
            .ok_or(BackendError::Missing("DATABASE_URL"))
    }

    /// Limits for the state store of the configured mode
    pub fn state_store_limits(&self) -> StateStoreLimits {
        let base = match self.mode {
            BackendMode::InProcess => StateStoreLimits::in_process(),
            BackendMode::Shared => StateStoreLimits::default(),
        };
        StateStoreLimits {
            history_cap: self.history_cap,
            state_ttl: self.state_ttl,
            ..base
        }
    }

    pub fn event_bus_limits(&self) -> EventBusLimits {
        EventBusLimits {
            max_len: self.stream_max_len,
            ttl: self.stream_ttl,
        }
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, BackendError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BackendError::invalid(name, value)),
    }
}

/// Parse a positive integer; zero is rejected like any other bad value
fn number<T>(value: Option<String>, name: &'static str) -> Result<Option<T>, BackendError>
where
    T: std::str::FromStr + Default + PartialEq,
{
    value
        .map(|v| match v.trim().parse::<T>() {
            Ok(n) if n != T::default() => Ok(n),
            _ => Err(BackendError::invalid(name, v)),
        })
        .transpose()
}

fn seconds(value: Option<String>, name: &'static str) -> Result<Option<Duration>, BackendError> {
    Ok(number::<u64>(value, name)?.map(Duration::from_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<RuntimeConfig, BackendError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RuntimeConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = config(&[]).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.mode, BackendMode::InProcess);
        assert_eq!(config.history_cap, 200);
        assert_eq!(config.stream_max_len, 1000);
        assert_eq!(config.state_ttl, Duration::from_secs(7200));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_shared_mode_toggle() {
        for value in ["1", "true", "YES", "on"] {
            let config = config(&[("AGENT_RUNTIME_SHARED_BACKEND", value)]).unwrap();
            assert_eq!(config.mode, BackendMode::Shared, "value {value}");
        }
        for value in ["0", "false", "off", ""] {
            let config = config(&[("AGENT_RUNTIME_SHARED_BACKEND", value)]).unwrap();
            assert_eq!(config.mode, BackendMode::InProcess, "value {value}");
        }
        assert!(config(&[("AGENT_RUNTIME_SHARED_BACKEND", "maybe")]).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/runtime"),
            ("AGENT_RUNTIME_STATE_TTL_SECS", "60"),
            ("AGENT_RUNTIME_HISTORY_CAP", "10"),
            ("AGENT_RUNTIME_STREAM_MAX_LEN", "50"),
            ("AGENT_RUNTIME_STREAM_TTL_SECS", "120"),
            ("AGENT_RUNTIME_SWEEP_INTERVAL_SECS", "5"),
            ("AGENT_RUNTIME_DB_MAX_CONNECTIONS", "3"),
            ("AGENT_RUNTIME_PROBE_TIMEOUT_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.require_database_url().unwrap(), "postgres://localhost/runtime");
        assert_eq!(config.state_store_limits().history_cap, 10);
        assert_eq!(config.state_store_limits().state_ttl, Duration::from_secs(60));
        assert_eq!(
            config.event_bus_limits(),
            EventBusLimits {
                max_len: 50,
                ttl: Duration::from_secs(120),
            }
        );
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.probe_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = config(&[("AGENT_RUNTIME_HISTORY_CAP", "lots")]).unwrap_err();
        assert!(err.to_string().contains("AGENT_RUNTIME_HISTORY_CAP"));
    }

    #[test]
    fn test_zero_values_are_rejected() {
        for name in [
            "AGENT_RUNTIME_STATE_TTL_SECS",
            "AGENT_RUNTIME_HISTORY_CAP",
            "AGENT_RUNTIME_STREAM_MAX_LEN",
            "AGENT_RUNTIME_STREAM_TTL_SECS",
            "AGENT_RUNTIME_SWEEP_INTERVAL_SECS",
            "AGENT_RUNTIME_DB_MAX_CONNECTIONS",
            "AGENT_RUNTIME_PROBE_TIMEOUT_MS",
        ] {
            let err = config(&[(name, "0")]).unwrap_err();
            assert!(
                matches!(err, BackendError::Invalid { name: n, .. } if n == name),
                "{name}: {err}"
            );
        }
        assert!(config(&[("AGENT_RUNTIME_SWEEP_INTERVAL_SECS", " 00 ")]).is_err());
        assert!(config(&[("AGENT_RUNTIME_SWEEP_INTERVAL_SECS", "1")]).is_ok());
    }

    #[test]
    fn test_inactivity_threshold_follows_mode() {
        let in_process = config(&[]).unwrap().state_store_limits();
        let shared = config(&[("AGENT_RUNTIME_SHARED_BACKEND", "true")])
            .unwrap()
            .state_store_limits();
        assert!(in_process.inactivity_threshold < shared.inactivity_threshold);
    }

    #[test]
    fn test_missing_database_url() {
        let config = config(&[("AGENT_RUNTIME_SHARED_BACKEND", "true")]).unwrap();
        assert!(matches!(
            config.require_database_url(),
            Err(BackendError::Missing("DATABASE_URL"))
        ));
    }
}
