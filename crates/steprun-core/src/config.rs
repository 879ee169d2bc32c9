// Retention limits for state stores and event buses
//
// Both backends take the same limits. The storage crate fills them from the
// environment; the in-process backends use the defaults.

use std::time::Duration;

/// Steps kept per operation in the history log
pub const DEFAULT_HISTORY_CAP: usize = 200;

/// TTL of state, history and metadata, refreshed on write
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Approximate cap on events kept per operation stream
pub const DEFAULT_STREAM_MAX_LEN: usize = 1000;

/// TTL of an event stream, refreshed on write
pub const DEFAULT_STREAM_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Inactivity after which the shared backend drops an operation
pub const SHARED_INACTIVITY_THRESHOLD: Duration = Duration::from_secs(24 * 60 * 60);

/// Inactivity after which the in-process backend drops an operation
pub const IN_PROCESS_INACTIVITY_THRESHOLD: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateStoreLimits {
    pub history_cap: usize,
    pub state_ttl: Duration,
    /// Operations whose last activity is older than this are cleaned up
    pub inactivity_threshold: Duration,
}

impl Default for StateStoreLimits {
    fn default() -> Self {
        Self {
            history_cap: DEFAULT_HISTORY_CAP,
            state_ttl: DEFAULT_STATE_TTL,
            inactivity_threshold: SHARED_INACTIVITY_THRESHOLD,
        }
    }
}

impl StateStoreLimits {
    /// Limits for the in-process backend
    pub fn in_process() -> Self {
        Self {
            inactivity_threshold: IN_PROCESS_INACTIVITY_THRESHOLD,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventBusLimits {
    pub max_len: usize,
    pub ttl: Duration,
}

impl Default for EventBusLimits {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_STREAM_MAX_LEN,
            ttl: DEFAULT_STREAM_TTL,
        }
    }
}
