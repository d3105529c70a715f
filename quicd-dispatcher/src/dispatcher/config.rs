use quicd_wire::{Version, SUPPORTED_VERSIONS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time a closed connection id stays in time-wait.
pub const DEFAULT_TIME_WAIT_PERIOD_MS: u64 = 5_000;

/// Dispatcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Version tags the server accepts, most preferred first.
    ///
    /// **Default:** every version the wire crate implements
    pub supported_versions: Vec<String>,

    /// Upper bound on live sessions. First packets beyond it are dropped.
    ///
    /// **Default:** 100000
    pub max_sessions: usize,

    /// How long a closed connection id is remembered, in milliseconds.
    ///
    /// **Default:** 5000
    pub time_wait_period_ms: u64,

    /// Public resets queued while the socket is blocked.
    ///
    /// **Default:** 1024
    pub max_pending_replies: usize,

    /// Answer unsupported versions with a version negotiation packet.
    ///
    /// **Default:** `true`
    pub send_version_negotiation: bool,

    /// Version negotiation replies per client address per window.
    ///
    /// **Default:** 10
    pub vn_rate_limit_per_window: u32,

    /// Length of the version negotiation rate-limit window, in milliseconds.
    ///
    /// **Default:** 1000
    pub vn_rate_limit_window_ms: u64,

    /// Datagrams read per readable event before yielding to timers and
    /// writes.
    ///
    /// **Default:** 64
    pub max_packets_per_turn: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            supported_versions: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
            max_sessions: 100_000,
            time_wait_period_ms: DEFAULT_TIME_WAIT_PERIOD_MS,
            max_pending_replies: 1024,
            send_version_negotiation: true,
            vn_rate_limit_per_window: 10,
            vn_rate_limit_window_ms: 1_000,
            max_packets_per_turn: 64,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.supported_versions.is_empty() {
            errors.push("dispatcher.supported_versions must not be empty".to_string());
        }
        if let Err(e) = self.versions() {
            errors.extend(e);
        }

        if self.max_sessions == 0 {
            errors.push("dispatcher.max_sessions must be > 0".to_string());
        }

        if self.time_wait_period_ms == 0 {
            errors.push("dispatcher.time_wait_period_ms must be > 0".to_string());
        }

        if self.max_packets_per_turn == 0 {
            errors.push("dispatcher.max_packets_per_turn must be > 0".to_string());
        }

        if self.send_version_negotiation && self.vn_rate_limit_window_ms == 0 {
            errors.push("dispatcher.vn_rate_limit_window_ms must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Parsed `supported_versions`, rejecting tags the wire crate does not
    /// implement.
    pub fn versions(&self) -> Result<Vec<Version>, Vec<String>> {
        let mut versions = Vec::with_capacity(self.supported_versions.len());
        let mut errors = Vec::new();

        for tag in &self.supported_versions {
            match tag.parse::<Version>() {
                Ok(v) if SUPPORTED_VERSIONS.contains(&v) => {
                    if !versions.contains(&v) {
                        versions.push(v);
                    }
                }
                Ok(v) => errors.push(format!("Unsupported protocol version '{}'", v)),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(versions)
        } else {
            Err(errors)
        }
    }

    pub fn time_wait_period(&self) -> Duration {
        Duration::from_millis(self.time_wait_period_ms)
    }

    pub fn vn_rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.vn_rate_limit_window_ms)
    }
}
