//! Configuration schema definitions for fanout.
//!
//! All fields carry serde defaults, so an empty `[dispatch]` table (or no
//! table at all) yields a working configuration: sharded topology, a
//! seven-minute watchdog for both phases, and two retries per test.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure for fanout.
///
/// # TOML Structure
///
/// ```toml
/// [dispatch]
/// topology = "sharded"
/// test_timeout_secs = 420
/// setup_timeout_secs = 420
/// max_retries = 2
///
/// [dispatch.exit_codes]
/// success = 0
/// warning = 88
/// error = 1
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Dispatch engine settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// How tests are distributed across the worker pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// One shared queue; every test runs exactly once on whichever worker
    /// pulls it first.
    #[default]
    Sharded,

    /// One full-copy queue per worker; every worker runs the entire test
    /// set, with results tagged per worker.
    Replicated,
}

/// Core dispatch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Queue topology: sharded or replicated.
    #[serde(default)]
    pub topology: Topology,

    /// Run-phase watchdog timeout in seconds. Any worker loop making
    /// progress resets it; 0 disables the watchdog.
    ///
    /// Default: 420 (seven minutes)
    #[serde(default = "default_timeout_secs")]
    pub test_timeout_secs: u64,

    /// Watchdog timeout in seconds for the set-up and teardown batches.
    /// 0 disables it.
    ///
    /// Default: 420 (seven minutes)
    #[serde(default = "default_timeout_secs")]
    pub setup_timeout_secs: u64,

    /// Number of times a test with a retry token is resubmitted before
    /// its result is recorded as terminal.
    ///
    /// Default: 2
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Process exit codes reported by the coordinator.
    #[serde(default)]
    pub exit_codes: ExitCodes,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            topology: Topology::default(),
            test_timeout_secs: default_timeout_secs(),
            setup_timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            exit_codes: ExitCodes::default(),
        }
    }
}

impl DispatchConfig {
    /// Run-phase watchdog timeout; `None` when disabled.
    pub fn test_timeout(&self) -> Option<Duration> {
        (self.test_timeout_secs > 0).then(|| Duration::from_secs(self.test_timeout_secs))
    }

    /// Set-up/teardown watchdog timeout; `None` when disabled.
    pub fn setup_timeout(&self) -> Option<Duration> {
        (self.setup_timeout_secs > 0).then(|| Duration::from_secs(self.setup_timeout_secs))
    }
}

/// Numeric exit codes for the three run outcomes.
///
/// The exact values are a caller-owned detail; the defaults follow the
/// usual CI convention of a distinct warning code.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ExitCodes {
    /// Every recorded result passed.
    #[serde(default = "default_success_code")]
    pub success: i32,

    /// The watchdog elapsed or a worker became unreachable, but the
    /// recorded results all passed.
    #[serde(default = "default_warning_code")]
    pub warning: i32,

    /// A recorded result failed, or the test list was empty.
    #[serde(default = "default_error_code")]
    pub error: i32,
}

impl Default for ExitCodes {
    fn default() -> Self {
        Self {
            success: default_success_code(),
            warning: default_warning_code(),
            error: default_error_code(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    7 * 60
}

fn default_max_retries() -> usize {
    2
}

fn default_success_code() -> i32 {
    0
}

fn default_warning_code() -> i32 {
    88
}

fn default_error_code() -> i32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_str;

    #[test]
    fn test_defaults_from_empty_config() {
        let config = load_config_str("").unwrap();
        assert_eq!(config.dispatch.topology, Topology::Sharded);
        assert_eq!(config.dispatch.test_timeout_secs, 420);
        assert_eq!(config.dispatch.max_retries, 2);
        assert_eq!(config.dispatch.exit_codes.success, 0);
        assert_eq!(config.dispatch.exit_codes.warning, 88);
        assert_eq!(config.dispatch.exit_codes.error, 1);
    }

    #[test]
    fn test_overrides() {
        let config = load_config_str(
            r#"
            [dispatch]
            topology = "replicated"
            test_timeout_secs = 0
            max_retries = 5

            [dispatch.exit_codes]
            warning = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.dispatch.topology, Topology::Replicated);
        assert_eq!(config.dispatch.test_timeout(), None);
        assert_eq!(config.dispatch.max_retries, 5);
        assert_eq!(config.dispatch.exit_codes.warning, 2);
        assert_eq!(config.dispatch.exit_codes.error, 1);
    }

    #[test]
    fn test_zero_disables_watchdog() {
        let mut config = DispatchConfig::default();
        assert!(config.test_timeout().is_some());
        config.setup_timeout_secs = 0;
        assert_eq!(config.setup_timeout(), None);
    }
}
