//! Configuration resolution for the connection manager and the sweeper.
//!
//! Every value follows a three-tier priority:
//!
//! 1. **Parameter** - Explicitly provided value (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MCM_CONNECT_TIMEOUT` | 30s | Timeout for opening one hop |
//! | `MCM_SWEEP_INTERVAL` | 120s | Interval between liveness sweeps |
//! | `MCM_SWEEP_UNIT_TIMEOUT` | 60s | Deadline for opening a session inside a sweep unit |
//! | `MCM_STATS_TIMEOUT` | 15s | Deadline for collecting one stats snapshot |
//! | `MCM_STATUS_RETRIES` | 3 | Retries for persisting a status demotion |
//! | `MCM_STATUS_RETRY_DELAY_MS` | 500ms | Initial delay between those retries |
//! | `MCM_COMPRESSION` | true | Enable zlib compression on SSH sessions |

use std::env;
use std::time::Duration;

/// Default timeout for opening one hop, in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default sweep interval in seconds (every 2 minutes)
pub(crate) const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 120;

/// Default per-unit session deadline in seconds
pub(crate) const DEFAULT_SWEEP_UNIT_TIMEOUT_SECS: u64 = 60;

/// Default stats collection deadline in seconds
pub(crate) const DEFAULT_STATS_TIMEOUT_SECS: u64 = 15;

/// Default retry attempts for status demotion writes
pub(crate) const DEFAULT_STATUS_RETRIES: u32 = 3;

/// Default initial delay between status write retries, in milliseconds
pub(crate) const DEFAULT_STATUS_RETRY_DELAY_MS: u64 = 500;

/// Maximum delay between status write retries
pub(crate) const MAX_STATUS_RETRY_DELAY: Duration = Duration::from_secs(5);

pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "MCM_CONNECT_TIMEOUT";
pub(crate) const SWEEP_INTERVAL_ENV_VAR: &str = "MCM_SWEEP_INTERVAL";
pub(crate) const SWEEP_UNIT_TIMEOUT_ENV_VAR: &str = "MCM_SWEEP_UNIT_TIMEOUT";
pub(crate) const STATS_TIMEOUT_ENV_VAR: &str = "MCM_STATS_TIMEOUT";
pub(crate) const STATUS_RETRIES_ENV_VAR: &str = "MCM_STATUS_RETRIES";
pub(crate) const STATUS_RETRY_DELAY_MS_ENV_VAR: &str = "MCM_STATUS_RETRY_DELAY_MS";
pub(crate) const COMPRESSION_ENV_VAR: &str = "MCM_COMPRESSION";

/// Resolved settings shared by the transport, the manager and the sweeper.
#[derive(Debug, Clone, PartialEq)]
pub struct McmConfig {
    pub connect_timeout: Duration,
    pub sweep_interval: Duration,
    pub sweep_unit_timeout: Duration,
    pub stats_timeout: Duration,
    pub status_retries: u32,
    pub status_retry_delay: Duration,
    pub compression: bool,
}

impl McmConfig {
    /// Resolve every setting from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            connect_timeout: Duration::from_secs(resolve_connect_timeout(None)),
            sweep_interval: Duration::from_secs(resolve_sweep_interval(None)),
            sweep_unit_timeout: Duration::from_secs(resolve_sweep_unit_timeout(None)),
            stats_timeout: Duration::from_secs(resolve_stats_timeout(None)),
            status_retries: resolve_status_retries(None),
            status_retry_delay: Duration::from_millis(resolve_status_retry_delay_ms(None)),
            compression: resolve_compression(None),
        }
    }
}

impl Default for McmConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            sweep_unit_timeout: Duration::from_secs(DEFAULT_SWEEP_UNIT_TIMEOUT_SECS),
            stats_timeout: Duration::from_secs(DEFAULT_STATS_TIMEOUT_SECS),
            status_retries: DEFAULT_STATUS_RETRIES,
            status_retry_delay: Duration::from_millis(DEFAULT_STATUS_RETRY_DELAY_MS),
            compression: true,
        }
    }
}

/// Resolve a numeric value with priority: parameter -> env var -> default
fn resolve_number<T: std::str::FromStr>(param: Option<T>, env_var: &str, default: T) -> T {
    if let Some(value) = param {
        return value;
    }

    if let Ok(raw) = env::var(env_var)
        && let Ok(value) = raw.parse::<T>()
    {
        return value;
    }

    default
}

pub(crate) fn resolve_connect_timeout(timeout_param: Option<u64>) -> u64 {
    resolve_number(
        timeout_param,
        CONNECT_TIMEOUT_ENV_VAR,
        DEFAULT_CONNECT_TIMEOUT_SECS,
    )
}

pub(crate) fn resolve_sweep_interval(interval_param: Option<u64>) -> u64 {
    resolve_number(
        interval_param,
        SWEEP_INTERVAL_ENV_VAR,
        DEFAULT_SWEEP_INTERVAL_SECS,
    )
}

pub(crate) fn resolve_sweep_unit_timeout(timeout_param: Option<u64>) -> u64 {
    resolve_number(
        timeout_param,
        SWEEP_UNIT_TIMEOUT_ENV_VAR,
        DEFAULT_SWEEP_UNIT_TIMEOUT_SECS,
    )
}

pub(crate) fn resolve_stats_timeout(timeout_param: Option<u64>) -> u64 {
    resolve_number(
        timeout_param,
        STATS_TIMEOUT_ENV_VAR,
        DEFAULT_STATS_TIMEOUT_SECS,
    )
}

pub(crate) fn resolve_status_retries(retries_param: Option<u32>) -> u32 {
    resolve_number(retries_param, STATUS_RETRIES_ENV_VAR, DEFAULT_STATUS_RETRIES)
}

pub(crate) fn resolve_status_retry_delay_ms(delay_param: Option<u64>) -> u64 {
    resolve_number(
        delay_param,
        STATUS_RETRY_DELAY_MS_ENV_VAR,
        DEFAULT_STATUS_RETRY_DELAY_MS,
    )
}

/// Resolve the compression setting with priority: parameter -> env var -> default (true)
pub(crate) fn resolve_compression(compress_param: Option<bool>) -> bool {
    if let Some(compress) = compress_param {
        return compress;
    }

    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    true
}
