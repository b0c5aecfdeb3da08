//! Runtime-configurable parameters for torus collectives.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `TOREX_`) or by constructing a custom `TorexConfig`.

use std::time::Duration;

use crate::error::{Result, TorexError};
use crate::topology::{LinkFailures, TorusShape};

/// Tuning parameters for the executor and transports.
#[derive(Debug, Clone)]
pub struct TorexConfig {
    /// Deadline for the sends and receives of one transfer step.
    /// `None` waits forever: a hung peer stalls the collective.
    pub step_timeout: Option<Duration>,

    /// Timeout for barrier operations.
    pub barrier_timeout: Duration,

    /// How long TCP bootstrap keeps retrying peers that are not listening yet.
    pub connect_timeout: Duration,

    /// Replay every freshly built schedule offline before first use.
    pub verify_schedules: bool,

    /// Largest frame the TCP transport accepts from a peer.
    pub max_frame_bytes: usize,
}

impl Default for TorexConfig {
    fn default() -> Self {
        Self {
            step_timeout: None,
            barrier_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            verify_schedules: true,
            max_frame_bytes: 1024 * 1024 * 1024, // 1 GiB
        }
    }
}

impl TorexConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `TOREX_STEP_TIMEOUT_SECS` (`0` disables the deadline)
    /// - `TOREX_BARRIER_TIMEOUT_SECS`
    /// - `TOREX_CONNECT_TIMEOUT_SECS`
    /// - `TOREX_VERIFY_SCHEDULES` (`true`/`false`/`1`/`0`)
    /// - `TOREX_MAX_FRAME_BYTES`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("TOREX_STEP_TIMEOUT_SECS") {
            if let Ok(s) = v.parse::<u64>() {
                cfg.step_timeout = (s > 0).then(|| Duration::from_secs(s));
            }
        }
        if let Ok(v) = std::env::var("TOREX_BARRIER_TIMEOUT_SECS") {
            if let Ok(s) = v.parse::<u64>() {
                cfg.barrier_timeout = Duration::from_secs(s);
            }
        }
        if let Ok(v) = std::env::var("TOREX_CONNECT_TIMEOUT_SECS") {
            if let Ok(s) = v.parse::<u64>() {
                cfg.connect_timeout = Duration::from_secs(s);
            }
        }
        if let Ok(v) = std::env::var("TOREX_VERIFY_SCHEDULES") {
            if let Some(b) = parse_flag(&v) {
                cfg.verify_schedules = b;
            }
        }
        if let Ok(v) = std::env::var("TOREX_MAX_FRAME_BYTES") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.max_frame_bytes = n;
            }
        }

        cfg
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Torus shape and declared failures from `TOREX_SHAPE` and
/// `TOREX_FAILED_LINKS`. Returns `None` when no shape is set.
pub fn topology_from_env() -> Result<Option<(TorusShape, LinkFailures)>> {
    let Ok(shape) = std::env::var("TOREX_SHAPE") else {
        return Ok(None);
    };
    let shape: TorusShape = shape.parse()?;
    let failures: LinkFailures = std::env::var("TOREX_FAILED_LINKS")
        .unwrap_or_default()
        .parse()?;
    failures.validate(&shape).map_err(|e| {
        TorexError::InvalidConfig(format!("TOREX_FAILED_LINKS does not fit {shape}: {e}"))
    })?;
    Ok(Some((shape, failures)))
}
