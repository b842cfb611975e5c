//! Runtime configuration for the device runtime and the bridge.

use std::time::Duration;

/// Device loop timing and decoder sizing.
#[derive(Debug, Clone)]
pub struct DeviceTiming {
    /// WarmUp → Running delay
    pub warmup: Duration,
    /// Cadence of the periodic full status line
    pub status_interval: Duration,
    /// Sleep between loop iterations
    pub loop_period: Duration,
    /// Inbound command line cap in bytes
    pub max_line_bytes: usize,
}

impl Default for DeviceTiming {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(10),
            status_interval: Duration::from_secs(1),
            loop_period: Duration::from_millis(50),
            max_line_bytes: 200,
        }
    }
}

/// Bridge cadence and recovery policy.
#[derive(Debug, Clone)]
pub struct BridgeTiming {
    pub poll: Duration,
    pub resync: Duration,
    /// Pending commands older than this are reported as unconfirmed
    pub confirm_timeout: Duration,
    pub loop_period: Duration,
    /// Inbound status line cap in bytes
    pub max_line_bytes: usize,
    /// Consecutive transport errors before a reopen is attempted
    pub reopen_after_errors: u32,
    /// Minimum spacing between two reopen attempts
    pub reopen_min_interval: Duration,
    /// Unsent history snapshots kept for retry; oldest dropped first
    pub history_backlog: usize,
}

impl Default for BridgeTiming {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(1),
            resync: Duration::from_secs(5),
            confirm_timeout: Duration::from_secs(3),
            loop_period: Duration::from_millis(50),
            max_line_bytes: 512,
            reopen_after_errors: 100,
            reopen_min_interval: Duration::from_secs(60),
            history_backlog: 64,
        }
    }
}

/// Document locations inside the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub control: String,
    pub history: String,
    pub status: String,
}

impl Default for StorePaths {
    fn default() -> Self {
        Self {
            control: "/tetracycle_control".into(),
            history: "/tetracycle_sensor_data".into(),
            status: "/tetracycle_status".into(),
        }
    }
}
