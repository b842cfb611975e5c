//! `From` implementations bridging `tetra_config` types to `tetra_core` types.

use std::time::Duration;

use crate::config::{BridgeTiming, DeviceTiming, StorePaths};
use crate::decay::{DecaySchedule, MeasurandSpec, SensorDecayModel};

// ── Decay ────────────────────────────────────────────────────────────────────

impl From<&tetra_config::MeasurandSchedule> for MeasurandSpec {
    fn from(c: &tetra_config::MeasurandSchedule) -> Self {
        Self {
            initial: c.initial,
            limit: c.limit,
            schedule: DecaySchedule::from_durations(&c.segments),
        }
    }
}

impl From<&tetra_config::DecayCfg> for SensorDecayModel {
    fn from(c: &tetra_config::DecayCfg) -> Self {
        Self {
            tds: MeasurandSpec::from(&c.tds),
            turbidity: MeasurandSpec::from(&c.turbidity),
            ph: MeasurandSpec::from(&c.ph),
        }
    }
}

// ── DeviceTiming ─────────────────────────────────────────────────────────────

impl From<&tetra_config::DeviceCfg> for DeviceTiming {
    fn from(c: &tetra_config::DeviceCfg) -> Self {
        Self {
            warmup: Duration::from_secs(c.warmup_s),
            status_interval: Duration::from_millis(c.status_interval_ms),
            loop_period: Duration::from_millis(c.loop_ms),
            max_line_bytes: c.max_line_bytes,
        }
    }
}

// ── BridgeTiming ─────────────────────────────────────────────────────────────

impl From<&tetra_config::BridgeCfg> for BridgeTiming {
    fn from(c: &tetra_config::BridgeCfg) -> Self {
        Self {
            poll: Duration::from_millis(c.poll_ms),
            resync: Duration::from_millis(c.resync_ms),
            confirm_timeout: Duration::from_millis(c.confirm_timeout_ms),
            loop_period: Duration::from_millis(c.loop_ms),
            max_line_bytes: c.max_line_bytes,
            reopen_after_errors: c.reopen_after_errors,
            reopen_min_interval: Duration::from_millis(c.reopen_min_interval_ms),
            history_backlog: c.history_backlog,
        }
    }
}

// ── StorePaths ───────────────────────────────────────────────────────────────

impl From<&tetra_config::StoreCfg> for StorePaths {
    fn from(c: &tetra_config::StoreCfg) -> Self {
        Self {
            control: c.control_path.clone(),
            history: c.history_path.clone(),
            status: c.status_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_agree_with_config_defaults() {
        let cfg = tetra_config::Config::default();
        let d = DeviceTiming::from(&cfg.device);
        let dd = DeviceTiming::default();
        assert_eq!(d.warmup, dd.warmup);
        assert_eq!(d.max_line_bytes, dd.max_line_bytes);
        let b = BridgeTiming::from(&cfg.bridge);
        assert_eq!(b.resync, BridgeTiming::default().resync);
        assert_eq!(StorePaths::from(&cfg.store), StorePaths::default());
    }
}
