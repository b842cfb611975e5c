#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the tetracycle device simulator and bridge.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Every section is optional; an empty file yields the built-in defaults.
//! - Decay schedules accept segments either as `[duration_s, rate]` pairs or
//!   as `{ duration_s = .., rate = .. }` tables.
use serde::Deserialize;
use serde::de::Deserializer;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceCfg {
    /// Seconds spent in WarmUp before Running starts
    pub warmup_s: u64,
    /// Cadence of the full status line
    pub status_interval_ms: u64,
    /// Inbound command buffer cap; a longer line is discarded
    pub max_line_bytes: usize,
    /// Delay between device loop iterations
    pub loop_ms: u64,
}

impl Default for DeviceCfg {
    fn default() -> Self {
        Self {
            warmup_s: 10,
            status_interval_ms: 1000,
            max_line_bytes: 200,
            loop_ms: 50,
        }
    }
}

/// Decay schedule for one measurand.
#[derive(Debug, Deserialize, Clone)]
pub struct MeasurandSchedule {
    pub initial: f32,
    /// Floor; the value never decays below this
    pub limit: f32,
    /// `(duration_s, rate_per_s)` in run order
    #[serde(deserialize_with = "de_segments")]
    pub segments: Vec<(f32, f32)>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DecayCfg {
    pub tds: MeasurandSchedule,
    pub turbidity: MeasurandSchedule,
    pub ph: MeasurandSchedule,
}

impl Default for DecayCfg {
    fn default() -> Self {
        Self {
            tds: MeasurandSchedule {
                initial: 1180.0,
                limit: 457.0,
                segments: vec![(60.0, 5.0), (120.0, 2.5), (120.0, 1.5)],
            },
            turbidity: MeasurandSchedule {
                initial: 553.0,
                limit: 1.0,
                segments: vec![(60.0, 4.0), (120.0, 1.5), (120.0, 0.5)],
            },
            ph: MeasurandSchedule {
                initial: 9.5,
                limit: 7.0,
                segments: vec![(60.0, 0.02), (120.0, 0.008), (120.0, 0.002)],
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BridgeCfg {
    /// Status + control poll cadence
    pub poll_ms: u64,
    /// Full push/pull resync cadence
    pub resync_ms: u64,
    /// Age after which an unconfirmed command is reported
    pub confirm_timeout_ms: u64,
    /// Sleep slice between shutdown checks
    pub loop_ms: u64,
    /// Inbound status buffer cap
    pub max_line_bytes: usize,
    /// Consecutive transport errors before a reopen is attempted
    pub reopen_after_errors: u32,
    /// Minimum spacing between reopen attempts
    pub reopen_min_interval_ms: u64,
    /// Snapshots kept for retry while the store is unreachable
    pub history_backlog: usize,
}

impl Default for BridgeCfg {
    fn default() -> Self {
        Self {
            poll_ms: 1000,
            resync_ms: 5000,
            confirm_timeout_ms: 3000,
            loop_ms: 50,
            max_line_bytes: 512,
            reopen_after_errors: 100,
            reopen_min_interval_ms: 60_000,
            history_backlog: 64,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreCfg {
    /// Base URL of the REST document store; `None` keeps everything in memory
    pub url: Option<String>,
    pub control_path: String,
    pub history_path: String,
    pub status_path: String,
    pub timeout_ms: u64,
}

impl Default for StoreCfg {
    fn default() -> Self {
        Self {
            url: None,
            control_path: "/tetracycle_control".into(),
            history_path: "/tetracycle_sensor_data".into(),
            status_path: "/tetracycle_status".into(),
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SerialCfg {
    pub baud: u32,
}

impl Default for SerialCfg {
    fn default() -> Self {
        Self { baud: 9600 }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub device: DeviceCfg,
    pub decay: DecayCfg,
    pub bridge: BridgeCfg,
    pub store: StoreCfg,
    pub serial: SerialCfg,
    pub logging: Logging,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SegmentToml {
    Tuple((f32, f32)),
    Table { duration_s: f32, rate: f32 },
}

fn de_segments<'de, D>(deserializer: D) -> Result<Vec<(f32, f32)>, D::Error>
where
    D: Deserializer<'de>,
{
    let items: Vec<SegmentToml> = Vec::deserialize(deserializer)?;
    Ok(items
        .into_iter()
        .map(|s| match s {
            SegmentToml::Tuple(pair) => pair,
            SegmentToml::Table { duration_s, rate } => (duration_s, rate),
        })
        .collect())
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read and validate a config file. A missing file yields defaults.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {:?}: {}", path, e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {:?}: {}", path, e))?;
    cfg.validate()?;
    Ok(cfg)
}

impl MeasurandSchedule {
    fn validate(&self, name: &str) -> eyre::Result<()> {
        if !self.initial.is_finite() || !self.limit.is_finite() {
            eyre::bail!("decay.{name}.initial and decay.{name}.limit must be finite");
        }
        if self.limit > self.initial {
            eyre::bail!("decay.{name}.limit must be <= decay.{name}.initial");
        }
        if self.segments.is_empty() {
            eyre::bail!("decay.{name}.segments must not be empty");
        }
        for (idx, (duration_s, rate)) in self.segments.iter().enumerate() {
            if !(duration_s.is_finite() && *duration_s > 0.0) {
                eyre::bail!("decay.{name}.segments[{idx}] duration must be > 0");
            }
            if !(rate.is_finite() && *rate >= 0.0) {
                eyre::bail!("decay.{name}.segments[{idx}] rate must be >= 0");
            }
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Device
        if self.device.status_interval_ms == 0 {
            eyre::bail!("device.status_interval_ms must be >= 1");
        }
        if self.device.max_line_bytes < 16 {
            eyre::bail!("device.max_line_bytes must be >= 16");
        }
        if self.device.loop_ms == 0 {
            eyre::bail!("device.loop_ms must be >= 1");
        }
        if self.device.warmup_s > 60 * 60 {
            eyre::bail!("device.warmup_s is unreasonably large (>1h)");
        }

        // Decay
        self.decay.tds.validate("tds")?;
        self.decay.turbidity.validate("turbidity")?;
        self.decay.ph.validate("ph")?;

        // Bridge
        if self.bridge.poll_ms == 0 {
            eyre::bail!("bridge.poll_ms must be >= 1");
        }
        if self.bridge.resync_ms < self.bridge.poll_ms {
            eyre::bail!("bridge.resync_ms must be >= bridge.poll_ms");
        }
        if self.bridge.confirm_timeout_ms == 0 {
            eyre::bail!("bridge.confirm_timeout_ms must be >= 1");
        }
        if self.bridge.loop_ms == 0 {
            eyre::bail!("bridge.loop_ms must be >= 1");
        }
        if self.bridge.max_line_bytes < self.device.max_line_bytes {
            eyre::bail!("bridge.max_line_bytes must be >= device.max_line_bytes");
        }
        if self.bridge.reopen_after_errors == 0 {
            eyre::bail!("bridge.reopen_after_errors must be >= 1");
        }

        // Store
        for (key, path) in [
            ("store.control_path", &self.store.control_path),
            ("store.history_path", &self.store.history_path),
            ("store.status_path", &self.store.status_path),
        ] {
            if !path.starts_with('/') {
                eyre::bail!("{key} must start with '/'");
            }
        }
        if let Some(url) = &self.store.url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            eyre::bail!("store.url must be an http(s) URL");
        }
        if self.store.timeout_ms == 0 {
            eyre::bail!("store.timeout_ms must be >= 1");
        }

        // Serial
        if self.serial.baud == 0 {
            eyre::bail!("serial.baud must be > 0");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let cfg = load_toml("").expect("parse empty");
        cfg.validate().expect("defaults are valid");
        assert_eq!(cfg.device.warmup_s, 10);
        assert_eq!(cfg.device.max_line_bytes, 200);
        assert_eq!(cfg.bridge.resync_ms, 5000);
        assert_eq!(cfg.decay.tds.limit, 457.0);
    }

    #[test]
    fn segments_accept_tuples_and_tables() {
        let cfg = load_toml(
            r#"
[decay.tds]
initial = 100.0
limit = 10.0
segments = [[10.0, 1.0], { duration_s = 5.0, rate = 2.0 }]
"#,
        )
        .expect("parse");
        assert_eq!(cfg.decay.tds.segments, vec![(10.0, 1.0), (5.0, 2.0)]);
        // untouched measurands keep their defaults
        assert_eq!(cfg.decay.ph.initial, 9.5);
    }
}
