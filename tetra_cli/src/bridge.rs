//! `bridge`: serial device on one side, remote store on the other.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use serde_json::json;
use tetra_core::{BridgeStats, BridgeTiming, TetraError};

/// Boards that reset when the port opens need this long before they listen.
pub const PORT_SETTLE: Duration = Duration::from_secs(2);

pub fn render_stats(stats: &BridgeStats, as_json: bool) -> String {
    if as_json {
        return json!({
            "passes": stats.passes,
            "lines": stats.lines,
            "snapshots_written": stats.snapshots_written,
            "commands_sent": stats.commands_sent,
            "confirmations": stats.confirmations,
            "unconfirmed": stats.unconfirmed,
            "device_changes": stats.device_changes,
            "resyncs": stats.resyncs,
            "store_errors": stats.store_errors,
            "transport_errors": stats.transport_errors,
            "reopens": stats.reopens,
        })
        .to_string();
    }
    format!(
        "bridge stopped: passes={} lines={} snapshots={} commands={} confirmations={} device_changes={} store_errors={} transport_errors={} reopens={}",
        stats.passes,
        stats.lines,
        stats.snapshots_written,
        stats.commands_sent,
        stats.confirmations,
        stats.device_changes,
        stats.store_errors,
        stats.transport_errors,
        stats.reopens,
    )
}

#[cfg(target_os = "linux")]
pub fn run_bridge(
    cfg: &tetra_config::Config,
    port: &Path,
    baud: Option<u32>,
    store_url: Option<String>,
    shutdown: &AtomicBool,
) -> eyre::Result<BridgeStats> {
    use eyre::WrapErr;
    use tetra_core::hw_error::map_transport_error;
    use tetra_core::{MemoryStore, StorePaths};
    use tetra_hardware::SerialTransport;

    use crate::remote::HttpStore;

    let baud = baud.unwrap_or(cfg.serial.baud);
    let transport = SerialTransport::open(port, baud)
        .map_err(|e| eyre::Report::new(map_transport_error(&e)))
        .wrap_err_with(|| format!("open {} at {baud} baud", port.display()))?;
    std::thread::sleep(PORT_SETTLE);

    let timing = BridgeTiming::from(&cfg.bridge);
    match store_url.or_else(|| cfg.store.url.clone()) {
        Some(url) => {
            let store = HttpStore::new(
                &url,
                StorePaths::from(&cfg.store),
                Duration::from_millis(cfg.store.timeout_ms),
            )?;
            tracing::info!(store = store.base(), "using remote store");
            Ok(drive(transport, store, timing, shutdown))
        }
        None => {
            tracing::warn!("no store URL configured; control and history stay in memory");
            Ok(drive(transport, MemoryStore::new(), timing, shutdown))
        }
    }
}

#[cfg(target_os = "linux")]
fn drive<T, S>(transport: T, store: S, timing: BridgeTiming, shutdown: &AtomicBool) -> BridgeStats
where
    T: tetra_traits::LineTransport,
    S: tetra_core::RemoteStore,
{
    let mut bridge =
        tetra_core::Bridge::new(transport, store, tetra_traits::MonotonicClock::new(), timing);
    // an unreachable store is retried by every pass; only the transport is fatal
    if let Err(e) = bridge.initialize_control() {
        tracing::warn!(error = %e, "control document init failed; continuing");
    }
    bridge.run(shutdown)
}

#[cfg(not(target_os = "linux"))]
pub fn run_bridge(
    _cfg: &tetra_config::Config,
    port: &Path,
    _baud: Option<u32>,
    _store_url: Option<String>,
    _shutdown: &AtomicBool,
) -> eyre::Result<BridgeStats> {
    Err(eyre::Report::new(TetraError::Transport(format!(
        "serial ports are only supported on Linux ({})",
        port.display()
    ))))
}

/// Make sure a store URL is available for commands that need one.
pub fn require_url(flag: Option<String>, cfg: &tetra_config::Config) -> eyre::Result<String> {
    flag.or_else(|| cfg.store.url.clone()).ok_or_else(|| {
        eyre::Report::new(TetraError::Config(
            "no store URL; pass --store-url or set [store].url".into(),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_render_as_text_and_json() {
        let stats = BridgeStats {
            passes: 3,
            confirmations: 2,
            ..BridgeStats::default()
        };
        assert!(render_stats(&stats, false).contains("passes=3"));
        let v: serde_json::Value = serde_json::from_str(&render_stats(&stats, true)).unwrap();
        assert_eq!(v["confirmations"], 2);
    }

    #[test]
    fn store_url_falls_back_to_config() {
        let mut cfg = tetra_config::Config::default();
        assert!(require_url(None, &cfg).is_err());
        cfg.store.url = Some("http://cfg.test".into());
        assert_eq!(require_url(None, &cfg).unwrap(), "http://cfg.test");
        assert_eq!(
            require_url(Some("http://flag.test".into()), &cfg).unwrap(),
            "http://flag.test"
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn missing_port_is_a_transport_error() {
        let cfg = tetra_config::Config::default();
        let stop = AtomicBool::new(true);
        let err = run_bridge(&cfg, Path::new("/nonexistent/ttyTETRA"), None, None, &stop)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TetraError>(),
            Some(TetraError::Transport(_))
        ));
    }
}
