//! `simulate`: device and bridge in one process over a loopback link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::json;
use tetra_core::{
    ActuatorBank, Bridge, BridgeTiming, Device, LifecyclePhase, MemoryStore, StorePaths,
};
use tetra_hardware::{LogDisplay, LoopbackTransport, SimulatedActuator};
use tetra_traits::clock::test_clock::TestClock;
use tetra_traits::{Clock, MonotonicClock};

/// What a simulation run ended with.
#[derive(Debug, Clone)]
pub struct SimReport {
    pub seconds: f64,
    pub phase: LifecyclePhase,
    pub tds: f32,
    pub turbidity: f32,
    pub ph: f32,
    pub pumps: [bool; 2],
    pub servo: bool,
    pub history: usize,
    pub commands: u64,
    pub passes: u64,
    pub resyncs: u64,
}

impl SimReport {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "seconds": self.seconds,
            "phase": self.phase.as_str(),
            "tds": self.tds,
            "turbidity": self.turbidity,
            "ph": self.ph,
            "pumps": [u8::from(self.pumps[0]), u8::from(self.pumps[1])],
            "servo": u8::from(self.servo),
            "history": self.history,
            "commands": self.commands,
            "passes": self.passes,
            "resyncs": self.resyncs,
        })
    }

    pub fn render(&self) -> String {
        format!(
            "simulated {:.1} s\nphase: {}\ntds={:.2} turbidity={:.2} ph={:.2}\npumps=[{}, {}] servo={}\nhistory entries: {}\ncommands: {} passes: {} resyncs: {}",
            self.seconds,
            self.phase,
            self.tds,
            self.turbidity,
            self.ph,
            u8::from(self.pumps[0]),
            u8::from(self.pumps[1]),
            u8::from(self.servo),
            self.history,
            self.commands,
            self.passes,
            self.resyncs,
        )
    }
}

pub fn run_simulation(
    cfg: &tetra_config::Config,
    seconds: u64,
    start: bool,
    realtime: bool,
    shutdown: &AtomicBool,
) -> eyre::Result<SimReport> {
    if realtime {
        simulate_with(cfg, MonotonicClock::new(), seconds, start, shutdown)
    } else {
        simulate_with(cfg, TestClock::new(), seconds, start, shutdown)
    }
}

fn simulate_with<C: Clock + Clone + Default>(
    cfg: &tetra_config::Config,
    clock: C,
    seconds: u64,
    start: bool,
    shutdown: &AtomicBool,
) -> eyre::Result<SimReport> {
    let (dev_end, host_end) = LoopbackTransport::pair();
    let mut device = Device::builder()
        .with_transport(dev_end)
        .with_clock(clock.clone())
        .apply_config(cfg)
        .with_actuators(ActuatorBank::new(
            Box::new(SimulatedActuator::new("pump1")),
            Box::new(SimulatedActuator::new("pump2")),
            Box::new(SimulatedActuator::new("servo")),
        ))
        .with_display(Box::new(LogDisplay::default()))
        .try_build()?;

    let store = MemoryStore::new();
    let timing = BridgeTiming::from(&cfg.bridge);
    let step = Duration::from_millis(cfg.device.loop_ms);
    let mut bridge = Bridge::new(host_end, store.clone(), clock.clone(), timing);
    bridge.initialize_control()?;
    if start {
        store.set_control_value("system", json!(1));
    }
    tracing::info!(
        seconds,
        start,
        paths = ?StorePaths::from(&cfg.store),
        "simulation started (in-memory store)"
    );

    let t0 = clock.now();
    let total = Duration::from_secs(seconds);
    while clock.elapsed_since(t0) < total && !shutdown.load(Ordering::Relaxed) {
        device.poll();
        bridge.tick();
        clock.sleep(step);
    }

    let state = device.machine().state();
    let report = SimReport {
        seconds: clock.elapsed_since(t0).as_secs_f64(),
        phase: state.phase,
        tds: state.measurands.tds,
        turbidity: state.measurands.turbidity,
        ph: state.measurands.ph,
        pumps: state.intent.pumps(),
        servo: state.intent.servo,
        history: store.history().len(),
        commands: device.stats().commands,
        passes: bridge.stats().passes,
        resyncs: bridge.stats().resyncs,
    };
    tracing::info!(device = ?device.stats(), bridge = ?bridge.stats(), "simulation finished");
    Ok(report)
}
