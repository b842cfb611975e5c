//! Concrete adapters for the `tetra_traits` seams.
//!
//! - simulated actuators and display that only log
//! - an in-process loopback transport for simulation and tests
//! - a serial-port transport (Linux)
pub mod error;
pub mod loopback;
#[cfg(target_os = "linux")]
pub mod serial;

pub use loopback::{LoopbackFaults, LoopbackTransport};
#[cfg(target_os = "linux")]
pub use serial::SerialTransport;

use std::time::Duration;
use tetra_traits::{Actuator, Display};

/// Simulated relay or servo output.
#[derive(Debug)]
pub struct SimulatedActuator {
    name: &'static str,
    on: bool,
}

impl SimulatedActuator {
    pub fn new(name: &'static str) -> Self {
        Self { name, on: false }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}

impl Actuator for SimulatedActuator {
    fn apply(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.on = on;
        tracing::info!(actuator = self.name, on, "actuator set (simulated)");
        Ok(())
    }
}

/// Display that writes what it would render to the log.
#[derive(Debug, Default)]
pub struct LogDisplay {
    phase: String,
}

impl LogDisplay {
    pub fn phase(&self) -> &str {
        &self.phase
    }
}

impl Display for LogDisplay {
    fn show_phase(&mut self, phase: &str) {
        phase.clone_into(&mut self.phase);
        tracing::debug!(phase, "display: phase");
    }

    fn show_readings(&mut self, tds: f32, turbidity: f32, ph: f32) {
        tracing::trace!(tds, turbidity, ph, "display: readings");
    }

    fn show_summary(&mut self, cycle: Duration) {
        tracing::info!(cycle_s = cycle.as_secs(), "display: cycle finished");
    }

    fn clear(&mut self) {
        tracing::trace!("display: clear");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_actuator_tracks_state() {
        let mut pump = SimulatedActuator::new("pump1");
        pump.apply(true).unwrap();
        assert!(pump.is_on());
        pump.apply(false).unwrap();
        assert!(!pump.is_on());
    }

    #[test]
    fn log_display_remembers_phase() {
        let mut d = LogDisplay::default();
        d.show_phase("warmup");
        d.clear();
        assert_eq!(d.phase(), "warmup");
    }
}
