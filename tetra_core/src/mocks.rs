//! Test and helper mocks for tetra_core

use std::sync::{Arc, Mutex};

/// Actuator with no physical effect; used when only intent matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActuator;

impl tetra_traits::Actuator for NoopActuator {
    fn apply(&mut self, _on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Actuator that records every requested state. Clones of `calls()` observe
/// the same log.
#[derive(Debug, Default, Clone)]
pub struct RecordingActuator {
    calls: Arc<Mutex<Vec<bool>>>,
}

impl RecordingActuator {
    pub fn calls(&self) -> Arc<Mutex<Vec<bool>>> {
        Arc::clone(&self.calls)
    }
}

impl tetra_traits::Actuator for RecordingActuator {
    fn apply(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(on);
        }
        Ok(())
    }
}

/// Display that renders nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDisplay;

impl tetra_traits::Display for NoopDisplay {
    fn show_phase(&mut self, _phase: &str) {}
    fn show_readings(&mut self, _tds: f32, _turbidity: f32, _ph: f32) {}
    fn show_summary(&mut self, _cycle: std::time::Duration) {}
    fn clear(&mut self) {}
}
