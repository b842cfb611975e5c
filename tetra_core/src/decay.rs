//! Piecewise-linear sensor decay.
//!
//! Each measurand owns a schedule of `(start_offset_s, rate_per_s)` segments
//! obtained by prefix-summing the configured segment durations. A tick looks
//! up the segment containing the current run time and subtracts
//! `rate * elapsed`, clamping at the measurand's floor. Past the last boundary
//! the value is left alone.
//!
//! The segment is chosen at the end of the tick interval and the whole
//! interval decays at that rate. A tick that crosses a boundary uses the later
//! segment; one that crosses the last boundary applies nothing, so a stalled
//! loop can leave a value above its floor.
//!
//! TDS reaching its floor is the terminal condition for the whole run; it is
//! reported through a [`TerminalLatch`] which fires exactly once until reset.

use tracing::debug;

/// Ordered decay segments for one measurand.
#[derive(Debug, Clone, PartialEq)]
pub struct DecaySchedule {
    // boundaries[i]..boundaries[i + 1] is segment i; len == rates.len() + 1
    boundaries: Vec<f32>,
    rates: Vec<f32>,
}

impl DecaySchedule {
    /// Build from `(duration_s, rate_per_s)` pairs in run order.
    pub fn from_durations(segments: &[(f32, f32)]) -> Self {
        let mut boundaries = Vec::with_capacity(segments.len() + 1);
        let mut rates = Vec::with_capacity(segments.len());
        let mut offset = 0.0_f32;
        boundaries.push(offset);
        for &(duration_s, rate) in segments {
            offset += duration_s.max(0.0);
            boundaries.push(offset);
            rates.push(rate.max(0.0));
        }
        Self { boundaries, rates }
    }

    /// Rate of the segment with `start <= run_s < end`, or `None` before the
    /// first or past the last boundary.
    pub fn rate_at(&self, run_s: f32) -> Option<f32> {
        if !run_s.is_finite() || run_s < 0.0 {
            return None;
        }
        self.boundaries
            .windows(2)
            .zip(&self.rates)
            .find(|(w, _)| w[0] <= run_s && run_s < w[1])
            .map(|(_, rate)| *rate)
    }

    /// Run time at which the last segment ends.
    pub fn end_s(&self) -> f32 {
        self.boundaries.last().copied().unwrap_or(0.0)
    }

    pub fn segment_count(&self) -> usize {
        self.rates.len()
    }
}

/// Initial value, floor and schedule of one measurand.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurandSpec {
    pub initial: f32,
    pub limit: f32,
    pub schedule: DecaySchedule,
}

impl MeasurandSpec {
    /// Value after one tick ending at `run_s`. Never increases and never drops
    /// below `limit`.
    pub fn step(&self, value: f32, run_s: f32, elapsed_s: f32) -> f32 {
        let Some(rate) = self.schedule.rate_at(run_s) else {
            return value;
        };
        let delta = rate * elapsed_s.max(0.0);
        (value - delta).max(self.limit).min(value)
    }
}

/// Current sensor readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurands {
    pub tds: f32,
    pub turbidity: f32,
    pub ph: f32,
}

/// One-shot flag: `latch()` returns true only the first time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminalLatch {
    latched: bool,
}

impl TerminalLatch {
    pub fn latch(&mut self) -> bool {
        if self.latched {
            return false;
        }
        self.latched = true;
        true
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    pub fn reset(&mut self) {
        self.latched = false;
    }
}

/// Decay model for the three measurands.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDecayModel {
    pub tds: MeasurandSpec,
    pub turbidity: MeasurandSpec,
    pub ph: MeasurandSpec,
}

impl Default for SensorDecayModel {
    fn default() -> Self {
        Self::from(&tetra_config::DecayCfg::default())
    }
}

impl SensorDecayModel {
    pub fn initial(&self) -> Measurands {
        Measurands {
            tds: self.tds.initial,
            turbidity: self.turbidity.initial,
            ph: self.ph.initial,
        }
    }

    pub fn limits(&self) -> Measurands {
        Measurands {
            tds: self.tds.limit,
            turbidity: self.turbidity.limit,
            ph: self.ph.limit,
        }
    }

    /// Apply one decay tick at `run_s` seconds into the run, `elapsed_s` after
    /// the previous tick. Returns true when this tick latched the terminal flag.
    pub fn tick(
        &self,
        m: &mut Measurands,
        latch: &mut TerminalLatch,
        run_s: f32,
        elapsed_s: f32,
    ) -> bool {
        if latch.is_latched() {
            return false;
        }
        m.tds = self.tds.step(m.tds, run_s, elapsed_s);
        m.turbidity = self.turbidity.step(m.turbidity, run_s, elapsed_s);
        m.ph = self.ph.step(m.ph, run_s, elapsed_s);

        if m.tds <= self.tds.limit && latch.latch() {
            debug!(run_s, tds = m.tds, "tds reached its limit");
            return true;
        }
        false
    }
}
