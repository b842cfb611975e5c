//! Builder for the device runtime.
//!
//! `try_build()` checks that a transport was supplied and that the timing is
//! usable; everything else falls back to defaults.

use tetra_traits::{Cadence, Clock, Display, LineTransport, MonotonicClock};

use crate::codec::LineDecoder;
use crate::config::DeviceTiming;
use crate::decay::SensorDecayModel;
use crate::device::{ActuatorBank, DeviceStateMachine};
use crate::error::{BuildError, Result};
use crate::runner::{Device, DeviceStats};

impl<T: LineTransport> Device<T, MonotonicClock> {
    /// Start building a device runtime.
    pub fn builder() -> DeviceBuilder<T, MonotonicClock> {
        DeviceBuilder::default()
    }
}

pub struct DeviceBuilder<T, C> {
    transport: Option<T>,
    clock: Option<C>,
    actuators: Option<ActuatorBank>,
    display: Option<Box<dyn Display + Send>>,
    model: Option<SensorDecayModel>,
    timing: Option<DeviceTiming>,
}

impl<T, C> Default for DeviceBuilder<T, C> {
    fn default() -> Self {
        Self {
            transport: None,
            clock: None,
            actuators: None,
            display: None,
            model: None,
            timing: None,
        }
    }
}

impl<T: LineTransport, C: Clock + Default> DeviceBuilder<T, C> {
    pub fn with_transport(mut self, transport: T) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Swap the clock type (tests use a manual clock).
    pub fn with_clock<C2: Clock + Default>(self, clock: C2) -> DeviceBuilder<T, C2> {
        DeviceBuilder {
            transport: self.transport,
            clock: Some(clock),
            actuators: self.actuators,
            display: self.display,
            model: self.model,
            timing: self.timing,
        }
    }

    pub fn with_actuators(mut self, actuators: ActuatorBank) -> Self {
        self.actuators = Some(actuators);
        self
    }

    pub fn with_display(mut self, display: Box<dyn Display + Send>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn with_decay(mut self, model: SensorDecayModel) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_timing(mut self, timing: DeviceTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Apply the `[device]` and `[decay]` sections of a loaded config.
    pub fn apply_config(self, cfg: &tetra_config::Config) -> Self {
        self.with_timing(DeviceTiming::from(&cfg.device))
            .with_decay(SensorDecayModel::from(&cfg.decay))
    }

    pub fn try_build(self) -> Result<Device<T, C>> {
        let transport = self
            .transport
            .ok_or_else(|| eyre::Report::new(BuildError::MissingTransport))?;
        let timing = self.timing.unwrap_or_default();
        if timing.status_interval.is_zero() {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "status interval must be > 0",
            )));
        }
        if timing.max_line_bytes == 0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "max_line_bytes must be > 0",
            )));
        }
        let model = self.model.unwrap_or_default();
        for spec in [&model.tds, &model.turbidity, &model.ph] {
            if spec.limit > spec.initial {
                return Err(eyre::Report::new(BuildError::InvalidConfig(
                    "decay limit must be <= initial value",
                )));
            }
        }

        let machine = DeviceStateMachine::new(
            model,
            timing.warmup,
            self.actuators.unwrap_or_default(),
            self.display,
        );
        Ok(Device {
            transport,
            clock: self.clock.unwrap_or_default(),
            machine,
            decoder: LineDecoder::new(timing.max_line_bytes),
            status_cadence: Cadence::new(timing.status_interval),
            timing,
            stats: DeviceStats::default(),
        })
    }

    /// Alias for `try_build`.
    pub fn build(self) -> Result<Device<T, C>> {
        self.try_build()
    }
}
