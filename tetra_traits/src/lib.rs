pub mod clock;

pub use clock::{Cadence, Clock, MonotonicClock};

/// One physical output (pump relay, servo). `apply` drives the hardware to
/// the requested logical state; the caller keeps the commanded intent.
pub trait Actuator {
    fn apply(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Byte transport carrying newline-delimited messages.
pub trait LineTransport {
    /// Copy whatever bytes are immediately available into `buf` without
    /// blocking. Returns `Ok(0)` when nothing is pending.
    fn read_available(
        &mut self,
        buf: &mut [u8],
    ) -> Result<usize, Box<dyn std::error::Error + Send + Sync>>;

    /// Write `line` followed by a single `\n`. Implementations must send the
    /// terminated line as one unit so a reader never sees half a message.
    fn write_line(&mut self, line: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Close and reopen the underlying handle after repeated failures.
    fn reopen(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Operator-facing display. Rendering is up to the implementation.
pub trait Display {
    fn show_phase(&mut self, phase: &str);
    fn show_readings(&mut self, tds: f32, turbidity: f32, ph: f32);
    fn show_summary(&mut self, cycle: std::time::Duration);
    fn clear(&mut self);
}
