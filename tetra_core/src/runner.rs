//! Device runtime: transport in, state machine, transport out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tetra_traits::{Cadence, Clock, LineTransport};
use tracing::{debug, info, trace, warn};

use crate::codec::{Frame, LineDecoder, decode_command, encode_confirmation};
use crate::config::DeviceTiming;
use crate::device::{DeviceStateMachine, Outbound};
use crate::hw_error::map_transport_error;

const READ_CHUNK: usize = 256;
// Upper bound on reads per poll so a chatty peer cannot starve the loop.
const MAX_READS_PER_POLL: usize = 16;

/// Counters kept by the device runtime.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceStats {
    pub commands: u64,
    pub parse_errors: u64,
    pub overflows: u64,
    pub lines_sent: u64,
    pub transport_errors: u64,
    pub suppressed_status: u64,
}

/// A simulated device bound to one transport.
pub struct Device<T: LineTransport, C: Clock> {
    pub(crate) transport: T,
    pub(crate) clock: C,
    pub(crate) machine: DeviceStateMachine,
    pub(crate) decoder: LineDecoder,
    pub(crate) timing: DeviceTiming,
    pub(crate) status_cadence: Cadence,
    pub(crate) stats: DeviceStats,
}

impl<T: LineTransport, C: Clock> Device<T, C> {
    pub fn machine(&self) -> &DeviceStateMachine {
        &self.machine
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Press the start button.
    pub fn start_signal(&mut self) -> bool {
        let now = self.clock.now();
        self.machine.start_signal(now)
    }

    /// One loop iteration at the clock's current time.
    pub fn poll(&mut self) {
        let now = self.clock.now();
        self.read_commands(now);
        self.machine.advance(now);
        for out in self.machine.drain_outbound() {
            self.send(out);
        }
        self.maybe_send_status(now);
    }

    /// Poll until `shutdown` is set.
    pub fn run(&mut self, shutdown: &AtomicBool) -> DeviceStats {
        info!(
            warmup_s = self.timing.warmup.as_secs(),
            status_ms = self.timing.status_interval.as_millis() as u64,
            "device loop started"
        );
        while !shutdown.load(Ordering::Relaxed) {
            self.poll();
            self.clock.sleep(self.timing.loop_period);
        }
        info!(stats = ?self.stats, "device loop stopped");
        self.stats.clone()
    }

    fn read_commands(&mut self, now: Instant) {
        let mut buf = [0u8; READ_CHUNK];
        for _ in 0..MAX_READS_PER_POLL {
            let n = match self.transport.read_available(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    self.stats.transport_errors += 1;
                    warn!(error = %map_transport_error(e.as_ref()), "device read failed");
                    break;
                }
            };
            for frame in self.decoder.feed(&buf[..n]) {
                match frame {
                    Frame::Line(line) => self.handle_line(&line, now),
                    Frame::Overflow { dropped } => {
                        self.stats.overflows += 1;
                        warn!(dropped, cap = self.decoder.cap(), "command buffer overflow; line discarded");
                    }
                }
            }
        }
    }

    fn handle_line(&mut self, line: &str, now: Instant) {
        match decode_command(line) {
            Ok(decoded) => {
                for key in &decoded.ignored {
                    debug!(key = %key, "ignoring unknown command field");
                }
                if decoded.command.is_empty() {
                    debug!(line, "command received without recognized fields");
                    return;
                }
                self.stats.commands += 1;
                self.machine.apply_command(&decoded.command, now);
            }
            Err(e) => {
                self.stats.parse_errors += 1;
                warn!(error = %e, line, "discarding malformed command");
            }
        }
    }

    fn send(&mut self, out: Outbound) {
        let encoded = match &out {
            Outbound::Confirmation(c) => encode_confirmation(c),
            Outbound::Status(s) => s.encode(),
            Outbound::Summary { cycle } => {
                info!(cycle_s = cycle.as_secs(), "final summary");
                return;
            }
        };
        match encoded {
            Ok(line) => self.write(&line),
            Err(e) => warn!(error = %e, "failed to encode outbound line"),
        }
    }

    fn maybe_send_status(&mut self, now: Instant) {
        if !self.status_cadence.is_due(now) {
            return;
        }
        if self.decoder.is_mid_line() {
            self.stats.suppressed_status += 1;
            trace!("status suppressed while a command is mid-line");
            return;
        }
        self.status_cadence.mark(now);
        self.machine.refresh_display();
        match self.machine.status_line().encode() {
            Ok(line) => self.write(&line),
            Err(e) => warn!(error = %e, "failed to encode status"),
        }
    }

    fn write(&mut self, line: &str) {
        match self.transport.write_line(line) {
            Ok(()) => {
                self.stats.lines_sent += 1;
                trace!(line, "device sent");
            }
            Err(e) => {
                self.stats.transport_errors += 1;
                warn!(error = %map_transport_error(e.as_ref()), "device write failed");
            }
        }
    }
}
