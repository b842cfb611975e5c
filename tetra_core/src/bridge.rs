//! Host-side bridge between the device transport and the remote store.
//!
//! Each pass:
//! 1. drains status lines from the device, appends measurand snapshots to
//!    history and merges every line into the local status mirror;
//! 2. reads the control document and sends a single-field command for each
//!    field that disagrees with what the device last confirmed;
//! 3. when the resync interval has elapsed, pushes the whole control
//!    document to the device and writes the mirror to the store.
//!
//! The diff always compares the store document against the last confirmed
//! values, so a status echoed back by the device is never taken for a
//! control change. A field stays pending, and is re-sent on every pass,
//! until a status line reports the sent value.
//!
//! A reported flag that differs from the last confirmed value while nothing
//! is in flight for that field changed on the device itself (start button,
//! servo at the limit). It is written into the control document before the
//! next diff, so neither reconciliation nor a resync reverts it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use eyre::WrapErr;
use tetra_traits::{Cadence, Clock, LineTransport};
use tracing::{debug, info, trace, warn};

use crate::codec::{Command, Field, Frame, LineDecoder, decode_status, encode_command};
use crate::config::BridgeTiming;
use crate::error::{Result, TetraError};
use crate::hw_error::map_transport_error;
use crate::store::{
    ControlDocument, ControlPatch, RemoteStore, StatusSnapshot, StatusView, timestamp_now,
};

const READ_CHUNK: usize = 512;
const MAX_READS_PER_PASS: usize = 64;

/// A command sent to the device and not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub value: bool,
    pub sent_at: Instant,
}

/// Process-local bookkeeping; a restart starts from scratch and therefore
/// re-sends every field once.
#[derive(Debug, Clone)]
pub struct BridgeSyncState {
    last_applied: [Option<bool>; 4],
    pending: [Option<Pending>; 4],
    pub last_forced_resync: Instant,
}

impl BridgeSyncState {
    pub fn new(now: Instant) -> Self {
        Self {
            last_applied: [None; 4],
            pending: [None; 4],
            last_forced_resync: now,
        }
    }

    /// Last value the device confirmed for `field`.
    pub fn applied(&self, field: Field) -> Option<bool> {
        self.last_applied[field.index()]
    }

    pub fn pending(&self, field: Field) -> Option<Pending> {
        self.pending[field.index()]
    }

    /// True when the device has confirmed `value` and nothing else is in flight.
    fn agrees(&self, field: Field, value: bool) -> bool {
        let i = field.index();
        self.last_applied[i] == Some(value) && self.pending[i].is_none_or(|p| p.value == value)
    }

    /// A re-send of the same value keeps the original send time.
    fn mark_sent(&mut self, field: Field, value: bool, now: Instant) {
        let slot = &mut self.pending[field.index()];
        if slot.is_some_and(|p| p.value == value) {
            return;
        }
        *slot = Some(Pending {
            value,
            sent_at: now,
        });
    }

    /// A value the device changed on its own: differs from the confirmed
    /// one with no send in flight. Unknown fields never qualify.
    fn changed_on_device(&self, field: Field, reported: bool) -> bool {
        let i = field.index();
        self.pending[i].is_none() && self.last_applied[i].is_some_and(|v| v != reported)
    }

    fn adopt(&mut self, field: Field, value: bool) {
        self.last_applied[field.index()] = Some(value);
    }

    /// Record a reported value. Returns true if it confirmed a pending send.
    fn observe(&mut self, field: Field, reported: bool) -> bool {
        let i = field.index();
        match self.pending[i] {
            Some(p) if p.value == reported => {
                self.last_applied[i] = Some(reported);
                self.pending[i] = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BridgeStats {
    pub passes: u64,
    pub lines: u64,
    pub parse_errors: u64,
    pub overflows: u64,
    pub snapshots_written: u64,
    pub history_failures: u64,
    pub backlog_dropped: u64,
    pub commands_sent: u64,
    pub confirmations: u64,
    pub unconfirmed: u64,
    pub device_changes: u64,
    pub resyncs: u64,
    pub store_errors: u64,
    pub transport_errors: u64,
    pub reopens: u64,
}

/// What one pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub lines: usize,
    pub snapshots: usize,
    pub commands_sent: usize,
    pub confirmations: usize,
    pub device_changes: usize,
    pub resynced: bool,
}

pub struct Bridge<T: LineTransport, S: RemoteStore, C: Clock> {
    transport: T,
    store: S,
    clock: C,
    timing: BridgeTiming,
    decoder: LineDecoder,
    sync: BridgeSyncState,
    mirror: StatusView,
    backlog: VecDeque<StatusSnapshot>,
    stats: BridgeStats,
    consecutive_errors: u32,
    last_reopen: Instant,
    poll: Cadence,
}

fn store_error(e: &(dyn std::error::Error + 'static)) -> TetraError {
    TetraError::Store(e.to_string())
}

impl<T: LineTransport, S: RemoteStore, C: Clock> Bridge<T, S, C> {
    pub fn new(transport: T, store: S, clock: C, timing: BridgeTiming) -> Self {
        let now = clock.now();
        Self {
            transport,
            store,
            decoder: LineDecoder::new(timing.max_line_bytes),
            sync: BridgeSyncState::new(now),
            mirror: StatusView::default(),
            backlog: VecDeque::with_capacity(timing.history_backlog),
            stats: BridgeStats::default(),
            consecutive_errors: 0,
            last_reopen: now,
            poll: Cadence::new(timing.poll),
            clock,
            timing,
        }
    }

    pub fn sync_state(&self) -> &BridgeSyncState {
        &self.sync
    }

    pub fn mirror(&self) -> &StatusView {
        &self.mirror
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Make sure the control document exists with all four fields, then
    /// stamp `lastUpdated`. Missing fields default to 0.
    pub fn initialize_control(&mut self) -> Result<()> {
        let existing = self
            .store
            .read_control()
            .map_err(|e| eyre::Report::new(store_error(e.as_ref())))
            .wrap_err("read control document")?;

        let mut patch = ControlPatch::touch(timestamp_now());
        let missing = match &existing {
            Some(doc) => doc.missing_fields(),
            None => Field::ALL.to_vec(),
        };
        for field in &missing {
            patch.fields.set(*field, false);
        }
        self.store
            .patch_control(&patch)
            .map_err(|e| eyre::Report::new(store_error(e.as_ref())))
            .wrap_err("initialize control document")?;

        if existing.is_none() {
            info!("created control document with defaults");
        } else if !missing.is_empty() {
            let keys: Vec<&str> = missing.iter().map(|f| f.key()).collect();
            info!(?keys, "filled missing control fields");
        }
        Ok(())
    }

    /// Run a pass if the poll interval has elapsed since the last one.
    pub fn tick(&mut self) -> Option<PassReport> {
        if !self.poll.fire(self.clock.now()) {
            return None;
        }
        Some(self.pass())
    }

    /// One reconciliation pass.
    pub fn pass(&mut self) -> PassReport {
        let now = self.clock.now();
        let mut report = PassReport::default();
        self.stats.passes += 1;

        self.flush_backlog();
        self.pump_status(&mut report);
        if report.confirmations > 0 {
            self.touch_control();
        }

        let doc = self.read_control();
        if let Some(doc) = &doc {
            self.reconcile(doc, now, &mut report);
        }

        if now.saturating_duration_since(self.sync.last_forced_resync) >= self.timing.resync {
            self.force_resync(doc.as_ref(), now);
            report.resynced = true;
        }

        self.maybe_reopen(now);
        trace!(?report, "bridge pass");
        report
    }

    /// Pass on the poll cadence until `shutdown` is set.
    pub fn run(&mut self, shutdown: &AtomicBool) -> BridgeStats {
        info!(
            poll_ms = self.timing.poll.as_millis() as u64,
            resync_ms = self.timing.resync.as_millis() as u64,
            "bridge loop started"
        );
        while !shutdown.load(Ordering::Relaxed) {
            self.tick();
            self.clock.sleep(self.timing.loop_period);
        }
        info!(stats = ?self.stats, "bridge loop stopped");
        self.stats.clone()
    }

    fn pump_status(&mut self, report: &mut PassReport) {
        let mut buf = [0u8; READ_CHUNK];
        for _ in 0..MAX_READS_PER_PASS {
            let n = match self.transport.read_available(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    self.note_transport_error(e.as_ref(), "read");
                    break;
                }
            };
            self.consecutive_errors = 0;
            for frame in self.decoder.feed(&buf[..n]) {
                match frame {
                    Frame::Line(line) => self.handle_status_line(&line, report),
                    Frame::Overflow { dropped } => {
                        self.stats.overflows += 1;
                        warn!(dropped, "status line exceeded buffer; discarded");
                    }
                }
            }
        }
    }

    fn handle_status_line(&mut self, line: &str, report: &mut PassReport) {
        let update = match decode_status(line) {
            Ok(u) => u,
            Err(e) => {
                self.stats.parse_errors += 1;
                warn!(error = %e, line, "discarding malformed status line");
                return;
            }
        };
        report.lines += 1;
        self.stats.lines += 1;
        self.mirror.merge(&update);

        let mut changed = Command::default();
        for field in Field::ALL {
            let Some(reported) = update.flag(field) else {
                continue;
            };
            if self.sync.observe(field, reported) {
                report.confirmations += 1;
                self.stats.confirmations += 1;
                info!(field = field.key(), value = reported, "device confirmed");
            } else if self.sync.changed_on_device(field, reported) {
                changed.set(field, reported);
            }
        }
        if !changed.is_empty() {
            report.device_changes += self.adopt_device_changes(changed);
        }

        if let Some(snapshot) = StatusSnapshot::from_update(&update) {
            report.snapshots += 1;
            self.record_snapshot(snapshot);
        }
    }

    /// Write device-side changes into the control document. Fields are only
    /// taken as confirmed once the write lands; otherwise the next status
    /// line tries again.
    fn adopt_device_changes(&mut self, changed: Command) -> usize {
        let patch = ControlPatch {
            fields: changed,
            last_updated: Some(timestamp_now()),
        };
        if let Err(e) = self.store.patch_control(&patch) {
            self.stats.store_errors += 1;
            warn!(error = %store_error(e.as_ref()), "failed to record device-side change");
            return 0;
        }
        let mut n = 0;
        for (field, value) in patch.fields.fields() {
            self.sync.adopt(field, value);
            n += 1;
            info!(field = field.key(), value, "device changed state; control document updated");
        }
        self.stats.device_changes += n as u64;
        n
    }

    fn record_snapshot(&mut self, snapshot: StatusSnapshot) {
        if !self.backlog.is_empty() {
            self.push_backlog(snapshot);
            return;
        }
        match self.store.append_history(&snapshot) {
            Ok(key) => {
                self.stats.snapshots_written += 1;
                debug!(key = %key, tds = snapshot.tds, "snapshot stored");
            }
            Err(e) => {
                self.stats.history_failures += 1;
                self.stats.store_errors += 1;
                warn!(error = %store_error(e.as_ref()), "history write failed; queued for retry");
                self.push_backlog(snapshot);
            }
        }
    }

    fn push_backlog(&mut self, snapshot: StatusSnapshot) {
        self.backlog.push_back(snapshot);
        while self.backlog.len() > self.timing.history_backlog {
            self.backlog.pop_front();
            self.stats.backlog_dropped += 1;
        }
    }

    fn flush_backlog(&mut self) {
        while let Some(snapshot) = self.backlog.front().copied() {
            match self.store.append_history(&snapshot) {
                Ok(_) => {
                    self.backlog.pop_front();
                    self.stats.snapshots_written += 1;
                }
                Err(e) => {
                    self.stats.store_errors += 1;
                    debug!(
                        error = %store_error(e.as_ref()),
                        queued = self.backlog.len(),
                        "history backlog still blocked"
                    );
                    break;
                }
            }
        }
    }

    fn read_control(&mut self) -> Option<ControlDocument> {
        match self.store.read_control() {
            Ok(Some(doc)) => Some(doc),
            Ok(None) => {
                debug!("control document missing");
                None
            }
            Err(e) => {
                self.stats.store_errors += 1;
                warn!(error = %store_error(e.as_ref()), "control read failed; retrying next pass");
                None
            }
        }
    }

    fn touch_control(&mut self) {
        if let Err(e) = self.store.patch_control(&ControlPatch::touch(timestamp_now())) {
            self.stats.store_errors += 1;
            warn!(error = %store_error(e.as_ref()), "failed to stamp lastUpdated");
        }
    }

    fn reconcile(&mut self, doc: &ControlDocument, now: Instant, report: &mut PassReport) {
        for field in Field::ALL {
            let Some(value) = doc.get(field) else {
                continue;
            };
            if self.sync.agrees(field, value) {
                continue;
            }
            if let Some(p) = self.sync.pending(field)
                && p.value == value
                && now.saturating_duration_since(p.sent_at) >= self.timing.confirm_timeout
            {
                self.stats.unconfirmed += 1;
                warn!(
                    field = field.key(),
                    value,
                    waited_ms = now.saturating_duration_since(p.sent_at).as_millis() as u64,
                    "command still unconfirmed; re-sending"
                );
            }
            if self.send_command(&Command::single(field, value)) {
                self.sync.mark_sent(field, value, now);
                report.commands_sent += 1;
                info!(field = field.key(), value, "control change sent");
            }
        }
    }

    fn force_resync(&mut self, doc: Option<&ControlDocument>, now: Instant) {
        self.sync.last_forced_resync = now;
        self.stats.resyncs += 1;
        if let Some(doc) = doc {
            let cmd = doc.to_command();
            if !cmd.is_empty() && self.send_command(&cmd) {
                for (field, value) in cmd.fields() {
                    self.sync.mark_sent(field, value, now);
                }
            }
        }
        if let Err(e) = self.store.write_status(&self.mirror) {
            self.stats.store_errors += 1;
            warn!(error = %store_error(e.as_ref()), "status mirror write failed");
        }
        debug!("forced resync");
    }

    fn send_command(&mut self, cmd: &Command) -> bool {
        let line = match encode_command(cmd) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to encode command");
                return false;
            }
        };
        match self.transport.write_line(&line) {
            Ok(()) => {
                self.consecutive_errors = 0;
                self.stats.commands_sent += 1;
                debug!(line = %line, "command sent");
                true
            }
            Err(e) => {
                self.note_transport_error(e.as_ref(), "write");
                false
            }
        }
    }

    fn note_transport_error(&mut self, e: &(dyn std::error::Error + 'static), op: &'static str) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.stats.transport_errors += 1;
        warn!(
            op,
            consecutive = self.consecutive_errors,
            error = %map_transport_error(e),
            "transport error"
        );
    }

    fn maybe_reopen(&mut self, now: Instant) {
        if self.consecutive_errors < self.timing.reopen_after_errors {
            return;
        }
        if now.saturating_duration_since(self.last_reopen) < self.timing.reopen_min_interval {
            return;
        }
        self.last_reopen = now;
        warn!(errors = self.consecutive_errors, "too many transport errors; reopening");
        match self.transport.reopen() {
            Ok(()) => {
                self.consecutive_errors = 0;
                self.decoder.reset();
                self.stats.reopens += 1;
                info!("transport reopened");
            }
            Err(e) => warn!(error = %map_transport_error(e.as_ref()), "transport reopen failed"),
        }
    }
}
