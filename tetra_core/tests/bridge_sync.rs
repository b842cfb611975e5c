use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;
use tetra_core::{
    Bridge, BridgeTiming, Device, Field, LifecyclePhase, MemoryStore, RemoteStore,
};
use tetra_hardware::LoopbackTransport;
use tetra_traits::clock::test_clock::TestClock;

struct Rig {
    device: Device<LoopbackTransport, TestClock>,
    bridge: Bridge<LoopbackTransport, MemoryStore, TestClock>,
    store: MemoryStore,
    clock: TestClock,
}

impl Rig {
    fn new(timing: BridgeTiming) -> Self {
        let (dev_end, host_end) = LoopbackTransport::pair();
        let clock = TestClock::new();
        let store = MemoryStore::new();
        let device = Device::builder()
            .with_transport(dev_end)
            .with_clock(clock.clone())
            .try_build()
            .expect("device build");
        let bridge = Bridge::new(host_end, store.clone(), clock.clone(), timing);
        Self {
            device,
            bridge,
            store,
            clock,
        }
    }

    fn run_for(&mut self, d: Duration) {
        let step = Duration::from_millis(50);
        let mut t = Duration::ZERO;
        while t < d {
            self.clock.advance(step);
            self.device.poll();
            self.bridge.tick();
            t += step;
        }
    }
}

fn no_resync() -> BridgeTiming {
    BridgeTiming {
        resync: Duration::from_secs(3600),
        ..BridgeTiming::default()
    }
}

#[test]
fn initialize_creates_missing_document() {
    let mut rig = Rig::new(BridgeTiming::default());
    rig.bridge.initialize_control().unwrap();
    let doc = rig.store.control_json().unwrap();
    for key in ["pump1", "pump2", "servo", "system"] {
        assert_eq!(doc[key], 0, "{key}");
    }
    assert!(doc["lastUpdated"].is_string());
}

#[test]
fn initialize_fills_only_missing_fields() {
    let mut rig = Rig::new(BridgeTiming::default());
    rig.store.set_control_value("pump2", json!(1));
    rig.bridge.initialize_control().unwrap();
    let doc = rig.store.control_json().unwrap();
    assert_eq!(doc["pump2"], 1);
    assert_eq!(doc["pump1"], 0);
}

#[test]
fn initialize_reports_unreachable_store() {
    let mut rig = Rig::new(BridgeTiming::default());
    rig.store.set_fail_reads(true);
    assert!(rig.bridge.initialize_control().is_err());
}

#[test]
fn control_change_reaches_device_and_is_confirmed() {
    let mut rig = Rig::new(no_resync());
    rig.bridge.initialize_control().unwrap();
    rig.run_for(Duration::from_secs(3));

    rig.store.set_control_value("pump1", json!(1));
    rig.run_for(Duration::from_secs(3));

    assert!(rig.device.machine().state().intent.pump1);
    assert_eq!(rig.bridge.sync_state().applied(Field::Pump1), Some(true));
    assert_eq!(rig.bridge.sync_state().pending(Field::Pump1), None);
    assert_eq!(rig.bridge.mirror().pumps, [1, 0]);
    let doc = rig.store.control_json().unwrap();
    assert_eq!(doc["pump1"], 1);
    assert!(doc["lastUpdated"].is_string());
}

#[test]
fn system_command_starts_the_cycle() {
    let mut rig = Rig::new(no_resync());
    rig.bridge.initialize_control().unwrap();
    rig.store.set_control_value("system", json!(1));
    rig.run_for(Duration::from_secs(3));
    assert_eq!(rig.device.machine().phase(), LifecyclePhase::WarmUp);
    rig.run_for(Duration::from_secs(10));
    assert_eq!(rig.device.machine().phase(), LifecyclePhase::Running);
    assert_eq!(rig.bridge.mirror().system, 1);
}

#[test]
fn echoed_status_is_not_a_control_change() {
    let mut rig = Rig::new(no_resync());
    rig.bridge.initialize_control().unwrap();
    rig.store.set_control_value("servo", json!(1));
    rig.run_for(Duration::from_secs(3));
    let sent = rig.bridge.stats().commands_sent;

    rig.run_for(Duration::from_secs(10));
    assert_eq!(rig.bridge.stats().commands_sent, sent);
    assert!(rig.bridge.stats().lines > 10);
    assert_eq!(rig.store.control_json().unwrap()["servo"], 1);
}

#[test]
fn coerces_external_values() {
    let mut rig = Rig::new(no_resync());
    rig.bridge.initialize_control().unwrap();
    rig.store.set_control_value("pump2", json!("1"));
    rig.store.set_control_value("servo", json!(null));
    rig.store.set_control_value("pump1", json!({"bogus": true}));
    rig.run_for(Duration::from_secs(3));

    let intent = rig.device.machine().state().intent;
    assert!(intent.pump2);
    assert!(!intent.servo);
    assert!(!intent.pump1);
    assert_eq!(rig.bridge.sync_state().applied(Field::Pump1), None);
}

#[test]
fn snapshots_are_appended_for_full_status_lines_only() {
    let mut rig = Rig::new(no_resync());
    rig.bridge.initialize_control().unwrap();
    rig.run_for(Duration::from_secs(5));
    let history = rig.store.history();
    assert!(history.len() >= 4);
    let (_, first) = history[0];
    assert_eq!(first.tds, 1180.0);
    assert_eq!(
        history.len() as u64,
        rig.bridge.stats().snapshots_written
    );
}

#[test]
fn failed_history_writes_are_retried() {
    let mut rig = Rig::new(no_resync());
    rig.bridge.initialize_control().unwrap();
    rig.store.set_fail_writes(true);
    rig.run_for(Duration::from_secs(4));
    assert!(rig.store.history().is_empty());
    let queued = rig.bridge.backlog_len();
    assert!(queued >= 3);

    rig.store.set_fail_writes(false);
    rig.run_for(Duration::from_secs(2));
    assert_eq!(rig.bridge.backlog_len(), 0);
    assert!(rig.store.history().len() > queued);
}

#[test]
fn backlog_drops_oldest_when_full() {
    let mut rig = Rig::new(BridgeTiming {
        history_backlog: 2,
        ..no_resync()
    });
    rig.bridge.initialize_control().unwrap();
    rig.store.set_fail_writes(true);
    rig.run_for(Duration::from_secs(6));
    assert_eq!(rig.bridge.backlog_len(), 2);
    assert!(rig.bridge.stats().backlog_dropped > 0);
}

#[test]
fn unreachable_store_leaves_device_alone() {
    let mut rig = Rig::new(no_resync());
    rig.bridge.initialize_control().unwrap();
    rig.store.set_control_value("pump1", json!(1));
    rig.store.set_fail_reads(true);
    rig.run_for(Duration::from_secs(3));
    assert!(!rig.device.machine().state().intent.pump1);
    assert!(rig.bridge.stats().store_errors > 0);

    rig.store.set_fail_reads(false);
    rig.run_for(Duration::from_secs(3));
    assert!(rig.device.machine().state().intent.pump1);
}

#[test]
fn forced_resync_pushes_document_and_mirror() {
    let mut rig = Rig::new(BridgeTiming::default());
    rig.bridge.initialize_control().unwrap();
    rig.store.set_control_value("pump2", json!(1));
    rig.run_for(Duration::from_secs(6));

    assert!(rig.bridge.stats().resyncs >= 1);
    assert!(rig.device.machine().state().intent.pump2);
    let status = rig.store.status().expect("status mirror written");
    assert_eq!(status.pumps, [0, 1]);
}

#[test]
fn physical_start_survives_resync() {
    let mut rig = Rig::new(BridgeTiming::default());
    rig.bridge.initialize_control().unwrap();
    rig.run_for(Duration::from_secs(2));

    assert!(rig.device.start_signal());
    rig.run_for(Duration::from_secs(6));

    assert!(rig.bridge.stats().resyncs >= 1);
    assert_ne!(rig.device.machine().phase(), LifecyclePhase::Idle);
    assert_eq!(rig.store.control_json().unwrap()["system"], 1);
    assert_eq!(rig.bridge.sync_state().applied(Field::System), Some(true));
    assert!(rig.bridge.stats().device_changes >= 1);
}

#[test]
fn servo_moved_at_limit_survives_resync() {
    let mut rig = Rig::new(BridgeTiming::default());
    rig.bridge.initialize_control().unwrap();
    rig.store.set_control_value("system", json!(1));
    rig.run_for(Duration::from_secs(400));

    assert_eq!(rig.device.machine().phase(), LifecyclePhase::FinalDisplayed);
    assert!(rig.device.machine().state().intent.servo);
    assert_eq!(rig.store.control_json().unwrap()["servo"], 1);
    assert_eq!(rig.bridge.mirror().servo, 1);
}

#[test]
fn device_change_waits_for_a_writable_store() {
    let mut rig = Rig::new(no_resync());
    rig.bridge.initialize_control().unwrap();
    rig.run_for(Duration::from_secs(2));

    rig.store.set_fail_writes(true);
    assert!(rig.device.start_signal());
    rig.run_for(Duration::from_secs(2));
    assert_eq!(rig.bridge.sync_state().applied(Field::System), Some(false));
    assert_eq!(rig.bridge.stats().device_changes, 0);

    rig.store.set_fail_writes(false);
    rig.run_for(Duration::from_secs(2));
    assert_eq!(rig.bridge.sync_state().applied(Field::System), Some(true));
    assert_eq!(rig.store.control_json().unwrap()["system"], 1);
}

#[test]
fn transport_is_reopened_after_repeated_errors() {
    let mut rig = Rig::new(BridgeTiming {
        reopen_after_errors: 3,
        reopen_min_interval: Duration::from_secs(1),
        ..no_resync()
    });
    rig.bridge.initialize_control().unwrap();
    let faults = rig.bridge.transport_mut().faults();
    faults.set_failing(true);
    rig.run_for(Duration::from_secs(6));

    assert!(faults.reopen_count() >= 1);
    assert!(rig.bridge.stats().reopens >= 1);
    assert!(!faults.is_failing());
}

#[test]
fn silent_device_leaves_command_pending_and_reported() {
    let mut rig = Rig::new(no_resync());
    rig.bridge.initialize_control().unwrap();
    rig.store.set_control_value("pump2", json!(1));

    // the device never polls, so nothing is ever confirmed
    let step = Duration::from_millis(250);
    rig.bridge.tick();
    let first = rig.bridge.sync_state().pending(Field::Pump2).expect("sent");
    for _ in 0..20 {
        rig.clock.advance(step);
        rig.bridge.tick();
    }

    let pending = rig.bridge.sync_state().pending(Field::Pump2).expect("still pending");
    assert_eq!(pending.sent_at, first.sent_at);
    assert!(rig.bridge.stats().unconfirmed >= 1);
    assert!(rig.bridge.stats().commands_sent > 4);
    assert_eq!(rig.bridge.sync_state().applied(Field::Pump2), None);
}

#[test]
fn control_read_failure_is_not_fatal_for_history() {
    let mut rig = Rig::new(no_resync());
    rig.bridge.initialize_control().unwrap();
    rig.store.set_fail_reads(true);
    rig.run_for(Duration::from_secs(3));
    assert!(!rig.store.history().is_empty());
}

#[test]
fn memory_store_round_trips_through_trait() {
    let mut store = MemoryStore::new();
    store.set_control_value("system", json!(true));
    let doc = store.read_control().unwrap().unwrap();
    assert_eq!(doc.system, Some(true));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn device_converges_on_any_document(flags in prop::array::uniform3(any::<bool>())) {
        let mut rig = Rig::new(no_resync());
        rig.bridge.initialize_control().unwrap();
        rig.store.set_control_value("pump1", json!(u8::from(flags[0])));
        rig.store.set_control_value("pump2", json!(u8::from(flags[1])));
        rig.store.set_control_value("servo", json!(u8::from(flags[2])));
        rig.run_for(Duration::from_secs(4));

        let intent = rig.device.machine().state().intent;
        prop_assert_eq!([intent.pump1, intent.pump2, intent.servo], flags);
        let mirror = rig.bridge.mirror();
        prop_assert_eq!(mirror.pumps, [u8::from(flags[0]), u8::from(flags[1])]);
        prop_assert_eq!(mirror.servo, u8::from(flags[2]));
        for (i, field) in [Field::Pump1, Field::Pump2, Field::Servo].into_iter().enumerate() {
            prop_assert_eq!(rig.bridge.sync_state().applied(field), Some(flags[i]));
        }
    }
}
