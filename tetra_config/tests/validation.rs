use rstest::rstest;
use tetra_config::{load_file, load_toml};

#[rstest]
#[case("[device]\nstatus_interval_ms = 0", "device.status_interval_ms must be >= 1")]
#[case("[device]\nmax_line_bytes = 4", "device.max_line_bytes must be >= 16")]
#[case("[bridge]\npoll_ms = 2000\nresync_ms = 1000", "bridge.resync_ms must be >= bridge.poll_ms")]
#[case("[bridge]\nmax_line_bytes = 100", "bridge.max_line_bytes must be >= device.max_line_bytes")]
#[case("[store]\nurl = \"ftp://example\"", "store.url must be an http(s) URL")]
#[case("[store]\ncontrol_path = \"tetracycle_control\"", "store.control_path must start with '/'")]
#[case("[bridge]\nconfirm_timeout_ms = 0", "bridge.confirm_timeout_ms must be >= 1")]
#[case("[serial]\nbaud = 0", "serial.baud must be > 0")]
#[case("[logging]\nrotation = \"weekly\"", "logging.rotation must be one of")]
fn rejects_invalid_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "expected '{needle}' in '{err}'"
    );
}

#[test]
fn rejects_limit_above_initial() {
    let toml = r#"
[decay.ph]
initial = 7.0
limit = 9.0
segments = [[10, 0.1]]
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("limit above initial");
    assert!(format!("{err}").contains("decay.ph.limit must be <= decay.ph.initial"));
}

#[test]
fn rejects_negative_rate_and_empty_schedule() {
    let negative = r#"
[decay.turbidity]
initial = 10.0
limit = 1.0
segments = [[10, -0.5]]
"#;
    let cfg = load_toml(negative).expect("parse TOML");
    let err = cfg.validate().expect_err("negative rate");
    assert!(format!("{err}").contains("decay.turbidity.segments[0] rate must be >= 0"));

    let empty = r#"
[decay.tds]
initial = 10.0
limit = 1.0
segments = []
"#;
    let cfg = load_toml(empty).expect("parse TOML");
    let err = cfg.validate().expect_err("empty schedule");
    assert!(format!("{err}").contains("decay.tds.segments must not be empty"));
}

#[test]
fn accepts_full_config() {
    let toml = r#"
[device]
warmup_s = 5
status_interval_ms = 500
max_line_bytes = 200
loop_ms = 20

[decay.tds]
initial = 1180.0
limit = 457.0
segments = [{ duration_s = 60, rate = 5.0 }, { duration_s = 120, rate = 2.5 }]

[bridge]
poll_ms = 1000
resync_ms = 5000
max_line_bytes = 512

[store]
url = "https://example.invalid"
timeout_ms = 2000

[serial]
baud = 115200

[logging]
level = "debug"
rotation = "daily"
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.device.warmup_s, 5);
    assert_eq!(cfg.serial.baud, 115_200);
    assert_eq!(cfg.decay.tds.segments.len(), 2);
}

#[test]
fn missing_file_yields_defaults_and_bad_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_file(&dir.path().join("absent.toml")).expect("defaults");
    assert_eq!(cfg.store.history_path, "/tetracycle_sensor_data");

    let bad = dir.path().join("bad.toml");
    std::fs::write(&bad, "[bridge]\npoll_ms = \"fast\"").unwrap();
    let err = load_file(&bad).expect_err("type error");
    assert!(format!("{err}").contains("parse config"));
}

#[test]
fn shipped_sample_config_is_valid() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../etc/tetra_config.toml");
    let cfg = load_file(&path).expect("sample config loads");
    assert_eq!(cfg.decay.ph.segments.len(), 3);
    assert_eq!(cfg.serial.baud, 9600);
    assert!(cfg.store.url.is_none());
}
