//! Line protocol: one JSON object per `\n`-terminated line.
//!
//! Commands flow bridge → device, status lines flow device → bridge. Both
//! directions share [`LineDecoder`] for framing; it enforces a byte cap and
//! drops an oversized line whole instead of interpreting a fragment.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::decay::Measurands;
use crate::error::CodecError;
use crate::util::{flag_u8, round2};

/// Control fields, in the order they are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Pump1,
    Pump2,
    Servo,
    System,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Pump1, Field::Pump2, Field::Servo, Field::System];

    pub fn key(self) -> &'static str {
        match self {
            Self::Pump1 => "pump1",
            Self::Pump2 => "pump2",
            Self::Servo => "servo",
            Self::System => "system",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    pub fn index(self) -> usize {
        match self {
            Self::Pump1 => 0,
            Self::Pump2 => 1,
            Self::Servo => 2,
            Self::System => 3,
        }
    }
}

/// Coerce a JSON value to a flag: `null` is off, numbers and numeric strings
/// are on when non-zero, booleans pass through. Anything else is `None`.
pub fn coerce_flag(v: &Value) -> Option<bool> {
    match v {
        Value::Null => Some(false),
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f != 0.0),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// A set of requested control values; absent fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Command {
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "ser_flag")]
    pub pump1: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "ser_flag")]
    pub pump2: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "ser_flag")]
    pub servo: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "ser_flag")]
    pub system: Option<bool>,
}

fn ser_flag<S: serde::Serializer>(v: &Option<bool>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u8(flag_u8(v.unwrap_or(false)))
}

impl Command {
    pub fn single(field: Field, value: bool) -> Self {
        let mut c = Self::default();
        c.set(field, value);
        c
    }

    pub fn get(&self, field: Field) -> Option<bool> {
        match field {
            Field::Pump1 => self.pump1,
            Field::Pump2 => self.pump2,
            Field::Servo => self.servo,
            Field::System => self.system,
        }
    }

    pub fn set(&mut self, field: Field, value: bool) {
        let slot = match field {
            Field::Pump1 => &mut self.pump1,
            Field::Pump2 => &mut self.pump2,
            Field::Servo => &mut self.servo,
            Field::System => &mut self.system,
        };
        *slot = Some(value);
    }

    pub fn is_empty(&self) -> bool {
        self.fields().next().is_none()
    }

    /// Present fields in application order.
    pub fn fields(&self) -> impl Iterator<Item = (Field, bool)> + '_ {
        Field::ALL
            .into_iter()
            .filter_map(|f| self.get(f).map(|v| (f, v)))
    }
}

/// A decoded command plus the keys that were not recognized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedCommand {
    pub command: Command,
    pub ignored: Vec<String>,
}

fn parse_object(line: &str) -> Result<Map<String, Value>, CodecError> {
    match serde_json::from_str::<Value>(line)? {
        Value::Object(map) => Ok(map),
        Value::Null => Err(CodecError::NotAnObject("null")),
        Value::Bool(_) => Err(CodecError::NotAnObject("bool")),
        Value::Number(_) => Err(CodecError::NotAnObject("number")),
        Value::String(_) => Err(CodecError::NotAnObject("string")),
        Value::Array(_) => Err(CodecError::NotAnObject("array")),
    }
}

/// Decode one command line. Recognized fields whose value cannot be coerced
/// are treated as off.
pub fn decode_command(line: &str) -> Result<DecodedCommand, CodecError> {
    let map = parse_object(line)?;
    let mut out = DecodedCommand::default();
    for (key, value) in &map {
        match Field::from_key(key) {
            Some(field) => out.command.set(field, coerce_flag(value).unwrap_or(false)),
            None => out.ignored.push(key.clone()),
        }
    }
    Ok(out)
}

/// Encode a command as a single line (no trailing newline).
pub fn encode_command(cmd: &Command) -> Result<String, CodecError> {
    Ok(serde_json::to_string(cmd)?)
}

/// Full status line, built from tracked intent, never from hardware reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusLine {
    pub ph: f64,
    pub turbidity: f64,
    pub tds: f64,
    pub pumps: [u8; 2],
    pub servo: u8,
    pub system: u8,
    pub pump1: u8,
    pub pump2: u8,
}

impl StatusLine {
    pub fn new(m: &Measurands, pumps: [bool; 2], servo: bool, system: bool) -> Self {
        Self {
            ph: round2(m.ph),
            turbidity: round2(m.turbidity),
            tds: round2(m.tds),
            pumps: [flag_u8(pumps[0]), flag_u8(pumps[1])],
            servo: flag_u8(servo),
            system: flag_u8(system),
            pump1: flag_u8(pumps[0]),
            pump2: flag_u8(pumps[1]),
        }
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Per-field acknowledgement of an applied command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub field: Field,
    pub value: bool,
    /// Both pump intents after the update
    pub pumps: [bool; 2],
}

/// Encode a confirmation. Pump confirmations also carry the combined
/// `pumps` array so older readers that only look at it stay in sync.
pub fn encode_confirmation(c: &Confirmation) -> Result<String, CodecError> {
    let mut map = Map::new();
    map.insert(c.field.key().to_owned(), Value::from(flag_u8(c.value)));
    if matches!(c.field, Field::Pump1 | Field::Pump2) {
        map.insert(
            "pumps".to_owned(),
            Value::from(vec![flag_u8(c.pumps[0]), flag_u8(c.pumps[1])]),
        );
    }
    Ok(serde_json::to_string(&Value::Object(map))?)
}

/// A decoded status line. Every field is optional because confirmations
/// carry only the field they acknowledge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub ph: Option<f64>,
    pub turbidity: Option<f64>,
    pub tds: Option<f64>,
    pub pumps: Option<[bool; 2]>,
    pub pump1: Option<bool>,
    pub pump2: Option<bool>,
    pub servo: Option<bool>,
    pub system: Option<bool>,
}

impl StatusUpdate {
    /// `(ph, turbidity, tds)` when the line carries all three.
    pub fn measurands(&self) -> Option<(f64, f64, f64)> {
        Some((self.ph?, self.turbidity?, self.tds?))
    }

    /// Reported value of a control field. Explicit `pump1`/`pump2` keys win
    /// over the `pumps` array.
    pub fn flag(&self, field: Field) -> Option<bool> {
        match field {
            Field::Pump1 => self.pump1.or(self.pumps.map(|p| p[0])),
            Field::Pump2 => self.pump2.or(self.pumps.map(|p| p[1])),
            Field::Servo => self.servo,
            Field::System => self.system,
        }
    }
}

pub fn decode_status(line: &str) -> Result<StatusUpdate, CodecError> {
    let map = parse_object(line)?;
    let number = |k: &str| map.get(k).and_then(Value::as_f64);
    let flag = |k: &str| map.get(k).and_then(coerce_flag);
    let pumps = match map.get("pumps") {
        Some(Value::Array(items)) if items.len() == 2 => {
            match (coerce_flag(&items[0]), coerce_flag(&items[1])) {
                (Some(a), Some(b)) => Some([a, b]),
                _ => None,
            }
        }
        _ => None,
    };
    Ok(StatusUpdate {
        ph: number("ph"),
        turbidity: number("turbidity"),
        tds: number("tds"),
        pumps,
        pump1: flag("pump1"),
        pump2: flag("pump2"),
        servo: flag("servo"),
        system: flag("system"),
    })
}

/// Output of [`LineDecoder::feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line without its terminator.
    Line(String),
    /// The cap was hit before a newline; `dropped` buffered bytes were
    /// discarded and the rest of the line will be skipped.
    Overflow { dropped: usize },
}

/// Bounded newline framer.
#[derive(Debug)]
pub struct LineDecoder {
    buf: Vec<u8>,
    cap: usize,
    discarding: bool,
    overflows: u64,
}

impl LineDecoder {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            buf: Vec::with_capacity(cap),
            cap,
            discarding: false,
            overflows: 0,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                let mut raw = std::mem::take(&mut self.buf);
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                frames.push(Frame::Line(line.to_owned()));
                continue;
            }
            if self.discarding {
                continue;
            }
            if self.buf.len() >= self.cap {
                let dropped = self.buf.len() + 1;
                self.buf.clear();
                self.discarding = true;
                self.overflows = self.overflows.saturating_add(1);
                debug!(dropped, cap = self.cap, "line exceeded cap");
                frames.push(Frame::Overflow { dropped });
                continue;
            }
            self.buf.push(b);
        }
        frames
    }

    /// True while a partial line is buffered or an oversized one is being skipped.
    pub fn is_mid_line(&self) -> bool {
        self.discarding || !self.buf.is_empty()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!(null), Some(false))]
    #[case(json!(true), Some(true))]
    #[case(json!(0), Some(false))]
    #[case(json!(2), Some(true))]
    #[case(json!(0.5), Some(true))]
    #[case(json!("1"), Some(true))]
    #[case(json!(" 0 "), Some(false))]
    #[case(json!("on"), None)]
    #[case(json!([1]), None)]
    fn coerces_flags(#[case] v: Value, #[case] expected: Option<bool>) {
        assert_eq!(coerce_flag(&v), expected);
    }

    #[test]
    fn decode_keeps_known_fields_and_reports_unknown() {
        let d = decode_command(r#"{"pump1":1,"led":1,"system":"0"}"#).unwrap();
        assert_eq!(d.command.pump1, Some(true));
        assert_eq!(d.command.system, Some(false));
        assert_eq!(d.command.servo, None);
        assert_eq!(d.ignored, vec!["led".to_string()]);
    }

    #[test]
    fn decode_rejects_non_objects() {
        assert!(matches!(
            decode_command("[1,2]"),
            Err(CodecError::NotAnObject("array"))
        ));
        assert!(matches!(
            decode_command("{\"pump1\":"),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn command_fields_follow_application_order() {
        let d = decode_command(r#"{"system":1,"servo":0,"pump2":1,"pump1":0}"#).unwrap();
        let order: Vec<Field> = d.command.fields().map(|(f, _)| f).collect();
        assert_eq!(order, Field::ALL.to_vec());
    }

    #[test]
    fn encode_command_uses_integers() {
        let line = encode_command(&Command::single(Field::Servo, true)).unwrap();
        assert_eq!(line, r#"{"servo":1}"#);
        let mut full = Command::single(Field::Pump1, false);
        full.set(Field::System, true);
        assert_eq!(encode_command(&full).unwrap(), r#"{"pump1":0,"system":1}"#);
    }

    #[test]
    fn status_line_has_wire_field_order() {
        let m = Measurands {
            tds: 1180.0,
            turbidity: 553.0,
            ph: 9.5,
        };
        let line = StatusLine::new(&m, [true, false], false, true).encode().unwrap();
        assert_eq!(
            line,
            r#"{"ph":9.5,"turbidity":553.0,"tds":1180.0,"pumps":[1,0],"servo":0,"system":1,"pump1":1,"pump2":0}"#
        );
    }

    #[test]
    fn pump_confirmation_embeds_pumps_array() {
        let c = Confirmation {
            field: Field::Pump2,
            value: true,
            pumps: [false, true],
        };
        assert_eq!(encode_confirmation(&c).unwrap(), r#"{"pump2":1,"pumps":[0,1]}"#);
        let s = Confirmation {
            field: Field::Servo,
            value: true,
            pumps: [true, true],
        };
        assert_eq!(encode_confirmation(&s).unwrap(), r#"{"servo":1}"#);
    }

    #[test]
    fn status_update_prefers_explicit_pump_keys() {
        let u = decode_status(r#"{"pumps":[1,1],"pump2":0}"#).unwrap();
        assert_eq!(u.flag(Field::Pump1), Some(true));
        assert_eq!(u.flag(Field::Pump2), Some(false));
        assert_eq!(u.measurands(), None);
    }

    #[test]
    fn decoder_splits_lines_and_strips_cr() {
        let mut d = LineDecoder::new(64);
        let frames = d.feed(b"{\"a\":1}\r\n\n{\"b\"");
        assert_eq!(frames, vec![Frame::Line("{\"a\":1}".into())]);
        assert!(d.is_mid_line());
        let frames = d.feed(b":2}\n");
        assert_eq!(frames, vec![Frame::Line("{\"b\":2}".into())]);
        assert!(!d.is_mid_line());
    }

    #[test]
    fn decoder_drops_oversized_line_until_newline() {
        let mut d = LineDecoder::new(8);
        let frames = d.feed(b"0123456789abc");
        assert_eq!(frames, vec![Frame::Overflow { dropped: 9 }]);
        assert!(d.is_mid_line());
        let frames = d.feed(b"def\n{\"x\":1}\n");
        assert_eq!(frames, vec![Frame::Line("{\"x\":1}".into())]);
        assert_eq!(d.overflows(), 1);
    }

    #[test]
    fn line_at_cap_is_accepted() {
        let mut d = LineDecoder::new(4);
        assert_eq!(d.feed(b"abcd\n"), vec![Frame::Line("abcd".into())]);
    }
}
