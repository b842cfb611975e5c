//! Remote store model: control document, status history, status mirror.
//!
//! `RemoteStore` is the seam the bridge talks to. [`MemoryStore`] keeps the
//! three documents in process and is what `simulate` and the tests use; the
//! CLI provides an HTTP implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::codec::{Command, Field, StatusUpdate, coerce_flag};
use crate::util::flag_u8;

/// `lastUpdated` format used in the control document.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const LAST_UPDATED_KEY: &str = "lastUpdated";
/// Older writers used snake case.
pub const LEGACY_LAST_UPDATED_KEY: &str = "last_updated";

/// Local wall-clock time in [`TIMESTAMP_FORMAT`].
pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// The control document as read from the store, coerced to flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlDocument {
    pub pump1: Option<bool>,
    pub pump2: Option<bool>,
    pub servo: Option<bool>,
    pub system: Option<bool>,
    pub last_updated: Option<String>,
}

impl ControlDocument {
    /// Coerce a raw JSON document. Values that cannot be read as a flag are
    /// logged and treated as absent.
    pub fn from_json(v: &Value) -> Self {
        let mut doc = Self::default();
        let Value::Object(map) = v else {
            return doc;
        };
        for field in Field::ALL {
            let Some(raw) = map.get(field.key()) else {
                continue;
            };
            match coerce_flag(raw) {
                Some(on) => doc.set(field, on),
                None => warn!(field = field.key(), value = %raw, "control value is not a flag; ignoring"),
            }
        }
        doc.last_updated = map
            .get(LAST_UPDATED_KEY)
            .or_else(|| map.get(LEGACY_LAST_UPDATED_KEY))
            .and_then(Value::as_str)
            .map(str::to_owned);
        doc
    }

    pub fn get(&self, field: Field) -> Option<bool> {
        match field {
            Field::Pump1 => self.pump1,
            Field::Pump2 => self.pump2,
            Field::Servo => self.servo,
            Field::System => self.system,
        }
    }

    pub fn set(&mut self, field: Field, on: bool) {
        let slot = match field {
            Field::Pump1 => &mut self.pump1,
            Field::Pump2 => &mut self.pump2,
            Field::Servo => &mut self.servo,
            Field::System => &mut self.system,
        };
        *slot = Some(on);
    }

    /// Every present field as one command.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::default();
        for field in Field::ALL {
            if let Some(on) = self.get(field) {
                cmd.set(field, on);
            }
        }
        cmd
    }

    pub fn missing_fields(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|f| self.get(*f).is_none())
            .collect()
    }
}

/// Partial update of the control document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlPatch {
    pub fields: Command,
    pub last_updated: Option<String>,
}

impl ControlPatch {
    pub fn touch(ts: String) -> Self {
        Self {
            fields: Command::default(),
            last_updated: Some(ts),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.last_updated.is_none()
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (field, on) in self.fields.fields() {
            map.insert(field.key().to_owned(), Value::from(flag_u8(on)));
        }
        if let Some(ts) = &self.last_updated {
            map.insert(LAST_UPDATED_KEY.to_owned(), Value::from(ts.as_str()));
        }
        Value::Object(map)
    }
}

/// One history entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub ph: f64,
    pub turbidity: f64,
    pub tds: f64,
}

impl StatusSnapshot {
    /// Only lines carrying all three measurands become snapshots.
    pub fn from_update(u: &StatusUpdate) -> Option<Self> {
        let (ph, turbidity, tds) = u.measurands()?;
        Some(Self { ph, turbidity, tds })
    }
}

/// Bridge-side mirror of the latest known device status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusView {
    pub ph: f64,
    pub turbidity: f64,
    pub tds: f64,
    pub pumps: [u8; 2],
    pub servo: u8,
    pub system: u8,
}

impl StatusView {
    /// Merge a possibly partial status line. Returns true if anything changed.
    pub fn merge(&mut self, u: &StatusUpdate) -> bool {
        let before = self.clone();
        if let Some(v) = u.ph {
            self.ph = v;
        }
        if let Some(v) = u.turbidity {
            self.turbidity = v;
        }
        if let Some(v) = u.tds {
            self.tds = v;
        }
        if let Some(on) = u.flag(Field::Pump1) {
            self.pumps[0] = flag_u8(on);
        }
        if let Some(on) = u.flag(Field::Pump2) {
            self.pumps[1] = flag_u8(on);
        }
        if let Some(on) = u.servo {
            self.servo = flag_u8(on);
        }
        if let Some(on) = u.system {
            self.system = flag_u8(on);
        }
        *self != before
    }

    pub fn flag(&self, field: Field) -> bool {
        match field {
            Field::Pump1 => self.pumps[0] == 1,
            Field::Pump2 => self.pumps[1] == 1,
            Field::Servo => self.servo == 1,
            Field::System => self.system == 1,
        }
    }
}

pub type StoreResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Durable side of the bridge.
pub trait RemoteStore {
    /// Current control document, or `None` if it does not exist.
    fn read_control(&mut self) -> StoreResult<Option<ControlDocument>>;
    /// Merge `patch` into the control document, creating it if needed.
    fn patch_control(&mut self, patch: &ControlPatch) -> StoreResult<()>;
    /// Append to history; returns the store-assigned key.
    fn append_history(&mut self, snapshot: &StatusSnapshot) -> StoreResult<String>;
    /// Replace the current-status mirror.
    fn write_status(&mut self, view: &StatusView) -> StoreResult<()>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    control: Option<Map<String, Value>>,
    history: BTreeMap<String, StatusSnapshot>,
    status: Option<StatusView>,
    next_key: u64,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-process store. Clones share the same documents, so a test can play
/// the external writer while the bridge owns another handle.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
    #[error("store unavailable")]
    Unavailable,
    #[error("store lock poisoned")]
    Poisoned,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryInner) -> R) -> Result<R, MemoryStoreError> {
        let mut g = self.inner.lock().map_err(|_| MemoryStoreError::Poisoned)?;
        Ok(f(&mut g))
    }

    /// Write a raw control value the way an external client would.
    pub fn set_control_value(&self, key: &str, value: Value) {
        let _ = self.with(|s| {
            s.control
                .get_or_insert_with(Map::new)
                .insert(key.to_owned(), value);
        });
    }

    pub fn remove_control(&self) {
        let _ = self.with(|s| s.control = None);
    }

    pub fn control_json(&self) -> Option<Value> {
        self.with(|s| s.control.clone().map(Value::Object))
            .ok()
            .flatten()
    }

    /// History in key order.
    pub fn history(&self) -> Vec<(String, StatusSnapshot)> {
        self.with(|s| s.history.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }

    pub fn status(&self) -> Option<StatusView> {
        self.with(|s| s.status.clone()).ok().flatten()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        let _ = self.with(|s| s.fail_reads = fail);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        let _ = self.with(|s| s.fail_writes = fail);
    }
}

impl RemoteStore for MemoryStore {
    fn read_control(&mut self) -> StoreResult<Option<ControlDocument>> {
        let out = self.with(|s| {
            if s.fail_reads {
                return Err(MemoryStoreError::Unavailable);
            }
            Ok(s.control
                .as_ref()
                .map(|m| ControlDocument::from_json(&Value::Object(m.clone()))))
        })??;
        Ok(out)
    }

    fn patch_control(&mut self, patch: &ControlPatch) -> StoreResult<()> {
        self.with(|s| {
            if s.fail_writes {
                return Err(MemoryStoreError::Unavailable);
            }
            let doc = s.control.get_or_insert_with(Map::new);
            if let Value::Object(fields) = patch.to_json() {
                doc.extend(fields);
            }
            Ok(())
        })??;
        Ok(())
    }

    fn append_history(&mut self, snapshot: &StatusSnapshot) -> StoreResult<String> {
        let key = self.with(|s| {
            if s.fail_writes {
                return Err(MemoryStoreError::Unavailable);
            }
            s.next_key += 1;
            let key = format!("{:016}", s.next_key);
            s.history.insert(key.clone(), *snapshot);
            Ok(key)
        })??;
        Ok(key)
    }

    fn write_status(&mut self, view: &StatusView) -> StoreResult<()> {
        self.with(|s| {
            if s.fail_writes {
                return Err(MemoryStoreError::Unavailable);
            }
            s.status = Some(view.clone());
            Ok(())
        })??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_status;
    use serde_json::json;

    #[test]
    fn control_document_coerces_and_skips_garbage() {
        let doc = ControlDocument::from_json(&json!({
            "pump1": "1",
            "pump2": null,
            "servo": {"x": 1},
            "system": 2,
            "last_updated": "2024-01-01 00:00:00"
        }));
        assert_eq!(doc.pump1, Some(true));
        assert_eq!(doc.pump2, Some(false));
        assert_eq!(doc.servo, None);
        assert_eq!(doc.system, Some(true));
        assert_eq!(doc.last_updated.as_deref(), Some("2024-01-01 00:00:00"));
        assert_eq!(doc.missing_fields(), vec![Field::Servo]);
    }

    #[test]
    fn patch_serializes_flags_and_timestamp() {
        let patch = ControlPatch {
            fields: Command::single(Field::Pump2, true),
            last_updated: Some("t".into()),
        };
        assert_eq!(patch.to_json(), json!({"pump2": 1, "lastUpdated": "t"}));
    }

    #[test]
    fn view_merges_partial_lines() {
        let mut view = StatusView::default();
        assert!(view.merge(&decode_status(r#"{"pump2":1,"pumps":[0,1]}"#).unwrap()));
        assert_eq!(view.pumps, [0, 1]);
        assert!(!view.merge(&decode_status(r#"{"pump2":1}"#).unwrap()));
        assert!(view.merge(&decode_status(r#"{"ph":7.5,"turbidity":2,"tds":500}"#).unwrap()));
        assert_eq!(view.tds, 500.0);
        assert_eq!(view.pumps, [0, 1]);
    }

    #[test]
    fn memory_store_assigns_ordered_keys() {
        let mut store = MemoryStore::new();
        let s = StatusSnapshot {
            ph: 9.5,
            turbidity: 553.0,
            tds: 1180.0,
        };
        let a = store.append_history(&s).unwrap();
        let b = store.append_history(&s).unwrap();
        assert!(a < b);
        assert_eq!(store.history().len(), 2);
    }

    #[test]
    fn memory_store_failure_injection() {
        let mut store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.patch_control(&ControlPatch::touch("t".into())).is_err());
        store.set_fail_writes(false);
        store.set_fail_reads(true);
        assert!(store.read_control().is_err());
        store.set_fail_reads(false);
        assert!(store.read_control().unwrap().is_none());
    }
}
