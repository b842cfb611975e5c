//! REST document store over HTTP.
//!
//! Documents live at `<base><path>.json`: the control document is read with
//! `GET` and stamped with `PATCH`, history entries are `POST`ed (the server
//! answers with `{"name": <key>}`), and the status mirror is `PUT`.

use std::time::Duration;

use eyre::WrapErr;
use reqwest::blocking::{Client, Response};
use serde_json::Value;
use tetra_core::store::{StoreResult, timestamp_now};
use tetra_core::{
    ControlDocument, ControlPatch, Field, RemoteStore, StatusSnapshot, StatusView, StorePaths,
    TetraError,
};

pub struct HttpStore {
    client: Client,
    base: String,
    paths: StorePaths,
}

fn store_err(msg: impl Into<String>) -> Box<dyn std::error::Error + Send + Sync> {
    Box::new(TetraError::Store(msg.into()))
}

fn check(resp: Response) -> StoreResult<Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(store_err(format!("{} answered HTTP {status}", resp.url())))
    }
}

impl HttpStore {
    pub fn new(base: &str, paths: StorePaths, timeout: Duration) -> eyre::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("build HTTP client")?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_owned(),
            paths,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}.json", self.base, path)
    }
}

impl RemoteStore for HttpStore {
    fn read_control(&mut self) -> StoreResult<Option<ControlDocument>> {
        let resp = self.client.get(self.url(&self.paths.control)).send()?;
        let value: Value = check(resp)?.json()?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(ControlDocument::from_json(&value)))
    }

    fn patch_control(&mut self, patch: &ControlPatch) -> StoreResult<()> {
        let resp = self
            .client
            .patch(self.url(&self.paths.control))
            .json(&patch.to_json())
            .send()?;
        check(resp)?;
        Ok(())
    }

    fn append_history(&mut self, snapshot: &StatusSnapshot) -> StoreResult<String> {
        let resp = self
            .client
            .post(self.url(&self.paths.history))
            .json(snapshot)
            .send()?;
        let value: Value = check(resp)?.json()?;
        value
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| store_err("history append returned no key"))
    }

    fn write_status(&mut self, view: &StatusView) -> StoreResult<()> {
        let resp = self
            .client
            .put(self.url(&self.paths.status))
            .json(view)
            .send()?;
        check(resp)?;
        Ok(())
    }
}

/// Outcome of a store connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub control_present: bool,
    pub missing_fields: Vec<&'static str>,
}

/// Read the control document and stamp `lastUpdated`, as the bridge does at
/// startup. Fails with a store error if either request fails.
pub fn probe(store: &mut impl RemoteStore) -> eyre::Result<ProbeReport> {
    let doc = store
        .read_control()
        .map_err(|e| eyre::Report::new(TetraError::Store(e.to_string())))
        .wrap_err("read control document")?;
    store
        .patch_control(&ControlPatch::touch(timestamp_now()))
        .map_err(|e| eyre::Report::new(TetraError::Store(e.to_string())))
        .wrap_err("stamp control document")?;
    let missing_fields = match &doc {
        Some(doc) => doc.missing_fields().iter().map(|f| f.key()).collect(),
        None => Field::ALL.iter().map(|f| f.key()).collect(),
    };
    Ok(ProbeReport {
        control_present: doc.is_some(),
        missing_fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    /// Serve one canned response and hand back the request line and body.
    fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, mpsc::Receiver<(String, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut content_length = 0usize;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                if header == "\r\n" || header.is_empty() {
                    break;
                }
                let lower = header.to_ascii_lowercase();
                if let Some(v) = lower.strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap();
                }
            }
            let mut req_body = vec![0u8; content_length];
            reader.read_exact(&mut req_body).unwrap();
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            stream.flush().unwrap();
            tx.send((
                request_line.trim_end().to_owned(),
                String::from_utf8(req_body).unwrap(),
            ))
            .unwrap();
        });
        (base, rx)
    }

    fn store(base: &str) -> HttpStore {
        HttpStore::new(base, StorePaths::default(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn urls_append_json_suffix() {
        let s = store("http://example.test/");
        assert_eq!(s.base(), "http://example.test");
        assert_eq!(
            s.url("/tetracycle_control"),
            "http://example.test/tetracycle_control.json"
        );
    }

    #[test]
    fn history_append_returns_server_key() {
        let (base, rx) = serve_once("200 OK", r#"{"name":"-Nabc123"}"#);
        let mut s = store(&base);
        let key = s
            .append_history(&StatusSnapshot {
                ph: 9.5,
                turbidity: 553.0,
                tds: 1180.0,
            })
            .unwrap();
        assert_eq!(key, "-Nabc123");

        let (line, body) = rx.recv().unwrap();
        assert!(line.starts_with("POST /tetracycle_sensor_data.json"), "{line}");
        let sent: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(sent["tds"], 1180.0);
    }

    #[test]
    fn null_control_document_reads_as_missing() {
        let (base, rx) = serve_once("200 OK", "null");
        let mut s = store(&base);
        assert!(s.read_control().unwrap().is_none());
        let (line, _) = rx.recv().unwrap();
        assert!(line.starts_with("GET /tetracycle_control.json"), "{line}");
    }

    #[test]
    fn control_document_is_coerced() {
        let (base, _rx) = serve_once("200 OK", r#"{"pump1":"1","servo":0,"system":true}"#);
        let mut s = store(&base);
        let doc = s.read_control().unwrap().unwrap();
        assert_eq!(doc.pump1, Some(true));
        assert_eq!(doc.servo, Some(false));
        assert_eq!(doc.system, Some(true));
        assert_eq!(doc.pump2, None);
    }

    #[test]
    fn probe_reports_missing_fields_and_stamps() {
        let mut mem = tetra_core::MemoryStore::new();
        mem.set_control_value("pump1", serde_json::json!(0));
        let report = probe(&mut mem).unwrap();
        assert!(report.control_present);
        assert_eq!(report.missing_fields, vec!["pump2", "servo", "system"]);
        assert!(mem.control_json().unwrap()["lastUpdated"].is_string());
    }

    #[test]
    fn probe_fails_on_unreachable_store() {
        let mut mem = tetra_core::MemoryStore::new();
        mem.set_fail_reads(true);
        let err = probe(&mut mem).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TetraError>(),
            Some(TetraError::Store(_))
        ));
    }

    #[test]
    fn http_errors_surface_as_store_errors() {
        let (base, _rx) = serve_once("503 Service Unavailable", "{}");
        let mut s = store(&base);
        let err = s.patch_control(&ControlPatch::touch("x".into())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TetraError>(),
            Some(TetraError::Store(_))
        ));
    }
}
