//! Consolidated export: one artifact per buffer key plus a manifest

use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::buffer::{BufferKey, ResultBuffer};
use crate::error::ExportError;
use crate::payload::{Payload, Shape};
use crate::progress::fmt_num;
use crate::sink::StorageSink;

/// Separator between raw markup responses in one artifact
pub const RAW_RESPONSE_SEPARATOR: &str = "\n<!-- RAW_RESPONSE_SEPARATOR -->\n";

/// Manifest sidecar file name; no artifact may take it
pub const MANIFEST_FILE: &str = "manifest.json";

/// File-name-safe form of a category: spaces and slashes become underscores
pub fn sanitize_category(category: &str) -> String {
    category.replace([' ', '/'], "_")
}

/// Deterministic artifact location for a buffer key
pub fn artifact_path(run_id: &str, key: &BufferKey) -> String {
    format!(
        "{run_id}/{}.{}",
        sanitize_category(&key.category),
        key.shape.extension()
    )
}

fn manifest_path(run_id: &str) -> String {
    format!("{run_id}/{MANIFEST_FILE}")
}

/// Artifact paths handed out during one flush.
///
/// Keys whose sanitized names clash (`"a b"` and `"a_b"`, or a category named
/// `manifest`) get a short blake3 tag of the raw category appended.
struct PathAllocator<'a> {
    run_id: &'a str,
    taken: FxHashSet<String>,
}

impl<'a> PathAllocator<'a> {
    fn new(run_id: &'a str) -> Self {
        let mut taken = FxHashSet::default();
        taken.insert(manifest_path(run_id));
        Self { run_id, taken }
    }

    fn allocate(&mut self, key: &BufferKey) -> Result<String, ExportError> {
        let plain = artifact_path(self.run_id, key);
        if self.taken.insert(plain.clone()) {
            return Ok(plain);
        }
        let hash = blake3::hash(key.category.as_bytes()).to_hex();
        let tagged = format!(
            "{}/{}-{}.{}",
            self.run_id,
            sanitize_category(&key.category),
            &hash.as_str()[..8],
            key.shape.extension()
        );
        if self.taken.insert(tagged.clone()) {
            log::warn!("artifact name for {key} clashes, writing {tagged}");
            Ok(tagged)
        } else {
            Err(ExportError::PathCollision {
                key: key.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum EntryStatus {
    Written { bytes: usize, blake3: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub category: String,
    pub shape: Shape,
    pub path: String,
    pub record_count: usize,
    #[serde(flatten)]
    pub status: EntryStatus,
}

impl ManifestEntry {
    pub fn is_written(&self) -> bool {
        matches!(self.status, EntryStatus::Written { .. })
    }
}

/// Record of one flush
#[derive(Debug, Clone, Serialize)]
pub struct ExportManifest {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

impl ExportManifest {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn written(&self) -> usize {
        self.entries.iter().filter(|e| e.is_written()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.written()
    }

    pub fn records_written(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.is_written())
            .map(|e| e.record_count)
            .sum()
    }
}

/// Serialize one entry's payloads into its artifact bytes
pub fn serialize_entry(shape: Shape, payloads: &[Payload]) -> Result<Vec<u8>, ExportError> {
    match shape {
        Shape::Json => {
            let values: Vec<&serde_json::Value> =
                payloads.iter().filter_map(Payload::as_json).collect();
            serde_json::to_vec_pretty(&values).map_err(ExportError::Serialize)
        }
        Shape::Xml => {
            let parts: Vec<&str> = payloads
                .iter()
                .filter_map(|p| match p {
                    Payload::Xml(s) => Some(s.as_str()),
                    Payload::Json(_) => None,
                })
                .collect();
            Ok(parts.join(RAW_RESPONSE_SEPARATOR).into_bytes())
        }
    }
}

/// Flushes a [`ResultBuffer`] into a [`StorageSink`] under one run id
pub struct ExportFinalizer<'a> {
    sink: &'a dyn StorageSink,
    run_id: String,
}

impl<'a> ExportFinalizer<'a> {
    pub fn new(sink: &'a dyn StorageSink, run_id: impl Into<String>) -> Self {
        Self {
            sink,
            run_id: run_id.into(),
        }
    }

    /// Write every non-empty entry independently.
    ///
    /// Written entries leave the buffer; failed entries are put back so a
    /// later flush can retry them. An empty buffer writes nothing.
    pub fn flush(&self, buffer: &ResultBuffer) -> ExportManifest {
        let mut manifest = ExportManifest {
            run_id: self.run_id.clone(),
            created_at: Utc::now(),
            entries: Vec::new(),
        };

        let mut paths = PathAllocator::new(&self.run_id);
        for (key, payloads) in buffer.drain_all() {
            let allocated = paths.allocate(&key);
            let path = match &allocated {
                Ok(path) => path.clone(),
                Err(_) => artifact_path(&self.run_id, &key),
            };
            let record_count = payloads.len();
            let result = allocated
                .and_then(|_| serialize_entry(key.shape, &payloads))
                .and_then(|data| {
                    self.sink
                        .write(&path, &data)
                        .map(|()| data)
                        .map_err(|source| ExportError::Write {
                            path: path.clone(),
                            source,
                        })
                });

            let status = match result {
                Ok(data) => {
                    log::info!("wrote {path}: {} records", fmt_num(record_count));
                    EntryStatus::Written {
                        bytes: data.len(),
                        blake3: blake3::hash(&data).to_hex().to_string(),
                    }
                }
                Err(e) => {
                    log::error!("export {key} failed, keeping {record_count} records buffered: {e}");
                    let error = e.to_string();
                    buffer.restore(key.clone(), payloads);
                    EntryStatus::Failed { error }
                }
            };

            manifest.entries.push(ManifestEntry {
                category: key.category,
                shape: key.shape,
                path,
                record_count,
                status,
            });
        }

        manifest
    }

    /// Write `manifest` as `<run_id>/manifest.json`
    pub fn write_manifest(&self, manifest: &ExportManifest) -> Result<String, ExportError> {
        let path = manifest_path(&self.run_id);
        let json = serde_json::to_vec_pretty(manifest).map_err(ExportError::Serialize)?;
        self.sink
            .write(&path, &json)
            .map_err(|source| ExportError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::io;
    use std::sync::Mutex;

    /// In-memory sink failing for paths containing any of `fail_on`
    #[derive(Default)]
    struct MemSink {
        files: Mutex<BTreeMap<String, Vec<u8>>>,
        fail_on: Vec<String>,
    }

    impl StorageSink for MemSink {
        fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
            if self.fail_on.iter().any(|f| path.contains(f.as_str())) {
                return Err(io::Error::other("disk full"));
            }
            self.files.lock().unwrap().insert(path.to_string(), data.to_vec());
            Ok(())
        }
    }

    #[test]
    fn empty_flush_writes_nothing() {
        let sink = MemSink::default();
        let manifest = ExportFinalizer::new(&sink, "run").flush(&ResultBuffer::new());
        assert!(manifest.is_empty());
        assert!(sink.files.lock().unwrap().is_empty());
    }

    #[test]
    fn writes_one_artifact_per_key() {
        let sink = MemSink::default();
        let buf = ResultBuffer::new();
        buf.append("herd details", json!({"id": 1}).into());
        buf.append("herd details", json!({"id": 2}).into());
        buf.append("herd details", Payload::Xml("<a/>".into()));
        buf.append("herd details", Payload::Xml("<b/>".into()));

        let manifest = ExportFinalizer::new(&sink, "run").flush(&buf);
        assert_eq!(manifest.written(), 2);
        assert_eq!(manifest.records_written(), 4);
        assert!(buf.is_empty());

        let files = sink.files.lock().unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&files["run/herd_details.json"]).unwrap();
        assert_eq!(json, json!([{"id": 1}, {"id": 2}]));
        let xml = String::from_utf8(files["run/herd_details.xml"].clone()).unwrap();
        assert_eq!(xml, format!("<a/>{RAW_RESPONSE_SEPARATOR}<b/>"));
    }

    #[test]
    fn failed_entry_retained_successful_cleared() {
        let sink = MemSink {
            fail_on: vec!["/x.".to_string()],
            ..Default::default()
        };
        let buf = ResultBuffer::new();
        buf.append("x", json!(1).into());
        buf.append("y", json!(2).into());

        let finalizer = ExportFinalizer::new(&sink, "run");
        let manifest = finalizer.flush(&buf);
        assert_eq!(manifest.written(), 1);
        assert_eq!(manifest.failed(), 1);
        assert_eq!(buf.len(&BufferKey::new("x", Shape::Json)), 1);
        assert_eq!(buf.len(&BufferKey::new("y", Shape::Json)), 0);

        let failed = manifest.entries.iter().find(|e| e.category == "x").unwrap();
        assert!(matches!(&failed.status, EntryStatus::Failed { error } if error.contains("disk full")));
    }

    #[test]
    fn written_entry_records_digest() {
        let sink = MemSink::default();
        let buf = ResultBuffer::new();
        buf.append("a/b", Payload::Xml("<r/>".into()));
        let manifest = ExportFinalizer::new(&sink, "run").flush(&buf);
        let entry = &manifest.entries[0];
        assert_eq!(entry.path, "run/a_b.xml");
        assert_eq!(
            entry.status,
            EntryStatus::Written {
                bytes: 4,
                blake3: blake3::hash(b"<r/>").to_hex().to_string(),
            }
        );
    }

    #[test]
    fn manifest_sidecar() {
        let sink = MemSink::default();
        let buf = ResultBuffer::new();
        buf.append("c", json!({}).into());
        let finalizer = ExportFinalizer::new(&sink, "run");
        let manifest = finalizer.flush(&buf);
        let path = finalizer.write_manifest(&manifest).unwrap();
        assert_eq!(path, "run/manifest.json");

        let files = sink.files.lock().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&files[&path]).unwrap();
        assert_eq!(json["run_id"], "run");
        assert_eq!(json["entries"][0]["status"], "written");
        assert_eq!(json["entries"][0]["record_count"], 1);
        assert_eq!(json["entries"][0]["shape"], "json");
    }

    #[test]
    fn clashing_sanitized_names_get_distinct_artifacts() {
        let sink = MemSink::default();
        let buf = ResultBuffer::new();
        buf.append("item details", json!({"from": "space"}).into());
        buf.append("item_details", json!({"from": "underscore"}).into());

        let manifest = ExportFinalizer::new(&sink, "run").flush(&buf);
        assert_eq!(manifest.written(), 2);
        let paths: Vec<&str> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths[0], "run/item_details.json");
        let hex = blake3::hash(b"item_details").to_hex();
        let tag = &hex.as_str()[..8];
        assert_eq!(paths[1], format!("run/item_details-{tag}.json"));

        let files = sink.files.lock().unwrap();
        assert_eq!(files.len(), 2);
        let first: serde_json::Value = serde_json::from_slice(&files[paths[0]]).unwrap();
        let second: serde_json::Value = serde_json::from_slice(&files[paths[1]]).unwrap();
        assert_eq!(first, json!([{"from": "space"}]));
        assert_eq!(second, json!([{"from": "underscore"}]));
    }

    #[test]
    fn manifest_name_reserved() {
        let sink = MemSink::default();
        let buf = ResultBuffer::new();
        buf.append("manifest", json!({"id": 1}).into());
        buf.append("manifest", Payload::Xml("<m/>".into()));

        let finalizer = ExportFinalizer::new(&sink, "run");
        let manifest = finalizer.flush(&buf);
        let json_entry = manifest.entries.iter().find(|e| e.shape == Shape::Json).unwrap();
        assert_ne!(json_entry.path, "run/manifest.json");
        assert!(json_entry.path.starts_with("run/manifest-"));
        let xml_entry = manifest.entries.iter().find(|e| e.shape == Shape::Xml).unwrap();
        assert_eq!(xml_entry.path, "run/manifest.xml");

        finalizer.write_manifest(&manifest).unwrap();
        let files = sink.files.lock().unwrap();
        assert_eq!(files.len(), 3);
        let payload: serde_json::Value = serde_json::from_slice(&files[&json_entry.path]).unwrap();
        assert_eq!(payload, json!([{"id": 1}]));
        let sidecar: serde_json::Value = serde_json::from_slice(&files["run/manifest.json"]).unwrap();
        assert_eq!(sidecar["entries"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn sanitizes_categories() {
        assert_eq!(sanitize_category("Ejendom oplysninger/v2"), "Ejendom_oplysninger_v2");
    }
}
