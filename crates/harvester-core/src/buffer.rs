//! Run-scoped result buffer: payloads grouped by (category, shape)

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::payload::{Payload, Shape};

/// Buffer entry key; also the unit of one exported artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BufferKey {
    pub category: String,
    pub shape: Shape,
}

impl BufferKey {
    pub fn new(category: impl Into<String>, shape: Shape) -> Self {
        Self {
            category: category.into(),
            shape,
        }
    }
}

impl std::fmt::Display for BufferKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.category, self.shape)
    }
}

/// Append-only accumulation, safe to share across stage workers.
///
/// Entries leave only through [`ExportFinalizer::flush`](crate::export::ExportFinalizer::flush).
#[derive(Debug, Default)]
pub struct ResultBuffer {
    entries: Mutex<BTreeMap<BufferKey, Vec<Payload>>>,
}

impl ResultBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append under (category, payload shape)
    pub fn append(&self, category: &str, payload: Payload) {
        let key = BufferKey::new(category, payload.shape());
        self.lock().entry(key).or_default().push(payload);
    }

    /// Records buffered under `key`
    pub fn len(&self, key: &BufferKey) -> usize {
        self.lock().get(key).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().values().all(Vec::is_empty)
    }

    pub fn keys(&self) -> Vec<BufferKey> {
        self.lock().keys().cloned().collect()
    }

    /// Take every non-empty entry out of the buffer
    pub(crate) fn drain_all(&self) -> Vec<(BufferKey, Vec<Payload>)> {
        std::mem::take(&mut *self.lock())
            .into_iter()
            .filter(|(_, payloads)| !payloads.is_empty())
            .collect()
    }

    /// Put a drained entry back ahead of anything appended since
    pub(crate) fn restore(&self, key: BufferKey, mut payloads: Vec<Payload>) {
        let mut entries = self.lock();
        let slot = entries.entry(key).or_default();
        payloads.append(slot);
        *slot = payloads;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<BufferKey, Vec<Payload>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn groups_by_category_and_shape() {
        let buf = ResultBuffer::new();
        buf.append("details", json!({"id": 1}).into());
        buf.append("details", Payload::Xml("<a/>".into()));
        buf.append("details", json!({"id": 2}).into());
        buf.append("list", json!([]).into());
        assert_eq!(buf.len(&BufferKey::new("details", Shape::Json)), 2);
        assert_eq!(buf.len(&BufferKey::new("details", Shape::Xml)), 1);
        assert_eq!(buf.total(), 4);
        assert_eq!(buf.keys().len(), 3);
    }

    #[test]
    fn concurrent_appends_all_kept() {
        let buf = ResultBuffer::new();
        let (k, m) = (8, 250);
        std::thread::scope(|s| {
            for t in 0..k {
                let buf = &buf;
                s.spawn(move || {
                    for i in 0..m {
                        buf.append("cat", json!({"t": t, "i": i}).into());
                        buf.append("cat", Payload::Xml(format!("<r t='{t}' i='{i}'/>")));
                    }
                });
            }
        });
        assert_eq!(buf.len(&BufferKey::new("cat", Shape::Json)), k * m);
        assert_eq!(buf.len(&BufferKey::new("cat", Shape::Xml)), k * m);
    }

    #[test]
    fn restore_goes_before_newer_appends() {
        let buf = ResultBuffer::new();
        buf.append("c", json!(1).into());
        let drained = buf.drain_all();
        assert!(buf.is_empty());
        buf.append("c", json!(2).into());
        for (key, payloads) in drained {
            buf.restore(key, payloads);
        }
        let mut drained = buf.drain_all();
        let (_, payloads) = drained.remove(0);
        assert_eq!(payloads, vec![Payload::from(json!(1)), Payload::from(json!(2))]);
    }

    #[test]
    fn new_buffer_is_empty() {
        let buf = ResultBuffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.total(), 0);
        assert!(buf.drain_all().is_empty());
    }
}
