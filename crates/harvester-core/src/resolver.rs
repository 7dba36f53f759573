//! Identity maps shared across stages.
//!
//! Primary map: first-seen, optionally capped, one key → one value.
//! Reverse map: resolved id → every primary entry it was discovered from.

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use rustc_hash::FxHashMap;

use crate::source::{ItemKey, PrimaryValue, ResolvedId, SourceRef};

#[derive(Debug, Default)]
pub struct IdentityResolver {
    capacity: Option<usize>,
    primary: Mutex<FxHashMap<ItemKey, PrimaryValue>>,
    reverse: Mutex<FxHashMap<ResolvedId, BTreeSet<SourceRef>>>,
}

impl IdentityResolver {
    /// `capacity = None` leaves the primary map unbounded
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Insert iff `key` is absent and capacity remains. Returns whether it was inserted.
    ///
    /// Check and insert happen under one lock, so concurrent callers can
    /// neither lose inserts nor overshoot the capacity.
    pub fn add_primary(&self, key: ItemKey, value: PrimaryValue) -> bool {
        let mut primary = self.primary.lock().unwrap_or_else(PoisonError::into_inner);
        if primary.contains_key(&key) {
            return false;
        }
        if self.capacity.is_some_and(|cap| primary.len() >= cap) {
            return false;
        }
        primary.insert(key, value);
        true
    }

    pub fn is_full(&self) -> bool {
        self.capacity
            .is_some_and(|cap| self.primary_len() >= cap)
    }

    pub fn add_reverse(&self, id: ResolvedId, source: SourceRef) {
        self.reverse
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .insert(source);
    }

    /// Primary entries sorted by key
    pub fn primary_snapshot(&self) -> Vec<SourceRef> {
        let primary = self.primary.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<SourceRef> = primary
            .iter()
            .map(|(key, value)| SourceRef {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        entries.sort_unstable();
        entries
    }

    /// Distinct resolved ids, sorted
    pub fn reverse_keys(&self) -> Vec<ResolvedId> {
        let reverse = self.reverse.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<ResolvedId> = reverse.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Full reverse map, sorted by resolved id
    pub fn reverse_snapshot(&self) -> Vec<(ResolvedId, Vec<SourceRef>)> {
        let reverse = self.reverse.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(ResolvedId, Vec<SourceRef>)> = reverse
            .iter()
            .map(|(id, sources)| (id.clone(), sources.iter().cloned().collect()))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn primary_len(&self) -> usize {
        self.primary.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn reverse_len(&self) -> usize {
        self.reverse.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(key: &str, value: &str) -> SourceRef {
        SourceRef {
            key: key.into(),
            value: value.to_string(),
        }
    }

    #[test]
    fn first_insert_wins() {
        let r = IdentityResolver::new(None);
        assert!(r.add_primary("1".into(), "15".into()));
        assert!(!r.add_primary("1".into(), "99".into()));
        assert_eq!(r.primary_snapshot(), vec![src("1", "15")]);
    }

    #[test]
    fn capacity_rejects_without_touching_existing() {
        let r = IdentityResolver::new(Some(2));
        assert!(r.add_primary("a".into(), "x".into()));
        assert!(r.add_primary("b".into(), "x".into()));
        assert!(r.is_full());
        assert!(!r.add_primary("c".into(), "x".into()));
        assert_eq!(r.primary_snapshot(), vec![src("a", "x"), src("b", "x")]);
    }

    #[test]
    fn zero_capacity_is_always_full() {
        let r = IdentityResolver::new(Some(0));
        assert!(r.is_full());
        assert!(!r.add_primary("a".into(), "x".into()));
        assert_eq!(r.primary_len(), 0);
    }

    #[test]
    fn concurrent_inserts_respect_capacity() {
        let r = IdentityResolver::new(Some(100));
        std::thread::scope(|s| {
            for t in 0..8 {
                let r = &r;
                s.spawn(move || {
                    for i in 0..50 {
                        r.add_primary(ItemKey(format!("{t}-{i}")), "c".into());
                    }
                });
            }
        });
        assert_eq!(r.primary_len(), 100);
    }

    #[test]
    fn concurrent_inserts_unbounded_lose_nothing() {
        let r = IdentityResolver::new(None);
        std::thread::scope(|s| {
            for t in 0..8 {
                let r = &r;
                s.spawn(move || {
                    for i in 0..200 {
                        r.add_primary(ItemKey(format!("{t}-{i}")), "c".into());
                    }
                });
            }
        });
        assert_eq!(r.primary_len(), 1600);
    }

    #[test]
    fn reverse_keeps_multiplicity() {
        let r = IdentityResolver::new(None);
        r.add_reverse("cvr-1".into(), src("10", "15"));
        r.add_reverse("cvr-1".into(), src("11", "12"));
        r.add_reverse("cvr-1".into(), src("10", "15"));
        r.add_reverse("cvr-2".into(), src("12", "15"));
        assert_eq!(r.reverse_keys(), vec![ResolvedId::from("cvr-1"), ResolvedId::from("cvr-2")]);
        let snapshot = r.reverse_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].1, vec![src("10", "15"), src("11", "12")]);
        assert_eq!(snapshot[1].1, vec![src("12", "15")]);
    }

    #[test]
    fn concurrent_reverse_same_id() {
        let r = IdentityResolver::new(None);
        std::thread::scope(|s| {
            for t in 0..8 {
                let r = &r;
                s.spawn(move || {
                    for i in 0..50 {
                        r.add_reverse("shared".into(), src(&format!("{t}-{i}"), "c"));
                    }
                });
            }
        });
        assert_eq!(r.reverse_snapshot()[0].1.len(), 400);
        assert_eq!(r.reverse_len(), 1);
    }
}
