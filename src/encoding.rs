//! Append-only string <-> integer interner.
//!
//! Categories and join-key names are stored as `i64` indices into a
//! process-scoped dictionary. A worker clones the encoding, appends locally
//! (no contention), then merges its additions into the global encoding under
//! a write lock. Readers observing mid-merge state never see a gap: ids are
//! assigned in strictly increasing order and a string is never reassigned.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Canonical null id for string columns.
pub const NULL_STRING_ID: i64 = 0;

#[derive(Debug, Default)]
struct EncodingInner {
    strings: Vec<String>,
    ids: FxHashMap<String, i64>,
}

impl EncodingInner {
    fn new() -> Self {
        // id 0 is reserved for the canonical null/empty string.
        Self {
            strings: vec![String::new()],
            ids: FxHashMap::from_iter([(String::new(), NULL_STRING_ID)]),
        }
    }

    fn intern(&mut self, s: &str) -> i64 {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = self.strings.len() as i64;
        self.strings.push(s.to_string());
        self.ids.insert(s.to_string(), id);
        id
    }

    fn get(&self, id: i64) -> Option<&str> {
        self.strings.get(id as usize).map(|s| s.as_str())
    }

    fn find(&self, s: &str) -> Option<i64> {
        self.ids.get(s).copied()
    }
}

/// Shared, append-only encoding. Clone is cheap (it shares the `Arc`); use
/// [`Encoding::fork`] to get a private, mutation-local copy a worker thread
/// can append to before merging back with [`Encoding::merge`].
#[derive(Debug, Clone)]
pub struct Encoding {
    inner: Arc<RwLock<EncodingInner>>,
}

impl Default for Encoding {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoding {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(EncodingInner::new())),
        }
    }

    /// Interns `s`, assigning a new id only if necessary. Takes the write
    /// lock directly — for high-contention bulk loads prefer
    /// [`Encoding::fork`] + [`Encoding::merge`].
    pub fn intern(&self, s: &str) -> i64 {
        self.inner.write().intern(s)
    }

    pub fn get(&self, id: i64) -> Option<String> {
        self.inner.read().get(id).map(|s| s.to_string())
    }

    pub fn find(&self, s: &str) -> Option<i64> {
        self.inner.read().find(s)
    }

    pub fn len(&self) -> usize {
        self.inner.read().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// A private, disconnected copy for local bulk interning.
    pub fn fork(&self) -> LocalEncoding {
        LocalEncoding {
            local: self.inner.read().clone_inner(),
            pending: Vec::new(),
        }
    }

    /// Merges ids assigned to `local` (beyond what was already known when it
    /// was forked) into the global dictionary, under a single write-lock
    /// critical section. Returns the translation from the local id space to
    /// the (possibly different) merged global id space.
    pub fn merge(&self, local: LocalEncoding) -> Vec<i64> {
        let mut translation = Vec::with_capacity(local.pending.len());
        let mut guard = self.inner.write();
        for s in &local.pending {
            translation.push(guard.intern(s));
        }
        translation
    }
}

impl EncodingInner {
    fn clone_inner(&self) -> Self {
        Self {
            strings: self.strings.clone(),
            ids: self.ids.clone(),
        }
    }
}

/// A local, disconnected fork of an [`Encoding`] used to batch-intern new
/// strings without taking the global write lock on every call.
#[derive(Debug)]
pub struct LocalEncoding {
    local: EncodingInner,
    pending: Vec<String>,
}

impl LocalEncoding {
    pub fn intern(&mut self, s: &str) -> i64 {
        if let Some(id) = self.local.find(s) {
            return id;
        }
        let id = self.local.intern(s);
        self.pending.push(s.to_string());
        id
    }

    pub fn get(&self, id: i64) -> Option<&str> {
        self.local.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable_and_idempotent() {
        let enc = Encoding::new();
        let a = enc.intern("alpha");
        let b = enc.intern("beta");
        let a2 = enc.intern("alpha");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(enc.get(a).as_deref(), Some("alpha"));
    }

    #[test]
    fn null_id_is_reserved() {
        let enc = Encoding::new();
        assert_eq!(enc.intern(""), NULL_STRING_ID);
    }

    #[test]
    fn fork_and_merge_round_trips() {
        let enc = Encoding::new();
        enc.intern("existing");
        let mut local = enc.fork();
        let local_new = local.intern("brand-new");
        let local_existing = local.intern("existing");
        let translation = enc.merge(local);
        // "existing" was already known, so it does not appear in `pending`
        // and therefore has no translation entry; "brand-new" does.
        assert_eq!(translation.len(), 1);
        let global_new = enc.find("brand-new").unwrap();
        assert_eq!(translation[0], global_new);
        assert_eq!(local_existing, enc.find("existing").unwrap());
        let _ = local_new;
    }

    #[test]
    fn encoding_monotonicity_across_many_interns() {
        let enc = Encoding::new();
        let mut seen = FxHashMap::default();
        for i in 0..1000 {
            let key = format!("key-{}", i % 100);
            let id = enc.intern(&key);
            if let Some(&prev) = seen.get(&key) {
                assert_eq!(prev, id);
            } else {
                seen.insert(key, id);
            }
        }
    }
}
