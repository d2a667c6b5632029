//! The database: the keyspace dict, the expiration index, and the
//! blocking-keys bookkeeping used by the rendezvous protocol.
//!
//! Keys are `Bytes`, so the expiration entry shares the key's storage
//! with the main dict entry by reference count instead of holding a
//! borrowed pointer whose lifetime would have to be policed by hand.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::dict::Dict;
use crate::time;
use crate::types::Value;

/// Stable id for a client connection, assigned by the engine. The
/// blocking index stores ids rather than references, so a record can
/// sit in several per-key FIFOs at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// A single database.
#[derive(Debug)]
pub struct Db {
    /// Main keyspace: key -> tagged value.
    pub(crate) dict: Dict<Bytes, Value>,
    /// key -> absolute millisecond deadline. Keys are shared with
    /// `dict` via `Bytes` clones.
    pub(crate) expires: Dict<Bytes, u64>,
    /// key -> FIFO of clients blocked on that key, in blocking order.
    pub(crate) blocking_keys: Dict<Bytes, VecDeque<ClientId>>,
    /// Dedup index for pending readiness notifications.
    pub(crate) ready_keys: Dict<Bytes, ()>,
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}

impl Db {
    pub fn new() -> Self {
        Self {
            dict: Dict::new(),
            expires: Dict::new(),
            blocking_keys: Dict::new(),
            ready_keys: Dict::new(),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    /// Looks a key up for reading. Expired keys are removed on access
    /// and read as absent.
    pub fn lookup_read(&mut self, key: &[u8]) -> Option<&Value> {
        if self.remove_if_expired(key) {
            return None;
        }
        self.dict.get(key)
    }

    /// Looks a key up for writing.
    pub fn lookup_write(&mut self, key: &[u8]) -> Option<&mut Value> {
        if self.remove_if_expired(key) {
            return None;
        }
        self.dict.get_mut(key)
    }

    pub fn exists(&mut self, key: &[u8]) -> bool {
        !self.remove_if_expired(key) && self.dict.contains(key)
    }

    /// Adds a key known to be absent.
    ///
    /// # Panics
    /// Panics if the key already exists; lookups decide create-vs-update
    /// before calling this.
    pub fn add(&mut self, key: Bytes, value: Value) {
        self.dict
            .add(key, value)
            .expect("add of a key that already exists");
    }

    /// Inserts or overwrites a key. An overwrite discards any previous
    /// expiration.
    pub fn set(&mut self, key: Bytes, value: Value) {
        if self.expires.len() > 0 {
            self.expires.delete(&key);
        }
        self.dict.replace(key, value);
    }

    /// Removes a key and its expiration entry, returning the value.
    pub fn remove(&mut self, key: &[u8]) -> Option<Value> {
        if self.expires.len() > 0 {
            self.expires.delete(key);
        }
        self.dict.unlink(key).map(|e| e.into_pair().1)
    }

    /// Sets an absolute millisecond expiration deadline on a key.
    pub fn set_expire(&mut self, key: Bytes, deadline_ms: u64) {
        self.expires.replace(key, deadline_ms);
    }

    /// Deadline for a key, if one is set.
    pub fn expire_deadline(&mut self, key: &[u8]) -> Option<u64> {
        self.expires.get(key).copied()
    }

    /// Drops an expired key on access. Returns true when the key was
    /// (or just became) gone.
    fn remove_if_expired(&mut self, key: &[u8]) -> bool {
        let Some(&deadline) = self.expires.get(key) else {
            return false;
        };
        if !time::is_past(deadline) {
            return false;
        }
        self.expires.delete(key);
        self.dict.delete(key);
        true
    }

    /// Marks `key` ready for post-command delivery if any client is
    /// blocked on it and it is not already queued. Returns true when the
    /// caller should append the key to the server's ordered ready list.
    pub fn mark_ready(&mut self, key: &[u8]) -> bool {
        if !self.blocking_keys.contains(key) {
            return false;
        }
        if self.ready_keys.contains(key) {
            return false;
        }
        self.ready_keys
            .add(Bytes::copy_from_slice(key), ())
            .expect("ready key double-queued");
        true
    }

    /// Drops `key` from the ready dedup index so a push performed while
    /// serving it can queue it again.
    pub fn unmark_ready(&mut self, key: &[u8]) {
        self.ready_keys.delete(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::quicklist::End;
    use crate::types::ListValue;

    fn list_value(items: &[&[u8]]) -> Value {
        let mut list = ListValue::new(&CoreConfig::default());
        for item in items {
            list.push(End::Tail, item);
        }
        Value::List(list)
    }

    #[test]
    fn add_lookup_remove() {
        let mut db = Db::new();
        db.add(Bytes::from("k"), Value::Str(Bytes::from("v")));
        assert!(db.exists(b"k"));
        assert!(matches!(db.lookup_read(b"k"), Some(Value::Str(_))));
        assert!(db.remove(b"k").is_some());
        assert!(!db.exists(b"k"));
        assert!(db.remove(b"k").is_none());
    }

    #[test]
    fn expired_key_reads_as_absent() {
        let mut db = Db::new();
        db.add(Bytes::from("k"), Value::Str(Bytes::from("v")));
        // a deadline in the past
        db.set_expire(Bytes::from("k"), 1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(db.lookup_read(b"k").is_none());
        assert_eq!(db.len(), 0);
        // the expires entry went with it
        assert!(db.expire_deadline(b"k").is_none());
    }

    #[test]
    fn remove_clears_expiration() {
        let mut db = Db::new();
        db.add(Bytes::from("k"), Value::Str(Bytes::from("v")));
        db.set_expire(Bytes::from("k"), u64::MAX);
        db.remove(b"k");
        assert!(db.expire_deadline(b"k").is_none());
    }

    #[test]
    fn mark_ready_requires_waiters() {
        let mut db = Db::new();
        db.add(Bytes::from("q"), list_value(&[b"x"]));
        // nobody is blocked on q
        assert!(!db.mark_ready(b"q"));

        db.blocking_keys
            .add_or_find(Bytes::from("q"), VecDeque::new)
            .push_back(ClientId(1));
        assert!(db.mark_ready(b"q"));
        // second push before the drain is deduped
        assert!(!db.mark_ready(b"q"));
        db.unmark_ready(b"q");
        assert!(db.mark_ready(b"q"));
    }
}
