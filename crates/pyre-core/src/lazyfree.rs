//! Deferred reclamation of expensive values.
//!
//! Dropping a large list or table hash walks every node or entry, which
//! is too much work for the command path. Values past an effort
//! threshold are detached from the keyspace synchronously and handed to
//! a background thread that exists only to run destructors. The dict
//! entry is gone the moment the delete returns; only the memory release
//! is deferred.
//!
//! The background thread is a plain `std::thread` draining a channel.
//! The only state it shares with the engine is that channel and an
//! atomic counter of objects still pending release.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use crate::db::Db;
use crate::dict::Dict;
use crate::types::{Encoding, Value};

/// Bounded channel capacity; large enough to absorb bursts of deletes
/// without meaningful memory overhead.
const RECLAIM_CHANNEL_CAPACITY: usize = 4096;

/// The payload fields are never read. The point is that the worker
/// thread receives them and lets their destructors run there.
#[allow(dead_code)]
enum Reclaim {
    /// One detached value; counts as a single pending object.
    Value(Value),
    /// Both keyspace tables from an async flush; counts as the number
    /// of keys they held.
    Tables {
        dict: Dict<Bytes, Value>,
        expires: Dict<Bytes, u64>,
        keys: usize,
    },
}

impl Reclaim {
    fn weight(&self) -> usize {
        match self {
            Reclaim::Value(_) => 1,
            Reclaim::Tables { keys, .. } => *keys,
        }
    }
}

/// Handle to the background reclaim thread.
#[derive(Debug, Clone)]
pub struct LazyReclaim {
    tx: SyncSender<Reclaim>,
    pending: Arc<AtomicUsize>,
}

impl LazyReclaim {
    /// Spawns the reclaim thread and returns a handle.
    ///
    /// If the thread cannot be spawned the handle still works: the
    /// channel disconnects immediately and every deferral falls back to
    /// an inline drop.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::sync_channel::<Reclaim>(RECLAIM_CHANNEL_CAPACITY);
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = Arc::clone(&pending);
        if let Err(e) = std::thread::Builder::new()
            .name("pyre-reclaim".into())
            .spawn(move || {
                while let Ok(item) = rx.recv() {
                    let weight = item.weight();
                    drop(item);
                    worker_pending.fetch_sub(weight, Ordering::AcqRel);
                }
            })
        {
            warn!("failed to spawn reclaim thread, large values will be freed inline: {e}");
        }

        Self { tx, pending }
    }

    /// Number of objects enqueued for release and not yet dropped.
    pub fn pending_objects(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Releases a detached value: inline when cheap, on the background
    /// thread when its effort estimate exceeds `threshold`. Never
    /// blocks; a full or dead channel degrades to an inline drop.
    pub fn release_value(&self, value: Value, threshold: usize) {
        if free_effort(&value) <= threshold {
            return;
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        match self.tx.try_send(Reclaim::Value(value)) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                drop(item);
            }
        }
    }

    /// Queues both keyspace tables of a flushed database.
    fn release_tables(&self, dict: Dict<Bytes, Value>, expires: Dict<Bytes, u64>) {
        let keys = dict.len();
        if keys == 0 {
            return;
        }
        self.pending.fetch_add(keys, Ordering::AcqRel);
        let item = Reclaim::Tables {
            dict,
            expires,
            keys,
        };
        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => {
                self.pending.fetch_sub(item.weight(), Ordering::AcqRel);
                drop(item);
            }
        }
    }
}

/// The amount of work needed to free a value, proportional to the
/// number of allocations it is composed of. Values held in one
/// allocation report 1 regardless of logical size.
pub fn free_effort(value: &Value) -> usize {
    match value {
        Value::List(list) => list.node_count(),
        Value::Hash(h) if h.encoding() == Encoding::Table => h.len(),
        _ => 1,
    }
}

/// Deletes a key, its value, and any expiration entry. The entry is
/// unlinked synchronously; the value release may be deferred. Returns
/// whether the key existed.
pub fn async_delete(db: &mut Db, lazy: &LazyReclaim, threshold: usize, key: &[u8]) -> bool {
    // the expires entry shares key storage with the main dict, so
    // dropping it first never invalidates the key
    match db.remove(key) {
        Some(value) => {
            lazy.release_value(value, threshold);
            true
        }
        None => false,
    }
}

/// Empties a database asynchronously: both keyspace tables are swapped
/// with fresh empty ones and the old pair is queued for background
/// release. The blocking index is untouched; blocked clients simply
/// keep waiting on now-empty keys.
pub fn flush_async(db: &mut Db, lazy: &LazyReclaim) {
    let dict = std::mem::take(&mut db.dict);
    let expires = std::mem::take(&mut db.expires);
    lazy.release_tables(dict, expires);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::quicklist::End;
    use crate::types::{HashValue, ListValue};
    use std::time::{Duration, Instant};

    const THRESHOLD: usize = 64;

    fn big_list(n: usize) -> Value {
        // fill=1 gives one node per element, inflating the effort estimate
        let config = CoreConfig {
            list_fill: 1,
            ..CoreConfig::default()
        };
        let mut list = ListValue::new(&config);
        for i in 0..n {
            list.push(End::Tail, format!("item-{i}").as_bytes());
        }
        Value::List(list)
    }

    fn wait_for_zero(lazy: &LazyReclaim) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while lazy.pending_objects() != 0 {
            assert!(Instant::now() < deadline, "reclaim thread never drained");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn effort_estimates() {
        assert_eq!(free_effort(&Value::Str(Bytes::from("x"))), 1);
        assert_eq!(free_effort(&big_list(10)), 10);

        let mut h = HashValue::new();
        for i in 0..200 {
            h.set(format!("f{i}").as_bytes(), b"v", 128, 64);
        }
        assert_eq!(free_effort(&Value::Hash(h)), 200);

        let mut packed = HashValue::new();
        packed.set(b"f", b"v", 128, 64);
        // packed hashes are a single allocation
        assert_eq!(free_effort(&Value::Hash(packed)), 1);
    }

    #[test]
    fn small_values_free_inline() {
        let lazy = LazyReclaim::spawn();
        lazy.release_value(Value::Str(Bytes::from("tiny")), THRESHOLD);
        assert_eq!(lazy.pending_objects(), 0);
    }

    #[test]
    fn large_values_are_deferred_and_counter_drains() {
        let lazy = LazyReclaim::spawn();
        let mut db = Db::new();
        db.add(Bytes::from("big"), big_list(THRESHOLD + 1));

        assert!(async_delete(&mut db, &lazy, THRESHOLD, b"big"));
        // the dict entry is gone synchronously
        assert!(!db.exists(b"big"));

        wait_for_zero(&lazy);
    }

    #[test]
    fn async_delete_missing_key() {
        let lazy = LazyReclaim::spawn();
        let mut db = Db::new();
        assert!(!async_delete(&mut db, &lazy, THRESHOLD, b"ghost"));
    }

    #[test]
    fn async_delete_drops_expire_entry() {
        let lazy = LazyReclaim::spawn();
        let mut db = Db::new();
        db.add(Bytes::from("k"), big_list(THRESHOLD + 1));
        db.set_expire(Bytes::from("k"), u64::MAX);
        assert!(async_delete(&mut db, &lazy, THRESHOLD, b"k"));
        assert!(db.expire_deadline(b"k").is_none());
        wait_for_zero(&lazy);
    }

    #[test]
    fn flush_async_swaps_tables() {
        let lazy = LazyReclaim::spawn();
        let mut db = Db::new();
        for i in 0..100 {
            db.add(
                Bytes::from(format!("k{i}")),
                Value::Str(Bytes::from("v")),
            );
        }
        db.set_expire(Bytes::from("k0"), u64::MAX);

        flush_async(&mut db, &lazy);
        assert!(db.is_empty());
        assert!(db.expire_deadline(b"k0").is_none());
        // usable immediately after the swap
        db.add(Bytes::from("new"), Value::Str(Bytes::from("v")));
        assert_eq!(db.len(), 1);

        wait_for_zero(&lazy);
    }

    #[test]
    fn flush_async_of_empty_db_is_a_no_op() {
        let lazy = LazyReclaim::spawn();
        let mut db = Db::new();
        flush_async(&mut db, &lazy);
        assert_eq!(lazy.pending_objects(), 0);
    }
}
