//! Incrementally-rehashed hash table.
//!
//! Two power-of-two bucket arrays; a grow or shrink installs the second
//! array and migrates buckets a few at a time, so no single operation
//! pays for the whole move. During a rehash inserts land in the new
//! array and lookups probe both. Collisions chain inside the bucket
//! (an inline vec rather than linked entries; "head of chain" is slot 0).
//!
//! All mutation is single-threaded; the only shared pieces are the
//! iterator count and shape stamp, which are atomics so values holding a
//! table can still be handed to the background reclaim thread.

mod iter;
mod scan;

pub use iter::{SafeIter, UnsafeIter};

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use rand::Rng;

use crate::error::DictError;
use crate::time;

/// Buckets allocated on first insert.
pub const INITIAL_SIZE: usize = 4;

/// Default used/size ratio past which growth proceeds even when resizing
/// is globally disabled.
pub const FORCE_RESIZE_RATIO: usize = 5;

/// A key/value pair stored in the table.
#[derive(Debug)]
pub struct Entry<K, V> {
    key: K,
    val: V,
}

impl<K, V> Entry<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.val
    }

    pub fn value_mut(&mut self) -> &mut V {
        &mut self.val
    }

    /// Consumes the entry. The caller of [`Dict::unlink`] uses this to
    /// dispose of the key and value separately.
    pub fn into_pair(self) -> (K, V) {
        (self.key, self.val)
    }
}

/// Outcome of [`Dict::replace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replaced {
    Inserted,
    Updated,
}

#[derive(Debug)]
pub(crate) struct Table<K, V> {
    buckets: Vec<Vec<Entry<K, V>>>,
    used: usize,
    /// Bumped every time the bucket array is (re)allocated. Stands in for
    /// the array base address in the iteration fingerprint.
    generation: u64,
}

impl<K, V> Table<K, V> {
    fn unallocated() -> Self {
        Self {
            buckets: Vec::new(),
            used: 0,
            generation: 0,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.buckets.len()
    }

    fn mask(&self) -> u64 {
        debug_assert!(self.size().is_power_of_two() || self.size() == 0);
        self.size().wrapping_sub(1) as u64
    }

    pub(crate) fn bucket(&self, idx: usize) -> &[Entry<K, V>] {
        &self.buckets[idx]
    }
}

/// The incrementally-rehashed dictionary.
#[derive(Debug)]
pub struct Dict<K, V> {
    pub(crate) tables: [Table<K, V>; 2],
    /// Next bucket of `tables[0]` to migrate; -1 when not rehashing.
    rehash_index: isize,
    /// Live safe iterators; opportunistic rehash steps are inhibited
    /// while non-zero. Shared with detached iterator handles.
    iterators: Arc<AtomicUsize>,
    /// Current structural fingerprint, kept fresh on every structural
    /// change so unsafe iterators can verify it at drop.
    shape: Arc<AtomicU64>,
    resize_enabled: bool,
    force_resize_ratio: usize,
    hasher: RandomState,
    generations: u64,
}

impl<K, V> Default for Dict<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Dict<K, V> {
    /// Creates an empty dict with a randomly seeded hash function.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    /// Creates an empty dict whose hash function is keyed on the given
    /// 128-bit seed. Same seed, same bucket placement.
    pub fn with_seed(seed: [u8; 16]) -> Self {
        let k0 = u64::from_le_bytes(seed[..8].try_into().expect("seed half"));
        let k1 = u64::from_le_bytes(seed[8..].try_into().expect("seed half"));
        Self::with_hasher(RandomState::with_seeds(k0, k1, !k0, k1.rotate_left(32)))
    }

    fn with_hasher(hasher: RandomState) -> Self {
        Self {
            tables: [Table::unallocated(), Table::unallocated()],
            rehash_index: -1,
            iterators: Arc::new(AtomicUsize::new(0)),
            shape: Arc::new(AtomicU64::new(0)),
            resize_enabled: true,
            force_resize_ratio: FORCE_RESIZE_RATIO,
            hasher,
            generations: 0,
        }
    }

    /// Number of entries across both tables.
    pub fn len(&self) -> usize {
        self.tables[0].used + self.tables[1].used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while an incremental rehash is in progress.
    pub fn is_rehashing(&self) -> bool {
        self.rehash_index != -1
    }

    /// Total bucket slots across both tables. Callers use the fill ratio
    /// `len() / slots()` to decide when a shrink is worthwhile.
    pub fn slots(&self) -> usize {
        self.tables[0].size() + self.tables[1].size()
    }

    /// Globally enables or disables proactive resizing. While disabled,
    /// growth still happens once used/size passes the force ratio (the
    /// copy-on-write fork escape hatch).
    pub fn set_resize_enabled(&mut self, enabled: bool) {
        self.resize_enabled = enabled;
    }

    pub fn set_force_resize_ratio(&mut self, ratio: usize) {
        self.force_resize_ratio = ratio.max(1);
    }

    pub(crate) fn hash_key<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        self.hasher.hash_one(key)
    }
}

impl<K, V> Dict<K, V>
where
    K: Hash + Eq,
{
    /// Inserts a new key. Fails with [`DictError::KeyExists`] if the key
    /// is present in either table.
    pub fn add(&mut self, key: K, val: V) -> Result<(), DictError> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        self.expand_if_needed();
        let h = self.hash_key(&key);
        if self.locate(&key, h).is_some() {
            return Err(DictError::KeyExists);
        }
        self.push_new(h, Entry { key, val });
        Ok(())
    }

    /// Returns the value for `key`, inserting `default()` first if the
    /// key is absent.
    pub fn add_or_find(&mut self, key: K, default: impl FnOnce() -> V) -> &mut V {
        if self.is_rehashing() {
            self.rehash_step();
        }
        self.expand_if_needed();
        let h = self.hash_key(&key);
        let at = match self.locate(&key, h) {
            Some(pos) => pos,
            None => {
                self.push_new(
                    h,
                    Entry {
                        key,
                        val: default(),
                    },
                );
                let t = self.active_table();
                let idx = (h & self.tables[t].mask()) as usize;
                (t, idx, 0)
            }
        };
        &mut self.tables[at.0].buckets[at.1][at.2].val
    }

    /// Inserts or overwrites. On overwrite the new value is installed
    /// before the old one is dropped, so a value that aliases the old
    /// one survives a self-replace.
    pub fn replace(&mut self, key: K, val: V) -> Replaced {
        let h = self.hash_key(&key);
        if let Some((t, idx, pos)) = self.locate(&key, h) {
            let old = std::mem::replace(&mut self.tables[t].buckets[idx][pos].val, val);
            drop(old);
            return Replaced::Updated;
        }
        self.add(key, val).expect("key vanished between probes");
        Replaced::Inserted
    }

    /// Looks up an entry, advancing the rehash by one opportunistic step.
    pub fn find<Q>(&mut self, key: &Q) -> Option<&Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.is_empty() {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let h = self.hash_key(key);
        let (t, idx, pos) = self.locate(key, h)?;
        Some(&self.tables[t].buckets[idx][pos])
    }

    /// Like [`Dict::find`] but without the opportunistic rehash step, so
    /// it works through a shared reference.
    pub fn peek<Q>(&self, key: &Q) -> Option<&Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.is_empty() {
            return None;
        }
        let h = self.hash_key(key);
        let (t, idx, pos) = self.locate(key, h)?;
        Some(&self.tables[t].buckets[idx][pos])
    }

    /// Fetches the value for `key`.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).map(Entry::value)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.is_empty() {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let h = self.hash_key(key);
        let (t, idx, pos) = self.locate(key, h)?;
        Some(&mut self.tables[t].buckets[idx][pos].val)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.peek(key).is_some()
    }

    /// Removes a key, dropping the entry. Returns whether it was present.
    pub fn delete<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.unlink(key).is_some()
    }

    /// Detaches an entry from the table without dropping it, handing key
    /// and value back to the caller. The deferred-reclaim path uses this
    /// to take ownership of an expensive value before queueing it.
    pub fn unlink<Q>(&mut self, key: &Q) -> Option<Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.is_empty() {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let h = self.hash_key(key);
        let (t, idx, pos) = self.locate(key, h)?;
        let entry = self.tables[t].buckets[idx].remove(pos);
        self.tables[t].used -= 1;
        self.publish_shape();
        Some(entry)
    }

    /// Grows (or first-allocates) to the next power of two >= `size`.
    pub fn expand(&mut self, size: usize) -> Result<(), DictError> {
        if self.is_rehashing() || self.tables[0].used > size {
            return Err(DictError::Invalid);
        }
        let realsize = next_power(size);
        if realsize == self.tables[0].size() {
            return Err(DictError::Invalid);
        }

        self.generations += 1;
        let fresh = Table {
            buckets: (0..realsize).map(|_| Vec::new()).collect(),
            used: 0,
            generation: self.generations,
        };

        // An empty primary table means first initialization, not a rehash.
        if self.tables[0].size() == 0 {
            self.tables[0] = fresh;
        } else {
            self.tables[1] = fresh;
            self.rehash_index = 0;
        }
        self.publish_shape();
        Ok(())
    }

    /// Shrinks the table to the minimal power of two holding all current
    /// entries. Rejected while resizing is disabled or a rehash runs.
    pub fn resize(&mut self) -> Result<(), DictError> {
        if !self.resize_enabled || self.is_rehashing() {
            return Err(DictError::Invalid);
        }
        let minimal = self.tables[0].used.max(INITIAL_SIZE);
        self.expand(minimal)
    }

    /// Performs up to `n` bucket migrations, visiting at most `10 * n`
    /// empty buckets before yielding. Returns true while work remains.
    pub fn rehash(&mut self, n: usize) -> bool {
        if !self.is_rehashing() {
            return false;
        }
        let mut empty_visits = n * 10;
        let mut steps = n;

        while steps > 0 && self.tables[0].used != 0 {
            debug_assert!((self.rehash_index as usize) < self.tables[0].size());
            while self.tables[0].buckets[self.rehash_index as usize].is_empty() {
                self.rehash_index += 1;
                empty_visits -= 1;
                if empty_visits == 0 {
                    return true;
                }
            }

            let idx = self.rehash_index as usize;
            let chain = std::mem::take(&mut self.tables[0].buckets[idx]);
            let hasher = &self.hasher;
            let moved = chain.len();
            let m1 = self.tables[1].mask();
            for entry in chain {
                let dst = (hasher.hash_one(&entry.key) & m1) as usize;
                // head insert, same as a fresh add
                self.tables[1].buckets[dst].insert(0, entry);
            }
            self.tables[0].used -= moved;
            self.tables[1].used += moved;
            self.rehash_index += 1;
            steps -= 1;
        }

        if self.tables[0].used == 0 {
            self.tables[0] = std::mem::replace(&mut self.tables[1], Table::unallocated());
            self.rehash_index = -1;
            self.publish_shape();
            return false;
        }
        self.publish_shape();
        true
    }

    /// Rehashes in 100-bucket slices until roughly `ms` milliseconds of
    /// wall clock have elapsed. Returns the number of slices performed.
    pub fn rehash_for_ms(&mut self, ms: u64) -> usize {
        let start = time::now_ms();
        let mut slices = 0;
        while self.rehash(100) {
            slices += 1;
            if time::now_ms() - start > ms {
                break;
            }
        }
        slices
    }

    /// A single opportunistic rehash step. Skipped entirely while any
    /// safe iterator is live, since migrating buckets under an iterator
    /// would skip or repeat entries.
    pub fn rehash_step(&mut self) {
        if self.iterators.load(Ordering::Acquire) == 0 {
            self.rehash(1);
        }
    }

    /// Returns a uniformly random entry, or `None` when empty.
    pub fn random_entry(&mut self) -> Option<(&K, &V)> {
        if self.is_empty() {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let mut rng = rand::thread_rng();

        let (t, idx) = if self.is_rehashing() {
            // buckets below rehash_index in the primary table are empty
            let s0 = self.tables[0].size();
            let s1 = self.tables[1].size();
            let base = self.rehash_index as usize;
            loop {
                let h = base + rng.gen_range(0..s0 + s1 - base);
                let (t, idx) = if h >= s0 { (1, h - s0) } else { (0, h) };
                if !self.tables[t].buckets[idx].is_empty() {
                    break (t, idx);
                }
            }
        } else {
            loop {
                let idx = (rng.gen::<u64>() & self.tables[0].mask()) as usize;
                if !self.tables[0].buckets[idx].is_empty() {
                    break (0, idx);
                }
            }
        };

        let chain = &self.tables[t].buckets[idx];
        let entry = &chain[rng.gen_range(0..chain.len())];
        Some((&entry.key, &entry.val))
    }

    /// Samples up to `count` entries from random contiguous locations.
    ///
    /// Fast but without distribution guarantees: emits whole chains and
    /// may return duplicates across calls. Jumps to a fresh random index
    /// after a run of empty buckets, and gives up after `10 * count`
    /// probes.
    pub fn sample(&mut self, count: usize) -> Vec<(&K, &V)> {
        let count = count.min(self.len());
        if count == 0 {
            return Vec::new();
        }

        // do a rehash work slice proportional to the sample size
        for _ in 0..count {
            if !self.is_rehashing() {
                break;
            }
            self.rehash_step();
        }

        let tables = if self.is_rehashing() { 2 } else { 1 };
        let maxsizemask = self.tables[..tables]
            .iter()
            .map(Table::mask)
            .max()
            .unwrap_or(0);

        let mut rng = rand::thread_rng();
        let mut i = (rng.gen::<u64>() & maxsizemask) as usize;
        let mut emptylen = 0usize;
        let mut maxsteps = count * 10;
        let mut out: Vec<(&K, &V)> = Vec::with_capacity(count);

        while out.len() < count && maxsteps > 0 {
            maxsteps -= 1;
            for t in 0..tables {
                // the rehash-empty prefix of the primary table holds nothing
                if tables == 2 && t == 0 && i < self.rehash_index as usize {
                    if i >= self.tables[1].size() {
                        i = self.rehash_index as usize;
                    }
                    continue;
                }
                if i >= self.tables[t].size() {
                    continue;
                }
                let chain = &self.tables[t].buckets[i];
                if chain.is_empty() {
                    emptylen += 1;
                    if emptylen >= 5 && emptylen > count {
                        i = (rng.gen::<u64>() & maxsizemask) as usize;
                        emptylen = 0;
                    }
                } else {
                    emptylen = 0;
                    for entry in chain {
                        out.push((&entry.key, &entry.val));
                        if out.len() == count {
                            return out;
                        }
                    }
                }
            }
            i = (i + 1) & maxsizemask as usize;
        }
        out
    }

    /// Drops every entry and returns the table to its unallocated state.
    pub fn clear(&mut self) {
        self.tables = [Table::unallocated(), Table::unallocated()];
        self.rehash_index = -1;
        self.publish_shape();
    }

    /// Index of the table receiving new inserts.
    fn active_table(&self) -> usize {
        usize::from(self.is_rehashing())
    }

    /// Locates a key in either table as (table, bucket, chain position).
    fn locate<Q>(&self, key: &Q, h: u64) -> Option<(usize, usize, usize)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        for t in 0..2 {
            if self.tables[t].size() == 0 {
                break;
            }
            let idx = (h & self.tables[t].mask()) as usize;
            for (pos, entry) in self.tables[t].buckets[idx].iter().enumerate() {
                if entry.key.borrow() == key {
                    return Some((t, idx, pos));
                }
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    /// Inserts an entry known to be absent, at the head of its chain in
    /// the active table.
    fn push_new(&mut self, h: u64, entry: Entry<K, V>) {
        let t = self.active_table();
        let idx = (h & self.tables[t].mask()) as usize;
        self.tables[t].buckets[idx].insert(0, entry);
        self.tables[t].used += 1;
        self.publish_shape();
    }

    fn expand_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }
        if self.tables[0].size() == 0 {
            let _ = self.expand(INITIAL_SIZE);
            return;
        }
        let used = self.tables[0].used;
        let size = self.tables[0].size();
        if used >= size && (self.resize_enabled || used / size > self.force_resize_ratio) {
            let _ = self.expand(used * 2);
        }
    }
}

fn next_power(size: usize) -> usize {
    size.max(INITIAL_SIZE)
        .checked_next_power_of_two()
        .unwrap_or(1 << (usize::BITS - 1))
}

/// Key wrapper that hashes and compares ASCII case-insensitively, for
/// tables keyed by names rather than binary-safe data (e.g. a command
/// table).
#[derive(Debug, Clone)]
pub struct NoCaseKey(pub Vec<u8>);

impl std::hash::Hash for NoCaseKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for &b in &self.0 {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl PartialEq for NoCaseKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for NoCaseKey {}
