//! Stateless cursor iteration (the reverse-bit-increment scan).
//!
//! The cursor walks bucket indices with its bits reversed before and
//! after each increment, so a table resize between two calls never
//! causes an index range to be skipped: every element present for the
//! whole scan is emitted at least once, though elements may be emitted
//! more than once across resizes.
//!
//! While rehashing, the smaller table's bucket is emitted first and then
//! every expansion of that index in the larger table. The cursor math
//! relies on the smaller mask being a bit-prefix of the larger one, so
//! the order (smaller first) is load-bearing.

use std::hash::Hash;

use super::Dict;

impl<K, V> Dict<K, V>
where
    K: Hash + Eq,
{
    /// Performs one scan step from `cursor`, emitting all entries in the
    /// visited buckets, and returns the next cursor. Start at 0; a
    /// returned 0 ends the iteration.
    pub fn scan<F>(&self, cursor: u64, mut emit: F) -> u64
    where
        F: FnMut(&K, &V),
    {
        if self.is_empty() {
            return 0;
        }
        let mut v = cursor;

        if !self.is_rehashing() {
            let t0 = &self.tables[0];
            let m0 = t0.mask();

            for entry in t0.bucket((v & m0) as usize) {
                emit(entry.key(), entry.value());
            }

            v |= !m0;
        } else {
            // iterate the smaller table's bucket, then all its
            // expansions in the larger table
            let (small, large) = if self.tables[0].size() <= self.tables[1].size() {
                (0, 1)
            } else {
                (1, 0)
            };
            let m0 = self.tables[small].mask();
            let m1 = self.tables[large].mask();

            for entry in self.tables[small].bucket((v & m0) as usize) {
                emit(entry.key(), entry.value());
            }

            loop {
                for entry in self.tables[large].bucket((v & m1) as usize) {
                    emit(entry.key(), entry.value());
                }
                // increment only the bits not covered by the smaller mask
                v = ((v | m0).wrapping_add(1) & !m0) | (v & m0);
                if v & (m0 ^ m1) == 0 {
                    break;
                }
            }

            v |= !m0;
        }

        // increment the reversed cursor so high-order bits advance first
        v = v.reverse_bits().wrapping_add(1).reverse_bits();
        v
    }
}
