//! Dual-representation hash value.
//!
//! Small hashes live in a packed sequence of alternating field/value
//! slots: compact, cache-friendly, linear-scanned. Once any field or
//! value outgrows the configured width, or the pair count passes the
//! configured threshold, the hash promotes in place to a real table.
//! Promotion is one-way; a table hash never packs back down.

use bytes::Bytes;
use compact_str::CompactString;
use tracing::{debug, error};

use crate::dict::{Dict, Replaced, SafeIter, INITIAL_SIZE};
use crate::error::{IncrError, IncrFloatError};
use crate::numeric::{format_f64, parse_f64, parse_i64};
use crate::packed::PackedSeq;
use crate::types::Encoding;

/// Shrink the table encoding once it is this sparsely filled (percent).
const MIN_FILL_PERCENT: usize = 10;

/// Outcome of a field write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Inserted,
    Updated,
}

/// A hash value stored in the keyspace.
#[derive(Debug)]
pub enum HashValue {
    /// Alternating field/value slots; fields sit at even indices.
    Packed(PackedSeq),
    /// Promoted form.
    Table(Dict<CompactString, Bytes>),
}

impl Default for HashValue {
    fn default() -> Self {
        HashValue::Packed(PackedSeq::new())
    }
}

fn field_key(field: &[u8]) -> CompactString {
    CompactString::from(String::from_utf8_lossy(field).as_ref())
}

impl HashValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            HashValue::Packed(_) => Encoding::Packed,
            HashValue::Table(_) => Encoding::Table,
        }
    }

    /// Number of field/value pairs.
    pub fn len(&self) -> usize {
        match self {
            HashValue::Packed(seq) => seq.len() / 2,
            HashValue::Table(dict) => dict.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of `field` in the packed sequence, if present.
    fn packed_find(seq: &PackedSeq, field: &[u8]) -> Option<usize> {
        seq.find(field, 0, 1)
    }

    /// Gets a field's value.
    pub fn get(&self, field: &[u8]) -> Option<Bytes> {
        match self {
            HashValue::Packed(seq) => {
                let at = Self::packed_find(seq, field)?;
                Some(seq.get(at + 1).expect("value slot follows field").to_bytes())
            }
            HashValue::Table(dict) => dict.peek(field_key(field).as_str()).map(|e| e.value().clone()),
        }
    }

    pub fn exists(&self, field: &[u8]) -> bool {
        match self {
            HashValue::Packed(seq) => Self::packed_find(seq, field).is_some(),
            HashValue::Table(dict) => dict.contains(field_key(field).as_str()),
        }
    }

    /// Byte width of a field's value, or `None` when absent.
    pub fn value_len(&self, field: &[u8]) -> Option<usize> {
        match self {
            HashValue::Packed(seq) => {
                let at = Self::packed_find(seq, field)?;
                Some(seq.get(at + 1).expect("value slot follows field").width())
            }
            HashValue::Table(dict) => dict.peek(field_key(field).as_str()).map(|e| e.value().len()),
        }
    }

    /// Promotes ahead of a write when any incoming field or value is
    /// already wider than the packed limit, so the packed form never
    /// stores an oversized element even transiently.
    pub fn try_promote_for_args(&mut self, args: &[&[u8]], max_pack_value: usize) {
        if !matches!(self, HashValue::Packed(_)) {
            return;
        }
        if args.iter().any(|a| a.len() > max_pack_value) {
            self.convert_to_table();
        }
    }

    /// Sets a field. In packed form an existing value slot is deleted
    /// and the new bytes inserted in its place; a new pair is appended
    /// at the tail. Afterwards the encoding promotes if the pair count
    /// passed `max_pack_entries`.
    pub fn set(
        &mut self,
        field: &[u8],
        value: &[u8],
        max_pack_entries: usize,
        max_pack_value: usize,
    ) -> SetOutcome {
        self.try_promote_for_args(&[field, value], max_pack_value);

        let outcome = match self {
            HashValue::Packed(seq) => match Self::packed_find(seq, field) {
                Some(at) => {
                    seq.remove(at + 1);
                    seq.insert(at + 1, value);
                    SetOutcome::Updated
                }
                None => {
                    seq.push_back(field);
                    seq.push_back(value);
                    SetOutcome::Inserted
                }
            },
            HashValue::Table(dict) => {
                match dict.replace(field_key(field), Bytes::copy_from_slice(value)) {
                    Replaced::Inserted => SetOutcome::Inserted,
                    Replaced::Updated => SetOutcome::Updated,
                }
            }
        };

        if matches!(self, HashValue::Packed(_)) && self.len() > max_pack_entries {
            self.convert_to_table();
        }
        outcome
    }

    /// Deletes a field. Returns whether it was present. After a table
    /// delete the dict shrinks once it is sparse enough to be worth it.
    pub fn delete(&mut self, field: &[u8]) -> bool {
        match self {
            HashValue::Packed(seq) => match Self::packed_find(seq, field) {
                Some(at) => {
                    seq.remove(at); // field slot
                    seq.remove(at); // value slot, now at the same index
                    true
                }
                None => false,
            },
            HashValue::Table(dict) => {
                let deleted = dict.delete(field_key(field).as_str());
                if deleted {
                    let slots = dict.slots();
                    if slots > INITIAL_SIZE && dict.len() * 100 / slots < MIN_FILL_PERCENT {
                        let _ = dict.resize();
                    }
                }
                deleted
            }
        }
    }

    /// Iterates field/value pairs. Packed iteration yields insertion
    /// order; table iteration order is arbitrary but stable while the
    /// hash is unmodified.
    pub fn iter(&self) -> HashIter<'_> {
        match self {
            HashValue::Packed(seq) => HashIter::Packed { seq, at: 0 },
            HashValue::Table(dict) => HashIter::Table {
                dict,
                it: dict.safe_iter(),
            },
        }
    }

    /// Converts the packed form into a freshly-built table. A duplicate
    /// field during the rebuild means the packed payload was corrupt,
    /// which is fatal. Calling this on an already-promoted hash is a
    /// programming error.
    pub fn convert_to_table(&mut self) {
        let HashValue::Packed(seq) = self else {
            panic!("table hash conversion is not implemented");
        };

        let mut dict: Dict<CompactString, Bytes> = Dict::new();
        let mut it = seq.iter();
        while let Some(field) = it.next() {
            let value = it.next().expect("packed hash has paired slots");
            let key = field_key(&field.to_bytes());
            if dict.add(key, value.to_bytes()).is_err() {
                error!(
                    blob_len = seq.blob_len(),
                    dump = %hex_dump(seq.as_raw()),
                    "packed hash with duplicate fields"
                );
                panic!("packed hash corruption detected");
            }
        }
        debug!(fields = dict.len(), "hash promoted to table encoding");
        *self = HashValue::Table(dict);
    }

    /// Adds a signed delta to an integer-valued field, creating it at 0.
    /// The stored result is its decimal text. Nothing is written on a
    /// parse failure or overflow.
    pub fn incr_by(
        &mut self,
        field: &[u8],
        delta: i64,
        max_pack_entries: usize,
        max_pack_value: usize,
    ) -> Result<i64, IncrError> {
        let current = match self.get(field) {
            Some(raw) => parse_i64(&raw).ok_or(IncrError::NotANumber)?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(IncrError::Overflow)?;
        self.set(
            field,
            next.to_string().as_bytes(),
            max_pack_entries,
            max_pack_value,
        );
        Ok(next)
    }

    /// Adds a float delta to a field, creating it at 0. Stores and
    /// returns the canonical fixed-precision decimal so every observer
    /// (client, replica, AOF) sees identical bytes.
    pub fn incr_by_float(
        &mut self,
        field: &[u8],
        delta: f64,
        max_pack_entries: usize,
        max_pack_value: usize,
    ) -> Result<Bytes, IncrFloatError> {
        let current = match self.get(field) {
            Some(raw) => parse_f64(&raw).ok_or(IncrFloatError::NotAFloat)?,
            None => 0.0,
        };
        let next = current + delta;
        if !next.is_finite() {
            return Err(IncrFloatError::NanOrInfinity);
        }
        let formatted = Bytes::from(format_f64(next));
        self.set(field, &formatted, max_pack_entries, max_pack_value);
        Ok(formatted)
    }
}

/// Iterator over field/value pairs, reified to owned bytes.
pub enum HashIter<'a> {
    Packed {
        seq: &'a PackedSeq,
        at: usize,
    },
    Table {
        dict: &'a Dict<CompactString, Bytes>,
        it: SafeIter,
    },
}

impl Iterator for HashIter<'_> {
    type Item = (Bytes, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            HashIter::Packed { seq, at } => {
                let field = seq.get(*at)?;
                let value = seq.get(*at + 1).expect("packed hash has paired slots");
                *at += 2;
                Some((field.to_bytes(), value.to_bytes()))
            }
            HashIter::Table { dict, it } => dict
                .safe_next(it)
                .map(|(k, v)| (Bytes::copy_from_slice(k.as_bytes()), v.clone())),
        }
    }
}

fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for b in data.iter().take(512) {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
