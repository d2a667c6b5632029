use super::*;

use crate::numeric::parse_f64;
use crate::types::{HashValue, SetOutcome};

impl Engine {
    /// Looks up `key` as a hash for writing, creating it when absent.
    /// Replies wrongtype and returns false on a type mismatch.
    fn hash_lookup_or_create(&mut self, id: ClientId, key: &Bytes) -> bool {
        match self.db.lookup_write(key) {
            Some(Value::Hash(_)) => true,
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                false
            }
            None => {
                self.db.add(key.clone(), Value::Hash(HashValue::new()));
                true
            }
        }
    }

    /// Borrows an existing hash for writing, replying wrongtype on a
    /// mismatch. `Ok(None)` means the key is absent.
    fn hash_mut<'a>(
        db: &'a mut Db,
        client: &mut Client,
        key: &Bytes,
    ) -> Result<Option<&'a mut HashValue>, ()> {
        match db.lookup_write(key) {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(Some(h)),
            Some(_) => {
                client.reply_wrong_type();
                Err(())
            }
        }
    }

    /// HSET / HMSET key field value [field value ...].
    pub(super) fn hset(&mut self, id: ClientId, argv: &[Bytes]) {
        if argv.len() % 2 == 1 {
            self.client_mut(id)
                .reply_err("ERR wrong number of arguments for 'hset' command");
            return;
        }
        let key = &argv[1];
        if !self.hash_lookup_or_create(id, key) {
            return;
        }

        let max_entries = self.config.hash_max_pack_entries;
        let max_value = self.config.hash_max_pack_value;
        let Some(Value::Hash(h)) = self.db.lookup_write(key) else {
            unreachable!("hash created or verified above");
        };
        // promote up front if any incoming field or value is oversized
        let wide: Vec<&[u8]> = argv[2..].iter().map(|b| b.as_ref()).collect();
        h.try_promote_for_args(&wide, max_value);

        let mut created = 0;
        for pair in argv[2..].chunks_exact(2) {
            if h.set(&pair[0], &pair[1], max_entries, max_value) == SetOutcome::Inserted {
                created += 1;
            }
        }

        // HSET replies with the insert count, the deprecated HMSET with OK
        if argv[0].eq_ignore_ascii_case(b"hmset") {
            self.client_mut(id).reply_ok();
        } else {
            self.client_mut(id).reply_int(created);
        }
        self.notify(EventClass::Hash, "hset", key);
        self.dirty += 1;
    }

    /// HSETNX key field value.
    pub(super) fn hsetnx(&mut self, id: ClientId, argv: &[Bytes]) {
        let key = &argv[1];
        if !self.hash_lookup_or_create(id, key) {
            return;
        }
        let max_entries = self.config.hash_max_pack_entries;
        let max_value = self.config.hash_max_pack_value;
        let Some(Value::Hash(h)) = self.db.lookup_write(key) else {
            unreachable!("hash created or verified above");
        };
        if h.exists(&argv[2]) {
            self.client_mut(id).reply_int(0);
            return;
        }
        h.try_promote_for_args(&[argv[2].as_ref(), argv[3].as_ref()], max_value);
        h.set(&argv[2], &argv[3], max_entries, max_value);
        self.client_mut(id).reply_int(1);
        self.notify(EventClass::Hash, "hset", key);
        self.dirty += 1;
    }

    /// HGET key field.
    pub(super) fn hget(&mut self, id: ClientId, argv: &[Bytes]) {
        let key = argv[1].clone();
        let Ok(found) = Self::hash_mut(
            &mut self.db,
            self.clients.get_mut(&id).expect("unknown client id"),
            &key,
        ) else {
            return;
        };
        let value = found.and_then(|h| h.get(&argv[2]));
        match value {
            Some(v) => self.client_mut(id).reply_bulk(v),
            None => self.client_mut(id).reply_nil(),
        }
    }

    /// HMGET key field [field ...]. A missing key reads as an empty
    /// hash: one nil per requested field.
    pub(super) fn hmget(&mut self, id: ClientId, argv: &[Bytes]) {
        let key = argv[1].clone();
        let Ok(found) = Self::hash_mut(
            &mut self.db,
            self.clients.get_mut(&id).expect("unknown client id"),
            &key,
        ) else {
            return;
        };
        let values: Vec<Option<Bytes>> = match found {
            Some(h) => argv[2..].iter().map(|f| h.get(f)).collect(),
            None => vec![None; argv.len() - 2],
        };
        let client = self.client_mut(id);
        client.reply_multi_bulk_len(values.len());
        for v in values {
            match v {
                Some(v) => client.reply_bulk(v),
                None => client.reply_nil(),
            }
        }
    }

    /// HDEL key field [field ...].
    pub(super) fn hdel(&mut self, id: ClientId, argv: &[Bytes]) {
        let key = argv[1].clone();
        let Ok(found) = Self::hash_mut(
            &mut self.db,
            self.clients.get_mut(&id).expect("unknown client id"),
            &key,
        ) else {
            return;
        };
        let Some(h) = found else {
            self.client_mut(id).reply_int(0);
            return;
        };

        let mut deleted = 0;
        let mut key_removed = false;
        for field in &argv[2..] {
            if h.delete(field) {
                deleted += 1;
                if h.is_empty() {
                    key_removed = true;
                    break;
                }
            }
        }
        if key_removed {
            self.db.remove(&key);
        }
        if deleted > 0 {
            self.notify(EventClass::Hash, "hdel", &key);
            if key_removed {
                self.notify(EventClass::Generic, "del", &key);
            }
            self.dirty += deleted as u64;
        }
        self.client_mut(id).reply_int(deleted);
    }

    /// HLEN key.
    pub(super) fn hlen(&mut self, id: ClientId, argv: &[Bytes]) {
        let len = match self.db.lookup_read(&argv[1]) {
            None => 0,
            Some(Value::Hash(h)) => h.len(),
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
        };
        self.client_mut(id).reply_int(len as i64);
    }

    /// HSTRLEN key field.
    pub(super) fn hstrlen(&mut self, id: ClientId, argv: &[Bytes]) {
        let len = match self.db.lookup_read(&argv[1]) {
            None => 0,
            Some(Value::Hash(h)) => h.value_len(&argv[2]).unwrap_or(0),
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
        };
        self.client_mut(id).reply_int(len as i64);
    }

    /// HEXISTS key field.
    pub(super) fn hexists(&mut self, id: ClientId, argv: &[Bytes]) {
        let exists = match self.db.lookup_read(&argv[1]) {
            None => false,
            Some(Value::Hash(h)) => h.exists(&argv[2]),
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
        };
        self.client_mut(id).reply_int(i64::from(exists));
    }

    /// HGETALL / HKEYS / HVALS.
    pub(super) fn hgetall_generic(
        &mut self,
        id: ClientId,
        argv: &[Bytes],
        fields: bool,
        values: bool,
    ) {
        let pairs: Vec<(Bytes, Bytes)> = match self.db.lookup_read(&argv[1]) {
            None => Vec::new(),
            Some(Value::Hash(h)) => h.iter().collect(),
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
        };
        let multiplier = usize::from(fields) + usize::from(values);
        let client = self.client_mut(id);
        client.reply_multi_bulk_len(pairs.len() * multiplier);
        for (f, v) in pairs {
            if fields {
                client.reply_bulk(f);
            }
            if values {
                client.reply_bulk(v);
            }
        }
    }

    /// HINCRBY key field increment.
    pub(super) fn hincrby(&mut self, id: ClientId, argv: &[Bytes]) {
        let Some(incr) = self.int_arg(id, &argv[3]) else {
            return;
        };
        let key = &argv[1];
        if !self.hash_lookup_or_create(id, key) {
            return;
        }
        let max_entries = self.config.hash_max_pack_entries;
        let max_value = self.config.hash_max_pack_value;
        let Some(Value::Hash(h)) = self.db.lookup_write(key) else {
            unreachable!("hash created or verified above");
        };
        match h.incr_by(&argv[2], incr, max_entries, max_value) {
            Ok(value) => {
                self.client_mut(id).reply_int(value);
                self.notify(EventClass::Hash, "hincrby", key);
                self.dirty += 1;
            }
            Err(e) => {
                let key = key.clone();
                self.client_mut(id).reply_err(format!("ERR {e}"));
                if self.hash_is_empty(&key) {
                    self.db.remove(&key);
                }
            }
        }
    }

    /// HINCRBYFLOAT key field increment. Replicates as an absolute HSET
    /// of the canonical result so replicas cannot drift on float
    /// formatting.
    pub(super) fn hincrbyfloat(&mut self, id: ClientId, argv: &[Bytes]) {
        let Some(incr) = parse_f64(&argv[3]) else {
            self.client_mut(id)
                .reply_err("ERR value is not a valid float");
            return;
        };
        let key = &argv[1];
        if !self.hash_lookup_or_create(id, key) {
            return;
        }
        let max_entries = self.config.hash_max_pack_entries;
        let max_value = self.config.hash_max_pack_value;
        let Some(Value::Hash(h)) = self.db.lookup_write(key) else {
            unreachable!("hash created or verified above");
        };
        match h.incr_by_float(&argv[2], incr, max_entries, max_value) {
            Ok(value) => {
                self.client_mut(id).reply_bulk(value.clone());
                self.notify(EventClass::Hash, "hincrbyfloat", key);
                self.dirty += 1;
                let rewrite = vec![
                    Bytes::from_static(b"HSET"),
                    argv[1].clone(),
                    argv[2].clone(),
                    value,
                ];
                self.client_mut(id).rewrite_command(rewrite);
            }
            Err(e) => {
                let key = key.clone();
                self.client_mut(id).reply_err(format!("ERR {e}"));
                if self.hash_is_empty(&key) {
                    self.db.remove(&key);
                }
            }
        }
    }

    /// HSCAN key cursor. The table encoding exposes the dict's scan
    /// cursor; packed hashes are small enough to return whole with a
    /// final cursor of 0.
    pub(super) fn hscan(&mut self, id: ClientId, argv: &[Bytes]) {
        // cursors are reversed-bit bucket indices, so the full u64
        // range is legal
        let cursor = std::str::from_utf8(&argv[2])
            .ok()
            .and_then(|s| s.parse::<u64>().ok());
        let Some(cursor) = cursor else {
            self.client_mut(id).reply_err("ERR invalid cursor");
            return;
        };
        let (next, pairs): (u64, Vec<(Bytes, Bytes)>) = match self.db.lookup_read(&argv[1]) {
            None => (0, Vec::new()),
            Some(Value::Hash(h @ HashValue::Packed(_))) => (0, h.iter().collect()),
            Some(Value::Hash(HashValue::Table(dict))) => {
                let mut pairs = Vec::new();
                let next = dict.scan(cursor, |field, value| {
                    pairs.push((Bytes::copy_from_slice(field.as_bytes()), value.clone()));
                });
                (next, pairs)
            }
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
        };

        let client = self.client_mut(id);
        client.reply_multi_bulk_len(2);
        client.reply_bulk(Bytes::from(next.to_string()));
        client.reply_multi_bulk_len(pairs.len() * 2);
        for (f, v) in pairs {
            client.reply_bulk(f);
            client.reply_bulk(v);
        }
    }

    /// True when `key` holds a hash with no fields left.
    fn hash_is_empty(&mut self, key: &Bytes) -> bool {
        matches!(self.db.lookup_write(key), Some(Value::Hash(h)) if h.is_empty())
    }
}
