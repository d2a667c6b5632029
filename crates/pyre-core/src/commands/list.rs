use super::*;

use crate::quicklist::Dir;
use crate::types::ListValue;

impl Engine {
    /// LPUSH / RPUSH / LPUSHX / RPUSHX. The X variants refuse to create
    /// the key.
    pub(super) fn push_generic(
        &mut self,
        id: ClientId,
        argv: &[Bytes],
        end: End,
        require_existing: bool,
    ) {
        if argv.len() < 3 {
            self.client_mut(id)
                .reply_err("ERR wrong number of arguments");
            return;
        }
        let key = &argv[1];

        match self.db.lookup_write(key) {
            Some(Value::List(_)) => {}
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
            None => {
                if require_existing {
                    self.client_mut(id).reply_int(0);
                    return;
                }
                let list = ListValue::new(&self.config);
                self.db.add(key.clone(), Value::List(list));
            }
        }

        let Some(Value::List(list)) = self.db.lookup_write(key) else {
            unreachable!("list created or verified above");
        };
        for value in &argv[2..] {
            list.push(end, value);
        }
        let len = list.len();
        let pushed = (argv.len() - 2) as u64;

        self.client_mut(id).reply_int(len as i64);
        self.signal_list_ready(key);
        let event = if end == End::Head { "lpush" } else { "rpush" };
        self.notify(EventClass::List, event, key);
        self.dirty += pushed;
    }

    /// LPOP / RPOP.
    pub(super) fn pop_generic(&mut self, id: ClientId, argv: &[Bytes], end: End) {
        let key = &argv[1];
        let popped = match self.db.lookup_write(key) {
            None => {
                self.client_mut(id).reply_nil();
                return;
            }
            Some(Value::List(list)) => list.pop(end),
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
        };

        match popped {
            None => self.client_mut(id).reply_nil(),
            Some(value) => {
                self.client_mut(id).reply_bulk(value);
                let event = if end == End::Head { "lpop" } else { "rpop" };
                self.notify(EventClass::List, event, key);
                if self.list_is_empty(key) {
                    self.delete_emptied_key(key);
                }
                self.dirty += 1;
            }
        }
    }

    /// LLEN.
    pub(super) fn llen(&mut self, id: ClientId, argv: &[Bytes]) {
        let len = match self.db.lookup_read(&argv[1]) {
            None => 0,
            Some(Value::List(list)) => list.len(),
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
        };
        self.client_mut(id).reply_int(len as i64);
    }

    /// LINDEX.
    pub(super) fn lindex(&mut self, id: ClientId, argv: &[Bytes]) {
        let Some(index) = self.int_arg(id, &argv[2]) else {
            return;
        };
        let key = &argv[1];
        let value = match self.db.lookup_write(key) {
            None => None,
            Some(Value::List(list)) => list.get(index),
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
        };
        match value {
            Some(v) => self.client_mut(id).reply_bulk(v),
            None => self.client_mut(id).reply_nil(),
        }
    }

    /// LSET.
    pub(super) fn lset(&mut self, id: ClientId, argv: &[Bytes]) {
        let Some(index) = self.int_arg(id, &argv[2]) else {
            return;
        };
        let key = &argv[1];
        let replaced = match self.db.lookup_write(key) {
            None => {
                self.client_mut(id).reply_err("ERR no such key");
                return;
            }
            Some(Value::List(list)) => list.replace_at(index, &argv[3]),
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
        };
        if replaced {
            self.client_mut(id).reply_ok();
            self.notify(EventClass::List, "lset", key);
            self.dirty += 1;
        } else {
            self.client_mut(id).reply_err("ERR index out of range");
        }
    }

    /// LINSERT key BEFORE|AFTER pivot value.
    pub(super) fn linsert(&mut self, id: ClientId, argv: &[Bytes]) {
        let before = if argv[2].eq_ignore_ascii_case(b"before") {
            true
        } else if argv[2].eq_ignore_ascii_case(b"after") {
            false
        } else {
            self.client_mut(id).reply_err("ERR syntax error");
            return;
        };

        let key = &argv[1];
        let (inserted, len) = match self.db.lookup_write(key) {
            None => {
                self.client_mut(id).reply_int(0);
                return;
            }
            Some(Value::List(list)) => {
                // seek the pivot from head to tail
                let mut it = list.iter(Dir::Forward);
                let mut inserted = false;
                while let Some(entry) = list.next(&mut it) {
                    if ListValue::entry_eq(&entry, &argv[3]) {
                        if before {
                            list.insert_before(&entry, &argv[4]);
                        } else {
                            list.insert_after(&entry, &argv[4]);
                        }
                        inserted = true;
                        break;
                    }
                }
                (inserted, list.len())
            }
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
        };

        if inserted {
            self.notify(EventClass::List, "linsert", key);
            self.dirty += 1;
            self.client_mut(id).reply_int(len as i64);
        } else {
            // pivot not found: no mutation
            self.client_mut(id).reply_int(-1);
        }
    }

    /// LRANGE.
    pub(super) fn lrange(&mut self, id: ClientId, argv: &[Bytes]) {
        let (Some(start), Some(end)) = (self.int_arg(id, &argv[2]), self.int_arg(id, &argv[3]))
        else {
            return;
        };
        let key = &argv[1];
        let values = match self.db.lookup_write(key) {
            None => Vec::new(),
            Some(Value::List(list)) => {
                let llen = list.len() as i64;
                let mut start = if start < 0 { llen + start } else { start };
                let end = if end < 0 { llen + end } else { end };
                if start < 0 {
                    start = 0;
                }
                if start > end || start >= llen {
                    Vec::new()
                } else {
                    let end = end.min(llen - 1);
                    let rangelen = (end - start + 1) as usize;
                    let mut out = Vec::with_capacity(rangelen);
                    let mut it = list.iter_from(start, Dir::Forward).expect("start in range");
                    for _ in 0..rangelen {
                        let entry = list.next(&mut it).expect("range within list");
                        out.push(entry.value);
                    }
                    out
                }
            }
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
        };

        let client = self.client_mut(id);
        client.reply_multi_bulk_len(values.len());
        for v in values {
            client.reply_bulk(v);
        }
    }

    /// LTRIM.
    pub(super) fn ltrim(&mut self, id: ClientId, argv: &[Bytes]) {
        let (Some(start), Some(end)) = (self.int_arg(id, &argv[2]), self.int_arg(id, &argv[3]))
        else {
            return;
        };
        let key = &argv[1];
        match self.db.lookup_write(key) {
            None => {
                self.client_mut(id).reply_ok();
                return;
            }
            Some(Value::List(list)) => {
                let llen = list.len() as i64;
                let mut start = if start < 0 { llen + start } else { start };
                let end = if end < 0 { llen + end } else { end };
                if start < 0 {
                    start = 0;
                }
                // an inverted or out-of-range window empties the list
                let (ltrim, rtrim) = if start > end || start >= llen {
                    (llen, 0)
                } else {
                    let end = end.min(llen - 1);
                    (start, llen - end - 1)
                };
                list.del_range(0, ltrim as usize);
                list.del_range(-rtrim, rtrim as usize);
            }
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
        }

        self.notify(EventClass::List, "ltrim", key);
        if self.list_is_empty(key) {
            self.delete_emptied_key(key);
        }
        self.dirty += 1;
        self.client_mut(id).reply_ok();
    }

    /// LREM key count value. A negative count removes from the tail.
    pub(super) fn lrem(&mut self, id: ClientId, argv: &[Bytes]) {
        let Some(toremove) = self.int_arg(id, &argv[2]) else {
            return;
        };
        let key = &argv[1];
        let removed = match self.db.lookup_write(key) {
            None => {
                self.client_mut(id).reply_int(0);
                return;
            }
            Some(Value::List(list)) => {
                let dir = if toremove < 0 {
                    Dir::Backward
                } else {
                    Dir::Forward
                };
                let limit = toremove.unsigned_abs() as usize;
                let mut it = list.iter(dir);
                let mut removed = 0usize;
                while let Some(entry) = list.next(&mut it) {
                    if ListValue::entry_eq(&entry, &argv[3]) {
                        list.delete_entry(&mut it, &entry);
                        removed += 1;
                        if limit != 0 && removed == limit {
                            break;
                        }
                    }
                }
                removed
            }
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
        };

        if removed > 0 {
            self.notify(EventClass::Generic, "lrem", key);
            self.dirty += removed as u64;
        }
        if self.list_is_empty(key) {
            self.delete_emptied_key(key);
        }
        self.client_mut(id).reply_int(removed as i64);
    }

    /// RPOPLPUSH source destination.
    pub(super) fn rpoplpush(&mut self, id: ClientId, argv: &[Bytes]) {
        let source = argv[1].clone();
        let destination = argv[2].clone();

        match self.db.lookup_write(&source) {
            None => {
                self.client_mut(id).reply_nil();
                return;
            }
            Some(Value::List(_)) => {}
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
                return;
            }
        }
        // refuse before popping so a type error mutates nothing
        if matches!(self.db.lookup_write(&destination), Some(v) if !v.is_list()) {
            self.client_mut(id).reply_wrong_type();
            return;
        }

        let Some(Value::List(list)) = self.db.lookup_write(&source) else {
            unreachable!("verified above");
        };
        let Some(value) = list.pop(End::Tail) else {
            self.client_mut(id).reply_nil();
            return;
        };

        self.push_to_destination(id, &destination, &value);
        self.notify(EventClass::List, "rpop", &source);
        if self.list_is_empty(&source) {
            self.delete_emptied_key(&source);
        }
        self.dirty += 1;
    }

    /// The destination-side push shared by RPOPLPUSH and the rendezvous
    /// delivery path: creates the list if absent, left-pushes, notifies,
    /// marks the key ready, and replies with the pushed value.
    pub(super) fn push_to_destination(&mut self, id: ClientId, destination: &Bytes, value: &Bytes) {
        if self.db.lookup_write(destination).is_none() {
            let list = ListValue::new(&self.config);
            self.db.add(destination.clone(), Value::List(list));
        }
        let Some(Value::List(list)) = self.db.lookup_write(destination) else {
            unreachable!("destination type checked by callers");
        };
        list.push(End::Head, value);

        self.signal_list_ready(destination);
        self.notify(EventClass::List, "lpush", destination);
        self.client_mut(id).reply_bulk(value.clone());
    }

    /// True when `key` holds a list that just became empty.
    pub(super) fn list_is_empty(&mut self, key: &Bytes) -> bool {
        matches!(self.db.lookup_write(key), Some(Value::List(l)) if l.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{bulk, run};
    use super::*;
    use crate::commands::Reply;

    fn engine() -> (Engine, ClientId) {
        let mut e = Engine::new();
        let c = e.new_client();
        (e, c)
    }

    #[test]
    fn rpush_lrange_lpop_llen_scenario() {
        let (mut e, c) = engine();
        assert_eq!(run(&mut e, c, &["RPUSH", "k", "a", "b", "c"]), vec![Reply::Int(3)]);
        assert_eq!(
            run(&mut e, c, &["LRANGE", "k", "0", "-1"]),
            vec![Reply::ArrayLen(3), bulk("a"), bulk("b"), bulk("c")]
        );
        assert_eq!(run(&mut e, c, &["LPOP", "k"]), vec![bulk("a")]);
        assert_eq!(run(&mut e, c, &["LLEN", "k"]), vec![Reply::Int(2)]);
    }

    #[test]
    fn lrem_scenario() {
        let (mut e, c) = engine();
        run(&mut e, c, &["RPUSH", "k", "a", "b", "c"]);
        assert_eq!(run(&mut e, c, &["LREM", "k", "-2", "x"]), vec![Reply::Int(0)]);
        assert_eq!(run(&mut e, c, &["LREM", "k", "0", "b"]), vec![Reply::Int(1)]);
        assert_eq!(
            run(&mut e, c, &["LRANGE", "k", "0", "-1"]),
            vec![Reply::ArrayLen(2), bulk("a"), bulk("c")]
        );
    }

    #[test]
    fn lrem_negative_count_removes_from_tail() {
        let (mut e, c) = engine();
        run(&mut e, c, &["RPUSH", "k", "x", "a", "x", "b", "x"]);
        assert_eq!(run(&mut e, c, &["LREM", "k", "-2", "x"]), vec![Reply::Int(2)]);
        assert_eq!(
            run(&mut e, c, &["LRANGE", "k", "0", "-1"]),
            vec![Reply::ArrayLen(3), bulk("x"), bulk("a"), bulk("b")]
        );
    }

    #[test]
    fn pushx_requires_existing_key() {
        let (mut e, c) = engine();
        assert_eq!(run(&mut e, c, &["LPUSHX", "k", "v"]), vec![Reply::Int(0)]);
        assert_eq!(run(&mut e, c, &["EXISTS", "k"]), vec![Reply::Int(0)]);
        run(&mut e, c, &["RPUSH", "k", "a"]);
        assert_eq!(run(&mut e, c, &["RPUSHX", "k", "b"]), vec![Reply::Int(2)]);
    }

    #[test]
    fn pop_on_missing_key_is_nil() {
        let (mut e, c) = engine();
        assert_eq!(run(&mut e, c, &["LPOP", "nope"]), vec![Reply::Nil]);
        assert_eq!(run(&mut e, c, &["RPOP", "nope"]), vec![Reply::Nil]);
    }

    #[test]
    fn popping_last_element_deletes_the_key() {
        let (mut e, c) = engine();
        run(&mut e, c, &["RPUSH", "k", "only"]);
        assert_eq!(run(&mut e, c, &["RPOP", "k"]), vec![bulk("only")]);
        assert_eq!(run(&mut e, c, &["EXISTS", "k"]), vec![Reply::Int(0)]);
        assert!(e.events.iter().any(|ev| ev.event == "del"));
    }

    #[test]
    fn list_commands_on_string_key_are_wrongtype() {
        let (mut e, c) = engine();
        run(&mut e, c, &["SET", "s", "v"]);
        for cmd in [
            vec!["LPUSH", "s", "x"],
            vec!["LPOP", "s"],
            vec!["LLEN", "s"],
            vec!["LINDEX", "s", "0"],
            vec!["LRANGE", "s", "0", "-1"],
            vec!["LTRIM", "s", "0", "-1"],
            vec!["LREM", "s", "0", "x"],
        ] {
            let replies = run(&mut e, c, &cmd);
            assert!(
                matches!(&replies[0], Reply::Err(m) if m.starts_with("WRONGTYPE")),
                "{cmd:?} should be wrongtype"
            );
        }
    }

    #[test]
    fn lindex_and_lset() {
        let (mut e, c) = engine();
        run(&mut e, c, &["RPUSH", "k", "a", "b", "c"]);
        assert_eq!(run(&mut e, c, &["LINDEX", "k", "1"]), vec![bulk("b")]);
        assert_eq!(run(&mut e, c, &["LINDEX", "k", "-1"]), vec![bulk("c")]);
        assert_eq!(run(&mut e, c, &["LINDEX", "k", "9"]), vec![Reply::Nil]);

        assert_eq!(run(&mut e, c, &["LSET", "k", "1", "B"]), vec![Reply::Ok]);
        assert_eq!(run(&mut e, c, &["LINDEX", "k", "1"]), vec![bulk("B")]);
        // negative index equal to -len refers to the head
        assert_eq!(run(&mut e, c, &["LSET", "k", "-3", "A"]), vec![Reply::Ok]);
        assert_eq!(run(&mut e, c, &["LINDEX", "k", "0"]), vec![bulk("A")]);

        let replies = run(&mut e, c, &["LSET", "k", "9", "x"]);
        assert!(matches!(&replies[0], Reply::Err(m) if m.contains("out of range")));
        let replies = run(&mut e, c, &["LSET", "missing", "0", "x"]);
        assert!(matches!(&replies[0], Reply::Err(m) if m.contains("no such key")));
    }

    #[test]
    fn linsert_before_after_and_missing_pivot() {
        let (mut e, c) = engine();
        run(&mut e, c, &["RPUSH", "k", "a", "c"]);
        assert_eq!(
            run(&mut e, c, &["LINSERT", "k", "BEFORE", "c", "b"]),
            vec![Reply::Int(3)]
        );
        assert_eq!(
            run(&mut e, c, &["LINSERT", "k", "after", "c", "d"]),
            vec![Reply::Int(4)]
        );
        assert_eq!(
            run(&mut e, c, &["LRANGE", "k", "0", "-1"]),
            vec![Reply::ArrayLen(4), bulk("a"), bulk("b"), bulk("c"), bulk("d")]
        );
        // pivot absent: -1 and no mutation
        assert_eq!(
            run(&mut e, c, &["LINSERT", "k", "BEFORE", "zz", "x"]),
            vec![Reply::Int(-1)]
        );
        assert_eq!(run(&mut e, c, &["LLEN", "k"]), vec![Reply::Int(4)]);
        // bad direction keyword
        let replies = run(&mut e, c, &["LINSERT", "k", "sideways", "a", "x"]);
        assert!(matches!(&replies[0], Reply::Err(m) if m.contains("syntax")));
    }

    #[test]
    fn lrange_boundaries() {
        let (mut e, c) = engine();
        run(&mut e, c, &["RPUSH", "k", "a", "b"]);
        // more negative than the length: whole list
        assert_eq!(
            run(&mut e, c, &["LRANGE", "k", "-100", "-1"]),
            vec![Reply::ArrayLen(2), bulk("a"), bulk("b")]
        );
        assert_eq!(
            run(&mut e, c, &["LRANGE", "k", "5", "10"]),
            vec![Reply::ArrayLen(0)]
        );
        assert_eq!(
            run(&mut e, c, &["LRANGE", "missing", "0", "-1"]),
            vec![Reply::ArrayLen(0)]
        );
    }

    #[test]
    fn ltrim_window_and_full_delete() {
        let (mut e, c) = engine();
        run(&mut e, c, &["RPUSH", "k", "a", "b", "c", "d", "e"]);
        assert_eq!(run(&mut e, c, &["LTRIM", "k", "1", "3"]), vec![Reply::Ok]);
        assert_eq!(
            run(&mut e, c, &["LRANGE", "k", "0", "-1"]),
            vec![Reply::ArrayLen(3), bulk("b"), bulk("c"), bulk("d")]
        );
        // start > end deletes the whole list and the key
        assert_eq!(run(&mut e, c, &["LTRIM", "k", "2", "1"]), vec![Reply::Ok]);
        assert_eq!(run(&mut e, c, &["EXISTS", "k"]), vec![Reply::Int(0)]);

        run(&mut e, c, &["RPUSH", "k2", "a"]);
        // start >= len deletes as well
        assert_eq!(run(&mut e, c, &["LTRIM", "k2", "5", "10"]), vec![Reply::Ok]);
        assert_eq!(run(&mut e, c, &["EXISTS", "k2"]), vec![Reply::Int(0)]);
    }

    #[test]
    fn rpoplpush_moves_and_creates_destination() {
        let (mut e, c) = engine();
        run(&mut e, c, &["RPUSH", "src", "a", "b"]);
        assert_eq!(run(&mut e, c, &["RPOPLPUSH", "src", "dst"]), vec![bulk("b")]);
        assert_eq!(
            run(&mut e, c, &["LRANGE", "dst", "0", "-1"]),
            vec![Reply::ArrayLen(1), bulk("b")]
        );
        assert_eq!(run(&mut e, c, &["RPOPLPUSH", "src", "dst"]), vec![bulk("a")]);
        // source drained: gone
        assert_eq!(run(&mut e, c, &["EXISTS", "src"]), vec![Reply::Int(0)]);
        assert_eq!(
            run(&mut e, c, &["LRANGE", "dst", "0", "-1"]),
            vec![Reply::ArrayLen(2), bulk("a"), bulk("b")]
        );
        assert_eq!(run(&mut e, c, &["RPOPLPUSH", "src", "dst"]), vec![Reply::Nil]);
    }

    #[test]
    fn rpoplpush_wrongtype_destination_mutates_nothing() {
        let (mut e, c) = engine();
        run(&mut e, c, &["RPUSH", "src", "a"]);
        run(&mut e, c, &["SET", "dst", "str"]);
        let replies = run(&mut e, c, &["RPOPLPUSH", "src", "dst"]);
        assert!(matches!(&replies[0], Reply::Err(m) if m.starts_with("WRONGTYPE")));
        assert_eq!(
            run(&mut e, c, &["LRANGE", "src", "0", "-1"]),
            vec![Reply::ArrayLen(1), bulk("a")]
        );
    }

    #[test]
    fn rpoplpush_to_same_key_rotates() {
        let (mut e, c) = engine();
        run(&mut e, c, &["RPUSH", "k", "a", "b", "c"]);
        assert_eq!(run(&mut e, c, &["RPOPLPUSH", "k", "k"]), vec![bulk("c")]);
        assert_eq!(
            run(&mut e, c, &["LRANGE", "k", "0", "-1"]),
            vec![Reply::ArrayLen(3), bulk("c"), bulk("a"), bulk("b")]
        );
    }

    #[test]
    fn long_lists_span_many_nodes_and_stay_ordered() {
        let (mut e, c) = engine();
        for i in 0..500 {
            run(&mut e, c, &["RPUSH", "big", &format!("v{i}")]);
        }
        assert_eq!(run(&mut e, c, &["LLEN", "big"]), vec![Reply::Int(500)]);
        assert_eq!(run(&mut e, c, &["LINDEX", "big", "250"]), vec![bulk("v250")]);
        let replies = run(&mut e, c, &["LRANGE", "big", "498", "-1"]);
        assert_eq!(replies, vec![Reply::ArrayLen(2), bulk("v498"), bulk("v499")]);
    }
}
