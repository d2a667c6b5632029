//! Blocking pop / push rendezvous.
//!
//! The pop side parks a client on one or more keys; the push side marks
//! produced-into keys ready; and after every command boundary
//! [`Engine::handle_ready_keys`] drains the ready list, popping values
//! and handing them to waiters in the order they blocked.
//!
//! The drain swaps a fresh ready list in before walking the old one, so
//! a delivery that itself pushes (the pop-and-push variant) queues into
//! the next outer iteration instead of recursing.

use super::*;

impl Engine {
    /// BLPOP / BRPOP key [key ...] timeout.
    pub(super) fn blocking_pop_generic(&mut self, id: ClientId, argv: &[Bytes], end: End) {
        let Some(deadline) = self.timeout_arg(id, &argv[argv.len() - 1]) else {
            return;
        };
        let keys = &argv[1..argv.len() - 1];

        // any key with a value behaves as a plain pop
        for key in keys {
            match self.db.lookup_write(key) {
                None => continue,
                Some(Value::List(list)) => {
                    let Some(value) = list.pop(end) else {
                        continue;
                    };
                    {
                        let client = self.client_mut(id);
                        client.reply_multi_bulk_len(2);
                        client.reply_bulk(key.clone());
                        client.reply_bulk(value);
                    }
                    let event = if end == End::Head { "lpop" } else { "rpop" };
                    self.notify(EventClass::List, event, key);
                    if self.list_is_empty(key) {
                        self.delete_emptied_key(key);
                    }
                    self.dirty += 1;
                    // replicate as the non-blocking pop
                    let pop = pop_command_name(end);
                    self.client_mut(id)
                        .rewrite_command(vec![pop, key.clone()]);
                    return;
                }
                Some(_) => {
                    self.client_mut(id).reply_wrong_type();
                    return;
                }
            }
        }

        // blocking inside a transaction degenerates to an immediate nil
        if self.client(id).in_multi {
            self.client_mut(id).reply_nil_array();
            return;
        }

        self.block_for_keys(id, keys, deadline, None, end);
    }

    /// BRPOPLPUSH source destination timeout.
    pub(super) fn brpoplpush(&mut self, id: ClientId, argv: &[Bytes]) {
        let Some(deadline) = self.timeout_arg(id, &argv[3]) else {
            return;
        };
        match self.db.lookup_write(&argv[1]) {
            None => {
                if self.client(id).in_multi {
                    self.client_mut(id).reply_nil();
                } else {
                    let target = argv[2].clone();
                    self.block_for_keys(id, &argv[1..2], deadline, Some(target), End::Tail);
                }
            }
            Some(Value::List(_)) => {
                // the source has elements: run the plain pop-and-push,
                // replicating it in its non-blocking form
                self.rpoplpush(id, argv);
                self.client_mut(id).rewrite_command(vec![
                    Bytes::from_static(b"RPOPLPUSH"),
                    argv[1].clone(),
                    argv[2].clone(),
                ]);
            }
            Some(_) => {
                self.client_mut(id).reply_wrong_type();
            }
        }
    }

    /// Parks a client on `keys`: records them in the client's own set
    /// (idempotently) and appends the client to each key's FIFO.
    pub(crate) fn block_for_keys(
        &mut self,
        id: ClientId,
        keys: &[Bytes],
        deadline: u64,
        target: Option<Bytes>,
        pop_end: End,
    ) {
        let client = self.clients.get_mut(&id).expect("unknown client id");
        let state = client.block.get_or_insert_with(|| BlockState {
            keys: AHashSet::new(),
            target: None,
            deadline: 0,
            pop_end,
        });
        state.target = target;
        state.deadline = deadline;
        state.pop_end = pop_end;

        for key in keys {
            // a key already in the client's set is also already in the
            // db FIFO; skip it
            if !state.keys.insert(key.clone()) {
                continue;
            }
            self.db
                .blocking_keys
                .add_or_find(key.clone(), VecDeque::new)
                .push_back(id);
        }
    }

    /// Takes a client out of blocking state, detaching it from every
    /// per-key FIFO it sits in and dropping FIFOs that become empty.
    /// Timeout, disconnect, and served-delivery all come through here.
    pub fn unblock_client(&mut self, id: ClientId) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        let Some(state) = client.block.take() else {
            return;
        };
        for key in &state.keys {
            let now_empty = {
                let Some(fifo) = self.db.blocking_keys.get_mut(key.as_ref()) else {
                    continue;
                };
                fifo.retain(|&c| c != id);
                fifo.is_empty()
            };
            if now_empty {
                self.db.blocking_keys.delete(key.as_ref());
            }
        }
        // target reference dropped with the state
    }

    /// Times out every blocked client whose deadline has passed. The
    /// external timer calls this periodically.
    pub fn sweep_expired_blocks(&mut self) -> usize {
        let now = time::now_ms();
        let expired: Vec<(ClientId, bool)> = self
            .clients
            .values()
            .filter_map(|c| {
                let b = c.block.as_ref()?;
                (b.deadline != time::NO_DEADLINE && now >= b.deadline)
                    .then_some((c.id, b.target.is_some()))
            })
            .collect();
        let count = expired.len();
        for (id, has_target) in expired {
            // pop-and-push times out with a nil bulk, plain pops with a
            // nil array
            if has_target {
                self.client_mut(id).reply_nil();
            } else {
                self.client_mut(id).reply_nil_array();
            }
            self.unblock_client(id);
        }
        count
    }

    /// Drains the ready-keys list, serving blocked clients. Runs after
    /// every command (and would run after each MULTI block or script).
    pub fn handle_ready_keys(&mut self) {
        while !self.ready.is_empty() {
            // swap in a fresh sink: pushes performed while serving this
            // batch accumulate cleanly for the next outer iteration
            let mut batch = std::mem::take(&mut self.ready);
            while let Some(key) = batch.pop_front() {
                // allow pushes made during delivery to re-queue the key
                self.db.unmark_ready(&key);

                if !matches!(self.db.lookup_write(&key), Some(Value::List(_))) {
                    continue;
                }
                self.serve_clients_on_key(&key);
                if self.list_is_empty(&key) {
                    self.delete_emptied_key(&key);
                }
            }
        }
    }

    /// Serves the FIFO of clients blocked on one ready key, one popped
    /// value per waiter, until the list drains or the FIFO empties.
    fn serve_clients_on_key(&mut self, key: &Bytes) {
        let Some(fifo) = self.db.blocking_keys.get(key.as_ref()) else {
            return;
        };
        let mut remaining = fifo.len();

        while remaining > 0 {
            remaining -= 1;
            let receiver = {
                let Some(fifo) = self.db.blocking_keys.get(key.as_ref()) else {
                    break;
                };
                match fifo.front() {
                    Some(&id) => id,
                    None => break,
                }
            };
            // pop direction comes from the pending command: head for a
            // blocking LPOP, tail for RPOP and pop-and-push
            let (pop_end, target) = {
                let client = self.clients.get(&receiver).expect("blocked client exists");
                let block = client.block.as_ref().expect("client in FIFO is blocked");
                (block.pop_end, block.target.clone())
            };
            let value = {
                let Some(Value::List(list)) = self.db.lookup_write(key) else {
                    break;
                };
                match list.pop(pop_end) {
                    Some(v) => v,
                    None => break, // list drained before the FIFO did
                }
            };

            // unblocking detaches the receiver from every FIFO,
            // including this key's
            self.unblock_client(receiver);

            if !self.serve_client_blocked_on_list(receiver, key, target, &value, pop_end) {
                // delivery aborted: undo the pop at the same end
                if let Some(Value::List(list)) = self.db.lookup_write(key) {
                    list.push(pop_end, &value);
                } else {
                    let mut list = crate::types::ListValue::new(&self.config);
                    list.push(pop_end, &value);
                    self.db.add(key.clone(), Value::List(list));
                }
            }
        }
    }

    /// Delivers one popped value to one receiver. Returns false when
    /// the delivery must be undone (pop-and-push destination holds the
    /// wrong type), in which case the receiver has been sent the error.
    fn serve_client_blocked_on_list(
        &mut self,
        receiver: ClientId,
        key: &Bytes,
        target: Option<Bytes>,
        value: &Bytes,
        pop_end: End,
    ) -> bool {
        match target {
            None => {
                // synthesise the pop for replication, then hand the
                // waiter [key, value]
                self.propagate(vec![pop_command_name(pop_end), key.clone()]);
                let client = self.client_mut(receiver);
                client.reply_multi_bulk_len(2);
                client.reply_bulk(key.clone());
                client.reply_bulk(value.clone());
                true
            }
            Some(destination) => {
                if matches!(self.db.lookup_write(&destination), Some(v) if !v.is_list()) {
                    self.client_mut(receiver).reply_wrong_type();
                    return false;
                }
                self.propagate(vec![pop_command_name(pop_end), key.clone()]);
                self.push_to_destination(receiver, &destination, value);
                self.propagate(vec![
                    Bytes::from_static(b"LPUSH"),
                    destination,
                    value.clone(),
                ]);
                true
            }
        }
    }
}

fn pop_command_name(end: End) -> Bytes {
    match end {
        End::Head => Bytes::from_static(b"LPOP"),
        End::Tail => Bytes::from_static(b"RPOP"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{args, bulk, run};
    use super::*;
    use crate::commands::Reply;

    fn engine() -> Engine {
        Engine::new()
    }

    fn popped_pair(replies: &[Reply], key: &str, value: &str) -> bool {
        replies == [Reply::ArrayLen(2), bulk(key), bulk(value)]
    }

    #[test]
    fn blpop_on_non_empty_list_pops_immediately() {
        let mut e = engine();
        let c = e.new_client();
        run(&mut e, c, &["RPUSH", "k", "a", "b"]);
        let replies = run(&mut e, c, &["BLPOP", "k", "0"]);
        assert!(popped_pair(&replies, "k", "a"));
        assert!(!e.client(c).is_blocked());
        // replicated as a plain pop
        let last = e.propagated.last().unwrap();
        assert_eq!(last.argv, args(&["LPOP", "k"]));
    }

    #[test]
    fn blpop_checks_keys_in_order() {
        let mut e = engine();
        let c = e.new_client();
        run(&mut e, c, &["RPUSH", "second", "x"]);
        let replies = run(&mut e, c, &["BLPOP", "first", "second", "0"]);
        assert!(popped_pair(&replies, "second", "x"));
    }

    #[test]
    fn blpop_on_empty_keys_blocks() {
        let mut e = engine();
        let c = e.new_client();
        let replies = run(&mut e, c, &["BLPOP", "k", "0"]);
        assert!(replies.is_empty());
        assert!(e.client(c).is_blocked());
    }

    #[test]
    fn blocking_inside_multi_returns_nil_immediately() {
        let mut e = engine();
        let c = e.new_client();
        e.set_in_multi(c, true);
        assert_eq!(run(&mut e, c, &["BLPOP", "k", "0"]), vec![Reply::NilArray]);
        assert!(!e.client(c).is_blocked());
        assert_eq!(run(&mut e, c, &["BRPOPLPUSH", "src", "dst", "0"]), vec![Reply::Nil]);
        assert!(!e.client(c).is_blocked());
    }

    #[test]
    fn push_wakes_a_blocked_client() {
        let mut e = engine();
        let a = e.new_client();
        let producer = e.new_client();

        run(&mut e, a, &["BLPOP", "q", "0"]);
        assert!(e.client(a).is_blocked());

        run(&mut e, producer, &["RPUSH", "q", "task"]);
        let replies = e.take_replies(a);
        assert!(popped_pair(&replies, "q", "task"));
        assert!(!e.client(a).is_blocked());
        // the push was fully consumed, so the key is gone
        assert_eq!(run(&mut e, producer, &["EXISTS", "q"]), vec![Reply::Int(0)]);
    }

    #[test]
    fn fifo_scenario_two_waiters_one_push() {
        let mut e = engine();
        let a = e.new_client();
        let b = e.new_client();
        let producer = e.new_client();

        run(&mut e, a, &["BLPOP", "k", "0"]);
        run(&mut e, b, &["BLPOP", "k", "0"]);

        run(&mut e, producer, &["RPUSH", "k", "x", "y"]);

        // first blocked, first served, in push order
        assert!(popped_pair(&e.take_replies(a), "k", "x"));
        assert!(popped_pair(&e.take_replies(b), "k", "y"));
        assert_eq!(run(&mut e, producer, &["EXISTS", "k"]), vec![Reply::Int(0)]);
    }

    #[test]
    fn brpop_waiters_take_from_the_tail() {
        let mut e = engine();
        let a = e.new_client();
        let producer = e.new_client();

        run(&mut e, a, &["BRPOP", "k", "0"]);
        run(&mut e, producer, &["RPUSH", "k", "x", "y"]);

        assert!(popped_pair(&e.take_replies(a), "k", "y"));
        assert_eq!(
            run(&mut e, producer, &["LRANGE", "k", "0", "-1"]),
            vec![Reply::ArrayLen(1), bulk("x")]
        );
    }

    #[test]
    fn partial_service_leaves_remainder() {
        let mut e = engine();
        let a = e.new_client();
        let producer = e.new_client();

        run(&mut e, a, &["BLPOP", "k", "0"]);
        run(&mut e, producer, &["RPUSH", "k", "1", "2", "3"]);

        assert!(popped_pair(&e.take_replies(a), "k", "1"));
        assert_eq!(
            run(&mut e, producer, &["LRANGE", "k", "0", "-1"]),
            vec![Reply::ArrayLen(2), bulk("2"), bulk("3")]
        );
    }

    #[test]
    fn client_blocked_on_many_keys_is_fully_detached_after_service() {
        let mut e = engine();
        let a = e.new_client();
        let producer = e.new_client();

        run(&mut e, a, &["BLPOP", "k1", "k2", "k3", "0"]);
        run(&mut e, producer, &["RPUSH", "k2", "v"]);

        assert!(popped_pair(&e.take_replies(a), "k2", "v"));
        // no FIFO should remember the client
        assert!(e.db.blocking_keys.is_empty());

        // a later push to another of its keys delivers to nobody
        run(&mut e, producer, &["RPUSH", "k1", "w"]);
        assert!(e.take_replies(a).is_empty());
        assert_eq!(
            run(&mut e, producer, &["LLEN", "k1"]),
            vec![Reply::Int(1)]
        );
    }

    #[test]
    fn duplicate_keys_in_one_blpop_are_idempotent() {
        let mut e = engine();
        let a = e.new_client();
        let producer = e.new_client();

        run(&mut e, a, &["BLPOP", "k", "k", "k", "0"]);
        run(&mut e, producer, &["RPUSH", "k", "only"]);
        assert!(popped_pair(&e.take_replies(a), "k", "only"));
        assert!(e.db.blocking_keys.is_empty());
    }

    #[test]
    fn brpoplpush_immediate_path() {
        let mut e = engine();
        let c = e.new_client();
        run(&mut e, c, &["RPUSH", "src", "a", "b"]);
        assert_eq!(run(&mut e, c, &["BRPOPLPUSH", "src", "dst", "0"]), vec![bulk("b")]);
        assert_eq!(
            run(&mut e, c, &["LRANGE", "dst", "0", "-1"]),
            vec![Reply::ArrayLen(1), bulk("b")]
        );
        // replicated in the non-blocking form
        assert!(e
            .propagated
            .iter()
            .any(|p| p.argv == args(&["RPOPLPUSH", "src", "dst"])));
    }

    #[test]
    fn brpoplpush_blocked_then_served() {
        let mut e = engine();
        let a = e.new_client();
        let producer = e.new_client();

        run(&mut e, a, &["BRPOPLPUSH", "src", "dst", "0"]);
        assert!(e.client(a).is_blocked());

        run(&mut e, producer, &["RPUSH", "src", "v"]);
        assert_eq!(e.take_replies(a), vec![bulk("v")]);
        assert_eq!(
            run(&mut e, producer, &["LRANGE", "dst", "0", "-1"]),
            vec![Reply::ArrayLen(1), bulk("v")]
        );
        assert_eq!(run(&mut e, producer, &["EXISTS", "src"]), vec![Reply::Int(0)]);
        // synthesised RPOP + LPUSH for replication
        assert!(e.propagated.iter().any(|p| p.argv == args(&["RPOP", "src"])));
        assert!(e
            .propagated
            .iter()
            .any(|p| p.argv == args(&["LPUSH", "dst", "v"])));
    }

    #[test]
    fn immediate_brpoplpush_wrongtype_destination_rolls_back() {
        let mut e = engine();
        let c = e.new_client();
        run(&mut e, c, &["RPUSH", "src", "a"]);
        run(&mut e, c, &["SET", "dst", "str"]);
        let replies = run(&mut e, c, &["BRPOPLPUSH", "src", "dst", "0"]);
        assert!(matches!(&replies[0], Reply::Err(m) if m.starts_with("WRONGTYPE")));
        assert_eq!(
            run(&mut e, c, &["LRANGE", "src", "0", "-1"]),
            vec![Reply::ArrayLen(1), bulk("a")]
        );
    }

    #[test]
    fn served_brpoplpush_wrongtype_destination_rolls_back_the_pop() {
        let mut e = engine();
        let a = e.new_client();
        let producer = e.new_client();

        run(&mut e, a, &["BRPOPLPUSH", "src", "dst", "0"]);
        run(&mut e, producer, &["SET", "dst", "str"]);
        run(&mut e, producer, &["RPUSH", "src", "a"]);

        let replies = e.take_replies(a);
        assert!(matches!(&replies[0], Reply::Err(m) if m.starts_with("WRONGTYPE")));
        assert!(!e.client(a).is_blocked());
        // the popped element went back on the source at the same end
        assert_eq!(
            run(&mut e, producer, &["LRANGE", "src", "0", "-1"]),
            vec![Reply::ArrayLen(1), bulk("a")]
        );
    }

    #[test]
    fn chained_rendezvous_is_iterative_not_recursive() {
        let mut e = engine();
        let first = e.new_client();
        let second = e.new_client();
        let producer = e.new_client();

        // first waits to move src -> mid; second waits on mid
        run(&mut e, first, &["BRPOPLPUSH", "src", "mid", "0"]);
        run(&mut e, second, &["BLPOP", "mid", "0"]);

        run(&mut e, producer, &["RPUSH", "src", "token"]);

        assert_eq!(e.take_replies(first), vec![bulk("token")]);
        assert!(popped_pair(&e.take_replies(second), "mid", "token"));
        assert_eq!(run(&mut e, producer, &["EXISTS", "src"]), vec![Reply::Int(0)]);
        assert_eq!(run(&mut e, producer, &["EXISTS", "mid"]), vec![Reply::Int(0)]);
    }

    #[test]
    fn timeout_sweep_replies_nil_and_cleans_up() {
        let mut e = engine();
        let a = e.new_client();
        let b = e.new_client();

        run(&mut e, a, &["BLPOP", "k", "1"]);
        run(&mut e, b, &["BRPOPLPUSH", "src", "dst", "1"]);
        assert_eq!(e.sweep_expired_blocks(), 0);

        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert_eq!(e.sweep_expired_blocks(), 2);

        assert_eq!(e.take_replies(a), vec![Reply::NilArray]);
        assert_eq!(e.take_replies(b), vec![Reply::Nil]);
        assert!(!e.client(a).is_blocked());
        assert!(e.db.blocking_keys.is_empty());
    }

    #[test]
    fn zero_timeout_never_expires() {
        let mut e = engine();
        let a = e.new_client();
        run(&mut e, a, &["BLPOP", "k", "0"]);
        assert_eq!(e.sweep_expired_blocks(), 0);
        assert!(e.client(a).is_blocked());
    }

    #[test]
    fn negative_timeout_is_an_error() {
        let mut e = engine();
        let a = e.new_client();
        let replies = run(&mut e, a, &["BLPOP", "k", "-1"]);
        assert!(matches!(&replies[0], Reply::Err(m) if m.contains("negative")));
    }

    #[test]
    fn disconnect_while_blocked_cleans_both_sides() {
        let mut e = engine();
        let a = e.new_client();
        let producer = e.new_client();

        run(&mut e, a, &["BLPOP", "k", "0"]);
        e.remove_client(a);
        assert!(e.db.blocking_keys.is_empty());

        // a push now keeps its value
        run(&mut e, producer, &["RPUSH", "k", "v"]);
        assert_eq!(run(&mut e, producer, &["LLEN", "k"]), vec![Reply::Int(1)]);
    }

    #[test]
    fn wrongtype_key_fails_the_blocking_pop() {
        let mut e = engine();
        let c = e.new_client();
        run(&mut e, c, &["SET", "s", "v"]);
        let replies = run(&mut e, c, &["BLPOP", "s", "0"]);
        assert!(matches!(&replies[0], Reply::Err(m) if m.starts_with("WRONGTYPE")));
        assert!(!e.client(c).is_blocked());
    }

    #[test]
    fn served_client_can_block_again() {
        let mut e = engine();
        let a = e.new_client();
        let producer = e.new_client();

        run(&mut e, a, &["BLPOP", "k", "0"]);
        run(&mut e, producer, &["RPUSH", "k", "v1"]);
        assert!(popped_pair(&e.take_replies(a), "k", "v1"));

        run(&mut e, a, &["BLPOP", "k", "0"]);
        assert!(e.client(a).is_blocked());
        run(&mut e, producer, &["RPUSH", "k", "v2"]);
        assert!(popped_pair(&e.take_replies(a), "k", "v2"));
    }
}
