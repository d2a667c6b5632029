//! The engine: command handlers over the keyspace.
//!
//! The dispatch collaborator hands each command to [`Engine::execute`]
//! as `(client, argv)`; replies accumulate in the client's reply buffer
//! and keyspace notifications and replication records accumulate in
//! engine-level sinks the caller drains. Everything that the original
//! kept in process globals (dirty counter, ready list, event flags)
//! lives on the engine and is threaded through handlers explicitly.

mod blocking;
mod hash;
mod list;

use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};
use bytes::Bytes;

use crate::config::CoreConfig;
use crate::db::{ClientId, Db};
use crate::lazyfree::{self, LazyReclaim};
use crate::numeric::parse_i64;
use crate::quicklist::End;
use crate::time;
use crate::types::{Encoding, Value};

/// A reply unit pushed to a client's buffer. The wire encoder turns
/// these into protocol frames; the core never sees sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Nil,
    /// Null array, e.g. a timed-out blocking pop.
    NilArray,
    Int(i64),
    Bulk(Bytes),
    /// Header for the next `n` replies.
    ArrayLen(usize),
    Err(String),
}

/// Keyspace notification classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Generic,
    List,
    Hash,
}

/// One keyspace notification, in mutation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub class: EventClass,
    pub event: &'static str,
    pub key: Bytes,
}

/// Channels a command is propagated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channels {
    pub aof: bool,
    pub repl: bool,
}

impl Channels {
    pub const ALL: Channels = Channels {
        aof: true,
        repl: true,
    };
}

/// One command recorded for the persistence/replication collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Propagated {
    pub argv: Vec<Bytes>,
    pub channels: Channels,
}

/// Blocking state for a suspended client.
#[derive(Debug)]
pub(crate) struct BlockState {
    /// Keys this client waits on. Unordered; FIFO semantics come from
    /// the per-key queues in the db.
    pub(crate) keys: AHashSet<Bytes>,
    /// Destination for the atomic pop-and-push variant.
    pub(crate) target: Option<Bytes>,
    /// Absolute ms deadline, 0 for no timeout.
    pub(crate) deadline: u64,
    /// Which end the pending command pops from.
    pub(crate) pop_end: End,
}

/// A client as the core sees it: a reply buffer plus blocking state.
/// I/O and protocol decoding live with the dispatch collaborator.
#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    /// Inside a MULTI/EXEC block; blocking is prohibited there.
    pub in_multi: bool,
    pub replies: Vec<Reply>,
    /// Replacement argv for propagation, set when a command must
    /// replicate in a different form than it arrived (blocking pops,
    /// float increments).
    pub(crate) rewritten: Option<Vec<Bytes>>,
    pub(crate) block: Option<BlockState>,
}

impl Client {
    fn new(id: ClientId) -> Self {
        Self {
            id,
            in_multi: false,
            replies: Vec::new(),
            rewritten: None,
            block: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.block.is_some()
    }

    pub fn reply_ok(&mut self) {
        self.replies.push(Reply::Ok);
    }

    pub fn reply_nil(&mut self) {
        self.replies.push(Reply::Nil);
    }

    pub fn reply_nil_array(&mut self) {
        self.replies.push(Reply::NilArray);
    }

    pub fn reply_int(&mut self, v: i64) {
        self.replies.push(Reply::Int(v));
    }

    pub fn reply_bulk(&mut self, v: Bytes) {
        self.replies.push(Reply::Bulk(v));
    }

    pub fn reply_multi_bulk_len(&mut self, n: usize) {
        self.replies.push(Reply::ArrayLen(n));
    }

    pub fn reply_err(&mut self, msg: impl Into<String>) {
        self.replies.push(Reply::Err(msg.into()));
    }

    pub fn reply_wrong_type(&mut self) {
        self.reply_err(crate::error::WrongType.to_string());
    }

    fn rewrite_command(&mut self, argv: Vec<Bytes>) {
        self.rewritten = Some(argv);
    }
}

/// The single-threaded command engine.
#[derive(Debug)]
pub struct Engine {
    pub(crate) db: Db,
    pub(crate) clients: AHashMap<ClientId, Client>,
    /// Server-level ordered list of keys awaiting rendezvous delivery.
    /// `Db::ready_keys` is the dedup index over the same keys.
    pub(crate) ready: VecDeque<Bytes>,
    pub config: CoreConfig,
    /// Count of keyspace-changing operations, for the propagation
    /// decision and replication bookkeeping.
    pub dirty: u64,
    /// Keyspace notifications, in mutation order.
    pub events: Vec<Event>,
    /// Commands recorded for AOF/replication, in mutation order.
    pub propagated: Vec<Propagated>,
    pub(crate) lazy: LazyReclaim,
    next_client: u64,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        let mut db = Db::new();
        db.dict.set_force_resize_ratio(config.force_resize_ratio);
        db.expires.set_force_resize_ratio(config.force_resize_ratio);
        Self {
            db,
            clients: AHashMap::new(),
            ready: VecDeque::new(),
            config,
            dirty: 0,
            events: Vec::new(),
            propagated: Vec::new(),
            lazy: LazyReclaim::spawn(),
            next_client: 0,
        }
    }

    /// Enables or disables proactive keyspace resizing. Disabled while
    /// a copy-on-write fork is saving, so buckets do not move under the
    /// child; growth past the force ratio still proceeds.
    pub fn set_resize_enabled(&mut self, enabled: bool) {
        self.db.dict.set_resize_enabled(enabled);
        self.db.expires.set_resize_enabled(enabled);
    }

    /// Registers a new client and returns its id.
    pub fn new_client(&mut self) -> ClientId {
        self.next_client += 1;
        let id = ClientId(self.next_client);
        self.clients.insert(id, Client::new(id));
        id
    }

    /// Removes a client, taking the disconnect path out of any blocking
    /// state first.
    pub fn remove_client(&mut self, id: ClientId) {
        self.unblock_client(id);
        self.clients.remove(&id);
    }

    pub fn client(&self, id: ClientId) -> &Client {
        self.clients.get(&id).expect("unknown client id")
    }

    pub(crate) fn client_mut(&mut self, id: ClientId) -> &mut Client {
        self.clients.get_mut(&id).expect("unknown client id")
    }

    /// Drains a client's accumulated replies.
    pub fn take_replies(&mut self, id: ClientId) -> Vec<Reply> {
        std::mem::take(&mut self.client_mut(id).replies)
    }

    /// Marks a client as being inside (or outside) a MULTI block.
    pub fn set_in_multi(&mut self, id: ClientId, in_multi: bool) {
        self.client_mut(id).in_multi = in_multi;
    }

    /// Executes one command for a client, then runs the post-command
    /// rendezvous drain. `argv[0]` is the command name.
    pub fn execute(&mut self, id: ClientId, argv: &[Bytes]) {
        if argv.is_empty() {
            self.client_mut(id).reply_err("ERR empty command");
            return;
        }
        let dirty_before = self.dirty;
        let name = argv[0].to_ascii_uppercase();
        if argv.len() < min_arity(&name) {
            let name = String::from_utf8_lossy(&argv[0]).into_owned().to_lowercase();
            self.client_mut(id)
                .reply_err(format!("ERR wrong number of arguments for '{name}' command"));
            return;
        }
        match name.as_slice() {
            b"GET" => self.get(id, argv),
            b"SET" => self.set(id, argv),
            b"DEL" | b"UNLINK" => self.del(id, argv),
            b"EXISTS" => self.exists(id, argv),
            b"TYPE" => self.type_cmd(id, argv),
            b"OBJECT" => self.object(id, argv),
            b"FLUSHDB" => self.flushdb(id),
            b"LPUSH" => self.push_generic(id, argv, End::Head, false),
            b"RPUSH" => self.push_generic(id, argv, End::Tail, false),
            b"LPUSHX" => self.push_generic(id, argv, End::Head, true),
            b"RPUSHX" => self.push_generic(id, argv, End::Tail, true),
            b"LPOP" => self.pop_generic(id, argv, End::Head),
            b"RPOP" => self.pop_generic(id, argv, End::Tail),
            b"LLEN" => self.llen(id, argv),
            b"LINDEX" => self.lindex(id, argv),
            b"LSET" => self.lset(id, argv),
            b"LINSERT" => self.linsert(id, argv),
            b"LRANGE" => self.lrange(id, argv),
            b"LTRIM" => self.ltrim(id, argv),
            b"LREM" => self.lrem(id, argv),
            b"RPOPLPUSH" => self.rpoplpush(id, argv),
            b"BLPOP" => self.blocking_pop_generic(id, argv, End::Head),
            b"BRPOP" => self.blocking_pop_generic(id, argv, End::Tail),
            b"BRPOPLPUSH" => self.brpoplpush(id, argv),
            b"HSET" | b"HMSET" => self.hset(id, argv),
            b"HSETNX" => self.hsetnx(id, argv),
            b"HGET" => self.hget(id, argv),
            b"HMGET" => self.hmget(id, argv),
            b"HDEL" => self.hdel(id, argv),
            b"HLEN" => self.hlen(id, argv),
            b"HSTRLEN" => self.hstrlen(id, argv),
            b"HEXISTS" => self.hexists(id, argv),
            b"HGETALL" => self.hgetall_generic(id, argv, true, true),
            b"HKEYS" => self.hgetall_generic(id, argv, true, false),
            b"HVALS" => self.hgetall_generic(id, argv, false, true),
            b"HINCRBY" => self.hincrby(id, argv),
            b"HINCRBYFLOAT" => self.hincrbyfloat(id, argv),
            b"HSCAN" => self.hscan(id, argv),
            _ => {
                let name = String::from_utf8_lossy(&argv[0]).into_owned();
                self.client_mut(id)
                    .reply_err(format!("ERR unknown command '{name}'"));
            }
        }

        // propagate once per keyspace-changing command, using the
        // rewritten vector when the handler installed one
        if self.dirty > dirty_before {
            let rewritten = self.client_mut(id).rewritten.take();
            let argv = rewritten.unwrap_or_else(|| argv.to_vec());
            self.propagate(argv);
        } else {
            self.client_mut(id).rewritten = None;
        }

        // command boundary: deliver to clients blocked on keys this
        // command produced into
        self.handle_ready_keys();
    }

    /// Emits a keyspace notification.
    pub(crate) fn notify(&mut self, class: EventClass, event: &'static str, key: &Bytes) {
        self.events.push(Event {
            class,
            event,
            key: key.clone(),
        });
    }

    /// Records a command for the AOF/replication collaborator.
    pub(crate) fn propagate(&mut self, argv: Vec<Bytes>) {
        self.propagated.push(Propagated {
            argv,
            channels: Channels::ALL,
        });
    }

    /// The producer-side readiness contract: queue `key` for the
    /// post-command drain if clients are blocked on it.
    pub(crate) fn signal_list_ready(&mut self, key: &Bytes) {
        if self.db.mark_ready(key) {
            self.ready.push_back(key.clone());
        }
    }

    /// Removes a key whose value just became empty, emitting the "del"
    /// notification after the removal.
    pub(crate) fn delete_emptied_key(&mut self, key: &Bytes) {
        lazyfree::async_delete(&mut self.db, &self.lazy, self.config.lazyfree_threshold, key);
        self.notify(EventClass::Generic, "del", key);
    }

    /// Parses an integer argument, replying with the shared error on
    /// failure.
    pub(crate) fn int_arg(&mut self, id: ClientId, arg: &Bytes) -> Option<i64> {
        match parse_i64(arg) {
            Some(v) => Some(v),
            None => {
                self.client_mut(id)
                    .reply_err("ERR value is not an integer or out of range");
                None
            }
        }
    }

    /// Parses a blocking-command timeout in seconds into an absolute
    /// deadline (0 for "wait forever").
    pub(crate) fn timeout_arg(&mut self, id: ClientId, arg: &Bytes) -> Option<u64> {
        let Some(secs) = parse_i64(arg) else {
            self.client_mut(id)
                .reply_err("ERR timeout is not an integer or out of range");
            return None;
        };
        if secs < 0 {
            self.client_mut(id).reply_err("ERR timeout is negative");
            return None;
        }
        if secs == 0 {
            Some(time::NO_DEADLINE)
        } else {
            Some(time::now_ms() + secs as u64 * 1000)
        }
    }

    // --- generic key commands -------------------------------------------

    fn get(&mut self, id: ClientId, argv: &[Bytes]) {
        match self.db.lookup_read(&argv[1]) {
            None => self.client_mut(id).reply_nil(),
            Some(Value::Str(s)) => {
                let s = s.clone();
                self.client_mut(id).reply_bulk(s);
            }
            Some(_) => self.client_mut(id).reply_wrong_type(),
        }
    }

    fn set(&mut self, id: ClientId, argv: &[Bytes]) {
        if argv.len() != 3 {
            self.client_mut(id)
                .reply_err("ERR wrong number of arguments for 'set' command");
            return;
        }
        self.db.set(argv[1].clone(), Value::Str(argv[2].clone()));
        self.notify(EventClass::Generic, "set", &argv[1]);
        self.dirty += 1;
        self.client_mut(id).reply_ok();
    }

    fn del(&mut self, id: ClientId, argv: &[Bytes]) {
        let mut deleted = 0;
        for key in &argv[1..] {
            if lazyfree::async_delete(&mut self.db, &self.lazy, self.config.lazyfree_threshold, key)
            {
                self.notify(EventClass::Generic, "del", key);
                self.dirty += 1;
                deleted += 1;
            }
        }
        self.client_mut(id).reply_int(deleted);
    }

    fn exists(&mut self, id: ClientId, argv: &[Bytes]) {
        let mut found = 0;
        for key in &argv[1..] {
            if self.db.exists(key) {
                found += 1;
            }
        }
        self.client_mut(id).reply_int(found);
    }

    fn type_cmd(&mut self, id: ClientId, argv: &[Bytes]) {
        let name = match self.db.lookup_read(&argv[1]) {
            None => "none",
            Some(v) => v.type_name(),
        };
        self.client_mut(id).reply_bulk(Bytes::from_static(name.as_bytes()));
    }

    fn object(&mut self, id: ClientId, argv: &[Bytes]) {
        if argv.len() != 3 || !argv[1].eq_ignore_ascii_case(b"encoding") {
            self.client_mut(id).reply_err("ERR syntax error");
            return;
        }
        let encoding = match self.db.lookup_read(&argv[2]) {
            None => {
                self.client_mut(id).reply_err("ERR no such key");
                return;
            }
            Some(v) => match v.encoding() {
                Encoding::Raw => "raw",
                Encoding::QuickList => "quicklist",
                Encoding::Packed => "packed",
                Encoding::Table => "hashtable",
            },
        };
        self.client_mut(id)
            .reply_bulk(Bytes::from_static(encoding.as_bytes()));
    }

    fn flushdb(&mut self, id: ClientId) {
        lazyfree::flush_async(&mut self.db, &self.lazy);
        self.dirty += 1;
        self.client_mut(id).reply_ok();
    }
}

/// Minimum argv length per command, the way a dispatch table carries
/// arity. Unknown commands fall through to the unknown-command reply.
fn min_arity(name: &[u8]) -> usize {
    match name {
        b"FLUSHDB" => 1,
        b"GET" | b"TYPE" | b"LLEN" | b"HLEN" | b"EXISTS" | b"DEL" | b"UNLINK" | b"HGETALL"
        | b"HKEYS" | b"HVALS" | b"LPOP" | b"RPOP" => 2,
        b"SET" | b"LPUSH" | b"RPUSH" | b"LPUSHX" | b"RPUSHX" | b"LINDEX" | b"HGET" | b"HEXISTS"
        | b"HSTRLEN" | b"HDEL" | b"HMGET" | b"OBJECT" | b"HSCAN" | b"BLPOP" | b"BRPOP"
        | b"RPOPLPUSH" => 3,
        b"LSET" | b"LRANGE" | b"LTRIM" | b"LREM" | b"HSET" | b"HMSET" | b"HSETNX" | b"HINCRBY"
        | b"HINCRBYFLOAT" | b"BRPOPLPUSH" => 4,
        b"LINSERT" => 5,
        _ => 1,
    }
}
