//! pyre-core: the storage core of an in-memory key/value database.
//!
//! Owns the incrementally-rehashed keyspace dict, the list and hash
//! value types with their dual encodings, the blocking pop/push
//! rendezvous, and deferred reclamation of expensive values. Wire
//! protocol, I/O, persistence, and clustering are collaborators that
//! drive [`Engine`] and drain its reply/notification/propagation sinks.
//!
//! The engine is single-threaded by design: at most one command runs
//! against the keyspace at a time, and the only state crossing a thread
//! boundary is the background reclaim queue and its pending counter.

pub mod commands;
pub mod config;
pub mod db;
pub mod dict;
pub mod error;
pub mod lazyfree;
pub mod numeric;
pub mod packed;
pub mod quicklist;
pub mod time;
pub mod types;

pub use commands::{Channels, Client, Engine, Event, EventClass, Propagated, Reply};
pub use config::CoreConfig;
pub use db::{ClientId, Db};
pub use dict::{Dict, NoCaseKey, Replaced};
pub use error::{DictError, IncrError, IncrFloatError, WrongType};
pub use lazyfree::LazyReclaim;
pub use packed::{PackedSeq, PackedValue};
pub use quicklist::{Dir, End, QuickList};
pub use types::{Encoding, HashValue, ListValue, Value};
