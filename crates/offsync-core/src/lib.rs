//! # offsync core
//!
//! Pure data types for the offsync synchronization core: cached objects,
//! query expressions, batch outcomes and conflict resolvers.
//!
//! This crate contains no I/O, no storage, no networking. The store and sync
//! crates build on these types; remote clients translate to and from them.
//!
//! ## Key Types
//!
//! - [`CachedObject`] - One locally stored copy of a remote-managed object
//! - [`SyncState`] - Whether the cached copy matches the last-known remote copy
//! - [`Timestamp`] - Millisecond-precision UTC instant with ISO-8601 form
//! - [`Condition`] / [`ObjectQuery`] - Query expressions with a stable string form
//! - [`BatchOp`] / [`BatchOutcome`] - Push requests and per-item results
//! - [`ConflictResolver`] - Chooses between a server copy and a client copy
//!
//! ## Field Names
//!
//! Object metadata is addressable in conditions through the reserved names
//! in [`fields`]; any other name is a dotted path into the payload.

pub mod acl;
pub mod batch;
pub mod error;
pub mod object;
pub mod query;
pub mod resolver;
pub mod time;

pub use acl::{Acl, Actor, Permission, Principal};
pub use batch::{BatchOp, BatchOutcome, ReasonCode, ResultCode};
pub use error::{CoreError, Result};
pub use object::{fields, generate_local_id, is_local_id, CachedObject, Document, SyncState};
pub use query::{Condition, ObjectQuery, OrderBy, SortDirection};
pub use resolver::{ConflictResolver, FnResolver, PreferClient, PreferServer, Resolution};
pub use time::Timestamp;
