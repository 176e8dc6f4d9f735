//! # offsync
//!
//! An offline-first client for a remote object store: a local cache that
//! keeps working without connectivity and converges with the remote when
//! a bucket is synchronized.
//!
//! ## Overview
//!
//! - **Local operations**: create, read, update and delete objects in the
//!   cache. Nothing waits on the network; changes are marked dirty.
//! - **Sync scopes**: each bucket synchronizes only the objects matching its
//!   scope query. A bucket without a scope does not synchronize.
//! - **Synchronization**: pull remote changes since the last watermark, then
//!   push dirty objects with their etags as preconditions.
//! - **Conflicts**: when a dirty object also changed remotely, a resolver
//!   picks the server copy or the client copy.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use offsync::{Client, ClientConfig};
//! use offsync::core::{Actor, Condition, Document, ObjectQuery};
//! use offsync::store::SqliteStore;
//! use offsync::sync::memory::MemoryRemote;
//!
//! async fn example() {
//!     let store = SqliteStore::open("cache.db").unwrap();
//!     let config = ClientConfig::default().with_actor(Actor::user("alice"));
//!     let client = Client::new(store, MemoryRemote::default(), config).unwrap();
//!
//!     // Work offline
//!     let _note = client.create("notes", Document::new(), None).await.unwrap();
//!
//!     // Synchronize when connectivity returns
//!     client
//!         .set_sync_scope("notes", &ObjectQuery::new(Condition::eq("archived", false)))
//!         .await
//!         .unwrap();
//!     let report = client.sync_bucket("notes", None).await.unwrap();
//!     assert!(report.is_clean());
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `offsync::core` - Objects, queries, ACLs, batch outcomes, resolvers
//! - `offsync::store` - Cache and metadata storage, SQLite
//! - `offsync::sync` - Gate, pull/push and the sync manager

pub mod client;
pub mod error;

// Re-export component crates
pub use offsync_core as core;
pub use offsync_store as store;
pub use offsync_sync as sync;

// Re-export main types for convenience
pub use client::{Client, ClientConfig};
pub use error::{ClientError, Result};

// Re-export commonly used types
pub use offsync_core::{
    Acl, Actor, CachedObject, Condition, ConflictResolver, Document, ObjectQuery, Permission, PreferClient,
    PreferServer, SyncState, Timestamp,
};
pub use offsync_sync::{ConcurrencyGate, SyncConfig, SyncReport};
