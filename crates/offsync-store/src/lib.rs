//! # offsync store
//!
//! Local persistence for the offsync synchronization core: the object cache
//! and per-bucket sync metadata.
//!
//! ## Overview
//!
//! Storage sits behind two async traits so the sync manager never depends
//! on a concrete backend. The primary implementation is [`SqliteStore`],
//! with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`ObjectCache`] - Per-bucket object table with ACL-aware queries
//! - [`MetadataStore`] - Sync scope and watermark bookkeeping
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use offsync_store::{MetadataStore, SqliteStore};
//! use offsync_core::{Condition, ObjectQuery};
//!
//! async fn example() {
//!     let store = SqliteStore::open("cache.db").unwrap();
//!
//!     let scope = ObjectQuery::new(Condition::eq("archived", false));
//!     store.set_sync_scope("notes", Some(&scope)).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: Inserting an already cached object returns `AlreadyExists`
//! - **Scope resets**: Changing a sync scope clears both watermarks
//! - **Blobs**: Payloads and ACLs are stored as CBOR, scopes as their stable string

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{BucketSyncMetadata, InsertResult, MetadataStore, ObjectCache};
