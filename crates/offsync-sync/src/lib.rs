//! # offsync sync
//!
//! Keeps a local object cache consistent with a remote object store.
//!
//! ## Overview
//!
//! A [`SyncManager`] synchronizes one bucket at a time:
//!
//! 1. Take the [`ConcurrencyGate`], waiting for in-flight local CRUD to drain.
//! 2. Pull everything in the bucket's sync scope modified since the last
//!    watermark, page by page with a `(updated_at, id)` keyset cursor.
//! 3. Push every locally dirty object in one batch and reconcile each
//!    outcome.
//! 4. Record the sync time and release the gate.
//!
//! Divergence between a locally edited object and a newer server copy is
//! settled by a [`ConflictResolver`](offsync_core::ConflictResolver).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use offsync_store::{MetadataStore, SqliteStore};
//! use offsync_sync::{memory::MemoryRemote, ConcurrencyGate, SyncConfig, SyncManager};
//! use offsync_core::ObjectQuery;
//!
//! async fn example() {
//!     let store = Arc::new(SqliteStore::open("cache.db").unwrap());
//!     let remote = MemoryRemote::new();
//!     let gate = Arc::new(ConcurrencyGate::new());
//!
//!     let manager = SyncManager::new(store.clone(), store.clone(), remote, gate, SyncConfig::default()).unwrap();
//!
//!     store.set_sync_scope("notes", Some(&ObjectQuery::all())).await.unwrap();
//!     let report = manager.sync_bucket("notes", None).await.unwrap();
//!     println!("pulled {} changes, pushed {}", report.pulled, report.pushed());
//! }
//! ```

pub mod config;
pub mod conflict;
pub mod error;
pub mod gate;
pub mod manager;
pub mod pull;
pub mod push;
pub mod remote;
pub mod report;

pub use config::SyncConfig;
pub use conflict::handle_conflict;
pub use error::{RemoteError, Result, SyncError};
pub use gate::{ConcurrencyGate, CrudGuard, SyncGuard};
pub use manager::SyncManager;
pub use pull::{apply_page, first_page_query, next_page_query};
pub use remote::{memory, BatchExecutor, QueryExecutor, QueryPage};
pub use report::SyncReport;
