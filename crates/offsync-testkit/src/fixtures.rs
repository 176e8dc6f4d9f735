//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use offsync::{Client, ClientConfig};
use offsync_core::{CachedObject, Document, SyncState, Timestamp};
use offsync_store::MemoryStore;
use offsync_sync::memory::MemoryRemote;
use offsync_sync::{ConcurrencyGate, SyncConfig, SyncManager};

/// A memory cache, a memory remote and the gate they share.
pub struct TestFixture {
    pub store: Arc<MemoryStore>,
    pub remote: Arc<MemoryRemote>,
    pub gate: Arc<ConcurrencyGate>,
}

impl TestFixture {
    /// Create a fixture with an empty cache and an empty remote.
    pub fn new() -> Self {
        Self::with_remote(MemoryRemote::new())
    }

    /// Create a fixture with a fresh cache over an existing remote. Use it
    /// to model several devices sharing one backend.
    pub fn with_remote(remote: Arc<MemoryRemote>) -> Self {
        init_tracing();
        Self {
            store: Arc::new(MemoryStore::new()),
            remote,
            gate: Arc::new(ConcurrencyGate::new()),
        }
    }

    /// A sync manager over this fixture's collaborators.
    pub fn manager(&self, config: SyncConfig) -> SyncManager<MemoryStore, MemoryStore, MemoryRemote> {
        SyncManager::new(
            Arc::clone(&self.store),
            Arc::clone(&self.store),
            Arc::clone(&self.remote),
            Arc::clone(&self.gate),
            config,
        )
        .expect("valid sync config")
    }

    /// A client over this fixture's collaborators.
    pub fn client(&self, config: ClientConfig) -> Client<MemoryStore, MemoryRemote> {
        Client::with_gate(
            Arc::clone(&self.store),
            Arc::clone(&self.remote),
            Arc::clone(&self.gate),
            config,
        )
        .expect("valid client config")
    }

    /// Put `n` objects on the remote, ids `000`.., all modified at
    /// `updated_at`.
    pub async fn seed_remote(&self, bucket: &str, n: usize, updated_at: Timestamp) -> Vec<CachedObject> {
        let mut seeded = Vec::with_capacity(n);
        for i in 0..n {
            let object = server_object(bucket, &format!("{:03}", i), &format!("etag-{}", i), updated_at)
                .with_field("n", i as i64);
            self.remote.put(object.clone()).await;
            seeded.push(object);
        }
        seeded
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a test-writer tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A JSON object literal as a [`Document`]. Non-objects become empty.
pub fn doc(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// An object as the remote reports it.
pub fn server_object(bucket: &str, id: &str, etag: &str, updated_at: Timestamp) -> CachedObject {
    CachedObject::new(bucket, id, etag, updated_at)
}

/// A remote-known object with an unpushed local edit.
pub fn local_object(bucket: &str, id: &str, etag: &str, updated_at: Timestamp) -> CachedObject {
    CachedObject::new(bucket, id, etag, updated_at).with_sync_state(SyncState::Dirty)
}
