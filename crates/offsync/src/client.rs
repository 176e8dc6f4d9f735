//! The Client: offline-first access to remote-managed objects.
//!
//! Reads and writes go to the local cache and never wait on the network.
//! Local changes are marked dirty and reach the remote on the next
//! synchronization of their bucket.

use std::collections::BTreeMap;
use std::sync::Arc;

use offsync_core::{
    Acl, Actor, CachedObject, ConflictResolver, Document, ObjectQuery, Permission, SyncState, Timestamp,
};
use offsync_store::{MetadataStore, ObjectCache};
use offsync_sync::{BatchExecutor, ConcurrencyGate, CrudGuard, QueryExecutor, SyncConfig, SyncManager, SyncReport};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Configuration for the Client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Sync configuration.
    pub sync: SyncConfig,
    /// The principal local operations act as. `None` skips access checks,
    /// as with master-key access.
    pub actor: Option<Actor>,
}

impl ClientConfig {
    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }
}

/// The main Client struct.
///
/// Provides a unified API for:
/// - Creating, updating and deleting cached objects
/// - Querying the cache with access checks
/// - Managing per-bucket sync scopes
/// - Synchronizing buckets with the remote
///
/// Local operations and synchronization share one [`ConcurrencyGate`]:
/// while a bucket synchronizes, local operations fail with
/// [`ClientError::Locked`] instead of waiting.
pub struct Client<S, R> {
    store: Arc<S>,
    gate: Arc<ConcurrencyGate>,
    sync: SyncManager<S, S, R>,
    actor: Option<Actor>,
}

impl<S, R> Client<S, R>
where
    S: ObjectCache + MetadataStore + 'static,
    R: QueryExecutor + BatchExecutor,
{
    /// Create a client with its own gate.
    pub fn new(store: S, remote: R, config: ClientConfig) -> Result<Self> {
        Self::with_gate(
            Arc::new(store),
            Arc::new(remote),
            Arc::new(ConcurrencyGate::new()),
            config,
        )
    }

    /// Create a client over shared collaborators. Clients sharing a gate
    /// exclude each other's synchronizations and local operations.
    pub fn with_gate(
        store: Arc<S>,
        remote: Arc<R>,
        gate: Arc<ConcurrencyGate>,
        config: ClientConfig,
    ) -> Result<Self> {
        let sync = SyncManager::new(
            Arc::clone(&store),
            Arc::clone(&store),
            remote,
            Arc::clone(&gate),
            config.sync,
        )?;

        Ok(Self {
            store,
            gate,
            sync,
            actor: config.actor,
        })
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    /// Act as a different principal from now on.
    pub fn set_actor(&mut self, actor: Option<Actor>) {
        self.actor = actor;
    }

    /// The underlying sync manager.
    pub fn sync_manager(&self) -> &SyncManager<S, S, R> {
        &self.sync
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Object Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an object locally.
    ///
    /// The object gets a temporary local id until its first successful
    /// push. Without an explicit ACL it is owned by the acting user, or
    /// public for anonymous and unchecked clients.
    pub async fn create(&self, bucket: &str, data: Document, acl: Option<Acl>) -> Result<CachedObject> {
        check_bucket(bucket)?;
        let _crud = self.enter()?;

        let acl = acl.unwrap_or_else(|| match self.actor.as_ref().and_then(|a| a.user_id.clone()) {
            Some(user) => Acl::owned_by(user),
            None => Acl::public(),
        });

        let object = CachedObject::new_local(bucket, data, acl, Timestamp::now());
        self.store.insert_object(&object).await?;

        tracing::debug!(bucket, id = %object.id, "created local object");
        Ok(object)
    }

    /// Get a live object by id. Objects the actor may not read are absent.
    pub async fn get(&self, bucket: &str, id: &str) -> Result<Option<CachedObject>> {
        check_bucket(bucket)?;
        let _crud = self.enter()?;

        let object = self
            .store
            .find_object(bucket, id)
            .await?
            .filter(|o| !o.deleted)
            .filter(|o| self.permits(o, Permission::Read));
        Ok(object)
    }

    /// Query the cache as the acting principal.
    pub async fn query(&self, bucket: &str, query: &ObjectQuery) -> Result<Vec<CachedObject>> {
        check_bucket(bucket)?;
        let _crud = self.enter()?;

        Ok(self.store.query_objects(bucket, query, self.actor.as_ref()).await?)
    }

    /// Replace an object's payload locally and mark it dirty.
    pub async fn update(&self, bucket: &str, id: &str, data: Document) -> Result<CachedObject> {
        check_bucket(bucket)?;
        let _crud = self.enter()?;

        let current = self.live_object(bucket, id).await?;
        self.authorize(&current, Permission::Update)?;

        let updated = CachedObject {
            payload: data,
            updated_at: Timestamp::now(),
            ..current
        };
        self.store.update_object(&updated, SyncState::Dirty).await?;

        tracing::debug!(bucket, id, "updated local object");
        Ok(CachedObject {
            sync_state: SyncState::Dirty,
            ..updated
        })
    }

    /// Replace an object's ACL locally and mark it dirty. Requires
    /// `Admin`.
    pub async fn set_acl(&self, bucket: &str, id: &str, acl: Acl) -> Result<CachedObject> {
        check_bucket(bucket)?;
        let _crud = self.enter()?;

        let current = self.live_object(bucket, id).await?;
        self.authorize(&current, Permission::Admin)?;

        let updated = CachedObject {
            acl,
            updated_at: Timestamp::now(),
            sync_state: SyncState::Dirty,
            ..current
        };
        self.store.update_object(&updated, SyncState::Dirty).await?;
        Ok(updated)
    }

    /// Delete an object.
    ///
    /// An object the remote has never acknowledged is simply dropped.
    /// Otherwise it becomes a dirty tombstone, hidden from reads, until the
    /// delete is pushed.
    pub async fn delete(&self, bucket: &str, id: &str) -> Result<()> {
        check_bucket(bucket)?;
        let _crud = self.enter()?;

        let current = self.live_object(bucket, id).await?;
        self.authorize(&current, Permission::Delete)?;

        if !current.is_remote_known() {
            self.store.delete_object(&current).await?;
            tracing::debug!(bucket, id, "dropped unpushed object");
            return Ok(());
        }

        let tombstone = CachedObject {
            deleted: true,
            updated_at: Timestamp::now(),
            ..current
        };
        self.store.update_object(&tombstone, SyncState::Dirty).await?;

        tracing::debug!(bucket, id, "marked object deleted");
        Ok(())
    }

    /// Objects in a bucket with changes not yet pushed, tombstones included.
    pub async fn pending_changes(&self, bucket: &str) -> Result<Vec<CachedObject>> {
        check_bucket(bucket)?;
        let _crud = self.enter()?;

        Ok(self.store.dirty_objects(bucket).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync Scope Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Set the query bounding what a bucket synchronizes. The next pull of
    /// the bucket is a full pull.
    pub async fn set_sync_scope(&self, bucket: &str, scope: &ObjectQuery) -> Result<()> {
        check_bucket(bucket)?;
        let _crud = self.enter()?;

        self.store.set_sync_scope(bucket, Some(scope)).await?;
        tracing::debug!(bucket, scope = %scope.to_stable_string(), "sync scope set");
        Ok(())
    }

    /// Stop synchronizing a bucket and forget its watermarks.
    pub async fn remove_sync_scope(&self, bucket: &str) -> Result<()> {
        check_bucket(bucket)?;
        let _crud = self.enter()?;

        Ok(self.store.remove_sync_scope(bucket).await?)
    }

    /// Discard every cached object of a bucket, pending changes included.
    ///
    /// A configured scope is kept, but its watermarks are reset so the next
    /// sync pulls the whole scope again. Returns how many objects were
    /// dropped.
    pub async fn clear_bucket(&self, bucket: &str) -> Result<usize> {
        check_bucket(bucket)?;
        let _crud = self.enter()?;

        let dropped = self.store.clear_bucket(bucket).await?;
        if let Some(scope) = self.store.get_sync_scope(bucket).await? {
            self.store.set_sync_scope(bucket, Some(&scope)).await?;
        }

        tracing::debug!(bucket, dropped, "cleared bucket");
        Ok(dropped)
    }

    pub async fn sync_scope(&self, bucket: &str) -> Result<Option<ObjectQuery>> {
        check_bucket(bucket)?;
        Ok(self.store.get_sync_scope(bucket).await?)
    }

    /// Every bucket with a configured scope.
    pub async fn sync_scopes(&self) -> Result<BTreeMap<String, ObjectQuery>> {
        Ok(self.store.all_sync_scopes().await?)
    }

    /// When the bucket last finished synchronizing.
    pub async fn last_sync_time(&self, bucket: &str) -> Result<Option<Timestamp>> {
        check_bucket(bucket)?;
        Ok(self.store.last_sync_time(bucket).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Synchronize one bucket with the remote.
    pub async fn sync_bucket(
        &self,
        bucket: &str,
        resolver: Option<Arc<dyn ConflictResolver>>,
    ) -> Result<SyncReport> {
        Ok(self.sync.sync_bucket(bucket, resolver).await?)
    }

    /// Synchronize every bucket with a configured scope.
    pub async fn sync_all(
        &self,
        resolver: Option<Arc<dyn ConflictResolver>>,
    ) -> Result<BTreeMap<String, offsync_sync::Result<SyncReport>>> {
        Ok(self.sync.sync_all(resolver).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn enter(&self) -> Result<CrudGuard<'_>> {
        self.gate.crud_guard().ok_or_else(|| {
            tracing::debug!("local operation rejected, sync in progress");
            ClientError::Locked
        })
    }

    async fn live_object(&self, bucket: &str, id: &str) -> Result<CachedObject> {
        self.store
            .find_object(bucket, id)
            .await?
            .filter(|o| !o.deleted)
            .ok_or_else(|| ClientError::NotFound {
                bucket: bucket.to_string(),
                id: id.to_string(),
            })
    }

    fn permits(&self, object: &CachedObject, permission: Permission) -> bool {
        self.actor
            .as_ref()
            .map_or(true, |actor| object.acl.allows(actor, permission))
    }

    fn authorize(&self, object: &CachedObject, permission: Permission) -> Result<()> {
        if self.permits(object, permission) {
            return Ok(());
        }
        tracing::warn!(bucket = %object.bucket, id = %object.id, ?permission, "permission denied");
        Err(ClientError::NotAuthorized {
            bucket: object.bucket.clone(),
            id: object.id.clone(),
            permission,
        })
    }
}

fn check_bucket(bucket: &str) -> Result<()> {
    if bucket.trim().is_empty() {
        return Err(ClientError::InvalidBucket(bucket.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_core::{Condition, Principal};
    use offsync_store::MemoryStore;
    use offsync_sync::memory::MemoryRemote;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Document::new(),
        }
    }

    fn client(actor: Option<Actor>) -> Client<MemoryStore, MemoryRemote> {
        let config = ClientConfig {
            actor,
            ..ClientConfig::default()
        };
        Client::new(MemoryStore::new(), MemoryRemote::default(), config).unwrap()
    }

    #[tokio::test]
    async fn test_create_get_update() {
        let client = client(Some(Actor::user("alice")));
        let created = client.create("notes", doc(json!({"t": "a"})), None).await.unwrap();
        assert!(created.is_dirty());
        assert_eq!(created.acl.owner.as_deref(), Some("alice"));

        let updated = client.update("notes", &created.id, doc(json!({"t": "b"}))).await.unwrap();
        assert_eq!(updated.field("t"), Some(json!("b")));

        let fetched = client.get("notes", &created.id).await.unwrap().unwrap();
        assert_eq!(fetched, updated);
    }

    #[tokio::test]
    async fn test_delete_unpushed_object_drops_it() {
        let client = client(None);
        let created = client.create("notes", Document::new(), None).await.unwrap();
        client.delete("notes", &created.id).await.unwrap();

        assert!(client.pending_changes("notes").await.unwrap().is_empty());
        assert!(client.store().find_object("notes", &created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_bucket_resets_watermarks() {
        let client = client(None);
        client.set_sync_scope("notes", &ObjectQuery::all()).await.unwrap();
        client.create("notes", Document::new(), None).await.unwrap();
        client.create("other", Document::new(), None).await.unwrap();
        client
            .store()
            .set_last_pull_server_time("notes", Timestamp::from_millis(500))
            .await
            .unwrap();

        assert_eq!(client.clear_bucket("notes").await.unwrap(), 1);

        assert!(client.pending_changes("notes").await.unwrap().is_empty());
        assert_eq!(client.pending_changes("other").await.unwrap().len(), 1);
        assert_eq!(client.sync_scope("notes").await.unwrap(), Some(ObjectQuery::all()));
        assert_eq!(client.store().last_pull_server_time("notes").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_synced_object_leaves_tombstone() {
        let client = client(None);
        let synced = CachedObject::new("notes", "1", "e1", Timestamp::from_millis(1));
        client.store().insert_object(&synced).await.unwrap();

        client.delete("notes", "1").await.unwrap();

        assert!(client.get("notes", "1").await.unwrap().is_none());
        let pending = client.pending_changes("notes").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].deleted);
        assert!(matches!(
            client.delete("notes", "1").await,
            Err(ClientError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_acl_checks() {
        let mut client = client(Some(Actor::user("alice")));
        let acl = Acl::owned_by("alice").with(Permission::Read, Principal::User("bob".into()));
        let created = client.create("notes", doc(json!({"k": 1})), Some(acl)).await.unwrap();

        client.set_actor(Some(Actor::user("bob")));
        assert!(client.get("notes", &created.id).await.unwrap().is_some());
        assert!(matches!(
            client.update("notes", &created.id, Document::new()).await,
            Err(ClientError::NotAuthorized { permission: Permission::Update, .. })
        ));
        assert!(matches!(
            client.delete("notes", &created.id).await,
            Err(ClientError::NotAuthorized { permission: Permission::Delete, .. })
        ));

        client.set_actor(Some(Actor::user("carol")));
        assert!(client.get("notes", &created.id).await.unwrap().is_none());
        assert!(client
            .query("notes", &ObjectQuery::new(Condition::eq("k", 1)))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_operations_locked_during_sync() {
        let client = client(None);
        let created = client.create("notes", Document::new(), None).await.unwrap();

        let _sync = client.gate().sync_guard().await.unwrap();
        assert!(client.create("notes", Document::new(), None).await.unwrap_err().is_locked());
        assert!(client.get("notes", &created.id).await.unwrap_err().is_locked());
        assert!(client.query("notes", &ObjectQuery::all()).await.unwrap_err().is_locked());
        assert!(client.delete("notes", &created.id).await.unwrap_err().is_locked());
        assert!(client.sync_bucket("notes", None).await.unwrap_err().is_locked());
    }

    #[tokio::test]
    async fn test_blank_bucket_rejected() {
        let client = client(None);
        assert!(matches!(
            client.create("", Document::new(), None).await,
            Err(ClientError::InvalidBucket(_))
        ));
        assert!(matches!(
            client.sync_bucket("", None).await,
            Err(ClientError::Sync(offsync_sync::SyncError::InvalidBucket(_)))
        ));
    }

    #[test]
    fn test_config_from_json() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"actor": {"user_id": "alice"}, "sync": {"page_size": 10}}"#).unwrap();
        assert_eq!(config.actor, Some(Actor::user("alice")));
        assert_eq!(config.sync.page_size, 10);
        assert_eq!(config.sync.clock_skew, SyncConfig::default().clock_skew);
    }
}
