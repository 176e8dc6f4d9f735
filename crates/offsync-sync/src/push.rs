//! Batched push of local changes.

use std::sync::Arc;

use offsync_core::{
    fields, BatchOp, BatchOutcome, CachedObject, Condition, ConflictResolver, ObjectQuery, ResultCode, SyncState,
};
use offsync_store::{InsertResult, MetadataStore, ObjectCache};

use crate::conflict::handle_conflict;
use crate::error::{RemoteError, Result};
use crate::manager::SyncManager;
use crate::remote::{BatchExecutor, QueryExecutor};

impl<C, M, R> SyncManager<C, M, R>
where
    C: ObjectCache + 'static,
    M: MetadataStore,
    R: QueryExecutor + BatchExecutor,
{
    /// Submit every `Dirty` object of `bucket` in one batch and reconcile
    /// the per-item outcomes.
    ///
    /// Items are reconciled independently. Outcomes other than `Ok`,
    /// version conflicts and `NotFound` leave the object `Dirty` for the
    /// next sync, as does a version conflict on an insert. Returns the
    /// outcomes in submission order.
    pub async fn push(&self, bucket: &str, resolver: Arc<dyn ConflictResolver>) -> Result<Vec<BatchOutcome>> {
        let dirty = self.cache.dirty_objects(bucket).await?;
        if dirty.is_empty() {
            tracing::debug!(bucket, "nothing to push");
            return Ok(Vec::new());
        }

        let ops: Vec<BatchOp> = dirty.iter().map(BatchOp::for_object).collect();
        let outcomes = self.remote.batch(bucket, ops).await?;

        if outcomes.len() != dirty.len() {
            return Err(RemoteError::InvalidResponse(format!(
                "batch for {} returned {} outcomes for {} operations",
                bucket,
                outcomes.len(),
                dirty.len()
            ))
            .into());
        }

        for (local, outcome) in dirty.iter().zip(&outcomes) {
            self.reconcile(bucket, local, outcome, resolver.as_ref()).await?;
        }

        tracing::debug!(bucket, items = outcomes.len(), "push complete");
        Ok(outcomes)
    }

    async fn reconcile(
        &self,
        bucket: &str,
        local: &CachedObject,
        outcome: &BatchOutcome,
        resolver: &dyn ConflictResolver,
    ) -> Result<()> {
        match outcome.result_code {
            ResultCode::Ok if local.deleted => {
                self.cache.delete_object(local).await?;
            }
            ResultCode::Ok => self.acknowledge(local, outcome).await?,
            ResultCode::Conflict if outcome.is_version_conflict() && !local.is_remote_known() => {
                // No server copy exists to reconcile against.
                tracing::warn!(bucket, id = %local.id, "insert conflicted, keeping local object");
            }
            ResultCode::Conflict if outcome.is_version_conflict() => {
                self.resolve_push_conflict(bucket, local, resolver).await?;
            }
            ResultCode::NotFound => {
                tracing::debug!(bucket, id = %local.id, "object gone remotely, dropping local copy");
                self.cache.delete_object(local).await?;
            }
            result_code => {
                tracing::warn!(
                    bucket,
                    id = %local.id,
                    ?result_code,
                    reason_code = ?outcome.reason_code,
                    "push item failed, keeping local change"
                );
            }
        }
        Ok(())
    }

    /// Store the remote's accepted state. Inserts are re-keyed from the
    /// local temporary id to the id the remote assigned.
    async fn acknowledge(&self, local: &CachedObject, outcome: &BatchOutcome) -> Result<()> {
        let mut synced = local.clone();
        if let Some(etag) = &outcome.etag {
            synced.etag = etag.clone();
        }
        if let Some(updated_at) = outcome.updated_at {
            synced.updated_at = updated_at;
            if !local.is_remote_known() {
                synced.created_at = updated_at;
            }
        }
        if let Some(data) = &outcome.data {
            synced.payload = data.clone();
        }
        synced.sync_state = SyncState::Sync;

        if outcome.id == local.id {
            self.cache.update_object(&synced, SyncState::Sync).await?;
            return Ok(());
        }

        tracing::debug!(bucket = %local.bucket, local_id = %local.id, id = %outcome.id, "re-keying inserted object");
        self.cache.delete_object(local).await?;
        synced.id = outcome.id.clone();
        if self.cache.insert_object(&synced).await? == InsertResult::AlreadyExists {
            self.cache.update_object(&synced, SyncState::Sync).await?;
        }
        Ok(())
    }

    /// Re-fetch the server copy of a conflicting object and run the
    /// resolver against it.
    async fn resolve_push_conflict(
        &self,
        bucket: &str,
        local: &CachedObject,
        resolver: &dyn ConflictResolver,
    ) -> Result<()> {
        let query = ObjectQuery::new(Condition::eq(fields::ID, local.id.clone()))
            .with_tombstones(true)
            .limit(1);

        let page = match self.remote.query(bucket, &query).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(bucket, id = %local.id, error = %e, "could not fetch server copy, keeping local change");
                return Ok(());
            }
        };

        match page.objects.into_iter().next() {
            Some(server) => {
                handle_conflict(self.cache.as_ref(), &server, local, resolver).await?;
            }
            None => {
                tracing::debug!(bucket, id = %local.id, "conflicting object gone remotely, dropping local copy");
                self.cache.delete_object(local).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_core::{Acl, Document, PreferClient, PreferServer, ReasonCode, Timestamp};
    use offsync_store::MemoryStore;
    use serde_json::json;

    use crate::config::SyncConfig;
    use crate::gate::ConcurrencyGate;
    use crate::remote::memory::MemoryRemote;
    use crate::remote::QueryPage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Manager = SyncManager<MemoryStore, MemoryStore, MemoryRemote>;

    fn setup() -> (Arc<MemoryStore>, Arc<MemoryRemote>, Manager) {
        let store = Arc::new(MemoryStore::new());
        let remote = MemoryRemote::new();
        let manager = SyncManager::new(
            Arc::clone(&store),
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::new(ConcurrencyGate::new()),
            SyncConfig::default(),
        )
        .unwrap();
        (store, remote, manager)
    }

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Document::new(),
        }
    }

    #[tokio::test]
    async fn test_nothing_dirty_sends_nothing() {
        let (store, remote, manager) = setup();
        store
            .insert_object(&CachedObject::new("b", "1", "e", Timestamp::from_millis(1)))
            .await
            .unwrap();

        let outcomes = manager.push("b", Arc::new(PreferServer)).await.unwrap();
        assert!(outcomes.is_empty());
        assert!(remote.batch_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_insert_is_rekeyed() {
        let (store, remote, manager) = setup();
        remote.set_server_time(Some(Timestamp::from_millis(5000))).await;
        let local = CachedObject::new_local("b", doc(json!({"t": 1})), Acl::public(), Timestamp::from_millis(10));
        store.insert_object(&local).await.unwrap();

        let outcomes = manager.push("b", Arc::new(PreferServer)).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        let id = &outcomes[0].id;

        assert!(store.find_object("b", &local.id).await.unwrap().is_none());
        let synced = store.find_object("b", id).await.unwrap().unwrap();
        assert_eq!(synced.sync_state, SyncState::Sync);
        assert_eq!(synced.updated_at, Timestamp::from_millis(5000));
        assert_eq!(Some(&synced.etag), outcomes[0].etag.as_ref());
        assert!(remote.get("b", id).await.is_some());
    }

    #[tokio::test]
    async fn test_update_and_delete_acknowledged() {
        let (store, remote, manager) = setup();
        let a = remote.write("b", "a", doc(json!({"v": 1}))).await;
        let d = remote.write("b", "d", doc(json!({"v": 1}))).await;

        store
            .insert_object(&a.clone().with_field("v", 2).with_sync_state(SyncState::Dirty))
            .await
            .unwrap();
        store
            .insert_object(&d.clone().with_deleted(true).with_sync_state(SyncState::Dirty))
            .await
            .unwrap();

        let outcomes = manager.push("b", Arc::new(PreferServer)).await.unwrap();
        assert!(outcomes.iter().all(BatchOutcome::is_ok));

        let cached = store.find_object("b", "a").await.unwrap().unwrap();
        assert_eq!(cached.sync_state, SyncState::Sync);
        assert_eq!(cached.etag, remote.get("b", "a").await.unwrap().etag);
        assert!(store.find_object("b", "d").await.unwrap().is_none());
        assert!(remote.get("b", "d").await.unwrap().deleted);
    }

    #[tokio::test]
    async fn test_version_conflict_refetches_and_resolves() {
        let (store, remote, manager) = setup();
        let original = remote.write("b", "1", doc(json!({"v": 1}))).await;
        store
            .insert_object(&original.clone().with_field("v", 2).with_sync_state(SyncState::Dirty))
            .await
            .unwrap();
        let theirs = remote.write("b", "1", doc(json!({"v": 3}))).await;

        let outcomes = manager.push("b", Arc::new(PreferClient)).await.unwrap();
        assert!(outcomes[0].is_version_conflict());

        let cached = store.find_object("b", "1").await.unwrap().unwrap();
        assert_eq!(cached.etag, theirs.etag);
        assert_eq!(cached.field("v"), Some(json!(2)));
        assert!(cached.is_dirty());

        // The retry now carries the right precondition.
        let retry = manager.push("b", Arc::new(PreferClient)).await.unwrap();
        assert!(retry[0].is_ok());
        assert_eq!(remote.get("b", "1").await.unwrap().field("v"), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_not_found_removes_local_copy() {
        let (store, remote, manager) = setup();
        let obj = CachedObject::new("b", "gone", "e", Timestamp::from_millis(1)).with_sync_state(SyncState::Dirty);
        store.insert_object(&obj).await.unwrap();

        let outcomes = manager.push("b", Arc::new(PreferServer)).await.unwrap();
        assert_eq!(outcomes[0].result_code, ResultCode::NotFound);
        assert!(store.find_object("b", "gone").await.unwrap().is_none());
        assert_eq!(remote.batch_log().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_stay_dirty_and_do_not_abort() {
        let (store, remote, manager) = setup();
        let failures = [
            ("forbidden", ResultCode::Forbidden, ReasonCode::Unspecified),
            ("bad", ResultCode::BadRequest, ReasonCode::Unspecified),
            ("server", ResultCode::ServerError, ReasonCode::Unspecified),
            ("unknown", ResultCode::Unknown, ReasonCode::Unknown),
            ("dup-key", ResultCode::Conflict, ReasonCode::DuplicateKey),
            ("dup-id", ResultCode::Conflict, ReasonCode::DuplicateId),
            ("conflict", ResultCode::Conflict, ReasonCode::Unspecified),
        ];

        let ok = remote.write("b", "ok", Document::new()).await;
        store
            .insert_object(&ok.with_field("x", 1).with_sync_state(SyncState::Dirty))
            .await
            .unwrap();
        let mut originals = Vec::new();
        for (id, result_code, reason_code) in failures {
            let original = remote.write("b", id, Document::new()).await;
            store
                .insert_object(&original.clone().with_field("x", 1).with_sync_state(SyncState::Dirty))
                .await
                .unwrap();
            remote
                .force_outcome(id, BatchOutcome::failed(id, result_code, reason_code))
                .await;
            originals.push(original);
        }

        let outcomes = manager.push("b", Arc::new(PreferServer)).await.unwrap();
        assert_eq!(outcomes.len(), failures.len() + 1);
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(!store.find_object("b", "ok").await.unwrap().unwrap().is_dirty());

        for original in originals {
            let local = store.find_object("b", &original.id).await.unwrap().unwrap();
            assert!(local.is_dirty(), "{} should stay dirty", original.id);
            assert_eq!(local.etag, original.etag);
            assert_eq!(local.field("x"), Some(json!(1)));
        }
        // No re-fetch for non-version conflicts.
        assert!(remote.query_log().await.is_empty());
    }

    /// Accepts nothing: every batch item comes back as a version conflict.
    struct ConflictAll {
        queries: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl QueryExecutor for ConflictAll {
        async fn query(&self, _bucket: &str, _query: &ObjectQuery) -> crate::remote::Result<QueryPage> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(QueryPage {
                objects: Vec::new(),
                server_time: Timestamp::from_millis(1),
            })
        }
    }

    #[async_trait::async_trait]
    impl BatchExecutor for ConflictAll {
        async fn batch(&self, _bucket: &str, ops: Vec<BatchOp>) -> crate::remote::Result<Vec<BatchOutcome>> {
            Ok(ops
                .iter()
                .map(|op| {
                    BatchOutcome::failed(op.id().unwrap_or(""), ResultCode::Conflict, ReasonCode::RequestConflicted)
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_conflicting_insert_keeps_offline_object() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(ConflictAll {
            queries: AtomicUsize::new(0),
        });
        let manager = SyncManager::new(
            Arc::clone(&store),
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::new(ConcurrencyGate::new()),
            SyncConfig::default(),
        )
        .unwrap();

        let local = CachedObject::new_local("b", doc(json!({"draft": true})), Acl::public(), Timestamp::from_millis(10));
        store.insert_object(&local).await.unwrap();

        let outcomes = manager.push("b", Arc::new(PreferServer)).await.unwrap();
        assert!(outcomes[0].is_version_conflict());

        let kept = store.find_object("b", &local.id).await.unwrap().unwrap();
        assert_eq!(kept, local);
        assert_eq!(remote.queries.load(Ordering::SeqCst), 0);
    }
}
