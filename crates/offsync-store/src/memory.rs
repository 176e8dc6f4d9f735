//! In-memory implementation of the storage traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use offsync_core::{Actor, CachedObject, ObjectQuery, SyncState, Timestamp};

use crate::error::{Result, StoreError};
use crate::traits::{BucketSyncMetadata, InsertResult, MetadataStore, ObjectCache};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Objects keyed by (bucket, id).
    objects: BTreeMap<(String, String), CachedObject>,

    /// Sync bookkeeping by bucket.
    buckets: HashMap<String, BucketSyncMetadata>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key(bucket: &str, id: &str) -> (String, String) {
    (bucket.to_string(), id.to_string())
}

impl MemoryStoreInner {
    fn bucket_objects<'a>(&'a self, bucket: &'a str) -> impl Iterator<Item = &'a CachedObject> + 'a {
        self.objects
            .range(key(bucket, "")..)
            .take_while(move |((b, _), _)| b.as_str() == bucket)
            .map(|(_, obj)| obj)
    }

    fn metadata_mut(&mut self, bucket: &str) -> &mut BucketSyncMetadata {
        self.buckets
            .entry(bucket.to_string())
            .or_insert_with(|| BucketSyncMetadata {
                bucket: bucket.to_string(),
                ..Default::default()
            })
    }
}

#[async_trait]
impl ObjectCache for MemoryStore {
    async fn insert_object(&self, object: &CachedObject) -> Result<InsertResult> {
        let mut inner = self.write()?;
        let k = key(&object.bucket, &object.id);

        if inner.objects.contains_key(&k) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner.objects.insert(k, object.clone());
        Ok(InsertResult::Inserted)
    }

    async fn update_object(&self, object: &CachedObject, state: SyncState) -> Result<()> {
        let mut inner = self.write()?;

        match inner.objects.get_mut(&key(&object.bucket, &object.id)) {
            Some(slot) => {
                *slot = object.clone().with_sync_state(state);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                bucket: object.bucket.clone(),
                id: object.id.clone(),
            }),
        }
    }

    async fn delete_object(&self, object: &CachedObject) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(inner
            .objects
            .remove(&key(&object.bucket, &object.id))
            .is_some())
    }

    async fn find_object(&self, bucket: &str, id: &str) -> Result<Option<CachedObject>> {
        let inner = self.read()?;
        Ok(inner.objects.get(&key(bucket, id)).cloned())
    }

    async fn query_objects(
        &self,
        bucket: &str,
        query: &ObjectQuery,
        actor: Option<&Actor>,
    ) -> Result<Vec<CachedObject>> {
        let inner = self.read()?;
        let candidates: Vec<_> = inner
            .bucket_objects(bucket)
            .filter(|obj| query.include_tombstones || !obj.deleted)
            .cloned()
            .collect();
        Ok(query.evaluate(candidates, actor))
    }

    async fn dirty_objects(&self, bucket: &str) -> Result<Vec<CachedObject>> {
        let inner = self.read()?;
        let mut dirty: Vec<_> = inner
            .bucket_objects(bucket)
            .filter(|obj| obj.is_dirty())
            .cloned()
            .collect();
        dirty.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(dirty)
    }

    async fn count_objects(&self, bucket: &str) -> Result<usize> {
        let inner = self.read()?;
        Ok(inner.bucket_objects(bucket).count())
    }

    async fn clear_bucket(&self, bucket: &str) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.objects.len();
        inner.objects.retain(|(b, _), _| b.as_str() != bucket);
        Ok(before - inner.objects.len())
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn bucket_metadata(&self, bucket: &str) -> Result<Option<BucketSyncMetadata>> {
        let inner = self.read()?;
        Ok(inner.buckets.get(bucket).cloned())
    }

    async fn set_sync_scope(&self, bucket: &str, scope: Option<&ObjectQuery>) -> Result<()> {
        let mut inner = self.write()?;
        let meta = inner.metadata_mut(bucket);
        meta.sync_scope = scope.cloned();
        meta.last_pull_server_time = None;
        meta.last_sync_time = None;
        Ok(())
    }

    async fn all_sync_scopes(&self) -> Result<BTreeMap<String, ObjectQuery>> {
        let inner = self.read()?;
        Ok(inner
            .buckets
            .values()
            .filter_map(|m| m.sync_scope.clone().map(|s| (m.bucket.clone(), s)))
            .collect())
    }

    async fn set_last_pull_server_time(&self, bucket: &str, at: Timestamp) -> Result<()> {
        let mut inner = self.write()?;
        inner.metadata_mut(bucket).last_pull_server_time = Some(at);
        Ok(())
    }

    async fn set_last_sync_time(&self, bucket: &str, at: Timestamp) -> Result<()> {
        let mut inner = self.write()?;
        inner.metadata_mut(bucket).last_sync_time = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_core::{Acl, Condition};

    fn object(bucket: &str, id: &str, updated: i64) -> CachedObject {
        CachedObject::new(bucket, id, "e", Timestamp::from_millis(updated))
    }

    #[tokio::test]
    async fn test_buckets_are_isolated() {
        let store = MemoryStore::new();
        store.insert_object(&object("a", "1", 1)).await.unwrap();
        store.insert_object(&object("ab", "1", 1)).await.unwrap();
        store.insert_object(&object("b", "1", 1)).await.unwrap();

        assert_eq!(store.count_objects("a").await.unwrap(), 1);
        assert_eq!(store.clear_bucket("a").await.unwrap(), 1);
        assert_eq!(store.count_objects("ab").await.unwrap(), 1);
        assert_eq!(store.count_objects("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_is_first_writer_wins() {
        let store = MemoryStore::new();
        let obj = object("a", "1", 1);
        assert_eq!(store.insert_object(&obj).await.unwrap(), InsertResult::Inserted);
        assert_eq!(
            store.insert_object(&obj.clone().with_field("x", 1)).await.unwrap(),
            InsertResult::AlreadyExists
        );
        assert_eq!(store.find_object("a", "1").await.unwrap(), Some(obj));
    }

    #[tokio::test]
    async fn test_dirty_objects_ordered() {
        let store = MemoryStore::new();
        for (id, at) in [("c", 5), ("a", 9), ("b", 5)] {
            let obj = object("n", id, at).with_sync_state(SyncState::Dirty);
            store.insert_object(&obj).await.unwrap();
        }
        store.insert_object(&object("n", "clean", 1)).await.unwrap();
        store
            .insert_object(&object("n", "gone", 7).with_deleted(true).with_sync_state(SyncState::Dirty))
            .await
            .unwrap();

        let ids: Vec<_> = store
            .dirty_objects("n")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "gone", "a"]);
    }

    #[tokio::test]
    async fn test_query_respects_acl_and_tombstones() {
        let store = MemoryStore::new();
        store
            .insert_object(&object("n", "1", 1).with_field("k", 1).with_acl(Acl::owned_by("alice")))
            .await
            .unwrap();
        store
            .insert_object(&object("n", "2", 2).with_field("k", 1).with_deleted(true))
            .await
            .unwrap();

        let query = ObjectQuery::new(Condition::eq("k", 1));
        assert!(store
            .query_objects("n", &query, Some(&Actor::user("bob")))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.query_objects("n", &query, None).await.unwrap().len(), 1);
        assert_eq!(
            store
                .query_objects("n", &query.clone().with_tombstones(true), None)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_scope_lifecycle() {
        let store = MemoryStore::new();
        assert!(store.bucket_metadata("n").await.unwrap().is_none());

        store.set_sync_scope("n", Some(&ObjectQuery::all())).await.unwrap();
        store.set_last_pull_server_time("n", Timestamp::from_millis(10)).await.unwrap();
        store.set_last_sync_time("n", Timestamp::from_millis(11)).await.unwrap();
        assert_eq!(store.all_sync_scopes().await.unwrap().len(), 1);

        store.remove_sync_scope("n").await.unwrap();
        let meta = store.bucket_metadata("n").await.unwrap().unwrap();
        assert_eq!(meta.sync_scope, None);
        assert_eq!(meta.last_pull_server_time, None);
        assert_eq!(meta.last_sync_time, None);
        assert!(store.all_sync_scopes().await.unwrap().is_empty());
    }
}
