//! Storage traits: the abstract interfaces the sync core consumes.
//!
//! [`ObjectCache`] is the local object table, [`MetadataStore`] the
//! per-bucket sync bookkeeping. Both are implemented by SQLite (primary)
//! and in-memory (tests) backends.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use offsync_core::{Actor, CachedObject, ObjectQuery, SyncState, Timestamp};

use crate::error::Result;

/// Result of inserting an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Object was inserted.
    Inserted,
    /// An object with the same bucket and id is already cached; nothing changed.
    AlreadyExists,
}

/// Per-bucket synchronization bookkeeping.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BucketSyncMetadata {
    pub bucket: String,
    /// Query bounding what gets synchronized. `None` means sync is not
    /// configured for the bucket.
    pub sync_scope: Option<ObjectQuery>,
    /// Remote clock captured at the start of the last completed pull.
    /// `None` means the next pull is a full pull.
    pub last_pull_server_time: Option<Timestamp>,
    /// Wall-clock time of the last completed synchronization.
    pub last_sync_time: Option<Timestamp>,
}

/// The local object cache.
///
/// All mutations are atomic per object. Objects are keyed by
/// `(bucket, id)`.
#[async_trait]
pub trait ObjectCache: Send + Sync {
    /// Insert a new object, keeping its `sync_state`.
    async fn insert_object(&self, object: &CachedObject) -> Result<InsertResult>;

    /// Overwrite a cached object with `object`'s content and the given state.
    ///
    /// Fails with `NotFound` if the object is not cached.
    async fn update_object(&self, object: &CachedObject, state: SyncState) -> Result<()>;

    /// Remove the cached row for `object`. Returns whether it existed.
    async fn delete_object(&self, object: &CachedObject) -> Result<bool>;

    /// Look up one object, tombstones included.
    async fn find_object(&self, bucket: &str, id: &str) -> Result<Option<CachedObject>>;

    /// Run `query` over a bucket.
    ///
    /// With an `actor`, objects it may not read are invisible.
    async fn query_objects(
        &self,
        bucket: &str,
        query: &ObjectQuery,
        actor: Option<&Actor>,
    ) -> Result<Vec<CachedObject>>;

    /// Every `Dirty` object of a bucket, tombstones included, ordered by
    /// `(updated_at, id)`.
    async fn dirty_objects(&self, bucket: &str) -> Result<Vec<CachedObject>>;

    /// Number of cached rows in a bucket, tombstones included.
    async fn count_objects(&self, bucket: &str) -> Result<usize>;

    /// Drop every cached row of a bucket. Returns how many were removed.
    async fn clear_bucket(&self, bucket: &str) -> Result<usize>;
}

/// Persistent per-bucket sync metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// The full metadata row, if one was ever written.
    async fn bucket_metadata(&self, bucket: &str) -> Result<Option<BucketSyncMetadata>>;

    /// Store a scope (or clear it with `None`) and reset both watermarks.
    async fn set_sync_scope(&self, bucket: &str, scope: Option<&ObjectQuery>) -> Result<()>;

    /// Clear the scope and both watermarks.
    async fn remove_sync_scope(&self, bucket: &str) -> Result<()> {
        self.set_sync_scope(bucket, None).await
    }

    async fn get_sync_scope(&self, bucket: &str) -> Result<Option<ObjectQuery>> {
        Ok(self
            .bucket_metadata(bucket)
            .await?
            .and_then(|m| m.sync_scope))
    }

    /// Every bucket with a configured scope.
    async fn all_sync_scopes(&self) -> Result<BTreeMap<String, ObjectQuery>>;

    async fn last_pull_server_time(&self, bucket: &str) -> Result<Option<Timestamp>> {
        Ok(self
            .bucket_metadata(bucket)
            .await?
            .and_then(|m| m.last_pull_server_time))
    }

    async fn set_last_pull_server_time(&self, bucket: &str, at: Timestamp) -> Result<()>;

    async fn last_sync_time(&self, bucket: &str) -> Result<Option<Timestamp>> {
        Ok(self
            .bucket_metadata(bucket)
            .await?
            .and_then(|m| m.last_sync_time))
    }

    async fn set_last_sync_time(&self, bucket: &str, at: Timestamp) -> Result<()>;
}

#[async_trait]
impl<T: ObjectCache + ?Sized> ObjectCache for Arc<T> {
    async fn insert_object(&self, object: &CachedObject) -> Result<InsertResult> {
        (**self).insert_object(object).await
    }

    async fn update_object(&self, object: &CachedObject, state: SyncState) -> Result<()> {
        (**self).update_object(object, state).await
    }

    async fn delete_object(&self, object: &CachedObject) -> Result<bool> {
        (**self).delete_object(object).await
    }

    async fn find_object(&self, bucket: &str, id: &str) -> Result<Option<CachedObject>> {
        (**self).find_object(bucket, id).await
    }

    async fn query_objects(
        &self,
        bucket: &str,
        query: &ObjectQuery,
        actor: Option<&Actor>,
    ) -> Result<Vec<CachedObject>> {
        (**self).query_objects(bucket, query, actor).await
    }

    async fn dirty_objects(&self, bucket: &str) -> Result<Vec<CachedObject>> {
        (**self).dirty_objects(bucket).await
    }

    async fn count_objects(&self, bucket: &str) -> Result<usize> {
        (**self).count_objects(bucket).await
    }

    async fn clear_bucket(&self, bucket: &str) -> Result<usize> {
        (**self).clear_bucket(bucket).await
    }
}

#[async_trait]
impl<T: MetadataStore + ?Sized> MetadataStore for Arc<T> {
    async fn bucket_metadata(&self, bucket: &str) -> Result<Option<BucketSyncMetadata>> {
        (**self).bucket_metadata(bucket).await
    }

    async fn set_sync_scope(&self, bucket: &str, scope: Option<&ObjectQuery>) -> Result<()> {
        (**self).set_sync_scope(bucket, scope).await
    }

    async fn all_sync_scopes(&self) -> Result<BTreeMap<String, ObjectQuery>> {
        (**self).all_sync_scopes().await
    }

    async fn set_last_pull_server_time(&self, bucket: &str, at: Timestamp) -> Result<()> {
        (**self).set_last_pull_server_time(bucket, at).await
    }

    async fn set_last_sync_time(&self, bucket: &str, at: Timestamp) -> Result<()> {
        (**self).set_last_sync_time(bucket, at).await
    }
}
