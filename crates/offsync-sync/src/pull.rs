//! Incremental, keyset-paginated pull.
//!
//! Pages are requested in `(updated_at, id)` order. Each follow-up page
//! starts strictly after the last object of the previous one, so objects
//! sharing an `updated_at` are neither skipped nor repeated at a page
//! boundary.

use std::sync::Arc;

use offsync_core::{fields, CachedObject, Condition, ConflictResolver, ObjectQuery, OrderBy, SyncState, Timestamp};
use offsync_store::{InsertResult, MetadataStore, ObjectCache};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::conflict::handle_conflict;
use crate::error::{Result, SyncError};
use crate::manager::SyncManager;
use crate::remote::{BatchExecutor, QueryExecutor};

/// Force the paging parameters onto a condition.
fn paged(condition: Condition, page_size: usize) -> ObjectQuery {
    ObjectQuery::new(condition)
        .order_by(OrderBy::ascending(fields::UPDATED_AT))
        .order_by(OrderBy::ascending(fields::ID))
        .limit(page_size)
        .with_tombstones(true)
}

/// The query for the first page of a pull.
///
/// With a watermark, only objects modified at or after
/// `watermark - clock_skew` are requested. The base query's ordering,
/// paging and projection are replaced.
pub fn first_page_query(base: &ObjectQuery, watermark: Option<Timestamp>, config: &SyncConfig) -> ObjectQuery {
    let condition = match watermark {
        None => base.condition.clone(),
        Some(at) => Condition::and(vec![
            Condition::gte(fields::UPDATED_AT, at.saturating_sub(config.clock_skew).to_value()),
            base.condition.clone(),
        ]),
    };
    paged(condition, config.page_size)
}

/// The query for the page after `last`.
pub fn next_page_query(base: &ObjectQuery, last: &CachedObject, config: &SyncConfig) -> ObjectQuery {
    let after_last = Condition::or(vec![
        Condition::gt(fields::UPDATED_AT, last.updated_at.to_value()),
        Condition::and(vec![
            Condition::eq(fields::UPDATED_AT, last.updated_at.to_value()),
            Condition::gt(fields::ID, last.id.clone()),
        ]),
    ]);
    paged(Condition::and(vec![base.condition.clone(), after_last]), config.page_size)
}

/// Reconcile one page of server objects against the cache.
///
/// Returns how many cached objects changed.
pub async fn apply_page<C>(
    cache: &C,
    bucket: &str,
    objects: Vec<CachedObject>,
    resolver: &dyn ConflictResolver,
) -> Result<usize>
where
    C: ObjectCache + ?Sized,
{
    let mut changes = 0;

    for server in objects {
        let server = server.with_sync_state(SyncState::Sync);

        match cache.find_object(bucket, &server.id).await? {
            None if server.deleted => {}
            None => {
                if cache.insert_object(&server).await? == InsertResult::Inserted {
                    changes += 1;
                }
            }
            Some(local) if local.etag == server.etag => {}
            Some(local) if server.deleted => {
                cache.delete_object(&local).await?;
                changes += 1;
            }
            Some(local) if !local.is_dirty() => {
                cache.update_object(&server, SyncState::Sync).await?;
                changes += 1;
            }
            Some(local) => {
                handle_conflict(cache, &server, &local, resolver).await?;
                changes += 1;
            }
        }
    }

    tracing::debug!(bucket, changes, "applied page");
    Ok(changes)
}

/// A spawned page application. Dropping it aborts the task, so a pull that
/// is cancelled does not keep writing to the cache after the gate is
/// released.
struct ApplyTask(JoinHandle<Result<usize>>);

impl ApplyTask {
    fn spawn<F>(apply: F) -> Self
    where
        F: std::future::Future<Output = Result<usize>> + Send + 'static,
    {
        Self(tokio::spawn(apply))
    }

    async fn join(mut self) -> Result<usize> {
        (&mut self.0)
            .await
            .map_err(|e| SyncError::TaskFailed(e.to_string()))?
    }
}

impl Drop for ApplyTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<C, M, R> SyncManager<C, M, R>
where
    C: ObjectCache + 'static,
    M: MetadataStore,
    R: QueryExecutor + BatchExecutor,
{
    /// Fetch everything in `base` that changed since the last pull and
    /// reconcile it into the cache.
    ///
    /// The remote clock reported with the first page becomes the bucket's
    /// new watermark once every page has been applied. Returns the number
    /// of cached objects changed.
    pub async fn pull(
        &self,
        bucket: &str,
        base: &ObjectQuery,
        resolver: Arc<dyn ConflictResolver>,
    ) -> Result<usize> {
        let config = &self.config;
        let watermark = self.metadata.last_pull_server_time(bucket).await?;
        let mut query = first_page_query(base, watermark, config);

        let mut pull_server_time = None;
        let mut pending: Option<ApplyTask> = None;
        let mut changes = 0;
        let mut page = 0usize;

        loop {
            let fetched = match self.remote.query(bucket, &query).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    if let Some(task) = pending.take() {
                        if let Err(apply_err) = task.join().await {
                            tracing::warn!(bucket, error = %apply_err, "page apply failed during aborted pull");
                        }
                    }
                    return Err(e.into());
                }
            };
            page += 1;
            pull_server_time.get_or_insert(fetched.server_time);

            let count = fetched.objects.len();
            let next = if count >= config.page_size {
                fetched.objects.last().map(|last| next_page_query(base, last, config))
            } else {
                None
            };
            tracing::debug!(bucket, page, objects = count, "fetched page");

            // Pages apply strictly in order.
            if let Some(task) = pending.take() {
                changes += task.join().await?;
            }

            if config.pipeline_apply {
                let cache = Arc::clone(&self.cache);
                let resolver = Arc::clone(&resolver);
                let bucket = bucket.to_string();
                pending = Some(ApplyTask::spawn(async move {
                    apply_page(cache.as_ref(), &bucket, fetched.objects, resolver.as_ref()).await
                }));
            } else {
                changes += apply_page(self.cache.as_ref(), bucket, fetched.objects, resolver.as_ref()).await?;
            }

            match next {
                Some(q) => query = q,
                None => break,
            }
        }

        if let Some(task) = pending.take() {
            changes += task.join().await?;
        }

        if let Some(at) = pull_server_time {
            self.metadata.set_last_pull_server_time(bucket, at).await?;
        }

        tracing::debug!(bucket, pages = page, changes, "pull complete");
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_core::PreferServer;
    use offsync_store::MemoryStore;
    use proptest::prelude::*;

    fn obj(id: &str, updated: i64) -> CachedObject {
        CachedObject::new("b", id, format!("e-{}", id), Timestamp::from_millis(updated))
    }

    #[test]
    fn test_first_page_without_watermark() {
        let base = ObjectQuery::new(Condition::eq("kind", "todo"))
            .order_by(OrderBy::descending("title"))
            .skip(5)
            .limit(7)
            .project(vec!["title".into()]);
        let config = SyncConfig::default();

        let query = first_page_query(&base, None, &config);
        assert_eq!(query.condition, base.condition);
        assert_eq!(query.limit, Some(100));
        assert_eq!(query.skip, None);
        assert_eq!(query.projection, None);
        assert!(query.include_tombstones);
        assert_eq!(
            query.order,
            vec![OrderBy::ascending(fields::UPDATED_AT), OrderBy::ascending(fields::ID)]
        );
    }

    #[test]
    fn test_first_page_backs_off_watermark() {
        let base = ObjectQuery::new(Condition::eq("kind", "todo"));
        let query = first_page_query(&base, Some(Timestamp::from_millis(10_000)), &SyncConfig::default());

        let expected = Condition::and(vec![
            Condition::gte(fields::UPDATED_AT, 7_000),
            Condition::eq("kind", "todo"),
        ]);
        assert_eq!(query.condition.to_stable_string(), expected.to_stable_string());
    }

    #[test]
    fn test_next_page_cursor_shape() {
        let base = ObjectQuery::all();
        let query = next_page_query(&base, &obj("k", 500), &SyncConfig::default().with_page_size(2));

        let expected = Condition::and(vec![
            Condition::All,
            Condition::or(vec![
                Condition::gt(fields::UPDATED_AT, 500),
                Condition::and(vec![
                    Condition::eq(fields::UPDATED_AT, 500),
                    Condition::gt(fields::ID, "k"),
                ]),
            ]),
        ]);
        assert_eq!(query.condition, expected);
        assert_eq!(query.limit, Some(2));
    }

    #[tokio::test]
    async fn test_apply_page_branches() {
        let store = MemoryStore::new();
        store.insert_object(&obj("same", 1)).await.unwrap();
        store.insert_object(&obj("stale", 1)).await.unwrap();
        store.insert_object(&obj("doomed", 1).with_sync_state(SyncState::Dirty)).await.unwrap();

        let page = vec![
            obj("new", 2),
            obj("ghost", 2).with_deleted(true),
            obj("same", 1),
            CachedObject::new("b", "stale", "e-stale-2", Timestamp::from_millis(3)),
            CachedObject::new("b", "doomed", "e-doomed-2", Timestamp::from_millis(4)).with_deleted(true),
        ];

        let changes = apply_page(&store, "b", page, &PreferServer).await.unwrap();
        assert_eq!(changes, 3);

        assert_eq!(store.find_object("b", "new").await.unwrap().unwrap().sync_state, SyncState::Sync);
        assert!(store.find_object("b", "ghost").await.unwrap().is_none());
        assert_eq!(store.find_object("b", "stale").await.unwrap().unwrap().etag, "e-stale-2");
        assert!(store.find_object("b", "doomed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_apply_task_is_aborted() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let applied = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&applied);
        let task = ApplyTask::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, SyncError>(1)
        });

        drop(task);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!applied.load(Ordering::SeqCst));

        let finished = ApplyTask::spawn(async { Ok::<_, SyncError>(2) });
        assert_eq!(finished.join().await.unwrap(), 2);
    }

    proptest! {
        #[test]
        fn prop_equal_etags_are_noops(
            ids in prop::collection::btree_set("[a-z]{1,6}", 1..20),
            dirty in any::<bool>(),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = MemoryStore::new();
                let state = if dirty { SyncState::Dirty } else { SyncState::Sync };
                let mut page = Vec::new();
                for (i, id) in ids.iter().enumerate() {
                    let local = obj(id, i as i64).with_field("side", "client").with_sync_state(state);
                    store.insert_object(&local).await.unwrap();
                    page.push(obj(id, i as i64 + 1000).with_field("side", "server"));
                }

                let before = store.query_objects("b", &ObjectQuery::all(), None).await.unwrap();
                let changes = apply_page(&store, "b", page, &PreferServer).await.unwrap();
                let after = store.query_objects("b", &ObjectQuery::all(), None).await.unwrap();

                prop_assert_eq!(changes, 0);
                prop_assert_eq!(before, after);
                Ok(())
            })?;
        }

        #[test]
        fn prop_cursor_selects_exactly_the_objects_after_last(
            stamps in prop::collection::vec((0i64..5, "[a-d]{1,2}"), 1..30),
            pick in any::<prop::sample::Index>(),
        ) {
            let mut objects: Vec<CachedObject> = stamps
                .iter()
                .map(|(at, id)| obj(id, *at))
                .collect();
            objects.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
            objects.dedup_by(|a, b| a.id == b.id && a.updated_at == b.updated_at);

            let last = objects[pick.index(objects.len())].clone();
            let query = next_page_query(&ObjectQuery::all(), &last, &SyncConfig::default());

            for o in &objects {
                let after = (o.updated_at, &o.id) > (last.updated_at, &last.id);
                prop_assert_eq!(query.matches(o), after);
            }
        }
    }
}
