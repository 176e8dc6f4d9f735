//! Sync orchestration.

use std::collections::BTreeMap;
use std::sync::Arc;

use offsync_core::{ConflictResolver, PreferServer, Timestamp};
use offsync_store::{MetadataStore, ObjectCache};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::gate::ConcurrencyGate;
use crate::remote::{BatchExecutor, QueryExecutor};
use crate::report::SyncReport;

/// Runs pull and push for configured buckets.
///
/// Every collaborator is injected: the object cache, the metadata store,
/// the remote and the gate shared with whatever performs local CRUD.
pub struct SyncManager<C, M, R> {
    pub(crate) cache: Arc<C>,
    pub(crate) metadata: Arc<M>,
    pub(crate) remote: Arc<R>,
    pub(crate) gate: Arc<ConcurrencyGate>,
    pub(crate) config: SyncConfig,
}

impl<C, M, R> SyncManager<C, M, R>
where
    C: ObjectCache + 'static,
    M: MetadataStore,
    R: QueryExecutor + BatchExecutor,
{
    /// Create a manager. Fails if `config` is invalid.
    pub fn new(
        cache: Arc<C>,
        metadata: Arc<M>,
        remote: Arc<R>,
        gate: Arc<ConcurrencyGate>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cache,
            metadata,
            remote,
            gate,
            config,
        })
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Synchronize one bucket: pull within its sync scope, then push local
    /// changes.
    ///
    /// Fails with [`SyncError::Locked`] without touching the cache or the
    /// remote if the gate is held. Otherwise waits for in-flight CRUD to
    /// drain first. The gate is released on every outcome. Conflicts use
    /// [`PreferServer`] unless a resolver is given.
    pub async fn sync_bucket(
        &self,
        bucket: &str,
        resolver: Option<Arc<dyn ConflictResolver>>,
    ) -> Result<SyncReport> {
        if bucket.trim().is_empty() {
            return Err(SyncError::InvalidBucket(bucket.to_string()));
        }

        let Some(_guard) = self.gate.sync_guard().await else {
            tracing::warn!(bucket, "sync rejected, gate is held");
            return Err(SyncError::Locked);
        };

        let scope = self
            .metadata
            .get_sync_scope(bucket)
            .await?
            .ok_or_else(|| SyncError::ScopeNotConfigured(bucket.to_string()))?;

        let resolver = resolver.unwrap_or_else(|| Arc::new(PreferServer) as Arc<dyn ConflictResolver>);

        tracing::info!(bucket, "sync started");

        let pulled = self.pull(bucket, &scope, Arc::clone(&resolver)).await?;
        let outcomes = self.push(bucket, resolver).await?;
        self.metadata.set_last_sync_time(bucket, Timestamp::now()).await?;

        let report = SyncReport {
            bucket: bucket.to_string(),
            pulled,
            outcomes,
        };

        tracing::info!(
            bucket,
            pulled = report.pulled,
            pushed = report.pushed(),
            failed = report.failures().count(),
            "sync finished"
        );
        Ok(report)
    }

    /// Synchronize every bucket with a configured scope.
    ///
    /// Buckets run one after another. A bucket's failure is recorded and
    /// the rest still run, except [`SyncError::Locked`], which stops the
    /// pass.
    pub async fn sync_all(
        &self,
        resolver: Option<Arc<dyn ConflictResolver>>,
    ) -> Result<BTreeMap<String, Result<SyncReport>>> {
        let scopes = self.metadata.all_sync_scopes().await?;
        let mut results = BTreeMap::new();

        for bucket in scopes.into_keys() {
            match self.sync_bucket(&bucket, resolver.clone()).await {
                Err(SyncError::Locked) => return Err(SyncError::Locked),
                result => {
                    results.insert(bucket, result);
                }
            }
        }

        Ok(results)
    }
}
