//! Applying a resolver's decision to the cache.

use offsync_core::{CachedObject, ConflictResolver, Resolution, SyncState};
use offsync_store::ObjectCache;

use crate::error::{Result, SyncError};

/// Resolve a divergence between `server` and a locally edited `client`
/// copy of the same object, and write the result to `cache`.
///
/// - Server wins: the local copy becomes the server copy (`Sync`), or is
///   removed if the server copy is a tombstone.
/// - Client wins: the local content stays, adopting the server's etag so
///   the next push carries the right precondition. It stays `Dirty`.
///
/// A resolver that returns anything other than one of its two arguments
/// fails with [`SyncError::ContractViolation`] before the cache is touched.
pub async fn handle_conflict<C>(
    cache: &C,
    server: &CachedObject,
    client: &CachedObject,
    resolver: &dyn ConflictResolver,
) -> Result<Resolution>
where
    C: ObjectCache + ?Sized,
{
    let Some(resolution) = Resolution::of(resolver, server, client) else {
        tracing::warn!(
            bucket = %client.bucket,
            id = %client.id,
            "conflict resolver returned neither the server nor the client copy"
        );
        return Err(SyncError::ContractViolation(format!(
            "resolver for {}/{} must return the server or the client copy",
            client.bucket, client.id
        )));
    };

    match resolution {
        Resolution::Server if server.deleted => {
            cache.delete_object(client).await?;
        }
        Resolution::Server => {
            cache.update_object(server, SyncState::Sync).await?;
        }
        Resolution::Client => {
            let kept = CachedObject {
                etag: server.etag.clone(),
                ..client.clone()
            };
            cache.update_object(&kept, SyncState::Dirty).await?;
        }
    }

    tracing::debug!(
        bucket = %client.bucket,
        id = %client.id,
        ?resolution,
        "resolved conflict"
    );
    Ok(resolution)
}
