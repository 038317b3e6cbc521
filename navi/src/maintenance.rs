//! Offline repair of the routing collection.

use crate::metrics_defs::DOCUMENTS_REMOVED;
use crate::publisher::Publisher;
use crate::store::{RoutingStore, StoreError};
use shared::counter;

/// Removes routing documents left without entries, which happens when the
/// cleanup after a delete event failed. Returns the affected routing keys;
/// with `dry_run` nothing is modified.
///
/// Removal goes through the same guarded delete as the worker, so a document
/// that gained an entry in the meantime is kept.
pub async fn prune_empty(
    store: &dyn RoutingStore,
    publisher: &dyn Publisher,
    dry_run: bool,
) -> Result<Vec<String>, StoreError> {
    let empty: Vec<String> = store
        .list()
        .await?
        .into_iter()
        .filter(|doc| doc.entries.is_empty())
        .map(|doc| doc.routing_key)
        .collect();

    if dry_run {
        return Ok(empty);
    }

    let mut removed = Vec::with_capacity(empty.len());
    for routing_key in empty {
        if !store.delete_if_empty(&routing_key).await? {
            tracing::info!(elastic_url = %routing_key, "document is no longer empty, skipping");
            continue;
        }
        counter!(DOCUMENTS_REMOVED).increment(1);

        if let Err(err) = publisher.publish_cache_invalidated(&routing_key).await {
            tracing::error!(
                elastic_url = %routing_key,
                error = %err,
                "failed to publish cache invalidation"
            );
        }
        removed.push(routing_key);
    }

    Ok(removed)
}
