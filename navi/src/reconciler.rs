//! Applies instance updates and deletes to the routing documents.
//!
//! Events for the same instance may be duplicated or arrive out of order. Each
//! entry's `lastUpdated` only ever moves forward: an update lands only when it
//! is newer than the stored entry, and a delete only removes an entry older
//! than itself. Both checks happen inside the store's conditional writes.

use crate::api::InstanceApi;
use crate::errors::{Result, TaskError};
use crate::metrics_defs::{
    CLEANUP_FAILURES, DOCUMENTS_REMOVED, INVALIDATIONS_FAILED, INVALIDATIONS_PUBLISHED,
    STALE_WRITES,
};
use crate::projector;
use crate::publisher::Publisher;
use crate::resolver::resolve_short_id;
use crate::store::{EntryWrite, RoutingStore, StoreError};
use crate::types::{AccessControl, InstanceDescriptor, Timestamp};
use shared::counter;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// The entry was written and the document for `routing_key` changed.
    Updated { routing_key: String },
    /// The entry was removed. `document_deleted` is set when it was the last
    /// one and the document itself went away.
    Removed {
        routing_key: String,
        document_deleted: bool,
    },
    /// Nothing matched; a newer write already superseded this event.
    Unchanged,
}

impl Outcome {
    pub fn routing_key(&self) -> Option<&str> {
        match self {
            Outcome::Updated { routing_key } | Outcome::Removed { routing_key, .. } => {
                Some(routing_key)
            }
            Outcome::Unchanged => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Updated { .. } => "updated",
            Outcome::Removed { .. } => "removed",
            Outcome::Unchanged => "unchanged",
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn RoutingStore>,
    api: Arc<dyn InstanceApi>,
    publisher: Arc<dyn Publisher>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RoutingStore>,
        api: Arc<dyn InstanceApi>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Reconciler {
            store,
            api,
            publisher,
        }
    }

    pub async fn apply_update(
        &self,
        instance: InstanceDescriptor,
        timestamp: Timestamp,
    ) -> Result<Outcome> {
        let handle = self.api.new_instance(instance);
        let short_id = resolve_short_id(&handle.attrs)?;
        let routing_key = handle.elastic_hostname();

        let entry = projector::project(self.api.as_ref(), &handle, timestamp).await?;

        let attrs = &handle.attrs;
        let write = EntryWrite {
            routing_key: routing_key.clone(),
            short_id: short_id.clone(),
            owner_id: attrs.owner.id,
            owner_name: attrs.owner.username.clone(),
            access_control: attrs.is_isolation_group_master.then(|| AccessControl {
                enabled: attrs.access_control_enabled(),
            }),
            entry,
        };

        match self.store.upsert_entry(write).await {
            Ok(_) => {}
            Err(StoreError::DuplicateKey(_)) => {
                counter!(STALE_WRITES).increment(1);
                tracing::info!(
                    elastic_url = %routing_key,
                    short_hash = %short_id,
                    timestamp,
                    "update is older than the stored entry"
                );
                return Err(TaskError::StaleUpdate { routing_key });
            }
            Err(err) => return Err(err.into()),
        }

        tracing::debug!(elastic_url = %routing_key, short_hash = %short_id, timestamp, "entry updated");
        self.invalidate(routing_key.clone());
        Ok(Outcome::Updated { routing_key })
    }

    pub async fn apply_delete(
        &self,
        instance: InstanceDescriptor,
        timestamp: Timestamp,
    ) -> Result<Outcome> {
        let handle = self.api.new_instance(instance);
        let short_id = resolve_short_id(&handle.attrs)?;

        // The entry is found by short id alone: the routing key derived from
        // this event may differ from the one the entry was stored under.
        let Some(doc) = self.store.unset_entry(&short_id, timestamp).await? else {
            tracing::info!(
                short_hash = %short_id,
                timestamp,
                "no entry older than the delete event"
            );
            return Ok(Outcome::Unchanged);
        };

        let document_deleted = match doc.entries.is_empty() {
            true => self.remove_empty(&doc.routing_key).await,
            false => false,
        };

        self.invalidate(doc.routing_key.clone());

        Ok(Outcome::Removed {
            routing_key: doc.routing_key,
            document_deleted,
        })
    }

    /// Deletes a document whose last entry was just removed. A failure is not
    /// returned to the caller: the entry removal is already durable, so a
    /// redelivered event would match nothing and could not finish the
    /// cleanup. `link prune-empty` removes what is left behind.
    async fn remove_empty(&self, routing_key: &str) -> bool {
        match self.store.delete_if_empty(routing_key).await {
            Ok(true) => {
                counter!(DOCUMENTS_REMOVED).increment(1);
                tracing::info!(elastic_url = %routing_key, "removed empty routing document");
                true
            }
            Ok(false) => false,
            Err(err) => {
                counter!(CLEANUP_FAILURES).increment(1);
                tracing::error!(
                    elastic_url = %routing_key,
                    error = %err,
                    "failed to remove empty routing document"
                );
                false
            }
        }
    }

    /// Publishes in the background; a lost notification only degrades the
    /// cache and never fails the event.
    fn invalidate(&self, routing_key: String) {
        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            match publisher.publish_cache_invalidated(&routing_key).await {
                Ok(()) => counter!(INVALIDATIONS_PUBLISHED).increment(1),
                Err(err) => {
                    counter!(INVALIDATIONS_FAILED).increment(1);
                    tracing::error!(
                        elastic_url = %routing_key,
                        error = %err,
                        "failed to publish cache invalidation"
                    );
                }
            }
        });
    }
}
