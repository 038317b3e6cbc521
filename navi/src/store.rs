//! The routing document collection and its atomic conditional writes.
//!
//! The three write primitives mirror a document store's find-and-modify:
//! each one evaluates its match predicate and applies its mutation inside a
//! single critical section, which is the only synchronization the worker
//! relies on across concurrent and reordered events.

use crate::snapshot::{SnapshotError, SnapshotFile};
use crate::types::{AccessControl, DirectEntry, RoutingDocument, ShortId, Timestamp};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The upsert predicate did not match and inserting a new document
    /// collided with the unique routing key.
    #[error("duplicate key: a document for {0} already exists")]
    DuplicateKey(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// A guarded write of one `directUrls` entry.
#[derive(Clone, Debug, PartialEq)]
pub struct EntryWrite {
    pub routing_key: String,
    pub short_id: ShortId,
    pub owner_id: i64,
    pub owner_name: String,
    pub access_control: Option<AccessControl>,
    pub entry: DirectEntry,
}

#[async_trait]
pub trait RoutingStore: Send + Sync {
    /// Matches the document for `write.routing_key` whose entry at
    /// `write.short_id` is absent or has a `lastUpdated` strictly older than
    /// the new entry's, sets owner fields, access control (when given) and the
    /// entry, and returns the updated document. When no document has the
    /// routing key, one is inserted. When a document exists but the predicate
    /// fails, the insert path collides and `StoreError::DuplicateKey` is
    /// returned.
    async fn upsert_entry(&self, write: EntryWrite) -> Result<RoutingDocument, StoreError>;

    /// Matches a document whose entry at `short_id` has a `lastUpdated`
    /// strictly older than `timestamp`, whatever its routing key, removes that
    /// entry and returns the document after the removal. `None` when nothing
    /// matched. Documents are searched in routing key order.
    async fn unset_entry(
        &self,
        short_id: &str,
        timestamp: Timestamp,
    ) -> Result<Option<RoutingDocument>, StoreError>;

    /// Deletes the document for `routing_key` only if its entries are empty.
    async fn delete_if_empty(&self, routing_key: &str) -> Result<bool, StoreError>;

    async fn get(&self, routing_key: &str) -> Result<Option<RoutingDocument>, StoreError>;

    async fn list(&self) -> Result<Vec<RoutingDocument>, StoreError>;
}

type Collection = BTreeMap<String, RoutingDocument>;

pub struct DocumentStore {
    inner: Arc<Inner>,
}

struct Inner {
    documents: Mutex<Collection>,
    snapshot: Option<SnapshotFile>,
}

impl DocumentStore {
    pub fn in_memory() -> Self {
        DocumentStore {
            inner: Arc::new(Inner {
                documents: Mutex::new(BTreeMap::new()),
                snapshot: None,
            }),
        }
    }

    /// Loads the collection from `snapshot` and keeps it up to date on every
    /// mutation.
    pub fn open(snapshot: SnapshotFile) -> Result<Self, StoreError> {
        let documents: Collection = snapshot
            .load()?
            .into_iter()
            .map(|doc| (doc.routing_key.clone(), doc))
            .collect();

        tracing::info!(
            path = %snapshot.path().display(),
            documents = documents.len(),
            "loaded routing documents"
        );

        Ok(DocumentStore {
            inner: Arc::new(Inner {
                documents: Mutex::new(documents),
                snapshot: Some(snapshot),
            }),
        })
    }

    /// Runs a mutation. With a snapshot configured the mutation ends in file
    /// I/O, so it is moved to the blocking pool.
    async fn mutate<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, StoreError> + Send + 'static,
    {
        if self.inner.snapshot.is_none() {
            return op(self.inner.as_ref());
        }

        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || op(inner.as_ref()))
            .await
            .map_err(|err| StoreError::Unavailable(format!("store write task failed: {err}")))?
    }
}

impl Inner {
    /// Writes the snapshot for a mutation of `key`. If that fails the
    /// mutation is undone so memory never runs ahead of the durable copy.
    fn commit(
        &self,
        documents: &mut Collection,
        key: &str,
        previous: Option<RoutingDocument>,
    ) -> Result<(), StoreError> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };

        if let Err(err) = snapshot.store(documents.values()) {
            match previous {
                Some(doc) => documents.insert(key.to_string(), doc),
                None => documents.remove(key),
            };
            return Err(err.into());
        }
        Ok(())
    }

    fn upsert_entry(&self, write: EntryWrite) -> Result<RoutingDocument, StoreError> {
        let mut documents = self.documents.lock();
        let previous = documents.get(&write.routing_key).cloned();

        if let Some(existing) = &previous {
            let fresher = existing
                .entries
                .get(&write.short_id)
                .is_none_or(|stored| stored.last_updated < write.entry.last_updated);
            if !fresher {
                return Err(StoreError::DuplicateKey(write.routing_key));
            }
        }

        let doc = documents
            .entry(write.routing_key.clone())
            .or_insert_with(|| RoutingDocument {
                routing_key: write.routing_key.clone(),
                owner_id: write.owner_id,
                owner_name: write.owner_name.clone(),
                access_control: None,
                entries: BTreeMap::new(),
            });

        doc.owner_id = write.owner_id;
        doc.owner_name = write.owner_name;
        if let Some(access_control) = write.access_control {
            doc.access_control = Some(access_control);
        }
        doc.entries.insert(write.short_id, write.entry);
        let updated = doc.clone();

        self.commit(&mut documents, &write.routing_key, previous)?;
        Ok(updated)
    }

    fn unset_entry(
        &self,
        short_id: &str,
        timestamp: Timestamp,
    ) -> Result<Option<RoutingDocument>, StoreError> {
        let mut documents = self.documents.lock();

        let Some(doc) = documents.values_mut().find(|doc| {
            doc.entries
                .get(short_id)
                .is_some_and(|stored| stored.last_updated < timestamp)
        }) else {
            return Ok(None);
        };

        let previous = doc.clone();
        doc.entries.remove(short_id);
        let updated = doc.clone();

        self.commit(&mut documents, &updated.routing_key, Some(previous))?;
        Ok(Some(updated))
    }

    fn delete_if_empty(&self, routing_key: &str) -> Result<bool, StoreError> {
        let mut documents = self.documents.lock();

        if !documents
            .get(routing_key)
            .is_some_and(|doc| doc.entries.is_empty())
        {
            return Ok(false);
        }

        let previous = documents.remove(routing_key);
        self.commit(&mut documents, routing_key, previous)?;
        Ok(true)
    }
}

#[async_trait]
impl RoutingStore for DocumentStore {
    async fn upsert_entry(&self, write: EntryWrite) -> Result<RoutingDocument, StoreError> {
        self.mutate(move |inner| inner.upsert_entry(write)).await
    }

    async fn unset_entry(
        &self,
        short_id: &str,
        timestamp: Timestamp,
    ) -> Result<Option<RoutingDocument>, StoreError> {
        let short_id = short_id.to_string();
        self.mutate(move |inner| inner.unset_entry(&short_id, timestamp))
            .await
    }

    async fn delete_if_empty(&self, routing_key: &str) -> Result<bool, StoreError> {
        let routing_key = routing_key.to_string();
        self.mutate(move |inner| inner.delete_if_empty(&routing_key))
            .await
    }

    async fn get(&self, routing_key: &str) -> Result<Option<RoutingDocument>, StoreError> {
        Ok(self.inner.documents.lock().get(routing_key).cloned())
    }

    async fn list(&self) -> Result<Vec<RoutingDocument>, StoreError> {
        Ok(self.inner.documents.lock().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Compression;
    use crate::testutils::entry;

    fn write(routing_key: &str, short_id: &str, last_updated: Timestamp) -> EntryWrite {
        EntryWrite {
            routing_key: routing_key.into(),
            short_id: short_id.into(),
            owner_id: 1234,
            owner_name: "Myztiq".into(),
            access_control: None,
            entry: entry(last_updated),
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_document() {
        let store = DocumentStore::in_memory();
        let doc = store.upsert_entry(write("api.example.com", "m1", 1000)).await.unwrap();

        assert_eq!(doc.routing_key, "api.example.com");
        assert_eq!(doc.owner_id, 1234);
        assert_eq!(doc.entries["m1"].last_updated, 1000);
        assert_eq!(store.get("api.example.com").await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn test_upsert_guard() {
        let store = DocumentStore::in_memory();
        store.upsert_entry(write("api.example.com", "m1", 1000)).await.unwrap();

        // Older and equal timestamps lose the race.
        for ts in [500, 1000] {
            let err = store
                .upsert_entry(write("api.example.com", "m1", ts))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::DuplicateKey(_)));
        }

        // A different entry in the same document is independent.
        let doc = store.upsert_entry(write("api.example.com", "c2", 10)).await.unwrap();
        assert_eq!(doc.entries.len(), 2);

        let doc = store.upsert_entry(write("api.example.com", "m1", 2000)).await.unwrap();
        assert_eq!(doc.entries["m1"].last_updated, 2000);
        assert_eq!(doc.entries["c2"].last_updated, 10);
    }

    #[tokio::test]
    async fn test_upsert_owner_and_access_control() {
        let store = DocumentStore::in_memory();
        let mut first = write("api.example.com", "m1", 1);
        first.access_control = Some(AccessControl { enabled: true });
        store.upsert_entry(first).await.unwrap();

        // Owner fields are last-writer-wins, access control is only touched
        // when provided.
        let mut second = write("api.example.com", "c2", 2);
        second.owner_name = "someone-else".into();
        let doc = store.upsert_entry(second).await.unwrap();
        assert_eq!(doc.owner_name, "someone-else");
        assert_eq!(doc.access_control, Some(AccessControl { enabled: true }));
    }

    #[tokio::test]
    async fn test_unset_entry() {
        let store = DocumentStore::in_memory();
        store.upsert_entry(write("api.example.com", "m1", 1000)).await.unwrap();
        store.upsert_entry(write("api.example.com", "c2", 1000)).await.unwrap();

        // Stale delete does not match.
        assert_eq!(store.unset_entry("m1", 1000).await.unwrap(), None);
        assert_eq!(store.unset_entry("m1", 999).await.unwrap(), None);
        assert_eq!(store.unset_entry("missing", 5000).await.unwrap(), None);

        let doc = store.unset_entry("m1", 1001).await.unwrap().unwrap();
        assert_eq!(doc.routing_key, "api.example.com");
        assert_eq!(doc.entries.keys().collect::<Vec<_>>(), vec!["c2"]);
        assert_eq!(store.get("api.example.com").await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn test_unset_entry_searches_every_document() {
        let store = DocumentStore::in_memory();
        store.upsert_entry(write("api.example.com", "a1", 1000)).await.unwrap();
        store.upsert_entry(write("web.example.com", "w1", 1000)).await.unwrap();

        let doc = store.unset_entry("w1", 2000).await.unwrap().unwrap();
        assert_eq!(doc.routing_key, "web.example.com");
        assert!(doc.entries.is_empty());
        assert_eq!(
            store.get("api.example.com").await.unwrap().unwrap().entries.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_delete_if_empty() {
        let store = DocumentStore::in_memory();
        store.upsert_entry(write("api.example.com", "m1", 1000)).await.unwrap();

        assert!(!store.delete_if_empty("api.example.com").await.unwrap());
        assert!(!store.delete_if_empty("unknown.example.com").await.unwrap());

        store.unset_entry("m1", 2000).await.unwrap();
        assert!(store.delete_if_empty("api.example.com").await.unwrap());
        assert_eq!(store.get("api.example.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_snapshot_persists_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let base_dir = dir.path().to_str().unwrap();

        let store =
            DocumentStore::open(SnapshotFile::new(base_dir, "routes", Compression::Zstd1)).unwrap();
        store.upsert_entry(write("api.example.com", "m1", 1000)).await.unwrap();
        store.upsert_entry(write("web.example.com", "w1", 1000)).await.unwrap();
        store.unset_entry("w1", 2000).await.unwrap();
        store.delete_if_empty("web.example.com").await.unwrap();
        drop(store);

        let reopened =
            DocumentStore::open(SnapshotFile::new(base_dir, "routes", Compression::Zstd1)).unwrap();
        let documents = reopened.list().await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].routing_key, "api.example.com");
        assert_eq!(documents[0].entries["m1"].last_updated, 1000);
    }

    #[tokio::test]
    async fn test_failed_snapshot_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing_dir = dir.path().join("missing");
        let store = DocumentStore::open(SnapshotFile::new(
            missing_dir.to_str().unwrap(),
            "routes",
            Compression::None,
        ))
        .unwrap();

        let err = store
            .upsert_entry(write("api.example.com", "m1", 1000))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Snapshot(_)));
        assert_eq!(store.get("api.example.com").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_keep_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            DocumentStore::open(SnapshotFile::new(
                dir.path().to_str().unwrap(),
                "routes",
                Compression::Zstd1,
            ))
            .unwrap(),
        );

        // 37 is coprime with 50, so this visits every timestamp once out of
        // order.
        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let store = store.clone();
                let ts = (i * 37) % 50 + 1;
                tokio::spawn(async move {
                    store
                        .upsert_entry(write("api.example.com", "m1", ts))
                        .await
                })
            })
            .collect();

        for task in tasks {
            match task.await.unwrap() {
                Ok(_) | Err(StoreError::DuplicateKey(_)) => {}
                Err(err) => panic!("unexpected store error: {err}"),
            }
        }

        let doc = store.get("api.example.com").await.unwrap().unwrap();
        assert_eq!(doc.entries["m1"].last_updated, 50);

        let reopened = DocumentStore::open(SnapshotFile::new(
            dir.path().to_str().unwrap(),
            "routes",
            Compression::Zstd1,
        ))
        .unwrap();
        assert_eq!(reopened.get("api.example.com").await.unwrap(), Some(doc));
    }
}
