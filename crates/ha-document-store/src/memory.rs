//! In-process document store

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{
    ChangeKind, Document, DocumentChange, DocumentStore, Fields, Snapshot, SnapshotWatch,
    StoreError, StoreResult,
};

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Document>>,
    watchers: HashMap<String, Vec<mpsc::UnboundedSender<Snapshot>>>,
}

impl Inner {
    fn notify(&mut self, collection: &str, change: DocumentChange) {
        if let Some(watchers) = self.watchers.get_mut(collection) {
            let snapshot = Snapshot::new(vec![change]);
            watchers.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
    }
}

/// Document store held in memory
///
/// Watches are notified synchronously as part of each write, one change
/// per snapshot. Writes that leave a document unchanged notify nobody.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All documents of a collection, ordered by id
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock()
            .collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of documents in a collection
    pub fn document_count(&self, collection: &str) -> usize {
        self.lock()
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn set_document(&self, collection: &str, id: &str, fields: Fields) -> StoreResult<()> {
        let mut inner = self.lock();
        let docs = inner.collections.entry(collection.to_string()).or_default();

        let kind = match docs.get(id) {
            Some(existing) if existing.fields == fields => {
                trace!(collection, id, "Unchanged document write");
                return Ok(());
            }
            Some(_) => ChangeKind::Modified,
            None => ChangeKind::Added,
        };

        let document = Document {
            id: id.to_string(),
            fields,
            update_time: Some(Utc::now()),
        };
        docs.insert(id.to_string(), document.clone());
        debug!(collection, id, ?kind, "Stored document");

        inner.notify(collection, DocumentChange { kind, document });
        Ok(())
    }

    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        Ok(self
            .lock()
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn delete_field(&self, collection: &str, id: &str, field: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let document = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        if document.fields.remove(field).is_none() {
            return Ok(());
        }
        document.update_time = Some(Utc::now());
        let document = document.clone();
        debug!(collection, id, field, "Deleted field");

        inner.notify(
            collection,
            DocumentChange {
                kind: ChangeKind::Modified,
                document,
            },
        );
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id));

        if let Some(document) = removed {
            debug!(collection, id, "Deleted document");
            inner.notify(
                collection,
                DocumentChange {
                    kind: ChangeKind::Removed,
                    document,
                },
            );
        }
        Ok(())
    }

    async fn watch(&self, collection: &str) -> StoreResult<SnapshotWatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();

        let initial: Vec<DocumentChange> = inner
            .collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .cloned()
                    .map(|document| DocumentChange {
                        kind: ChangeKind::Added,
                        document,
                    })
                    .collect()
            })
            .unwrap_or_default();

        // The receiver is alive, so this cannot fail.
        let _ = tx.send(Snapshot::new(initial));
        inner
            .watchers
            .entry(collection.to_string())
            .or_default()
            .push(tx);

        Ok(SnapshotWatch::new(rx, None))
    }
}
