//! Document store abstraction used by the Firebase bridge
//!
//! A [`DocumentStore`] addresses documents by collection and id, stores
//! them as JSON field maps and can watch a collection, delivering batches
//! of [`DocumentChange`]s the way Firestore's snapshot listeners do: the
//! first [`Snapshot`] reports every existing document as
//! [`ChangeKind::Added`], later ones report what changed since.
//!
//! Two implementations are provided:
//!
//! - [`MemoryDocumentStore`] keeps everything in process
//! - [`FirestoreStore`] talks to Cloud Firestore over its REST API

mod error;
pub mod firestore;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use error::{StoreError, StoreResult};
pub use firestore::{FirestoreStore, ServiceAccount};
pub use memory::MemoryDocumentStore;

/// Top-level fields of a document
pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
    /// Server-side write time, when the backend tracks one
    pub update_time: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
            update_time: None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    /// The document after the change, or the last known version if removed
    pub document: Document,
}

/// One delivery from a collection watch
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub changes: Vec<DocumentChange>,
    pub read_time: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(changes: Vec<DocumentChange>) -> Self {
        Self {
            changes,
            read_time: Utc::now(),
        }
    }
}

/// Live subscription to a collection
///
/// Dropping the watch stops the background task feeding it, if any.
pub struct SnapshotWatch {
    rx: mpsc::UnboundedReceiver<Snapshot>,
    task: Option<JoinHandle<()>>,
}

impl SnapshotWatch {
    pub fn new(rx: mpsc::UnboundedReceiver<Snapshot>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Wait for the next batch; `None` once the store stops delivering
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }
}

impl Drop for SnapshotWatch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or fully overwrite a document
    async fn set_document(&self, collection: &str, id: &str, fields: Fields) -> StoreResult<()>;

    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Remove one field from an existing document
    ///
    /// Fails with [`StoreError::NotFound`] if the document does not exist.
    async fn delete_field(&self, collection: &str, id: &str, field: &str) -> StoreResult<()>;

    async fn delete_document(&self, collection: &str, id: &str) -> StoreResult<()>;

    async fn watch(&self, collection: &str) -> StoreResult<SnapshotWatch>;
}
