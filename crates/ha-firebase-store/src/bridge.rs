//! Command bridge: watched document changes to service calls
//!
//! Every added or modified document in the watched collection names an
//! entity by its id. The bridge calls the configured service for each of
//! them, then clears their `state` field once the whole batch has been
//! called.

use ha_core::ServiceCall;
use ha_document_store::{ChangeKind, DocumentStore, Snapshot, SnapshotWatch};
use ha_remote::ServiceCaller;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

use crate::config::ServiceTarget;
use crate::error::BridgeError;

/// Field cleared on each document after its service call
pub const TRIGGER_FIELD: &str = "state";

/// What one batch did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Document ids that were called and then cleared, in batch order
    pub triggered: Vec<String>,
    /// Changes ignored: removals, and unmarked documents when a marker is required
    pub ignored: usize,
}

pub struct CommandBridge {
    caller: Arc<dyn ServiceCaller>,
    store: Arc<dyn DocumentStore>,
    collection: String,
    target: ServiceTarget,
    require_marker: bool,
}

impl CommandBridge {
    pub fn new(
        caller: Arc<dyn ServiceCaller>,
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        target: ServiceTarget,
    ) -> Self {
        Self {
            caller,
            store,
            collection: collection.into(),
            target,
            require_marker: false,
        }
    }

    /// Skip documents without a `state` field
    ///
    /// Clearing the field is itself a modification, so without a marker
    /// every trigger is seen a second time by the next batch.
    pub fn with_require_marker(mut self, require_marker: bool) -> Self {
        self.require_marker = require_marker;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Call the service for each added or modified document, then clear them
    ///
    /// Stops at the first failure; documents called before it stay uncleared.
    pub async fn handle_snapshot(&self, snapshot: &Snapshot) -> Result<BatchReport, BridgeError> {
        let mut report = BatchReport::default();

        for change in &snapshot.changes {
            let id = &change.document.id;
            match change.kind {
                ChangeKind::Removed => {
                    trace!(entity_id = %id, "Ignoring removed document");
                    report.ignored += 1;
                    continue;
                }
                ChangeKind::Added | ChangeKind::Modified => {}
            }

            if self.require_marker && change.document.get(TRIGGER_FIELD).is_none() {
                trace!(entity_id = %id, "Ignoring document without trigger marker");
                report.ignored += 1;
                continue;
            }

            let call = ServiceCall::for_entity(&self.target.domain, &self.target.service, id);
            self.caller
                .call_service(&call)
                .await
                .map_err(|source| BridgeError::Call {
                    entity_id: id.clone(),
                    source,
                })?;
            debug!(entity_id = %id, service = %self.target, "Triggered");
            report.triggered.push(id.clone());
        }

        for id in &report.triggered {
            self.store
                .delete_field(&self.collection, id, TRIGGER_FIELD)
                .await
                .map_err(|source| BridgeError::Clear {
                    entity_id: id.clone(),
                    source,
                })?;
        }

        if !report.triggered.is_empty() {
            info!(
                collection = %self.collection,
                count = report.triggered.len(),
                service = %self.target,
                "Handled trigger batch"
            );
        }
        Ok(report)
    }

    /// Handle batches until the watch ends; failed batches are logged
    pub async fn run(self, mut watch: SnapshotWatch) {
        while let Some(snapshot) = watch.next().await {
            if let Err(e) = self.handle_snapshot(&snapshot).await {
                error!(collection = %self.collection, error = %e, "Trigger batch failed");
            }
        }
        debug!(collection = %self.collection, "Command bridge stopped");
    }
}
