//! Collection watching by periodic listing
//!
//! The REST API has no streaming listener, so a watch lists the
//! collection every poll interval and diffs the result against the
//! previous listing by document id and `updateTime`.

use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use super::FirestoreStore;
use crate::{ChangeKind, Document, DocumentChange, Snapshot};

/// Changes that turn `known` into `current`
///
/// Added and modified documents come first in id order, then removals.
pub(crate) fn diff(
    known: &BTreeMap<String, Document>,
    current: &BTreeMap<String, Document>,
) -> Vec<DocumentChange> {
    let mut changes = Vec::new();

    for (id, document) in current {
        let kind = match known.get(id) {
            None => ChangeKind::Added,
            Some(previous)
                if previous.update_time != document.update_time
                    || previous.fields != document.fields =>
            {
                ChangeKind::Modified
            }
            Some(_) => continue,
        };
        changes.push(DocumentChange {
            kind,
            document: document.clone(),
        });
    }

    for (id, document) in known {
        if !current.contains_key(id) {
            changes.push(DocumentChange {
                kind: ChangeKind::Removed,
                document: document.clone(),
            });
        }
    }

    changes
}

pub(crate) async fn poll(
    store: FirestoreStore,
    collection: String,
    tx: mpsc::UnboundedSender<Snapshot>,
) {
    let mut known: Option<BTreeMap<String, Document>> = None;
    let mut ticker = tokio::time::interval(store.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !tx.is_closed() {
        ticker.tick().await;

        let current: BTreeMap<String, Document> = match store.list_documents(&collection).await
        {
            Ok(documents) => documents.into_iter().map(|d| (d.id.clone(), d)).collect(),
            Err(e) => {
                warn!(collection = %collection, error = %e, "Failed to list watched collection");
                continue;
            }
        };

        let (first, changes) = match &known {
            None => (true, diff(&BTreeMap::new(), &current)),
            Some(previous) => (false, diff(previous, &current)),
        };
        known = Some(current);

        if !first && changes.is_empty() {
            trace!(collection = %collection, "No changes");
            continue;
        }

        debug!(collection = %collection, changes = changes.len(), "Delivering snapshot");
        if tx.send(Snapshot::new(changes)).is_err() {
            break;
        }
    }

    debug!(collection = %collection, "Watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn doc(id: &str, state: &str, second: u32) -> (String, Document) {
        (
            id.to_string(),
            Document {
                id: id.to_string(),
                fields: json!({"state": state}).as_object().cloned().unwrap(),
                update_time: Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, second).unwrap()),
            },
        )
    }

    #[test]
    fn test_first_listing_is_all_added() {
        let current: BTreeMap<_, _> = [doc("light.b", "on", 0), doc("light.a", "on", 0)].into();
        let changes = diff(&BTreeMap::new(), &current);

        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.kind == ChangeKind::Added));
        assert_eq!(changes[0].document.id, "light.a");
    }

    #[test]
    fn test_detects_modified_and_removed() {
        let known: BTreeMap<_, _> = [
            doc("light.a", "on", 0),
            doc("light.b", "on", 0),
            doc("light.c", "on", 0),
        ]
        .into();
        let current: BTreeMap<_, _> = [
            doc("light.a", "on", 0),
            doc("light.b", "off", 5),
            doc("light.d", "on", 5),
        ]
        .into();

        let changes: Vec<(ChangeKind, String)> = diff(&known, &current)
            .into_iter()
            .map(|c| (c.kind, c.document.id))
            .collect();

        assert_eq!(
            changes,
            vec![
                (ChangeKind::Modified, "light.b".to_string()),
                (ChangeKind::Added, "light.d".to_string()),
                (ChangeKind::Removed, "light.c".to_string()),
            ]
        );
    }

    #[test]
    fn test_touch_without_field_change_is_modified() {
        let known: BTreeMap<_, _> = [doc("light.a", "on", 0)].into();
        let current: BTreeMap<_, _> = [doc("light.a", "on", 1)].into();
        assert_eq!(diff(&known, &current)[0].kind, ChangeKind::Modified);
    }
}
