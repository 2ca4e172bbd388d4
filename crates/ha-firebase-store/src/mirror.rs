//! State mirror: `state_changed` events to `homeassistant/<entity_id>`

use ha_core::events::StateChangedData;
use ha_core::{State, STATE_UNAVAILABLE, STATE_UNKNOWN};
use ha_document_store::{DocumentStore, StoreResult};
use ha_entity_filter::EntityFilter;
use std::sync::Arc;
use tracing::{debug, trace};

/// Collection holding one document per mirrored entity
pub const MIRROR_COLLECTION: &str = "homeassistant";

pub struct StateMirror {
    filter: EntityFilter,
    store: Arc<dyn DocumentStore>,
}

impl StateMirror {
    pub fn new(filter: EntityFilter, store: Arc<dyn DocumentStore>) -> Self {
        Self { filter, store }
    }

    /// The state to mirror for an event, or `None` if it is skipped
    ///
    /// Removals, `unknown`, `unavailable` and empty states are never
    /// written, nor are entities the filter rejects.
    pub fn evaluate(&self, data: &StateChangedData) -> Option<State> {
        let Some(state) = &data.new_state else {
            trace!(entity_id = %data.entity_id, "Entity removed");
            return None;
        };

        if matches!(state.state.as_str(), "" | STATE_UNKNOWN | STATE_UNAVAILABLE) {
            trace!(entity_id = %data.entity_id, state = %state.state, "Skipping placeholder state");
            return None;
        }

        if !self.filter.matches(&data.entity_id.to_string()) {
            trace!(entity_id = %data.entity_id, "Filtered out");
            return None;
        }

        Some(state.clone())
    }

    /// Overwrite the entity's document with the state's dictionary form
    pub async fn write(&self, state: &State) -> StoreResult<()> {
        let id = state.entity_id.to_string();
        self.store
            .set_document(MIRROR_COLLECTION, &id, state.as_dict())
            .await?;
        debug!(entity_id = %id, state = %state.state, "Mirrored state");
        Ok(())
    }

    /// Evaluate and write; returns whether a document was written
    pub async fn handle(&self, data: &StateChangedData) -> StoreResult<bool> {
        match self.evaluate(data) {
            Some(state) => self.write(&state).await.map(|()| true),
            None => Ok(false),
        }
    }
}
