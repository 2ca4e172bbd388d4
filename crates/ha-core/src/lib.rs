//! Core types shared by the Firebase bridge crates
//!
//! The shapes here mirror what Home Assistant puts on its event bus and
//! its websocket API: entity ids, states, events, contexts and service
//! calls. Everything serializes to the same JSON Home Assistant emits so
//! events received over the wire can be deserialized directly.

mod context;
mod entity_id;
mod event;
mod service_call;
mod state;

pub use context::Context;
pub use entity_id::{EntityId, EntityIdError};
pub use event::{Event, EventData, EventOrigin, EventType};
pub use service_call::ServiceCall;
pub use state::State;

/// State value reported when an integration does not know the value
pub const STATE_UNKNOWN: &str = "unknown";

/// State value reported when an entity cannot be reached
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Well-known event types and their payloads
pub mod events {
    use super::*;

    /// Fired whenever an entity's state is set or removed
    pub const STATE_CHANGED: &str = "state_changed";

    /// Payload of a `state_changed` event
    ///
    /// `new_state` is `None` when the entity was removed.
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        #[serde(default)]
        pub old_state: Option<State>,
        #[serde(default)]
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }
}
