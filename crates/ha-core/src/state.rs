//! Entity state snapshots

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{Context, EntityId, STATE_UNAVAILABLE, STATE_UNKNOWN};

/// The state of one entity at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub entity_id: EntityId,

    /// The status string, e.g. "on", "23.5" or "unavailable"
    pub state: String,

    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    pub last_changed: DateTime<Utc>,

    pub last_updated: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reported: Option<DateTime<Utc>>,

    pub context: Context,
}

impl State {
    /// Create a state stamped with the current time
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: now,
            last_updated: now,
            last_reported: Some(now),
            context,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNAVAILABLE
    }

    pub fn is_unknown(&self) -> bool {
        self.state == STATE_UNKNOWN
    }

    /// The dictionary form Home Assistant produces for a state
    ///
    /// Timestamps are ISO-8601 strings with microsecond precision and an
    /// explicit `+00:00` offset. `last_reported` falls back to
    /// `last_updated` when the source did not carry one.
    pub fn as_dict(&self) -> serde_json::Map<String, serde_json::Value> {
        [
            ("entity_id", json!(self.entity_id.to_string())),
            ("state", json!(self.state)),
            ("attributes", json!(self.attributes)),
            ("last_changed", json!(isoformat(&self.last_changed))),
            (
                "last_reported",
                json!(isoformat(&self.last_reported.unwrap_or(self.last_updated))),
            ),
            ("last_updated", json!(isoformat(&self.last_updated))),
            ("context", self.context.as_dict()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
    }

    /// Read an attribute as a typed value
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

// Whole seconds carry no fraction, matching Home Assistant's own timestamps.
fn isoformat(ts: &DateTime<Utc>) -> String {
    if ts.timestamp_subsec_micros() == 0 {
        ts.to_rfc3339_opts(SecondsFormat::Secs, false)
    } else {
        ts.to_rfc3339_opts(SecondsFormat::Micros, false)
    }
}

impl PartialEq for State {
    // Timestamps and context are ignored, as in Home Assistant.
    fn eq(&self, other: &Self) -> bool {
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}
