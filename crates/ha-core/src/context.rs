//! Context attached to states and events

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Origin and causality information for an event or state
///
/// Home Assistant sends `parent_id` and `user_id` as explicit nulls, so
/// both are optional on input and omitted on output when unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    /// A fresh context with a new ULID
    pub fn new() -> Self {
        Self::with_id(Ulid::new().to_string())
    }

    /// A context with a known id, e.g. one received from Home Assistant
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: None,
            parent_id: None,
        }
    }

    /// A new context caused by this one
    pub fn child(&self) -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: self.user_id.clone(),
            parent_id: Some(self.id.clone()),
        }
    }

    /// The `as_dict` form Home Assistant stores, with nulls kept
    pub fn as_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "parent_id": self.parent_id,
            "user_id": self.user_id,
        })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
