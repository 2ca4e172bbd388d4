//! Service calls sent to Home Assistant

use crate::Context;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A call to `domain.service` with its payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    pub domain: String,

    pub service: String,

    /// JSON body sent with the call, e.g. `{"entity_id": "light.kitchen"}`
    pub service_data: serde_json::Value,

    pub context: Context,
}

impl ServiceCall {
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        service_data: serde_json::Value,
        context: Context,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data,
            context,
        }
    }

    /// A call targeting a single entity by its raw id
    pub fn for_entity(
        domain: impl Into<String>,
        service: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self::new(
            domain,
            service,
            json!({ "entity_id": entity_id.into() }),
            Context::new(),
        )
    }

    /// `domain.service`
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }

    /// Entity ids in the payload, accepting a string or a list
    pub fn entity_ids(&self) -> Vec<String> {
        match self.service_data.get("entity_id") {
            Some(serde_json::Value::String(s)) => vec![s.clone()],
            Some(serde_json::Value::Array(arr)) => arr
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_entity() {
        let call = ServiceCall::for_entity("homeassistant", "toggle", "light.kitchen");
        assert_eq!(call.service_id(), "homeassistant.toggle");
        assert_eq!(call.service_data, json!({"entity_id": "light.kitchen"}));
        assert_eq!(call.entity_ids(), vec!["light.kitchen"]);
    }

    #[test]
    fn test_entity_ids_list() {
        let call = ServiceCall::new(
            "homeassistant",
            "turn_on",
            json!({"entity_id": ["light.a", "switch.b"]}),
            Context::new(),
        );
        assert_eq!(call.entity_ids(), vec!["light.a", "switch.b"]);
    }

    #[test]
    fn test_entity_ids_missing() {
        let call = ServiceCall::new("homeassistant", "restart", json!({}), Context::new());
        assert!(call.entity_ids().is_empty());
    }
}
