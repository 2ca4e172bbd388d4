//! JSON ⇄ Firestore typed value conversion
//!
//! Firestore's REST API wraps every value in a single-key object naming
//! its type, e.g. `{"stringValue": "on"}` or
//! `{"mapValue": {"fields": {...}}}`. Integers travel as strings.

use serde_json::{json, Map, Value};

use crate::Fields;

pub fn encode(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            if items.is_empty() {
                json!({ "arrayValue": {} })
            } else {
                let values: Vec<Value> = items.iter().map(encode).collect();
                json!({ "arrayValue": { "values": values } })
            }
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub fn encode_fields(fields: &Fields) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), encode(v)))
            .collect::<Map<String, Value>>(),
    )
}

/// Decode a typed value; unknown or malformed values become `null`
pub fn decode(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|o| o.iter().next()) else {
        return Value::Null;
    };

    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => inner.as_bool().map(Value::Bool).unwrap_or(Value::Null),
        "integerValue" => match inner {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            Value::Number(_) => inner.clone(),
            _ => Value::Null,
        },
        // Non-finite doubles arrive as "NaN" / "Infinity" strings.
        "doubleValue" => inner
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "stringValue" | "timestampValue" | "bytesValue" | "referenceValue" => inner.clone(),
        "geoPointValue" => json!({
            "latitude": inner.get("latitude").cloned().unwrap_or(json!(0.0)),
            "longitude": inner.get("longitude").cloned().unwrap_or(json!(0.0)),
        }),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}

pub fn decode_fields(fields: &Map<String, Value>) -> Fields {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), decode(v)))
        .collect()
}

/// Quote a field path segment for `updateMask.fieldPaths`
///
/// Simple identifiers pass through; anything else is wrapped in
/// backticks with backticks and backslashes escaped.
pub fn field_path(field: &str) -> String {
    let simple = field
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if simple {
        field.to_string()
    } else {
        format!("`{}`", field.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_state_dict() {
        let encoded = encode_fields(
            json!({
                "state": "on",
                "attributes": {"brightness": 200, "rgb": [255, 0, 0], "dimmable": true},
                "temperature": 21.5,
                "none": null,
                "empty": []
            })
            .as_object()
            .unwrap(),
        );

        assert_eq!(encoded["state"], json!({"stringValue": "on"}));
        assert_eq!(
            encoded["attributes"]["mapValue"]["fields"]["brightness"],
            json!({"integerValue": "200"})
        );
        assert_eq!(
            encoded["attributes"]["mapValue"]["fields"]["rgb"]["arrayValue"]["values"][1],
            json!({"integerValue": "0"})
        );
        assert_eq!(
            encoded["attributes"]["mapValue"]["fields"]["dimmable"],
            json!({"booleanValue": true})
        );
        assert_eq!(encoded["temperature"], json!({"doubleValue": 21.5}));
        assert_eq!(encoded["none"], json!({"nullValue": null}));
        assert_eq!(encoded["empty"], json!({"arrayValue": {}}));
    }

    #[test]
    fn test_decode_server_document() {
        let decoded = decode_fields(
            json!({
                "state": {"stringValue": "on"},
                "count": {"integerValue": "7"},
                "ratio": {"doubleValue": 0.25},
                "nan": {"doubleValue": "NaN"},
                "when": {"timestampValue": "2024-03-01T10:00:00Z"},
                "where": {"geoPointValue": {"latitude": 1.5, "longitude": 2.5}},
                "nested": {"mapValue": {"fields": {"a": {"arrayValue": {}}}}},
                "weird": {"somethingElse": 1}
            })
            .as_object()
            .unwrap(),
        );

        assert_eq!(
            Value::Object(decoded),
            json!({
                "state": "on",
                "count": 7,
                "ratio": 0.25,
                "nan": null,
                "when": "2024-03-01T10:00:00Z",
                "where": {"latitude": 1.5, "longitude": 2.5},
                "nested": {"a": []},
                "weird": null
            })
        );
    }

    #[test]
    fn test_large_unsigned_becomes_double() {
        let encoded = encode(&json!(u64::MAX));
        assert!(encoded.get("doubleValue").is_some());
    }

    #[test]
    fn test_field_path_quoting() {
        assert_eq!(field_path("state"), "state");
        assert_eq!(field_path("_private2"), "_private2");
        assert_eq!(field_path("light.kitchen"), "`light.kitchen`");
        assert_eq!(field_path("9lives"), "`9lives`");
        assert_eq!(field_path("a`b"), "`a\\`b`");
    }
}
