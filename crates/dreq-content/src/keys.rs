//! Structural key normalization.
//!
//! Export keys are human labels ("Title of Opportunity", "CF Standard Name");
//! downstream rules are written against their snake_case form. Record ids and
//! the raw field values inside a `records`/`fields` container are left alone.

use serde_json::{Map, Value};

/// Containers whose direct children are record ids, not structural keys.
const RECORD_CONTAINERS: &[&str] = &["records", "fields"];

/// Lower-case `input`, remove every `strip` substring, trim, then replace
/// `&` with `and` and spaces with `_`.
pub fn normalize_key(input: &str, strip: &[&str]) -> String {
    let mut key = input.to_lowercase();
    for s in strip {
        key = key.replace(&s.to_lowercase(), "");
    }
    key.trim().replace('&', "and").replace(' ', "_")
}

/// Recursively normalize every mapping key of `value`.
///
/// Children of a `records`/`fields` container keep their key verbatim; the
/// record bodies below them are normalized again (field names are structural).
pub fn normalize_document_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(normalize_map(map, false)),
        other => other.clone(),
    }
}

fn normalize_map(map: &Map<String, Value>, keep_keys: bool) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        let new_key = if keep_keys {
            key.clone()
        } else {
            normalize_key(key, &[])
        };
        let new_value = match value {
            Value::Object(inner) => {
                Value::Object(normalize_map(inner, RECORD_CONTAINERS.contains(&key.as_str())))
            }
            other => other.clone(),
        };
        out.insert(new_key, new_value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_labels() {
        assert_eq!(normalize_key("Title of Opportunity", &[]), "title_of_opportunity");
        assert_eq!(normalize_key(" Coordinates & Dimensions ", &[]), "coordinates_and_dimensions");
        assert_eq!(normalize_key("CMIP6 Frequency (legacy)", &["(legacy)"]), "cmip6_frequency");
    }

    #[test]
    fn record_ids_are_preserved_but_fields_are_normalized() {
        let doc = json!({
            "Data Request": {
                "Variable Group": {
                    "name": "Variable Group",
                    "records": {
                        "recABC": {"Title": "Some Value", "Variables": ["recX"]}
                    }
                }
            }
        });
        let out = normalize_document_keys(&doc);
        let record = &out["data_request"]["variable_group"]["records"]["recABC"];
        assert_eq!(record["title"], json!("Some Value"));
        assert_eq!(record["variables"], json!(["recX"]));
    }
}
