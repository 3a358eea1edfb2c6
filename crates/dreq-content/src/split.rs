//! Data Request / Vocabulary Server split.
//!
//! The DR document keeps only the relations between the structural tables;
//! everything descriptive stays in the VS document, keyed by table then uid.

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{DrField, FieldShape, SplitLayout};
use crate::error::{json_kind, ContentError, Result};
use crate::transform::{content_to_value, Content};

pub const VERSION_KEY: &str = "version";

/// Split tidy `content` into `(dr, vs)` and stamp both with `version`.
pub fn split_content(mut content: Content, layout: &SplitLayout, version: &str) -> Result<(Value, Value)> {
    debug!("building DR and VS");
    let mut dr = Map::new();
    for (table_name, fields) in &layout.0 {
        let Some(table) = content.get_mut(table_name) else {
            dr.insert(table_name.clone(), Value::Object(Map::new()));
            continue;
        };
        let mut relations = Map::new();
        for (uid, record) in table.iter_mut() {
            let mut entry = Map::new();
            for field in fields {
                let raw = if field.keep_in_vs {
                    record.get(field.source_key()).cloned()
                } else {
                    record.remove(field.source_key())
                };
                let value = shape_value(raw, field, table_name, uid)?;
                entry.insert(field.key.clone(), value);
            }
            relations.insert(uid.clone(), Value::Object(entry));
        }
        dr.insert(table_name.clone(), Value::Object(relations));
    }
    dr.insert(VERSION_KEY.to_string(), Value::String(version.to_string()));

    let mut vs = match content_to_value(&content) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    vs.insert(VERSION_KEY.to_string(), Value::String(version.to_string()));
    Ok((Value::Object(dr), Value::Object(vs)))
}

fn shape_value(raw: Option<Value>, field: &DrField, table: &str, uid: &str) -> Result<Value> {
    let value = raw.unwrap_or_else(|| field.default.clone());
    match (field.shape, value) {
        (FieldShape::List, Value::Array(items)) => Ok(Value::Array(items)),
        (FieldShape::List, v @ (Value::String(_) | Value::Number(_) | Value::Null)) => {
            Ok(Value::Array(vec![v]))
        }
        (FieldShape::OptionalString, v @ (Value::String(_) | Value::Null)) => Ok(v),
        (FieldShape::OptionalString, Value::Array(items)) => {
            Ok(items.into_iter().next().unwrap_or(Value::Null))
        }
        (FieldShape::Scalar, v) => Ok(v),
        (_, other) => Err(ContentError::Split {
            table: table.to_string(),
            uid: uid.to_string(),
            key: field.key.clone(),
            reason: format!("unexpected {}", json_kind(&other)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Record, Table};
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn relations_move_to_dr() {
        let mut content = Content::new();
        content.insert(
            "variable_groups".into(),
            Table::from([(
                "g1".into(),
                record(json!({"name": "baseline", "variables": ["link::v1"], "priority_level": ["link::p1"]})),
            )]),
        );
        content.insert(
            "opportunities".into(),
            Table::from([(
                "o1".into(),
                record(json!({"name": "op", "variable_groups": "link::g1", "minimum_ensemble_size": 3})),
            )]),
        );
        let (dr, vs) = split_content(content, &SplitLayout::default(), "v1.2").unwrap();

        assert_eq!(dr["variable_groups"]["g1"]["variables"], json!(["link::v1"]));
        assert_eq!(dr["variable_groups"]["g1"]["priority_level"], json!("link::p1"));
        assert_eq!(dr["variable_groups"]["g1"]["mips"], json!([]));
        assert_eq!(dr["opportunities"]["o1"]["variable_groups"], json!(["link::g1"]));
        assert_eq!(dr["opportunities"]["o1"]["ensemble_size"], json!(3));
        assert_eq!(dr["experiment_groups"], json!({}));
        assert_eq!(dr["version"], json!("v1.2"));

        assert_eq!(vs["variable_groups"]["g1"], json!({"name": "baseline"}));
        assert_eq!(vs["opportunities"]["o1"]["minimum_ensemble_size"], json!(3));
        assert_eq!(vs["version"], json!("v1.2"));
    }

    #[test]
    fn objects_cannot_become_relation_lists() {
        let content = Content::from([(
            "experiment_groups".to_string(),
            Table::from([("e1".to_string(), record(json!({"experiments": {"bad": 1}})))]),
        )]);
        let err = split_content(content, &SplitLayout::default(), "v").unwrap_err();
        assert!(matches!(err, ContentError::Split { .. }));
    }
}
