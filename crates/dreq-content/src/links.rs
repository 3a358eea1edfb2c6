//! Link tokens and document-wide identifier rewriting.
//!
//! A field value that is a genuine cross-reference is serialized as
//! `link::<uid>`; any other string is a literal. The object graph relies on
//! this distinction to decide whether to resolve a value or keep it opaque.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Reserved prefix marking a string as a cross-reference.
pub const LINK_PREFIX: &str = "link::";

/// Returns `(true, uid)` if `value` is a link token, `(false, value)` otherwise.
pub fn is_link(value: &str) -> (bool, &str) {
    match value.strip_prefix(LINK_PREFIX) {
        Some(inner) => (true, inner),
        None => (false, value),
    }
}

/// Wrap `id` as a link token. Idempotent.
pub fn make_link(id: &str) -> String {
    if id.starts_with(LINK_PREFIX) {
        id.to_string()
    } else {
        format!("{LINK_PREFIX}{id}")
    }
}

/// Replace every exact occurrence of an old identifier with its new value,
/// anywhere in `document` (object keys and string leaves, arbitrarily deep).
///
/// Only whole strings are replaced, so `rec1` never clobbers `rec10`. Returns
/// how many occurrences of each old identifier were replaced; identifiers that
/// never occurred map to `0`.
pub fn reassign_identifiers(
    document: &mut Value,
    id_map: &BTreeMap<String, String>,
) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = id_map.keys().map(|k| (k.clone(), 0)).collect();
    rewrite_value(document, id_map, &mut counts);
    counts
}

fn rewrite_value(
    value: &mut Value,
    id_map: &BTreeMap<String, String>,
    counts: &mut BTreeMap<String, usize>,
) {
    match value {
        Value::String(s) => {
            if let Some(new) = id_map.get(s.as_str()) {
                if let Some(n) = counts.get_mut(s.as_str()) {
                    *n += 1;
                }
                *s = new.clone();
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_value(item, id_map, counts);
            }
        }
        Value::Object(map) => {
            let old = std::mem::take(map);
            let mut rebuilt = Map::new();
            for (key, mut inner) in old {
                let key = match id_map.get(key.as_str()) {
                    Some(new) => {
                        if let Some(n) = counts.get_mut(key.as_str()) {
                            *n += 1;
                        }
                        new.clone()
                    }
                    None => key,
                };
                rewrite_value(&mut inner, id_map, counts);
                rebuilt.insert(key, inner);
            }
            *map = rebuilt;
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Count how many times `uid` occurs as an object key, as a string leaf, or as
/// the target of a link token.
pub fn count_references(document: &Value, uid: &str) -> usize {
    let link = make_link(uid);
    let mut count = 0;
    count_in(document, uid, &link, &mut count);
    count
}

fn count_in(value: &Value, uid: &str, link: &str, count: &mut usize) {
    match value {
        Value::String(s) => {
            if s == uid || s == link {
                *count += 1;
            }
        }
        Value::Array(items) => {
            for item in items {
                count_in(item, uid, link, count);
            }
        }
        Value::Object(map) => {
            for (key, inner) in map {
                if key == uid || key == link {
                    *count += 1;
                }
                count_in(inner, uid, link, count);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Collect every string leaf of `document` that is a link token, keyed by the
/// linked uid, with its number of occurrences.
pub fn link_occurrences(document: &Value) -> BTreeMap<String, usize> {
    let mut out = BTreeMap::new();
    collect_links(document, &mut out);
    out
}

fn collect_links(value: &Value, out: &mut BTreeMap<String, usize>) {
    match value {
        Value::String(s) => {
            if let (true, uid) = is_link(s) {
                *out.entry(uid.to_string()).or_insert(0) += 1;
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_links(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_links(item, out)),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn link_detection() {
        assert_eq!(is_link("link::abc"), (true, "abc"));
        assert_eq!(is_link("abc"), (false, "abc"));
        assert_eq!(make_link("abc"), "link::abc");
        assert_eq!(make_link("link::abc"), "link::abc");
    }

    #[test]
    fn rewrite_is_exact_token() {
        let mut doc = json!({
            "rec1": {"variables": ["rec10", "rec1"], "note": "rec1 is here"},
            "rec10": {"name": "x"}
        });
        let map = BTreeMap::from([
            ("rec1".to_string(), "link::a".to_string()),
            ("rec10".to_string(), "link::b".to_string()),
            ("rec99".to_string(), "link::c".to_string()),
        ]);
        let counts = reassign_identifiers(&mut doc, &map);
        assert_eq!(doc["link::a"]["variables"], json!(["link::b", "link::a"]));
        assert_eq!(doc["link::a"]["note"], json!("rec1 is here"));
        assert_eq!(counts["rec1"], 2);
        assert_eq!(counts["rec10"], 2);
        assert_eq!(counts["rec99"], 0);
    }

    #[test]
    fn references_are_counted_per_token() {
        let doc = json!({
            "default_1": {"x": ["link::default_10"]},
            "default_10": {"y": "link::default_1"}
        });
        assert_eq!(count_references(&doc, "default_1"), 2);
        assert_eq!(count_references(&doc, "default_10"), 2);
        assert_eq!(count_references(&doc, "default_2"), 0);
        let links = link_occurrences(&doc);
        assert_eq!(links.get("default_1"), Some(&1));
    }

    proptest! {
        #[test]
        fn link_round_trip(x in "[a-zA-Z0-9_\\-]{0,24}") {
            let link = make_link(&x);
            prop_assert_eq!(is_link(&link).1, x.as_str());
            prop_assert_eq!(make_link(&make_link(&x)), make_link(&x));
        }

        #[test]
        fn no_old_identifier_survives_a_rewrite(
            ids in proptest::collection::btree_set("rec[A-Za-z0-9]{4,8}", 1..8)
        ) {
            let ids: Vec<String> = ids.into_iter().collect();
            let mut doc = json!({});
            for (i, id) in ids.iter().enumerate() {
                let target = &ids[(i + 1) % ids.len()];
                doc[id.as_str()] = json!({"links": [target], "single": id});
            }
            let map: BTreeMap<String, String> = ids
                .iter()
                .enumerate()
                .map(|(i, id)| (id.clone(), format!("link::uid_{i}")))
                .collect();
            reassign_identifiers(&mut doc, &map);
            let text = serde_json::to_string(&doc).unwrap();
            for id in &ids {
                let quoted = format!("\"{id}\"");
                prop_assert!(!text.contains(&quoted));
            }
        }
    }
}
