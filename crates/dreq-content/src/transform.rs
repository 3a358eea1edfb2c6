//! One-base content transformation.
//!
//! Turns the unified export into tidy tables keyed by uid, in order:
//!
//! 1. table tidy-up (renames, dropped and suffixed tables)
//! 2. field tidy-up (deny, rename, merge, default `name`)
//! 3. status filtering from the opportunities downwards
//! 4. uid assignment
//! 5. record-id to `link::<uid>` rewrite, then orphan pruning
//! 6. list sorting and list-to-scalar reshaping
//!
//! The DR/VS split happens afterwards in [`crate::split`].

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::{RenameRule, TidyRules};
use crate::error::{json_kind, ContentError, Result};
use crate::links::{count_references, make_link, reassign_identifiers};
use crate::uid::UidGenerator;

pub type Record = Map<String, Value>;
/// Record id (or uid once assigned) -> record.
pub type Table = BTreeMap<String, Record>;
/// Table name -> table.
pub type Content = BTreeMap<String, Table>;

pub const OPPORTUNITIES: &str = "opportunities";
pub const VARIABLE_GROUPS: &str = "variable_groups";
pub const EXPERIMENT_GROUPS: &str = "experiment_groups";
pub const VARIABLES: &str = "variables";
pub const EXPERIMENTS: &str = "experiments";

const UNDEFINED_NAME: &str = "undef";

// ============================================================================
// Patterns
// ============================================================================

/// Regular expression matched at the start of a key.
#[derive(Debug, Clone)]
pub(crate) struct KeyPattern {
    regex: Regex,
}

impl KeyPattern {
    pub(crate) fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{pattern})")).map_err(|source| ContentError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex })
    }

    pub(crate) fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<KeyPattern>> {
    patterns.iter().map(|p| KeyPattern::new(p)).collect()
}

fn compile_renames(rules: &[RenameRule]) -> Result<Vec<(KeyPattern, String)>> {
    rules
        .iter()
        .map(|rule| Ok((KeyPattern::new(&rule.pattern)?, rule.to.clone())))
        .collect()
}

// ============================================================================
// Entry point
// ============================================================================

/// Transform a key-normalized one-base document (`{base: {table: {records}}}`)
/// into tidy uid-keyed content.
pub fn transform_one_base(
    document: &Value,
    rules: &TidyRules,
    uids: &mut UidGenerator,
) -> Result<Content> {
    let bases = document.as_object().ok_or_else(|| ContentError::NotAnObject {
        context: "one-base document".into(),
        found: json_kind(document),
    })?;
    if bases.len() != 1 {
        return Err(ContentError::BaseCount(bases.len()));
    }
    let Some(base) = bases.values().next() else {
        return Err(ContentError::BaseCount(0));
    };

    let (mut content, extra_renames) = tidy_tables(base, rules)?;
    tidy_fields(&mut content, rules, &extra_renames)?;
    filter_on_status(&mut content, rules)?;
    let index = assign_uids(&mut content, uids);
    let mut content = rewrite_references(content, &index)?;
    reshape(&mut content, rules)?;

    info!(
        tables = content.len(),
        records = content.values().map(BTreeMap::len).sum::<usize>(),
        generated_uids = uids.generated(),
        "content transformed"
    );
    Ok(content)
}

// ============================================================================
// 1. Tables
// ============================================================================

fn tidy_tables(base: &Value, rules: &TidyRules) -> Result<(Content, Vec<RenameRule>)> {
    let tables = base.as_object().ok_or_else(|| ContentError::NotAnObject {
        context: "unified base".into(),
        found: json_kind(base),
    })?;
    let mut tables: BTreeMap<String, &Value> = tables.iter().map(|(k, v)| (k.clone(), v)).collect();
    let mut extra_renames = Vec::new();

    let esm_bcv = KeyPattern::new(&rules.esm_bcv_pattern)?;
    let esm_tables: Vec<String> = tables.keys().filter(|t| esm_bcv.matches(t)).cloned().collect();
    if let [old] = esm_tables.as_slice() {
        if let Some(table) = tables.remove(old) {
            tables.insert(rules.esm_bcv_table.clone(), table);
        }
        if old != &rules.esm_bcv_table {
            extra_renames.push(RenameRule {
                pattern: regex::escape(old),
                to: rules.esm_bcv_table.clone(),
            });
        }
    }

    for rule in &rules.table_renames {
        if let Some(table) = tables.remove(&rule.pattern) {
            tables.insert(rule.to.clone(), table);
        }
    }

    let dropped = compile_all(&rules.drop_table_patterns)?;
    tables.retain(|name, _| {
        let drop = dropped.iter().any(|p| p.matches(name));
        if drop {
            debug!(table = %name, "dropping table");
        }
        !drop
    });

    for marker in &rules.strip_table_markers {
        let marked: Vec<String> = tables.keys().filter(|t| t.contains(marker.as_str())).cloned().collect();
        for old in marked {
            let new = old.replace(marker.as_str(), "").trim_matches('_').to_string();
            if let Some(table) = tables.remove(&old) {
                tables.insert(new, table);
            }
        }
    }

    let mut content = Content::new();
    for (name, table) in tables {
        let records = table
            .get("records")
            .ok_or_else(|| ContentError::MissingTable(format!("{name}/records")))?;
        let records = records.as_object().ok_or_else(|| ContentError::NotAnObject {
            context: format!("{name}/records"),
            found: json_kind(records),
        })?;
        let mut out = Table::new();
        for (record_id, record) in records {
            let record = record.as_object().ok_or_else(|| ContentError::NotAnObject {
                context: format!("{name}/{record_id}"),
                found: json_kind(record),
            })?;
            out.insert(record_id.clone(), record.clone());
        }
        content.insert(name, out);
    }
    Ok((content, extra_renames))
}

// ============================================================================
// 2. Fields
// ============================================================================

fn tidy_fields(content: &mut Content, rules: &TidyRules, extra_renames: &[RenameRule]) -> Result<()> {
    let default_deny = compile_all(&rules.default_deny)?;
    for (table_name, table) in content.iter_mut() {
        let mut deny = compile_all(rules.deny.get(table_name).map(Vec::as_slice).unwrap_or_default())?;
        deny.extend(default_deny.iter().cloned());
        let mut rename = compile_renames(rules.renames.get(table_name).map(Vec::as_slice).unwrap_or_default())?;
        if table_name == VARIABLES {
            rename.extend(compile_renames(extra_renames)?);
        }
        let merge = compile_renames(rules.merges.get(table_name).map(Vec::as_slice).unwrap_or_default())?;

        for (record_id, record) in table.iter_mut() {
            record.retain(|key, _| !deny.iter().any(|p| p.matches(key)));

            let keys: Vec<String> = record.keys().cloned().collect();
            for (pattern, to) in &rename {
                let hits: Vec<&String> = keys.iter().filter(|k| pattern.matches(k)).collect();
                match hits.as_slice() {
                    [] => {}
                    [key] => {
                        if let Some(value) = record.remove(key.as_str()) {
                            record.insert(to.clone(), value);
                        }
                    }
                    _ => {
                        return Err(ContentError::AmbiguousRename {
                            table: table_name.clone(),
                            pattern: pattern.as_str().to_string(),
                            keys: hits.into_iter().cloned().collect(),
                        })
                    }
                }
            }

            let keys: Vec<String> = record.keys().cloned().collect();
            for (pattern, to) in &merge {
                let hits: Vec<&String> = keys.iter().filter(|k| pattern.matches(k)).collect();
                if hits.is_empty() {
                    continue;
                }
                let mut merged = Vec::new();
                for key in hits {
                    match record.remove(key.as_str()) {
                        Some(Value::Array(items)) => merged.extend(items),
                        Some(other) => merged.push(other),
                        None => {}
                    }
                }
                record.insert(to.clone(), Value::Array(merged));
            }

            if !record.contains_key("name") {
                warn!(table = %table_name, %record_id, "record has no name, using `undef`");
                record.insert("name".to_string(), Value::String(UNDEFINED_NAME.to_string()));
            }
        }
    }
    Ok(())
}

// ============================================================================
// 3. Status filtering
// ============================================================================

fn filter_on_status(content: &mut Content, rules: &TidyRules) -> Result<()> {
    let opportunities = content
        .get_mut(OPPORTUNITIES)
        .ok_or_else(|| ContentError::MissingTable(OPPORTUNITIES.to_string()))?;

    let kept = |record: &Record| match record.get("status") {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => rules.kept_statuses.iter().any(|k| k == s),
        Some(_) => false,
    };
    opportunities.retain(|id, record| {
        let keep = kept(record);
        if !keep {
            debug!(opportunity = %id, "dropping opportunity on status");
        }
        keep
    });
    let variable_groups = referenced(opportunities.values(), VARIABLE_GROUPS);
    let experiment_groups = referenced(opportunities.values(), EXPERIMENT_GROUPS);

    let mut variables = BTreeSet::new();
    if let Some(table) = content.get_mut(VARIABLE_GROUPS) {
        table.retain(|id, _| variable_groups.contains(id));
        variables = referenced(table.values(), VARIABLES);
    }

    let mut experiments = BTreeSet::new();
    let mut junk = BTreeSet::new();
    if let Some(table) = content.get_mut(EXPERIMENT_GROUPS) {
        table.retain(|id, record| {
            if !experiment_groups.contains(id) {
                return false;
            }
            let is_junk = record
                .get("status")
                .and_then(Value::as_str)
                .is_some_and(|s| rules.junk_statuses.iter().any(|j| j == s));
            if is_junk {
                junk.insert(id.clone());
            }
            !is_junk
        });
        experiments = referenced(table.values(), EXPERIMENTS);
    }
    if !junk.is_empty() {
        debug!(?junk, "dropping junk experiment groups");
        if let Some(opportunities) = content.get_mut(OPPORTUNITIES) {
            for record in opportunities.values_mut() {
                if let Some(Value::Array(groups)) = record.get_mut(EXPERIMENT_GROUPS) {
                    groups.retain(|g| g.as_str().map_or(true, |g| !junk.contains(g)));
                }
            }
        }
    }

    if let Some(table) = content.get_mut(VARIABLES) {
        table.retain(|id, _| variables.contains(id));
    }
    if let Some(table) = content.get_mut(EXPERIMENTS) {
        table.retain(|id, _| experiments.contains(id));
    }

    let status = KeyPattern::new(&rules.status_pattern)?;
    for table in content.values_mut() {
        for record in table.values_mut() {
            record.retain(|key, _| !status.matches(key));
        }
    }
    Ok(())
}

fn referenced<'r>(records: impl Iterator<Item = &'r Record>, field: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for record in records {
        match record.get(field) {
            Some(Value::Array(items)) => {
                out.extend(items.iter().filter_map(Value::as_str).map(str::to_string))
            }
            Some(Value::String(s)) => {
                out.insert(s.clone());
            }
            _ => {}
        }
    }
    out
}

// ============================================================================
// 4. UIDs
// ============================================================================

/// Record id -> (uid, table).
pub type UidIndex = BTreeMap<String, (String, String)>;

fn scalar_text(value: Option<&Value>, default: &str) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}

fn assign_uids(content: &mut Content, uids: &mut UidGenerator) -> UidIndex {
    let mut index = UidIndex::new();
    for (table_name, table) in content.iter_mut() {
        let mut order: Vec<(String, String)> = table
            .iter()
            .map(|(record_id, record)| {
                let key = [
                    scalar_text(record.get("name"), UNDEFINED_NAME),
                    scalar_text(record.get("uid"), UNDEFINED_NAME),
                    record_id.clone(),
                ]
                .join("|");
                (key, record_id.clone())
            })
            .collect();
        order.sort();

        let mut rekeyed = Table::new();
        for (_, record_id) in order {
            let Some(mut record) = table.remove(&record_id) else {
                continue;
            };
            let uid = match record.remove("uid") {
                Some(Value::String(uid)) => uid,
                Some(other) if !other.is_null() => other.to_string(),
                _ => {
                    let uid = uids.generate(table_name, &Value::Object(record.clone()));
                    debug!(table = %table_name, %record_id, %uid, "undefined uid, generated one");
                    uid
                }
            };
            index.insert(record_id, (uid.clone(), table_name.clone()));
            rekeyed.insert(uid, record);
        }
        *table = rekeyed;
    }
    index
}

// ============================================================================
// 5. Reference rewrite
// ============================================================================

pub(crate) fn content_to_value(content: &Content) -> Value {
    Value::Object(
        content
            .iter()
            .map(|(name, table)| {
                let records = table
                    .iter()
                    .map(|(id, record)| (id.clone(), Value::Object(record.clone())))
                    .collect();
                (name.clone(), Value::Object(records))
            })
            .collect(),
    )
}

fn content_from_value(value: Value) -> Result<Content> {
    let Value::Object(tables) = value else {
        return Err(ContentError::NotAnObject {
            context: "content".into(),
            found: json_kind(&value),
        });
    };
    let mut content = Content::new();
    for (name, table) in tables {
        let Value::Object(records) = table else {
            return Err(ContentError::NotAnObject {
                context: name,
                found: json_kind(&table),
            });
        };
        let mut out = Table::new();
        for (id, record) in records {
            match record {
                Value::Object(fields) => {
                    out.insert(id, fields);
                }
                other => {
                    return Err(ContentError::NotAnObject {
                        context: format!("{name}/{id}"),
                        found: json_kind(&other),
                    })
                }
            }
        }
        content.insert(name, out);
    }
    Ok(content)
}

fn rewrite_references(content: Content, index: &UidIndex) -> Result<Content> {
    debug!("replacing record ids by uids");
    let id_map: BTreeMap<String, String> = index
        .iter()
        .map(|(record_id, (uid, _))| (record_id.clone(), make_link(uid)))
        .collect();
    let mut document = content_to_value(&content);
    let counts = reassign_identifiers(&mut document, &id_map);
    let mut content = content_from_value(document)?;

    let mut survivors = Vec::new();
    let mut unreferenced = 0;
    for (record_id, (uid, table)) in index {
        if table == OPPORTUNITIES {
            continue;
        }
        if counts.get(record_id).copied().unwrap_or(0) == 0 {
            if let Some(t) = content.get_mut(table) {
                t.remove(uid);
            }
            unreferenced += 1;
        } else {
            survivors.push((uid.as_str(), table.as_str()));
        }
    }

    let document = content_to_value(&content);
    let mut orphans = Vec::new();
    for (uid, table) in survivors {
        if count_references(&document, uid) < 2 {
            orphans.push((uid, table));
        }
    }
    for (uid, table) in &orphans {
        if let Some(t) = content.get_mut(*table) {
            t.remove(*uid);
        }
    }
    info!(unreferenced, orphans = orphans.len(), "pruned unused records");
    Ok(content)
}

// ============================================================================
// 6. Sorting and reshaping
// ============================================================================

fn sort_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn reshape(content: &mut Content, rules: &TidyRules) -> Result<()> {
    for (table_name, table) in content.iter_mut() {
        let sort = compile_all(rules.sort_keys.get(table_name).map(Vec::as_slice).unwrap_or_default())?;
        let scalar = compile_all(rules.scalar_keys.get(table_name).map(Vec::as_slice).unwrap_or_default())?;
        if sort.is_empty() && scalar.is_empty() {
            continue;
        }
        for (uid, record) in table.iter_mut() {
            let keys: Vec<String> = record.keys().cloned().collect();
            for key in keys.iter().filter(|k| sort.iter().any(|p| p.matches(k))) {
                if let Some(Value::Array(items)) = record.get_mut(key) {
                    items.sort_by_key(sort_text);
                    items.dedup();
                }
            }
            for key in keys.iter().filter(|k| scalar.iter().any(|p| p.matches(k))) {
                let Some(value) = record.remove(key) else {
                    continue;
                };
                match value {
                    Value::Array(mut items) if items.len() == 1 => {
                        record.insert(key.clone(), items.remove(0));
                    }
                    Value::Array(items) if items.is_empty() => {
                        warn!(table = %table_name, %uid, %key, "removing empty key");
                    }
                    Value::Array(_) => {
                        return Err(ContentError::Reshape {
                            table: table_name.clone(),
                            uid: uid.clone(),
                            key: key.clone(),
                            reason: "contains several elements".into(),
                        })
                    }
                    Value::String(_) => {
                        warn!(table = %table_name, %uid, %key, "could not reshape key: already a string");
                        record.insert(key.clone(), value);
                    }
                    other => {
                        return Err(ContentError::Reshape {
                            table: table_name.clone(),
                            uid: uid.clone(),
                            key: key.clone(),
                            reason: format!("not a list but a {}", json_kind(&other)),
                        })
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UidStrategy;
    use serde_json::json;

    fn base(tables: Value) -> Value {
        json!({ "data_request": tables })
    }

    fn records(records: Value) -> Value {
        json!({ "records": records })
    }

    #[test]
    fn patterns_match_at_start_only() {
        let p = KeyPattern::new("table").unwrap();
        assert!(p.matches("table_identifier"));
        assert!(!p.matches("cmip6_table"));
        assert!(KeyPattern::new(r".*\(from.*\).*").unwrap().matches("status_(from_opportunity)"));
    }

    #[test]
    fn tables_are_renamed_dropped_and_unmarked() {
        let doc = base(json!({
            "opportunity": records(json!({})),
            "ranking": records(json!({})),
            "cmip6_frequency_(legacy)": records(json!({})),
            "esm-bcv_1.3": records(json!({})),
        }));
        let (content, extra) = tidy_tables(&doc["data_request"], &TidyRules::default()).unwrap();
        let names: Vec<&str> = content.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["cmip6_frequency", "esm-bcv", "opportunities"]);
        assert_eq!(extra[0].to, "esm-bcv");
    }

    #[test]
    fn ambiguous_rename_is_fatal() {
        let doc = base(json!({
            "opportunity": records(json!({})),
            "variables": records(json!({"r1": {"table": "Amon", "table_id": "x", "name": "tas"}})),
        }));
        let mut uids = UidGenerator::new(UidStrategy::Sequential);
        let err = transform_one_base(&doc, &TidyRules::default(), &mut uids).unwrap_err();
        assert!(matches!(err, ContentError::AmbiguousRename { .. }), "{err}");
    }

    #[test]
    fn status_filter_keeps_reachable_records() {
        let doc = base(json!({
            "opportunity": records(json!({
                "o1": {"title_of_opportunity": "Op one", "status": "Accepted",
                       "variable_groups": ["vg1"], "experiment_groups": ["eg1", "eg2"]},
                "o2": {"title_of_opportunity": "Op two", "status": "Rejected",
                       "variable_groups": ["vg2"], "experiment_groups": []}
            })),
            "variable_group": records(json!({
                "vg1": {"name": "g1", "variables": ["v1"]},
                "vg2": {"name": "g2", "variables": ["v2"]}
            })),
            "experiment_group": records(json!({
                "eg1": {"name": "e1", "experiments": ["x1"]},
                "eg2": {"name": "e2", "experiments": ["x2"], "status": "Junk"}
            })),
            "variables": records(json!({
                "v1": {"compound_name": "Amon.tas"},
                "v2": {"compound_name": "Amon.pr"}
            })),
            "experiments": records(json!({
                "x1": {"experiment": "historical"},
                "x2": {"experiment": "piControl"}
            })),
        }));
        let mut uids = UidGenerator::new(UidStrategy::Sequential);
        let content = transform_one_base(&doc, &TidyRules::default(), &mut uids).unwrap();

        assert_eq!(content[OPPORTUNITIES].len(), 1);
        let (op_uid, op) = content[OPPORTUNITIES].iter().next().unwrap();
        assert!(op_uid.starts_with("default_"));
        assert_eq!(op["name"], json!("Op one"));
        assert!(op.get("status").is_none());
        assert_eq!(op[EXPERIMENT_GROUPS].as_array().unwrap().len(), 1);

        let names: Vec<&Value> = content[VARIABLES].values().map(|r| &r["name"]).collect();
        assert_eq!(names, vec![&json!("Amon.tas")]);
        assert_eq!(content[EXPERIMENTS].len(), 1);
        assert_eq!(content[EXPERIMENT_GROUPS].len(), 1);
    }

    #[test]
    fn references_become_links_and_orphans_go() {
        let mut content = Content::new();
        content.insert(
            OPPORTUNITIES.into(),
            Table::from([("rO".into(), json!({"name": "o", "mips": ["rM"]}).as_object().unwrap().clone())]),
        );
        content.insert(
            "mips".into(),
            Table::from([
                ("rM".into(), json!({"name": "CMIP"}).as_object().unwrap().clone()),
                ("rX".into(), json!({"name": "unused"}).as_object().unwrap().clone()),
            ]),
        );
        let mut uids = UidGenerator::new(UidStrategy::Sequential);
        let index = assign_uids(&mut content, &mut uids);
        let content = rewrite_references(content, &index).unwrap();
        assert_eq!(content["mips"].len(), 1);
        let mip_uid = &index["rM"].0;
        let op = content[OPPORTUNITIES].values().next().unwrap();
        assert_eq!(op["mips"], json!([format!("link::{mip_uid}")]));
    }

    #[test]
    fn reshape_collapses_and_rejects() {
        let mut rules = TidyRules::default();
        rules.scalar_keys = BTreeMap::from([("t".to_string(), vec!["one".to_string()])]);
        rules.sort_keys = BTreeMap::from([("t".to_string(), vec!["many".to_string()])]);
        let mut content = Content::from([(
            "t".to_string(),
            Table::from([(
                "u".to_string(),
                json!({"one": ["a"], "many": ["b", "a", "b"], "one_empty": []}).as_object().unwrap().clone(),
            )]),
        )]);
        reshape(&mut content, &rules).unwrap();
        let record = &content["t"]["u"];
        assert_eq!(record["one"], json!("a"));
        assert_eq!(record["many"], json!(["a", "b"]));
        assert!(record.get("one_empty").is_none());

        content.get_mut("t").unwrap().get_mut("u").unwrap().insert("one".into(), json!(["a", "b"]));
        assert!(matches!(reshape(&mut content, &rules), Err(ContentError::Reshape { .. })));
    }
}
