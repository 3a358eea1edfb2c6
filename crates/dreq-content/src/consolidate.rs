//! Multi-base export consolidation.
//!
//! The public export is split over three or four Airtable bases
//! (Opportunities, Variables, Physical Parameters, optionally Schema). Links
//! between records only make sense inside one base; a base that needs to
//! point at another base's records carries a local *copy table*. This module
//! folds the bases into one unified base and re-points every declared link
//! attribute at the master records.
//!
//! ```text
//! base A / Variable Group.Variables ──► base A / Variables (copy) ──┐
//!                                                                   │ map_by_key
//! base B / Variable ◄───────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::{
    AttributeMapping, EntryType, FilterOperator, MappingOperation, RecordFilter, TableMapping,
    TransformConfig,
};
use crate::error::{json_kind, ContentError, Result};

/// Top-level key of a unified export.
pub const UNIFIED_BASE: &str = "Data Request";

/// Consolidate `raw` into a one-base export `{"Data Request": {table: {...}}}`.
///
/// One-base exports are passed through, apart from the version-specific
/// table renames. Exports with 3 or 4 bases are mapped using
/// `config.mapping`. Any other base count is an error.
pub fn consolidate(raw: &Value, config: &TransformConfig) -> Result<Value> {
    let bases = as_object(raw, "raw export")?;
    match bases.len() {
        1 => passthrough_one_base(bases, config),
        3 | 4 => {
            info!(bases = bases.len(), "consolidating multi-base export");
            Consolidator::new(bases, &config.mapping).run()
        }
        n => Err(ContentError::BaseCount(n)),
    }
}

fn passthrough_one_base(bases: &Map<String, Value>, config: &TransformConfig) -> Result<Value> {
    let Some((base_name, content)) = bases.iter().next() else {
        return Err(ContentError::BaseCount(0));
    };
    let mut tables = as_object(content, base_name)?.clone();
    let version = base_name.replace("Data Request ", "");
    if let Some(renames) = config.version_renames.get(&version) {
        for (from, to) in renames {
            if let Some(table) = tables.remove(from) {
                debug!(%from, %to, "renaming table for cross-version consistency");
                tables.insert(to.clone(), table);
            }
        }
    }
    let mut out = Map::new();
    out.insert(UNIFIED_BASE.to_string(), Value::Object(tables));
    Ok(Value::Object(out))
}

// ============================================================================
// Multi-base mapping
// ============================================================================

struct Consolidator<'a> {
    data: &'a Map<String, Value>,
    mapping: &'a BTreeMap<String, TableMapping>,
    filtered: BTreeSet<String>,
}

impl<'a> Consolidator<'a> {
    fn new(data: &'a Map<String, Value>, mapping: &'a BTreeMap<String, TableMapping>) -> Self {
        Self {
            data,
            mapping,
            filtered: BTreeSet::new(),
        }
    }

    fn run(mut self) -> Result<Value> {
        self.collect_filtered()?;
        info!(count = self.filtered.len(), "filtered records");

        let mut unified = Map::new();
        let mut missing_bases = BTreeSet::new();
        let mut missing_tables = BTreeSet::new();

        for (target, info) in self.mapping {
            let Some(base) = self.data.get(&info.source_base) else {
                missing_bases.insert(info.source_base.clone());
                continue;
            };
            let Some(table) = as_object(base, &info.source_base)?.get(&info.source_table) else {
                missing_tables.insert(format!("{}/{}", info.source_base, info.source_table));
                continue;
            };
            debug!(base = %info.source_base, table = %info.source_table, %target, "mapping table");
            let copied = self.copy_table(target, info, table)?;
            unified.insert(target.clone(), Value::Object(copied));
        }

        if !missing_bases.is_empty() {
            warn!(?missing_bases, "encountered missing bases when consolidating the data");
        }
        if !missing_tables.is_empty() {
            warn!(?missing_tables, "encountered missing tables when consolidating the data");
        }

        let mut out = Map::new();
        out.insert(UNIFIED_BASE.to_string(), Value::Object(unified));
        Ok(Value::Object(out))
    }

    /// Evaluate every table's `internal_filters` and remember failing records.
    fn collect_filtered(&mut self) -> Result<()> {
        for (target, info) in self.mapping {
            if info.internal_filters.is_empty() {
                continue;
            }
            let Some(records) = self.source_records(&info.source_base, &info.source_table)? else {
                continue;
            };
            for (record_id, record) in records {
                let record = as_object(record, record_id)?;
                let keep = info
                    .internal_filters
                    .iter()
                    .all(|(key, filter)| record_passes(record, key, filter));
                if !keep {
                    debug!(%record_id, table = %target, "filtered out record");
                    self.filtered.insert(record_id.clone());
                }
            }
        }
        Ok(())
    }

    fn copy_table(
        &self,
        target: &str,
        info: &TableMapping,
        table: &Value,
    ) -> Result<Map<String, Value>> {
        let table = as_object(table, &info.source_table)?;
        let source_records = records_of(table, &info.source_table)?;

        let mut records = Map::new();
        for (record_id, record) in source_records {
            if self.filtered.contains(record_id) {
                continue;
            }
            let mut record = as_object(record, record_id)?.clone();
            for (attr, attr_mapping) in &info.internal_mapping {
                let Some(value) = record.get(attr).filter(|v| !is_blank(v)) else {
                    debug!(%target, %record_id, %attr, "attribute not found for record");
                    continue;
                };
                let values = apply_operation(value, attr_mapping.operation, target, attr)?;
                let mut mapped = Vec::new();
                for v in &values {
                    if let Some(id) = self.map_value(v, info, attr_mapping, target, attr)? {
                        mapped.push(Value::String(id));
                    }
                }
                if mapped.is_empty() {
                    return Err(ContentError::UnmappedAttribute {
                        table: target.to_string(),
                        record_id: record_id.clone(),
                        attribute: attr.clone(),
                    });
                }
                record.insert(attr.clone(), Value::Array(mapped));
            }
            for key in &info.rm_keys {
                record.remove(key);
            }
            records.insert(record_id.clone(), Value::Object(record));
        }

        let mut out = table.clone();
        out.insert("records".to_string(), Value::Object(records));
        Ok(out)
    }

    /// Resolve one attribute value to a record id of the destination table.
    /// `None` means every candidate was filtered out.
    fn map_value(
        &self,
        value: &Value,
        info: &TableMapping,
        attr_mapping: &AttributeMapping,
        target: &str,
        attr: &str,
    ) -> Result<Option<String>> {
        let destination = self
            .source_records(&attr_mapping.base, &attr_mapping.table)?
            .ok_or_else(|| {
                if self.data.contains_key(&attr_mapping.base) {
                    ContentError::MissingCopyTable {
                        base: attr_mapping.base.clone(),
                        table: attr_mapping.table.clone(),
                    }
                } else {
                    ContentError::MissingBase(attr_mapping.base.clone())
                }
            })?;

        match attr_mapping.entry_type {
            EntryType::RecordId => {
                let Some(copy_table) = attr_mapping.base_copy_of_table.as_deref() else {
                    return Err(ContentError::InvalidMapping {
                        table: target.to_string(),
                        attribute: attr.to_string(),
                        message: "entry_type `record_id` requires `base_copy_of_table`".into(),
                    });
                };
                let copies = self
                    .source_records(&info.source_base, copy_table)?
                    .ok_or_else(|| ContentError::MissingCopyTable {
                        base: info.source_base.clone(),
                        table: copy_table.to_string(),
                    })?;
                let copy_id = value.as_str().unwrap_or_default();
                let copy = copies
                    .get(copy_id)
                    .ok_or_else(|| ContentError::MissingRecord {
                        table: format!("{}/{}", info.source_base, copy_table),
                        record_id: copy_id.to_string(),
                    })?;
                let copy = as_object(copy, copy_id)?;
                self.match_record_by_keys(copy, destination, &attr_mapping.map_by_key)
            }
            EntryType::Name => {
                let Some(key) = attr_mapping.map_by_key.first() else {
                    return Err(ContentError::InvalidMapping {
                        table: target.to_string(),
                        attribute: attr.to_string(),
                        message: "`map_by_key` is empty".into(),
                    });
                };
                let candidates = candidates_with(destination, key, value);
                self.pick_unique(candidates, value.to_string(), vec![key.clone()])
            }
        }
    }

    /// Try each key in turn and stop at the first one giving a unique,
    /// unfiltered match.
    fn match_record_by_keys(
        &self,
        copy: &Map<String, Value>,
        destination: &Map<String, Value>,
        keys: &[String],
    ) -> Result<Option<String>> {
        let mut candidates = Vec::new();
        for key in keys {
            let Some(wanted) = copy.get(key) else {
                continue;
            };
            candidates = candidates_with(destination, key, wanted);
            let unfiltered = candidates
                .iter()
                .filter(|id| !self.filtered.contains(*id))
                .count();
            if unfiltered == 1 {
                break;
            }
        }
        self.pick_unique(candidates, Value::Object(copy.clone()).to_string(), keys.to_vec())
    }

    fn pick_unique(
        &self,
        candidates: Vec<String>,
        what: String,
        keys: Vec<String>,
    ) -> Result<Option<String>> {
        if candidates.is_empty() {
            return Err(ContentError::NoMatch { what, keys });
        }
        let mut matches: Vec<String> = candidates
            .into_iter()
            .filter(|id| !self.filtered.contains(id))
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            _ => Err(ContentError::AmbiguousMatch { what, keys, matches }),
        }
    }

    fn source_records(&self, base: &str, table: &str) -> Result<Option<&'a Map<String, Value>>> {
        let Some(base_value) = self.data.get(base) else {
            return Ok(None);
        };
        let Some(table_value) = as_object(base_value, base)?.get(table) else {
            return Ok(None);
        };
        records_of(as_object(table_value, table)?, table).map(Some)
    }
}

fn candidates_with(records: &Map<String, Value>, key: &str, wanted: &Value) -> Vec<String> {
    records
        .iter()
        .filter(|(_, record)| record.get(key) == Some(wanted))
        .map(|(id, _)| id.clone())
        .collect()
}

fn record_passes(record: &Map<String, Value>, key: &str, filter: &RecordFilter) -> bool {
    let Some(value) = record.get(key) else {
        return false;
    };
    let contains = |v: &Value| v.as_str().is_some_and(|s| filter.values.iter().any(|f| f == s));
    match (filter.operator, value) {
        (FilterOperator::Nonempty, v) => !is_blank(v) && v != &Value::Bool(false),
        (FilterOperator::In, Value::Array(items)) => items.iter().any(contains),
        (FilterOperator::In, v) => contains(v),
        (FilterOperator::NotIn, Value::Array(items)) => items.iter().any(|v| !contains(v)),
        (FilterOperator::NotIn, v) => !contains(v),
    }
}

fn apply_operation(
    value: &Value,
    operation: MappingOperation,
    table: &str,
    attr: &str,
) -> Result<Vec<Value>> {
    match (operation, value) {
        (_, Value::Array(items)) => Ok(items.clone()),
        (MappingOperation::Split, Value::String(s)) => {
            let separator = comma_separator()?;
            Ok(separator
                .split(s)
                .map(|part| Value::String(part.to_string()))
                .collect())
        }
        (MappingOperation::Identity, Value::String(_)) => Ok(vec![value.clone()]),
        (_, other) => Err(ContentError::InvalidMapping {
            table: table.to_string(),
            attribute: attr.to_string(),
            message: format!("cannot map a {} value", json_kind(other)),
        }),
    }
}

fn comma_separator() -> Result<Regex> {
    const PATTERN: &str = r"\s*,\s*";
    Regex::new(PATTERN).map_err(|source| ContentError::Pattern {
        pattern: PATTERN.to_string(),
        source,
    })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

pub(crate) fn as_object<'v>(value: &'v Value, context: &str) -> Result<&'v Map<String, Value>> {
    value.as_object().ok_or_else(|| ContentError::NotAnObject {
        context: context.to_string(),
        found: json_kind(value),
    })
}

fn records_of<'v>(table: &'v Map<String, Value>, name: &str) -> Result<&'v Map<String, Value>> {
    match table.get("records") {
        Some(records) => as_object(records, name),
        None => Err(ContentError::MissingTable(format!("{name}/records"))),
    }
}
