//! Vocabulary Server
//!
//! Read-only store of every descriptive attribute of the Data Request, keyed by
//! table then uid. It is built once from a VS document and never mutated;
//! caching of constructed elements lives one layer up, in
//! [`crate::DataRequest`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use dreq_content::io::read_json_file;
use dreq_content::{is_link, make_link};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{QueryError, Result};

pub type Record = Map<String, Value>;
type Table = BTreeMap<String, Record>;

pub const VERSION_KEY: &str = "version";

/// Attribute names that do not follow the plural table naming.
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("themes", "data_request_themes"),
    ("theme", "data_request_themes"),
    ("time_subsets", "time_subset"),
    ("structure", "structure_title"),
    ("table", "table_identifiers"),
    ("esm_bcv", "esm-bcv"),
    ("priority", "priority_level"),
    ("priority_levels", "priority_level"),
    ("frequency", "cmip7_frequency"),
];

/// How a lookup value identifies a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType<'a> {
    /// The record key itself.
    Uid,
    /// The value of an attribute, or one of its items when list-valued.
    Field(&'a str),
}

impl IdType<'static> {
    pub const NAME: Self = IdType::Field("name");
}

impl fmt::Display for IdType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdType::Uid => f.write_str("uid"),
            IdType::Field(field) => f.write_str(field),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VocabularyServer {
    version: String,
    tables: BTreeMap<String, Table>,
}

impl VocabularyServer {
    /// Build from a VS document: `{version, <table>: {<uid>: {...}}}`.
    pub fn from_value(document: Value) -> Result<Self> {
        let Value::Object(mut document) = document else {
            return Err(invalid("the document is not an object"));
        };
        let version = match document.remove(VERSION_KEY) {
            Some(Value::String(version)) => version,
            Some(_) => return Err(invalid("`version` is not a string")),
            None => return Err(invalid("`version` is missing")),
        };

        let mut tables = BTreeMap::new();
        for (name, table) in document {
            let Value::Object(records) = table else {
                return Err(invalid(format!("table `{name}` is not an object")));
            };
            let mut parsed = Table::new();
            for (uid, record) in records {
                let Value::Object(record) = record else {
                    return Err(invalid(format!("record `{uid}` of table `{name}` is not an object")));
                };
                parsed.insert(uid, record);
            }
            tables.insert(name, parsed);
        }
        debug!(tables = tables.len(), %version, "vocabulary server loaded");
        Ok(Self { version, tables })
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        Self::from_value(read_json_file(path)?)
    }

    /// Content version the document was stamped with.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub(crate) fn record(&self, table: &str, uid: &str) -> Option<&Record> {
        self.tables.get(table).and_then(|records| records.get(uid))
    }

    /// Table holding the elements an attribute or relation named `field`
    /// points at, e.g. `physical_parameter -> physical_parameters`.
    ///
    /// Falls back to the alias-resolved name when no table matches.
    pub fn resolve_table(&self, field: &str) -> String {
        resolve_table_name(field, |table| self.has_table(table))
    }

    /// Ids of every record of the table `field` resolves to, sorted.
    pub fn get_element_type_ids(&self, field: &str) -> Result<(String, Vec<String>)> {
        let table = self.resolve_table(field);
        let records = self
            .tables
            .get(&table)
            .ok_or_else(|| QueryError::UnknownElementType(field.to_string()))?;
        let ids = records.keys().cloned().collect();
        Ok((table, ids))
    }

    /// Locate a record and return its uid with a borrow of its attributes.
    ///
    /// `Ok(None)` when nothing matches; an unknown table or several matches
    /// on an alternate key are errors.
    pub(crate) fn find(&self, table: &str, value: &str, id_type: IdType<'_>) -> Result<Option<(&str, &Record)>> {
        let records = self
            .tables
            .get(table)
            .ok_or_else(|| QueryError::UnknownElementType(table.to_string()))?;
        let (_, value) = is_link(value);

        let field = match id_type {
            IdType::Uid => {
                return Ok(records.get_key_value(value).map(|(uid, record)| (uid.as_str(), record)));
            }
            IdType::Field(field) => field,
        };

        let link = make_link(value);
        let matches: Vec<(&str, &Record)> = records
            .iter()
            .filter(|(_, record)| match record.get(field) {
                Some(Value::String(s)) => s == value || *s == link,
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| item.as_str().is_some_and(|s| s == value || s == link)),
                _ => false,
            })
            .map(|(uid, record)| (uid.as_str(), record))
            .collect();

        match matches.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(*one)),
            _ => Err(QueryError::AmbiguousKey {
                table: table.to_string(),
                id_type: field.to_string(),
                value: value.to_string(),
                matches: matches.iter().map(|(uid, _)| uid.to_string()).collect(),
            }),
        }
    }

    /// Copy of the record identified by `value`, or `None` when absent.
    pub fn try_get_element(&self, table: &str, value: &str, id_type: IdType<'_>) -> Result<Option<Record>> {
        Ok(self.find(table, value, id_type)?.map(|(_, record)| record.clone()))
    }

    /// Copy of the record identified by `value`; absent records are an error.
    pub fn get_element(&self, table: &str, value: &str, id_type: IdType<'_>) -> Result<Record> {
        self.try_get_element(table, value, id_type)?
            .ok_or_else(|| missing(table, value, id_type))
    }

    /// One attribute of the record identified by `value`.
    pub fn get_element_key(&self, table: &str, value: &str, id_type: IdType<'_>, key: &str) -> Result<Value> {
        let (uid, record) = self
            .find(table, value, id_type)?
            .ok_or_else(|| missing(table, value, id_type))?;
        record.get(key).cloned().ok_or_else(|| QueryError::MissingKey {
            table: table.to_string(),
            uid: uid.to_string(),
            key: key.to_string(),
        })
    }

    /// Singular form of a table name, used when printing elements.
    pub fn to_singular(table: &str) -> String {
        if let Some(stem) = table.strip_suffix("ies") {
            format!("{stem}y")
        } else if table.ends_with("ss") {
            table.to_string()
        } else if let Some(stem) = table.strip_suffix('s') {
            stem.to_string()
        } else {
            table.to_string()
        }
    }
}

/// Resolve `field` to a table name accepted by `exists`, trying the name as
/// is, its alias, then plural and singular spellings.
pub(crate) fn resolve_table_name(field: &str, exists: impl Fn(&str) -> bool) -> String {
    let aliased = FIELD_ALIASES
        .iter()
        .find(|(from, _)| *from == field)
        .map(|(_, to)| to.to_string());

    let mut candidates = vec![field.to_string()];
    candidates.extend(aliased.clone());
    candidates.push(format!("{field}s"));
    if let Some(stem) = field.strip_suffix('y') {
        candidates.push(format!("{stem}ies"));
    }
    if let Some(stem) = field.strip_suffix('s') {
        candidates.push(stem.to_string());
    }

    candidates
        .into_iter()
        .find(|candidate| exists(candidate))
        .unwrap_or_else(|| aliased.unwrap_or_else(|| field.to_string()))
}

fn missing(table: &str, value: &str, id_type: IdType<'_>) -> QueryError {
    QueryError::MissingReference {
        table: table.to_string(),
        value: value.to_string(),
        id_type: id_type.to_string(),
    }
}

fn invalid(reason: impl Into<String>) -> QueryError {
    QueryError::InvalidDocument {
        what: "vocabulary server",
        reason: reason.into(),
    }
}
