//! Errors raised by the content pipeline.
//!
//! Every variant here is fatal: the pipeline runs offline against a full
//! export, so a mismatch between the declarative rules and the actual export
//! shape stops the run instead of producing a silently corrupted DR/VS pair.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("could not manage an export with {0} bases (expected 1, 3 or 4)")]
    BaseCount(usize),

    #[error("expected a JSON object for {context}, found {found}")]
    NotAnObject { context: String, found: &'static str },

    #[error("required table `{0}` is missing from the export")]
    MissingTable(String),

    #[error("base `{0}` not found in data")]
    MissingBase(String),

    #[error("table `{table}` not found in base `{base}`")]
    MissingCopyTable { base: String, table: String },

    #[error("record `{record_id}` not found in table `{table}`")]
    MissingRecord { table: String, record_id: String },

    #[error("no matches when consolidating {what} via {keys:?}")]
    NoMatch { what: String, keys: Vec<String> },

    #[error("multiple matches when consolidating {what} via {keys:?}: {matches:?}")]
    AmbiguousMatch {
        what: String,
        keys: Vec<String>,
        matches: Vec<String>,
    },

    #[error("{table} (record `{record_id}`): for attribute `{attribute}` no records could be mapped")]
    UnmappedAttribute {
        table: String,
        record_id: String,
        attribute: String,
    },

    #[error("invalid mapping for `{table}`.`{attribute}`: {message}")]
    InvalidMapping {
        table: String,
        attribute: String,
        message: String,
    },

    #[error("several keys ({keys:?}) match pattern `{pattern}` in table `{table}`")]
    AmbiguousRename {
        table: String,
        pattern: String,
        keys: Vec<String>,
    },

    #[error("could not reshape key `{key}` from id `{uid}` of element type `{table}`: {reason}")]
    Reshape {
        table: String,
        uid: String,
        key: String,
        reason: String,
    },

    #[error("could not split `{table}`.`{key}` of `{uid}` into the data request: {reason}")]
    Split {
        table: String,
        uid: String,
        key: String,
        reason: String,
    },

    #[error("invalid pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("could not read `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write `{path}`: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ContentError>;

/// Short JSON type name used in error messages.
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
