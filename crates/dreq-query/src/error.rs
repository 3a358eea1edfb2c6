//! Errors raised by the query layer.

use dreq_content::ContentError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("could not find element type `{0}` in the vocabulary server")]
    UnknownElementType(String),

    #[error("could not find {id_type} `{value}` of type `{table}`")]
    MissingReference {
        table: String,
        value: String,
        id_type: String,
    },

    #[error("could not find key `{key}` of id `{uid}` of type `{table}` in the vocabulary server")]
    MissingKey { table: String, uid: String, key: String },

    #[error("{id_type} `{value}` is not unique for element type `{table}`: {matches:?}")]
    AmbiguousKey {
        table: String,
        id_type: String,
        value: String,
        matches: Vec<String>,
    },

    #[error("could not filter {element_type} by {request}")]
    InapplicableFilter { element_type: String, request: String },

    #[error("operation `{0}` is not supported: choose among 'any' (match at least one requirement) and 'all' (match all requirements)")]
    InvalidOperation(String),

    #[error("invalid priority level `{0}` (expected Core, High, Medium or Low)")]
    InvalidPriority(String),

    #[error("invalid {what} document: {reason}")]
    InvalidDocument { what: &'static str, reason: String },

    #[error("core variables check failed for experiment `{experiment}`: {reason}")]
    CoreVariables { experiment: String, reason: String },

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueryError>;
