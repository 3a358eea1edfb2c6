//! Data Request query layer
//!
//! Reads the DR and VS documents produced by `dreq-content` and exposes them
//! as a lazily built graph of elements:
//!
//! ```text
//! Opportunity ─┬─► ExperimentsGroup ──► experiments
//!              ├─► VariablesGroup ─┬──► variables ──► VS attributes
//!              │                   └──► priority_level
//!              └─► themes, time subsets, mips
//! ```
//!
//! On top of the graph sit the relational filter
//! ([`DataRequest::filter_elements_per_request`]), the tabular exports and
//! the requested-variables report.

pub mod data_request;
pub mod element;
pub mod error;
pub mod export;
pub mod filter;
pub mod report;
pub mod vocabulary;

pub use data_request::{DataRequest, Input};
pub use element::{AttrValue, Element, ElementId, ElementKind, Resolved};
pub use error::{QueryError, Result};
pub use export::{FilterSpec, SummaryLayout, TextTable, DEFAULT_SEPARATOR};
pub use filter::{filter_on_request, FilterOutcome, Operation, RequestValue, Requests, Strategy, STRATEGIES};
pub use report::{
    get_requested_variables, ExperimentRequest, OpportunitySelection, PriorityLevel, ReportHeader, ReportOptions,
    RequestedVariables,
};
pub use vocabulary::{IdType, VocabularyServer};

/// Version of the query API, reported next to the content version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
