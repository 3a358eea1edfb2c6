//! Data Request content pipeline
//!
//! Turns a raw Airtable export into the two documents the query layer reads:
//! - the **Data Request** (DR): relations between opportunities, variable
//!   groups and experiment groups
//! - the **Vocabulary Server** (VS): every descriptive attribute, keyed by
//!   table then uid
//!
//! ```text
//! raw export ──► consolidate ──► normalize keys ──► transform ──► split ──► (DR, VS)
//! ```
//!
//! All rules are declarative and live in [`TransformConfig`].

pub mod config;
pub mod consolidate;
pub mod error;
pub mod io;
pub mod keys;
pub mod links;
pub mod split;
pub mod transform;
pub mod uid;

pub use config::{TransformConfig, UidStrategy};
pub use consolidate::consolidate;
pub use error::{ContentError, Result};
pub use keys::{normalize_document_keys, normalize_key};
pub use links::{is_link, make_link, reassign_identifiers, LINK_PREFIX};
pub use split::split_content;
pub use transform::transform_one_base;
pub use uid::UidGenerator;

use serde_json::Value;
use tracing::info;

/// Version of this library, reported next to the content version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the full pipeline on a raw export and return `(dr, vs)`, both stamped
/// with `version`.
pub fn transform_content(raw: &Value, version: &str, config: &TransformConfig) -> Result<(Value, Value)> {
    info!(%version, "transforming data request content");
    let unified = consolidate(raw, config)?;
    let normalized = normalize_document_keys(&unified);
    let mut uids = UidGenerator::new(config.uid_strategy);
    let content = transform_one_base(&normalized, &config.tidy, &mut uids)?;
    split_content(content, &config.split, version)
}
