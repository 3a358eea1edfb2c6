//! Declarative transformation rules.
//!
//! Every table-specific decision the pipeline makes (which base a table comes
//! from, how cross-base links are resolved, which fields are scratch fields,
//! what ends up in the DR rather than the VS) lives in [`TransformConfig`].
//! `TransformConfig::default()` reproduces the production rules for the CMIP7
//! Airtable export; a JSON file with the same shape can replace them.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::io::read_json_file;

// ============================================================================
// Top-level configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Unified table name -> how to obtain it from a multi-base export.
    pub mapping: BTreeMap<String, TableMapping>,
    /// Content version -> table renames applied to one-base exports.
    pub version_renames: BTreeMap<String, BTreeMap<String, String>>,
    pub tidy: TidyRules,
    pub split: SplitLayout,
    pub uid_strategy: UidStrategy,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            mapping: default_mapping(),
            version_renames: BTreeMap::from([(
                "v1.0alpha".to_string(),
                BTreeMap::from([("Frequency".to_string(), "CMIP7 Frequency".to_string())]),
            )]),
            tidy: TidyRules::default(),
            split: SplitLayout::default(),
            uid_strategy: UidStrategy::default(),
        }
    }
}

impl TransformConfig {
    /// Load a configuration from a JSON file. Missing sections fall back to
    /// the production defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let value = read_json_file(path)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// How records without an explicit `uid` are given one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UidStrategy {
    /// `default_<n>` from a counter scoped to one transformation run. Not
    /// stable across content versions.
    #[default]
    Sequential,
    /// `default_<digest>` derived from the table name and record content.
    ContentDigest,
}

// ============================================================================
// Consolidation mapping
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMapping {
    pub source_base: String,
    pub source_table: String,
    #[serde(default)]
    pub internal_mapping: BTreeMap<String, AttributeMapping>,
    #[serde(default)]
    pub internal_filters: BTreeMap<String, RecordFilter>,
    /// Back-reference fields dropped from the copied records.
    #[serde(default)]
    pub rm_keys: Vec<String>,
}

/// How one link-valued attribute is re-pointed at the destination base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeMapping {
    /// Copy of the destination table inside the source base (required for
    /// `record_id` entries).
    #[serde(default)]
    pub base_copy_of_table: Option<String>,
    pub base: String,
    pub table: String,
    #[serde(default)]
    pub operation: MappingOperation,
    pub map_by_key: Vec<String>,
    pub entry_type: EntryType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingOperation {
    /// Comma-joined string split into a list.
    #[serde(rename = "split")]
    Split,
    /// A list is used as-is, a single string is wrapped.
    #[default]
    #[serde(rename = "")]
    Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    RecordId,
    Name,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub operator: FilterOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "nonempty")]
    Nonempty,
    #[serde(rename = "in", alias = "any")]
    In,
    #[serde(rename = "not in")]
    NotIn,
}

impl RecordFilter {
    fn nonempty() -> Self {
        Self {
            operator: FilterOperator::Nonempty,
            values: Vec::new(),
        }
    }

    fn with(operator: FilterOperator, values: &[&str]) -> Self {
        Self {
            operator,
            values: strings(values),
        }
    }
}

const OPPORTUNITIES_BASE: &str = "Data Request Opportunities (Public)";
const VARIABLES_BASE: &str = "Data Request Variables (Public)";
const PHYSICAL_PARAMETERS_BASE: &str = "Data Request Physical Parameters (Public)";

fn plain(source_base: &str, source_table: &str, rm_keys: &[&str]) -> TableMapping {
    TableMapping {
        source_base: source_base.to_string(),
        source_table: source_table.to_string(),
        internal_mapping: BTreeMap::new(),
        internal_filters: BTreeMap::new(),
        rm_keys: strings(rm_keys),
    }
}

fn default_mapping() -> BTreeMap<String, TableMapping> {
    use FilterOperator::{In, NotIn};

    let mut mapping = BTreeMap::new();
    let mut add = |name: &str, table: TableMapping| {
        mapping.insert(name.to_string(), table);
    };

    let pp = PHYSICAL_PARAMETERS_BASE;
    let var = VARIABLES_BASE;
    let opp = OPPORTUNITIES_BASE;

    add("CF Standard Names", plain(pp, "CF Standard Name", &["Physical Parameters", "Physical Parameters 2"]));
    add("Cell Measures", plain(var, "Cell Measures", &["Variables"]));
    add("Cell Methods", plain(var, "Cell Methods", &["Structures", "Variables"]));
    add("Coordinates and Dimensions", plain(var, "Coordinate or Dimension", &["Structure", "Variables"]));
    add("Data Request Themes", plain(opp, "Data Request Themes", &[]));
    add("Docs for Opportunities", plain(opp, "Docs for Opportunities", &[]));
    add("ESM-BCV 1.3", plain(var, "ESM-BCV 1.3", &[]));

    let mut experiment_group = plain(opp, "Experiment Group", &["Opportunity"]);
    experiment_group.internal_filters = BTreeMap::from([
        ("Status".to_string(), RecordFilter::with(NotIn, &["Junk"])),
        (
            "Status (from Opportunity)".to_string(),
            RecordFilter::with(In, &["New", "Under review", "Accepted"]),
        ),
    ]);
    add("Experiment Group", experiment_group);

    add("Experiments", plain(opp, "Experiment", &["Experiment Group"]));
    add("CMIP6 Frequency (legacy)", plain(var, "CMIP6 Frequency (legacy)", &[]));
    add("CMIP7 Frequency", plain(var, "CMIP7 Frequency", &["Table Identifiers", "Variables"]));
    add("Glossary", plain(opp, "Glossary", &["Opportunity"]));
    add("MIPs", plain(opp, "MIP", &["Variable Group"]));
    add("Modelling Realm", plain(var, "Modelling Realm", &["Variables"]));

    let mut opportunity = plain(opp, "Opportunity", &[]);
    opportunity.internal_filters = BTreeMap::from([(
        "Status".to_string(),
        RecordFilter::with(In, &["Under review", "Accepted"]),
    )]);
    add("Opportunity", opportunity);

    add(
        "Opportunity/Variable Group Comments",
        plain(opp, "Comment", &["Experiment Groups", "Opportunities", "Theme", "Variable Groups"]),
    );
    add("Physical Parameter Comments", plain(pp, "Comment", &["Physical parameters"]));
    add("Physical Parameters", plain(pp, "Physical Parameter", &["Variables"]));
    add("Priority Level", plain(opp, "Priority Level", &["Variable Group"]));
    add("Ranking", plain(var, "Ranking", &[]));
    add("Spatial Shape", plain(var, "Spatial Shape", &["Dimensions", "Structure", "Variables"]));
    add("Structure", plain(var, "Structure", &["Variables"]));
    add("Table Identifiers", plain(var, "Table Identifiers", &["Variables"]));
    add("Temporal Shape", plain(var, "Temporal Shape", &["Dimensions", "Structure", "Variables"]));
    add("Time Slice", plain(opp, "Time Slice", &[]));
    add("Variable Comments", plain(var, "Comment", &["Variables"]));

    let mut variable_group = plain(opp, "Variable Group", &["Opportunity", "Theme"]);
    variable_group.internal_mapping = BTreeMap::from([(
        "Variables".to_string(),
        AttributeMapping {
            base_copy_of_table: Some("Variables".to_string()),
            base: var.to_string(),
            table: "Variable".to_string(),
            operation: MappingOperation::Identity,
            map_by_key: strings(&["UID", "Compound Name"]),
            entry_type: EntryType::RecordId,
        },
    )]);
    variable_group.internal_filters = BTreeMap::from([
        ("Final Opportunity selection".to_string(), RecordFilter::nonempty()),
        (
            "Status (from Final Opportunity selection)".to_string(),
            RecordFilter::with(In, &["Under review", "Accepted"]),
        ),
    ]);
    add("Variable Group", variable_group);

    let mut variables = plain(var, "Variable", &["CMIP7 Variable Groups"]);
    variables.internal_mapping = BTreeMap::from([
        (
            "CMIP7 Variable Groups".to_string(),
            AttributeMapping {
                base_copy_of_table: None,
                base: opp.to_string(),
                table: "Variable Group".to_string(),
                operation: MappingOperation::Split,
                map_by_key: strings(&["Name"]),
                entry_type: EntryType::Name,
            },
        ),
        (
            "Physical Parameter".to_string(),
            AttributeMapping {
                base_copy_of_table: Some("Physical Parameter".to_string()),
                base: pp.to_string(),
                table: "Physical Parameter".to_string(),
                operation: MappingOperation::Identity,
                map_by_key: strings(&["UID", "Name"]),
                entry_type: EntryType::RecordId,
            },
        ),
        (
            "CF Standard Name (from MIP Variables)".to_string(),
            AttributeMapping {
                base_copy_of_table: None,
                base: pp.to_string(),
                table: "CF Standard Name".to_string(),
                operation: MappingOperation::Identity,
                map_by_key: strings(&["name"]),
                entry_type: EntryType::Name,
            },
        ),
    ]);
    variables.internal_filters = BTreeMap::from([
        ("CMIP7 Variable Groups".to_string(), RecordFilter::nonempty()),
        (
            "Opportunity Status (from CMIP7 Variable Groups)".to_string(),
            RecordFilter::with(In, &["Under review", "Accepted"]),
        ),
    ]);
    add("Variables", variables);

    mapping
}

// ============================================================================
// Tidy-up rules
// ============================================================================

/// `pattern` (matched at the start of the key) is replaced by `to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameRule {
    pub pattern: String,
    pub to: String,
}

fn renames(pairs: &[(&str, &str)]) -> Vec<RenameRule> {
    pairs
        .iter()
        .map(|(pattern, to)| RenameRule {
            pattern: pattern.to_string(),
            to: to.to_string(),
        })
        .collect()
}

fn per_table<T>(entries: Vec<(&str, T)>) -> BTreeMap<String, T> {
    entries
        .into_iter()
        .map(|(table, value)| (table.to_string(), value))
        .collect()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Field and table level clean-up applied to the unified base. All patterns
/// are regular expressions anchored at the start of the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TidyRules {
    /// Exact table renames, applied after key normalization.
    pub table_renames: Vec<RenameRule>,
    /// Tables whose name matches one of these are dropped entirely.
    pub drop_table_patterns: Vec<String>,
    /// Substrings stripped from table names (then `_` trimmed).
    pub strip_table_markers: Vec<String>,
    /// Tables matching this pattern are merged under `esm_bcv_table`; the
    /// variables field carrying the old table name is renamed too.
    pub esm_bcv_pattern: String,
    pub esm_bcv_table: String,
    pub default_deny: Vec<String>,
    pub deny: BTreeMap<String, Vec<String>>,
    pub renames: BTreeMap<String, Vec<RenameRule>>,
    pub merges: BTreeMap<String, Vec<RenameRule>>,
    /// Fields whose list value is sorted and deduplicated.
    pub sort_keys: BTreeMap<String, Vec<String>>,
    /// Fields whose single-element list collapses to a scalar.
    pub scalar_keys: BTreeMap<String, Vec<String>>,
    /// Opportunity statuses that survive filtering. A missing status is kept.
    pub kept_statuses: Vec<String>,
    /// Experiment group statuses that are dropped even when referenced.
    pub junk_statuses: Vec<String>,
    /// Fields consumed by status filtering and stripped afterwards.
    pub status_pattern: String,
}

impl Default for TidyRules {
    fn default() -> Self {
        Self {
            table_renames: renames(&[
                ("opportunity", "opportunities"),
                ("experiment_group", "experiment_groups"),
                ("variable_group", "variable_groups"),
                ("structure", "structure_title"),
                ("time_slice", "time_subset"),
            ]),
            drop_table_patterns: strings(&[".*rank.*"]),
            strip_table_markers: strings(&["(legacy)"]),
            esm_bcv_pattern: "esm-bcv.*".to_string(),
            esm_bcv_table: "esm-bcv".to_string(),
            default_deny: strings(&[
                r".*\(from.*\).*",
                ".*proposed.*",
                ".*review.*",
                ".*--.*",
                ".*created.*",
                ".*rank.*",
                ".*count.*",
                ".*alert.*",
                ".*tagged.*",
                ".*unique.*",
                "last_modified.*",
                ".*validation.*",
                ".*number.*",
                ".*mj.*",
                ".*proposal.*",
            ]),
            deny: default_deny_rules(),
            renames: default_rename_rules(),
            merges: per_table(vec![("opportunities", renames(&[("mips.*", "mips")]))]),
            sort_keys: per_table(vec![
                (
                    "opportunities",
                    strings(&["variable_groups", "data_request_themes", "experiment_groups", "time_subset"]),
                ),
                ("experiment_groups", strings(&["experiments"])),
                ("variable_groups", strings(&["variables", "mips"])),
            ]),
            scalar_keys: per_table(vec![
                ("opportunities", strings(&["lead_theme"])),
                ("physical_parameters", strings(&["cf_standard_name"])),
                ("table_identifiers", strings(&["cmip7_frequency"])),
                (
                    "variables",
                    strings(&[
                        "cell_methods",
                        "cmip6_frequency",
                        "cmip7_frequency",
                        "esm-bcv",
                        "physical_parameter",
                        "spatial_shape",
                        "table_identifier",
                        "temporal_shape",
                    ]),
                ),
            ]),
            kept_statuses: strings(&["Accepted", "Under review"]),
            junk_statuses: strings(&["Junk"]),
            status_pattern: ".*status.*".to_string(),
        }
    }
}

fn default_deny_rules() -> BTreeMap<String, Vec<String>> {
    per_table(vec![
        ("cell_measures", strings(&["variables", "structure"])),
        ("cell_methods", strings(&["structure", "variables"])),
        ("cf_standard_names", strings(&["physical_parameters.*", "esm-bcv.*"])),
        ("cmip6_frequency", strings(&["table_identifiers.*", "variables.*"])),
        ("cmip7_frequency", strings(&["table_identifiers.*", "variables.*"])),
        (
            "coordinates_and_dimensions",
            strings(&["spatial_shape", "structure", "temporal_shape", "variables", "size"]),
        ),
        (
            "data_request_themes",
            strings(&["experiment_group.*", ".*opportunit.*", "variable_group.*"]),
        ),
        ("esm-bcv", strings(&[r"v\d.*", "cf_standard_name", ".*variables"])),
        ("experiment_groups", strings(&["opportunit.*", "theme.*", "comments.+"])),
        (
            "experiments",
            strings(&["experiment_group.*", "opportunit.*", "variables", "mip"]),
        ),
        ("glossary", strings(&["opportunit.*"])),
        (
            "mips",
            strings(&["variable_group.*", "experiments.*", ".*opportunit.*", "variables"]),
        ),
        ("modelling_realm", strings(&["variables"])),
        (
            "opportunities",
            strings(&[
                ".*data_volume_estimate",
                "opportunity_id",
                "originally_requested_variable_groups",
            ]),
        ),
        (
            "opportunity/variable_group_comments",
            strings(&["experiment_groups", "opportunities", "theme", "variable_groups"]),
        ),
        ("physical_parameters", strings(&["variables", "conditional", "does_a_cf.*"])),
        (
            "physical_parameter_comments",
            strings(&["physical_parameters", "does_a.*", "cf_standard_names"]),
        ),
        ("priority_level", strings(&["variable_group"])),
        (
            "spatial_shape",
            strings(&["dimensions.*", "structure.*", ".*variables.*", "hor.*", "vert.*"]),
        ),
        ("structure_title", strings(&["variables.*", "brand_.*", "calculation.*"])),
        ("table_identifiers", strings(&["variables"])),
        ("temporal_shape", strings(&["variables", "structure"])),
        ("time_subset", strings(&["uid.+", "opportunit.*"])),
        (
            "variable_comments",
            strings(&[
                "variable.*",
                "spatial_shape",
                "temporal_shape",
                "coordinates_and_dimensions",
                "cell_methods",
                "cell_measures",
            ]),
        ),
        (
            "variable_groups",
            strings(&[".*opportunit.*", "theme", "size.*", "mip_ownership"]),
        ),
        (
            "variables",
            strings(&[
                "priority.*",
                ".*variable_group.*",
                ".*experiment.*",
                "size",
                "vertical_dimension",
                "temporal_sampling_rate",
                "horizontal_mesh",
                r"brand.*\[link\]",
                "structure_label",
                "table_section.*",
                "theme",
            ]),
        ),
    ])
}

fn default_rename_rules() -> BTreeMap<String, Vec<RenameRule>> {
    per_table(vec![
        ("cell_methods", renames(&[("comments", "variable_comments"), ("label", "name")])),
        ("cf_standard_names", renames(&[("comments", "physical_parameter_comments")])),
        ("cmip7_frequency", renames(&[("cmip6_frequency.*", "cmip6_frequency")])),
        (
            "coordinates_and_dimensions",
            renames(&[
                ("requested_bounds.+", "requested_bounds"),
                ("comments", "variable_comments"),
            ]),
        ),
        (
            "data_request_themes",
            renames(&[
                ("comments", "opportunity/variable_group_comments"),
                ("uid.+", "uid"),
            ]),
        ),
        ("experiments", renames(&[("experiment", "name")])),
        (
            "experiment_groups",
            renames(&[("comments", "opportunity/variable_group_comments")]),
        ),
        ("modelling_realm", renames(&[("id", "uid")])),
        (
            "opportunities",
            renames(&[
                ("title_of_opportunity", "name"),
                ("comments", "opportunity/variable_group_comments"),
                ("ensemble_size", "minimum_ensemble_size"),
                ("themes", "data_request_themes"),
                ("working/updated_variable_groups", "variable_groups"),
                ("time_slice", "time_subset"),
            ]),
        ),
        (
            "physical_parameters",
            renames(&[
                ("comments", "physical_parameter_comments"),
                ("cf_proposal_github_issue", "proposal_github_issue"),
                ("flag.*change.*", "flag_change_since_cmip6"),
            ]),
        ),
        ("spatial_shape", renames(&[("comments", "variable_comments")])),
        ("temporal_shape", renames(&[("comments", "variable_comments")])),
        ("structure_title", renames(&[("label", "name")])),
        (
            "table_identifiers",
            renames(&[("comment", "notes"), ("frequency", "cmip6_frequency")]),
        ),
        ("time_subset", renames(&[("label", "name")])),
        (
            "variable_groups",
            renames(&[
                (".*mips.*", "mips"),
                ("comments", "opportunity/variable_group_comments"),
            ]),
        ),
        (
            "variables",
            renames(&[
                ("compound_name", "name"),
                ("cmip6_frequency.+", "cmip6_frequency"),
                ("modeling_realm", "modelling_realm"),
                ("comments", "variable_comments"),
                ("table", "table_identifier"),
            ]),
        ),
    ])
}

// ============================================================================
// DR / VS split
// ============================================================================

/// Shape a relational field takes in the DR document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldShape {
    /// Always a list; a scalar is wrapped.
    List,
    /// A string or null; a list keeps its first element.
    OptionalString,
    /// Copied as-is, falling back to the default.
    Scalar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrField {
    /// Key written to the DR document.
    pub key: String,
    /// Field read from the tidied record (defaults to `key`).
    #[serde(default)]
    pub source: Option<String>,
    pub shape: FieldShape,
    #[serde(default)]
    pub default: serde_json::Value,
    /// Copy the value instead of moving it out of the VS record.
    #[serde(default)]
    pub keep_in_vs: bool,
}

impl DrField {
    fn list(key: &str, source: Option<&str>) -> Self {
        Self {
            key: key.to_string(),
            source: source.map(str::to_string),
            shape: FieldShape::List,
            default: serde_json::Value::Array(Vec::new()),
            keep_in_vs: false,
        }
    }

    pub fn source_key(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.key)
    }
}

/// Structural table -> fields moved into the DR document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SplitLayout(pub BTreeMap<String, Vec<DrField>>);

impl Default for SplitLayout {
    fn default() -> Self {
        Self(per_table(vec![
            (
                "opportunities",
                vec![
                    DrField::list("experiment_groups", None),
                    DrField::list("variable_groups", None),
                    DrField::list("data_request_themes", None),
                    DrField::list("time_subsets", Some("time_subset")),
                    DrField::list("mips", None),
                    DrField {
                        key: "ensemble_size".to_string(),
                        source: Some("minimum_ensemble_size".to_string()),
                        shape: FieldShape::Scalar,
                        default: serde_json::Value::from(1),
                        keep_in_vs: true,
                    },
                ],
            ),
            (
                "variable_groups",
                vec![
                    DrField::list("variables", None),
                    DrField::list("mips", None),
                    DrField {
                        key: "priority_level".to_string(),
                        source: None,
                        shape: FieldShape::OptionalString,
                        default: serde_json::Value::Null,
                        keep_in_vs: false,
                    },
                ],
            ),
            ("experiment_groups", vec![DrField::list("experiments", None)]),
        ]))
    }
}
