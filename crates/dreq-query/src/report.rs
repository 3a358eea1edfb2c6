//! Requested variables by experiment
//!
//! For every experiment requested by the selected opportunities, the
//! variables to produce grouped by priority level. Levels are mutually
//! exclusive: a variable requested at several levels is only listed at the
//! highest one.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::str::FromStr;

use dreq_content::io::file_sha256;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::data_request::DataRequest;
use crate::element::{Element, Resolved, EXPERIMENTS, EXPERIMENT_GROUPS, VARIABLES, VARIABLE_GROUPS};
use crate::error::{QueryError, Result};

const DESCRIPTION: &str = "Names of the output variables requested from CMIP experiments by the supported \
Opportunities. The variables requested from each experiment are listed under the experiment name, grouped by \
the priority level at which they are requested. Each list compiles the requests of all supported Opportunities \
for output from that experiment.";

// ============================================================================
// Priority levels
// ============================================================================

/// Ordered from highest to lowest priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PriorityLevel {
    Core,
    High,
    Medium,
    Low,
}

impl PriorityLevel {
    pub const ALL: [PriorityLevel; 4] = [
        PriorityLevel::Core,
        PriorityLevel::High,
        PriorityLevel::Medium,
        PriorityLevel::Low,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PriorityLevel::Core => "Core",
            PriorityLevel::High => "High",
            PriorityLevel::Medium => "Medium",
            PriorityLevel::Low => "Low",
        }
    }

    /// Levels at or above `self`.
    pub fn up_to(self) -> Vec<PriorityLevel> {
        Self::ALL.into_iter().filter(|level| *level <= self).collect()
    }
}

impl FromStr for PriorityLevel {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| QueryError::InvalidPriority(s.to_string()))
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Default)]
pub enum OpportunitySelection {
    #[default]
    All,
    /// Opportunities given by uid or by name.
    Only(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub opportunities: OpportunitySelection,
    /// Lowest priority level included.
    pub priority_cutoff: PriorityLevel,
    /// Require the same non-empty Core list for every experiment.
    pub check_core: bool,
    /// Content file the data request was loaded from, recorded with its
    /// digest in the header.
    pub content_file: Option<PathBuf>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            opportunities: OpportunitySelection::All,
            priority_cutoff: PriorityLevel::Low,
            check_core: false,
            content_file: None,
        }
    }
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ReportHeader {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Opportunities")]
    pub opportunities: Vec<String>,
    #[serde(rename = "dreq version")]
    pub dreq_version: String,
    #[serde(rename = "Priority levels supported")]
    pub priority_levels: Vec<PriorityLevel>,
    #[serde(rename = "Experiments included")]
    pub experiments: Vec<String>,
    #[serde(rename = "dreq content file", skip_serializing_if = "Option::is_none")]
    pub content_file: Option<String>,
    #[serde(rename = "dreq content sha256 hash", skip_serializing_if = "Option::is_none")]
    pub content_sha256: Option<String>,
    #[serde(rename = "dreq api version")]
    pub api_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentRequest {
    pub experiment: String,
    pub variables: BTreeMap<PriorityLevel, Vec<String>>,
}

impl ExperimentRequest {
    pub fn variables_at(&self, level: PriorityLevel) -> &[String] {
        self.variables.get(&level).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// `{"Header": {...}, "experiment": {name: {level: [variables]}}}`, with
/// experiments in case-insensitive order.
#[derive(Debug, Clone)]
pub struct RequestedVariables {
    pub header: ReportHeader,
    pub experiments: Vec<ExperimentRequest>,
}

impl RequestedVariables {
    pub fn experiment(&self, name: &str) -> Option<&ExperimentRequest> {
        self.experiments.iter().find(|request| request.experiment == name)
    }

    /// Count of variables per experiment and priority level.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "For data request version {}, number of requested variables found by experiment:",
            self.header.dreq_version
        )];
        for request in &self.experiments {
            let counts: Vec<(PriorityLevel, usize)> = PriorityLevel::ALL
                .into_iter()
                .map(|level| (level, request.variables_at(level).len()))
                .collect();
            let total: usize = counts.iter().map(|(_, n)| n).sum();
            let counts: Vec<String> = counts.iter().map(|(level, n)| format!("{level}={n}")).collect();
            lines.push(format!("  {} : {}, TOTAL={total}", request.experiment, counts.join(", ")));
        }
        lines
    }
}

impl Serialize for RequestedVariables {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        struct Experiments<'a>(&'a [ExperimentRequest]);

        impl Serialize for Experiments<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for request in self.0 {
                    map.serialize_entry(&request.experiment, &request.variables)?;
                }
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("Header", &self.header)?;
        map.serialize_entry("experiment", &Experiments(&self.experiments))?;
        map.end()
    }
}

// ============================================================================
// Collection
// ============================================================================

/// Variables requested by the selected opportunities, per experiment and
/// priority level.
pub fn get_requested_variables(dr: &DataRequest, options: &ReportOptions) -> Result<RequestedVariables> {
    let opportunities: Vec<Rc<Element>> = match &options.opportunities {
        OpportunitySelection::All => dr.get_opportunities()?,
        OpportunitySelection::Only(keys) => keys
            .iter()
            .map(|key| dr.get_opportunity(key))
            .collect::<Result<_>>()?,
    };
    let levels = options.priority_cutoff.up_to();

    let mut request: BTreeMap<String, BTreeMap<PriorityLevel, BTreeSet<String>>> = BTreeMap::new();
    for opportunity in &opportunities {
        info!(opportunity = opportunity.name(), "collecting requested variables");
        let experiments = opportunity_experiments(dr, opportunity)?;
        let variables = opportunity_variables(dr, opportunity, &levels)?;
        warn_on_duplicates(opportunity, &variables);

        for experiment in experiments {
            let entry = request
                .entry(experiment)
                .or_insert_with(|| levels.iter().map(|level| (*level, BTreeSet::new())).collect());
            for (level, names) in &variables {
                entry.entry(*level).or_default().extend(names.iter().cloned());
            }
        }
    }

    let mut experiments: Vec<ExperimentRequest> = request
        .into_iter()
        .map(|(experiment, by_level)| ExperimentRequest {
            experiment,
            variables: exclusive_levels(by_level),
        })
        .collect();
    experiments.sort_by_key(|request| request.experiment.to_lowercase());

    if options.check_core {
        check_core_variables(&experiments)?;
    }

    let (content_file, content_sha256) = match &options.content_file {
        Some(path) => (
            path.file_name().map(|name| name.to_string_lossy().into_owned()),
            Some(file_sha256(path)?),
        ),
        None => (None, None),
    };
    let mut opportunity_names: Vec<String> = opportunities.iter().map(|op| op.name().to_string()).collect();
    opportunity_names.sort_by_key(|name| name.to_lowercase());

    let header = ReportHeader {
        description: DESCRIPTION.to_string(),
        opportunities: opportunity_names,
        dreq_version: dr.content_version().to_string(),
        priority_levels: levels,
        experiments: experiments.iter().map(|request| request.experiment.clone()).collect(),
        content_file,
        content_sha256,
        api_version: crate::VERSION.to_string(),
    };
    Ok(RequestedVariables { header, experiments })
}

fn opportunity_experiments(dr: &DataRequest, opportunity: &Element) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for group in opportunity.related(EXPERIMENT_GROUPS) {
        let group = dr.element(group)?;
        debug!(group = group.name(), experiments = group.count(), "experiment group");
        for experiment in group.related(EXPERIMENTS) {
            names.insert(dr.element(experiment)?.name().to_string());
        }
    }
    Ok(names)
}

fn opportunity_variables(
    dr: &DataRequest,
    opportunity: &Element,
    levels: &[PriorityLevel],
) -> Result<BTreeMap<PriorityLevel, BTreeSet<String>>> {
    let mut by_level: BTreeMap<PriorityLevel, BTreeSet<String>> = BTreeMap::new();
    for group in opportunity.related(VARIABLE_GROUPS) {
        let group = dr.element(group)?;
        let Some(level) = group_priority(dr, &group)? else {
            continue;
        };
        if !levels.contains(&level) {
            continue;
        }
        debug!(group = group.name(), variables = group.count(), priority = %level, "variable group");
        let names = by_level.entry(level).or_default();
        for variable in group.related(VARIABLES) {
            names.insert(dr.element(variable)?.name().to_string());
        }
    }
    Ok(by_level)
}

fn group_priority(dr: &DataRequest, group: &Element) -> Result<Option<PriorityLevel>> {
    let name = match group.get_priority_level() {
        Some(Resolved::Link(id)) => dr.element(id)?.name().to_string(),
        Some(Resolved::Literal(name)) => name.clone(),
        Some(Resolved::Missing(_)) | None => {
            warn!(group = group.uid(), "variable group has no priority level");
            return Ok(None);
        }
    };
    match name.parse() {
        Ok(level) => Ok(Some(level)),
        Err(_) => {
            warn!(group = group.uid(), priority = %name, "unknown priority level, skipping group");
            Ok(None)
        }
    }
}

fn warn_on_duplicates(opportunity: &Element, variables: &BTreeMap<PriorityLevel, BTreeSet<String>>) {
    let mut seen: BTreeMap<&str, Vec<PriorityLevel>> = BTreeMap::new();
    for (level, names) in variables {
        for name in names {
            seen.entry(name.as_str()).or_default().push(*level);
        }
    }
    for (name, levels) in seen.into_iter().filter(|(_, levels)| levels.len() > 1) {
        warn!(
            opportunity = opportunity.name(),
            variable = name,
            levels = ?levels,
            "variable requested at several priority levels"
        );
    }
}

/// Remove from each level every variable of a higher level, then sort each
/// list case-insensitively.
fn exclusive_levels(by_level: BTreeMap<PriorityLevel, BTreeSet<String>>) -> BTreeMap<PriorityLevel, Vec<String>> {
    let mut higher: BTreeSet<String> = BTreeSet::new();
    let mut out = BTreeMap::new();
    for (level, names) in by_level {
        let mut kept: Vec<String> = names.difference(&higher).cloned().collect();
        higher.extend(names);
        kept.sort_by_key(|name| name.to_lowercase());
        out.insert(level, kept);
    }
    out
}

fn check_core_variables(experiments: &[ExperimentRequest]) -> Result<()> {
    let mut reference: Option<&[String]> = None;
    for request in experiments {
        let fail = |reason: &str| QueryError::CoreVariables {
            experiment: request.experiment.clone(),
            reason: reason.to_string(),
        };
        let core = request
            .variables
            .get(&PriorityLevel::Core)
            .ok_or_else(|| fail("missing Core variables"))?;
        if core.is_empty() {
            return Err(fail("empty Core variables list"));
        }
        match reference {
            Some(expected) if expected != core.as_slice() => return Err(fail("inconsistent Core variables")),
            Some(_) => {}
            None => reference = Some(core.as_slice()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn dr() -> DataRequest {
        let vs = json!({
            "version": "v1.2",
            "variables": {
                "v1": {"name": "Amon.tas"},
                "v2": {"name": "Amon.pr"},
                "v3": {"name": "Omon.tos"}
            },
            "experiments": {
                "e1": {"name": "historical"},
                "e2": {"name": "piControl"}
            },
            "opportunities": {
                "o1": {"name": "Atmosphere"},
                "o2": {"name": "Ocean"}
            },
            "priority_level": {
                "p1": {"name": "High"},
                "p2": {"name": "Medium"}
            }
        });
        let dr = json!({
            "version": "v1.2",
            "experiment_groups": {
                "eg1": {"experiments": ["link::e1"]},
                "eg2": {"experiments": ["link::e1", "link::e2"]}
            },
            "variable_groups": {
                "g1": {"variables": ["link::v1", "link::v2"], "priority_level": "link::p1"},
                "g2": {"variables": ["link::v2", "link::v3"], "priority_level": "link::p2"}
            },
            "opportunities": {
                "o1": {"experiment_groups": ["link::eg1"], "variable_groups": ["link::g1"]},
                "o2": {"experiment_groups": ["link::eg2"], "variable_groups": ["link::g2"]}
            }
        });
        DataRequest::from_separated_inputs(dr, vs).unwrap()
    }

    #[test]
    fn priority_levels_parse_case_insensitively() {
        assert_eq!("high".parse::<PriorityLevel>().unwrap(), PriorityLevel::High);
        assert_eq!(" Core ".parse::<PriorityLevel>().unwrap(), PriorityLevel::Core);
        assert!(matches!(
            "urgent".parse::<PriorityLevel>(),
            Err(QueryError::InvalidPriority(_))
        ));
        assert_eq!(
            PriorityLevel::Medium.up_to(),
            vec![PriorityLevel::Core, PriorityLevel::High, PriorityLevel::Medium]
        );
    }

    #[test]
    fn variables_land_at_their_highest_level() {
        let report = get_requested_variables(&dr(), &ReportOptions::default()).unwrap();
        let historical = report.experiment("historical").unwrap();
        assert_eq!(historical.variables_at(PriorityLevel::High), ["Amon.pr", "Amon.tas"]);
        assert_eq!(historical.variables_at(PriorityLevel::Medium), ["Omon.tos"]);
        let control = report.experiment("piControl").unwrap();
        assert_eq!(control.variables_at(PriorityLevel::Medium), ["Amon.pr", "Omon.tos"]);
        assert_eq!(report.header.opportunities, vec!["Atmosphere", "Ocean"]);
        assert_eq!(report.header.experiments, vec!["historical", "piControl"]);
    }

    #[test]
    fn cutoff_and_selection_restrict_the_report() {
        let options = ReportOptions {
            opportunities: OpportunitySelection::Only(vec!["Ocean".into()]),
            priority_cutoff: PriorityLevel::High,
            ..ReportOptions::default()
        };
        let report = get_requested_variables(&dr(), &options).unwrap();
        assert_eq!(report.header.priority_levels, vec![PriorityLevel::Core, PriorityLevel::High]);
        let historical = report.experiment("historical").unwrap();
        assert!(historical.variables_at(PriorityLevel::High).is_empty());
        assert!(!historical.variables.contains_key(&PriorityLevel::Medium));
    }

    #[test]
    fn core_check_needs_core_variables() {
        let options = ReportOptions {
            check_core: true,
            ..ReportOptions::default()
        };
        let err = get_requested_variables(&dr(), &options).unwrap_err();
        assert!(matches!(err, QueryError::CoreVariables { .. }));
    }

    #[test]
    fn report_serializes_in_priority_order() {
        let report = get_requested_variables(&dr(), &ReportOptions::default()).unwrap();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["Header"]["dreq version"], json!("v1.2"));
        assert_eq!(value["Header"]["Priority levels supported"], json!(["Core", "High", "Medium", "Low"]));
        assert!(value["Header"].get("dreq content sha256 hash").is_none());
        assert_eq!(value["experiment"]["historical"]["High"], json!(["Amon.pr", "Amon.tas"]));

        let text = dreq_content::io::to_canonical_json(&report).unwrap();
        let core = text.find("\"Core\": []").unwrap();
        let low = text.rfind("\"Low\"").unwrap();
        assert!(core < low);
        assert_eq!(
            report.summary_lines()[1],
            "  historical : Core=0, High=2, Medium=1, Low=0, TOTAL=3"
        );
    }

    #[test]
    fn content_file_is_hashed_into_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("VS_v1.2_content.json");
        std::fs::write(&path, "abc").unwrap();
        let options = ReportOptions {
            content_file: Some(path),
            ..ReportOptions::default()
        };
        let report = get_requested_variables(&dr(), &options).unwrap();
        assert_eq!(report.header.content_file.as_deref(), Some("VS_v1.2_content.json"));
        assert_eq!(
            report.header.content_sha256.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    proptest! {
        #[test]
        fn levels_never_overlap(
            requested in proptest::collection::btree_map(
                0usize..4,
                proptest::collection::btree_set("[a-e]", 0..5),
                0..4,
            )
        ) {
            let by_level: BTreeMap<PriorityLevel, BTreeSet<String>> = requested
                .into_iter()
                .map(|(i, names)| (PriorityLevel::ALL[i], names))
                .collect();
            let all: BTreeSet<String> = by_level.values().flatten().cloned().collect();
            let exclusive = exclusive_levels(by_level);
            let mut seen = BTreeSet::new();
            for names in exclusive.values() {
                for name in names {
                    prop_assert!(seen.insert(name.clone()), "{} listed twice", name);
                }
            }
            prop_assert_eq!(seen, all);
        }
    }
}
