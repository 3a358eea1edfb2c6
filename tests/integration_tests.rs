//! Integration tests for the complete Data Request pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Raw export → consolidation → DR/VS documents on disk
//! - DR/VS documents → object graph → relational queries
//! - Object graph → requested variables report
//!
//! Run with: cargo test --test integration_tests

use std::rc::Rc;

use dreq_content::io::{file_sha256, read_json_file, write_json_file};
use dreq_content::{transform_content, TransformConfig};
use dreq_query::{
    get_requested_variables, DataRequest, Element, FilterSpec, OpportunitySelection, PriorityLevel, ReportOptions,
    Requests, SummaryLayout,
};
use serde_json::{json, Value};
use tempfile::tempdir;

fn three_bases() -> Value {
    serde_json::from_str(include_str!("../crates/dreq-content/tests/fixtures/three_bases.json"))
        .expect("fixture is valid JSON")
}

/// A single-base export with one opportunity, two experiments and a
/// variable requested at two priority levels.
fn one_base() -> Value {
    json!({
        "Data Request v1.2": {
            "Opportunity": {"records": {
                "recO": {
                    "Title of Opportunity": "Baseline",
                    "UID": "op-base",
                    "Status": "Accepted",
                    "Experiment Groups": ["recE"],
                    "Variable Groups": ["recG1", "recG2"]
                }
            }},
            "Experiment Group": {"records": {
                "recE": {"Name": "core_experiments", "UID": "eg-core", "Experiments": ["recX1", "recX2"]}
            }},
            "Experiments": {"records": {
                "recX1": {"Experiment": "amip", "UID": "exp-amip"},
                "recX2": {"Experiment": "historical", "UID": "exp-hist"}
            }},
            "Variable Group": {"records": {
                "recG1": {"Name": "core", "UID": "vg-core", "Variables": ["recV1"], "Priority Level": ["recP1"]},
                "recG2": {"Name": "extra", "UID": "vg-extra", "Variables": ["recV1", "recV2"], "Priority Level": ["recP2"]}
            }},
            "Variables": {"records": {
                "recV1": {"Compound Name": "Amon.tas", "UID": "var-tas"},
                "recV2": {"Compound Name": "Amon.pr", "UID": "var-pr"}
            }},
            "Priority Level": {"records": {
                "recP1": {"Name": "Core", "Value": 1},
                "recP2": {"Name": "Low", "Value": 4}
            }}
        }
    })
}

fn uids(elements: &[Rc<Element>]) -> Vec<&str> {
    elements.iter().map(|element| element.uid()).collect()
}

// ============================================================================
// Raw export → files → graph
// ============================================================================

#[test]
fn test_transformed_files_load_back_into_the_same_graph() {
    let dir = tempdir().unwrap();
    let (dr, vs) = transform_content(&three_bases(), "v1.2", &TransformConfig::default()).unwrap();
    let dr_path = dir.path().join("DR_v1.2_content.json");
    let vs_path = dir.path().join("VS_v1.2_content.json");
    write_json_file(&dr_path, &dr).unwrap();
    write_json_file(&vs_path, &vs).unwrap();

    let from_files = DataRequest::from_separated_inputs(dr_path, vs_path.as_path()).unwrap();
    let from_raw = DataRequest::from_input(three_bases(), "v1.2", &TransformConfig::default()).unwrap();

    assert_eq!(from_files.version(), from_raw.version());
    assert_eq!(
        uids(&from_files.get_opportunities().unwrap()),
        uids(&from_raw.get_opportunities().unwrap())
    );
    assert_eq!(
        uids(&from_files.find_variables_per_opportunity("op-ocn").unwrap()),
        uids(&from_raw.find_variables_per_opportunity("op-ocn").unwrap())
    );
}

#[test]
fn test_raw_export_file_is_accepted_as_input() {
    let dir = tempdir().unwrap();
    let raw_path = dir.path().join("raw.json");
    write_json_file(&raw_path, &one_base()).unwrap();

    let dr = DataRequest::from_input(raw_path.as_path(), "v1.2", &TransformConfig::default()).unwrap();
    assert_eq!(dr.content_version(), "v1.2");
    assert_eq!(uids(&dr.get_opportunities().unwrap()), ["op-base"]);
    assert_eq!(uids(&dr.get_experiments().unwrap()), ["exp-amip", "exp-hist"]);
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_queries_agree_in_both_directions() {
    let dr = DataRequest::from_input(three_bases(), "v1.2", &TransformConfig::default()).unwrap();
    for opportunity in dr.get_opportunities().unwrap() {
        for variable in dr.find_variables_per_opportunity(&opportunity).unwrap() {
            let back = dr.find_opportunities_per_variable(&variable).unwrap();
            assert!(back.contains(&opportunity), "{} not found from {}", opportunity.uid(), variable.uid());
        }
    }
}

#[test]
fn test_exports_render_delimited_text() {
    let dr = DataRequest::from_input(one_base(), "v1.2", &TransformConfig::default()).unwrap();
    let filter = FilterSpec {
        requests: Requests::new().with("priority_level", "Core"),
        ..FilterSpec::default()
    };
    let table = dr.export_data("variables", &filter, &["name"], &["name"]).unwrap();
    assert_eq!(table.to_delimited(';'), "id;name\nvar-tas;Amon.tas");

    let summary = dr
        .export_summary("variables", "experiments", &FilterSpec::default(), &SummaryLayout::default())
        .unwrap();
    assert_eq!(summary.header, ["variables name / experiments name", "amip", "historical"]);
    assert!(summary.rows.iter().all(|row| row[1..] == ["x", "x"]));
}

// ============================================================================
// Requested variables
// ============================================================================

#[test]
fn test_requested_variables_report_end_to_end() {
    let dir = tempdir().unwrap();
    let raw_path = dir.path().join("raw.json");
    write_json_file(&raw_path, &one_base()).unwrap();
    let dr = DataRequest::from_input(raw_path.as_path(), "v1.2", &TransformConfig::default()).unwrap();

    let options = ReportOptions {
        opportunities: OpportunitySelection::Only(vec!["Baseline".into()]),
        check_core: true,
        content_file: Some(raw_path.clone()),
        ..ReportOptions::default()
    };
    let report = get_requested_variables(&dr, &options).unwrap();
    for experiment in &report.experiments {
        assert_eq!(experiment.variables_at(PriorityLevel::Core), ["Amon.tas"]);
        assert_eq!(experiment.variables_at(PriorityLevel::Low), ["Amon.pr"]);
    }

    let out = dir.path().join("requested.json");
    write_json_file(&out, &report).unwrap();
    let written = read_json_file(&out).unwrap();
    let header = &written["Header"];
    assert_eq!(header["Opportunities"], json!(["Baseline"]));
    assert_eq!(header["Experiments included"], json!(["amip", "historical"]));
    assert_eq!(header["dreq content file"], json!("raw.json"));
    assert_eq!(header["dreq content sha256 hash"], json!(file_sha256(&raw_path).unwrap()));
    assert_eq!(header["dreq api version"], json!(dreq_query::VERSION));
    assert_eq!(
        written["experiment"]["amip"],
        json!({"Core": ["Amon.tas"], "High": [], "Medium": [], "Low": ["Amon.pr"]})
    );

    let lines = report.summary_lines();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1], "  amip : Core=1, High=0, Medium=0, Low=1, TOTAL=2");
}
