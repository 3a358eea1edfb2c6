use std::io::Write;
use std::sync::{Arc, Mutex};

use dreq_content::{transform_content, ContentError, TransformConfig, UidStrategy};
use serde_json::{json, Value};

fn three_bases() -> Value {
    serde_json::from_str(include_str!("fixtures/three_bases.json")).expect("fixture is valid JSON")
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, captured.text())
}

#[test]
fn three_base_export_splits_into_dr_and_vs() {
    let (dr, vs) = transform_content(&three_bases(), "v1.2", &TransformConfig::default()).unwrap();

    assert_eq!(dr["version"], json!("v1.2"));
    assert_eq!(vs["version"], json!("v1.2"));

    let opportunities = dr["opportunities"].as_object().unwrap();
    let ids: Vec<&str> = opportunities.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["op-atm", "op-ocn"]);

    let atm = &dr["opportunities"]["op-atm"];
    assert_eq!(atm["variable_groups"], json!(["link::vg-base", "link::vg-ocn"]));
    assert_eq!(atm["experiment_groups"], json!(["link::eg-hist"]));
    assert_eq!(atm["data_request_themes"], json!(["link::theme-atm"]));
    assert_eq!(atm["time_subsets"], json!([]));
    assert_eq!(atm["ensemble_size"], json!(2));

    let base = &dr["variable_groups"]["vg-base"];
    assert_eq!(base["variables"], json!(["link::var-pr", "link::var-tas"]));
    let priority = base["priority_level"].as_str().unwrap();
    assert!(priority.starts_with("link::default_"));
    assert!(dr["variable_groups"].get("vg-none").is_none());

    assert_eq!(dr["experiment_groups"]["eg-hist"]["experiments"], json!(["link::exp-hist", "link::exp-pic"]));

    let tas = &vs["variables"]["var-tas"];
    assert_eq!(tas["name"], json!("Amon.tas"));
    assert_eq!(tas["physical_parameter"], json!("link::pp-tas"));
    assert_eq!(tas["cmip7_frequency"], json!("link::freq-mon"));
    assert!(vs["variables"].get("var-unused").is_none());
    assert!(vs["experiments"].get("exp-scratch").is_none());
    assert!(vs.get("ranking").is_none());

    let (_, priority_uid) = dreq_content::is_link(priority);
    assert_eq!(vs["priority_level"][priority_uid]["name"], json!("High"));
    assert_eq!(vs["opportunities"]["op-atm"]["name"], json!("Atmosphere basics"));
    assert!(vs["opportunities"]["op-atm"].get("status").is_none());
}

#[test]
fn no_record_id_survives_the_rewrite() {
    let (dr, vs) = transform_content(&three_bases(), "v1.2", &TransformConfig::default()).unwrap();
    for document in [dr, vs] {
        let text = serde_json::to_string(&document).unwrap();
        assert!(!text.contains("\"rec"), "record id left in {text}");
    }
}

#[test]
fn transformation_is_reproducible() {
    let config = TransformConfig::default();
    let first = transform_content(&three_bases(), "v1.2", &config).unwrap();
    let second = transform_content(&three_bases(), "v1.2", &config).unwrap();
    assert_eq!(first, second);

    let digest = TransformConfig {
        uid_strategy: UidStrategy::ContentDigest,
        ..TransformConfig::default()
    };
    let (_, vs) = transform_content(&three_bases(), "v1.2", &digest).unwrap();
    let mips = vs["mips"].as_object().unwrap();
    assert_eq!(mips.len(), 1);
    assert!(mips.keys().all(|k| k.starts_with("default_") && k.len() > 20));
}

#[test]
fn missing_master_record_stops_consolidation() {
    let mut raw = three_bases();
    raw["Data Request Opportunities (Public)"]["Variables"]["records"]["recVc3"] =
        json!({"UID": "var-gone", "Compound Name": "Oday.gone"});
    let err = transform_content(&raw, "v1.2", &TransformConfig::default()).unwrap_err();
    assert!(matches!(err, ContentError::NoMatch { .. }), "unexpected error: {err}");
}

#[test]
fn unnamed_record_gets_undef_and_a_warning() {
    let raw = json!({
        "Data Request v1.2": {
            "Opportunity": {"records": {
                "recO": {"Title of Opportunity": "Solo", "UID": "op-solo", "Experiment Groups": ["recE"]}
            }},
            "Experiment Group": {"records": {
                "recE": {"UID": "eg-anon", "Experiments": ["recX"]}
            }},
            "Experiments": {"records": {
                "recX": {"Experiment": "amip", "UID": "exp-amip"}
            }}
        }
    });
    let (result, logs) = with_captured_logs(|| transform_content(&raw, "v1.2", &TransformConfig::default()));
    let (dr, vs) = result.unwrap();
    assert_eq!(vs["experiment_groups"]["eg-anon"]["name"], json!("undef"));
    assert_eq!(dr["experiment_groups"]["eg-anon"]["experiments"], json!(["link::exp-amip"]));
    assert!(logs.contains("record has no name"), "logs: {logs}");
    assert!(logs.contains("eg-anon") || logs.contains("recE"), "logs: {logs}");
}

#[test]
fn outputs_are_written_canonically() {
    let (dr, vs) = transform_content(&three_bases(), "v1.2", &TransformConfig::default()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let dr_path = dir.path().join("DR_v1.2_content.json");
    let vs_path = dir.path().join("VS_v1.2_content.json");
    dreq_content::io::write_json_file(&dr_path, &dr).unwrap();
    dreq_content::io::write_json_file(&vs_path, &vs).unwrap();

    assert_eq!(dreq_content::io::read_json_file(&dr_path).unwrap(), dr);
    let first = dreq_content::io::file_sha256(&vs_path).unwrap();
    dreq_content::io::write_json_file(&vs_path, &vs).unwrap();
    assert_eq!(dreq_content::io::file_sha256(&vs_path).unwrap(), first);
}
