use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;

use sightline_cli::{run_update, Cli, MatchModeArg, RunContext, UpdateArgs};
use sightline_core::reconcile::{
    CandidateView, DecisionPort, Provenance, UpdateStrategy,
};
use sightline_core::SightlineError;
use sightline_store::documents;

fn must<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("test failure: {err:#}"),
    }
}

fn must_io<T>(result: std::io::Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("test io failure: {err}"),
    }
}

const BUNDLE: &str = r#"{
  "objects": [
    {
      "id": "attack-pattern--aaaa",
      "type": "attack-pattern",
      "name": "Credential Dumping",
      "created": "2019-01-01T00:00:00.000Z",
      "modified": "2021-06-01T00:00:00.000Z",
      "external_references": [
        {"source_name": "mitre-attack", "external_id": "T1003"}
      ],
      "kill_chain_phases": [
        {"kill_chain_name": "mitre-attack", "phase_name": "credential-access"}
      ],
      "x_mitre_platforms": ["Windows"],
      "x_mitre_data_sources": ["Process monitoring", "API monitoring"]
    },
    {
      "id": "attack-pattern--bbbb",
      "type": "attack-pattern",
      "name": "Process Discovery",
      "created": "2018-01-01T00:00:00.000Z",
      "modified": "2020-02-01T00:00:00.000Z",
      "external_references": [
        {"source_name": "mitre-attack", "external_id": "T1057"}
      ],
      "kill_chain_phases": [
        {"kill_chain_name": "mitre-attack", "phase_name": "discovery"}
      ],
      "x_mitre_platforms": ["Windows", "Linux"],
      "x_mitre_data_sources": ["Process monitoring"]
    }
  ]
}"#;

const DATA_SOURCE_ADMIN: &str = r"version: 1.0
file_type: data-source-administration
name: Unit Test
platform: windows
data_sources:
  - data_source_name: Process monitoring
    date_registered: 2021-01-01
    date_connected: 2021-02-01
    products: ['EDR']
    available_for_data_analytics: true
    comment: ''
    data_quality:
      device_completeness: 4
      data_field_completeness: 4
      timeliness: 4
      consistency: 4
      retention: 3
exceptions: []
";

const TECHNIQUE_ADMIN: &str = r"version: 1.1
file_type: technique-administration
name: Unit Test
platform: windows
techniques:
  - technique_id: T1003
    technique_name: Credential Dumping
    detection:
      applicable_to: ['all']
      location: ['']
      comment: ''
      score_logbook:
        - date:
          score: -1
          comment: ''
    visibility:
      applicable_to: ['all']
      comment: ''
      score_logbook:
        - date: 2020-01-01
          score: 1
          comment: ''
";

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("failed to create tempdir: {err}"),
        };
        let root = dir.path().to_path_buf();
        must_io(fs::write(root.join("bundle.json"), BUNDLE));
        must_io(fs::write(root.join("data-sources.yaml"), DATA_SOURCE_ADMIN));
        Self { _dir: dir, root }
    }

    fn context(&self) -> RunContext {
        RunContext {
            bundle: self.root.join("bundle.json"),
            cache_dir: self.root.join("cache"),
            output_dir: self.root.join("output"),
        }
    }

    fn cli_args(&self, tail: &[&str]) -> Vec<String> {
        let mut args = vec![
            "sightline".to_string(),
            "--bundle".to_string(),
            self.root.join("bundle.json").display().to_string(),
            "--cache-dir".to_string(),
            self.root.join("cache").display().to_string(),
            "--output-dir".to_string(),
            self.root.join("output").display().to_string(),
        ];
        args.extend(tail.iter().map(ToString::to_string));
        args
    }

    fn run(&self, tail: &[&str]) {
        let cli = match Cli::try_parse_from(self.cli_args(tail)) {
            Ok(cli) => cli,
            Err(err) => panic!("failed to parse cli args: {err}"),
        };
        must(sightline_cli::run_cli(cli));
    }

    fn admin_flag(&self) -> String {
        self.root.join("data-sources.yaml").display().to_string()
    }

    fn output(&self, name: &str) -> PathBuf {
        self.root.join("output").join(name)
    }
}

/// Answers scripted decisions; fails the run when the reconciler asks for
/// anything that was not scripted.
struct ScriptedPort {
    comment: Option<String>,
    strategy: Option<UpdateStrategy>,
}

impl DecisionPort for ScriptedPort {
    fn addition_comment(
        &mut self,
        _technique_ids: &[String],
    ) -> Result<Option<String>, SightlineError> {
        match self.comment.take() {
            Some(comment) => Ok(Some(comment)),
            None => Err(SightlineError::Decision(
                "unexpected addition prompt".to_string(),
            )),
        }
    }

    fn select_strategy(
        &mut self,
        _provenance: Provenance,
        _eligible: usize,
        _options: &[UpdateStrategy],
    ) -> Result<UpdateStrategy, SightlineError> {
        self.strategy
            .take()
            .ok_or_else(|| SightlineError::Decision("unexpected strategy prompt".to_string()))
    }

    fn review_update(
        &mut self,
        _view: &CandidateView,
        _remaining: usize,
    ) -> Result<bool, SightlineError> {
        Err(SightlineError::Decision(
            "unexpected review prompt".to_string(),
        ))
    }
}

fn backup_count(dir: &Path) -> usize {
    must_io(fs::read_dir(dir))
        .filter_map(std::result::Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.contains("_backup_"))
        })
        .count()
}

#[test]
fn layer_matrix_and_graph_artifacts_are_written() {
    let fixture = Fixture::new();
    let admin = fixture.admin_flag();

    fixture.run(&["datasource", "layer", "--admin", admin.as_str()]);
    fixture.run(&["datasource", "matrix", "--admin", admin.as_str()]);
    fixture.run(&["datasource", "graph", "--admin", admin.as_str()]);

    let layer_body = must_io(fs::read_to_string(fixture.output("data_sources_unit-test.json")));
    let layer: serde_json::Value = match serde_json::from_str(&layer_body) {
        Ok(value) => value,
        Err(err) => panic!("layer output is not JSON: {err}"),
    };
    let rows = layer["techniques"]
        .as_array()
        .unwrap_or_else(|| panic!("layer has no techniques"));
    // T1003 (one tactic) + T1057 (one tactic), both with a matched source.
    assert_eq!(rows.len(), 2);
    assert_eq!(layer["filters"]["platforms"][0], "windows");
    assert!(rows
        .iter()
        .any(|row| row["techniqueID"] == "T1057" && row["color"] == "#0f480f"));

    let matrix = must_io(fs::read_to_string(fixture.output("data_sources.csv")));
    assert!(matrix.starts_with("Data source name,"));
    // Both vocabulary entries appear; only one is registered.
    assert!(matrix.contains("API monitoring,,"));
    assert!(matrix.contains("Process monitoring,2021-01-01,"));

    let graph = must_io(fs::read_to_string(fixture.output("graph_data_sources.json")));
    assert!(graph.contains("\"month\": \"2021-02\""));
    assert!(graph.contains("\"cumulative\": 1"));
}

#[test]
fn generate_writes_a_loadable_administration_with_derived_tiers() {
    let fixture = Fixture::new();
    let admin = fixture.admin_flag();

    fixture.run(&["techniques", "generate", "--admin", admin.as_str()]);
    let generated = fixture.output("techniques-administration-unit-test-windows.yaml");
    let doc = must(documents::load_technique_admin(&generated));

    assert_eq!(doc.platform, "windows");
    assert_eq!(doc.techniques.len(), 2);
    let t1003 = doc
        .techniques
        .iter()
        .find(|tech| tech.technique_id == "T1003")
        .unwrap_or_else(|| panic!("T1003 missing from generated administration"));
    // One of two required sources owned: 50% -> tier 2.
    assert_eq!(t1003.visibility[0].score_logbook[0].score, 2);
    assert!(t1003.visibility[0].score_logbook[0].auto_generated);
    let t1057 = doc
        .techniques
        .iter()
        .find(|tech| tech.technique_id == "T1057")
        .unwrap_or_else(|| panic!("T1057 missing from generated administration"));
    assert_eq!(t1057.visibility[0].score_logbook[0].score, 4);

    // A second run must not clobber the first artifact.
    fixture.run(&["techniques", "generate", "--admin", admin.as_str()]);
    assert!(fixture
        .output("techniques-administration-unit-test-windows_1.yaml")
        .exists());

    // The generated file passes the health check.
    let generated_flag = generated.display().to_string();
    fixture.run(&["health", "--tech-admin", generated_flag.as_str()]);
}

#[test]
fn update_backs_up_inserts_heads_and_is_idempotent() {
    let fixture = Fixture::new();
    let tech_admin = fixture.root.join("techniques.yaml");
    must_io(fs::write(&tech_admin, TECHNIQUE_ADMIN));

    let args = UpdateArgs {
        admin: fixture.root.join("data-sources.yaml"),
        tech_admin: tech_admin.clone(),
        match_mode: MatchModeArg::Positional,
    };

    // First run: T1003 goes 1 -> 2 (manual provenance), T1057 is added.
    let mut port = ScriptedPort {
        comment: Some("rollout".to_string()),
        strategy: Some(UpdateStrategy::ApplyAll),
    };
    must(run_update(&fixture.context(), &args, &mut port));

    assert_eq!(backup_count(&fixture.root), 1);
    let updated = must(documents::load_technique_admin(&tech_admin));
    assert_eq!(updated.techniques.len(), 2);

    let t1003 = &updated.techniques[0];
    assert_eq!(t1003.technique_id, "T1003");
    assert_eq!(t1003.visibility[0].score_logbook.len(), 2);
    assert_eq!(t1003.visibility[0].score_logbook[0].score, 2);
    assert_eq!(t1003.visibility[0].score_logbook[0].comment, "rollout");
    assert!(t1003.visibility[0].score_logbook[0].auto_generated);
    // The tail entry is untouched.
    assert_eq!(t1003.visibility[0].score_logbook[1].score, 1);

    let t1057 = &updated.techniques[1];
    assert_eq!(t1057.technique_id, "T1057");
    assert_eq!(t1057.visibility[0].score_logbook[0].comment, "rollout");

    // Second run: nothing differs, so no prompt fires, no backup is
    // taken and the file is untouched.
    let before = must_io(fs::read_to_string(&tech_admin));
    let mut silent_port = ScriptedPort {
        comment: None,
        strategy: None,
    };
    must(run_update(&fixture.context(), &args, &mut silent_port));
    assert_eq!(backup_count(&fixture.root), 1);
    assert_eq!(must_io(fs::read_to_string(&tech_admin)), before);
}

#[test]
fn update_refuses_cross_platform_stores_untouched() {
    let fixture = Fixture::new();
    let tech_admin = fixture.root.join("techniques-linux.yaml");
    must_io(fs::write(
        &tech_admin,
        TECHNIQUE_ADMIN.replace("platform: windows", "platform: linux"),
    ));
    let before = must_io(fs::read_to_string(&tech_admin));

    let args = UpdateArgs {
        admin: fixture.root.join("data-sources.yaml"),
        tech_admin: tech_admin.clone(),
        match_mode: MatchModeArg::Positional,
    };
    let mut port = ScriptedPort {
        comment: None,
        strategy: None,
    };
    must(run_update(&fixture.context(), &args, &mut port));

    assert_eq!(must_io(fs::read_to_string(&tech_admin)), before);
    assert_eq!(backup_count(&fixture.root), 0);
}

#[test]
fn taxonomy_listings_and_stats_run_from_the_bundle() {
    let fixture = Fixture::new();
    fixture.run(&["taxonomy", "updates", "--kind", "technique", "--sort", "modified"]);
    fixture.run(&["taxonomy", "mitigation-stats", "--matrix", "enterprise"]);
    fixture.run(&["datasource", "stats"]);
}
