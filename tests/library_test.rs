// tests/library_test.rs - Integration test: loading task libraries from disk

use std::io::Write;
use std::path::PathBuf;

use pretty_assertions::assert_eq;

use tollgate::infra::errors::TollgateError;
use tollgate::library::{Criticality, ExecutorKind, TaskLibrary, TaskQuery};

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/market_library.yaml")
}

fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

// ─── Happy path ─────────────────────────────────────────────────

#[test]
fn test_load_yaml_fixture() {
    let library = TaskLibrary::load_from(&fixture()).unwrap();

    assert_eq!(library.document_version(), Some("2026.10"));
    assert_eq!(library.task_count(), 6);
    assert_eq!(library.get_by_id("volatility").unwrap().version, 2);
    assert_eq!(library.get_version("volatility", 1).unwrap().output_contract.id, "volatility.v1");

    let blockers = library.query(&TaskQuery::lane("market").with_criticality(Criticality::Blocker));
    assert_eq!(blockers.len(), 1);
    assert_eq!(blockers[0].id, "fetch_prices");

    let analyze = library.query(&TaskQuery::lane("market").with_stage("analyze"));
    let ids: Vec<&str> = analyze.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["sentiment", "volatility"]);

    let with_deprecated = library.query(&TaskQuery::lane("market").with_stage("analyze").including_deprecated());
    assert_eq!(with_deprecated.len(), 3);

    let stats = library.stats();
    assert_eq!(stats.total_definitions, 7);
    assert_eq!(stats.deprecated, 1);
    assert_eq!(stats.pipeline_count, 1);
    assert_eq!(
        library.pipeline("daily_market").unwrap().limits.unwrap().max_total_units,
        20_000
    );
}

#[test]
fn test_load_json_file() {
    let file = write_temp(
        ".json",
        r#"{
            "tasks": [
                {"id": "a", "lane": "l", "executor_kind": "remote_call", "output_contract": {"id": "a.v1"}},
                {"id": "b", "lane": "l", "executor_kind": "local_function", "dependencies": ["a"],
                 "output_contract": {"id": "b.v1", "schema": {"type": "object", "required": ["n"]}}}
            ],
            "pipelines": [{"id": "p", "lane": "l", "tasks": ["a", "b"]}]
        }"#,
    );
    let library = TaskLibrary::load_from(file.path()).unwrap();
    assert_eq!(library.task_count(), 2);
    assert_eq!(library.get_by_id("b").unwrap().executor_kind, ExecutorKind::LocalFunction);
    assert!(library.document_version().is_none());
}

// ─── Fail closed ────────────────────────────────────────────────

#[test]
fn test_one_bad_definition_loads_nothing() {
    let file = write_temp(
        ".yaml",
        r#"
tasks:
  - id: good
    lane: l
    executor_kind: remote_call
    output_contract: { id: good.v1 }
  - id: bad
    lane: l
    executor_kind: remote_call
    expected_value: 1.5
    output_contract: { id: bad.v1 }
"#,
    );
    let err = TaskLibrary::load_from(file.path()).unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(err, TollgateError::MalformedDefinition { ref task_id, .. } if task_id == "bad"));
}

#[test]
fn test_unparseable_file_is_an_error() {
    let file = write_temp(".yaml", "tasks: [ {id: a, lane: ");
    assert!(matches!(
        TaskLibrary::load_from(file.path()),
        Err(TollgateError::Yaml(_))
    ));
}

#[test]
fn test_unknown_executor_kind_rejected() {
    let file = write_temp(
        ".json",
        r#"{"tasks": [{"id": "a", "lane": "l", "executor_kind": "quantum", "output_contract": {"id": "a"}}]}"#,
    );
    assert!(matches!(
        TaskLibrary::load_from(file.path()),
        Err(TollgateError::Json(_))
    ));
}

#[test]
fn test_contradictory_contract_rejected() {
    let file = write_temp(
        ".yaml",
        r#"
tasks:
  - id: a
    lane: l
    executor_kind: local_function
    output_contract:
      id: a.v1
      schema: { type: number, minimum: 5, maximum: 1 }
"#,
    );
    assert!(matches!(
        TaskLibrary::load_from(file.path()),
        Err(TollgateError::InvalidContract { .. })
    ));
}

#[test]
fn test_missing_file_and_bad_extension() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        TaskLibrary::load_from(&dir.path().join("absent.yaml")),
        Err(TollgateError::Io(_))
    ));
    let toml = write_temp(".toml", "tasks = []");
    assert!(TaskLibrary::load_from(toml.path()).unwrap_err().is_configuration());
}
