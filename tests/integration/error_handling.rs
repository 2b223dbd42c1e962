// tests/integration/error_handling.rs

use std::io::Write;

use tempfile::NamedTempFile;
use gatedag::config::load_and_validate;
use gatedag::errors::GatedagError;
use gatedag_test_utils::{PlanFileBuilder, TaskConfigBuilder};

fn plan_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn test_dag_cycle_returns_structured_error() {
    let file = plan_file(
        r#"
[task.A]
cmd = "echo A"
after = ["B"]

[task.B]
cmd = "echo B"
after = ["A"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(GatedagError::DagCycle(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains("A") || msg.contains("B"));
        }
        Err(e) => panic!("Expected DagCycle error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_unknown_dependency_names_both_tasks() {
    let file = plan_file(
        r#"
[task.A]
cmd = "echo A"
after = ["NonExistent"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(GatedagError::UnknownDependency { task, dependency }) => {
            assert_eq!(task, "A");
            assert_eq!(dependency, "NonExistent");
        }
        Err(e) => panic!("Expected UnknownDependency, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_self_dependency_is_rejected() {
    let file = plan_file(
        r#"
[task.A]
cmd = "echo A"
after = ["A"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(GatedagError::ConfigError(msg)) => assert!(msg.contains("itself")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn test_fallback_id_colliding_with_task_is_rejected() {
    let file = plan_file(
        r#"
[task.A]
cmd = "echo A"

[task.A.fallback]
id = "B"
cmd = "echo A on cpu"

[task.B]
cmd = "echo B"
"#,
    );

    match load_and_validate(file.path()) {
        Err(GatedagError::DuplicateId(id)) => assert_eq!(id, "B"),
        other => panic!("Expected DuplicateId, got: {:?}", other),
    }
}

#[test]
fn test_zero_max_concurrent_is_rejected() {
    let file = plan_file(
        r#"
[orchestrator]
max_concurrent = 0

[task.A]
cmd = "echo A"
"#,
    );

    match load_and_validate(file.path()) {
        Err(GatedagError::ConfigError(msg)) => assert!(msg.contains("max_concurrent")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn test_invalid_toml_is_a_toml_error() {
    let file = plan_file("[task.A\ncmd = ");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, GatedagError::TomlError(_)));
    assert!(err.is_configuration());
}

#[test]
fn test_unknown_denial_policy_is_rejected_at_parse() {
    let file = plan_file(
        r#"
[orchestrator]
denial_policy = "sometimes"

[task.A]
cmd = "echo A"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(GatedagError::TomlError(_))
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_and_validate(dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, GatedagError::IoError(_)));
}

#[test]
fn test_empty_plan_is_rejected() {
    match PlanFileBuilder::new().try_build() {
        Err(GatedagError::ConfigError(msg)) => assert!(msg.contains("at least one")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn test_builder_plan_keeps_fallbacks_and_capabilities() {
    let plan = PlanFileBuilder::new()
        .max_concurrent(2)
        .capability("gpu")
        .with_task(
            "sim",
            TaskConfigBuilder::new("run-sim")
                .requires("gpu")
                .max_retries(1)
                .fallback("sim_cpu", TaskConfigBuilder::new("run-sim --cpu").build())
                .build(),
        )
        .with_task(
            "viz",
            TaskConfigBuilder::new("render")
                .after("sim")
                .requires_approval()
                .concurrent()
                .build(),
        )
        .build();

    assert_eq!(plan.options.max_concurrent, 2);
    assert_eq!(plan.capabilities, vec!["gpu".to_string()]);
    let sim = plan.tasks.iter().find(|t| t.id == "sim").unwrap();
    assert_eq!(sim.fallback.as_deref().unwrap().id, "sim_cpu");
    let viz = plan.tasks.iter().find(|t| t.id == "viz").unwrap();
    assert_eq!(viz.dependencies, vec!["sim".to_string()]);
    assert!(viz.requires_approval && viz.allow_concurrent_siblings);
}
