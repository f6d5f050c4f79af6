//! Test: Shell Steps - real processes, masked output and exit codes

use crate::helpers::*;
use shipyard::core::config::PipelineConfig;
use shipyard::core::WorkingContext;
use shipyard::error::PipelineError;
use shipyard::execution::{PipelineSequencer, ShellRunner};
use std::sync::Arc;

const SHELL_PIPELINE: &str = r#"
name: "shell"
on: { branches: [main] }
variables:
  GREETING: hello
stages:
  test:
    steps:
      - id: greet
        command: "echo {{ GREETING }} from $PWD_NAME"
        env:
          PWD_NAME: shipyard
      - id: leak
        command: "echo \"token=$API_TOKEN\"; echo \"again $API_TOKEN\" >&2"
        env:
          API_TOKEN: "${{ secrets.DOCKER_PASSWORD }}"
"#;

fn shell_sequencer(harness: &Harness, yaml: &str) -> PipelineSequencer {
    let mut collaborators = harness.collaborators();
    collaborators.runner = Arc::new(ShellRunner::new());
    let pipeline = PipelineConfig::from_yaml(yaml).unwrap().to_pipeline();
    PipelineSequencer::new(pipeline, collaborators)
}

#[tokio::test]
async fn test_secrets_are_masked_in_step_output() {
    let harness = Harness::new();
    let report = shell_sequencer(&harness, SHELL_PIPELINE)
        .on_push("main")
        .await
        .unwrap();

    assert_succeeded(&report);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].stdout.trim(), "hello from shipyard");

    let leak = &report.results[1];
    assert_eq!(leak.stdout.trim(), "token=***");
    assert_eq!(leak.stderr.trim(), "again ***");
    assert!(!leak.stdout.contains("hub-token-456"));
    assert!(!leak.stderr.contains("hub-token-456"));
}

#[tokio::test]
async fn test_real_non_zero_exit_fails_the_stage() {
    let yaml = r#"
name: "failing"
on: { branches: [main] }
stages:
  test:
    steps:
      - id: check
        command: "echo checking; exit 3"
      - id: never
        command: "echo unreachable"
"#;
    let harness = Harness::new();
    let report = shell_sequencer(&harness, yaml)
        .on_push("main")
        .await
        .unwrap();

    assert_failed_at(&report, "test", Some("check"));
    assert!(matches!(
        report.failure.as_ref().unwrap().error,
        PipelineError::NonZeroExit { code: 3, .. }
    ));
    assert!(report
        .failure
        .as_ref()
        .unwrap()
        .output
        .as_deref()
        .unwrap()
        .contains("checking"));
    assert_eq!(report.results.len(), 1);
}

#[tokio::test]
async fn test_steps_run_in_context_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "present").unwrap();

    let yaml = r#"
name: "workdir"
on: { branches: [main] }
stages:
  test:
    steps:
      - id: read
        command: "cat marker.txt"
"#;
    let harness = Harness::new();
    let mut sequencer = shell_sequencer(&harness, yaml)
        .with_context(WorkingContext::new().with_working_dir(dir.path()));

    let report = sequencer.on_push("main").await.unwrap();
    assert_succeeded(&report);
    assert_eq!(report.results[0].stdout, "present");
}

#[tokio::test]
async fn test_missing_command_is_an_execution_error() {
    let yaml = r#"
name: "missing"
on: { branches: [main] }
stages:
  test:
    steps:
      - id: ghost
        command: "definitely-not-a-real-binary-xyz"
"#;
    let harness = Harness::new();
    let report = shell_sequencer(&harness, yaml)
        .on_push("main")
        .await
        .unwrap();

    assert_failed_at(&report, "test", Some("ghost"));
    assert!(matches!(
        report.failure.as_ref().unwrap().error,
        PipelineError::Execution { .. }
    ));
}
