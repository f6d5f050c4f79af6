//! Test: Rerun - a finished sequencer refuses to run again until reset

use crate::helpers::*;
use shipyard::core::SequencerState;
use shipyard::error::PipelineError;

#[tokio::test]
async fn test_rerun_after_success_is_a_usage_error() {
    let harness = Harness::new();
    let mut sequencer = harness.sequencer(WEB_APP);

    assert_succeeded(&sequencer.on_push("main").await.unwrap());

    let err = sequencer.on_push("main").await.unwrap_err();
    assert!(matches!(err, PipelineError::Usage(_)));
    assert_eq!(sequencer.state(), SequencerState::Succeeded);

    // No extra work was done by the refused run
    assert_eq!(harness.builder.calls(), 1);
    assert_eq!(harness.runner.calls().len(), 2);
}

#[tokio::test]
async fn test_rerun_after_failure_is_a_usage_error() {
    let harness = Harness::new();
    harness.runner.set("migrate", StepOutcome::Exit(1));
    let mut sequencer = harness.sequencer(WEB_APP);

    sequencer.on_push("main").await.unwrap();
    assert_eq!(sequencer.state(), SequencerState::Failed);
    assert!(matches!(
        sequencer.on_pull_request("main").await,
        Err(PipelineError::Usage(_))
    ));
}

#[tokio::test]
async fn test_reset_allows_a_fresh_run() {
    let harness = Harness::new();
    let mut sequencer = harness.sequencer(WEB_APP);

    let first = sequencer.on_push("main").await.unwrap();
    sequencer.reset();
    assert_eq!(sequencer.state(), SequencerState::Idle);
    assert_eq!(sequencer.visited(), states(&["idle"]).as_slice());

    let second = sequencer.on_push("main").await.unwrap();
    assert_succeeded(&second);
    assert_ne!(first.execution_id, second.execution_id);
    assert_eq!(first.visited, second.visited);
    assert_eq!(harness.builder.calls(), 2);
}
