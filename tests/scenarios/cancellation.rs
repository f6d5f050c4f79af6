//! Test: Cancellation - a cancelled run stops before its next stage

use crate::helpers::*;
use shipyard::core::{ExecutionStatus, StageKind};
use shipyard::execution::ExecutionEvent;

#[tokio::test]
async fn test_cancel_before_start() {
    let harness = Harness::new();
    let mut sequencer = harness.sequencer(WEB_APP);
    sequencer.cancellation_token().cancel();

    let report = sequencer.on_push("main").await.unwrap();

    assert_eq!(report.visited, states(&["idle", "failed"]));
    assert_eq!(report.status, ExecutionStatus::Cancelled);
    assert!(report.failure.as_ref().unwrap().error.is_cancellation());
    assert!(harness.runner.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_after_test_stage_skips_build() {
    let harness = Harness::new();
    let mut sequencer = harness.sequencer(WEB_APP);

    let token = sequencer.cancellation_token();
    sequencer.add_event_handler(move |event| {
        if let ExecutionEvent::StageCompleted {
            stage: StageKind::Test,
        } = event
        {
            token.cancel();
        }
    });

    let report = sequencer.on_push("main").await.unwrap();

    assert_eq!(report.visited, states(&["idle", "testing", "failed"]));
    assert_eq!(report.failed_stage(), Some(StageKind::Build));
    assert_eq!(report.status, ExecutionStatus::Cancelled);
    assert_eq!(harness.runner.calls().len(), 2);
    assert_eq!(harness.builder.calls(), 0);
}

#[tokio::test]
async fn test_reset_clears_cancellation() {
    let harness = Harness::new();
    let mut sequencer = harness.sequencer(WEB_APP);
    sequencer.cancellation_token().cancel();
    sequencer.on_push("main").await.unwrap();

    sequencer.reset();
    assert_succeeded(&sequencer.on_push("main").await.unwrap());
}
