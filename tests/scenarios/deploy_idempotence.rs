//! Test: Deploy Idempotence - stop/remove tolerate a missing container, run does not

use crate::helpers::*;
use shipyard::deploy::DeployPhase;
use shipyard::error::PipelineError;

#[tokio::test]
async fn test_deploy_failing_on_run_reports_earlier_phases() {
    let harness = Harness::with_parts(
        RecordingBuilder::default(),
        RecordingRegistry::default(),
        FakeDockerHost {
            fail_run: true,
            ..Default::default()
        },
    );

    let report = harness.sequencer(WEB_APP).on_push("main").await.unwrap();

    assert_failed_at(&report, "deploy", Some("run"));
    assert_eq!(
        report.visited,
        states(&["idle", "testing", "building", "pushing", "deploying", "failed"])
    );

    let deploy = report.deploy.as_ref().expect("deploy report on failure");
    assert_eq!(
        deploy.completed_phases(),
        vec![DeployPhase::Pull, DeployPhase::Stop, DeployPhase::Remove]
    );
    assert!(!deploy.is_complete());

    let failure = report.failure.as_ref().unwrap();
    assert!(matches!(
        failure.error,
        PipelineError::DeployAborted { phase: DeployPhase::Run, .. }
    ));
    assert!(failure.output.as_deref().unwrap().contains("port is already allocated"));
    assert!(harness.host.running().is_empty());
}

#[tokio::test]
async fn test_deploying_twice_matches_deploying_once() {
    let once = Harness::new();
    once.sequencer(WEB_APP).on_push("main").await.unwrap();

    let twice = Harness::new();
    let mut sequencer = twice.sequencer(WEB_APP);
    assert!(sequencer.on_push("main").await.unwrap().is_success());
    sequencer.reset();
    let second = sequencer.on_push("main").await.unwrap();
    assert_succeeded(&second);

    assert_eq!(once.host.running(), twice.host.running());

    // The second deploy found and replaced the first container
    let phases = &second.deploy.as_ref().unwrap().phases;
    assert!(phases.iter().all(|p| p.exit_code == 0 && !p.ignored));
}

#[tokio::test]
async fn test_first_deploy_ignores_missing_container() {
    let harness = Harness::new();
    let report = harness.sequencer(WEB_APP).on_push("main").await.unwrap();

    let deploy = report.deploy.as_ref().unwrap();
    let ignored: Vec<DeployPhase> = deploy
        .phases
        .iter()
        .filter(|p| p.ignored)
        .map(|p| p.phase)
        .collect();
    assert_eq!(ignored, vec![DeployPhase::Stop, DeployPhase::Remove]);
    assert!(deploy.is_complete());

    let commands = harness.host.commands();
    assert_eq!(commands[0], format!("docker pull acme/web-app:{}", CONTENT_TAG));
    assert_eq!(commands[1], "docker stop web-app");
    assert_eq!(commands[2], "docker rm web-app");
    assert!(commands[3].starts_with("docker run -d --name web-app --restart unless-stopped -p 80:8000"));
}

#[tokio::test]
async fn test_unreachable_host_fails_at_pull() {
    let harness = Harness::with_parts(
        RecordingBuilder::default(),
        RecordingRegistry::default(),
        FakeDockerHost {
            unreachable: true,
            ..Default::default()
        },
    );

    let report = harness.sequencer(WEB_APP).on_push("main").await.unwrap();

    assert_failed_at(&report, "deploy", Some("pull"));
    let error = &report.failure.as_ref().unwrap().error;
    assert!(error.is_transport());
    assert!(matches!(
        error,
        PipelineError::DeployInterrupted { phase: DeployPhase::Pull, .. }
    ));
    // Nothing ran on the host, but the report says so
    assert!(report.deploy.as_ref().unwrap().phases.is_empty());
    // Earlier stages completed
    assert_eq!(report.completed_stages().len(), 3);
}

#[tokio::test]
async fn test_connection_lost_during_run_reports_progress() {
    let harness = Harness::with_parts(
        RecordingBuilder::default(),
        RecordingRegistry::default(),
        FakeDockerHost {
            drop_on_run: true,
            ..Default::default()
        },
    );

    let report = harness.sequencer(WEB_APP).on_push("main").await.unwrap();

    assert_failed_at(&report, "deploy", Some("run"));
    let failure = report.failure.as_ref().unwrap();
    assert!(failure.error.is_transport());
    assert!(failure.output.as_deref().unwrap().contains("Broken pipe"));

    // Old container is gone and the new one may not be running
    let deploy = report.deploy.as_ref().expect("deploy report on interruption");
    assert_eq!(
        deploy.completed_phases(),
        vec![DeployPhase::Pull, DeployPhase::Stop, DeployPhase::Remove]
    );
    assert_eq!(harness.host.commands().len(), 4);
}
