//! Test utilities for shipyard: recording collaborators and a sequencer harness
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use shipyard::core::config::PipelineConfig;
use shipyard::core::secrets::{SecretStore, StaticSecretStore};
use shipyard::core::{HealthCheck, ImageRef, SequencerState, Step, WorkingContext};
use shipyard::deploy::registry::content_tag;
use shipyard::deploy::{
    BuildContext, DeploymentClient, ImageBuilder, ImageRegistry, PushAck, RegistryCredentials,
    RemoteExecutor, RemoteOutput, RemoteSession,
};
use shipyard::error::PipelineError;
use shipyard::execution::{
    Collaborators, ExecutionEvent, ExecutionResult, HealthProbe, PipelineReport,
    PipelineSequencer, ProbeFactory, StepRunner,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A pipeline with all four stages and a database health check
pub const WEB_APP: &str = r#"
name: "web-app"
on:
  branches: [main]
variables:
  APP_ENV: test
stages:
  test:
    health_checks:
      - name: db
        tcp: "localhost:5432"
        interval_secs: 1
        max_attempts: 2
    steps:
      - id: migrate
        command: "python manage.py migrate"
      - id: unit
        command: "pytest --env {{ APP_ENV }}"
        env:
          DATABASE_URL: "postgres://postgres:${{ secrets.DB_PASSWORD }}@localhost/test"
  build:
    repository: acme/web-app
  push:
    username: "${{ secrets.DOCKER_USERNAME }}"
    password: "${{ secrets.DOCKER_PASSWORD }}"
  deploy:
    host: "${{ secrets.DEPLOY_HOST }}"
    user: "${{ secrets.DEPLOY_USER }}"
    key: "${{ secrets.DEPLOY_KEY }}"
    container: web-app
    ports: ["80:8000"]
"#;

pub const COMMIT: &str = "9f2c4e1a7b3d5c6e8f90";

/// Id the recording builder reports for every image
pub const IMAGE_ID: &str = "sha256:5e1f0c2d9b7a48c3a1d2e3f405162738495a6b7c8d9e0f1a2b3c4d5e6f708192";

/// Tag derived from `IMAGE_ID` when no commit is known
pub const CONTENT_TAG: &str = "sha-5e1f0c2d9b7a";

pub const BUILD_LOG: &str = "Step 3/7 : COPY app.py .\nCOPY failed: file not found in build context";

pub fn secrets() -> StaticSecretStore {
    StaticSecretStore::new()
        .with_secret("DB_PASSWORD", "db-pass-123")
        .with_secret("DOCKER_USERNAME", "ci-bot")
        .with_secret("DOCKER_PASSWORD", "hub-token-456")
        .with_secret("DEPLOY_HOST", "203.0.113.7")
        .with_secret("DEPLOY_USER", "deploy")
        .with_secret("DEPLOY_KEY", "-----BEGIN KEY-----")
}

/// What a scripted step does
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Exit(i32),
    /// Could not be started
    Unstartable,
}

/// Step runner that records calls and answers from a script
#[derive(Default)]
pub struct RecordingRunner {
    outcomes: Mutex<HashMap<String, StepOutcome>>,
    calls: Mutex<Vec<String>>,
    seen: Mutex<Vec<Step>>,
}

impl RecordingRunner {
    pub fn set(&self, step_id: &str, outcome: StepOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(step_id.to_string(), outcome);
    }

    /// `stage/step` for every call, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Prepared steps as the runner received them
    pub fn seen(&self) -> Vec<Step> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepRunner for RecordingRunner {
    async fn run(&self, step: &Step, ctx: &WorkingContext) -> Result<ExecutionResult, PipelineError> {
        let stage = ctx.stage_name();
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}/{}", stage, step.id));
        self.seen.lock().unwrap().push(step.clone());

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get(&step.id)
            .cloned()
            .unwrap_or(StepOutcome::Exit(0));

        let exit_code = match outcome {
            StepOutcome::Exit(code) => code,
            StepOutcome::Unstartable => {
                return Err(PipelineError::Execution {
                    step: step.id.clone(),
                    reason: "command not found".to_string(),
                })
            }
        };

        Ok(ExecutionResult {
            stage,
            step_id: step.id.clone(),
            exit_code,
            expected_exit_code: step.expected_exit_code,
            stdout: format!("ran {}\n", step.id),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("{} broke\n", step.id)
            },
            started_at: Utc::now(),
            duration: Duration::from_millis(1),
        })
    }
}

/// Image builder that counts calls
#[derive(Default)]
pub struct RecordingBuilder {
    pub calls: AtomicU32,
    pub contexts: Mutex<Vec<BuildContext>>,
    pub fail: bool,
}

impl RecordingBuilder {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageBuilder for RecordingBuilder {
    async fn build(&self, context: &BuildContext) -> Result<ImageRef, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(context.clone());
        if self.fail {
            return Err(PipelineError::BuildFailed {
                code: 1,
                output: BUILD_LOG.to_string(),
            });
        }
        let image = context.primary_ref()?;
        if context.has_commit_tag() {
            return Ok(image);
        }
        let tag = content_tag(IMAGE_ID).expect("valid image id");
        image.with_tag(tag)
    }
}

/// Registry that records pushed references
#[derive(Default)]
pub struct RecordingRegistry {
    pub pushed: Mutex<Vec<ImageRef>>,
    pub reject: bool,
}

impl RecordingRegistry {
    pub fn pushed(&self) -> Vec<String> {
        self.pushed
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.to_string())
            .collect()
    }
}

#[async_trait]
impl ImageRegistry for RecordingRegistry {
    async fn push(
        &self,
        image: &ImageRef,
        _credentials: &RegistryCredentials,
    ) -> Result<PushAck, PipelineError> {
        if self.reject {
            return Err(PipelineError::Transport("unauthorized: authentication required".to_string()));
        }
        self.pushed.lock().unwrap().push(image.clone());
        Ok(PushAck {
            image: image.clone(),
            digest: Some(format!("sha256:{}", "c".repeat(64))),
        })
    }
}

/// A remote host running a simulated docker daemon
#[derive(Default)]
pub struct FakeDockerHost {
    /// container name -> image
    pub running: Mutex<HashMap<String, String>>,
    pub commands: Mutex<Vec<String>>,
    pub fail_run: bool,
    pub unreachable: bool,
    /// Connection drops once `docker run` is sent
    pub drop_on_run: bool,
}

impl FakeDockerHost {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn running(&self) -> HashMap<String, String> {
        self.running.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for FakeDockerHost {
    async fn execute(&self, _session: &RemoteSession, script: &str) -> Result<RemoteOutput, PipelineError> {
        if self.unreachable {
            return Err(PipelineError::Transport("ssh: connect to host port 22: Connection refused".to_string()));
        }
        self.commands.lock().unwrap().push(script.to_string());

        let words: Vec<&str> = script.split_whitespace().collect();
        if self.drop_on_run && words.get(1) == Some(&"run") {
            return Err(PipelineError::Transport("client_loop: send disconnect: Broken pipe".to_string()));
        }
        let mut running = self.running.lock().unwrap();
        let (exit_code, stderr) = match words.get(1).copied() {
            Some("pull") => (0, String::new()),
            Some("stop") if running.contains_key(words[2]) => (0, String::new()),
            Some("stop") | Some("rm") if !running.contains_key(words[2]) => (
                1,
                format!("Error response from daemon: No such container: {}", words[2]),
            ),
            Some("rm") => {
                running.remove(words[2]);
                (0, String::new())
            }
            Some("run") if self.fail_run => (
                125,
                "Bind for 0.0.0.0:80 failed: port is already allocated".to_string(),
            ),
            Some("run") => {
                let name = words
                    .iter()
                    .position(|w| *w == "--name")
                    .map(|i| words[i + 1])
                    .unwrap_or("unnamed");
                let image = words.last().copied().unwrap_or_default();
                running.insert(name.to_string(), image.to_string());
                (0, String::new())
            }
            _ => (127, format!("unknown command: {}", script)),
        };

        Ok(RemoteOutput {
            exit_code,
            stdout: String::new(),
            stderr,
        })
    }
}

/// Probe that becomes healthy on a given attempt (0 = never)
pub struct ScriptedProbe {
    name: String,
    ready_on: u32,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> bool {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.ready_on != 0 && call >= self.ready_on
    }
}

pub struct ScriptedProbes {
    pub ready_on: u32,
    pub calls: Arc<AtomicU32>,
}

impl ScriptedProbes {
    pub fn ready_on(attempt: u32) -> Self {
        Self {
            ready_on: attempt,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn never() -> Self {
        Self::ready_on(0)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProbeFactory for ScriptedProbes {
    fn probe_for(&self, check: &HealthCheck) -> Box<dyn HealthProbe> {
        Box::new(ScriptedProbe {
            name: check.name.clone(),
            ready_on: self.ready_on,
            calls: self.calls.clone(),
        })
    }
}

/// All collaborators of a sequencer, kept for assertions
pub struct Harness {
    pub runner: Arc<RecordingRunner>,
    pub builder: Arc<RecordingBuilder>,
    pub registry: Arc<RecordingRegistry>,
    pub host: Arc<FakeDockerHost>,
    pub probes: Arc<ScriptedProbes>,
    pub secrets: Arc<dyn SecretStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_parts(
            RecordingBuilder::default(),
            RecordingRegistry::default(),
            FakeDockerHost::default(),
        )
    }

    pub fn with_parts(builder: RecordingBuilder, registry: RecordingRegistry, host: FakeDockerHost) -> Self {
        Self {
            runner: Arc::new(RecordingRunner::default()),
            builder: Arc::new(builder),
            registry: Arc::new(registry),
            host: Arc::new(host),
            probes: Arc::new(ScriptedProbes::ready_on(1)),
            secrets: Arc::new(secrets()),
        }
    }

    pub fn with_probes(mut self, probes: ScriptedProbes) -> Self {
        self.probes = Arc::new(probes);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            runner: self.runner.clone(),
            builder: self.builder.clone(),
            registry: self.registry.clone(),
            deployer: Arc::new(DeploymentClient::new(self.host.clone(), self.secrets.clone())),
            secrets: self.secrets.clone(),
            probes: self.probes.clone(),
        }
    }

    pub fn sequencer(&self, yaml: &str) -> PipelineSequencer {
        let pipeline = PipelineConfig::from_yaml(yaml)
            .expect("valid pipeline yaml")
            .to_pipeline();
        PipelineSequencer::new(pipeline, self.collaborators())
    }
}

/// Collects every event a sequencer emits
pub fn record_events(sequencer: &PipelineSequencer) -> Arc<Mutex<Vec<ExecutionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    sequencer.add_event_handler(move |event| sink.lock().unwrap().push(event));
    events
}

pub fn states(names: &[&str]) -> Vec<SequencerState> {
    names
        .iter()
        .map(|name| match *name {
            "idle" => SequencerState::Idle,
            "testing" => SequencerState::Testing,
            "building" => SequencerState::Building,
            "pushing" => SequencerState::Pushing,
            "deploying" => SequencerState::Deploying,
            "succeeded" => SequencerState::Succeeded,
            "failed" => SequencerState::Failed,
            other => panic!("unknown state {other}"),
        })
        .collect()
}

pub fn assert_succeeded(report: &PipelineReport) {
    assert!(
        report.is_success(),
        "expected success, got {:?} (failure: {:?})",
        report.status,
        report.failure
    );
    assert_eq!(report.final_state(), SequencerState::Succeeded);
}

pub fn assert_failed_at(report: &PipelineReport, stage: &str, step: Option<&str>) {
    assert_eq!(report.final_state(), SequencerState::Failed);
    let failure = report.failure.as_ref().expect("a failure");
    assert_eq!(failure.stage.as_str(), stage);
    assert_eq!(failure.step.as_deref(), step);
}
