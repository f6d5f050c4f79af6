//! Pipeline sequencer - drives test, build, push and deploy in order

use crate::core::secrets::SecretStore;
use crate::core::{
    ExecutionStatus, HealthCheck, ImageRef, Pipeline, PipelineState, SequencerState, Stage,
    StageAction, StageKind, Trigger, WorkingContext,
};
use crate::deploy::{
    BuildContext, DeployReport, DeploymentClient, DeploymentTarget, DockerCli, ImageBuilder,
    ImageRegistry, PhaseOutcome, PushAck, RegistryCredentials, SshExecutor,
};
use crate::error::PipelineError;
use crate::execution::health::{HealthWaiter, ProbeFactory, SystemProbes};
use crate::execution::result::ExecutionResult;
use crate::execution::runner::{ShellRunner, StepRunner};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Shared flag that stops the sequencer before its next stage
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// External systems the sequencer talks to
#[derive(Clone)]
pub struct Collaborators {
    pub runner: Arc<dyn StepRunner>,
    pub builder: Arc<dyn ImageBuilder>,
    pub registry: Arc<dyn ImageRegistry>,
    pub deployer: Arc<DeploymentClient>,
    pub secrets: Arc<dyn SecretStore>,
    pub probes: Arc<dyn ProbeFactory>,
}

impl Collaborators {
    /// Local shell, docker CLI and system ssh
    pub fn system(secrets: Arc<dyn SecretStore>, timeout: Duration) -> Self {
        let docker = Arc::new(DockerCli::new(secrets.clone(), timeout));
        let deployer = DeploymentClient::new(Arc::new(SshExecutor::new(timeout)), secrets.clone());
        Self {
            runner: Arc::new(ShellRunner::new()),
            builder: docker.clone(),
            registry: docker,
            deployer: Arc::new(deployer),
            secrets,
            probes: Arc::new(SystemProbes),
        }
    }
}

/// Events that can occur during a pipeline run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        trigger: Trigger,
    },
    StageStarted {
        stage: StageKind,
    },
    StepStarted {
        stage: StageKind,
        step_id: String,
    },
    StepFinished {
        result: ExecutionResult,
    },
    HealthAttempt {
        probe: String,
        attempt: u32,
        max_attempts: u32,
        healthy: bool,
    },
    ImageBuilt {
        image: ImageRef,
    },
    ImagePushed {
        ack: PushAck,
    },
    DeployPhaseCompleted {
        outcome: PhaseOutcome,
    },
    StageCompleted {
        stage: StageKind,
    },
    StageFailed {
        stage: StageKind,
        error: String,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Where and why a run stopped
#[derive(Debug)]
pub struct StageFailure {
    pub stage: StageKind,
    /// Step id, health check name or deploy phase
    pub step: Option<String>,
    pub error: PipelineError,
    /// Captured output of the failing step, masked
    pub output: Option<String>,
}

impl StageFailure {
    fn new(stage: StageKind, step: Option<String>, error: PipelineError) -> Self {
        let output = error.captured_output();
        Self {
            stage,
            step,
            error,
            output,
        }
    }
}

/// Everything a run did
#[derive(Debug)]
pub struct PipelineReport {
    pub execution_id: Uuid,
    pub pipeline_name: String,
    pub trigger: Trigger,
    pub status: ExecutionStatus,
    /// States in the order the sequencer entered them, starting at `Idle`
    pub visited: Vec<SequencerState>,
    pub results: Vec<ExecutionResult>,
    /// Primary reference of the built image
    pub image: Option<ImageRef>,
    /// Every tag the build produced
    pub images: Vec<ImageRef>,
    pub pushed: Vec<PushAck>,
    pub deploy: Option<DeployReport>,
    pub failure: Option<StageFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineReport {
    fn new(execution_id: Uuid, pipeline_name: String, trigger: Trigger) -> Self {
        Self {
            execution_id,
            pipeline_name,
            trigger,
            status: ExecutionStatus::Running,
            visited: vec![SequencerState::Idle],
            results: Vec::new(),
            image: None,
            images: Vec::new(),
            pushed: Vec::new(),
            deploy: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    pub fn final_state(&self) -> SequencerState {
        self.visited.last().copied().unwrap_or(SequencerState::Idle)
    }

    pub fn failed_stage(&self) -> Option<StageKind> {
        self.failure.as_ref().map(|f| f.stage)
    }

    pub fn failed_step(&self) -> Option<&str> {
        self.failure.as_ref().and_then(|f| f.step.as_deref())
    }

    /// Stages that ran to completion
    pub fn completed_stages(&self) -> Vec<StageKind> {
        let failed = self.failed_stage();
        self.visited
            .iter()
            .filter_map(|state| match state {
                SequencerState::Testing => Some(StageKind::Test),
                SequencerState::Building => Some(StageKind::Build),
                SequencerState::Pushing => Some(StageKind::Push),
                SequencerState::Deploying => Some(StageKind::Deploy),
                _ => None,
            })
            .filter(|kind| Some(*kind) != failed)
            .collect()
    }
}

/// Single-use state machine over a pipeline's stages
///
/// `run` may be called once; after `Succeeded` or `Failed` it returns a
/// usage error until `reset` is called.
pub struct PipelineSequencer {
    pipeline: Pipeline,
    collaborators: Collaborators,
    context: WorkingContext,
    state: SequencerState,
    visited: Vec<SequencerState>,
    cancel: CancellationToken,
    event_handlers: Mutex<Vec<EventHandler>>,
}

impl PipelineSequencer {
    pub fn new(pipeline: Pipeline, collaborators: Collaborators) -> Self {
        Self {
            pipeline,
            collaborators,
            context: WorkingContext::new(),
            state: SequencerState::Idle,
            visited: vec![SequencerState::Idle],
            cancel: CancellationToken::new(),
            event_handlers: Mutex::new(Vec::new()),
        }
    }

    /// Base context for every run; its variables override the pipeline's
    pub fn with_context(mut self, context: WorkingContext) -> Self {
        self.context = context;
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        let mut handlers = self
            .event_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self
            .event_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn visited(&self) -> &[SequencerState] {
        &self.visited
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn on_push(&mut self, branch: &str) -> Result<PipelineReport, PipelineError> {
        self.run(Trigger::push(branch)).await
    }

    pub async fn on_pull_request(&mut self, branch: &str) -> Result<PipelineReport, PipelineError> {
        self.run(Trigger::pull_request(branch)).await
    }

    /// Make a finished sequencer runnable again
    pub fn reset(&mut self) {
        self.state = SequencerState::Idle;
        self.visited = vec![SequencerState::Idle];
        self.pipeline.state = PipelineState::new();
        self.cancel.clear();
    }

    fn transition(&mut self, next: SequencerState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        info!("Sequencer {} -> {}", self.state, next);
        self.state = next;
        self.visited.push(next);
    }

    /// Run every stage for `trigger`
    ///
    /// Stage failures are reported in the returned report, not as `Err`;
    /// `Err` means the run never started.
    pub async fn run(&mut self, trigger: Trigger) -> Result<PipelineReport, PipelineError> {
        if self.state != SequencerState::Idle {
            return Err(PipelineError::Usage(format!(
                "sequencer already finished ({}); call reset() before running again",
                self.state
            )));
        }
        if !self.pipeline.tracks_branch(&trigger.branch) {
            return Err(PipelineError::UntrackedBranch(trigger.branch.clone()));
        }

        let execution_id = self.pipeline.state.execution_id;
        let pipeline_name = self.pipeline.name.clone();
        info!(
            "Starting pipeline {} ({}) on {} to {}",
            pipeline_name, execution_id, trigger.event, trigger.branch
        );
        self.emit_event(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline_name.clone(),
            trigger: trigger.clone(),
        });

        let stages = self.pipeline.stages().to_vec();
        self.pipeline.state.start(stages.len());

        let mut ctx = self.context.clone();
        ctx.variables = self.pipeline.variables.clone();
        ctx.variables.extend(self.context.variables.clone());
        for (key, value) in trigger.env() {
            ctx.set_env(key, value);
        }

        let mut report = PipelineReport::new(execution_id, pipeline_name, trigger);

        for stage in &stages {
            if self.cancel.is_cancelled() {
                warn!("Cancelled before stage {}", stage.kind);
                report.failure = Some(StageFailure::new(
                    stage.kind,
                    None,
                    PipelineError::Cancelled(stage.kind.to_string()),
                ));
                break;
            }

            self.transition(SequencerState::for_stage(stage.kind));
            self.emit_event(ExecutionEvent::StageStarted { stage: stage.kind });
            ctx.stage = Some(stage.kind);

            match self.run_stage(stage, &mut ctx, &mut report).await {
                Ok(()) => {
                    self.pipeline.state.stage_completed();
                    self.emit_event(ExecutionEvent::StageCompleted { stage: stage.kind });
                }
                Err(failure) => {
                    error!("Stage {} failed: {}", stage.kind, failure.error);
                    self.emit_event(ExecutionEvent::StageFailed {
                        stage: stage.kind,
                        error: failure.error.to_string(),
                    });
                    report.failure = Some(failure);
                    break;
                }
            }
        }

        match &report.failure {
            None => {
                self.transition(SequencerState::Succeeded);
                self.pipeline.state.complete();
            }
            Some(failure) => {
                self.transition(SequencerState::Failed);
                if failure.error.is_cancellation() {
                    self.pipeline.state.cancel();
                    self.pipeline.state.failed_stage = Some(failure.stage);
                } else {
                    self.pipeline.state.fail(Some(failure.stage));
                }
            }
        }

        report.status = self.pipeline.state.status;
        report.visited = self.visited.clone();
        report.finished_at = Some(Utc::now());

        info!(
            "Pipeline {} finished: {}",
            report.pipeline_name,
            report.status.as_str()
        );
        self.emit_event(ExecutionEvent::PipelineCompleted {
            execution_id,
            status: report.status,
        });

        Ok(report)
    }

    async fn run_stage(
        &self,
        stage: &Stage,
        ctx: &mut WorkingContext,
        report: &mut PipelineReport,
    ) -> Result<(), StageFailure> {
        let kind = stage.kind;
        if stage.is_empty() {
            info!("Stage {} not configured, passing through", kind);
            return Ok(());
        }

        // Dependencies must be up before migrations and tests run
        for check in stage.health_checks() {
            self.wait_healthy(kind, check).await?;
        }

        for step in &stage.steps {
            self.emit_event(ExecutionEvent::StepStarted {
                stage: kind,
                step_id: step.id.clone(),
            });

            let prepared = ctx
                .prepare_step(step, self.collaborators.secrets.as_ref())
                .map_err(|e| StageFailure::new(kind, Some(step.id.clone()), e))?;
            let result = self
                .collaborators
                .runner
                .run(&prepared, ctx)
                .await
                .map_err(|e| StageFailure::new(kind, Some(step.id.clone()), e))?;

            report.results.push(result.clone());
            self.emit_event(ExecutionEvent::StepFinished {
                result: result.clone(),
            });

            if !result.is_success() {
                return Err(StageFailure {
                    stage: kind,
                    step: Some(step.id.clone()),
                    error: PipelineError::NonZeroExit {
                        step: step.id.clone(),
                        code: result.exit_code,
                        expected: result.expected_exit_code,
                    },
                    output: Some(result.combined_output()),
                });
            }
        }

        match &stage.action {
            StageAction::None | StageAction::WaitHealthy(_) => Ok(()),
            StageAction::BuildImage(spec) => {
                let build = BuildContext::from_spec(spec, report.trigger.commit.as_deref());
                let fail = |e| StageFailure::new(kind, Some("image".to_string()), e);

                let image = self.collaborators.builder.build(&build).await.map_err(fail)?;
                let mut images = build.image_refs().map_err(fail)?;
                if !images.contains(&image) {
                    images.insert(0, image.clone());
                }

                self.emit_event(ExecutionEvent::ImageBuilt {
                    image: image.clone(),
                });
                report.image = Some(image);
                report.images = images;
                Ok(())
            }
            StageAction::PushImage(spec) => {
                if report.images.is_empty() {
                    return Err(StageFailure::new(
                        kind,
                        None,
                        PipelineError::Usage("nothing to push: no image was built".to_string()),
                    ));
                }

                let credentials = RegistryCredentials::from(spec);
                for image in report.images.clone() {
                    let ack = self
                        .collaborators
                        .registry
                        .push(&image, &credentials)
                        .await
                        .map_err(|e| StageFailure::new(kind, Some(image.to_string()), e))?;
                    self.emit_event(ExecutionEvent::ImagePushed { ack: ack.clone() });
                    report.pushed.push(ack);
                }
                Ok(())
            }
            StageAction::Deploy(spec) => {
                let Some(image) = report.image.clone() else {
                    return Err(StageFailure::new(
                        kind,
                        None,
                        PipelineError::Usage("nothing to deploy: no image was built".to_string()),
                    ));
                };

                let target = DeploymentTarget::from_spec(spec);
                match self.collaborators.deployer.deploy(&target, &image).await {
                    Ok(deploy) => {
                        self.emit_phases(&deploy);
                        report.deploy = Some(deploy);
                        Ok(())
                    }
                    Err(e) => {
                        // Aborted or interrupted deploys name their phase and keep what ran
                        let step = match e.deploy_progress() {
                            Some((phase, deploy)) => {
                                self.emit_phases(deploy);
                                report.deploy = Some(deploy.clone());
                                Some(phase.to_string())
                            }
                            None => None,
                        };
                        Err(StageFailure::new(kind, step, e))
                    }
                }
            }
        }
    }

    async fn wait_healthy(&self, kind: StageKind, check: &HealthCheck) -> Result<(), StageFailure> {
        let probe = self.collaborators.probes.probe_for(check);
        let waiter = HealthWaiter::for_check(check);
        let outcome = waiter
            .wait_ready_with(probe.as_ref(), |attempt, healthy| {
                self.emit_event(ExecutionEvent::HealthAttempt {
                    probe: check.name.clone(),
                    attempt,
                    max_attempts: check.max_attempts,
                    healthy,
                })
            })
            .await;

        if outcome.is_ready() {
            return Ok(());
        }
        Err(StageFailure::new(
            kind,
            Some(check.name.clone()),
            PipelineError::HealthTimeout {
                probe: check.name.clone(),
                attempts: outcome.attempts(),
            },
        ))
    }

    fn emit_phases(&self, deploy: &DeployReport) {
        for outcome in &deploy.phases {
            if outcome.exit_code == 0 || outcome.ignored {
                self.emit_event(ExecutionEvent::DeployPhaseCompleted {
                    outcome: outcome.clone(),
                });
            }
        }
    }
}

impl std::fmt::Debug for PipelineSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSequencer")
            .field("pipeline", &self.pipeline.name)
            .field("state", &self.state)
            .field("visited", &self.visited)
            .finish_non_exhaustive()
    }
}
