//! Step runner - executes a single step as a shell command

use crate::core::{Step, WorkingContext};
use crate::error::PipelineError;
use crate::execution::process::{run_process, ProcessError, ProcessSpec};
use crate::execution::result::ExecutionResult;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Shell exit code for "command not found"
const EXIT_NOT_FOUND: i32 = 127;
/// Shell exit code for "found but not executable"
const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Trait for step execution - allows for different implementations
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run `step` against `ctx`
    ///
    /// A non-zero exit is returned as a result, not an error; errors mean the
    /// step could not run to completion at all.
    async fn run(&self, step: &Step, ctx: &WorkingContext) -> Result<ExecutionResult, PipelineError>;
}

/// Destination for captured step output
pub trait LogSink: Send + Sync {
    fn record(&self, result: &ExecutionResult);
}

/// Writes captured output as tracing events
#[derive(Debug, Clone, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn record(&self, result: &ExecutionResult) {
        for line in result.stdout.lines() {
            debug!(stage = %result.stage, step = %result.step_id, "{}", line);
        }
        for line in result.stderr.lines() {
            debug!(stage = %result.stage, step = %result.step_id, stream = "stderr", "{}", line);
        }
    }
}

/// Runs steps through `sh -c`
#[derive(Clone)]
pub struct ShellRunner {
    shell: String,
    sink: Arc<dyn LogSink>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            sink: Arc::new(TracingLogSink),
        }
    }

    /// Use a different shell binary (must accept `-c <script>`)
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShellRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellRunner").field("shell", &self.shell).finish()
    }
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn run(&self, step: &Step, ctx: &WorkingContext) -> Result<ExecutionResult, PipelineError> {
        let stage = ctx.stage_name();
        let timeout = ctx.timeout_for(step);
        info!("Running step {}/{}", stage, step.id);
        debug!("Command for step {}: {}", step.id, ctx.mask.apply(&step.command));

        let spec = ProcessSpec::new(&self.shell, timeout)
            .args(["-c", step.command.as_str()])
            .envs(ctx.merged_env(step))
            .current_dir(step.working_dir.clone().or_else(|| ctx.working_dir.clone()));

        let started_at = Utc::now();
        let output = run_process(&spec).await.map_err(|e| match e {
            ProcessError::Timeout(limit) => {
                error!("Step {} timed out after {}s", step.id, limit.as_secs());
                PipelineError::StepTimeout {
                    step: step.id.clone(),
                    secs: limit.as_secs(),
                }
            }
            other => {
                error!("Step {} could not be started: {}", step.id, other);
                PipelineError::Execution {
                    step: step.id.clone(),
                    reason: other.to_string(),
                }
            }
        })?;

        let stderr = ctx.mask.apply(&output.stderr);
        if matches!(output.exit_code, EXIT_NOT_FOUND | EXIT_NOT_EXECUTABLE)
            && step.expected_exit_code != output.exit_code
        {
            let kind = if output.exit_code == EXIT_NOT_FOUND {
                "command not found"
            } else {
                "permission denied"
            };
            error!("Step {} could not be started: {}", step.id, kind);
            return Err(PipelineError::Execution {
                step: step.id.clone(),
                reason: format!("{}: {}", kind, stderr.trim()),
            });
        }

        let result = ExecutionResult {
            stage,
            step_id: step.id.clone(),
            exit_code: output.exit_code,
            expected_exit_code: step.expected_exit_code,
            stdout: ctx.mask.apply(&output.stdout),
            stderr,
            started_at,
            duration: output.duration,
        };
        self.sink.record(&result);

        if result.is_success() {
            info!("Step {} succeeded in {:?}", step.id, result.duration);
        } else {
            error!(
                "Step {} exited with {} (expected {})",
                step.id, result.exit_code, result.expected_exit_code
            );
        }

        Ok(result)
    }
}
