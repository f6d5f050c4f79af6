//! Error types for pipeline operations

use crate::deploy::{DeployPhase, DeployReport};
use thiserror::Error;

/// Everything that can stop a stage
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The step's process could not be started at all
    #[error("failed to start step '{step}': {reason}")]
    Execution { step: String, reason: String },

    /// The step ran and signalled failure
    #[error("step '{step}' exited with code {code} (expected {expected})")]
    NonZeroExit {
        step: String,
        code: i32,
        expected: i32,
    },

    /// The step ran past its time bound and was killed
    #[error("step '{step}' timed out after {secs} seconds")]
    StepTimeout { step: String, secs: u64 },

    /// A dependency never became ready
    #[error("health check '{probe}' not ready after {attempts} attempts")]
    HealthTimeout { probe: String, attempts: u32 },

    /// Registry or remote host unreachable, or authentication rejected
    #[error("transport error: {0}")]
    Transport(String),

    /// The image build ran and failed
    #[error("image build exited with code {code}")]
    BuildFailed { code: i32, output: String },

    /// Fatal failure inside the deployment client
    #[error("deploy aborted during {phase}: {reason}")]
    DeployAborted {
        phase: DeployPhase,
        reason: String,
        report: Box<DeployReport>,
    },

    /// Host became unreachable part way through a deploy
    #[error("deploy interrupted during {phase}: {reason}")]
    DeployInterrupted {
        phase: DeployPhase,
        reason: String,
        report: Box<DeployReport>,
    },

    /// Host or user that can't be handed to ssh
    #[error("invalid deploy target: {0}")]
    InvalidTarget(String),

    #[error("cancelled before stage '{0}'")]
    Cancelled(String),

    /// Sequencer misuse, e.g. running it again without a reset
    #[error("usage error: {0}")]
    Usage(String),

    #[error("branch '{0}' does not trigger this pipeline")]
    UntrackedBranch(String),

    #[error("secret '{0}' could not be resolved")]
    SecretNotFound(String),

    #[error("invalid image reference '{0}'")]
    InvalidImageRef(String),
}

impl PipelineError {
    /// Whether this error came from the pipeline being stopped rather than failing
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled(_))
    }

    /// Whether the registry or remote host could not be reached
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            PipelineError::Transport(_) | PipelineError::DeployInterrupted { .. }
        )
    }

    /// Phase a deploy stopped in and what it had done by then
    pub fn deploy_progress(&self) -> Option<(DeployPhase, &DeployReport)> {
        match self {
            PipelineError::DeployAborted { phase, report, .. }
            | PipelineError::DeployInterrupted { phase, report, .. } => Some((*phase, report)),
            _ => None,
        }
    }

    /// Output worth showing next to the error, already masked
    pub fn captured_output(&self) -> Option<String> {
        match self {
            PipelineError::BuildFailed { output, .. } => Some(output.clone()),
            PipelineError::DeployAborted { report, .. } => {
                report.phases.last().map(|p| p.output.clone())
            }
            PipelineError::DeployInterrupted { reason, .. } => Some(reason.clone()),
            _ => None,
        }
    }
}
