//! shipyard - test, build, push and deploy a containerised service

pub mod cli;
pub mod core;
pub mod deploy;
pub mod error;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use core::config::PipelineConfig;
pub use core::secrets::{CredentialHandle, EnvSecretStore, SecretStore, StaticSecretStore};
pub use core::{ExecutionStatus, ImageRef, Pipeline, SequencerState, Stage, StageKind, Step, Trigger, WorkingContext};
pub use deploy::{DeploymentClient, DeploymentTarget, DeployPhase, DeployReport};
pub use error::PipelineError;
pub use execution::{
    CancellationToken, Collaborators, ExecutionEvent, HealthWaiter, PipelineReport,
    PipelineSequencer, ShellRunner, StepRunner,
};
