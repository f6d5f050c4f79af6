//! Deployment collaborators: image builds, registry pushes and remote rollout

pub mod client;
pub mod docker;
pub mod registry;
pub mod remote;

pub use client::{DeploymentClient, DeploymentTarget};
pub use docker::DockerCli;
pub use registry::{BuildContext, ImageBuilder, ImageRegistry, PushAck, RegistryCredentials};
pub use remote::{RemoteExecutor, RemoteOutput, RemoteSession, SshExecutor};

use crate::core::ImageRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sub-steps of a deploy, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployPhase {
    Pull,
    Stop,
    Remove,
    Run,
}

impl DeployPhase {
    /// Whether "no such container" counts as done for this phase
    pub fn ignores_not_found(&self) -> bool {
        matches!(self, DeployPhase::Stop | DeployPhase::Remove)
    }
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployPhase::Pull => "pull",
            DeployPhase::Stop => "stop",
            DeployPhase::Remove => "remove",
            DeployPhase::Run => "run",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub phase: DeployPhase,
    pub exit_code: i32,
    /// Remote output with secrets masked
    pub output: String,
    /// Failed only because there was no container to act on
    pub ignored: bool,
    pub duration: Duration,
}

/// What a deploy call did, phase by phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReport {
    pub container: String,
    pub image: ImageRef,
    pub phases: Vec<PhaseOutcome>,
}

impl DeployReport {
    pub fn new(container: impl Into<String>, image: ImageRef) -> Self {
        Self {
            container: container.into(),
            image,
            phases: Vec::new(),
        }
    }

    /// Phases that finished, including ones whose not-found failure was ignored
    pub fn completed_phases(&self) -> Vec<DeployPhase> {
        self.phases
            .iter()
            .filter(|p| p.exit_code == 0 || p.ignored)
            .map(|p| p.phase)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.completed_phases()
            == vec![
                DeployPhase::Pull,
                DeployPhase::Stop,
                DeployPhase::Remove,
                DeployPhase::Run,
            ]
    }
}
