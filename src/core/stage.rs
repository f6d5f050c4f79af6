//! Stage domain model

use crate::core::config::{
    BuildStageConfig, DeployStageConfig, HealthCheckConfig, PushStageConfig, StepConfig,
};
use crate::core::secrets::{ConfigValue, CredentialHandle};
use crate::core::step::{Step, StepDefaults};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// The four pipeline phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Test,
    Build,
    Push,
    Deploy,
}

impl StageKind {
    pub const ORDER: [StageKind; 4] = [
        StageKind::Test,
        StageKind::Build,
        StageKind::Push,
        StageKind::Deploy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Test => "test",
            StageKind::Build => "build",
            StageKind::Push => "push",
            StageKind::Deploy => "deploy",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a health check decides readiness
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeKind {
    Command(String),
    Tcp(String),
}

#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub name: String,
    pub probe: ProbeKind,
    pub interval: Duration,
    pub max_attempts: u32,
}

impl HealthCheck {
    pub fn from_config(config: &HealthCheckConfig) -> Self {
        let probe = match (&config.command, &config.tcp) {
            (Some(command), _) => ProbeKind::Command(command.clone()),
            (None, Some(addr)) => ProbeKind::Tcp(addr.clone()),
            // Rejected by config validation
            (None, None) => ProbeKind::Command("false".to_string()),
        };
        Self {
            name: config.name.clone(),
            probe,
            interval: Duration::from_secs(config.interval_secs),
            max_attempts: config.max_attempts,
        }
    }
}

/// What to build and how to tag it
#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub context: String,
    pub dockerfile: Option<String>,
    pub repository: String,
    pub build_args: HashMap<String, String>,
}

/// Where to push and with which credentials
#[derive(Debug, Clone)]
pub struct PushSpec {
    pub registry: Option<String>,
    pub username: ConfigValue,
    pub password: CredentialHandle,
}

/// Remote host and container identity to update
#[derive(Debug, Clone)]
pub struct DeploySpec {
    pub host: ConfigValue,
    pub user: ConfigValue,
    pub key: CredentialHandle,
    pub ssh_port: u16,
    pub container: String,
    pub ports: Vec<String>,
    pub env_file: Option<String>,
    pub restart: String,
}

/// The collaborator call a stage makes after its steps succeed
#[derive(Debug, Clone)]
pub enum StageAction {
    /// Stage not configured
    None,
    WaitHealthy(Vec<HealthCheck>),
    BuildImage(BuildSpec),
    PushImage(PushSpec),
    Deploy(DeploySpec),
}

/// A named phase with its ordered steps
#[derive(Debug, Clone)]
pub struct Stage {
    pub kind: StageKind,
    pub steps: Vec<Step>,
    pub action: StageAction,
}

impl Stage {
    /// Stage that does nothing; the sequencer still passes through it
    pub fn empty(kind: StageKind) -> Self {
        Self {
            kind,
            steps: Vec::new(),
            action: StageAction::None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && matches!(self.action, StageAction::None)
    }

    pub fn health_checks(&self) -> &[HealthCheck] {
        match &self.action {
            StageAction::WaitHealthy(checks) => checks,
            _ => &[],
        }
    }

    pub(crate) fn test(
        health_checks: &[HealthCheckConfig],
        steps: &[StepConfig],
        defaults: &StepDefaults,
    ) -> Self {
        let checks: Vec<HealthCheck> = health_checks.iter().map(HealthCheck::from_config).collect();
        Self {
            kind: StageKind::Test,
            steps: build_steps(steps, defaults),
            action: if checks.is_empty() {
                StageAction::None
            } else {
                StageAction::WaitHealthy(checks)
            },
        }
    }

    pub(crate) fn build(config: &BuildStageConfig, defaults: &StepDefaults) -> Self {
        Self {
            kind: StageKind::Build,
            steps: build_steps(&config.steps, defaults),
            action: StageAction::BuildImage(BuildSpec {
                context: config.context.clone(),
                dockerfile: config.dockerfile.clone(),
                repository: config.repository.clone(),
                build_args: config.build_args.clone(),
            }),
        }
    }

    pub(crate) fn push(config: &PushStageConfig, defaults: &StepDefaults) -> Self {
        let action = match &config.password {
            ConfigValue::Secret(password) => StageAction::PushImage(PushSpec {
                registry: config.registry.clone(),
                username: config.username.clone(),
                password: password.clone(),
            }),
            // Rejected by config validation
            ConfigValue::Literal(_) => StageAction::None,
        };
        Self {
            kind: StageKind::Push,
            steps: build_steps(&config.steps, defaults),
            action,
        }
    }

    pub(crate) fn deploy(config: &DeployStageConfig, defaults: &StepDefaults) -> Self {
        let action = match &config.key {
            ConfigValue::Secret(key) => StageAction::Deploy(DeploySpec {
                host: config.host.clone(),
                user: config.user.clone(),
                key: key.clone(),
                ssh_port: config.port,
                container: config.container.clone(),
                ports: config.ports.clone(),
                env_file: config.env_file.clone(),
                restart: config.restart.clone(),
            }),
            ConfigValue::Literal(_) => StageAction::None,
        };
        Self {
            kind: StageKind::Deploy,
            steps: build_steps(&config.steps, defaults),
            action,
        }
    }
}

fn build_steps(configs: &[StepConfig], defaults: &StepDefaults) -> Vec<Step> {
    configs.iter().map(|c| Step::from_config(c, defaults)).collect()
}
