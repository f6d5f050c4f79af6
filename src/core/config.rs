//! Pipeline configuration from YAML

use crate::core::image::is_valid_repository;
use crate::core::secrets::ConfigValue;
use crate::core::Pipeline;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Which branches start this pipeline
    #[serde(rename = "on")]
    pub triggers: TriggerConfig,

    /// Variables rendered into step commands as `{{ NAME }}`
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// Default timeout for steps (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    pub stages: StagesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub branches: Vec<String>,
}

/// The four stages, each optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StagesConfig {
    #[serde(default)]
    pub test: Option<TestStageConfig>,
    #[serde(default)]
    pub build: Option<BuildStageConfig>,
    #[serde(default)]
    pub push: Option<PushStageConfig>,
    #[serde(default)]
    pub deploy: Option<DeployStageConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step identifier, unique within its stage
    pub id: String,

    /// Human-readable step name
    #[serde(default)]
    pub name: Option<String>,

    /// Shell command to run
    pub command: String,

    /// Extra environment for this step; values may reference secrets
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub expected_exit_code: i32,

    /// Timeout for this step (overrides global)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub name: String,

    /// Command that exits 0 once the dependency is ready
    #[serde(default)]
    pub command: Option<String>,

    /// `host:port` that accepts connections once the dependency is ready
    #[serde(default)]
    pub tcp: Option<String>,

    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_health_attempts")]
    pub max_attempts: u32,
}

fn default_health_interval() -> u64 {
    10
}

fn default_health_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestStageConfig {
    #[serde(default)]
    pub health_checks: Vec<HealthCheckConfig>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStageConfig {
    #[serde(default = "default_build_context")]
    pub context: String,
    #[serde(default)]
    pub dockerfile: Option<String>,
    pub repository: String,
    #[serde(default)]
    pub build_args: HashMap<String, String>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

fn default_build_context() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushStageConfig {
    /// Registry host; Docker Hub when absent
    #[serde(default)]
    pub registry: Option<String>,
    pub username: ConfigValue,
    pub password: ConfigValue,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployStageConfig {
    pub host: ConfigValue,
    pub user: ConfigValue,
    /// Private key used for the ssh session
    pub key: ConfigValue,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub container: String,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub env_file: Option<String>,
    #[serde(default = "default_restart_policy")]
    pub restart: String,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_restart_policy() -> String {
    "unless-stopped".to_string()
}

fn port_mapping_regex() -> Regex {
    Regex::new(r"^(?:[0-9.]+:)?\d{1,5}:\d{1,5}(?:/(?:tcp|udp))?$").expect("valid port regex")
}

fn container_name_regex() -> Regex {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("valid container regex")
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid pipeline file {}", path.display()))
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }
        if self.triggers.branches.is_empty() {
            anyhow::bail!("Pipeline '{}' has no trigger branches", self.name);
        }
        if self.default_timeout_secs == Some(0) {
            anyhow::bail!("default_timeout_secs must be greater than zero");
        }

        if let Some(test) = &self.stages.test {
            Self::validate_steps("test", &test.steps)?;
            for check in &test.health_checks {
                match (&check.command, &check.tcp) {
                    (Some(_), None) | (None, Some(_)) => {}
                    _ => anyhow::bail!(
                        "Health check '{}' must define exactly one of 'command' or 'tcp'",
                        check.name
                    ),
                }
                if check.interval_secs == 0 {
                    anyhow::bail!("Health check '{}' needs a non-zero interval", check.name);
                }
            }
        }

        if let Some(build) = &self.stages.build {
            Self::validate_steps("build", &build.steps)?;
            if !is_valid_repository(&build.repository) {
                anyhow::bail!("Invalid image repository: {}", build.repository);
            }
        }

        if let Some(push) = &self.stages.push {
            Self::validate_steps("push", &push.steps)?;
            if self.stages.build.is_none() {
                anyhow::bail!("The push stage requires a build stage");
            }
            if !push.password.is_secret() {
                anyhow::bail!("Registry password must be a secret reference, e.g. ${{{{ secrets.DOCKER_PASSWORD }}}}");
            }
        }

        if let Some(deploy) = &self.stages.deploy {
            Self::validate_steps("deploy", &deploy.steps)?;
            if self.stages.build.is_none() {
                anyhow::bail!("The deploy stage requires a build stage");
            }
            if !deploy.key.is_secret() {
                anyhow::bail!("Deploy key must be a secret reference, e.g. ${{{{ secrets.DEPLOY_KEY }}}}");
            }
            if !container_name_regex().is_match(&deploy.container) {
                anyhow::bail!("Invalid container name: {}", deploy.container);
            }
            let ports = port_mapping_regex();
            for mapping in &deploy.ports {
                if !ports.is_match(mapping) {
                    anyhow::bail!("Invalid port mapping '{}', expected host:container", mapping);
                }
            }
        }

        Ok(())
    }

    fn validate_steps(stage: &str, steps: &[StepConfig]) -> Result<()> {
        let mut seen_ids = HashSet::new();
        for step in steps {
            if !seen_ids.insert(&step.id) {
                anyhow::bail!("Duplicate step ID in stage '{}': {}", stage, step.id);
            }
            if step.command.trim().is_empty() {
                anyhow::bail!("Step '{}' in stage '{}' has an empty command", step.id, stage);
            }
            if step.timeout_secs == Some(0) {
                anyhow::bail!("Step '{}' in stage '{}' has a zero timeout", step.id, stage);
            }
        }
        Ok(())
    }

    /// Number of configured steps across all stages
    pub fn step_count(&self) -> usize {
        let stages = &self.stages;
        stages.test.as_ref().map_or(0, |s| s.steps.len())
            + stages.build.as_ref().map_or(0, |s| s.steps.len())
            + stages.push.as_ref().map_or(0, |s| s.steps.len())
            + stages.deploy.as_ref().map_or(0, |s| s.steps.len())
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}
