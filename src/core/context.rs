//! Working context - environment and bounds shared by every step of a run

use crate::core::secrets::{interpolate_secrets, SecretMask, SecretStore};
use crate::core::stage::StageKind;
use crate::core::step::{render_variables, Step};
use crate::error::PipelineError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default bound for any single command
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Execution context for a pipeline run
///
/// Holds the environment merged into every step, the working directory,
/// the default command timeout and the mask of secret values resolved so far.
#[derive(Debug, Clone)]
pub struct WorkingContext {
    /// Pipeline variables, exported as environment too
    pub variables: HashMap<String, String>,

    /// Environment merged over the process defaults
    pub env: HashMap<String, String>,

    pub working_dir: Option<PathBuf>,

    /// Bound for steps that don't carry their own
    pub timeout: Duration,

    /// Stage currently executing
    pub stage: Option<StageKind>,

    pub mask: SecretMask,
}

impl WorkingContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self {
            variables: HashMap::new(),
            env: HashMap::new(),
            working_dir: None,
            timeout: DEFAULT_STEP_TIMEOUT,
            stage: None,
            mask: SecretMask::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set a variable
    pub fn set_variable(&mut self, key: String, value: String) {
        self.variables.insert(key, value);
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// Stage name used when reporting results
    pub fn stage_name(&self) -> String {
        self.stage.map(|s| s.to_string()).unwrap_or_else(|| "adhoc".to_string())
    }

    /// Effective timeout for `step`
    pub fn timeout_for(&self, step: &Step) -> Duration {
        step.timeout.unwrap_or(self.timeout)
    }

    /// Render a step ready to run: variables substituted, secrets resolved
    ///
    /// Resolved secret values are added to the context mask so they are
    /// scrubbed from anything the step prints.
    pub fn prepare_step(
        &mut self,
        step: &Step,
        secrets: &dyn SecretStore,
    ) -> Result<Step, PipelineError> {
        let mut prepared = step.clone();
        prepared.command = step.render_command(&self.variables);

        let mut env = HashMap::with_capacity(step.env.len());
        for (key, value) in &step.env {
            let rendered = render_variables(value, &self.variables);
            env.insert(key.clone(), interpolate_secrets(&rendered, secrets, &mut self.mask)?);
        }
        prepared.env = env;

        if prepared.working_dir.is_none() {
            prepared.working_dir = self.working_dir.clone();
        }
        Ok(prepared)
    }

    /// Environment for a step: variables, then context env, then the step's own
    pub fn merged_env(&self, step: &Step) -> HashMap<String, String> {
        let mut env = self.variables.clone();
        env.extend(self.env.clone());
        env.extend(step.env.clone());
        env
    }
}

impl Default for WorkingContext {
    fn default() -> Self {
        Self::new()
    }
}
