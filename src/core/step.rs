//! Step domain model

use crate::core::config::StepConfig;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

fn variable_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid variable regex"))
}

/// A single command within a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Step identifier, unique within its stage
    pub id: String,

    /// Human-readable name (defaults to the id)
    pub name: String,

    /// Shell command template
    pub command: String,

    /// Extra environment; values may contain `${{ secrets.NAME }}`
    pub env: HashMap<String, String>,

    /// Exit code that counts as success
    pub expected_exit_code: i32,

    /// Per-step bound; falls back to the context timeout
    pub timeout: Option<Duration>,

    pub working_dir: Option<PathBuf>,
}

impl Step {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            command: command.into(),
            env: HashMap::new(),
            expected_exit_code: 0,
            timeout: None,
            working_dir: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn expecting_exit_code(mut self, code: i32) -> Self {
        self.expected_exit_code = code;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Create a step from a step config
    pub fn from_config(config: &StepConfig, defaults: &StepDefaults) -> Self {
        Step {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            command: config.command.clone(),
            env: config.env.clone(),
            expected_exit_code: config.expected_exit_code,
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .or(defaults.timeout),
            working_dir: config.working_dir.as_ref().map(PathBuf::from),
        }
    }

    /// Render the command with `{{ NAME }}` variable substitution
    pub fn render_command(&self, variables: &HashMap<String, String>) -> String {
        render_variables(&self.command, variables)
    }
}

/// Replace `{{ NAME }}` placeholders; unknown names are left untouched
pub fn render_variables(template: &str, variables: &HashMap<String, String>) -> String {
    variable_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[derive(Debug, Clone, Default)]
pub struct StepDefaults {
    pub timeout: Option<Duration>,
}
