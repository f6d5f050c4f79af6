//! CLI command definitions

use crate::core::Trigger;
use clap::Args;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Event that triggered the run
    #[arg(long, value_enum, default_value_t = EventArg::Push)]
    pub event: EventArg,

    /// Target branch of the push or pull request
    #[arg(long)]
    pub branch: String,

    /// Commit being built; used for the image tag
    #[arg(long, env = "GITHUB_SHA")]
    pub commit: Option<String>,

    /// Variable overrides (key=value)
    #[arg(long = "var", value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,

    /// Read secrets from `<PREFIX><NAME>` environment variables
    #[arg(long)]
    pub secret_prefix: Option<String>,

    /// Working directory for steps and the build context
    #[arg(long)]
    pub workdir: Option<String>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    pub fn trigger(&self) -> Trigger {
        let trigger = match self.event {
            EventArg::Push => Trigger::push(&self.branch),
            EventArg::PullRequest => Trigger::pull_request(&self.branch),
        };
        match &self.commit {
            Some(commit) => trigger.with_commit(commit),
            None => trigger,
        }
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Trigger event argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventArg {
    Push,
    #[clap(name = "pull-request")]
    PullRequest,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
