//! Events that start a pipeline run

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    Push,
    PullRequest,
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::Push => f.write_str("push"),
            TriggerEvent::PullRequest => f.write_str("pull_request"),
        }
    }
}

/// A push or pull request against a branch, optionally pinned to a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub event: TriggerEvent,
    pub branch: String,
    pub commit: Option<String>,
}

impl Trigger {
    pub fn push(branch: impl Into<String>) -> Self {
        Self {
            event: TriggerEvent::Push,
            branch: branch.into(),
            commit: None,
        }
    }

    pub fn pull_request(branch: impl Into<String>) -> Self {
        Self {
            event: TriggerEvent::PullRequest,
            branch: branch.into(),
            commit: None,
        }
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    /// Environment variables describing the trigger, exposed to every step
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("SHIPYARD_EVENT".to_string(), self.event.to_string()),
            ("SHIPYARD_BRANCH".to_string(), self.branch.clone()),
        ];
        if let Some(commit) = &self.commit {
            env.push(("SHIPYARD_COMMIT".to_string(), commit.clone()));
        }
        env
    }
}
