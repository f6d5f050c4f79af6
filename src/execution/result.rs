//! Step results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of one finished step; created once and never mutated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stage: String,
    pub step_id: String,
    pub exit_code: i32,
    pub expected_exit_code: i32,
    /// Captured stdout with secret values masked
    pub stdout: String,
    /// Captured stderr with secret values masked
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == self.expected_exit_code
    }

    /// stdout followed by stderr, for failure reports
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim_end(), self.stderr.trim_end()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}
