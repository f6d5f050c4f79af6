//! Execution state models

use crate::core::stage::StageKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Sequencer state machine
///
/// `Idle → Testing → Building → Pushing → Deploying → Succeeded`, with a
/// direct edge from every running state to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequencerState {
    Idle,
    Testing,
    Building,
    Pushing,
    Deploying,
    Succeeded,
    Failed,
}

impl SequencerState {
    pub fn for_stage(kind: StageKind) -> Self {
        match kind {
            StageKind::Test => SequencerState::Testing,
            StageKind::Build => SequencerState::Building,
            StageKind::Push => SequencerState::Pushing,
            StageKind::Deploy => SequencerState::Deploying,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SequencerState::Succeeded | SequencerState::Failed)
    }

    /// Whether the machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: SequencerState) -> bool {
        use SequencerState::*;
        match (self, next) {
            (Idle, Testing) => true,
            (Testing, Building) | (Building, Pushing) | (Pushing, Deploying) => true,
            (Deploying, Succeeded) => true,
            (Testing | Building | Pushing | Deploying, Failed) => true,
            // Cancellation can land before the first stage starts
            (Idle, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SequencerState::Idle => "idle",
            SequencerState::Testing => "testing",
            SequencerState::Building => "building",
            SequencerState::Pushing => "pushing",
            SequencerState::Deploying => "deploying",
            SequencerState::Succeeded => "succeeded",
            SequencerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Pipeline completed successfully
    Completed,
    /// Pipeline failed
    Failed,
    /// Pipeline was cancelled
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

/// Overall pipeline state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of stages
    pub total_stages: usize,

    /// Number of stages that finished successfully
    pub completed_stages: usize,

    /// Stage that failed, if any
    pub failed_stage: Option<StageKind>,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_stages: 0,
            completed_stages: 0,
            failed_stage: None,
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self, total_stages: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_stages = total_stages;
    }

    pub fn stage_completed(&mut self) {
        self.completed_stages += 1;
    }

    /// Mark pipeline as completed
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark pipeline as failed
    pub fn fail(&mut self, stage: Option<StageKind>) {
        self.status = ExecutionStatus::Failed;
        self.failed_stage = stage;
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Calculate progress percentage (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        self.completed_stages as f64 / self.total_stages as f64
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
