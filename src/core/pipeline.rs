//! Pipeline domain model

use crate::core::{
    config::PipelineConfig,
    stage::{Stage, StageKind},
    state::PipelineState,
    step::StepDefaults,
};
use std::collections::HashMap;
use std::time::Duration;

/// A pipeline definition
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Variables available to all steps
    pub variables: HashMap<String, String>,

    /// Branches whose pushes and pull requests run this pipeline
    pub branches: Vec<String>,

    /// Bound for steps without their own timeout
    pub default_timeout: Option<Duration>,

    /// Always test, build, push, deploy in that order
    stages: Vec<Stage>,

    /// Execution state
    pub state: PipelineState,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        let default_timeout = config.default_timeout_secs.map(Duration::from_secs);
        let defaults = StepDefaults {
            timeout: default_timeout,
        };

        let stages = &config.stages;
        let test = stages
            .test
            .as_ref()
            .map(|t| Stage::test(&t.health_checks, &t.steps, &defaults))
            .unwrap_or_else(|| Stage::empty(StageKind::Test));
        let build = stages
            .build
            .as_ref()
            .map(|b| Stage::build(b, &defaults))
            .unwrap_or_else(|| Stage::empty(StageKind::Build));
        let push = stages
            .push
            .as_ref()
            .map(|p| Stage::push(p, &defaults))
            .unwrap_or_else(|| Stage::empty(StageKind::Push));
        let deploy = stages
            .deploy
            .as_ref()
            .map(|d| Stage::deploy(d, &defaults))
            .unwrap_or_else(|| Stage::empty(StageKind::Deploy));

        Pipeline {
            name: config.name.clone(),
            variables: config.variables.clone(),
            branches: config.triggers.branches.clone(),
            default_timeout,
            stages: vec![test, build, push, deploy],
            state: PipelineState::new(),
        }
    }

    /// Build a pipeline directly from stages
    ///
    /// Stages are placed in test, build, push, deploy order; missing ones are empty.
    pub fn new(name: impl Into<String>, branches: Vec<String>, stages: Vec<Stage>) -> Self {
        let mut by_kind: HashMap<StageKind, Stage> =
            stages.into_iter().map(|s| (s.kind, s)).collect();
        let ordered = StageKind::ORDER
            .iter()
            .map(|kind| by_kind.remove(kind).unwrap_or_else(|| Stage::empty(*kind)))
            .collect();

        Pipeline {
            name: name.into(),
            variables: HashMap::new(),
            branches,
            default_timeout: None,
            stages: ordered,
            state: PipelineState::new(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Get a stage by kind
    pub fn stage(&self, kind: StageKind) -> Option<&Stage> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    /// Whether pushes and pull requests against `branch` run this pipeline
    pub fn tracks_branch(&self, branch: &str) -> bool {
        self.branches.iter().any(|b| b == branch || b == "*")
    }

    /// Number of stages that actually do something
    pub fn configured_stages(&self) -> usize {
        self.stages.iter().filter(|s| !s.is_empty()).count()
    }
}
