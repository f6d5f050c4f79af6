//! Pipeline execution: step running, health waiting and stage sequencing

pub mod health;
pub mod process;
pub mod result;
pub mod runner;
pub mod sequencer;

pub use health::{
    CommandProbe, HealthProbe, HealthWaiter, ProbeFactory, SystemProbes, TcpProbe, WaitOutcome,
};
pub use result::ExecutionResult;
pub use runner::{LogSink, ShellRunner, StepRunner, TracingLogSink};
pub use sequencer::{
    CancellationToken, Collaborators, EventHandler, ExecutionEvent, PipelineReport,
    PipelineSequencer, StageFailure,
};
