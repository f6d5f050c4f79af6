//! CLI output formatting

use crate::core::{ExecutionStatus, StageKind};
use crate::execution::{ExecutionEvent, PipelineReport};
use crate::persistence::ExecutionSummary;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "# ");

/// Create a progress bar over the pipeline's stages
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// A horizontal rule spanning the terminal width
pub fn separator() -> String {
    let width = term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(80);
    "─".repeat(width.min(120))
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format a stored run for the history listing
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Cancelled => WARN,
        ExecutionStatus::Pending => INFO,
    };

    let failed_at = match (&summary.failed_stage, &summary.failed_step) {
        (Some(stage), Some(step)) => format!(" at {}/{}", stage, step),
        (Some(stage), None) => format!(" at {}", stage),
        _ => String::new(),
    };

    format!(
        "{} {} - {} - {} {} - {}{} ({}/{})",
        status_icon,
        style(short_id(&summary.execution_id)).dim(),
        style(&summary.pipeline_name).bold(),
        summary.event,
        style(&summary.branch).cyan(),
        format_status(summary.status),
        style(failed_at).red(),
        summary.completed_stages,
        summary.total_stages,
    )
}

/// Format an execution event for display
///
/// Returns `None` for events too noisy for the console.
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            trigger,
        } => format!(
            "{} Starting pipeline {} for {} to {} ({})",
            ROCKET,
            style(pipeline_name).bold(),
            trigger.event,
            style(&trigger.branch).cyan(),
            style(short_id(execution_id)).dim()
        ),
        ExecutionEvent::StageStarted { stage } => format!("{}\n{}", separator(), stage_header(*stage)),
        ExecutionEvent::StepStarted { step_id, .. } => {
            format!("{} {}", SPINNER, style(step_id).cyan())
        }
        ExecutionEvent::StepFinished { result } => {
            if result.is_success() {
                format!(
                    "{} {} ({:.1}s)",
                    CHECK,
                    style(&result.step_id).green(),
                    result.duration.as_secs_f64()
                )
            } else {
                format!(
                    "{} {} exited with {} (expected {})",
                    CROSS,
                    style(&result.step_id).red(),
                    result.exit_code,
                    result.expected_exit_code
                )
            }
        }
        ExecutionEvent::HealthAttempt {
            probe,
            attempt,
            max_attempts,
            healthy,
        } => {
            if *healthy {
                format!("{} {} ready", CHECK, style(probe).green())
            } else {
                format!(
                    "{} waiting for {} ({}/{})",
                    SPINNER,
                    style(probe).yellow(),
                    attempt,
                    max_attempts
                )
            }
        }
        ExecutionEvent::ImageBuilt { image } => {
            format!("{} built {}", PACKAGE, style(image).bold())
        }
        ExecutionEvent::ImagePushed { ack } => match &ack.digest {
            Some(digest) => format!("{} pushed {} ({})", PACKAGE, style(&ack.image).bold(), style(digest).dim()),
            None => format!("{} pushed {}", PACKAGE, style(&ack.image).bold()),
        },
        ExecutionEvent::DeployPhaseCompleted { outcome } => {
            if outcome.ignored {
                format!("{} {} (no existing container)", INFO, style(outcome.phase).dim())
            } else {
                format!("{} {}", CHECK, style(outcome.phase).green())
            }
        }
        ExecutionEvent::StageCompleted { .. } => return None,
        ExecutionEvent::StageFailed { stage, error } => {
            format!("{} {} failed: {}", CROSS, style(stage).red().bold(), style(error).dim())
        }
        ExecutionEvent::PipelineCompleted { .. } => return None,
    };
    Some(line)
}

fn stage_header(stage: StageKind) -> String {
    let position = StageKind::ORDER
        .iter()
        .position(|k| *k == stage)
        .map(|i| i + 1)
        .unwrap_or(0);
    format!(
        "[{}/{}] {}",
        style(position).cyan(),
        style(StageKind::ORDER.len()).dim(),
        style(stage.as_str().to_uppercase()).bold()
    )
}

/// Final report printed after a run
pub fn format_report(report: &PipelineReport) -> String {
    let mut lines = Vec::new();
    let path: Vec<String> = report.visited.iter().map(|s| s.to_string()).collect();
    lines.push(format!("{} {}", style("states:").dim(), path.join(" → ")));

    if let Some(image) = &report.image {
        lines.push(format!("{} {}", style("image:").dim(), image));
    }

    if let Some(failure) = &report.failure {
        let location = match &failure.step {
            Some(step) => format!("{}/{}", failure.stage, step),
            None => failure.stage.to_string(),
        };
        lines.push(format!(
            "{} {} failed: {}",
            CROSS,
            style(location).red().bold(),
            failure.error
        ));
        if let Some(output) = failure.output.as_deref().filter(|o| !o.trim().is_empty()) {
            lines.push(format_output(output, 20));
        }
    }

    lines.join("\n")
}

/// Format step output with truncation, keeping the last lines
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let tail = lines[lines.len() - max_lines..].join("\n");
        format!(
            "{}... ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            tail
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
