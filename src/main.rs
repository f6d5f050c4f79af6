use anyhow::{Context, Result};
use shipyard::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use shipyard::cli::output::*;
use shipyard::cli::{Cli, Command};
use shipyard::core::config::PipelineConfig;
use shipyard::core::secrets::{EnvSecretStore, SecretStore};
use shipyard::core::{ExecutionStatus, WorkingContext, DEFAULT_STEP_TIMEOUT};
use shipyard::execution::{Collaborators, ExecutionEvent, PipelineSequencer};
use shipyard::persistence::{
    create_summary, open_default_store, ExecutionSummary, InMemoryPersistence, PersistenceBackend,
};
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let pipeline = config.to_pipeline();
    let timeout = pipeline.default_timeout.unwrap_or(DEFAULT_STEP_TIMEOUT);

    let mut context = WorkingContext::new().with_timeout(timeout);
    if let Some(dir) = &cmd.workdir {
        context = context.with_working_dir(dir);
    }
    for (key, value) in &cmd.var {
        context.set_variable(key.clone(), value.clone());
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let secrets: Arc<dyn SecretStore> = match &cmd.secret_prefix {
        Some(prefix) => Arc::new(EnvSecretStore::with_prefix(prefix)),
        None => Arc::new(EnvSecretStore::new()),
    };

    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_default_store().await?
    };

    let stage_count = pipeline.stages().len();
    let mut sequencer = PipelineSequencer::new(pipeline, Collaborators::system(secrets, timeout))
        .with_context(context);

    // Ctrl-C stops the run before its next stage
    let token = sequencer.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping before the next stage");
            token.cancel();
        }
    });

    let progress = create_progress_bar(stage_count);
    let bar = progress.clone();
    sequencer.add_event_handler(move |event| {
        match &event {
            ExecutionEvent::StageStarted { stage } => bar.set_message(stage.to_string()),
            ExecutionEvent::StageCompleted { .. } => bar.inc(1),
            _ => {}
        }
        if let Some(line) = format_execution_event(&event) {
            bar.println(line);
        }
    });

    println!();
    let report = sequencer.run(cmd.trigger()).await?;
    progress.finish_and_clear();

    println!("{}", separator());
    println!("{}", format_report(&report));

    let summary = create_summary(&report);
    store.save_execution(&summary).await?;
    if !cmd.no_history {
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(&summary.execution_id.to_string()[..8]).dim()
        );
    }

    match report.status {
        ExecutionStatus::Completed => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&report.pipeline_name).bold(),
                style("successfully").green()
            );
            Ok(())
        }
        status => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&report.pipeline_name).bold(),
                format_status(status)
            );
            if let Some(failure) = &report.failure {
                error!("{}", failure.error);
            }
            std::process::exit(1);
        }
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            let pipeline = config.to_pipeline();
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Branches: {}", style(config.triggers.branches.join(", ")).cyan());
            println!("  Steps: {}", style(config.step_count()).cyan());
            println!("  Variables: {}", style(config.variables.len()).cyan());
            for stage in pipeline.stages() {
                let state = if stage.is_empty() {
                    style("not configured").dim().to_string()
                } else {
                    format!("{} step(s)", stage.steps.len())
                };
                println!("  {:<7} {}", stage.kind, state);
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = open_default_store().await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    let mut json_data = Vec::new();
    println!("{} Pipelines in history:", INFO);

    for pipeline_name in &pipelines {
        let executions = store.list_executions(pipeline_name).await?;
        let completed = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Completed)
            .count();
        let failed = executions.len() - completed;

        if cmd.with_counts {
            println!(
                "  {} ({} runs: {} succeeded, {} not)",
                style(pipeline_name).bold(),
                style(executions.len()).cyan(),
                style(completed).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }

        json_data.push(serde_json::json!({
            "name": pipeline_name,
            "execution_count": executions.len(),
            "completed": completed,
        }));
    }

    if cmd.json {
        let data = serde_json::json!({ "pipelines": json_data });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_default_store().await?;

    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;
        match store.load_execution(exec_id).await? {
            Some(summary) => print_execution_details(&summary, cmd.verbose)?,
            None => println!("{} Execution not found", WARN),
        }
        return Ok(());
    }

    let mut executions = match &cmd.pipeline {
        Some(pipeline_name) => store.list_executions(pipeline_name).await?,
        None => {
            let mut all = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all.extend(store.list_executions(&pipeline).await?);
            }
            all
        }
    };
    executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    executions.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(());
    }

    println!("{} Run history (latest {}):", INFO, executions.len());
    for summary in &executions {
        println!("  {}", format_execution_summary(summary));
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary, verbose: bool) -> Result<()> {
    println!("{} Execution Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Trigger: {} to {}", summary.event, style(&summary.branch).cyan());
    if let Some(commit) = &summary.commit {
        println!("  Commit: {}", style(commit).dim());
    }
    println!("  Status: {}", format_status(summary.status));
    if let Some(image) = &summary.image {
        println!("  Image: {}", image);
    }
    if let Some(stage) = summary.failed_stage {
        println!(
            "  Failed at: {}{}",
            style(stage).red(),
            summary
                .failed_step
                .as_deref()
                .map(|s| format!("/{}", s))
                .unwrap_or_default()
        );
    }
    if let Some(error) = &summary.error {
        println!("  Error: {}", style(error).red());
    }
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Progress: {} ({}/{} stages)",
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan(),
        summary.completed_stages,
        summary.total_stages
    );

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
