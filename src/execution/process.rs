//! Bounded subprocess execution shared by steps, probes and collaborators

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be started
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    /// Started, but feeding stdin or collecting output failed
    #[error("i/o error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// What to run and under which bounds
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Written to the child's stdin, then stdin is closed
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            stdin: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn current_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code, or -1 when the process was killed by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a process to completion, killing it if it outlives `spec.timeout`
///
/// The child inherits the parent environment with `spec.env` layered on top.
pub async fn run_process(spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
    debug!("Spawning {} with {} args", spec.program, spec.args.len());

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(&spec.env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }

    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    let input = spec.stdin.clone();
    let completion = async move {
        if let (Some(input), Some(mut handle)) = (input, child.stdin.take()) {
            handle.write_all(input.as_bytes()).await?;
            // Dropping the handle closes stdin
        }
        child.wait_with_output().await
    };

    // On timeout the future is dropped, which kills the child
    let output = timeout(spec.timeout, completion)
        .await
        .map_err(|_| {
            warn!("{} exceeded {}s, killed", spec.program, spec.timeout.as_secs());
            ProcessError::Timeout(spec.timeout)
        })?
        .map_err(|source| ProcessError::Io {
            program: spec.program.clone(),
            source,
        })?;

    let result = ProcessOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration: started.elapsed(),
    };

    debug!(
        "{} exited with {} after {:?}",
        spec.program, result.exit_code, result.duration
    );

    Ok(result)
}
