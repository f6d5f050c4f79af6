//! Remote command execution over ssh

use crate::core::secrets::Secret;
use crate::error::PipelineError;
use crate::execution::process::{run_process, ProcessError, ProcessSpec};
use async_trait::async_trait;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, warn};

/// ssh reserves this exit code for its own connection and auth failures
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// An authenticated session target; holds the resolved key only for the call
#[derive(Debug, Clone)]
pub struct RemoteSession {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub key: Secret,
}

impl RemoteSession {
    /// Checked session; host and user must not be readable as ssh options
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        port: u16,
        key: Secret,
    ) -> Result<Self, PipelineError> {
        let session = Self {
            host: host.into(),
            user: user.into(),
            port,
            key,
        };
        session.validate()?;
        Ok(session)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        // Values may come from secrets, so they stay out of the message
        for (what, value) in [("host", &self.host), ("user", &self.user)] {
            if value.is_empty() {
                return Err(PipelineError::InvalidTarget(format!("{} is empty", what)));
            }
            if value.starts_with('-') {
                return Err(PipelineError::InvalidTarget(format!("{} starts with '-'", what)));
            }
            if value.contains(|c: char| c.is_whitespace() || c == '@') {
                return Err(PipelineError::InvalidTarget(format!(
                    "{} contains whitespace or '@'",
                    what
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Runs a script on a remote host
///
/// `Ok` means the script ran (whatever its exit code); unreachable hosts and
/// rejected credentials are `PipelineError::Transport`.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, session: &RemoteSession, script: &str) -> Result<RemoteOutput, PipelineError>;
}

/// Uses the system `ssh` client in batch mode
#[derive(Debug, Clone)]
pub struct SshExecutor {
    ssh: String,
    connect_timeout_secs: u64,
    timeout: Duration,
}

impl SshExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            ssh: "ssh".to_string(),
            connect_timeout_secs: 10,
            timeout,
        }
    }

    pub fn with_binary(mut self, ssh: impl Into<String>) -> Self {
        self.ssh = ssh.into();
        self
    }

    pub fn build_args(&self, session: &RemoteSession, identity_file: &str, script: &str) -> Vec<String> {
        let mut args = vec!["-i".to_string(), identity_file.to_string()];

        if session.port != 22 {
            args.push("-p".to_string());
            args.push(session.port.to_string());
        }

        // Never prompt; fail fast on dead connections
        for option in [
            "BatchMode=yes".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "ServerAliveInterval=15".to_string(),
            "ServerAliveCountMax=3".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ] {
            args.push("-o".to_string());
            args.push(option);
        }

        args.push(format!("{}@{}", session.user, session.host));
        args.push(script.to_string());
        args
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, session: &RemoteSession, script: &str) -> Result<RemoteOutput, PipelineError> {
        session.validate()?;

        // Key lives in a 0600 temp file for the duration of the call
        let mut key_file = tempfile::NamedTempFile::new()
            .map_err(|e| PipelineError::Transport(format!("failed to stage ssh key: {}", e)))?;
        let mut key = session.key.expose().to_string();
        if !key.ends_with('\n') {
            key.push('\n');
        }
        key_file
            .write_all(key.as_bytes())
            .and_then(|_| key_file.flush())
            .map_err(|e| PipelineError::Transport(format!("failed to stage ssh key: {}", e)))?;

        let identity = key_file.path().to_string_lossy().into_owned();
        let spec = ProcessSpec::new(&self.ssh, self.timeout)
            .args(self.build_args(session, &identity, script));

        debug!("ssh {}@{}: {}", session.user, session.host, script);
        let output = run_process(&spec).await.map_err(|e| match e {
            ProcessError::Spawn { .. } => PipelineError::Execution {
                step: "ssh".to_string(),
                reason: e.to_string(),
            },
            other => PipelineError::Transport(other.to_string()),
        })?;

        if output.exit_code == SSH_TRANSPORT_FAILURE {
            warn!("ssh to {} failed: {}", session.host, output.stderr.trim());
            return Err(PipelineError::Transport(format!(
                "ssh to {} failed: {}",
                session.host,
                output.stderr.trim()
            )));
        }

        Ok(RemoteOutput {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Quote an argument for a POSIX shell when it needs it
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    const SHELL_META: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    format!("'{}'", arg.replace('\'', "'\\''"))
}
