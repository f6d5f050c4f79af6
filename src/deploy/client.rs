//! Deployment client - replaces a running container on a remote host

use crate::core::secrets::{ConfigValue, CredentialHandle, SecretMask, SecretStore};
use crate::core::{DeploySpec, ImageRef};
use crate::deploy::remote::{quote_arg, RemoteExecutor, RemoteOutput, RemoteSession};
use crate::deploy::{DeployPhase, DeployReport, PhaseOutcome};
use crate::error::PipelineError;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;
use tracing::{error, info, warn};

fn not_found_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)no such container").expect("valid not-found regex"))
}

/// Where and as what a container runs
#[derive(Debug, Clone)]
pub struct DeploymentTarget {
    pub host: ConfigValue,
    pub user: ConfigValue,
    pub key: CredentialHandle,
    pub ssh_port: u16,
    pub container: String,
    pub ports: Vec<String>,
    pub env_file: Option<String>,
    pub restart: String,
}

impl DeploymentTarget {
    pub fn from_spec(spec: &DeploySpec) -> Self {
        Self {
            host: spec.host.clone(),
            user: spec.user.clone(),
            key: spec.key.clone(),
            ssh_port: spec.ssh_port,
            container: spec.container.clone(),
            ports: spec.ports.clone(),
            env_file: spec.env_file.clone(),
            restart: spec.restart.clone(),
        }
    }

    /// Remote command for a deploy phase
    pub fn command_for(&self, phase: DeployPhase, image: &ImageRef) -> String {
        let container = quote_arg(&self.container);
        match phase {
            DeployPhase::Pull => format!("docker pull {}", quote_arg(&image.to_string())),
            DeployPhase::Stop => format!("docker stop {}", container),
            DeployPhase::Remove => format!("docker rm {}", container),
            DeployPhase::Run => {
                let mut parts = vec![
                    "docker run -d".to_string(),
                    format!("--name {}", container),
                    format!("--restart {}", quote_arg(&self.restart)),
                ];
                for port in &self.ports {
                    parts.push(format!("-p {}", quote_arg(port)));
                }
                if let Some(env_file) = &self.env_file {
                    parts.push(format!("--env-file {}", quote_arg(env_file)));
                }
                parts.push(quote_arg(&image.to_string()));
                parts.join(" ")
            }
        }
    }
}

/// Runs the pull, stop, remove, run sequence against a target
///
/// Deploys to the same host and container are serialised.
pub struct DeploymentClient {
    remote: Arc<dyn RemoteExecutor>,
    secrets: Arc<dyn SecretStore>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeploymentClient {
    pub fn new(remote: Arc<dyn RemoteExecutor>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            remote,
            secrets,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, key: String) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key).or_default().clone()
    }

    /// Replace the target's container with one running `image`
    ///
    /// Running it twice with the same image leaves the host in the same state.
    pub async fn deploy(
        &self,
        target: &DeploymentTarget,
        image: &ImageRef,
    ) -> Result<DeployReport, PipelineError> {
        let mut mask = SecretMask::new();
        let host = target.host.resolve(self.secrets.as_ref(), &mut mask)?;
        let user = target.user.resolve(self.secrets.as_ref(), &mut mask)?;
        let key = self.secrets.resolve(&target.key)?;
        mask.add(&key);

        let session = RemoteSession::new(host, user, target.ssh_port, key)?;

        let lock = self.lock_for(format!("{}/{}", session.host, target.container));
        let _guard = lock.lock().await;

        info!("Deploying {} as {}", image, target.container);
        let mut report = DeployReport::new(&target.container, image.clone());

        for phase in [
            DeployPhase::Pull,
            DeployPhase::Stop,
            DeployPhase::Remove,
            DeployPhase::Run,
        ] {
            let command = target.command_for(phase, image);
            let started = Instant::now();
            let output = match self.remote.execute(&session, &command).await {
                Ok(output) => output,
                Err(PipelineError::Transport(msg)) => {
                    let reason = mask.apply(&msg);
                    error!(
                        "Lost {} during {} of {}; host state needs checking: {}",
                        session.host, phase, image, reason
                    );
                    return Err(PipelineError::DeployInterrupted {
                        phase,
                        reason,
                        report: Box::new(report),
                    });
                }
                Err(other) => return Err(other),
            };

            let ignored = !output.success() && phase.ignores_not_found() && is_not_found(&output);
            report.phases.push(PhaseOutcome {
                phase,
                exit_code: output.exit_code,
                output: mask.apply(output.combined().trim()),
                ignored,
                duration: started.elapsed(),
            });

            if ignored {
                warn!("No container {} to {}, continuing", target.container, phase);
                continue;
            }

            if !output.success() {
                let reason = format!(
                    "`{}` exited with {}: {}",
                    command,
                    output.exit_code,
                    mask.apply(output.stderr.trim())
                );
                error!("Deploy of {} aborted during {}: {}", image, phase, reason);
                return Err(PipelineError::DeployAborted {
                    phase,
                    reason,
                    report: Box::new(report),
                });
            }

            info!("Deploy phase {} done", phase);
        }

        info!("Deployed {} as {}", image, target.container);
        Ok(report)
    }
}

impl std::fmt::Debug for DeploymentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentClient").finish_non_exhaustive()
    }
}

fn is_not_found(output: &RemoteOutput) -> bool {
    not_found_regex().is_match(&output.stderr) || not_found_regex().is_match(&output.stdout)
}
