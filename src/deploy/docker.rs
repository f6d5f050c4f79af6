//! Image builder and registry backed by the local `docker` CLI

use crate::core::secrets::{SecretMask, SecretStore};
use crate::core::ImageRef;
use crate::deploy::registry::{
    content_tag, BuildContext, ImageBuilder, ImageRegistry, PushAck, RegistryCredentials,
};
use crate::error::PipelineError;
use crate::execution::process::{run_process, ProcessError, ProcessOutput, ProcessSpec};
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, error, info};

fn digest_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"digest:\s*(sha256:[a-f0-9]{64})").expect("valid digest regex"))
}

/// Extract the manifest digest `docker push` prints on success
pub fn parse_digest(output: &str) -> Option<String> {
    digest_regex()
        .captures(output)
        .map(|caps| caps[1].to_string())
}

pub struct DockerCli {
    docker: String,
    secrets: Arc<dyn SecretStore>,
    timeout: Duration,
}

impl DockerCli {
    pub fn new(secrets: Arc<dyn SecretStore>, timeout: Duration) -> Self {
        Self {
            docker: "docker".to_string(),
            secrets,
            timeout,
        }
    }

    pub fn with_binary(mut self, docker: impl Into<String>) -> Self {
        self.docker = docker.into();
        self
    }

    pub fn build_args(&self, context: &BuildContext, iidfile: Option<&Path>) -> Vec<String> {
        let mut args = vec!["build".to_string()];
        for tag in &context.tags {
            args.push("-t".to_string());
            args.push(format!("{}:{}", context.repository, tag));
        }
        if let Some(dockerfile) = &context.dockerfile {
            args.push("-f".to_string());
            args.push(dockerfile.to_string_lossy().into_owned());
        }

        let mut build_args: Vec<_> = context.build_args.iter().collect();
        build_args.sort();
        for (key, value) in build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }

        if let Some(path) = iidfile {
            args.push("--iidfile".to_string());
            args.push(path.to_string_lossy().into_owned());
        }

        args.push(context.context_dir.to_string_lossy().into_owned());
        args
    }

    async fn docker(&self, spec: ProcessSpec, step: &str) -> Result<ProcessOutput, PipelineError> {
        run_process(&spec).await.map_err(|e| match e {
            ProcessError::Timeout(limit) => PipelineError::StepTimeout {
                step: step.to_string(),
                secs: limit.as_secs(),
            },
            other => PipelineError::Execution {
                step: step.to_string(),
                reason: other.to_string(),
            },
        })
    }
}

impl std::fmt::Debug for DockerCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerCli")
            .field("docker", &self.docker)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl ImageBuilder for DockerCli {
    async fn build(&self, context: &BuildContext) -> Result<ImageRef, PipelineError> {
        let image = context.primary_ref()?;
        info!("Building {}", image);

        let iidfile = tempfile::NamedTempFile::new().map_err(|e| PipelineError::Execution {
            step: "docker build".to_string(),
            reason: format!("failed to create iidfile: {}", e),
        })?;
        let spec = ProcessSpec::new(&self.docker, self.timeout)
            .args(self.build_args(context, Some(iidfile.path())));
        let output = self.docker(spec, "docker build").await?;
        if !output.success() {
            error!("docker build failed: {}", output.stderr.trim());
            return Err(build_failed(&output));
        }
        debug!("docker build output:\n{}", output.stdout.trim());

        if context.has_commit_tag() {
            info!("Built {} in {:?}", image, output.duration);
            return Ok(image);
        }

        // No commit: pin by content so the deploy never runs a moving `latest`
        let image_id = tokio::fs::read_to_string(iidfile.path())
            .await
            .unwrap_or_default();
        let tag = content_tag(&image_id).ok_or_else(|| PipelineError::Execution {
            step: "docker build".to_string(),
            reason: format!("no usable image id reported: '{}'", image_id.trim()),
        })?;
        let pinned = image.with_tag(tag)?;

        let spec = ProcessSpec::new(&self.docker, self.timeout)
            .args(["tag".to_string(), image.to_string(), pinned.to_string()]);
        let output = self.docker(spec, "docker tag").await?;
        if !output.success() {
            error!("docker tag failed: {}", output.stderr.trim());
            return Err(build_failed(&output));
        }

        info!("Built {} in {:?}", pinned, output.duration);
        Ok(pinned)
    }
}

fn build_failed(output: &ProcessOutput) -> PipelineError {
    PipelineError::BuildFailed {
        code: output.exit_code,
        output: format!("{}{}", output.stdout, output.stderr).trim().to_string(),
    }
}

#[async_trait]
impl ImageRegistry for DockerCli {
    async fn push(
        &self,
        image: &ImageRef,
        credentials: &RegistryCredentials,
    ) -> Result<PushAck, PipelineError> {
        let mut mask = SecretMask::new();
        let username = credentials.username.resolve(self.secrets.as_ref(), &mut mask)?;
        let password = self.secrets.resolve(&credentials.password)?;
        mask.add(&password);

        let mut login = ProcessSpec::new(&self.docker, self.timeout)
            .args(["login", "--username", username.as_str(), "--password-stdin"])
            .stdin(password.expose());
        if let Some(registry) = &credentials.registry {
            login = login.arg(registry.as_str());
        }

        let output = self.docker(login, "docker login").await?;
        if !output.success() {
            return Err(PipelineError::Transport(format!(
                "registry login failed: {}",
                mask.apply(output.stderr.trim())
            )));
        }

        info!("Pushing {}", image);
        let push = ProcessSpec::new(&self.docker, self.timeout).args(["push".to_string(), image.to_string()]);
        let output = self.docker(push, "docker push").await?;
        if !output.success() {
            return Err(PipelineError::Transport(format!(
                "push of {} failed: {}",
                image,
                mask.apply(output.stderr.trim())
            )));
        }

        let digest = parse_digest(&output.stdout);
        info!("Pushed {} ({})", image, digest.as_deref().unwrap_or("no digest"));
        Ok(PushAck {
            image: image.clone(),
            digest,
        })
    }
}
