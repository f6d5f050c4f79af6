//! Image build and registry collaborators

use crate::core::image::{commit_tag, LATEST_TAG};
use crate::core::secrets::{ConfigValue, CredentialHandle};
use crate::core::{BuildSpec, ImageRef, PushSpec};
use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Everything an image build needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub context_dir: PathBuf,
    pub dockerfile: Option<PathBuf>,
    pub repository: String,
    /// Primary tag first; always includes `latest`
    pub tags: Vec<String>,
    pub build_args: HashMap<String, String>,
}

impl BuildContext {
    /// Tags the image with the commit (when known) and `latest`
    pub fn from_spec(spec: &BuildSpec, commit: Option<&str>) -> Self {
        let mut tags = Vec::new();
        if let Some(tag) = commit.and_then(commit_tag) {
            tags.push(tag);
        }
        tags.push(LATEST_TAG.to_string());

        Self {
            context_dir: PathBuf::from(&spec.context),
            dockerfile: spec.dockerfile.as_ref().map(PathBuf::from),
            repository: spec.repository.clone(),
            tags,
            build_args: spec.build_args.clone(),
        }
    }

    /// Every reference the build produces, primary first
    pub fn image_refs(&self) -> Result<Vec<ImageRef>, PipelineError> {
        self.tags
            .iter()
            .map(|tag| ImageRef::new(self.repository.clone(), tag.clone()))
            .collect()
    }

    /// Whether a commit pins the build; otherwise the builder tags by content
    pub fn has_commit_tag(&self) -> bool {
        self.tags.iter().any(|tag| tag != LATEST_TAG)
    }

    pub fn primary_ref(&self) -> Result<ImageRef, PipelineError> {
        let tag = self
            .tags
            .first()
            .cloned()
            .unwrap_or_else(|| LATEST_TAG.to_string());
        ImageRef::new(self.repository.clone(), tag)
    }
}

/// Prefix of tags derived from the built image id
pub const CONTENT_TAG_PREFIX: &str = "sha-";

/// Tag for an image id such as `sha256:<hex>`, e.g. `sha-0123456789ab`
pub fn content_tag(image_id: &str) -> Option<String> {
    let id = image_id.trim();
    let hex = id.strip_prefix("sha256:").unwrap_or(id);
    if hex.len() < 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("{}{}", CONTENT_TAG_PREFIX, &hex[..12]))
}

/// Registry login, as handles resolved only when pushing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub registry: Option<String>,
    pub username: ConfigValue,
    pub password: CredentialHandle,
}

impl From<&PushSpec> for RegistryCredentials {
    fn from(spec: &PushSpec) -> Self {
        Self {
            registry: spec.registry.clone(),
            username: spec.username.clone(),
            password: spec.password.clone(),
        }
    }
}

/// Registry acknowledgement of a pushed image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    pub image: ImageRef,
    pub digest: Option<String>,
}

/// Builds an image from a context and returns its pinned reference
///
/// That is the commit tag when the context has one, otherwise a tag derived
/// from the image content. Either way the image is also tagged `latest`.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, context: &BuildContext) -> Result<ImageRef, PipelineError>;
}

/// Pushes an image to a registry
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn push(
        &self,
        image: &ImageRef,
        credentials: &RegistryCredentials,
    ) -> Result<PushAck, PipelineError>;
}
