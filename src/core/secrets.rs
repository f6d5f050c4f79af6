//! Secret handles and stores
//!
//! Secrets are referenced in configuration as `${{ secrets.NAME }}` and only
//! turned into values at the point of use. Resolved values never appear in
//! `Debug` output and are masked out of captured command output.

use crate::error::PipelineError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

const MASK: &str = "***";

fn secret_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{\{\s*secrets\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid secret regex")
    })
}

/// Opaque reference to a named secret
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialHandle {
    name: String,
}

impl CredentialHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parse a value that consists of exactly one `${{ secrets.NAME }}` reference
    pub fn parse_reference(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        let caps = secret_ref_regex().captures(trimmed)?;
        let whole = caps.get(0)?;
        if whole.start() != 0 || whole.end() != trimmed.len() {
            return None;
        }
        Some(Self::new(&caps[1]))
    }
}

impl fmt::Display for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{{ secrets.{} }}}}", self.name)
    }
}

/// A resolved secret value
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", MASK)
    }
}

/// Resolves secret handles at run time
pub trait SecretStore: Send + Sync {
    fn resolve(&self, handle: &CredentialHandle) -> Result<Secret, PipelineError>;
}

/// Reads secrets from the process environment
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore {
    prefix: Option<String>,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look secrets up as `<prefix><NAME>` instead of `<NAME>`
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl SecretStore for EnvSecretStore {
    fn resolve(&self, handle: &CredentialHandle) -> Result<Secret, PipelineError> {
        let key = match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, handle.name()),
            None => handle.name().to_string(),
        };
        match std::env::var(&key) {
            Ok(value) if !value.is_empty() => Ok(Secret::new(value)),
            _ => Err(PipelineError::SecretNotFound(handle.name().to_string())),
        }
    }
}

/// In-memory secret map
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, Secret>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), Secret::new(value));
        self
    }
}

impl SecretStore for StaticSecretStore {
    fn resolve(&self, handle: &CredentialHandle) -> Result<Secret, PipelineError> {
        self.secrets
            .get(handle.name())
            .cloned()
            .ok_or_else(|| PipelineError::SecretNotFound(handle.name().to_string()))
    }
}

/// A configuration value that is either given literally or held as a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConfigValue {
    Literal(String),
    Secret(CredentialHandle),
}

impl ConfigValue {
    pub fn is_secret(&self) -> bool {
        matches!(self, ConfigValue::Secret(_))
    }

    /// Turn the value into a string, recording secret values in `mask`
    pub fn resolve(
        &self,
        store: &dyn SecretStore,
        mask: &mut SecretMask,
    ) -> Result<String, PipelineError> {
        match self {
            ConfigValue::Literal(value) => Ok(value.clone()),
            ConfigValue::Secret(handle) => {
                let secret = store.resolve(handle)?;
                mask.add(&secret);
                Ok(secret.expose().to_string())
            }
        }
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        match CredentialHandle::parse_reference(&value) {
            Some(handle) => ConfigValue::Secret(handle),
            None => ConfigValue::Literal(value),
        }
    }
}

impl From<ConfigValue> for String {
    fn from(value: ConfigValue) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Literal(value) => f.write_str(value),
            ConfigValue::Secret(handle) => write!(f, "{}", handle),
        }
    }
}

/// Substitute every `${{ secrets.NAME }}` inside `text`
pub fn interpolate_secrets(
    text: &str,
    store: &dyn SecretStore,
    mask: &mut SecretMask,
) -> Result<String, PipelineError> {
    let re = secret_ref_regex();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let secret = store.resolve(&CredentialHandle::new(&caps[1]))?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(secret.expose());
        mask.add(&secret);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Set of resolved secret values to scrub from output
#[derive(Debug, Clone, Default)]
pub struct SecretMask {
    values: Vec<String>,
}

impl SecretMask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, secret: &Secret) {
        let value = secret.expose();
        if value.is_empty() || self.values.iter().any(|v| v == value) {
            return;
        }
        self.values.push(value.to_string());
        // Longest first, so a secret containing another is masked whole
        self.values.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn apply(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for value in &self.values {
            masked = masked.replace(value.as_str(), MASK);
        }
        masked
    }
}
