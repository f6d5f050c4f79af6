//! Container image references

use crate::error::PipelineError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub const LATEST_TAG: &str = "latest";

fn repository_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:[a-zA-Z0-9.-]+(?::[0-9]+)?/)?[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$",
        )
        .expect("valid repository regex")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid tag regex"))
}

/// `repository:tag`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Result<Self, PipelineError> {
        let repository = repository.into();
        let tag = tag.into();
        if !is_valid_repository(&repository) || !is_valid_tag(&tag) {
            return Err(PipelineError::InvalidImageRef(format!("{}:{}", repository, tag)));
        }
        Ok(Self { repository, tag })
    }

    /// Same repository, different tag
    pub fn with_tag(&self, tag: impl Into<String>) -> Result<Self, PipelineError> {
        Self::new(self.repository.clone(), tag)
    }

    pub fn is_latest(&self) -> bool {
        self.tag == LATEST_TAG
    }
}

impl FromStr for ImageRef {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // A colon after the last slash separates the tag; earlier ones belong to a registry port
        let last_slash = s.rfind('/').map(|i| i + 1).unwrap_or(0);
        match s[last_slash..].rfind(':') {
            Some(offset) => {
                let split = last_slash + offset;
                Self::new(&s[..split], &s[split + 1..])
            }
            None => Self::new(s, LATEST_TAG),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

pub fn is_valid_repository(repository: &str) -> bool {
    repository_regex().is_match(repository)
}

pub fn is_valid_tag(tag: &str) -> bool {
    tag_regex().is_match(tag)
}

/// Tag derived from a commit: the first 12 characters of the sha
pub fn commit_tag(commit: &str) -> Option<String> {
    let short: String = commit.trim().chars().take(12).collect();
    if short.is_empty() || !is_valid_tag(&short) {
        None
    } else {
        Some(short)
    }
}
