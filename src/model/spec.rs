use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use super::ParseError;

pub const DEFAULT_BRANCH: &str = "master";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Https,
    Ssh,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Scheme::Https => f.write_str("https"),
            Scheme::Ssh => f.write_str("ssh"),
        }
    }
}

/// A remote repository address in one of the two supported forms,
/// `https://host/org/repo.git` or `git@host:org/repo.git`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUrl {
    pub url: String,
    pub scheme: Scheme,
    pub host: String,
    pub path: String,
}

impl RemoteUrl {
    pub fn parse(url: &str) -> Result<RemoteUrl, ParseError> {
        let re: Regex = Regex::new(
            r"^(?:(?P<https>https://)(?P<web_host>[^/]+)/?|git@(?P<ssh_host>[^:/]+):)(?P<path>.*)$",
        )
        .unwrap();
        let captures = re
            .captures(url)
            .ok_or_else(|| ParseError::UnsupportedScheme(url.to_string()))?;

        let (scheme, host) = match (captures.name("https"), captures.name("ssh_host")) {
            (Some(_), _) => (Scheme::Https, captures.name("web_host")),
            (None, host) => (Scheme::Ssh, host),
        };
        let host = host.map(|m| m.as_str().to_string()).ok_or_else(|| {
            ParseError::MissingUrlComponent("host".to_string(), url.to_string())
        })?;
        let path = captures
            .name("path")
            .map(|m| m.as_str().trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                ParseError::MissingUrlComponent("repository".to_string(), url.to_string())
            })?;

        let remote = RemoteUrl {
            url: url.to_string(),
            scheme,
            host,
            path,
        };
        if remote.repository_name().is_empty() {
            return Err(ParseError::MissingUrlComponent(
                "repository".to_string(),
                url.to_string(),
            ));
        }
        Ok(remote)
    }

    /// Short name of the repository: the last path segment without `.git`.
    pub fn repository_name(&self) -> &str {
        let last = self.path.rsplit('/').next().unwrap_or(&self.path);
        last.strip_suffix(".git").unwrap_or(last)
    }
}

impl Display for RemoteUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// Declared state of one repository: where it lives and what must be checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySpec {
    pub url: String,
    pub target_path: PathBuf,
    pub branch: String,
    /// Takes precedence over `branch` for the final HEAD.
    pub commit: Option<String>,
    pub with_submodules: bool,
    /// Only used for `git@` urls.
    pub ssh_key_path: Option<PathBuf>,
    pub force_reset: bool,
}

impl RepositorySpec {
    pub fn new(url: impl Into<String>, target_path: impl Into<PathBuf>) -> Self {
        RepositorySpec {
            url: url.into(),
            target_path: target_path.into(),
            branch: DEFAULT_BRANCH.to_string(),
            commit: None,
            with_submodules: false,
            ssh_key_path: None,
            force_reset: false,
        }
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    pub fn with_submodules(mut self, with_submodules: bool) -> Self {
        self.with_submodules = with_submodules;
        self
    }

    pub fn ssh_key_path(mut self, path: impl AsRef<Path>) -> Self {
        self.ssh_key_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn force_reset(mut self, force_reset: bool) -> Self {
        self.force_reset = force_reset;
        self
    }

    pub fn remote(&self) -> Result<RemoteUrl, ParseError> {
        RemoteUrl::parse(&self.url)
    }
}

/// What the engine does once destructive recovery is allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryPolicy {
    /// Move the existing directory aside and clone fresh.
    #[default]
    #[serde(rename = "backup-reclone")]
    BackupReclone,
    /// Reuse the working tree files under fresh repository metadata.
    #[serde(rename = "reinit")]
    Reinit,
}

impl FromStr for RecoveryPolicy {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.to_ascii_lowercase();
        match value.as_str() {
            "backup-reclone" => Ok(RecoveryPolicy::BackupReclone),
            "reinit" => Ok(RecoveryPolicy::Reinit),
            _ => Err(ParseError::InvalidRecoveryPolicy(value)),
        }
    }
}

impl Display for RecoveryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RecoveryPolicy::BackupReclone => f.write_str("backup-reclone"),
            RecoveryPolicy::Reinit => f.write_str("reinit"),
        }
    }
}
