use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::bail;
use config::{Config, ConfigError, Environment, File};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::model::{RecoveryPolicy, RepositorySpec, DEFAULT_BRANCH};

pub const CONFIG_FILE_NAME: &str = "reposync.toml";
const JSON_CONFIG_FILE_NAME: &str = "config.json";
const SYSTEM_CONFIG_DIR: &str = "/etc/reposync";
const SYSTEM_CONFIG_FILE_NAMES: [&str; 2] = ["config.toml", "config.json"];

pub const DEFAULT_JOBS: usize = 1;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Validated configuration: run settings and the declared repositories.
#[derive(Debug, PartialEq, Eq)]
pub struct ReposyncConfig {
    pub source: PathBuf,
    pub jobs: usize,
    /// `None` lets network operations run for as long as they need.
    pub timeout: Option<Duration>,
    pub recovery: RecoveryPolicy,
    pub repositories: Vec<RepositorySpec>,
}

impl ReposyncConfig {
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => discover(&search_dirs())?,
        };
        info!("Loading configuration from {}", path.display());
        let raw_config = RawConfig::load(Some(path.as_path()), None)?;
        raw_config.validate(path)
    }
}

/// Directories searched for a configuration file, most specific first.
fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir);
    }
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    dirs
}

fn discover(dirs: &[PathBuf]) -> anyhow::Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = dirs
        .iter()
        .flat_map(|dir| [dir.join(CONFIG_FILE_NAME), dir.join(JSON_CONFIG_FILE_NAME)])
        .collect();
    candidates.extend(
        SYSTEM_CONFIG_FILE_NAMES
            .iter()
            .map(|name| Path::new(SYSTEM_CONFIG_DIR).join(name)),
    );

    for candidate in &candidates {
        debug!("Looking for configuration at {}", candidate.display());
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }
    bail!(
        "No configuration file found, looked at: {}",
        candidates
            .iter()
            .map(|candidate| candidate.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )
}

/// Writes a sample `reposync.toml` into `dir`, never over an existing one.
pub fn write_sample(dir: &Path) -> anyhow::Result<PathBuf> {
    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    std::fs::create_dir_all(dir)?;
    std::fs::write(&path, toml::to_string_pretty(&RawConfig::sample())?)?;
    Ok(path)
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Eq)]
struct RawConfig {
    #[serde(default)]
    settings: RawSettings,
    #[serde(default)]
    repositories: Vec<RawRepository>,
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Eq)]
struct RawSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    jobs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recovery: Option<RecoveryPolicy>,
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Eq)]
struct RawRepository {
    #[serde(default)]
    url: String,
    #[serde(default)]
    target_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit: Option<String>,
    #[serde(default)]
    submodules: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_key_path: Option<PathBuf>,
    #[serde(default)]
    force_reset: bool,
}

impl RawConfig {
    fn load(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder
            .add_source(
                Environment::with_prefix("REPOSYNC")
                    .separator("_")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }

    fn validate(self, source: PathBuf) -> anyhow::Result<ReposyncConfig> {
        let mut repositories = Vec::with_capacity(self.repositories.len());
        for (index, raw) in self.repositories.into_iter().enumerate() {
            if raw.url.trim().is_empty() {
                bail!("Repository #{} in {}: url is missing", index, source.display());
            }
            if raw.target_path.as_os_str().is_empty() {
                bail!(
                    "Repository #{} ({}) in {}: target_path is missing",
                    index,
                    raw.url,
                    source.display()
                );
            }
            repositories.push(raw.into_spec());
        }

        let timeout = match self.settings.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(ReposyncConfig {
            source,
            jobs: self.settings.jobs.unwrap_or(DEFAULT_JOBS).max(1),
            timeout,
            recovery: self.settings.recovery.unwrap_or_default(),
            repositories,
        })
    }

    fn sample() -> Self {
        RawConfig {
            settings: RawSettings {
                jobs: Some(DEFAULT_JOBS),
                timeout: Some(DEFAULT_TIMEOUT_SECS),
                recovery: Some(RecoveryPolicy::default()),
            },
            repositories: vec![RawRepository {
                url: "git@github.com:example/tool.git".to_string(),
                target_path: PathBuf::from("/opt"),
                branch: Some(DEFAULT_BRANCH.to_string()),
                commit: None,
                submodules: false,
                ssh_key_path: Some(PathBuf::from("~/.ssh/id_ed25519")),
                force_reset: false,
            }],
        }
    }
}

impl RawRepository {
    fn into_spec(self) -> RepositorySpec {
        let branch = self
            .branch
            .filter(|branch| !branch.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        let mut spec = RepositorySpec::new(self.url, self.target_path)
            .branch(branch)
            .with_submodules(self.submodules)
            .force_reset(self.force_reset);
        if let Some(commit) = self.commit.filter(|commit| !commit.trim().is_empty()) {
            spec = spec.commit(commit);
        }
        if let Some(ssh_key_path) = self.ssh_key_path {
            spec = spec.ssh_key_path(ssh_key_path);
        }
        spec
    }
}
