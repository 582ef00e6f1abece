use std::{path::PathBuf, time::Duration};

use crate::{config::ReposyncConfig, flock::default_lock_path, model::RecoveryPolicy, Reposync};

#[derive(Default)]
pub struct ReposyncBuilder {
    config_path: Option<PathBuf>,
    lock_file: Option<PathBuf>,

    // Override the configuration file
    jobs: Option<usize>,
    timeout_secs: Option<u64>,
    recovery: Option<RecoveryPolicy>,
}

impl ReposyncBuilder {
    /// Configuration file.
    ///
    /// Searched for next to the executable, in the current directory and in
    /// `/etc/reposync` when not set.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Lock file guarding against concurrent runs.
    ///
    /// Defaults to `$HOME/.reposync/reposync.lock`.
    pub fn lock_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_file = Some(path.into());
        self
    }

    /// Number of repositories reconciled in parallel.
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Seconds a single network operation may take, 0 for no limit.
    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn try_build(self) -> anyhow::Result<Reposync> {
        let Self {
            config_path,
            lock_file,
            jobs,
            timeout_secs,
            recovery,
        } = self;

        let mut config = ReposyncConfig::load(config_path.as_deref())?;
        if let Some(jobs) = jobs {
            config.jobs = jobs.max(1);
        }
        if let Some(timeout_secs) = timeout_secs {
            config.timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));
        }
        if let Some(recovery) = recovery {
            config.recovery = recovery;
        }

        Ok(Reposync {
            config,
            lock_file: lock_file.unwrap_or_else(default_lock_path),
        })
    }
}
