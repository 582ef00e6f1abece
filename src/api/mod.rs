use std::path::{Path, PathBuf};

use log::info;

use crate::{
    config::{self, ReposyncConfig},
    engine::{ReconcileError, ReconciliationEngine},
    flock::FileLock,
    git::Git2Backend,
    model::{DirectoryState, ReconciliationOutcome, RepositorySpec, ResolvedTarget},
    sync::SyncRunner,
};

mod builder;

pub use builder::ReposyncBuilder;

pub struct Reposync {
    config: ReposyncConfig,
    lock_file: PathBuf,
}

/// What `plan` found for one configured repository.
#[derive(Debug)]
pub struct PlanEntry {
    pub spec: RepositorySpec,
    pub resolved: Result<(ResolvedTarget, DirectoryState), ReconcileError>,
}

impl Reposync {
    pub fn builder() -> ReposyncBuilder {
        ReposyncBuilder::default()
    }

    /// Writes a sample configuration file into `directory`
    pub fn init(directory: impl AsRef<Path>) -> anyhow::Result<PathBuf> {
        let path = config::write_sample(directory.as_ref())?;
        info!("Wrote sample configuration to {}", path.display());
        Ok(path)
    }

    pub fn config(&self) -> &ReposyncConfig {
        &self.config
    }

    /// Reconciles every configured repository, one outcome per entry in configuration order.
    ///
    /// Only one `sync` runs at a time per lock file.
    pub fn sync(&self) -> anyhow::Result<Vec<ReconciliationOutcome>> {
        let _lock = FileLock::new(&self.lock_file)?;
        let runner = SyncRunner::new(self.engine(), self.config.jobs);
        let outcomes = runner.run(self.config.repositories.clone(), true)?;
        Ok(outcomes)
    }

    /// Resolves every configured repository and inspects its directory without changing it.
    pub fn plan(&self) -> Vec<PlanEntry> {
        let engine = self.engine();
        self.config
            .repositories
            .iter()
            .map(|spec| PlanEntry {
                spec: spec.clone(),
                resolved: engine.plan(spec),
            })
            .collect()
    }

    fn engine(&self) -> ReconciliationEngine {
        ReconciliationEngine::new(Git2Backend::new(self.config.timeout), self.config.recovery)
    }
}
