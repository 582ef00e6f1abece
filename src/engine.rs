use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{
    backup::{self, BackupError},
    git::{Git2Backend, GitBackend, GitError, Transport, TransportError},
    model::{
        DirectoryState, ParseError, ReconciliationOutcome, RecoveryPolicy, RepositorySpec,
        ResolvedTarget, Status,
    },
    path::{self, ResolveError},
};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Unsupported repository URL scheme for {url}")]
    UnsupportedScheme { url: String },
    #[error("Invalid repository URL: {0}")]
    InvalidUrl(ParseError),
    #[error("Invalid target path {path}: {error}")]
    InvalidTarget { path: String, error: std::io::Error },
    #[error("SSH key {path} does not exist or is not a file")]
    InvalidSshKey { path: String },
    #[error("Failed to clone {url} into {path}: {source}")]
    CloneFailed {
        url: String,
        path: String,
        source: GitError,
    },
    #[error("Failed to pull {path}: {source}. Enable force_reset to recover automatically, this is a destructive operation.")]
    PullFailed { path: String, source: GitError },
    #[error("{path} is {state} and force_reset is not enabled. Enable force_reset to recover automatically, this is a destructive operation.")]
    InvalidRepositoryNoForceReset {
        path: String,
        state: DirectoryState,
    },
    #[error("Backup failed, nothing was changed: {0}")]
    BackupFailed(#[from] BackupError),
    #[error("Failed to reinitialise {path}: {source}")]
    ReinitFailed { path: String, source: GitError },
    #[error("Failed to check out {revision} in {path}: {source}")]
    CheckoutFailed {
        path: String,
        revision: String,
        source: GitError,
    },
    #[error("Failed to update submodules of {path}: {source}")]
    SubmoduleSyncFailed { path: String, source: GitError },
    #[error("Cancelled before it started")]
    Cancelled,
    #[error("Reconciliation stopped unexpectedly: {message}")]
    Aborted { message: String },
}

/// Discriminant of [`ReconcileError`], for matching and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedScheme,
    InvalidUrl,
    InvalidTarget,
    InvalidSshKey,
    CloneFailed,
    PullFailed,
    InvalidRepositoryNoForceReset,
    BackupFailed,
    ReinitFailed,
    CheckoutFailed,
    SubmoduleSyncFailed,
    Cancelled,
    Aborted,
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::UnsupportedScheme { .. } => ErrorKind::UnsupportedScheme,
            ReconcileError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            ReconcileError::InvalidTarget { .. } => ErrorKind::InvalidTarget,
            ReconcileError::InvalidSshKey { .. } => ErrorKind::InvalidSshKey,
            ReconcileError::CloneFailed { .. } => ErrorKind::CloneFailed,
            ReconcileError::PullFailed { .. } => ErrorKind::PullFailed,
            ReconcileError::InvalidRepositoryNoForceReset { .. } => {
                ErrorKind::InvalidRepositoryNoForceReset
            }
            ReconcileError::BackupFailed(_) => ErrorKind::BackupFailed,
            ReconcileError::ReinitFailed { .. } => ErrorKind::ReinitFailed,
            ReconcileError::CheckoutFailed { .. } => ErrorKind::CheckoutFailed,
            ReconcileError::SubmoduleSyncFailed { .. } => ErrorKind::SubmoduleSyncFailed,
            ReconcileError::Cancelled => ErrorKind::Cancelled,
            ReconcileError::Aborted { .. } => ErrorKind::Aborted,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl From<ParseError> for ReconcileError {
    fn from(error: ParseError) -> Self {
        match error {
            ParseError::UnsupportedScheme(url) => ReconcileError::UnsupportedScheme { url },
            other => ReconcileError::InvalidUrl(other),
        }
    }
}

impl From<ResolveError> for ReconcileError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::Url(error) => error.into(),
            ResolveError::Absolute { path, error } => ReconcileError::InvalidTarget { path, error },
        }
    }
}

impl From<TransportError> for ReconcileError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Url(error) => error.into(),
            TransportError::MissingSshKey { path } => ReconcileError::InvalidSshKey { path },
        }
    }
}

/// Why the engine wants to recover a target.
#[derive(Debug)]
enum RecoveryCause {
    PullFailed(GitError),
    NotARepository,
    BareRepository,
}

impl RecoveryCause {
    fn into_error(self, path: &Path) -> ReconcileError {
        let path = path.to_string_lossy().to_string();
        match self {
            RecoveryCause::PullFailed(source) => ReconcileError::PullFailed { path, source },
            RecoveryCause::NotARepository => ReconcileError::InvalidRepositoryNoForceReset {
                path,
                state: DirectoryState::PresentNotARepository,
            },
            RecoveryCause::BareRepository => ReconcileError::InvalidRepositoryNoForceReset {
                path,
                state: DirectoryState::ValidBareRepository,
            },
        }
    }
}

#[derive(Debug)]
enum Step {
    Inspect,
    Clone,
    Pull,
    Recover(RecoveryCause),
    ApplyRevision { recovered: bool },
    Submodules { recovered: bool },
}

struct Finished {
    recovered: bool,
    submodule_error: Option<ReconcileError>,
}

/// Brings one local directory in line with one [`RepositorySpec`].
///
/// The engine keeps nothing between calls; every spec is reconciled on its own.
pub struct ReconciliationEngine<B = Git2Backend> {
    backend: B,
    recovery: RecoveryPolicy,
}

impl<B: GitBackend> ReconciliationEngine<B> {
    pub fn new(backend: B, recovery: RecoveryPolicy) -> Self {
        ReconciliationEngine { backend, recovery }
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        self.recovery
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn reconcile(&self, spec: &RepositorySpec) -> ReconciliationOutcome {
        match path::resolve(&spec.target_path, &spec.url) {
            Ok(target) => self.reconcile_at(spec, &target),
            Err(err) => {
                let err = ReconcileError::from(err);
                error!("Failed to process {}: {}", spec.url, err);
                ReconciliationOutcome::failed(&spec.target_path, err)
            }
        }
    }

    /// Where `spec` would land and what is there now, without touching anything.
    pub fn plan(
        &self,
        spec: &RepositorySpec,
    ) -> Result<(ResolvedTarget, DirectoryState), ReconcileError> {
        Transport::prepare(&spec.url, spec.ssh_key_path.as_deref())?;
        let target = path::resolve(&spec.target_path, &spec.url)?;
        let state = self.backend.classify(target.path());
        Ok((target, state))
    }

    /// Reconciles `spec` at an already resolved location.
    pub fn reconcile_at(
        &self,
        spec: &RepositorySpec,
        target: &ResolvedTarget,
    ) -> ReconciliationOutcome {
        let path = target.path();
        info!("Processing {} at {}", spec.url, path.display());

        let mut backup_path = None;
        match self.drive(spec, path, &mut backup_path) {
            Ok(Finished {
                recovered,
                submodule_error,
            }) => {
                let resulting_commit = self.backend.head_commit(path).ok().flatten();
                let status = match (&submodule_error, recovered) {
                    (Some(_), _) => Status::Degraded,
                    (None, true) => Status::RecoveredSuccess,
                    (None, false) => Status::Success,
                };
                ReconciliationOutcome {
                    final_path: path.to_path_buf(),
                    resulting_commit,
                    status,
                    error: submodule_error,
                    backup_path,
                }
            }
            Err(err) => {
                error!(
                    "Failed to process {} at {}: {}",
                    spec.url,
                    path.display(),
                    err
                );
                ReconciliationOutcome {
                    backup_path,
                    ..ReconciliationOutcome::failed(path, err)
                }
            }
        }
    }

    fn drive(
        &self,
        spec: &RepositorySpec,
        path: &Path,
        backup_path: &mut Option<PathBuf>,
    ) -> Result<Finished, ReconcileError> {
        let transport = Transport::prepare(&spec.url, spec.ssh_key_path.as_deref())?;

        let mut step = Step::Inspect;
        loop {
            debug!("{}: {:?}", path.display(), step);
            step = match step {
                Step::Inspect => match self.backend.classify(path) {
                    DirectoryState::Absent => Step::Clone,
                    DirectoryState::ValidRepository => Step::Pull,
                    DirectoryState::ValidBareRepository => {
                        Step::Recover(RecoveryCause::BareRepository)
                    }
                    DirectoryState::PresentNotARepository => {
                        Step::Recover(RecoveryCause::NotARepository)
                    }
                },
                Step::Clone => {
                    self.clone_fresh(spec, path, &transport)?;
                    Step::ApplyRevision { recovered: false }
                }
                Step::Pull => match self.backend.pull(path, &transport) {
                    Ok(()) => Step::ApplyRevision { recovered: false },
                    Err(err) => {
                        warn!("Pulling {} failed: {}", path.display(), err);
                        Step::Recover(RecoveryCause::PullFailed(err))
                    }
                },
                Step::Recover(cause) => {
                    if !spec.force_reset {
                        return Err(cause.into_error(path));
                    }
                    warn!(
                        "Recovering {} ({:?}) with the {} policy",
                        path.display(),
                        cause,
                        self.recovery
                    );
                    self.recover(spec, path, &transport, &cause, backup_path)?;
                    Step::ApplyRevision { recovered: true }
                }
                Step::ApplyRevision { recovered } => {
                    match self.apply_revision(spec, path, &transport) {
                        // A local branch that cannot follow origin is a failed pull
                        Err(ReconcileError::CheckoutFailed {
                            source: source @ GitError::NotFastForward { .. },
                            ..
                        }) if !recovered => {
                            warn!("Updating {} failed: {}", path.display(), source);
                            Step::Recover(RecoveryCause::PullFailed(source))
                        }
                        result => {
                            result?;
                            Step::Submodules { recovered }
                        }
                    }
                }
                Step::Submodules { recovered } => {
                    let submodule_error = if spec.with_submodules {
                        info!("Initializing all submodules of {}", path.display());
                        self.backend
                            .update_submodules(path, &transport)
                            .map_err(|source| {
                                let err = ReconcileError::SubmoduleSyncFailed {
                                    path: path.to_string_lossy().to_string(),
                                    source,
                                };
                                warn!("{}", err);
                                err
                            })
                            .err()
                    } else {
                        None
                    };
                    return Ok(Finished {
                        recovered,
                        submodule_error,
                    });
                }
            };
        }
    }

    fn clone_fresh(
        &self,
        spec: &RepositorySpec,
        path: &Path,
        transport: &Transport,
    ) -> Result<(), ReconcileError> {
        self.backend
            .clone_repo(&spec.url, path, &spec.branch, transport)
            .map_err(|source| ReconcileError::CloneFailed {
                url: spec.url.clone(),
                path: path.to_string_lossy().to_string(),
                source,
            })
    }

    fn recover(
        &self,
        spec: &RepositorySpec,
        path: &Path,
        transport: &Transport,
        cause: &RecoveryCause,
        backup_path: &mut Option<PathBuf>,
    ) -> Result<(), ReconcileError> {
        match self.recovery {
            RecoveryPolicy::BackupReclone => {
                let backup = backup::relocate(path)?;
                warn!("Moved {} to {}", path.display(), backup.display());
                *backup_path = Some(backup);
                self.clone_fresh(spec, path, transport)
            }
            RecoveryPolicy::Reinit => {
                // The metadata of a bare store would end up as working tree files
                if matches!(cause, RecoveryCause::BareRepository) {
                    let backup = backup::relocate(path)?;
                    warn!("Moved bare {} to {}", path.display(), backup.display());
                    *backup_path = Some(backup);
                }
                self.backend
                    .reinit(path, &spec.url, &spec.branch, transport)
                    .map_err(|source| ReconcileError::ReinitFailed {
                        path: path.to_string_lossy().to_string(),
                        source,
                    })
            }
        }
    }

    /// Branch first, then the pinned commit on top of it.
    fn apply_revision(
        &self,
        spec: &RepositorySpec,
        path: &Path,
        transport: &Transport,
    ) -> Result<(), ReconcileError> {
        let checkout_failed = |revision: &str, source: GitError| ReconcileError::CheckoutFailed {
            path: path.to_string_lossy().to_string(),
            revision: revision.to_string(),
            source,
        };

        let branch = if spec.force_reset {
            self.backend.hard_reset(path, &spec.branch)
        } else {
            self.backend.checkout_branch(path, &spec.branch, false)
        };
        branch.map_err(|source| checkout_failed(&spec.branch, source))?;

        if let Some(commit) = &spec.commit {
            self.backend
                .checkout_commit(path, &spec.branch, commit, spec.force_reset, transport)
                .map_err(|source| checkout_failed(commit, source))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use git2::Repository;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::git::test_support::{commit_file, LocalRemotes, Upstream};

    const URL: &str = "https://host/org/myrepo.git";

    fn engine(upstream: &Upstream) -> ReconciliationEngine<LocalRemotes> {
        ReconciliationEngine::new(
            LocalRemotes::default().remote(URL, upstream),
            RecoveryPolicy::BackupReclone,
        )
    }

    fn reinit_engine(upstream: &Upstream) -> ReconciliationEngine<LocalRemotes> {
        ReconciliationEngine::new(
            LocalRemotes::default().remote(URL, upstream),
            RecoveryPolicy::Reinit,
        )
    }

    fn sorted_entries(path: &Path) -> Vec<String> {
        let mut entries: Vec<String> = std::fs::read_dir(path)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        entries.sort();
        entries
    }

    #[test]
    fn absent_target_is_cloned() {
        let upstream = Upstream::new();
        let tip = upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();

        let outcome = engine(&upstream).reconcile(&RepositorySpec::new(URL, dir.path()));

        assert_eq!(outcome.status, Status::Success);
        assert_eq!(outcome.final_path, dir.path().join("myrepo"));
        assert_eq!(outcome.resulting_commit, Some(tip.to_string()));
        assert!(outcome.error.is_none());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("myrepo/a.txt")).unwrap(),
            "one"
        );
    }

    #[test]
    fn second_run_is_idempotent() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&upstream);
        let spec = RepositorySpec::new(URL, dir.path());

        let first = engine.reconcile(&spec);
        let second = engine.reconcile(&spec);

        assert_eq!(first.status, Status::Success);
        assert_eq!(second.status, Status::Success);
        assert_eq!(first.resulting_commit, second.resulting_commit);
        assert_eq!(second.backup_path, None);
        assert_eq!(sorted_entries(dir.path()), vec!["myrepo"]);
    }

    #[test]
    fn pinned_and_forced_second_run_is_idempotent() {
        let upstream = Upstream::new();
        let pinned = upstream.commit("a.txt", "one");
        upstream.commit("a.txt", "two");
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&upstream);
        let spec = RepositorySpec::new(URL, dir.path())
            .commit(pinned.to_string())
            .force_reset(true);

        let first = engine.reconcile(&spec);
        let second = engine.reconcile(&spec);

        assert_eq!(first.status, Status::Success);
        assert_eq!(second.status, Status::Success);
        assert_eq!(second.resulting_commit, Some(pinned.to_string()));
        assert_eq!(sorted_entries(dir.path()), vec!["myrepo"]);
    }

    #[test]
    fn existing_working_copy_is_pulled() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&upstream);
        let spec = RepositorySpec::new(URL, dir.path());
        engine.reconcile(&spec);
        let newer = upstream.commit("a.txt", "two");

        let outcome = engine.reconcile(&spec);

        assert_eq!(outcome.status, Status::Success);
        assert_eq!(outcome.resulting_commit, Some(newer.to_string()));
    }

    #[test]
    fn returning_to_a_branch_follows_origin() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        upstream.branch("release");
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&upstream);
        let release = RepositorySpec::new(URL, dir.path()).branch("release");
        engine.reconcile(&release);
        engine.reconcile(&RepositorySpec::new(URL, dir.path()).branch("master"));
        let newer = upstream.commit_on("release", "a.txt", "two");

        let outcome = engine.reconcile(&release);

        assert_eq!(outcome.status, Status::Success);
        assert_eq!(outcome.resulting_commit, Some(newer.to_string()));
        assert_eq!(
            std::fs::read_to_string(outcome.final_path.join("a.txt")).unwrap(),
            "two"
        );
    }

    #[test]
    fn returning_to_a_diverged_branch_without_force_reset_fails() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        upstream.branch("release");
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&upstream);
        let release = RepositorySpec::new(URL, dir.path()).branch("release");
        let path = engine.reconcile(&release).final_path;
        let local = commit_file(&Repository::open(&path).unwrap(), "b.txt", "local");
        engine.reconcile(&RepositorySpec::new(URL, dir.path()).branch("master"));
        upstream.commit_on("release", "a.txt", "two");

        let outcome = engine.reconcile(&release);

        assert_eq!(outcome.status, Status::Failed);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::PullFailed));
        assert_eq!(outcome.backup_path, None);
        assert_eq!(
            engine.backend().head_commit(&path).unwrap(),
            Some(local.to_string())
        );
    }

    #[test]
    fn pinned_commit_wins_over_branch_tip() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let pinned = upstream.commit("a.txt", "two");
        upstream.commit("a.txt", "three");
        let dir = tempfile::tempdir().unwrap();

        let outcome = engine(&upstream).reconcile(
            &RepositorySpec::new(URL, dir.path())
                .branch("master")
                .commit(pinned.to_string()),
        );

        assert_eq!(outcome.status, Status::Success);
        assert_eq!(outcome.resulting_commit, Some(pinned.to_string()));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("myrepo/a.txt")).unwrap(),
            "two"
        );
    }

    #[test]
    fn commit_outside_branch_fails_checkout() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        upstream.branch("release");
        let elsewhere = upstream.commit("a.txt", "two");
        let dir = tempfile::tempdir().unwrap();

        let outcome = engine(&upstream).reconcile(
            &RepositorySpec::new(URL, dir.path())
                .branch("release")
                .commit(elsewhere.to_string()),
        );

        assert_eq!(outcome.status, Status::Failed);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::CheckoutFailed));
        assert_eq!(
            crate::git::probe::classify(&outcome.final_path),
            DirectoryState::ValidRepository
        );
    }

    #[test]
    fn non_repository_without_force_reset_is_left_alone() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("myrepo");
        std::fs::create_dir_all(target.join("data")).unwrap();
        std::fs::write(target.join("data/state.bin"), [0u8, 1, 2, 3]).unwrap();

        let outcome = engine(&upstream).reconcile(&RepositorySpec::new(URL, dir.path()));

        assert_eq!(outcome.status, Status::Failed);
        assert_eq!(
            outcome.error_kind(),
            Some(ErrorKind::InvalidRepositoryNoForceReset)
        );
        assert_eq!(sorted_entries(&target), vec!["data"]);
        assert_eq!(
            std::fs::read(target.join("data/state.bin")).unwrap(),
            vec![0u8, 1, 2, 3]
        );
        assert_eq!(sorted_entries(dir.path()), vec!["myrepo"]);
    }

    #[test]
    fn bare_repository_without_force_reset_fails() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        Repository::init_bare(dir.path().join("myrepo")).unwrap();

        let outcome = engine(&upstream).reconcile(&RepositorySpec::new(URL, dir.path()));

        assert_eq!(
            outcome.error_kind(),
            Some(ErrorKind::InvalidRepositoryNoForceReset)
        );
    }

    #[test]
    fn bare_repository_with_force_reset_is_replaced() {
        let upstream = Upstream::new();
        let tip = upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        Repository::init_bare(dir.path().join("myrepo")).unwrap();

        let outcome = engine(&upstream)
            .reconcile(&RepositorySpec::new(URL, dir.path()).force_reset(true));

        assert_eq!(outcome.status, Status::RecoveredSuccess);
        assert_eq!(outcome.resulting_commit, Some(tip.to_string()));
        assert_eq!(outcome.backup_path, Some(dir.path().join("myrepo_bak_1")));
    }

    #[test]
    fn bare_repository_with_reinit_policy_is_moved_aside() {
        let upstream = Upstream::new();
        let tip = upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        Repository::init_bare(dir.path().join("myrepo")).unwrap();

        let outcome = reinit_engine(&upstream)
            .reconcile(&RepositorySpec::new(URL, dir.path()).force_reset(true));

        assert_eq!(outcome.status, Status::RecoveredSuccess);
        assert_eq!(outcome.resulting_commit, Some(tip.to_string()));
        assert_eq!(outcome.backup_path, Some(dir.path().join("myrepo_bak_1")));
        assert_eq!(sorted_entries(&outcome.final_path), vec![".git", "a.txt"]);
        assert_eq!(
            crate::git::probe::classify(&dir.path().join("myrepo_bak_1")),
            DirectoryState::ValidBareRepository
        );
    }

    #[test]
    fn ssh_scenario_backs_up_and_reclones() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let release = upstream.commit("a.txt", "release");
        upstream.branch("release");
        upstream.commit("a.txt", "next");
        let dir = tempfile::tempdir().unwrap();
        let opt = dir.path().join("opt");
        std::fs::create_dir_all(opt.join("tool/unrelated")).unwrap();
        std::fs::write(opt.join("tool/unrelated/file"), "keep").unwrap();
        let key = dir.path().join("id_ed25519");
        std::fs::write(&key, "key").unwrap();
        let url = "git@host:org/tool.git";
        let engine = ReconciliationEngine::new(
            LocalRemotes::default().remote(url, &upstream),
            RecoveryPolicy::BackupReclone,
        );

        let outcome = engine.reconcile(
            &RepositorySpec::new(url, &opt)
                .branch("release")
                .force_reset(true)
                .ssh_key_path(&key),
        );

        assert_eq!(outcome.status, Status::RecoveredSuccess);
        assert!(outcome.status.is_success());
        assert_eq!(outcome.final_path, opt.join("tool"));
        assert_eq!(outcome.backup_path, Some(opt.join("tool_bak_1")));
        assert_eq!(outcome.resulting_commit, Some(release.to_string()));
        assert_eq!(
            std::fs::read_to_string(opt.join("tool_bak_1/unrelated/file")).unwrap(),
            "keep"
        );
        assert_eq!(
            std::fs::read_to_string(opt.join("tool/a.txt")).unwrap(),
            "release"
        );
    }

    #[test]
    fn existing_backups_are_not_overwritten() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("myrepo")).unwrap();
        std::fs::create_dir_all(dir.path().join("myrepo_bak_1")).unwrap();

        let outcome = engine(&upstream)
            .reconcile(&RepositorySpec::new(URL, dir.path()).force_reset(true));

        assert_eq!(outcome.backup_path, Some(dir.path().join("myrepo_bak_2")));
    }

    #[test]
    fn diverged_pull_without_force_reset_fails() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&upstream);
        let spec = RepositorySpec::new(URL, dir.path());
        let path = engine.reconcile(&spec).final_path;
        upstream.commit("a.txt", "upstream");
        let local = commit_file(&Repository::open(&path).unwrap(), "b.txt", "local");

        let outcome = engine.reconcile(&spec);

        assert_eq!(outcome.status, Status::Failed);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::PullFailed));
        assert_eq!(
            engine.backend().head_commit(&path).unwrap(),
            Some(local.to_string())
        );
    }

    #[test]
    fn diverged_pull_with_force_reset_backs_up() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&upstream);
        let spec = RepositorySpec::new(URL, dir.path()).force_reset(true);
        let path = engine.reconcile(&spec).final_path;
        let tip = upstream.commit("a.txt", "upstream");
        let local = commit_file(&Repository::open(&path).unwrap(), "b.txt", "local");

        let outcome = engine.reconcile(&spec);

        assert_eq!(outcome.status, Status::RecoveredSuccess);
        assert_eq!(outcome.resulting_commit, Some(tip.to_string()));
        let backup = outcome.backup_path.unwrap();
        assert_eq!(
            engine.backend().head_commit(&backup).unwrap(),
            Some(local.to_string())
        );
    }

    #[test]
    fn diverged_pull_with_reinit_policy_resets_in_place() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        let engine = reinit_engine(&upstream);
        let spec = RepositorySpec::new(URL, dir.path()).force_reset(true);
        let path = engine.reconcile(&spec).final_path;
        let tip = upstream.commit("a.txt", "upstream");
        commit_file(&Repository::open(&path).unwrap(), "b.txt", "local");

        let outcome = engine.reconcile(&spec);

        assert_eq!(outcome.status, Status::RecoveredSuccess);
        assert_eq!(outcome.resulting_commit, Some(tip.to_string()));
        assert_eq!(outcome.backup_path, None);
        assert_eq!(sorted_entries(dir.path()), vec!["myrepo"]);
    }

    #[test]
    fn non_repository_with_reinit_policy_keeps_untracked_files() {
        let upstream = Upstream::new();
        let tip = upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("myrepo");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("a.txt"), "stale").unwrap();
        std::fs::write(target.join("local.cfg"), "mine").unwrap();

        let outcome = reinit_engine(&upstream)
            .reconcile(&RepositorySpec::new(URL, dir.path()).force_reset(true));

        assert_eq!(outcome.status, Status::RecoveredSuccess);
        assert_eq!(outcome.resulting_commit, Some(tip.to_string()));
        assert_eq!(std::fs::read_to_string(target.join("a.txt")).unwrap(), "one");
        assert_eq!(
            std::fs::read_to_string(target.join("local.cfg")).unwrap(),
            "mine"
        );
    }

    #[test]
    fn force_reset_discards_local_modifications() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&upstream);
        let spec = RepositorySpec::new(URL, dir.path()).force_reset(true);
        let path = engine.reconcile(&spec).final_path;
        std::fs::write(path.join("a.txt"), "edited").unwrap();

        let outcome = engine.reconcile(&spec);

        assert_eq!(outcome.status, Status::Success);
        assert_eq!(std::fs::read_to_string(path.join("a.txt")).unwrap(), "one");
    }

    #[test]
    fn unsupported_scheme_fails_without_touching_disk() {
        let upstream = Upstream::new();
        let dir = tempfile::tempdir().unwrap();

        let outcome = engine(&upstream)
            .reconcile(&RepositorySpec::new("ftp://host/org/myrepo.git", dir.path()));

        assert_eq!(outcome.status, Status::Failed);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::UnsupportedScheme));
        assert!(sorted_entries(dir.path()).is_empty());
    }

    #[test]
    fn missing_ssh_key_fails() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        let url = "git@host:org/tool.git";
        let engine = ReconciliationEngine::new(
            LocalRemotes::default().remote(url, &upstream),
            RecoveryPolicy::BackupReclone,
        );

        let outcome = engine.reconcile(
            &RepositorySpec::new(url, dir.path()).ssh_key_path(dir.path().join("missing")),
        );

        assert_eq!(outcome.error_kind(), Some(ErrorKind::InvalidSshKey));
    }

    #[test]
    fn clone_of_unknown_branch_fails() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();

        let outcome =
            engine(&upstream).reconcile(&RepositorySpec::new(URL, dir.path()).branch("nope"));

        assert_eq!(outcome.status, Status::Failed);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::CloneFailed));
    }

    #[test]
    fn submodule_failure_degrades_outcome() {
        let upstream = Upstream::new();
        let tip = upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalRemotes::default()
            .remote(URL, &upstream)
            .failing_submodules();
        let engine = ReconciliationEngine::new(backend, RecoveryPolicy::BackupReclone);

        let outcome =
            engine.reconcile(&RepositorySpec::new(URL, dir.path()).with_submodules(true));

        assert_eq!(outcome.status, Status::Degraded);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::SubmoduleSyncFailed));
        assert_eq!(outcome.resulting_commit, Some(tip.to_string()));
    }

    #[test]
    fn plan_does_not_mutate() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&upstream);
        let spec = RepositorySpec::new(URL, dir.path());

        let (target, state) = engine.plan(&spec).unwrap();
        assert_eq!(target.final_path, dir.path().join("myrepo"));
        assert_eq!(state, DirectoryState::Absent);
        assert!(sorted_entries(dir.path()).is_empty());

        engine.reconcile(&spec);
        let (_, state) = engine.plan(&spec).unwrap();
        assert_eq!(state, DirectoryState::ValidRepository);
    }

    #[test]
    fn nested_submodules_are_checked_out() {
        let leaf = Upstream::new();
        leaf.commit("leaf.txt", "leaf");
        let middle = Upstream::new();
        middle.commit("middle.txt", "middle");
        middle.add_submodule("leaf", &leaf);
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let tip = upstream.add_submodule("middle", &middle);
        let dir = tempfile::tempdir().unwrap();

        let outcome = engine(&upstream)
            .reconcile(&RepositorySpec::new(URL, dir.path()).with_submodules(true));

        assert_eq!(outcome.status, Status::Success);
        assert_eq!(outcome.resulting_commit, Some(tip.to_string()));
        let path = outcome.final_path;
        assert_eq!(
            std::fs::read_to_string(path.join("middle/middle.txt")).unwrap(),
            "middle"
        );
        assert_eq!(
            std::fs::read_to_string(path.join("middle/leaf/leaf.txt")).unwrap(),
            "leaf"
        );
    }

    #[test]
    fn submodules_without_any_succeed() {
        let upstream = Upstream::new();
        upstream.commit("a.txt", "one");
        let dir = tempfile::tempdir().unwrap();

        let outcome = engine(&upstream)
            .reconcile(&RepositorySpec::new(URL, dir.path()).with_submodules(true));

        assert_eq!(outcome.status, Status::Success);
    }
}
