use std::{path::Path, time::Duration};

use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    BranchType, Oid, Repository, ResetType, SubmoduleUpdateOptions,
};
use log::{debug, info, trace, warn};
use thiserror::Error;

use super::{
    probe,
    transport::{apply_server_timeouts, Deadline, Transport},
};
use crate::model::DirectoryState;

const ORIGIN: &str = "origin";

#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
    #[error("Network operation did not finish within {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("Branch {branch} cannot be fast-forwarded to origin/{branch}")]
    NotFastForward { branch: String },
    #[error("Branch {branch} was not found.")]
    BranchNotFound { branch: String },
    #[error("Commit {commit} was not found.")]
    CommitNotFound { commit: String },
    #[error("Revision {revision} does not belong to the branch {branch}.")]
    RevisionNotOnBranch { revision: String, branch: String },
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// The version-control operations reconciliation is built from.
///
/// Every operation works on a path and opens the repository itself, so no
/// handle outlives a single step.
pub trait GitBackend {
    fn classify(&self, path: &Path) -> DirectoryState {
        probe::classify(path)
    }

    /// Clones `url` into `path` with `branch` checked out.
    fn clone_repo(
        &self,
        url: &str,
        path: &Path,
        branch: &str,
        transport: &Transport,
    ) -> Result<(), GitError>;

    /// Fetches `origin` and fast-forwards the checked out branch.
    fn pull(&self, path: &Path, transport: &Transport) -> Result<(), GitError>;

    /// Puts fresh repository metadata tracking `url` under the files at `path`
    /// and force-checks out `branch`.
    fn reinit(
        &self,
        path: &Path,
        url: &str,
        branch: &str,
        transport: &Transport,
    ) -> Result<(), GitError>;

    fn checkout_branch(&self, path: &Path, branch: &str, force: bool) -> Result<(), GitError>;

    /// Force-checks out `branch` and resets it to `origin/<branch>`.
    fn hard_reset(&self, path: &Path, branch: &str) -> Result<(), GitError>;

    /// Detaches HEAD at `commit`, which has to be reachable from `origin/<branch>`.
    fn checkout_commit(
        &self,
        path: &Path,
        branch: &str,
        commit: &str,
        force: bool,
        transport: &Transport,
    ) -> Result<(), GitError>;

    fn head_commit(&self, path: &Path) -> Result<Option<String>, GitError>;

    /// Initializes and updates all submodules, recursively.
    fn update_submodules(&self, path: &Path, transport: &Transport) -> Result<(), GitError>;
}

/// [`GitBackend`] on top of libgit2.
#[derive(Debug, Clone, Default)]
pub struct Git2Backend {
    timeout: Option<Duration>,
}

impl Git2Backend {
    pub fn new(timeout: Option<Duration>) -> Git2Backend {
        Git2Backend { timeout }
    }

    /// Runs a network operation, turning an abort after the deadline into [`GitError::TimedOut`].
    fn with_deadline<T>(
        &self,
        operation: impl FnOnce(Option<Deadline>) -> Result<T, git2::Error>,
    ) -> Result<T, GitError> {
        if let Some(timeout) = self.timeout.filter(|timeout| !timeout.is_zero()) {
            apply_server_timeouts(timeout)?;
        }
        let deadline = self.timeout.map(Deadline::after);
        operation(deadline).map_err(|error| match deadline {
            Some(deadline) if deadline.expired() => GitError::TimedOut(deadline.timeout),
            _ => error.into(),
        })
    }

    fn fetch_origin(&self, repo: &Repository, transport: &Transport) -> Result<(), GitError> {
        let mut remote = repo.find_remote(ORIGIN)?;
        let refspecs: Vec<String> = remote
            .refspecs()
            .filter_map(|refspec| refspec.str().map(|s| s.to_string()))
            .collect();
        trace!("Fetching {} with {:?}", ORIGIN, refspecs);
        self.with_deadline(|deadline| {
            remote.fetch(&refspecs, Some(&mut transport.fetch_options(deadline)?), None)
        })
    }

    fn fetch_commit(
        &self,
        repo: &Repository,
        commit: &str,
        transport: &Transport,
    ) -> Result<(), GitError> {
        let mut remote = repo.find_remote(ORIGIN)?;
        let single = self.with_deadline(|deadline| {
            remote.fetch(&[commit], Some(&mut transport.fetch_options(deadline)?), None)
        });
        if let Err(error) = single {
            warn!(
                "Failed to fetch a single commit {}, falling back to a full fetch: {}",
                commit, error
            );
            self.fetch_origin(repo, transport)?;
        }
        Ok(())
    }

    fn update_submodules_of(
        &self,
        repo: &Repository,
        transport: &Transport,
    ) -> Result<(), GitError> {
        for mut submodule in repo.submodules()? {
            let name = submodule.name().unwrap_or("<unnamed>").to_string();
            info!("Updating submodule {}", name);
            self.with_deadline(|deadline| {
                let mut options = SubmoduleUpdateOptions::new();
                options.fetch(transport.fetch_options(deadline)?);
                submodule.update(true, Some(&mut options))
            })?;
            let nested = submodule.open()?;
            self.update_submodules_of(&nested, transport)?;
        }
        Ok(())
    }
}

impl GitBackend for Git2Backend {
    fn clone_repo(
        &self,
        url: &str,
        path: &Path,
        branch: &str,
        transport: &Transport,
    ) -> Result<(), GitError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("Cloning {} ({}) into {}", url, branch, path.display());
        self.with_deadline(|deadline| {
            let mut builder = RepoBuilder::new();
            builder
                .branch(branch)
                .fetch_options(transport.fetch_options(deadline)?);
            builder.clone(url, path)
        })?;
        Ok(())
    }

    fn pull(&self, path: &Path, transport: &Transport) -> Result<(), GitError> {
        let repo = Repository::open(path)?;
        self.fetch_origin(&repo, transport)?;
        fast_forward_head(&repo, path)
    }

    fn reinit(
        &self,
        path: &Path,
        url: &str,
        branch: &str,
        transport: &Transport,
    ) -> Result<(), GitError> {
        std::fs::create_dir_all(path)?;
        info!("Reinitialising repository at {}", path.display());
        let repo = Repository::init(path)?;

        match repo.find_remote(ORIGIN) {
            Ok(remote) if remote.url() == Some(url) => {}
            Ok(_) => repo.remote_set_url(ORIGIN, url)?,
            Err(_) => {
                repo.remote(ORIGIN, url)?;
            }
        }
        self.fetch_origin(&repo, transport)?;

        let tip = repo
            .find_reference(&format!("refs/remotes/{ORIGIN}/{branch}"))
            .map_err(|_| GitError::BranchNotFound {
                branch: branch.to_string(),
            })?
            .peel_to_commit()?;
        let local = format!("refs/heads/{branch}");
        repo.reference(&local, tip.id(), true, "reposync: reinit")?;
        repo.find_branch(branch, BranchType::Local)?
            .set_upstream(Some(&format!("{ORIGIN}/{branch}")))?;
        repo.set_head(&local)?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }

    fn checkout_branch(&self, path: &Path, branch: &str, force: bool) -> Result<(), GitError> {
        let repo = Repository::open(path)?;
        if !force && current_branch(&repo).as_deref() == Some(branch) {
            debug!("{} is already on {}", path.display(), branch);
        } else {
            let reference = local_branch(&repo, branch)?;
            let target = repo.revparse_single(&reference)?;
            let mut checkout = CheckoutBuilder::new();
            if force {
                checkout.force();
            } else {
                checkout.safe();
            }
            info!("Checking out branch {} in {}", branch, path.display());
            repo.checkout_tree(&target, Some(&mut checkout))?;
            repo.set_head(&reference)?;
        }

        // An existing local branch may lag behind what the last fetch brought in
        if !force {
            fast_forward_head(&repo, path)?;
        }
        Ok(())
    }

    fn hard_reset(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        self.checkout_branch(path, branch, true)?;

        let repo = Repository::open(path)?;
        let target = repo
            .revparse_single(&format!("refs/remotes/{ORIGIN}/{branch}"))
            .map_err(|_| GitError::BranchNotFound {
                branch: branch.to_string(),
            })?;
        info!("Resetting {} to {}/{}", path.display(), ORIGIN, branch);
        repo.reset(&target, ResetType::Hard, None)?;
        Ok(())
    }

    fn checkout_commit(
        &self,
        path: &Path,
        branch: &str,
        commit: &str,
        force: bool,
        transport: &Transport,
    ) -> Result<(), GitError> {
        let repo = Repository::open(path)?;
        let oid = match find_commit(&repo, commit) {
            Some(oid) => oid,
            None => {
                debug!("Commit {} is not available locally, fetching", commit);
                self.fetch_commit(&repo, commit, transport)?;
                find_commit(&repo, commit).ok_or_else(|| GitError::CommitNotFound {
                    commit: commit.to_string(),
                })?
            }
        };

        if head_oid(&repo) == Some(oid) {
            debug!("{} is already at {}", path.display(), oid);
            return Ok(());
        }

        let branch_tip = find_commit(&repo, &format!("refs/remotes/{ORIGIN}/{branch}"))
            .ok_or_else(|| GitError::BranchNotFound {
                branch: branch.to_string(),
            })?;
        if !is_ancestor(&repo, oid, branch_tip)? {
            return Err(GitError::RevisionNotOnBranch {
                revision: commit.to_string(),
                branch: branch.to_string(),
            });
        }

        let target = repo.find_object(oid, None)?;
        let mut checkout = CheckoutBuilder::new();
        if force {
            checkout.force();
        } else {
            checkout.safe();
        }
        info!("Checking out commit {} in {}", oid, path.display());
        repo.checkout_tree(&target, Some(&mut checkout))?;
        repo.set_head_detached(oid)?;
        Ok(())
    }

    fn head_commit(&self, path: &Path) -> Result<Option<String>, GitError> {
        let repo = Repository::open(path)?;
        Ok(head_oid(&repo).map(|oid| oid.to_string()))
    }

    fn update_submodules(&self, path: &Path, transport: &Transport) -> Result<(), GitError> {
        let repo = Repository::open(path)?;
        self.update_submodules_of(&repo, transport)
    }
}

/// Fast-forwards the checked out branch to `origin/<branch>`; a detached HEAD is left alone.
fn fast_forward_head(repo: &Repository, path: &Path) -> Result<(), GitError> {
    let head = repo.head()?;
    if !head.is_branch() {
        debug!("HEAD of {} is detached, nothing to merge", path.display());
        return Ok(());
    }
    let head_name = head.name().unwrap_or_default().to_string();
    let branch = head.shorthand().unwrap_or_default().to_string();

    let upstream = repo
        .find_reference(&format!("refs/remotes/{ORIGIN}/{branch}"))
        .map_err(|_| GitError::BranchNotFound {
            branch: branch.clone(),
        })?;
    let upstream = repo.reference_to_annotated_commit(&upstream)?;
    let (analysis, _) = repo.merge_analysis(&[&upstream])?;

    if analysis.is_up_to_date() {
        debug!("{} is up to date with {}/{}", path.display(), ORIGIN, branch);
        Ok(())
    } else if analysis.is_fast_forward() {
        info!("Fast-forwarding {} to {}", branch, upstream.id());
        let target = repo.find_object(upstream.id(), None)?;
        // Working tree first: a conflict must leave the branch where it was
        repo.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
        repo.find_reference(&head_name)?
            .set_target(upstream.id(), "reposync: fast-forward")?;
        Ok(())
    } else {
        Err(GitError::NotFastForward { branch })
    }
}

fn current_branch(repo: &Repository) -> Option<String> {
    let head = repo.head().ok()?;
    if head.is_branch() {
        head.shorthand().map(|s| s.to_string())
    } else {
        None
    }
}

fn head_oid(repo: &Repository) -> Option<Oid> {
    repo.head().ok().and_then(|head| head.target())
}

fn find_commit(repo: &Repository, spec: &str) -> Option<Oid> {
    repo.revparse_single(spec)
        .and_then(|object| object.peel_to_commit())
        .map(|commit| commit.id())
        .ok()
}

/// Reference name of the local `branch`, created from `origin/<branch>` when missing.
fn local_branch(repo: &Repository, branch: &str) -> Result<String, GitError> {
    let reference = format!("refs/heads/{branch}");
    if repo.find_reference(&reference).is_ok() {
        return Ok(reference);
    }

    let remote = repo
        .find_branch(&format!("{ORIGIN}/{branch}"), BranchType::Remote)
        .map_err(|_| GitError::BranchNotFound {
            branch: branch.to_string(),
        })?;
    let commit = remote.get().peel_to_commit()?;
    debug!("Creating local branch {} at {}", branch, commit.id());
    let mut local = repo.branch(branch, &commit, false)?;
    local.set_upstream(Some(&format!("{ORIGIN}/{branch}")))?;
    Ok(reference)
}

// Check if `a` is an ancestor of `b`
fn is_ancestor(repo: &Repository, a: Oid, b: Oid) -> Result<bool, GitError> {
    Ok(repo.merge_base(a, b)? == a)
}
