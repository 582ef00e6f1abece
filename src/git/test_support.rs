//! Local upstream repositories for tests.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use git2::{build::CheckoutBuilder, Commit, Oid, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

use super::{Git2Backend, GitBackend, GitError, Transport};

pub struct Upstream {
    dir: TempDir,
    url: String,
    pub repo: Repository,
}

impl Upstream {
    pub fn new() -> Upstream {
        let dir = tempfile::tempdir().unwrap();
        let mut options = RepositoryInitOptions::new();
        options.initial_head("master");
        let repo = Repository::init_opts(dir.path(), &options).unwrap();
        let url = dir.path().to_string_lossy().to_string();
        Upstream { dir, url, repo }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Commits `content` as `file` on the checked out branch.
    pub fn commit(&self, file: &str, content: &str) -> Oid {
        commit_file(&self.repo, file, content)
    }

    /// Creates `name` at the current HEAD without switching to it.
    pub fn branch(&self, name: &str) {
        let head = self.repo.head().unwrap().peel_to_commit().unwrap();
        self.repo.branch(name, &head, false).unwrap();
    }

    /// Commits on `branch`, then switches back to the branch that was checked out.
    pub fn commit_on(&self, branch: &str, file: &str, content: &str) -> Oid {
        let previous = self.repo.head().unwrap().name().unwrap().to_string();
        switch(&self.repo, &format!("refs/heads/{branch}"));
        let oid = commit_file(&self.repo, file, content);
        switch(&self.repo, &previous);
        oid
    }

    /// Adds `upstream` as a submodule at `path` and commits it.
    pub fn add_submodule(&self, path: &str, upstream: &Upstream) -> Oid {
        let mut submodule = self
            .repo
            .submodule(upstream.url(), Path::new(path), true)
            .unwrap();
        submodule.clone(None).unwrap();
        submodule.add_finalize().unwrap();
        commit_index(&self.repo, &format!("add submodule {path}"))
    }
}

fn switch(repo: &Repository, reference: &str) {
    repo.set_head(reference).unwrap();
    repo.checkout_head(Some(CheckoutBuilder::new().force()))
        .unwrap();
}

pub fn commit_file(repo: &Repository, file: &str, content: &str) -> Oid {
    let workdir = repo.workdir().unwrap();
    std::fs::write(workdir.join(file), content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(file)).unwrap();
    index.write().unwrap();
    commit_index(repo, &format!("update {file}"))
}

fn commit_index(repo: &Repository, message: &str) -> Oid {
    let mut index = repo.index().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let signature = Signature::now("reposync", "reposync@example.com").unwrap();
    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&Commit> = parent.iter().collect();
    repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parents,
    )
    .unwrap()
}

/// Serves declared remote urls from local upstream repositories.
#[derive(Default)]
pub struct LocalRemotes {
    inner: Git2Backend,
    remotes: HashMap<String, String>,
    fail_submodules: bool,
    panicking: HashSet<String>,
}

impl LocalRemotes {
    pub fn remote(mut self, url: &str, upstream: &Upstream) -> Self {
        self.remotes
            .insert(url.to_string(), upstream.url().to_string());
        self
    }

    pub fn failing_submodules(mut self) -> Self {
        self.fail_submodules = true;
        self
    }

    /// Cloning `url` panics instead of returning.
    pub fn panicking(mut self, url: &str) -> Self {
        self.panicking.insert(url.to_string());
        self
    }

    fn local<'a>(&'a self, url: &'a str) -> &'a str {
        self.remotes.get(url).map(String::as_str).unwrap_or(url)
    }
}

impl GitBackend for LocalRemotes {
    fn clone_repo(
        &self,
        url: &str,
        path: &Path,
        branch: &str,
        transport: &Transport,
    ) -> Result<(), GitError> {
        if self.panicking.contains(url) {
            panic!("backend crashed while cloning {url}");
        }
        self.inner
            .clone_repo(self.local(url), path, branch, transport)
    }

    fn pull(&self, path: &Path, transport: &Transport) -> Result<(), GitError> {
        self.inner.pull(path, transport)
    }

    fn reinit(
        &self,
        path: &Path,
        url: &str,
        branch: &str,
        transport: &Transport,
    ) -> Result<(), GitError> {
        self.inner.reinit(path, self.local(url), branch, transport)
    }

    fn checkout_branch(&self, path: &Path, branch: &str, force: bool) -> Result<(), GitError> {
        self.inner.checkout_branch(path, branch, force)
    }

    fn hard_reset(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        self.inner.hard_reset(path, branch)
    }

    fn checkout_commit(
        &self,
        path: &Path,
        branch: &str,
        commit: &str,
        force: bool,
        transport: &Transport,
    ) -> Result<(), GitError> {
        self.inner
            .checkout_commit(path, branch, commit, force, transport)
    }

    fn head_commit(&self, path: &Path) -> Result<Option<String>, GitError> {
        self.inner.head_commit(path)
    }

    fn update_submodules(&self, path: &Path, transport: &Transport) -> Result<(), GitError> {
        if self.fail_submodules {
            return Err(GitError::Git(git2::Error::from_str("submodule unreachable")));
        }
        self.inner.update_submodules(path, transport)
    }
}
