use std::path::Path;

use git2::Repository;
use log::trace;

use crate::model::DirectoryState;

/// Classifies what currently lives at `path`. Never modifies anything.
///
/// Only `path` itself is opened; a directory nested inside another working
/// copy is not a repository of its own.
pub fn classify(path: &Path) -> DirectoryState {
    // symlink_metadata: a dangling link still occupies the path
    if path.symlink_metadata().is_err() {
        return DirectoryState::Absent;
    }
    match Repository::open(path) {
        Ok(repo) if repo.is_bare() => DirectoryState::ValidBareRepository,
        Ok(_) => DirectoryState::ValidRepository,
        Err(error) => {
            trace!("Could not open {} as a repository: {}", path.display(), error);
            DirectoryState::PresentNotARepository
        }
    }
}
