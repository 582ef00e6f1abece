use std::path::{Component, Path, PathBuf};

use home::home_dir;
use log::trace;
use thiserror::Error;

use crate::model::{ParseError, RemoteUrl, ResolvedTarget};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Url(#[from] ParseError),
    #[error("Could not make {path} absolute: {error}")]
    Absolute {
        path: String,
        error: std::io::Error,
    },
}

/// Derives the final on-disk location of a repository.
///
/// * a target whose last component is the repository name is the location itself
/// * an existing directory is a parent, the repository goes inside it
/// * anything else names the repository's future location
///
/// Only `~` expansion and a single existence check touch the environment.
pub fn resolve(target_path: &Path, url: &str) -> Result<ResolvedTarget, ResolveError> {
    let remote = RemoteUrl::parse(url)?;
    let repository_name = remote.repository_name().to_string();
    let target = expand_home(target_path);

    let final_path = if target
        .file_name()
        .is_some_and(|name| name == repository_name.as_str())
    {
        target
    } else if target.is_dir() {
        target.join(&repository_name)
    } else {
        target
    };
    let final_path = absolute(&final_path)?;

    trace!(
        "Resolved {} for {} to {}",
        target_path.display(),
        url,
        final_path.display()
    );

    Ok(ResolvedTarget {
        final_path,
        repository_name,
    })
}

/// Replaces a leading `~` with the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ResolveError> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|error| ResolveError::Absolute {
                path: path.to_string_lossy().to_string(),
                error,
            })?
            .join(path)
    };
    Ok(joined
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect())
}
