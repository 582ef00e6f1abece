use std::{
    fs::File,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use fs4::fs_std::FileExt;
use home::home_dir;
use log::{debug, info};
use thiserror::Error;

const LOCK_WAIT: Duration = Duration::from_secs(300);

/// Exclusive advisory lock held for as long as the value lives.
pub struct FileLock {
    _file: File,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("Another reposync still holds {path} after {}s", .waited.as_secs())]
    Contended { path: String, waited: Duration },
}

/// `~/.reposync/reposync.lock`, or a file in the temp dir when there is no home.
pub fn default_lock_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".reposync").join("reposync.lock"),
        None => std::env::temp_dir().join("reposync.lock"),
    }
}

impl FileLock {
    pub fn new(path: &Path) -> Result<Self, Error> {
        Self::with_wait(path, LOCK_WAIT)
    }

    fn with_wait(path: &Path, wait: Duration) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let start = Instant::now();
        let mut announced = false;
        loop {
            match file.try_lock_exclusive() {
                Ok(true) => {
                    debug!("Acquired lock {}", path.display());
                    return Ok(Self { _file: file });
                }
                Ok(false) => {}
                Err(error)
                    if error.raw_os_error() == fs4::lock_contended_error().raw_os_error() => {}
                Err(error) => return Err(error.into()),
            }

            if start.elapsed() >= wait {
                return Err(Error::Contended {
                    path: path.to_string_lossy().to_string(),
                    waited: wait,
                });
            }
            if !announced {
                info!("Waiting for another reposync to release {}", path.display());
                announced = true;
            }
            debug!("Failed to acquire a lock on {}, retrying", path.display());
            std::thread::sleep(Duration::from_millis(200));
        }
    }
}
