use std::path::PathBuf;

use clap::Parser;

use crate::model::RecoveryPolicy;

/// Keeps local directories in sync with declared git repositories.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Configuration file, looked up next to the executable, in the current directory and in /etc/reposync when omitted
    #[clap(short, long, env = "REPOSYNC_CONFIG")]
    pub config: Option<PathBuf>,
    /// Lock file preventing concurrent runs [default: ~/.reposync/reposync.lock]
    #[clap(long)]
    pub lock_file: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub enum Command {
    ///Brings every configured repository to its declared state
    Sync {
        /// Number of repositories processed in parallel
        #[clap(short, long)]
        jobs: Option<usize>,
        /// Seconds a single network operation may take, 0 for no limit
        #[clap(short, long)]
        timeout: Option<u64>,
        /// What to do with a directory that has to be recovered: backup-reclone or reinit
        #[clap(short, long)]
        recovery: Option<RecoveryPolicy>,
    },
    ///Shows where every configured repository goes and what is there now, without changing anything
    Plan,
    ///Writes a sample reposync.toml into the provided directory
    Init {
        #[clap(default_value = ".")]
        directory: PathBuf,
    },
}
