use thiserror::Error;

pub mod outcome;
pub mod spec;

pub use outcome::{DirectoryState, ReconciliationOutcome, ResolvedTarget, Status};
pub use spec::{RecoveryPolicy, RemoteUrl, RepositorySpec, Scheme, DEFAULT_BRANCH};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unsupported repository URL scheme for {0}")]
    UnsupportedScheme(String),
    #[error("Missing url component `{0}` in string `{1}`")]
    MissingUrlComponent(String, String),
    #[error("Invalid recovery policy `{0}`, expected `backup-reclone` or `reinit`")]
    InvalidRecoveryPolicy(String),
}
