use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use crate::engine::{ErrorKind, ReconcileError};

/// On-disk location of one repository, derived once per reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedTarget {
    pub final_path: PathBuf,
    pub repository_name: String,
}

impl ResolvedTarget {
    pub fn path(&self) -> &Path {
        &self.final_path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryState {
    Absent,
    ValidRepository,
    /// Metadata without a working tree; not something we can sync.
    ValidBareRepository,
    PresentNotARepository,
}

impl Display for DirectoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DirectoryState::Absent => f.write_str("absent"),
            DirectoryState::ValidRepository => f.write_str("a git working copy"),
            DirectoryState::ValidBareRepository => f.write_str("a bare git repository"),
            DirectoryState::PresentNotARepository => f.write_str("not a git repository"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    RecoveredSuccess,
    /// Main checkout is in place but submodules could not be synchronized.
    Degraded,
    Failed,
}

impl Status {
    /// The target ended up at the requested revision.
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success | Status::RecoveredSuccess)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Status::Success => f.write_str("success"),
            Status::RecoveredSuccess => f.write_str("recovered"),
            Status::Degraded => f.write_str("degraded"),
            Status::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug)]
pub struct ReconciliationOutcome {
    pub final_path: PathBuf,
    pub resulting_commit: Option<String>,
    pub status: Status,
    pub error: Option<ReconcileError>,
    /// Where the previous content was moved, when a backup was made.
    pub backup_path: Option<PathBuf>,
}

impl ReconciliationOutcome {
    pub fn failed(final_path: impl Into<PathBuf>, error: ReconcileError) -> Self {
        ReconciliationOutcome {
            final_path: final_path.into(),
            resulting_commit: None,
            status: Status::Failed,
            error: Some(error),
            backup_path: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(ReconcileError::kind)
    }
}
