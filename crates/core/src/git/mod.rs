//! Target repository access.

pub mod repository;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::models::CommitterIdentity;

pub use repository::GitRepository;

/// The commit HEAD points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadCommit {
    pub sha: String,
    pub message: String,
    pub committed_at: DateTime<Utc>,
}

/// The operations the engine needs from the target repository.
///
/// Implementations must write each commit atomically: a failed
/// `create_commit` leaves HEAD where it was.
pub trait RepositoryWriter: Send {
    /// Open the repository at `path`, initializing it if needed. The flag is
    /// true when the repository was created.
    fn init_or_open(path: &Path) -> Result<(Self, bool), GitError>
    where
        Self: Sized;

    /// The current head commit, or `None` for a repository with no commits.
    fn head(&self) -> Result<Option<HeadCommit>, GitError>;

    /// Append an empty-tree commit on top of HEAD and return its sha.
    fn create_commit(
        &mut self,
        message: &str,
        committer: &CommitterIdentity,
        when: DateTime<Utc>,
    ) -> Result<String, GitError>;
}
