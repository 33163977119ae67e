//! Replay engine: writes fetched records into the target repository.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::errors::SyncError;
use crate::git::RepositoryWriter;
use crate::models::{CommitterIdentity, SyncRecord};
use crate::watermark;

/// Single writer for the target repository.
///
/// The repository lock is held for a whole batch so the commits of one
/// project are never interleaved with another writer's.
pub struct ReplayEngine<R: RepositoryWriter> {
    repo: Arc<Mutex<R>>,
    committer: CommitterIdentity,
}

impl<R: RepositoryWriter> ReplayEngine<R> {
    pub fn new(repo: Arc<Mutex<R>>, committer: CommitterIdentity) -> Self {
        Self { repo, committer }
    }

    /// Commit `records` in order and return how many were written.
    ///
    /// Stops at the first failed write; earlier commits stay in place.
    #[instrument(skip_all, fields(count = records.len()))]
    pub async fn replay(&self, records: &[SyncRecord]) -> Result<usize, SyncError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut repo = self.repo.lock().await;
        for record in records {
            let message = watermark::encode(record.project_id, &record.hash);
            let sha = repo.create_commit(&message, &self.committer, record.committed_at)?;
            debug!(project_id = record.project_id, hash = %record.hash, %sha, "replayed commit");
        }
        Ok(records.len())
    }
}
