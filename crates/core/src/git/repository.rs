//! Local target repository via `git2`.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use git2::{ErrorCode, Oid, Repository, Signature};
use tracing::{debug, info, instrument};

use super::{HeadCommit, RepositoryWriter};
use crate::errors::GitError;
use crate::models::CommitterIdentity;

/// Append-only repository of replayed commits.
pub struct GitRepository {
    repo: Repository,
    /// Cached id of the empty tree every replayed commit points at.
    empty_tree: Option<Oid>,
}

impl GitRepository {
    /// Open an existing repository at `repo_path`.
    pub fn open<P: AsRef<Path>>(repo_path: P) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        debug!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self::wrap(repo))
    }

    fn wrap(repo: Repository) -> Self {
        Self {
            repo,
            empty_tree: None,
        }
    }

    fn head_commit(&self) -> Result<Option<git2::Commit<'_>>, GitError> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn empty_tree(&mut self) -> Result<Oid, GitError> {
        if let Some(oid) = self.empty_tree {
            return Ok(oid);
        }
        let oid = self.repo.treebuilder(None)?.write()?;
        self.empty_tree = Some(oid);
        Ok(oid)
    }

    /// Walk history from HEAD, newest first, returning at most `limit` commits.
    pub fn recent_commits(&self, limit: usize) -> Result<Vec<HeadCommit>, GitError> {
        if self.head_commit()?.is_none() {
            return Ok(Vec::new());
        }
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push_head()?;
        revwalk.set_sorting(git2::Sort::TOPOLOGICAL)?;

        let mut commits = Vec::new();
        for oid in revwalk.take(limit) {
            let commit = self.repo.find_commit(oid?)?;
            commits.push(describe(&commit)?);
        }
        Ok(commits)
    }
}

impl RepositoryWriter for GitRepository {
    #[instrument(skip(path), fields(path = %path.display()))]
    fn init_or_open(path: &Path) -> Result<(Self, bool), GitError> {
        match Repository::open(path) {
            Ok(repo) => {
                debug!("opened existing target repository");
                Ok((Self::wrap(repo), false))
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                std::fs::create_dir_all(path)?;
                let repo = Repository::init(path)?;
                info!("initialized target repository");
                Ok((Self::wrap(repo), true))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn head(&self) -> Result<Option<HeadCommit>, GitError> {
        self.head_commit()?.map(|c| describe(&c)).transpose()
    }

    fn create_commit(
        &mut self,
        message: &str,
        committer: &CommitterIdentity,
        when: DateTime<Utc>,
    ) -> Result<String, GitError> {
        let tree_oid = self.empty_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let time = git2::Time::new(when.timestamp(), 0);
        let signature = Signature::new(&committer.name, &committer.email, &time)?;
        let parent = self.head_commit()?;
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        debug!(sha = %oid, message, "created replayed commit");
        Ok(oid.to_string())
    }
}

fn describe(commit: &git2::Commit<'_>) -> Result<HeadCommit, GitError> {
    let seconds = commit.committer().when().seconds();
    let committed_at = Utc
        .timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| GitError::InvalidTimestamp(seconds.to_string()))?;
    Ok(HeadCommit {
        sha: commit.id().to_string(),
        message: commit.message().unwrap_or("").to_string(),
        committed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committer() -> CommitterIdentity {
        CommitterIdentity {
            name: "Replay Bot".into(),
            email: "bot@example.com".into(),
        }
    }

    #[test]
    fn test_init_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("repo");
        let (repo, created) = GitRepository::init_or_open(&path).unwrap();
        assert!(created);
        assert!(repo.head().unwrap().is_none());

        let (_, created) = GitRepository::init_or_open(&path).unwrap();
        assert!(!created);
    }

    #[test]
    fn test_create_commit_preserves_timestamp_and_chains() {
        let dir = tempfile::tempdir().unwrap();
        let (mut repo, _) = GitRepository::init_or_open(dir.path()).unwrap();
        let t1 = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        let t2 = Utc.with_ymd_and_hms(2021, 3, 5, 0, 0, 0).unwrap();

        let first = repo.create_commit("Project: 1 commit: aaa", &committer(), t1).unwrap();
        let second = repo.create_commit("Project: 1 commit: bbb", &committer(), t2).unwrap();

        let head = repo.head().unwrap().unwrap();
        assert_eq!(head.sha, second);
        assert_eq!(head.message, "Project: 1 commit: bbb");
        assert_eq!(head.committed_at, t2);

        let commit = repo.repo.find_commit(Oid::from_str(&second).unwrap()).unwrap();
        assert_eq!(commit.parent_id(0).unwrap().to_string(), first);
        assert_eq!(commit.author().email(), Some("bot@example.com"));
        assert_eq!(commit.tree().unwrap().len(), 0);
    }

    #[test]
    fn test_recent_commits_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let (mut repo, _) = GitRepository::init_or_open(dir.path()).unwrap();
        assert!(repo.recent_commits(10).unwrap().is_empty());
        for (i, hash) in ["a", "b", "c"].iter().enumerate() {
            let when = Utc.timestamp_opt(1_600_000_000 + i as i64, 0).unwrap();
            repo.create_commit(&format!("Project: 9 commit: {hash}"), &committer(), when)
                .unwrap();
        }
        let log = repo.recent_commits(2).unwrap();
        let messages: Vec<&str> = log.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["Project: 9 commit: c", "Project: 9 commit: b"]);
    }

    #[test]
    fn test_open_missing_repository() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        assert!(matches!(
            GitRepository::open(&missing),
            Err(GitError::RepositoryNotFound(_))
        ));
    }
}
