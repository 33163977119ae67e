//! Source system access.
//!
//! The engine only talks to the [`SourceClient`] trait. [`GitLabClient`]
//! implements it over the GitLab REST API; [`InMemorySource`] implements it
//! over fixed data for tests.

pub mod gitlab;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SourceError;
use crate::models::ProjectId;

pub use gitlab::GitLabClient;
pub use memory::InMemorySource;

/// The authenticated account as reported by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub name: String,
    pub username: String,
    /// Primary address; used only when no verified address is listed.
    pub email: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteContributor {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommit {
    pub id: String,
    pub short_id: String,
    pub author_email: String,
    pub committer_email: String,
    pub committed_date: Option<DateTime<Utc>>,
}

/// Pagination metadata returned with every listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub current_page: u32,
    /// Absent when the source declines to count (very large result sets).
    pub total_pages: Option<u32>,
    pub next_page: Option<u32>,
}

impl PageInfo {
    /// The page to request after one that returned `returned` items, if any.
    ///
    /// With a known page count, a short page or reaching the last page ends
    /// the listing. Without one, the next-page token is followed until a
    /// page comes back empty.
    pub fn following(&self, returned: usize, per_page: u32) -> Option<u32> {
        if returned == 0 {
            return None;
        }
        let next = match self.total_pages {
            Some(total) if total > 0 => {
                if returned < per_page as usize || self.current_page >= total {
                    return None;
                }
                self.next_page.unwrap_or(self.current_page + 1)
            }
            _ => self.next_page?,
        };
        (next > self.current_page).then_some(next)
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub info: PageInfo,
}

/// Parameters for listing the identity's projects, ascending by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectQuery {
    pub page: u32,
    pub per_page: u32,
    /// Only projects with an id strictly greater than this.
    pub id_after: ProjectId,
}

/// Parameters for listing a project's commits across all refs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitQuery {
    pub page: u32,
    pub per_page: u32,
    /// Only commits at or after this instant.
    pub since: DateTime<Utc>,
}

/// Capabilities the engine needs from the source system.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// The account the credentials belong to.
    async fn current_user(&self) -> Result<RemoteUser, SourceError>;

    /// Every verified email address of the current account.
    async fn verified_emails(&self) -> Result<Vec<String>, SourceError>;

    /// Projects the account is a member of, ordered by ascending id.
    async fn list_projects(&self, query: ProjectQuery) -> Result<Page<ProjectId>, SourceError>;

    async fn list_contributors(
        &self,
        project_id: ProjectId,
        page: u32,
        per_page: u32,
    ) -> Result<Page<RemoteContributor>, SourceError>;

    /// Commits of a project, newest first.
    async fn list_commits(
        &self,
        project_id: ProjectId,
        query: CommitQuery,
    ) -> Result<Page<RemoteCommit>, SourceError>;
}
