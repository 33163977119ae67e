//! In-memory [`SourceClient`] for tests and dry runs.
//!
//! Projects, contributors and commits live in a map behind a mutex. Paging
//! follows GitLab's header semantics, optionally without a page count, and
//! failures can be injected per project.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    CommitQuery, Page, PageInfo, ProjectQuery, RemoteCommit, RemoteContributor, RemoteUser,
    SourceClient,
};
use crate::errors::SourceError;
use crate::models::ProjectId;

/// Kind of failure to inject into a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// HTTP 503, retryable on a later run.
    Transient,
    /// HTTP 403, the project is not readable.
    Forbidden,
}

impl InjectedFailure {
    fn to_error(self) -> SourceError {
        match self {
            Self::Transient => SourceError::ApiError {
                status: 503,
                body: "injected outage".into(),
            },
            Self::Forbidden => SourceError::AuthenticationFailed("HTTP 403 Forbidden".into()),
        }
    }
}

#[derive(Debug, Default)]
struct ProjectData {
    contributors: Vec<RemoteContributor>,
    commits: Vec<RemoteCommit>,
    contributors_failure: Option<InjectedFailure>,
    /// Commit listing fails for pages at or after this one.
    commits_failure: Option<(u32, InjectedFailure)>,
}

#[derive(Debug, Default)]
struct State {
    user: Option<RemoteUser>,
    emails: Vec<String>,
    user_failure: Option<InjectedFailure>,
    projects: BTreeMap<ProjectId, ProjectData>,
    omit_total_pages: bool,
    project_listing_failure: Option<(u32, InjectedFailure)>,
    contributor_calls: HashMap<ProjectId, usize>,
    commit_calls: HashMap<ProjectId, usize>,
}

#[derive(Debug, Default)]
pub struct InMemorySource {
    state: Mutex<State>,
}

impl InMemorySource {
    pub fn new(user: RemoteUser) -> Self {
        let source = Self::default();
        source.lock().user = Some(user);
        source
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_verified_emails(&self, emails: &[&str]) {
        self.lock().emails = emails.iter().map(|e| e.to_string()).collect();
    }

    pub fn fail_current_user(&self, failure: InjectedFailure) {
        self.lock().user_failure = Some(failure);
    }

    /// Stop reporting total page counts, like GitLab does for huge listings.
    pub fn omit_total_pages(&self) {
        self.lock().omit_total_pages = true;
    }

    /// Register a project with the given contributor emails.
    pub fn add_project(&self, project_id: ProjectId, contributor_emails: &[&str]) {
        let contributors = contributor_emails
            .iter()
            .map(|email| RemoteContributor {
                name: email.split('@').next().unwrap_or_default().to_string(),
                email: email.to_string(),
            })
            .collect();
        self.lock().projects.insert(
            project_id,
            ProjectData {
                contributors,
                ..Default::default()
            },
        );
    }

    /// Add a commit to a registered project.
    pub fn add_commit(
        &self,
        project_id: ProjectId,
        hash: &str,
        author_email: &str,
        committer_email: &str,
        committed_at: DateTime<Utc>,
    ) {
        let mut state = self.lock();
        let project = state.projects.entry(project_id).or_default();
        project.commits.push(RemoteCommit {
            id: hash.to_string(),
            short_id: hash.chars().take(8).collect(),
            author_email: author_email.to_string(),
            committer_email: committer_email.to_string(),
            committed_date: Some(committed_at),
        });
    }

    pub fn fail_contributors(&self, project_id: ProjectId, failure: InjectedFailure) {
        self.lock().projects.entry(project_id).or_default().contributors_failure = Some(failure);
    }

    pub fn clear_contributor_failure(&self, project_id: ProjectId) {
        if let Some(project) = self.lock().projects.get_mut(&project_id) {
            project.contributors_failure = None;
        }
    }

    /// Make commit listing fail for `from_page` and every later page.
    pub fn fail_commits(&self, project_id: ProjectId, from_page: u32, failure: InjectedFailure) {
        self.lock().projects.entry(project_id).or_default().commits_failure =
            Some((from_page, failure));
    }

    pub fn clear_commit_failure(&self, project_id: ProjectId) {
        if let Some(project) = self.lock().projects.get_mut(&project_id) {
            project.commits_failure = None;
        }
    }

    /// Make project listing fail for `from_page` and every later page.
    pub fn fail_project_listing(&self, from_page: u32, failure: InjectedFailure) {
        self.lock().project_listing_failure = Some((from_page, failure));
    }

    /// Contributor pages requested for a project so far.
    pub fn contributor_calls(&self, project_id: ProjectId) -> usize {
        self.lock().contributor_calls.get(&project_id).copied().unwrap_or(0)
    }

    /// Commit pages requested for a project so far.
    pub fn commit_calls(&self, project_id: ProjectId) -> usize {
        self.lock().commit_calls.get(&project_id).copied().unwrap_or(0)
    }
}

/// Slice `items` into the 1-based `page` and describe it like GitLab would.
fn paginate<T: Clone>(items: &[T], page: u32, per_page: u32, omit_total: bool) -> Page<T> {
    let per_page = per_page.max(1) as usize;
    let page = page.max(1);
    let start = (page as usize - 1).saturating_mul(per_page);
    let slice: Vec<T> = items.iter().skip(start).take(per_page).cloned().collect();
    let total_pages = items.len().div_ceil(per_page) as u32;
    let has_more = start + slice.len() < items.len();
    Page {
        items: slice,
        info: PageInfo {
            current_page: page,
            total_pages: if omit_total { None } else { Some(total_pages) },
            next_page: has_more.then_some(page + 1),
        },
    }
}

#[async_trait]
impl SourceClient for InMemorySource {
    async fn current_user(&self) -> Result<RemoteUser, SourceError> {
        let state = self.lock();
        if let Some(failure) = state.user_failure {
            return Err(failure.to_error());
        }
        state
            .user
            .clone()
            .ok_or_else(|| SourceError::AuthenticationFailed("no user configured".into()))
    }

    async fn verified_emails(&self) -> Result<Vec<String>, SourceError> {
        let state = self.lock();
        if let Some(failure) = state.user_failure {
            return Err(failure.to_error());
        }
        Ok(state.emails.clone())
    }

    async fn list_projects(&self, query: ProjectQuery) -> Result<Page<ProjectId>, SourceError> {
        let state = self.lock();
        if let Some((from_page, failure)) = state.project_listing_failure {
            if query.page >= from_page {
                return Err(failure.to_error());
            }
        }
        let ids: Vec<ProjectId> = state
            .projects
            .keys()
            .copied()
            .filter(|id| *id > query.id_after)
            .collect();
        Ok(paginate(&ids, query.page, query.per_page, state.omit_total_pages))
    }

    async fn list_contributors(
        &self,
        project_id: ProjectId,
        page: u32,
        per_page: u32,
    ) -> Result<Page<RemoteContributor>, SourceError> {
        let mut state = self.lock();
        *state.contributor_calls.entry(project_id).or_default() += 1;
        let omit_total = state.omit_total_pages;
        let project = state.projects.get(&project_id).ok_or_else(|| SourceError::ApiError {
            status: 404,
            body: "404 Project Not Found".into(),
        })?;
        if let Some(failure) = project.contributors_failure {
            return Err(failure.to_error());
        }
        Ok(paginate(&project.contributors, page, per_page, omit_total))
    }

    async fn list_commits(
        &self,
        project_id: ProjectId,
        query: CommitQuery,
    ) -> Result<Page<RemoteCommit>, SourceError> {
        let mut state = self.lock();
        *state.commit_calls.entry(project_id).or_default() += 1;
        let omit_total = state.omit_total_pages;
        let project = state.projects.get(&project_id).ok_or_else(|| SourceError::ApiError {
            status: 404,
            body: "404 Project Not Found".into(),
        })?;
        if let Some((from_page, failure)) = project.commits_failure {
            if query.page >= from_page {
                return Err(failure.to_error());
            }
        }

        let mut commits: Vec<RemoteCommit> = project
            .commits
            .iter()
            .filter(|c| c.committed_date.is_some_and(|at| at >= query.since))
            .cloned()
            .collect();
        // Newest first; insertion order breaks ties, later insertions first.
        commits.reverse();
        commits.sort_by(|a, b| b.committed_date.cmp(&a.committed_date));
        Ok(paginate(&commits, query.page, query.per_page, omit_total))
    }
}
