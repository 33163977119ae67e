//! Project discovery: the identity's projects, ascending by id, filtered to
//! the ones they contributed to.
//!
//! Listing pages are requested lazily and each project is evaluated only
//! when the consumer asks for the next one, so discovery never runs far
//! ahead of the fetch workers.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::context::RunContext;
use crate::contribution::{Contribution, ContributionFilter};
use crate::models::{Identity, ProjectId};
use crate::source::{ProjectQuery, SourceClient};

pub struct ProjectDiscovery<S: SourceClient + ?Sized> {
    source: Arc<S>,
    identity: Arc<Identity>,
    ctx: RunContext,
    projects_per_page: u32,
    contributors_per_page: u32,
    after_id: ProjectId,
    next_page: Option<u32>,
    pending: VecDeque<ProjectId>,
    /// Highest project id evaluated so far.
    cursor: ProjectId,
    halted_at: Option<ProjectId>,
    evaluated: usize,
}

impl<S: SourceClient + ?Sized> ProjectDiscovery<S> {
    /// Discover projects with an id strictly greater than `after_id`.
    pub fn new(
        source: Arc<S>,
        identity: Arc<Identity>,
        ctx: RunContext,
        after_id: ProjectId,
        projects_per_page: u32,
        contributors_per_page: u32,
    ) -> Self {
        Self {
            source,
            identity,
            ctx,
            projects_per_page,
            contributors_per_page,
            after_id,
            next_page: Some(1),
            pending: VecDeque::new(),
            cursor: after_id,
            halted_at: None,
            evaluated: 0,
        }
    }

    /// The next project the identity contributed to, or `None` once the
    /// listing is exhausted, fails, or a project cannot be evaluated.
    pub async fn next(&mut self) -> Option<ProjectId> {
        loop {
            if self.halted_at.is_some() {
                return None;
            }
            let Some(project_id) = self.pending.pop_front() else {
                if !self.fill().await {
                    info!(evaluated = self.evaluated, "project discovery finished");
                    return None;
                }
                continue;
            };
            if project_id <= self.cursor {
                continue;
            }
            self.cursor = project_id;
            self.evaluated += 1;

            let filter = ContributionFilter::new(&*self.source, self.contributors_per_page);
            match filter.evaluate(&self.ctx, &self.identity, project_id).await {
                Contribution::Contributor => return Some(project_id),
                Contribution::NotContributor => {
                    debug!(project_id, "not a contributor");
                }
                Contribution::Unknown(reason) => {
                    warn!(project_id, %reason, "halting discovery, project will be retried next run");
                    self.halted_at = Some(project_id);
                    return None;
                }
            }
        }
    }

    /// Request the next listing page. Returns `false` when nothing is left.
    #[instrument(skip(self), fields(after_id = self.after_id))]
    async fn fill(&mut self) -> bool {
        let Some(page) = self.next_page else {
            return false;
        };
        let query = ProjectQuery {
            page,
            per_page: self.projects_per_page,
            id_after: self.after_id,
        };
        let listing = match self.ctx.run(self.source.list_projects(query)).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(page, error = %e, "project listing failed, stopping discovery");
                self.next_page = None;
                return false;
            }
        };
        debug!(page, count = listing.items.len(), "listed projects");

        self.next_page = listing
            .info
            .following(listing.items.len(), self.projects_per_page);
        let mut ids: Vec<ProjectId> = listing
            .items
            .into_iter()
            .filter(|id| *id > self.cursor)
            .collect();
        ids.sort_unstable();
        self.pending.extend(ids);
        !self.pending.is_empty() || self.next_page.is_some()
    }

    /// The project that stopped discovery because its check was
    /// inconclusive.
    pub fn halted_at(&self) -> Option<ProjectId> {
        self.halted_at
    }

    /// Number of projects whose contributors were checked.
    pub fn evaluated(&self) -> usize {
        self.evaluated
    }
}
