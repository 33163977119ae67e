//! Contribution filter: did the identity ever commit to a project?

use tracing::{debug, instrument, warn};

use crate::context::RunContext;
use crate::models::{Identity, ProjectId};
use crate::source::SourceClient;

/// Outcome of checking one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contribution {
    Contributor,
    NotContributor,
    /// The check failed transiently; the project must be re-evaluated later.
    Unknown(String),
}

pub struct ContributionFilter<'a, S: SourceClient + ?Sized> {
    source: &'a S,
    per_page: u32,
}

impl<'a, S: SourceClient + ?Sized> ContributionFilter<'a, S> {
    pub fn new(source: &'a S, per_page: u32) -> Self {
        Self { source, per_page }
    }

    /// Page through the project's contributors until one of the identity's
    /// emails shows up.
    ///
    /// A permanent error (no access, project gone, unparsable payload) means
    /// there is nothing to sync and yields [`Contribution::NotContributor`].
    #[instrument(skip(self, ctx, identity))]
    pub async fn evaluate(
        &self,
        ctx: &RunContext,
        identity: &Identity,
        project_id: ProjectId,
    ) -> Contribution {
        let mut page = 1;
        loop {
            let result = ctx
                .run(self.source.list_contributors(project_id, page, self.per_page))
                .await;
            let listing = match result {
                Ok(listing) => listing,
                Err(e) if e.is_transient() => {
                    warn!(project_id, page, error = %e, "contributor check failed");
                    return Contribution::Unknown(e.to_string());
                }
                Err(e) => {
                    warn!(project_id, error = %e, "skipping project");
                    return Contribution::NotContributor;
                }
            };

            if listing.items.iter().any(|c| identity.owns_email(&c.email)) {
                debug!(project_id, page, "identity is a contributor");
                return Contribution::Contributor;
            }
            match listing.info.following(listing.items.len(), self.per_page) {
                Some(next) => page = next,
                None => return Contribution::NotContributor,
            }
        }
    }

    /// `true` only when the identity is known to be a contributor.
    pub async fn has_contribution(
        &self,
        ctx: &RunContext,
        identity: &Identity,
        project_id: ProjectId,
    ) -> bool {
        matches!(
            self.evaluate(ctx, identity, project_id).await,
            Contribution::Contributor
        )
    }
}
