//! Identity resolution: who the credentials belong to and which email
//! addresses count as theirs.

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::context::RunContext;
use crate::errors::SyncError;
use crate::models::Identity;
use crate::source::SourceClient;

/// Resolves the authenticated account into an [`Identity`].
pub struct IdentityResolver<'a, S: SourceClient + ?Sized> {
    source: &'a S,
}

impl<'a, S: SourceClient + ?Sized> IdentityResolver<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Fetch the current user and their verified emails.
    ///
    /// Any failure, including the deadline of `ctx`, is fatal. When the
    /// account lists no verified address the primary email is used instead.
    #[instrument(skip_all)]
    pub async fn resolve(&self, ctx: &RunContext) -> Result<Identity, SyncError> {
        let user = ctx
            .run(self.source.current_user())
            .await
            .map_err(SyncError::Authentication)?;
        let verified = ctx
            .run(self.source.verified_emails())
            .await
            .map_err(SyncError::Authentication)?;

        let emails = if verified.is_empty() {
            warn!(
                username = %user.username,
                "no verified email addresses, falling back to the primary email"
            );
            user.email.iter().cloned().collect()
        } else {
            verified
        };

        let created_at = user.created_at.unwrap_or_else(|| {
            warn!(username = %user.username, "account creation time unknown, fetching full history");
            DateTime::<Utc>::UNIX_EPOCH
        });

        let identity = Identity::new(user.name, user.username, emails, created_at);
        if identity.emails.is_empty() {
            warn!(username = %identity.username, "identity has no email addresses, nothing will match");
        }
        info!(
            username = %identity.username,
            emails = identity.emails.len(),
            "identity resolved"
        );
        Ok(identity)
    }
}
