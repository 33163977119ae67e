//! Commit fetcher: one project's commits by the identity, oldest first.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::context::RunContext;
use crate::models::{Identity, MatchPolicy, ProjectId, SyncRecord};
use crate::source::{CommitQuery, SourceClient};
use crate::watermark;

/// Records collected for one project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Matching commits in ascending chronological order.
    pub records: Vec<SyncRecord>,
    /// Every page was fetched.
    pub complete: bool,
    /// Fetching stopped on an error a later run may not hit again.
    pub retryable: bool,
    /// Commits inspected across all pages, matching or not.
    pub scanned: usize,
}

pub struct CommitFetcher<'a, S: SourceClient + ?Sized> {
    source: &'a S,
    policy: MatchPolicy,
    per_page: u32,
}

impl<'a, S: SourceClient + ?Sized> CommitFetcher<'a, S> {
    pub fn new(source: &'a S, policy: MatchPolicy, per_page: u32) -> Self {
        Self {
            source,
            policy,
            per_page,
        }
    }

    /// Collect the identity's commits in `project_id` at or after `since`.
    ///
    /// Without `since` the identity's account creation time is used. A page
    /// error stops the project; whatever was collected before it is still
    /// returned, with `complete` unset.
    #[instrument(skip(self, ctx, identity, since), fields(from = tracing::field::Empty))]
    pub async fn fetch(
        &self,
        ctx: &RunContext,
        identity: &Identity,
        project_id: ProjectId,
        since: Option<DateTime<Utc>>,
    ) -> FetchOutcome {
        let since = since.unwrap_or(identity.created_at);
        tracing::Span::current().record("from", tracing::field::display(since));

        let mut outcome = FetchOutcome {
            complete: true,
            ..Default::default()
        };
        let mut seen = HashSet::new();
        let mut page = 1;
        loop {
            let query = CommitQuery {
                page,
                per_page: self.per_page,
                since,
            };
            let listing = match ctx.run(self.source.list_commits(project_id, query)).await {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(
                        project_id,
                        page,
                        kept = outcome.records.len(),
                        error = %e,
                        "commit page failed, keeping records fetched so far"
                    );
                    outcome.complete = false;
                    outcome.retryable = e.is_transient();
                    break;
                }
            };
            outcome.scanned += listing.items.len();

            for commit in &listing.items {
                if !self
                    .policy
                    .matches(identity, &commit.author_email, &commit.committer_email)
                {
                    continue;
                }
                let Some(committed_at) = commit.committed_date else {
                    debug!(project_id, commit = %commit.short_id, "commit has no date, skipping");
                    continue;
                };
                if !watermark::is_encodable_hash(&commit.id) {
                    warn!(project_id, commit = ?commit.id, "commit id cannot be recorded, skipping");
                    continue;
                }
                if seen.insert(commit.id.clone()) {
                    outcome.records.push(SyncRecord {
                        project_id,
                        hash: commit.id.clone(),
                        committed_at,
                    });
                }
            }
            debug!(project_id, page, count = listing.items.len(), "fetched commit page");

            match listing.info.following(listing.items.len(), self.per_page) {
                Some(next) => page = next,
                None => break,
            }
        }

        // The source lists newest first. Reversing and then sorting stably
        // keeps equal timestamps in their original relative order.
        outcome.records.reverse();
        outcome.records.sort_by_key(|r| r.committed_at);
        debug!(
            project_id,
            matched = outcome.records.len(),
            scanned = outcome.scanned,
            complete = outcome.complete,
            "commit fetch finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::InjectedFailure;
    use crate::source::{InMemorySource, RemoteUser};
    use chrono::TimeZone;

    fn identity() -> Identity {
        Identity::new(
            "Jane",
            "jane",
            ["jane@x.com", "jane@corp.example"],
            Utc.timestamp_opt(1_000, 0).unwrap(),
        )
    }

    fn source() -> InMemorySource {
        InMemorySource::new(RemoteUser {
            name: "Jane".into(),
            username: "jane".into(),
            email: None,
            created_at: None,
        })
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn hashes(outcome: &FetchOutcome) -> Vec<&str> {
        outcome.records.iter().map(|r| r.hash.as_str()).collect()
    }

    #[tokio::test]
    async fn test_fetch_orders_ascending_across_pages() {
        let source = source();
        source.add_project(1, &["jane@x.com"]);
        for (hash, secs) in [("c1", 3_000), ("c2", 2_000), ("c3", 5_000), ("c4", 4_000), ("c5", 6_000)] {
            source.add_commit(1, hash, "jane@x.com", "JANE@X.COM", at(secs));
        }
        let fetcher = CommitFetcher::new(&source, MatchPolicy::AuthorAndCommitter, 2);
        let outcome = fetcher.fetch(&RunContext::new(), &identity(), 1, None).await;

        assert!(outcome.complete);
        assert_eq!(outcome.scanned, 5);
        assert_eq!(hashes(&outcome), vec!["c2", "c1", "c4", "c3", "c5"]);
        assert_eq!(source.commit_calls(1), 3);
    }

    #[tokio::test]
    async fn test_fetch_defaults_since_to_account_creation() {
        let source = source();
        source.add_project(1, &["jane@x.com"]);
        source.add_commit(1, "old", "jane@x.com", "jane@x.com", at(500));
        source.add_commit(1, "new", "jane@x.com", "jane@x.com", at(1_500));

        let fetcher = CommitFetcher::new(&source, MatchPolicy::AuthorAndCommitter, 100);
        let outcome = fetcher.fetch(&RunContext::new(), &identity(), 1, None).await;
        assert_eq!(hashes(&outcome), vec!["new"]);

        let outcome = fetcher
            .fetch(&RunContext::new(), &identity(), 1, Some(at(0)))
            .await;
        assert_eq!(hashes(&outcome), vec!["old", "new"]);
    }

    #[tokio::test]
    async fn test_fetch_applies_match_policy() {
        let source = source();
        source.add_project(1, &["jane@x.com"]);
        source.add_commit(1, "mine", "jane@x.com", "jane@corp.example", at(2_000));
        source.add_commit(1, "ci", "jane@x.com", "ci@bots.example", at(2_100));
        source.add_commit(1, "theirs", "bob@x.com", "bob@x.com", at(2_200));

        let strict = CommitFetcher::new(&source, MatchPolicy::AuthorAndCommitter, 100);
        let outcome = strict.fetch(&RunContext::new(), &identity(), 1, None).await;
        assert_eq!(hashes(&outcome), vec!["mine"]);

        let lenient = CommitFetcher::new(&source, MatchPolicy::AuthorOrCommitter, 100);
        let outcome = lenient.fetch(&RunContext::new(), &identity(), 1, None).await;
        assert_eq!(hashes(&outcome), vec!["mine", "ci"]);
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_source_order() {
        let source = source();
        source.add_project(1, &["jane@x.com"]);
        for hash in ["first", "second", "third"] {
            source.add_commit(1, hash, "jane@x.com", "jane@x.com", at(2_000));
        }
        let fetcher = CommitFetcher::new(&source, MatchPolicy::AuthorAndCommitter, 100);
        let outcome = fetcher.fetch(&RunContext::new(), &identity(), 1, None).await;
        assert_eq!(hashes(&outcome), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_page_failure_returns_partial_records() {
        let source = source();
        source.add_project(1, &["jane@x.com"]);
        for i in 0..5 {
            source.add_commit(1, &format!("c{i}"), "jane@x.com", "jane@x.com", at(2_000 + i));
        }
        source.fail_commits(1, 2, InjectedFailure::Transient);

        let fetcher = CommitFetcher::new(&source, MatchPolicy::AuthorAndCommitter, 2);
        let outcome = fetcher.fetch(&RunContext::new(), &identity(), 1, None).await;
        assert!(!outcome.complete);
        assert!(outcome.retryable);
        // First page holds the two newest commits.
        assert_eq!(hashes(&outcome), vec!["c3", "c4"]);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_is_incomplete() {
        let source = source();
        source.add_project(1, &["jane@x.com"]);
        source.add_commit(1, "c", "jane@x.com", "jane@x.com", at(2_000));
        let ctx = RunContext::new();
        ctx.cancel();

        let fetcher = CommitFetcher::new(&source, MatchPolicy::AuthorAndCommitter, 100);
        let outcome = fetcher.fetch(&ctx, &identity(), 1, None).await;
        assert!(outcome.records.is_empty());
        assert!(!outcome.complete);
        assert!(outcome.retryable);
        assert_eq!(source.commit_calls(1), 0);
    }

    #[tokio::test]
    async fn test_unrecordable_commit_ids_are_skipped() {
        let source = source();
        source.add_project(1, &["jane@x.com"]);
        source.add_commit(1, "good", "jane@x.com", "jane@x.com", at(2_000));
        source.add_commit(1, "two words", "jane@x.com", "jane@x.com", at(3_000));
        source.add_commit(1, "", "jane@x.com", "jane@x.com", at(4_000));
        let fetcher = CommitFetcher::new(&source, MatchPolicy::AuthorAndCommitter, 10);
        let outcome = fetcher.fetch(&RunContext::new(), &identity(), 1, None).await;

        assert!(outcome.complete);
        assert_eq!(outcome.scanned, 3);
        assert_eq!(hashes(&outcome), vec!["good"]);
        for record in &outcome.records {
            let message = watermark::encode(record.project_id, &record.hash);
            assert_eq!(watermark::decode(&message).unwrap().hash, record.hash);
        }
    }
}
