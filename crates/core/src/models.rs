//! Domain model types used throughout contribsync.
//!
//! These types bridge the source client, the sync engine and the target
//! repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Project identifier as assigned by the source system.
pub type ProjectId = u64;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The authenticated account whose contributions are replayed.
///
/// Email addresses are stored lowercased and deduplicated; matching against
/// them is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub username: String,
    pub emails: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(
        name: impl Into<String>,
        username: impl Into<String>,
        emails: impl IntoIterator<Item = impl AsRef<str>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut normalized: Vec<String> = Vec::new();
        for email in emails {
            let email = normalize_email(email.as_ref());
            if !email.is_empty() && !normalized.contains(&email) {
                normalized.push(email);
            }
        }
        Self {
            name: name.into(),
            username: username.into(),
            emails: normalized,
            created_at,
        }
    }

    /// Whether `email` is one of this identity's addresses, ignoring case.
    pub fn owns_email(&self, email: &str) -> bool {
        let email = normalize_email(email);
        !email.is_empty() && self.emails.iter().any(|e| *e == email)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Commit matching policy
// ---------------------------------------------------------------------------

/// Which of a source commit's emails must belong to the identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Both the author and the committer email must match.
    #[default]
    AuthorAndCommitter,
    /// Either the author or the committer email may match.
    AuthorOrCommitter,
}

impl MatchPolicy {
    pub fn matches(&self, identity: &Identity, author_email: &str, committer_email: &str) -> bool {
        let author = identity.owns_email(author_email);
        let committer = identity.owns_email(committer_email);
        match self {
            Self::AuthorAndCommitter => author && committer,
            Self::AuthorOrCommitter => author || committer,
        }
    }
}

impl std::fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthorAndCommitter => write!(f, "author_and_committer"),
            Self::AuthorOrCommitter => write!(f, "author_or_committer"),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A source commit that belongs to the identity, ready for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub project_id: ProjectId,
    pub hash: String,
    pub committed_at: DateTime<Utc>,
}

/// Last replayed item, decoded from the head commit message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub project_id: ProjectId,
    pub hash: String,
}

/// Where a run resumes: the watermark plus the head commit's timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub watermark: Watermark,
    pub since: DateTime<Utc>,
}

impl ResumePoint {
    /// Drop the records of the watermark project that were already replayed.
    ///
    /// `records` must be in ascending replay order. Everything up to and
    /// including the watermark hash is dropped; when the hash is absent only
    /// records strictly newer than `since` survive.
    pub fn trim(&self, records: Vec<SyncRecord>) -> Vec<SyncRecord> {
        match records
            .iter()
            .position(|r| r.hash == self.watermark.hash)
        {
            Some(pos) => records.into_iter().skip(pos + 1).collect(),
            None => records
                .into_iter()
                .filter(|r| r.committed_at > self.since)
                .collect(),
        }
    }
}

/// Name and email written as author and committer of replayed commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitterIdentity {
    pub name: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// How far a project got during one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// All commit pages were fetched and every record was replayed.
    Complete,
    /// Fetching stopped early; the records fetched so far were replayed.
    Partial,
    /// Not replayed this run because an earlier project failed transiently.
    Deferred,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Partial => write!(f, "partial"),
            Self::Deferred => write!(f, "deferred"),
        }
    }
}

/// Per-project outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectReport {
    pub project_id: ProjectId,
    pub fetched: usize,
    pub replayed: usize,
    pub status: ProjectStatus,
}

/// Statistics for a completed run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Username of the resolved identity.
    pub username: String,
    /// Whether the target repository was created by this run.
    pub repository_created: bool,
    /// Watermark the run resumed from, if any.
    pub resumed_from: Option<Watermark>,
    /// Projects handled, in replay order.
    pub projects: Vec<ProjectReport>,
    /// Total commits written to the target repository.
    pub commits_replayed: usize,
    /// First project the durable cursor was held at, if any.
    pub held_at: Option<ProjectId>,
    /// Whether the run stopped because of cancellation or its deadline.
    pub cancelled: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    /// Number of projects whose commits were fetched and replayed.
    pub fn projects_processed(&self) -> usize {
        self.projects
            .iter()
            .filter(|p| p.status != ProjectStatus::Deferred)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn identity() -> Identity {
        Identity::new(
            "Jane Doe",
            "jdoe",
            ["a@x.com", "B@X.com", "a@x.com"],
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    fn record(hash: &str, secs: i64) -> SyncRecord {
        SyncRecord {
            project_id: 42,
            hash: hash.into(),
            committed_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_identity_normalizes_emails() {
        let id = identity();
        assert_eq!(id.emails, vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn test_owns_email_ignores_case() {
        let id = identity();
        assert!(id.owns_email("A@X.COM"));
        assert!(id.owns_email(" b@x.com "));
        assert!(!id.owns_email("z@x.com"));
        assert!(!id.owns_email(""));
    }

    #[test]
    fn test_match_policy_author_and_committer() {
        let id = identity();
        let policy = MatchPolicy::AuthorAndCommitter;
        assert!(policy.matches(&id, "A@X.COM", "b@x.com"));
        assert!(!policy.matches(&id, "a@x.com", "bot@ci.example"));
        assert!(!policy.matches(&id, "bot@ci.example", "a@x.com"));
    }

    #[test]
    fn test_match_policy_author_or_committer() {
        let id = identity();
        let policy = MatchPolicy::AuthorOrCommitter;
        assert!(policy.matches(&id, "a@x.com", "bot@ci.example"));
        assert!(policy.matches(&id, "bot@ci.example", "A@x.com"));
        assert!(!policy.matches(&id, "bot@ci.example", "other@ci.example"));
    }

    #[test]
    fn test_match_policy_serde_names() {
        let policy: MatchPolicy = serde_json::from_str("\"author_or_committer\"").unwrap();
        assert_eq!(policy, MatchPolicy::AuthorOrCommitter);
        assert_eq!(MatchPolicy::default().to_string(), "author_and_committer");
    }

    #[test]
    fn test_resume_trim_after_watermark_hash() {
        let resume = ResumePoint {
            watermark: Watermark {
                project_id: 42,
                hash: "bbb".into(),
            },
            since: Utc.timestamp_opt(200, 0).unwrap(),
        };
        let kept = resume.trim(vec![record("aaa", 200), record("bbb", 200), record("ccc", 300)]);
        assert_eq!(kept, vec![record("ccc", 300)]);
    }

    #[test]
    fn test_resume_trim_without_hash_keeps_newer_only() {
        let resume = ResumePoint {
            watermark: Watermark {
                project_id: 42,
                hash: "gone".into(),
            },
            since: Utc.timestamp_opt(200, 0).unwrap(),
        };
        let kept = resume.trim(vec![record("aaa", 100), record("bbb", 200), record("ccc", 300)]);
        assert_eq!(kept, vec![record("ccc", 300)]);
    }

    #[test]
    fn test_match_policy_display_matches_config_spelling() {
        for policy in [MatchPolicy::AuthorAndCommitter, MatchPolicy::AuthorOrCommitter] {
            let serialized = serde_json::to_string(&policy).unwrap();
            assert_eq!(format!("\"{policy}\""), serialized);
        }
    }
}
