//! Error types for the contribsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Watermark(#[from] WatermarkError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

// ---------------------------------------------------------------------------
// Source (GitLab API) errors
// ---------------------------------------------------------------------------

/// Errors from the source system (GitLab REST API) and its paginated calls.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitLab HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitLab API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// Token is missing, invalid or lacks the required scopes.
    #[error("GitLab authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("GitLab rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    /// JSON deserialization failure.
    #[error("GitLab response parse error: {0}")]
    ParseError(String),

    /// The run was cancelled or its deadline passed while the call was in flight.
    #[error("request cancelled: {0}")]
    Cancelled(String),
}

impl SourceError {
    /// Whether a retry on a later run can reasonably succeed.
    ///
    /// Transport failures, 408/5xx responses, rate limiting and cancellation
    /// are transient. Authentication failures, other 4xx responses and
    /// malformed payloads are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::RateLimited { .. } | Self::Cancelled(_) => true,
            Self::ApiError { status, .. } => *status == 408 || *status >= 500,
            Self::AuthenticationFailed(_) | Self::ParseError(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from the target repository (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A timestamp cannot be represented in a git signature.
    #[error("invalid commit timestamp: {0}")]
    InvalidTimestamp(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Watermark errors
// ---------------------------------------------------------------------------

/// Errors decoding a watermark from a replayed commit message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WatermarkError {
    /// Fewer tokens than the template produces, or the labels are wrong.
    #[error("malformed watermark message: {0:?}")]
    Malformed(String),

    /// The project identifier token is not an unsigned integer.
    #[error("invalid project id '{token}' in watermark message")]
    InvalidProjectId { token: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Sync engine errors
// ---------------------------------------------------------------------------

/// Fatal errors from the synchronization engine.
///
/// Each variant names the stage that failed. Per-project fetch failures are
/// not represented here: they are recovered inside the run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Identity resolution failed.
    #[error("identity resolution failed: {0}")]
    Authentication(#[source] SourceError),

    /// The head of the target repository does not carry a readable watermark.
    #[error("target repository head is not a replayed commit, refusing to restart from scratch: {0}")]
    Watermark(#[from] WatermarkError),

    /// Opening the target repository or writing a commit failed.
    #[error("target repository error: {0}")]
    Repository(#[from] GitError),

    /// Another run is already in progress on this engine.
    #[error("sync already in progress")]
    AlreadyRunning,

    /// A fetch worker panicked or was aborted.
    #[error("fetch worker failed: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = GitError::RepositoryNotFound("/tmp/repo".into());
        assert_eq!(err.to_string(), "git repository not found at '/tmp/repo'");

        let err = SourceError::RateLimited {
            reset_at: "1735689600".into(),
        };
        assert!(err.to_string().contains("rate limit"));

        let err = ConfigError::EnvVarMissing {
            var: "GITLAB_TOKEN".into(),
            field: "gitlab.token_env".into(),
        };
        assert!(err.to_string().contains("GITLAB_TOKEN"));

        let err = WatermarkError::InvalidProjectId {
            token: "PROJ".into(),
        };
        assert!(err.to_string().contains("PROJ"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(SourceError::RateLimited {
            reset_at: "unknown".into()
        }
        .is_transient());
        assert!(SourceError::Cancelled("deadline exceeded".into()).is_transient());
        assert!(SourceError::ApiError {
            status: 502,
            body: String::new()
        }
        .is_transient());
        assert!(!SourceError::ApiError {
            status: 404,
            body: String::new()
        }
        .is_transient());
        assert!(!SourceError::AuthenticationFailed("HTTP 403".into()).is_transient());
        assert!(!SourceError::ParseError("eof".into()).is_transient());
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = WatermarkError::Malformed("hello".into()).into();
        assert!(matches!(core_err, CoreError::Watermark(_)));

        let sync_err: SyncError = GitError::RepositoryNotFound("x".into()).into();
        let core_err: CoreError = sync_err.into();
        assert!(matches!(core_err, CoreError::Sync(SyncError::Repository(_))));
    }
}
