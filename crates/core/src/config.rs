//! Configuration for contribsync.
//!
//! Settings come from a TOML file whose secrets are referenced by
//! environment variable name, or, when no file exists, entirely from the
//! `GITLAB_*` and `COMMITTER_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::models::{CommitterIdentity, MatchPolicy};

pub const ENV_BASE_URL: &str = "GITLAB_BASE_URL";
pub const ENV_TOKEN: &str = "GITLAB_TOKEN";
pub const ENV_COMMITTER_NAME: &str = "COMMITTER_NAME";
pub const ENV_COMMITTER_EMAIL: &str = "COMMITTER_EMAIL";

/// GitLab caps `per_page` at 100.
const MAX_PER_PAGE: u32 = 100;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Source GitLab instance and credentials.
    pub gitlab: GitLabConfig,

    /// Name and email written on replayed commits.
    pub committer: CommitterConfig,

    /// Engine tuning.
    #[serde(default)]
    pub sync: SyncSection,
}

// ---------------------------------------------------------------------------
// GitLab section
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabConfig {
    /// Instance root, e.g. `https://gitlab.com`.
    pub base_url: String,

    /// Environment variable holding the personal access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Client-side request pacing; 0 disables it.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_token_env() -> String {
    ENV_TOKEN.into()
}

fn default_requests_per_second() -> u32 {
    10
}

impl GitLabConfig {
    /// Host of `base_url` without the port.
    pub fn host(&self) -> Option<String> {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }
}

// ---------------------------------------------------------------------------
// Committer section
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitterConfig {
    pub name: String,
    pub email: String,
}

impl From<&CommitterConfig> for CommitterIdentity {
    fn from(config: &CommitterConfig) -> Self {
        Self {
            name: config.name.clone(),
            email: config.email.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync section
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Target repository. Defaults to `./repo.<host>.<username>`.
    pub repo_dir: Option<PathBuf>,

    /// Concurrent commit fetches.
    pub workers: usize,

    /// Whole-run deadline in seconds; 0 disables it.
    pub run_timeout_secs: u64,

    /// Deadline for resolving the identity.
    pub identity_timeout_secs: u64,

    pub match_policy: MatchPolicy,

    pub projects_per_page: u32,
    pub contributors_per_page: u32,
    pub commits_per_page: u32,

    /// Minimum tracing level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            repo_dir: None,
            workers: 5,
            run_timeout_secs: 600,
            identity_timeout_secs: 2,
            match_policy: MatchPolicy::default(),
            projects_per_page: 100,
            contributors_per_page: 50,
            commits_per_page: 100,
            log_level: "info".into(),
        }
    }
}

impl SyncSection {
    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_secs(self.identity_timeout_secs)
    }
}

/// Target repository location, possibly depending on the resolved identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoLocation {
    Fixed(PathBuf),
    /// `<parent>/repo.<host>.<username>`.
    PerIdentity { parent: PathBuf, host: String },
}

impl RepoLocation {
    pub fn resolve(&self, username: &str) -> PathBuf {
        match self {
            Self::Fixed(path) => path.clone(),
            Self::PerIdentity { parent, host } => parent.join(format!("repo.{host}.{username}")),
        }
    }

    /// The path when it does not depend on the identity.
    pub fn fixed(&self) -> Option<&Path> {
        match self {
            Self::Fixed(path) => Some(path),
            Self::PerIdentity { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl SyncConfig {
    /// Load a [`SyncConfig`] from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: SyncConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        self.gitlab.token = resolve_optional_env(&self.gitlab.token_env, "gitlab.token_env");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match reqwest::Url::parse(&self.gitlab.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {}
            Ok(_) => {
                return Err(ConfigError::InvalidValue {
                    field: "gitlab.base_url".into(),
                    detail: "must be an http(s) URL with a host".into(),
                })
            }
            Err(e) => {
                return Err(ConfigError::InvalidValue {
                    field: "gitlab.base_url".into(),
                    detail: e.to_string(),
                })
            }
        }
        if self.gitlab.token.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::EnvVarMissing {
                var: self.gitlab.token_env.clone(),
                field: "gitlab.token_env".into(),
            });
        }
        if self.committer.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "committer.name".into(),
                detail: "committer name must not be empty".into(),
            });
        }
        if !self.committer.email.contains('@') {
            return Err(ConfigError::InvalidValue {
                field: "committer.email".into(),
                detail: format!("'{}' is not an email address", self.committer.email),
            });
        }
        if self.sync.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.workers".into(),
                detail: "at least one worker is required".into(),
            });
        }
        if self.sync.identity_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.identity_timeout_secs".into(),
                detail: "identity timeout must be > 0".into(),
            });
        }
        for (field, value) in [
            ("sync.projects_per_page", self.sync.projects_per_page),
            ("sync.contributors_per_page", self.sync.contributors_per_page),
            ("sync.commits_per_page", self.sync.commits_per_page),
        ] {
            if value == 0 || value > MAX_PER_PAGE {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: format!("must be between 1 and {MAX_PER_PAGE}, got {value}"),
                });
            }
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from the process environment alone.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Build a configuration from `lookup`, which maps variable names to
    /// values. All missing variables are reported together.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = [ENV_BASE_URL, ENV_TOKEN, ENV_COMMITTER_NAME, ENV_COMMITTER_EMAIL];
        let mut values = Vec::with_capacity(required.len());
        let mut missing = Vec::new();
        for name in required {
            match lookup(name).filter(|v| !v.is_empty()) {
                Some(value) => values.push(value),
                None => missing.push(name),
            }
        }
        if !missing.is_empty() {
            return Err(ConfigError::EnvVarMissing {
                var: missing.join(", "),
                field: "environment".into(),
            });
        }

        let [base_url, token, name, email]: [String; 4] =
            values.try_into().map_err(|_| ConfigError::ParseError("environment".into()))?;
        let config = Self {
            gitlab: GitLabConfig {
                base_url,
                token_env: ENV_TOKEN.into(),
                requests_per_second: default_requests_per_second(),
                token: Some(token),
            },
            committer: CommitterConfig { name, email },
            sync: SyncSection::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when it exists, otherwise fall back to the environment.
    pub fn load_or_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_and_resolve(path)
        } else {
            info!(path = %path.display(), "no configuration file, reading settings from the environment");
            Self::from_env()
        }
    }

    /// Where the target repository lives.
    pub fn repo_location(&self) -> RepoLocation {
        match &self.sync.repo_dir {
            Some(dir) => RepoLocation::Fixed(dir.clone()),
            None => RepoLocation::PerIdentity {
                parent: PathBuf::from("."),
                host: self.gitlab.host().unwrap_or_else(|| "gitlab".into()),
            },
        }
    }

    /// Where the target repository lives for `username`.
    pub fn repo_path(&self, username: &str) -> PathBuf {
        self.repo_location().resolve(username)
    }

    /// Generate a default TOML config template string.
    pub fn default_template() -> &'static str {
        r#"# contribsync configuration

[gitlab]
base_url = "https://gitlab.com"
token_env = "GITLAB_TOKEN"
requests_per_second = 10

[committer]
name = "John Doe"
email = "john.doe@example.com"

[sync]
# repo_dir = "./repo.gitlab.com.jdoe"  # defaults to ./repo.<host>.<username>
workers = 5
run_timeout_secs = 600
identity_timeout_secs = 2
match_policy = "author_and_committer"  # or "author_or_committer"
projects_per_page = 100
contributors_per_page = 50
commits_per_page = 100
log_level = "info"
"#
    }
}

/// Try to read an environment variable by name.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
