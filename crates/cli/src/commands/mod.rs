//! Subcommand implementations.

pub mod log;
pub mod status;
pub mod sync;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use contribsync_core::{GitLabClient, RunContext, SourceClient, SyncConfig};

/// Load the configuration file, or the environment when the file is absent.
pub fn load_config(path: &Path) -> Result<SyncConfig> {
    SyncConfig::load_or_env(path).context("failed to load configuration")
}

/// Read the configuration without validating it.
///
/// Read-only commands only need a few fields and must work without a token
/// when the repository path is fixed. `sync` validates after applying its
/// command-line overrides.
pub fn read_config(path: &Path) -> Result<SyncConfig> {
    if !path.exists() {
        return load_config(path);
    }
    let mut config =
        SyncConfig::load_from_file(path).context("failed to load configuration file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    Ok(config)
}

/// Build a GitLab client from a resolved configuration.
pub fn gitlab_client(config: &SyncConfig) -> Result<GitLabClient> {
    let token = config.gitlab.token.as_deref().with_context(|| {
        format!(
            "GitLab token is not set (export {})",
            config.gitlab.token_env
        )
    })?;
    GitLabClient::new(
        &config.gitlab.base_url,
        token,
        config.gitlab.requests_per_second,
    )
    .context("failed to create GitLab client")
}

/// Locate the target repository for read-only commands.
///
/// An explicit `--repo-dir` wins, then `sync.repo_dir`. Otherwise the path
/// depends on the GitLab username, which costs one API call.
pub async fn resolve_repo_path(config_path: &Path, repo_dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = repo_dir {
        return Ok(dir);
    }

    let config = read_config(config_path)?;
    let location = config.repo_location();
    if let Some(path) = location.fixed() {
        return Ok(path.to_path_buf());
    }

    let client = gitlab_client(&config)?;
    let ctx = RunContext::new().with_timeout(config.sync.identity_timeout());
    let user = ctx
        .run(client.current_user())
        .await
        .context("failed to look up the GitLab user")?;
    Ok(location.resolve(&user.username))
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde("/etc/contribsync.toml"), PathBuf::from("/etc/contribsync.toml"));
        assert_eq!(expand_tilde("relative/config.toml"), PathBuf::from("relative/config.toml"));
    }

    #[test]
    fn test_expand_tilde_uses_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/a/b.toml"), home.join("a/b.toml"));
        }
    }

    #[tokio::test]
    async fn test_resolve_repo_path_prefers_explicit_dir() {
        let path = resolve_repo_path(Path::new("/nonexistent/config.toml"), Some("/tmp/r".into()))
            .await
            .unwrap();
        assert_eq!(path, PathBuf::from("/tmp/r"));
    }

    #[tokio::test]
    async fn test_resolve_repo_path_uses_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[gitlab]
base_url = "https://gitlab.example.com"
token_env = "CONTRIBSYNC_TEST_UNSET_TOKEN"

[committer]
name = "John Doe"
email = "john.doe@example.com"

[sync]
repo_dir = "/srv/contributions"
"#,
        )
        .unwrap();

        let path = resolve_repo_path(&config_path, None).await.unwrap();
        assert_eq!(path, PathBuf::from("/srv/contributions"));
    }
}
