//! `contribsync status`: show the watermark recorded in the target repository.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use contribsync_core::{watermark, GitRepository, RepositoryWriter};

use crate::style;

pub async fn run_status(config_path: &Path, repo_dir: Option<PathBuf>) -> Result<()> {
    let path = super::resolve_repo_path(config_path, repo_dir).await?;

    println!();
    println!("{}", style::header("contribsync Status"));
    println!();
    println!("  Repository  : {}", path.display());

    if !path.exists() {
        println!("  Watermark   : none");
        println!();
        println!(
            "{}",
            style::dim("No target repository yet. Run `contribsync sync` to create it.")
        );
        return Ok(());
    }

    let repo = GitRepository::open(&path).context("failed to open target repository")?;
    let Some(head) = repo.head().context("failed to read HEAD")? else {
        println!("  Watermark   : none (nothing replayed yet)");
        println!();
        return Ok(());
    };

    let mark = watermark::decode(&head.message).with_context(|| {
        format!(
            "HEAD {} is not a replayed commit",
            style::short_hash(&head.sha, 8)
        )
    })?;

    println!("  Project     : {}", mark.project_id);
    println!("  Source hash : {}", mark.hash);
    println!(
        "  Committed   : {}",
        head.committed_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  HEAD        : {}", head.sha);
    println!();
    println!(
        "{}",
        style::success("The next sync resumes after this commit.")
    );
    Ok(())
}
