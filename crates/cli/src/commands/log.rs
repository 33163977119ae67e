//! `contribsync log`: list recently replayed commits.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use contribsync_core::git::HeadCommit;
use contribsync_core::{watermark, GitRepository};

use crate::style;

pub async fn run_log(config_path: &Path, repo_dir: Option<PathBuf>, limit: usize) -> Result<()> {
    let path = super::resolve_repo_path(config_path, repo_dir).await?;
    if !path.exists() {
        println!("No replayed commits found.");
        return Ok(());
    }

    let repo = GitRepository::open(&path).context("failed to open target repository")?;
    let commits = repo
        .recent_commits(limit)
        .context("failed to read repository history")?;

    if commits.is_empty() {
        println!("No replayed commits found.");
        return Ok(());
    }

    println!();
    println!(
        "{}",
        style::header(&format!("Replayed Commits (last {})", commits.len()))
    );
    println!();
    println!("{}", commit_table(&commits));
    println!();
    Ok(())
}

fn commit_table(commits: &[HeadCommit]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Committed", "Project", "Source commit", "Commit"]);

    for commit in commits {
        let committed = commit.committed_at.format("%Y-%m-%d %H:%M").to_string();
        let (project, source) = match watermark::decode(&commit.message) {
            Ok(mark) => (
                Cell::new(mark.project_id),
                Cell::new(style::short_hash(&mark.hash, 12)),
            ),
            Err(_) => (
                Cell::new("?").fg(Color::Red),
                Cell::new(commit.message.lines().next().unwrap_or("")).fg(Color::Red),
            ),
        };
        table.add_row(vec![
            Cell::new(committed),
            project,
            source,
            Cell::new(style::short_hash(&commit.sha, 8)),
        ]);
    }
    table
}
