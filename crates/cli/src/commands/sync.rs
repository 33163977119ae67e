//! `contribsync sync`: run one synchronization pass.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use contribsync_core::models::{ProjectReport, ProjectStatus, RunSummary};
use contribsync_core::{EngineSettings, GitLabSyncEngine, RunContext, SyncConfig};

use crate::signals;
use crate::style;

/// Command-line overrides for the `[sync]` section.
#[derive(Debug, Default)]
pub struct SyncOptions {
    pub timeout_secs: Option<u64>,
    pub workers: Option<usize>,
    pub repo_dir: Option<PathBuf>,
    pub json: bool,
}

impl SyncOptions {
    fn apply(&self, config: &mut SyncConfig) {
        if let Some(secs) = self.timeout_secs {
            config.sync.run_timeout_secs = secs;
        }
        if let Some(workers) = self.workers {
            config.sync.workers = workers;
        }
        if let Some(dir) = &self.repo_dir {
            config.sync.repo_dir = Some(dir.clone());
        }
    }
}

/// Apply the overrides, then validate the result.
fn prepare(mut config: SyncConfig, options: &SyncOptions) -> Result<SyncConfig> {
    options.apply(&mut config);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

pub async fn run_sync(config: SyncConfig, options: SyncOptions) -> Result<()> {
    let config = prepare(config, &options)?;

    let client = super::gitlab_client(&config)?;
    let engine = GitLabSyncEngine::new(Arc::new(client), EngineSettings::from(&config));

    let mut ctx = RunContext::new().with_shutdown(signals::setup_signal_handlers());
    if let Some(timeout) = config.sync.run_timeout() {
        ctx = ctx.with_timeout(timeout);
    }

    let summary = engine.run(&ctx).await.context("sync failed")?;

    if options.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("failed to serialize summary")?
        );
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "{}",
        style::header(&format!("Contributions of {}", summary.username))
    );
    if summary.repository_created {
        println!("  {}", style::dim("created target repository"));
    }
    match &summary.resumed_from {
        Some(watermark) => println!(
            "  {}",
            style::dim(&format!(
                "resumed after project {} commit {}",
                watermark.project_id,
                style::short_hash(&watermark.hash, 12)
            ))
        ),
        None => println!("  {}", style::dim("no previous watermark, full history")),
    }
    println!();

    if !summary.projects.is_empty() {
        println!("{}", project_table(&summary.projects));
        println!();
    }

    println!(
        "{}",
        style::success(&format!(
            "Replayed {} commit(s) from {} project(s)",
            summary.commits_replayed,
            summary.projects_processed()
        ))
    );
    if let Some(project_id) = summary.held_at {
        println!(
            "{}",
            style::warn(&format!(
                "Held at project {project_id}; it will be retried on the next run"
            ))
        );
    }
    if summary.cancelled {
        println!(
            "{}",
            style::warn("Run cancelled before completion; replayed commits are kept")
        );
    }
    if let (Some(started), Some(completed)) = (summary.started_at, summary.completed_at) {
        let elapsed = (completed - started).num_milliseconds() as f64 / 1000.0;
        println!("{}", style::dim(&format!("Finished in {elapsed:.1}s")));
    }
}

fn project_table(projects: &[ProjectReport]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Project", "Fetched", "Replayed", "Status"]);

    for report in projects {
        let status = match report.status {
            ProjectStatus::Complete => Cell::new("✓ complete").fg(Color::Green),
            ProjectStatus::Partial => Cell::new("⚠ partial").fg(Color::Yellow),
            ProjectStatus::Deferred => Cell::new("⧗ deferred").fg(Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(report.project_id),
            Cell::new(report.fetched),
            Cell::new(report.replayed),
            status,
        ]);
    }
    table
}
