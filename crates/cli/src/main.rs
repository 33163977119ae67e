//! contribsync command-line tool.
//!
//! Replays a GitLab identity's contribution history into a local Git
//! repository and inspects the result.

mod commands;
mod signals;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use contribsync_core::config::SyncConfig;

use commands::sync::SyncOptions;

const DEFAULT_CONFIG_PATH: &str = "~/.config/contribsync/config.toml";

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// contribsync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "contribsync",
    version,
    about = "Mirror private GitLab contribution activity into a local Git repository"
)]
struct Cli {
    /// Path to the TOML configuration file. Environment variables are used
    /// when the file does not exist.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch new contributions and replay them into the target repository.
    Sync {
        /// Abort the run after this many seconds (0 disables the limit).
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Number of projects fetched concurrently.
        #[arg(short, long)]
        workers: Option<usize>,

        /// Target repository path, overriding the configured location.
        #[arg(long)]
        repo_dir: Option<PathBuf>,

        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the watermark recorded at the head of the target repository.
    Status {
        /// Target repository path, overriding the configured location.
        #[arg(long)]
        repo_dir: Option<PathBuf>,
    },

    /// List recently replayed commits.
    Log {
        /// Target repository path, overriding the configured location.
        #[arg(long)]
        repo_dir: Option<PathBuf>,

        /// Maximum number of commits to show.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        output: String,
    },

    /// Validate the configuration.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = commands::expand_tilde(&cli.config);

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.log_level.as_deref(), &config_path))
        .with_target(false)
        .without_time()
        .init();

    match run(cli, &config_path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

/// RUST_LOG, then `--log-level`, then `sync.log_level` from the config file.
fn log_filter(cli_level: Option<&str>, config_path: &Path) -> EnvFilter {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
    }
    let level = match cli_level {
        Some(level) => level.to_string(),
        None => SyncConfig::load_from_file(config_path)
            .map(|config| config.sync.log_level)
            .unwrap_or_else(|_| "info".to_string()),
    };
    EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"))
}

async fn run(cli: Cli, config_path: &Path) -> Result<()> {
    match cli.command {
        Commands::Sync {
            timeout_secs,
            workers,
            repo_dir,
            json,
        } => {
            let config = commands::read_config(config_path)?;
            let options = SyncOptions {
                timeout_secs,
                workers,
                repo_dir,
                json,
            };
            commands::sync::run_sync(config, options).await
        }
        Commands::Status { repo_dir } => commands::status::run_status(config_path, repo_dir).await,
        Commands::Log { repo_dir, limit } => {
            commands::log::run_log(config_path, repo_dir, limit).await
        }
        Commands::Init { output } => cmd_init(&commands::expand_tilde(&output)),
        Commands::Validate => cmd_validate(config_path),
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        bail!(
            "output file already exists: {}. Remove it first or choose a different path.",
            output.display()
        );
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    std::fs::write(output, SyncConfig::default_template())
        .with_context(|| format!("failed to write config to {}", output.display()))?;

    println!("{}", style::success(&format!("Configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Edit the [gitlab] and [committer] sections");
    println!("  2. Export your GitLab access token (GITLAB_TOKEN by default)");
    println!("  3. Run: contribsync validate");
    println!("  4. Run: contribsync sync");

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration...");
    println!();

    let from_file = config_path.exists();
    if from_file {
        println!("  [OK]   Config file found: {}", config_path.display());
    } else {
        println!(
            "  [--]   No config file at {}, using environment variables",
            config_path.display()
        );
    }

    let config = match SyncConfig::load_or_env(config_path) {
        Ok(config) => {
            println!("  [OK]   Configuration parsed and validated");
            config
        }
        Err(e) => {
            println!("  [FAIL] {}", e);
            bail!("configuration is invalid");
        }
    };

    println!();
    println!("Configuration summary:");
    println!("  GitLab URL     : {}", config.gitlab.base_url);
    println!(
        "  GitLab token   : {} ({})",
        config.gitlab.token_env,
        if config.gitlab.token.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!(
        "  Rate limit     : {} req/s",
        config.gitlab.requests_per_second
    );
    println!(
        "  Committer      : {} <{}>",
        config.committer.name, config.committer.email
    );
    println!(
        "  Repository     : {}",
        match config.repo_location().fixed() {
            Some(path) => path.display().to_string(),
            None => config.repo_path("<username>").display().to_string(),
        }
    );
    println!("  Workers        : {}", config.sync.workers);
    println!("  Match policy   : {}", config.sync.match_policy);
    println!(
        "  Run timeout    : {}",
        match config.sync.run_timeout() {
            Some(timeout) => format!("{}s", timeout.as_secs()),
            None => "none".to_string(),
        }
    );
    println!();
    println!("{}", style::success("Configuration is valid."));

    Ok(())
}
