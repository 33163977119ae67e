//! contribsync core library.
//!
//! This crate replays a GitLab identity's commits across all of their
//! projects into one local repository as metadata-only commits. It provides
//! the source client, identity resolution, project discovery, commit
//! fetching, the watermark codec, the replay engine and the sync engine
//! that ties them together.

pub mod config;
pub mod context;
pub mod contribution;
pub mod discovery;
pub mod errors;
pub mod fetcher;
pub mod git;
pub mod identity;
pub mod models;
pub mod replay;
pub mod source;
pub mod sync_engine;
pub mod watermark;

// Re-exports for convenience.
pub use config::SyncConfig;
pub use context::{RunContext, ShutdownFlag};
pub use git::{GitRepository, RepositoryWriter};
pub use source::{GitLabClient, InMemorySource, SourceClient};
pub use sync_engine::{EngineSettings, SyncEngine};

/// The engine wired to GitLab and a local git repository.
pub type GitLabSyncEngine = SyncEngine<GitLabClient, GitRepository>;
