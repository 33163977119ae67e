//! Incremental contribution synchronization engine.
//!
//! The [`SyncEngine`] orchestrates one run:
//!
//! 1. Resolve the identity behind the credentials.
//! 2. Open the target repository and decode the watermark from its head.
//! 3. Discover contributed projects after the watermark project.
//! 4. Fetch each project's commits on a bounded worker pool.
//! 5. Replay the records in ascending project order through a single writer.
//!
//! Replay order is fixed by discovery order, not by fetch completion, so the
//! repository head always names the highest project replayed so far. A
//! project that could not be fully fetched because of a transient failure
//! holds everything after it for the next run.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{RepoLocation, SyncConfig};
use crate::context::RunContext;
use crate::discovery::ProjectDiscovery;
use crate::errors::SyncError;
use crate::fetcher::{CommitFetcher, FetchOutcome};
use crate::git::RepositoryWriter;
use crate::identity::IdentityResolver;
use crate::models::{
    CommitterIdentity, Identity, MatchPolicy, ProjectId, ProjectReport, ProjectStatus,
    ResumePoint, RunSummary,
};
use crate::replay::ReplayEngine;
use crate::source::SourceClient;
use crate::watermark;

// ---------------------------------------------------------------------------
// Sync state machine
// ---------------------------------------------------------------------------

/// Stages of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Start,
    ResolveIdentity,
    ReadWatermark,
    DiscoverProjects,
    FetchCommits,
    ReplayCommits,
    Done,
    Failed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::ResolveIdentity => write!(f, "resolve_identity"),
            Self::ReadWatermark => write!(f, "read_watermark"),
            Self::DiscoverProjects => write!(f, "discover_projects"),
            Self::FetchCommits => write!(f, "fetch_commits"),
            Self::ReplayCommits => write!(f, "replay_commits"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Engine parameters, usually derived from a [`SyncConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub location: RepoLocation,
    pub committer: CommitterIdentity,
    pub workers: usize,
    pub match_policy: MatchPolicy,
    pub projects_per_page: u32,
    pub contributors_per_page: u32,
    pub commits_per_page: u32,
    pub identity_timeout: Duration,
}

impl EngineSettings {
    /// Defaults for a repository at `location`.
    pub fn new(location: RepoLocation, committer: CommitterIdentity) -> Self {
        Self {
            location,
            committer,
            workers: 5,
            match_policy: MatchPolicy::default(),
            projects_per_page: 100,
            contributors_per_page: 50,
            commits_per_page: 100,
            identity_timeout: Duration::from_secs(2),
        }
    }
}

impl From<&SyncConfig> for EngineSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            location: config.repo_location(),
            committer: (&config.committer).into(),
            workers: config.sync.workers.max(1),
            match_policy: config.sync.match_policy,
            projects_per_page: config.sync.projects_per_page,
            contributors_per_page: config.sync.contributors_per_page,
            commits_per_page: config.sync.commits_per_page,
            identity_timeout: config.sync.identity_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SyncEngine<S: SourceClient + ?Sized, R: RepositoryWriter> {
    source: Arc<S>,
    settings: EngineSettings,
    state: Mutex<SyncState>,
    /// Atomic flag preventing concurrent runs.
    running: Arc<AtomicBool>,
    _repository: PhantomData<fn() -> R>,
}

impl<S, R> SyncEngine<S, R>
where
    S: SourceClient + ?Sized + 'static,
    R: RepositoryWriter + 'static,
{
    pub fn new(source: Arc<S>, settings: EngineSettings) -> Self {
        debug!(workers = settings.workers, policy = %settings.match_policy, "initializing sync engine");
        Self {
            source,
            settings,
            state: Mutex::new(SyncState::Start),
            running: Arc::new(AtomicBool::new(false)),
            _repository: PhantomData,
        }
    }

    /// Stage of the current or last run.
    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check if a run is currently in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: SyncState) {
        let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *current != state {
            debug!(from = %*current, to = %state, "sync state");
            *current = state;
        }
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Execute one synchronization run.
    ///
    /// Identity, watermark and repository failures abort the run. Failures
    /// confined to one project are logged and reflected in the summary; the
    /// run still returns `Ok`.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunSummary, SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning);
        }
        let _guard = RunningGuard(self.running.clone());
        self.set_state(SyncState::Start);

        let mut summary = RunSummary {
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        let result = self.do_run(ctx, &mut summary).await;
        summary.completed_at = Some(Utc::now());
        summary.cancelled = ctx.is_cancelled();

        match result {
            Ok(()) => {
                self.set_state(SyncState::Done);
                info!(
                    username = %summary.username,
                    projects = summary.projects_processed(),
                    commits = summary.commits_replayed,
                    held_at = ?summary.held_at,
                    cancelled = summary.cancelled,
                    "sync run finished"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(stage = %self.state(), error = %e, "sync run failed");
                self.set_state(SyncState::Failed);
                Err(e)
            }
        }
    }

    async fn do_run(&self, ctx: &RunContext, summary: &mut RunSummary) -> Result<(), SyncError> {
        self.set_state(SyncState::ResolveIdentity);
        let identity_ctx = ctx.with_timeout(self.settings.identity_timeout);
        let identity = IdentityResolver::new(&*self.source)
            .resolve(&identity_ctx)
            .await?;
        summary.username = identity.username.clone();

        self.set_state(SyncState::ReadWatermark);
        let path = self.settings.location.resolve(&identity.username);
        let (repo, created) = R::init_or_open(&path)?;
        summary.repository_created = created;
        let resume = read_resume_point(&repo)?;
        match &resume {
            Some(point) => info!(
                path = %path.display(),
                project_id = point.watermark.project_id,
                hash = %point.watermark.hash,
                since = %point.since,
                "resuming after watermark"
            ),
            None => info!(path = %path.display(), "no watermark, starting from the beginning"),
        }
        summary.resumed_from = resume.as_ref().map(|p| p.watermark.clone());

        self.set_state(SyncState::DiscoverProjects);
        let replay = ReplayEngine::new(
            Arc::new(tokio::sync::Mutex::new(repo)),
            self.settings.committer.clone(),
        );
        self.fan_out(ctx, Arc::new(identity), resume, &replay, summary)
            .await
    }

    /// Run discovery, the fetch pool and ordered replay until all three are
    /// drained.
    async fn fan_out(
        &self,
        ctx: &RunContext,
        identity: Arc<Identity>,
        resume: Option<ResumePoint>,
        replay: &ReplayEngine<R>,
        summary: &mut RunSummary,
    ) -> Result<(), SyncError> {
        let after_id = resume.as_ref().map_or(0, |p| p.watermark.project_id);
        let workers = self.settings.workers.max(1);

        let (project_tx, mut project_rx) = mpsc::channel::<ProjectId>(workers);
        let mut discovery = ProjectDiscovery::new(
            self.source.clone(),
            identity.clone(),
            ctx.clone(),
            after_id,
            self.settings.projects_per_page,
            self.settings.contributors_per_page,
        );
        let discovery_task = tokio::spawn(async move {
            while let Some(project_id) = discovery.next().await {
                if project_tx.send(project_id).await.is_err() {
                    break;
                }
            }
            discovery.halted_at()
        });

        let mut pool = FetchPool::new(
            self.source.clone(),
            identity,
            ctx.clone(),
            workers,
            self.settings.match_policy,
            self.settings.commits_per_page,
        );

        // The watermark project may have gained commits since the last run.
        if let Some(point) = &resume {
            pool.spawn(point.watermark.project_id, Some(point.since));
        }

        // Finished fetches wait here until every earlier one is replayed.
        // Fetching plus waiting never exceeds `workers`, which bounds the
        // records held in memory and, through the channel, discovery.
        let mut ready: BTreeMap<u64, (ProjectId, FetchOutcome)> = BTreeMap::new();
        let mut next_replay: u64 = 0;
        let mut discovering = true;
        let mut held_at: Option<ProjectId> = None;
        let mut never_fetched: Vec<ProjectId> = Vec::new();

        loop {
            tokio::select! {
                joined = pool.join_next(), if !pool.is_empty() => {
                    let Some(joined) = joined else { continue };
                    let (seq, project_id, outcome) = joined?;
                    ready.insert(seq, (project_id, outcome));

                    while let Some((project_id, outcome)) = ready.remove(&next_replay) {
                        let is_resume = next_replay == 0 && resume.is_some();
                        next_replay += 1;

                        if held_at.is_some() {
                            summary.projects.push(ProjectReport {
                                project_id,
                                fetched: outcome.records.len(),
                                replayed: 0,
                                status: ProjectStatus::Deferred,
                            });
                            continue;
                        }

                        self.set_state(SyncState::ReplayCommits);
                        let fetched = outcome.records.len();
                        let records = match (&resume, is_resume) {
                            (Some(point), true) => point.trim(outcome.records),
                            _ => outcome.records,
                        };
                        let replayed = replay.replay(&records).await?;
                        summary.commits_replayed += replayed;
                        let status = if outcome.complete {
                            ProjectStatus::Complete
                        } else {
                            ProjectStatus::Partial
                        };
                        summary.projects.push(ProjectReport { project_id, fetched, replayed, status });
                        info!(project_id, fetched, replayed, %status, "project replayed");

                        if !outcome.complete && outcome.retryable {
                            warn!(project_id, "fetch incomplete, holding later projects for the next run");
                            held_at = Some(project_id);
                            discovering = false;
                            project_rx.close();
                            while let Ok(queued) = project_rx.try_recv() {
                                never_fetched.push(queued);
                            }
                            discovery_task.abort();
                            pool.stop();
                        }
                    }
                    self.set_state(SyncState::FetchCommits);
                }
                received = project_rx.recv(), if discovering && pool.len() + ready.len() < workers => {
                    match received {
                        Some(project_id) => {
                            debug!(project_id, "project discovered");
                            self.set_state(SyncState::FetchCommits);
                            pool.spawn(project_id, None);
                        }
                        None => discovering = false,
                    }
                }
                else => break,
            }
        }

        let halted_at = match discovery_task.await {
            Ok(halted_at) => halted_at,
            Err(e) if e.is_cancelled() => None,
            Err(e) => return Err(SyncError::Worker(e.to_string())),
        };
        summary
            .projects
            .extend(never_fetched.into_iter().map(|project_id| ProjectReport {
                project_id,
                fetched: 0,
                replayed: 0,
                status: ProjectStatus::Deferred,
            }));
        if held_at.is_none() {
            if let Some(project_id) = halted_at {
                summary.projects.push(ProjectReport {
                    project_id,
                    fetched: 0,
                    replayed: 0,
                    status: ProjectStatus::Deferred,
                });
                held_at = Some(project_id);
            }
        }
        summary.held_at = held_at;
        Ok(())
    }
}

/// Decode the head commit into a resume point. A head that is not a
/// replayed commit is fatal.
fn read_resume_point<R: RepositoryWriter>(repo: &R) -> Result<Option<ResumePoint>, SyncError> {
    let Some(head) = repo.head()? else {
        return Ok(None);
    };
    let watermark = watermark::decode(&head.message)?;
    Ok(Some(ResumePoint {
        watermark,
        since: head.committed_at,
    }))
}

/// Drop guard that resets the `running` flag to `false`.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Fetch pool
// ---------------------------------------------------------------------------

type FetchResult = (u64, ProjectId, FetchOutcome);

/// Bounded set of commit fetches. Each job is tagged with the sequence
/// number the coordinator replays it under.
struct FetchPool<S: SourceClient + ?Sized> {
    source: Arc<S>,
    identity: Arc<Identity>,
    ctx: RunContext,
    policy: MatchPolicy,
    per_page: u32,
    semaphore: Arc<Semaphore>,
    jobs: JoinSet<FetchResult>,
    next_seq: u64,
}

impl<S: SourceClient + ?Sized + 'static> FetchPool<S> {
    fn new(
        source: Arc<S>,
        identity: Arc<Identity>,
        ctx: RunContext,
        workers: usize,
        policy: MatchPolicy,
        per_page: u32,
    ) -> Self {
        Self {
            source,
            identity,
            ctx,
            policy,
            per_page,
            semaphore: Arc::new(Semaphore::new(workers)),
            jobs: JoinSet::new(),
            next_seq: 0,
        }
    }

    fn spawn(&mut self, project_id: ProjectId, since: Option<DateTime<Utc>>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let source = self.source.clone();
        let identity = self.identity.clone();
        let ctx = self.ctx.clone();
        let semaphore = self.semaphore.clone();
        let (policy, per_page) = (self.policy, self.per_page);

        self.jobs.spawn(async move {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                // Closed: the run is holding, this project waits for the next one.
                Err(_) => {
                    return (
                        seq,
                        project_id,
                        FetchOutcome {
                            retryable: true,
                            ..Default::default()
                        },
                    )
                }
            };
            let outcome = CommitFetcher::new(&*source, policy, per_page)
                .fetch(&ctx, &identity, project_id, since)
                .await;
            (seq, project_id, outcome)
        });
    }

    async fn join_next(&mut self) -> Option<Result<FetchResult, SyncError>> {
        let joined = self.jobs.join_next().await?;
        Some(joined.map_err(|e| SyncError::Worker(e.to_string())))
    }

    fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs spawned and not yet joined, waiting for a permit or running.
    fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Let running fetches finish but start no new ones.
    fn stop(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitRepository;
    use crate::source::{InMemorySource, RemoteUser};

    fn committer() -> CommitterIdentity {
        CommitterIdentity {
            name: "John Doe".into(),
            email: "john.doe@example.com".into(),
        }
    }

    #[test]
    fn test_sync_state_display() {
        assert_eq!(SyncState::Start.to_string(), "start");
        assert_eq!(SyncState::ResolveIdentity.to_string(), "resolve_identity");
        assert_eq!(SyncState::ReadWatermark.to_string(), "read_watermark");
        assert_eq!(SyncState::DiscoverProjects.to_string(), "discover_projects");
        assert_eq!(SyncState::FetchCommits.to_string(), "fetch_commits");
        assert_eq!(SyncState::ReplayCommits.to_string(), "replay_commits");
        assert_eq!(SyncState::Done.to_string(), "done");
        assert_eq!(SyncState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_settings_from_config() {
        let config: SyncConfig = toml::from_str(
            r#"
[gitlab]
base_url = "https://gitlab.example.com"
[committer]
name = "John Doe"
email = "john.doe@example.com"
[sync]
workers = 2
match_policy = "author_or_committer"
"#,
        )
        .unwrap();
        let settings = EngineSettings::from(&config);
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.match_policy, MatchPolicy::AuthorOrCommitter);
        assert_eq!(settings.committer, committer());
        assert_eq!(
            settings.location.resolve("jdoe"),
            std::path::PathBuf::from("./repo.gitlab.example.com.jdoe")
        );
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let source = Arc::new(InMemorySource::new(RemoteUser {
            name: "Jane".into(),
            username: "jane".into(),
            email: Some("jane@x.com".into()),
            created_at: None,
        }));
        let dir = tempfile::tempdir().unwrap();
        let settings = EngineSettings::new(RepoLocation::Fixed(dir.path().join("repo")), committer());
        let engine: SyncEngine<InMemorySource, GitRepository> = SyncEngine::new(source, settings);

        engine.running.store(true, Ordering::SeqCst);
        let err = engine.run(&RunContext::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadyRunning));

        engine.running.store(false, Ordering::SeqCst);
        let summary = engine.run(&RunContext::new()).await.unwrap();
        assert!(summary.repository_created);
        assert_eq!(engine.state(), SyncState::Done);
        assert!(!engine.is_running());
    }
}
