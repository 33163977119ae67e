//! Run-scoped cancellation and deadlines.
//!
//! A [`RunContext`] is handed to every component that performs network I/O.
//! It carries an optional absolute deadline and a shared shutdown flag that
//! the binary sets on SIGINT/SIGTERM.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::errors::SourceError;

/// Shared shutdown flag.
pub type ShutdownFlag = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default)]
pub struct RunContext {
    deadline: Option<Instant>,
    shutdown: ShutdownFlag,
}

impl RunContext {
    /// A context with no deadline and its own shutdown flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `flag` as the shutdown signal.
    pub fn with_shutdown(mut self, flag: ShutdownFlag) -> Self {
        self.shutdown = flag;
        self
    }

    /// Derive a context whose deadline is the earlier of the current one and
    /// `now + timeout`. The shutdown flag is shared.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Request cancellation of every call sharing this context's flag.
    pub fn cancel(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_reason().is_some()
    }

    fn cancellation_reason(&self) -> Option<&'static str> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Some("shutdown requested");
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some("deadline exceeded"),
            _ => None,
        }
    }

    /// Drive one network call, giving up as soon as the context is cancelled.
    pub async fn run<T, F>(&self, call: F) -> Result<T, SourceError>
    where
        F: Future<Output = Result<T, SourceError>>,
    {
        if let Some(reason) = self.cancellation_reason() {
            return Err(SourceError::Cancelled(reason.into()));
        }
        tokio::select! {
            biased;
            result = call => result,
            reason = self.cancelled() => Err(SourceError::Cancelled(reason.into())),
        }
    }

    /// Resolves once the shutdown flag is set or the deadline passes.
    async fn cancelled(&self) -> &'static str {
        loop {
            if let Some(reason) = self.cancellation_reason() {
                return reason;
            }
            let mut wake = Instant::now() + CANCEL_POLL_INTERVAL;
            if let Some(deadline) = self.deadline {
                wake = wake.min(deadline);
            }
            tokio::time::sleep_until(wake).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_passes_result_through() {
        let ctx = RunContext::new();
        let value = ctx.run(async { Ok::<_, SourceError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_refuses_after_shutdown() {
        let ctx = RunContext::new();
        ctx.cancel();
        let result = ctx.run(async { Ok::<_, SourceError>(1) }).await;
        assert!(matches!(result, Err(SourceError::Cancelled(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_slow_call() {
        let ctx = RunContext::new().with_timeout(Duration::from_secs(2));
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, SourceError>(())
        };
        let err = ctx.run(slow).await.unwrap_err();
        assert!(err.to_string().contains("deadline exceeded"));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_timeout_never_extends_parent() {
        let parent = RunContext::new().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(30));
        assert_eq!(child.deadline(), parent.deadline());

        let shorter = parent.with_timeout(Duration::from_millis(10));
        assert!(shorter.deadline() < parent.deadline());
    }

    #[tokio::test]
    async fn test_child_shares_shutdown_flag() {
        let parent = RunContext::new();
        let child = parent.with_timeout(Duration::from_secs(5));
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
