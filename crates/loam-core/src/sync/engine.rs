//! Background workers driving the push and pull loops.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::remote::{Backoff, RemoteBackend};

use super::pull::{pull_once, PullReport};
use super::push::{push_once, PushExit, PushReport};
use super::{SyncContext, SyncError, SyncResult};

const IDLE_WAIT: Duration = Duration::from_secs(3_600);

/// Orchestrates push and pull for one [`SyncContext`].
///
/// Each loop is single-flight; the two loops may run concurrently with each
/// other. Cycles can also be run inline with [`SyncEngine::push_now`],
/// [`SyncEngine::pull_now`] and [`SyncEngine::sync_once`].
#[derive(Clone)]
pub struct SyncEngine {
    context: SyncContext,
    remote: Arc<dyn RemoteBackend>,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(context: SyncContext, remote: Arc<dyn RemoteBackend>) -> Self {
        let backoff = Backoff::from_settings(context.settings());
        Self {
            context,
            remote,
            backoff,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    /// Token that stops both loops at their next batch boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn push_now(&self) -> SyncResult<PushReport> {
        push_once(&self.context, self.remote.as_ref(), &self.backoff, &self.cancel).await
    }

    pub async fn pull_now(&self) -> SyncResult<PullReport> {
        pull_once(&self.context, self.remote.as_ref(), &self.cancel).await
    }

    /// One push cycle followed by one pull cycle.
    pub async fn sync_once(&self) -> SyncResult<(PushReport, PullReport)> {
        let push = self.push_now().await?;
        let pull = self.pull_now().await?;
        Ok((push, pull))
    }

    /// Ask the pull worker to run now (app resume/foreground).
    pub fn request_pull(&self) {
        self.context.pull_trigger().notify_one();
    }

    pub fn request_push(&self) {
        self.context.push_trigger().notify_one();
    }

    /// Spawn the push and pull workers on the current runtime.
    #[must_use]
    pub fn start(&self) -> SyncWorkers {
        tracing::info!(owner = %self.context.owner(), "Starting sync workers");
        let push = tokio::spawn(self.clone().run_push_worker());
        let pull = tokio::spawn(self.clone().run_pull_worker());
        SyncWorkers {
            cancel: self.cancel.clone(),
            handles: vec![push, pull],
        }
    }

    async fn run_push_worker(self) {
        let mut connectivity = self.context.connectivity();
        let mut connectivity_open = true;
        let mut retry_at: Option<Instant> = None;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.push_now().await {
                Ok(report) => match report.exit {
                    PushExit::Paused { retry_in, .. } => {
                        retry_at = Some(Instant::now() + retry_in);
                    }
                    PushExit::Drained => {
                        retry_at = None;
                        if report.acknowledged > 0 {
                            self.request_pull();
                        }
                    }
                    PushExit::Offline => retry_at = None,
                    PushExit::Cancelled => break,
                },
                Err(SyncError::Halted | SyncError::StorageCorruption(_)) => break,
                Err(SyncError::AlreadyRunning(_) | SyncError::MigrationInProgress) => {
                    tracing::debug!("Push cycle skipped");
                }
                Err(error) => tracing::warn!("Push cycle failed: {error}"),
            }

            let deadline = retry_at.unwrap_or_else(|| Instant::now() + IDLE_WAIT);
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = self.context.push_trigger().notified(), if retry_at.is_none() => {}
                () = tokio::time::sleep_until(deadline), if retry_at.is_some() => {}
                changed = connectivity.changed(), if connectivity_open => {
                    if changed.is_err() {
                        connectivity_open = false;
                    } else if *connectivity.borrow_and_update() {
                        tracing::info!("Connectivity restored; resuming push");
                        retry_at = None;
                    }
                }
            }
        }

        tracing::info!("Push worker stopped");
    }

    async fn run_pull_worker(self) {
        let mut connectivity = self.context.connectivity();
        let mut connectivity_open = true;
        let mut timer = tokio::time::interval(self.context.settings().pull_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = timer.tick() => {}
                () = self.context.pull_trigger().notified() => {}
                changed = connectivity.changed(), if connectivity_open => {
                    if changed.is_err() {
                        connectivity_open = false;
                        continue;
                    }
                    if !*connectivity.borrow_and_update() {
                        continue;
                    }
                }
            }

            match self.pull_now().await {
                Ok(_) => {}
                Err(SyncError::Halted | SyncError::StorageCorruption(_)) => break,
                Err(SyncError::AlreadyRunning(_) | SyncError::MigrationInProgress) => {
                    tracing::debug!("Pull cycle skipped");
                }
                Err(error) => {
                    tracing::debug!("Pull cycle failed, will retry on next trigger: {error}");
                }
            }
        }

        tracing::info!("Pull worker stopped");
    }
}

/// Handles to running workers.
pub struct SyncWorkers {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl SyncWorkers {
    /// Cancel at the next batch boundary and wait for in-flight calls to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(error) = handle.await {
                tracing::error!("Sync worker panicked: {error}");
            }
        }
    }
}
