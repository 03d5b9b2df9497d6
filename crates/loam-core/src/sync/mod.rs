//! Sync engine: push, pull, conflict resolution and the shared sync context.

mod conflict;
mod engine;
mod pull;
mod push;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{broadcast, watch, Notify, RwLock, RwLockReadGuard};

use crate::config::SyncSettings;
use crate::models::OwnerId;
use crate::remote::RemoteError;
use crate::services::{LocalStore, SharedDatabase, SyncMeta, SyncQueue};
use crate::state::{SyncEvent, SyncStatus};

pub use conflict::{resolve, Resolution};
pub use engine::{SyncEngine, SyncWorkers};
pub use pull::{pull_once, PullExit, PullReport};
pub use push::{push_once, PushExit, PushReport};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The embedded store failed; continuing risks data loss, so sync halts.
    #[error("Storage failure, sync halted: {0}")]
    StorageCorruption(#[from] crate::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("Sync is halted after a storage failure")]
    Halted,
    #[error("A migration is in progress for this store")]
    MigrationInProgress,
    #[error("Invalid migration: {0}")]
    InvalidMigration(String),
    /// Single-flight guard: a cycle of this loop is already running.
    #[error("{0} cycle already in flight")]
    AlreadyRunning(&'static str),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Everything the workers share, constructed once per owner and passed to
/// every worker constructor.
#[derive(Clone)]
pub struct SyncContext {
    db: SharedDatabase,
    store: LocalStore,
    queue: SyncQueue,
    meta: SyncMeta,
    owner: OwnerId,
    settings: SyncSettings,
    push_trigger: Arc<Notify>,
    pull_trigger: Arc<Notify>,
    connectivity: watch::Receiver<bool>,
    status: Arc<watch::Sender<SyncStatus>>,
    events: broadcast::Sender<SyncEvent>,
    migration_gate: Arc<RwLock<()>>,
    halted: Arc<AtomicBool>,
    active_cycles: Arc<AtomicUsize>,
    /// Message of the last failed pull fetch, cleared by the next good pull
    pull_failure: Arc<Mutex<Option<String>>>,
    push_flight: SingleFlight,
    pull_flight: SingleFlight,
}

impl SyncContext {
    pub fn new(
        db: SharedDatabase,
        owner: OwnerId,
        settings: SyncSettings,
        connectivity: watch::Receiver<bool>,
    ) -> Self {
        let push_trigger = Arc::new(Notify::new());
        let (status, _) = watch::channel(SyncStatus::Synced);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let context = Self {
            store: LocalStore::new(db.clone(), push_trigger.clone()),
            queue: SyncQueue::new(db.clone()),
            meta: SyncMeta::new(db.clone()),
            db,
            owner,
            settings,
            push_trigger,
            pull_trigger: Arc::new(Notify::new()),
            connectivity,
            status: Arc::new(status),
            events,
            migration_gate: Arc::new(RwLock::new(())),
            halted: Arc::new(AtomicBool::new(false)),
            active_cycles: Arc::new(AtomicUsize::new(0)),
            pull_failure: Arc::new(Mutex::new(None)),
            push_flight: SingleFlight::default(),
            pull_flight: SingleFlight::default(),
        };
        context.refresh_status();
        context
    }

    /// A context that always reports being online (one-shot CLI runs, tests).
    pub fn always_online(db: SharedDatabase, owner: OwnerId, settings: SyncSettings) -> Self {
        let (_, connectivity) = watch::channel(true);
        Self::new(db, owner, settings, connectivity)
    }

    pub fn database(&self) -> &SharedDatabase {
        &self.db
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn push_trigger(&self) -> &Arc<Notify> {
        &self.push_trigger
    }

    pub fn pull_trigger(&self) -> &Arc<Notify> {
        &self.pull_trigger
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.connectivity.borrow()
    }

    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connectivity.clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Stop all sync after a storage failure.
    pub(crate) fn halt(&self, error: &crate::Error) {
        if self.halted.swap(true, Ordering::AcqRel) {
            return;
        }
        let message = error.to_string();
        tracing::error!(owner = %self.owner, "Halting sync after storage failure: {message}");
        let (pending, dead_letters) = self.queue.counts().unwrap_or_default();
        self.status.send_replace(SyncStatus::Error {
            pending,
            dead_letters,
            message: message.clone(),
        });
        self.emit(SyncEvent::Halted { message });
    }

    /// Recompute the idle status from queue counts.
    pub fn refresh_status(&self) {
        if self.is_halted() || self.active_cycles.load(Ordering::Acquire) > 0 {
            return;
        }
        match self.queue.counts() {
            Ok((pending, dead_letters)) => {
                let mut status = SyncStatus::from_counts(pending, dead_letters);
                if let (false, Some(message)) = (status.is_error(), self.pull_failure()) {
                    status = SyncStatus::Error {
                        pending,
                        dead_letters,
                        message: format!("last pull failed: {message}"),
                    };
                }
                self.status.send_replace(status);
            }
            Err(error) => self.halt(&error),
        }
    }

    /// Message of the last failed pull, if the most recent pull failed.
    pub fn pull_failure(&self) -> Option<String> {
        self.pull_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record_pull_failure(&self, error: &RemoteError) {
        let message = error.to_string();
        tracing::warn!(owner = %self.owner, "Pull failed: {message}");
        *self
            .pull_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(message.clone());
        self.emit(SyncEvent::PullFailed { message });
    }

    pub(crate) fn clear_pull_failure(&self) {
        self.pull_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn begin_cycle(&self) {
        self.active_cycles.fetch_add(1, Ordering::AcqRel);
        if !self.is_halted() {
            self.status.send_replace(SyncStatus::Syncing);
        }
    }

    fn end_cycle(&self) {
        self.active_cycles.fetch_sub(1, Ordering::AcqRel);
        self.refresh_status();
    }

    /// Shared side of the migration gate; fails while a migration holds it.
    pub(crate) fn try_enter_sync(&self) -> SyncResult<RwLockReadGuard<'_, ()>> {
        self.migration_gate
            .try_read()
            .map_err(|_| SyncError::MigrationInProgress)
    }

    pub(crate) fn push_flight(&self) -> &SingleFlight {
        &self.push_flight
    }

    pub(crate) fn pull_flight(&self) -> &SingleFlight {
        &self.pull_flight
    }

    pub(crate) fn migration_gate(&self) -> &Arc<RwLock<()>> {
        &self.migration_gate
    }

    /// Map a storage error to the fatal sync error, halting the engine.
    pub(crate) fn storage_failure(&self, error: crate::Error) -> SyncError {
        self.halt(&error);
        SyncError::StorageCorruption(error)
    }
}

/// Single-flight guard: at most one cycle of a given loop at a time.
#[derive(Clone, Default)]
pub(crate) struct SingleFlight {
    in_flight: Arc<AtomicBool>,
}

impl SingleFlight {
    pub(crate) fn try_begin(&self) -> Option<FlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                in_flight: self.in_flight.clone(),
            })
    }
}

pub(crate) struct FlightGuard {
    in_flight: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

/// Marks a cycle as running for status purposes until dropped.
pub(crate) struct CycleGuard<'a> {
    context: &'a SyncContext,
}

impl<'a> CycleGuard<'a> {
    pub(crate) fn new(context: &'a SyncContext) -> Self {
        context.begin_cycle();
        Self { context }
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.context.end_cycle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_flight_rejects_second_entry_until_released() {
        let flight = SingleFlight::default();
        let guard = flight.try_begin();
        assert!(guard.is_some());
        assert!(flight.try_begin().is_none());
        drop(guard);
        assert!(flight.try_begin().is_some());
    }

    #[test]
    fn status_tracks_queue_and_cycles() {
        let db = SharedDatabase::open_in_memory().unwrap();
        let context = SyncContext::always_online(
            db,
            OwnerId::new("owner-1").unwrap(),
            SyncSettings::default(),
        );
        assert_eq!(context.status(), SyncStatus::Synced);

        {
            let _cycle = CycleGuard::new(&context);
            assert_eq!(context.status(), SyncStatus::Syncing);
        }
        assert_eq!(context.status(), SyncStatus::Synced);
    }

    #[test]
    fn halt_publishes_error_status() {
        let db = SharedDatabase::open_in_memory().unwrap();
        let context = SyncContext::always_online(
            db,
            OwnerId::new("owner-1").unwrap(),
            SyncSettings::default(),
        );
        let mut events = context.subscribe_events();

        context.halt(&crate::Error::Database("disk full".to_string()));
        assert!(context.is_halted());
        assert!(context.status().is_error());
        assert!(matches!(events.try_recv(), Ok(SyncEvent::Halted { .. })));

        context.refresh_status();
        assert!(context.status().is_error());
    }
}
