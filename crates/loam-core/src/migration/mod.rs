//! One-shot upload of an anonymous owner's data into an account-backed owner.
//!
//! The local `owner_id` is only rewritten after every entity of the set has
//! been confirmed by the remote, so an interrupted migration leaves the local
//! store exactly as it was and can be resumed. Uploads go through the create
//! path with stable ids, which makes re-uploading an entity a safe overwrite.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::db::{EntityRepository, ReadMode, SqliteEntityRepository, SqliteSyncMeta, SqliteSyncQueue};
use crate::models::{Entity, EntityId, MigrationProgress, MigrationState, OwnerId};
use crate::remote::{Backoff, RemoteBackend, RemoteError};
use crate::state::SyncEvent;
use crate::sync::{SyncContext, SyncError, SyncResult};
use crate::util::unix_millis_now;

/// Result of one migration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub progress: MigrationProgress,
    /// Remote failure that stopped this attempt, if any
    pub error: Option<RemoteError>,
}

impl MigrationReport {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.progress.is_complete()
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) if error.is_permanent() => {
                write!(
                    f,
                    "{}/{} items migrated, stopped: {error}",
                    self.progress.migrated, self.progress.total
                )
            }
            _ => fmt::Display::fmt(&self.progress, f),
        }
    }
}

/// Migration worker for the context's owner (the migration target).
///
/// Holds the exclusive side of the context's migration gate while an attempt
/// runs, so push and pull cycles cannot interleave with it.
#[derive(Clone)]
pub struct MigrationService {
    context: SyncContext,
    remote: Arc<dyn RemoteBackend>,
    backoff: Backoff,
}

impl MigrationService {
    pub fn new(context: SyncContext, remote: Arc<dyn RemoteBackend>) -> Self {
        let backoff = Backoff::from_settings(context.settings());
        Self {
            context,
            remote,
            backoff,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn progress(&self, source: &OwnerId) -> SyncResult<Option<MigrationProgress>> {
        Ok(self.context.meta().migration_progress(source)?)
    }

    /// Upload every live entity of `source` to the remote under the target
    /// owner, resuming after any previously confirmed uploads.
    ///
    /// Stops at the first failed upload and reports progress; call again (or
    /// use [`Self::run_until_complete`]) to resume from that item.
    pub async fn migrate(&self, source: &OwnerId) -> SyncResult<MigrationReport> {
        let target = self.context.owner().clone();
        if *source == target {
            return Err(SyncError::InvalidMigration(
                "source and target owner are the same".to_string(),
            ));
        }

        let _gate = self.context.migration_gate().write().await;
        let meta = self.context.meta();

        let previous = meta.migration_progress(source)?;
        if let Some(previous) = &previous {
            if previous.target_owner != target.as_str() {
                return Err(SyncError::InvalidMigration(format!(
                    "{source} is already being migrated to {}",
                    previous.target_owner
                )));
            }
            if previous.is_complete() {
                tracing::info!(source = %source, "Migration already complete");
                return Ok(MigrationReport {
                    progress: previous.clone(),
                    error: None,
                });
            }
        }

        let entities = self.migration_set(source)?;
        let uploaded: HashMap<EntityId, i64> = self
            .context
            .database()
            .with_connection(|conn| SqliteSyncMeta::new(conn).uploaded_versions(source))?
            .into_iter()
            .collect();
        let is_uploaded =
            |entity: &Entity| uploaded.get(&entity.id).is_some_and(|version| *version >= entity.version);

        let mut progress = MigrationProgress {
            source_owner: source.to_string(),
            target_owner: target.to_string(),
            total: entities.len(),
            migrated: entities.iter().filter(|entity| is_uploaded(entity)).count(),
            state: MigrationState::InProgress,
            last_error: None,
            updated_at: unix_millis_now(),
        };
        self.save_progress(&progress)?;
        tracing::info!(source = %source, target = %target, "Migration started: {progress}");

        let batch_size = self.context.settings().migration_batch_size;
        for batch in entities.chunks(batch_size) {
            for entity in batch {
                if is_uploaded(entity) {
                    continue;
                }

                let mut upload = entity.clone();
                upload.owner_id = target.clone();
                if let Err(error) = self.remote.create(&upload).await {
                    progress.last_error = Some(error.to_string());
                    progress.updated_at = unix_millis_now();
                    self.save_progress(&progress)?;
                    tracing::warn!(
                        entity_id = %entity.id,
                        source = %source,
                        "Migration upload failed ({progress}): {error}"
                    );
                    return Ok(MigrationReport {
                        progress,
                        error: Some(error),
                    });
                }

                record_upload(&self.context, source, entity)?;
                progress.migrated += 1;
            }

            progress.updated_at = unix_millis_now();
            self.save_progress(&progress)?;
            tracing::debug!(source = %source, "Migration batch uploaded: {progress}");
        }

        self.finalize(source, &target, &mut progress)?;
        tracing::info!(source = %source, target = %target, "Migration complete: {progress}");
        self.context.push_trigger().notify_one();
        self.context.refresh_status();

        Ok(MigrationReport {
            progress,
            error: None,
        })
    }

    /// Keep retrying with backoff until the migration completes, a permanent
    /// remote failure stops it, or `cancel` fires.
    pub async fn run_until_complete(
        &self,
        source: &OwnerId,
        cancel: &CancellationToken,
    ) -> SyncResult<MigrationReport> {
        let mut attempt = 0_u32;
        loop {
            let report = self.migrate(source).await?;
            let retryable = match &report.error {
                None => return Ok(report),
                Some(error) => !error.is_permanent(),
            };
            if !retryable {
                tracing::error!(source = %source, "Migration stopped: {report}");
                return Ok(report);
            }

            attempt = attempt.saturating_add(1);
            let delay = self.backoff.delay(attempt);
            tracing::info!(
                source = %source,
                attempt,
                retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "{report}"
            );
            tokio::select! {
                () = cancel.cancelled() => return Ok(report),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Live entities of `source`: top-level entities before contained ones,
    /// then by creation time and id, so containers reach the remote first.
    fn migration_set(&self, source: &OwnerId) -> SyncResult<Vec<Entity>> {
        let mut entities = self
            .context
            .store()
            .list_by_owner(source, ReadMode::ExcludeDeleted)?;
        entities.sort_by(|a, b| {
            a.container_id
                .is_some()
                .cmp(&b.container_id.is_some())
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(entities)
    }

    fn save_progress(&self, progress: &MigrationProgress) -> SyncResult<()> {
        self.context.meta().save_migration_progress(progress)?;
        self.context
            .emit(SyncEvent::MigrationProgress(progress.clone()));
        Ok(())
    }

    /// Hand the data over to the target owner in one transaction.
    fn finalize(
        &self,
        source: &OwnerId,
        target: &OwnerId,
        progress: &mut MigrationProgress,
    ) -> SyncResult<()> {
        progress.migrated = progress.total;
        progress.state = MigrationState::Completed;
        progress.last_error = None;
        progress.updated_at = unix_millis_now();

        let (entities, superseded) = self.context.database().with_transaction(|tx| {
            let meta = SqliteSyncMeta::new(tx);
            let queue = SqliteSyncQueue::new(tx);

            let entities = SqliteEntityRepository::new(tx).reassign_owner(source, target)?;
            queue.reassign_owner(source, target)?;
            let mut superseded = 0;
            for (entity_id, version) in meta.uploaded_versions(source)? {
                superseded += queue.discard_superseded(&entity_id, version)?;
            }
            meta.save_migration_progress(progress)?;
            meta.clear_uploads(source)?;
            Ok((entities, superseded))
        })?;

        tracing::debug!(
            reassigned = entities,
            superseded,
            "Reassigned migrated entities and dropped queue entries the upload covered"
        );
        self.context
            .emit(SyncEvent::MigrationProgress(progress.clone()));
        Ok(())
    }
}

fn record_upload(context: &SyncContext, source: &OwnerId, entity: &Entity) -> SyncResult<()> {
    context.database().with_connection(|conn| {
        SqliteSyncMeta::new(conn).record_upload(source, &entity.id, entity.version)
    })?;
    Ok(())
}
