//! Anonymous-to-account migration against an in-memory remote.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{context_for, engine_for, note, owner, transient, FakeRemote};
use loam_core::db::ReadMode;
use loam_core::migration::MigrationService;
use loam_core::models::{Entity, EntityKind, MigrationState, OwnerId};
use loam_core::remote::{Backoff, RemoteError};
use loam_core::sync::{PushExit, SyncContext, SyncError};

fn service(context: &SyncContext, remote: &FakeRemote) -> MigrationService {
    MigrationService::new(context.clone(), Arc::new(remote.clone())).with_backoff(Backoff::new(1, 2))
}

/// Save anonymous notes with increasing creation times so the upload order is known.
fn seed_notes(context: &SyncContext, anon: &OwnerId, count: i64) -> Vec<Entity> {
    (1..=count)
        .map(|n| {
            let mut entity = note(anon, &format!("n{n}"));
            entity.created_at = n;
            context.store().save(&entity).unwrap()
        })
        .collect()
}

fn owners_of(context: &SyncContext, owner: &OwnerId) -> usize {
    context
        .store()
        .list_by_owner(owner, ReadMode::IncludeDeleted)
        .unwrap()
        .len()
}

#[tokio::test]
async fn migration_uploads_everything_then_hands_over_ownership() {
    let anon = owner("anon-device");
    let account = owner("account-1");
    let context = context_for(&account);
    let remote = FakeRemote::new();

    let notes = seed_notes(&context, &anon, 3);
    // The item is older than its container; containers still go first.
    let container = context
        .store()
        .save(&Entity::new(anon.clone(), EntityKind::TaskContainer, json!({ "title": "Inbox" })))
        .unwrap();
    let mut item = Entity::new(anon.clone(), EntityKind::List, json!({ "title": "Ship" }))
        .with_container(container.id);
    item.created_at = 0;
    let item = context.store().save(&item).unwrap();

    let report = service(&context, &remote).migrate(&anon).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.error, None);
    assert_eq!(report.progress.migrated, 5);
    assert_eq!(report.to_string(), "5/5 items migrated, complete");

    let uploaded = remote.entities_for(&account);
    assert_eq!(uploaded.len(), 5);
    assert!(remote.entities_for(&anon).is_empty());
    assert_eq!(remote.get(&item.id).map(|e| e.container_id), Some(Some(container.id)));

    assert_eq!(owners_of(&context, &anon), 0);
    assert_eq!(owners_of(&context, &account), 5);
    for entity in &notes {
        let local = context.store().get(&entity.id).unwrap().unwrap();
        assert_eq!(local.owner_id, account);
        assert_eq!(local.version, entity.version);
    }

    // The uploads covered every queued change.
    assert_eq!(context.queue().counts().unwrap(), (0, 0));
    let progress = context.meta().migration_progress(&anon).unwrap().unwrap();
    assert_eq!(progress.state, MigrationState::Completed);
    assert_eq!(progress.last_error, None);
}

#[tokio::test]
async fn interrupted_migration_resumes_without_reuploading() {
    let anon = owner("anon-device");
    let account = owner("account-1");
    let context = context_for(&account);
    let remote = FakeRemote::new();
    let notes = seed_notes(&context, &anon, 3);
    remote.fail_entity(notes[1].id, 1, transient());
    let migration = service(&context, &remote);

    let partial = migration.migrate(&anon).await.unwrap();
    assert!(!partial.is_complete());
    assert_eq!(partial.progress.migrated, 1);
    assert_eq!(partial.to_string(), "1/3 items migrated, retrying");
    assert_eq!(partial.error, Some(transient()));
    // Nothing is handed over until every upload is confirmed.
    assert_eq!(owners_of(&context, &anon), 3);
    assert_eq!(
        migration.progress(&anon).unwrap().map(|p| p.state),
        Some(MigrationState::InProgress)
    );

    let done = migration.migrate(&anon).await.unwrap();
    assert!(done.is_complete());
    assert_eq!(owners_of(&context, &account), 3);

    let calls_for = |entity: &Entity| {
        remote
            .calls()
            .iter()
            .filter(|call| call.entity_id == entity.id)
            .count()
    };
    assert_eq!(calls_for(&notes[0]), 1);
    assert_eq!(calls_for(&notes[1]), 2);
    assert_eq!(calls_for(&notes[2]), 1);

    // Running again after completion is a no-op.
    let again = migration.migrate(&anon).await.unwrap();
    assert!(again.is_complete());
    assert_eq!(remote.calls().len(), 4);
}

#[tokio::test]
async fn run_until_complete_retries_transient_failures() {
    let anon = owner("anon-device");
    let account = owner("account-1");
    let context = context_for(&account);
    let remote = FakeRemote::new();
    seed_notes(&context, &anon, 4);
    remote.fail_next(2, transient());

    let report = service(&context, &remote)
        .run_until_complete(&anon, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.progress.migrated, 4);
    assert_eq!(remote.entities_for(&account).len(), 4);
    assert_eq!(owners_of(&context, &account), 4);
}

#[tokio::test]
async fn permanent_failure_stops_and_keeps_local_owner() {
    let anon = owner("anon-device");
    let account = owner("account-1");
    let context = context_for(&account);
    let remote = FakeRemote::new();
    let notes = seed_notes(&context, &anon, 3);
    remote.fail_entity(
        notes[0].id,
        1,
        RemoteError::Validation {
            status: 422,
            message: "payload too large".to_string(),
        },
    );

    let report = service(&context, &remote)
        .run_until_complete(&anon, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.is_complete());
    assert!(report.error.as_ref().is_some_and(RemoteError::is_permanent));
    assert!(report.to_string().starts_with("0/3 items migrated, stopped:"));
    assert_eq!(owners_of(&context, &anon), 3);
    assert_eq!(remote.calls().len(), 1);
}

#[tokio::test]
async fn push_waits_for_migration_of_anonymous_changes() {
    let anon = owner("anon-device");
    let account = owner("account-1");
    let context = context_for(&account);
    let remote = FakeRemote::new();
    let engine = engine_for(&context, &remote);
    seed_notes(&context, &anon, 2);

    assert!(matches!(
        engine.push_now().await,
        Err(SyncError::MigrationInProgress)
    ));
    assert!(remote.calls().is_empty());
    assert_eq!(context.queue().counts().unwrap(), (2, 0));

    service(&context, &remote).migrate(&anon).await.unwrap();

    let fresh = context.store().save(&note(&account, "after sign-in")).unwrap();
    let report = engine.push_now().await.unwrap();
    assert_eq!(report.exit, PushExit::Drained);
    assert_eq!(report.acknowledged, 1);
    assert_eq!(remote.get(&fresh.id), Some(fresh));
}

#[tokio::test]
async fn edit_made_mid_migration_is_uploaded_on_resume() {
    let anon = owner("anon-device");
    let account = owner("account-1");
    let context = context_for(&account);
    let remote = FakeRemote::new();
    let notes = seed_notes(&context, &anon, 2);
    remote.fail_entity(notes[1].id, 1, transient());
    let migration = service(&context, &remote);

    let partial = migration.migrate(&anon).await.unwrap();
    assert_eq!(partial.progress.migrated, 1);

    let mut edit = notes[0].clone();
    edit.payload = json!({ "text": "edited offline" });
    let edited = context.store().save(&edit).unwrap();
    assert_eq!(edited.version, 2);

    let done = migration.migrate(&anon).await.unwrap();
    assert!(done.is_complete());

    let on_remote = remote.get(&edited.id).unwrap();
    assert_eq!(on_remote.payload, json!({ "text": "edited offline" }));
    assert_eq!(on_remote.version, 2);
    assert_eq!(on_remote.owner_id, account);
    assert_eq!(context.queue().counts().unwrap(), (0, 0));
}

#[tokio::test]
async fn migrating_into_the_same_owner_is_rejected() {
    let account = owner("account-1");
    let context = context_for(&account);
    let remote = FakeRemote::new();

    let result = service(&context, &remote).migrate(&account).await;
    assert!(matches!(result, Err(SyncError::InvalidMigration(_))));
}
