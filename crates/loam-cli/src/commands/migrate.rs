use std::path::Path;

use loam_core::migration::MigrationService;
use loam_core::OwnerId;
use tokio_util::sync::CancellationToken;

use crate::commands::common::{open_database, Session};
use crate::config_profiles::LOCAL_OWNER;
use crate::error::CliError;

/// Upload data created under `from` (the local anonymous owner by default)
/// to the profile's account, then hand it over locally.
pub async fn run_migrate(
    session: &Session,
    from: Option<&str>,
    once: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    if !session.has_account() {
        return Err(CliError::Migration(format!(
            "profile '{}' has no account owner; run `loam config init --owner-id <OWNER>`",
            session.profile_name
        )));
    }
    let source = OwnerId::new(from.unwrap_or(LOCAL_OWNER))?;

    let remote = session.remote()?;
    let db = open_database(db_path)?;
    let service = MigrationService::new(session.context(db), remote);

    let report = if once {
        service.migrate(&source).await?
    } else {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });
        let report = service.run_until_complete(&source, &cancel).await;
        interrupt.abort();
        report?
    };

    println!("{report}");
    if report.is_complete() {
        println!("Run `loam sync` to bring this device up to date with the account.");
        Ok(())
    } else {
        Err(CliError::Migration(
            "migration did not complete; run `loam migrate` again to resume".to_string(),
        ))
    }
}
