use std::path::Path;

use crate::commands::common::{normalize_entity_identifier, open_database, resolve_entity, Session};
use crate::error::CliError;

pub fn run_delete(id: &str, session: &Session, db_path: &Path) -> Result<(), CliError> {
    let normalized_id = normalize_entity_identifier(id)?;
    let db = open_database(db_path)?;
    let context = session.context(db);
    let entity = resolve_entity(context.store(), &session.owner, &normalized_id)?;

    context.store().delete(&entity.id)?;
    println!("{}", entity.id);
    Ok(())
}
