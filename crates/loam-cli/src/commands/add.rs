use std::path::Path;

use loam_core::{Entity, EntityKind};

use crate::commands::common::{
    normalize_entity_identifier, open_database, payload_for, resolve_content, resolve_entity,
    Session,
};
use crate::error::CliError;

pub fn run_add(
    kind: EntityKind,
    container: Option<&str>,
    content_parts: &[String],
    session: &Session,
    db_path: &Path,
) -> Result<(), CliError> {
    let content = resolve_content(content_parts)?;

    let db = open_database(db_path)?;
    let context = session.context(db);
    let mut entity = Entity::new(session.owner.clone(), kind, payload_for(kind, &content));
    if let Some(query) = container {
        let query = normalize_entity_identifier(query)?;
        let container = resolve_entity(context.store(), &session.owner, &query)?;
        entity = entity.with_container(container.id);
    }

    let saved = context.store().save(&entity)?;
    println!("{}", saved.id);
    Ok(())
}
