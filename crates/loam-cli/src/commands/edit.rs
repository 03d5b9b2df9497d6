use std::path::Path;

use crate::commands::common::{
    capture_editor_input_with_initial, entity_text, normalize_content,
    normalize_entity_identifier, open_database, resolve_entity, with_text, Session,
};
use crate::error::CliError;

pub fn run_edit(
    id: &str,
    content: Option<&str>,
    session: &Session,
    db_path: &Path,
) -> Result<(), CliError> {
    let normalized_id = normalize_entity_identifier(id)?;
    let db = open_database(db_path)?;
    let context = session.context(db);
    let entity = resolve_entity(context.store(), &session.owner, &normalized_id)?;
    let current = entity_text(&entity);

    let edited = match content {
        Some(content) => normalize_content(content),
        None => capture_editor_input_with_initial(&current)?,
    };
    let Some(edited) = edited else {
        return Err(CliError::EmptyEditedContent);
    };

    if edited == current {
        println!("{}", entity.id);
        return Ok(());
    }

    let mut updated = entity.clone();
    updated.payload = with_text(&entity, &edited);
    let saved = context.store().save(&updated)?;
    println!("{}", saved.id);
    Ok(())
}
