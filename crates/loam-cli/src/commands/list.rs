use std::path::Path;

use loam_core::db::ReadMode;
use loam_core::EntityKind;

use crate::commands::common::{
    entity_to_list_item, format_entity_lines, normalize_entity_identifier, open_database,
    resolve_entity, EntityListItem, Session,
};
use crate::error::CliError;

pub struct ListOptions<'a> {
    pub limit: usize,
    pub kind: Option<EntityKind>,
    pub container: Option<&'a str>,
    pub include_deleted: bool,
    pub as_json: bool,
}

pub fn run_list(options: &ListOptions<'_>, session: &Session, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let context = session.context(db);
    let store = context.store();
    let mode = if options.include_deleted {
        ReadMode::IncludeDeleted
    } else {
        ReadMode::ExcludeDeleted
    };

    let entities = match options.container {
        Some(query) => {
            let query = normalize_entity_identifier(query)?;
            let container = resolve_entity(store, &session.owner, &query)?;
            store.list_by_container(&container.id, mode)?
        }
        None => store.list_by_owner(&session.owner, mode)?,
    };
    let entities = entities
        .into_iter()
        .filter(|entity| options.kind.map_or(true, |kind| entity.kind == kind))
        .take(options.limit)
        .collect::<Vec<_>>();

    if options.as_json {
        let json_items = entities
            .iter()
            .map(entity_to_list_item)
            .collect::<Vec<EntityListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_entity_lines(&entities) {
            println!("{line}");
        }
    }

    Ok(())
}
