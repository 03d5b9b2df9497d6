//! Last-write-wins conflict resolution for incoming remote entities.

use crate::models::{ConflictWinner, Entity};

/// What the merge step does with one incoming remote entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No local copy: insert the remote one.
    Insert,
    /// Local copy is already synced: take the remote one (still subject to the
    /// store's staleness guard).
    ApplyRemote,
    /// Racing local edit lost: drop its queue entries and take the remote copy.
    RemoteWinsConflict,
    /// Racing local edit won: keep it and its queue entries.
    LocalWinsConflict,
}

impl Resolution {
    #[must_use]
    pub const fn conflict_winner(self) -> Option<ConflictWinner> {
        match self {
            Self::RemoteWinsConflict => Some(ConflictWinner::Remote),
            Self::LocalWinsConflict => Some(ConflictWinner::Local),
            Self::Insert | Self::ApplyRemote => None,
        }
    }
}

/// Decide the fate of `incoming` given the local copy and whether that copy
/// has an unsynced edit in the queue.
///
/// Between a pending local edit and the incoming copy, the greater
/// `(updated_at, version)` wins and a full tie goes to the local side.
/// Deleted copies follow the same rule, so a newer local edit undeletes.
#[must_use]
pub fn resolve(local: Option<&Entity>, has_pending_edit: bool, incoming: &Entity) -> Resolution {
    match local {
        None => Resolution::Insert,
        Some(_) if !has_pending_edit => Resolution::ApplyRemote,
        Some(local) if incoming.precedence() > local.precedence() => {
            Resolution::RemoteWinsConflict
        }
        Some(_) => Resolution::LocalWinsConflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, OwnerId};
    use serde_json::json;

    fn at(updated_at: i64, version: i64) -> Entity {
        let mut entity = Entity::new(
            OwnerId::new("owner-1").unwrap(),
            EntityKind::Note,
            json!({ "at": updated_at }),
        );
        entity.updated_at = updated_at;
        entity.version = version;
        entity
    }

    #[test]
    fn missing_local_inserts() {
        assert_eq!(resolve(None, false, &at(1, 1)), Resolution::Insert);
    }

    #[test]
    fn synced_local_takes_remote() {
        assert_eq!(
            resolve(Some(&at(100, 5)), false, &at(90, 1)),
            Resolution::ApplyRemote
        );
    }

    #[test]
    fn pending_edit_compares_timestamp_then_version() {
        let local = at(100, 3);
        assert_eq!(
            resolve(Some(&local), true, &at(90, 9)),
            Resolution::LocalWinsConflict
        );
        assert_eq!(
            resolve(Some(&local), true, &at(110, 1)),
            Resolution::RemoteWinsConflict
        );
        assert_eq!(
            resolve(Some(&local), true, &at(100, 4)),
            Resolution::RemoteWinsConflict
        );
        assert_eq!(
            resolve(Some(&local), true, &at(100, 2)),
            Resolution::LocalWinsConflict
        );
    }

    #[test]
    fn full_tie_favors_local() {
        assert_eq!(
            resolve(Some(&at(100, 3)), true, &at(100, 3)),
            Resolution::LocalWinsConflict
        );
    }

    #[test]
    fn remote_delete_loses_to_newer_local_edit() {
        let mut incoming = at(90, 4);
        incoming.deleted = true;
        let resolution = resolve(Some(&at(100, 2)), true, &incoming);
        assert_eq!(resolution, Resolution::LocalWinsConflict);
        assert_eq!(resolution.conflict_winner(), Some(ConflictWinner::Local));
    }
}
