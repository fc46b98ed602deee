//! Change classification and intra-changeset ordering.
//!
//! The change-type mask decomposes into a canonical action through an ordered
//! table; the first row whose bits intersect the mask wins, and the row index
//! is the action's precedence within a changeset. A second table — the no-op
//! table — is the single source of truth for mask combinations the snapshot
//! model subsumes entirely.

use crate::tfvc::{Change, ChangeType, ItemType};

/// Canonical action for a change, in replay precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ChangeAction {
    Delete,
    Rename,
    Add,
    Edit,
    Merge,
    Branch,
}

const PRECEDENCE: [(ChangeType, ChangeAction); 6] = [
    (ChangeType::DELETE, ChangeAction::Delete),
    (
        ChangeType::RENAME.union(ChangeType::SOURCE_RENAME),
        ChangeAction::Rename,
    ),
    (ChangeType::ADD, ChangeAction::Add),
    // Encoding-only changes replay as edits: re-download and re-add.
    (
        ChangeType::EDIT.union(ChangeType::ENCODING),
        ChangeAction::Edit,
    ),
    (ChangeType::MERGE, ChangeAction::Merge),
    (
        ChangeType::BRANCH
            .union(ChangeType::UNDELETE)
            .union(ChangeType::ROLLBACK),
        ChangeAction::Branch,
    ),
];

/// Decode a mask into its canonical action. Masks carrying none of the
/// replayable bits (lock-only, property-only) decode to `None`.
pub fn classify(mask: ChangeType) -> Option<ChangeAction> {
    PRECEDENCE
        .iter()
        .find(|(bits, _)| mask.intersects(*bits))
        .map(|(_, action)| *action)
}

fn precedence(mask: ChangeType) -> usize {
    PRECEDENCE
        .iter()
        .position(|(bits, _)| mask.intersects(*bits))
        .unwrap_or(PRECEDENCE.len())
}

/// Why a change needs no git operation (or only a directory).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Noop {
    /// `Delete | SourceRename`: the old half of a rename; the matching
    /// Rename change removes the path via `mv`.
    RenameSourceSide,
    /// A Merge carrying no content effect; the snapshot model subsumes it.
    MergeWithoutEffect,
    /// A folder change other than Delete; the directory is created but never
    /// enters the index.
    EnsureDirectory,
    /// Folder deletion; git drops empty directories implicitly.
    FolderDelete,
}

/// The no-op table. Folder rows first, then the mask combinations.
pub fn noop_class(item_type: ItemType, mask: ChangeType) -> Option<Noop> {
    if item_type == ItemType::Folder {
        return Some(if mask.contains(ChangeType::DELETE) {
            Noop::FolderDelete
        } else {
            Noop::EnsureDirectory
        });
    }
    if mask.contains(ChangeType::DELETE | ChangeType::SOURCE_RENAME) {
        return Some(Noop::RenameSourceSide);
    }
    if mask.contains(ChangeType::MERGE)
        && !mask.intersects(
            ChangeType::EDIT
                | ChangeType::BRANCH
                | ChangeType::ADD
                | ChangeType::RENAME
                | ChangeType::DELETE
                | ChangeType::UNDELETE
                | ChangeType::ROLLBACK
                | ChangeType::ENCODING,
        )
    {
        return Some(Noop::MergeWithoutEffect);
    }
    None
}

/// Order a changeset's changes so the index never enters an impossible
/// state: action precedence first, then shallow paths before deep, then
/// lexicographic. Afterwards, any Rename whose source path is also Added in
/// the same changeset is moved in front of that Add, so the Add cannot
/// clobber the file the Rename is about to move.
pub fn sort_changes(changes: &mut Vec<Change>) {
    changes.sort_by_cached_key(|change| {
        (
            precedence(change.change_type),
            change.server_path.matches('/').count(),
            change.server_path.clone(),
        )
    });

    let mut index = 0;
    while index < changes.len() {
        let rename_over_add = classify(changes[index].change_type) == Some(ChangeAction::Rename)
            && changes[index].merge_sources.first().is_some_and(|source| {
                changes[..index].iter().any(|earlier| {
                    classify(earlier.change_type) == Some(ChangeAction::Add)
                        && earlier
                            .server_path
                            .eq_ignore_ascii_case(&source.source_path)
                })
            });
        if rename_over_add {
            let add_at = changes[..index]
                .iter()
                .position(|earlier| {
                    classify(earlier.change_type) == Some(ChangeAction::Add)
                        && changes[index].merge_sources.first().is_some_and(|s| {
                            earlier.server_path.eq_ignore_ascii_case(&s.source_path)
                        })
                })
                .expect("matching add located above");
            let rename = changes.remove(index);
            changes.insert(add_at, rename);
        }
        index += 1;
    }
}
