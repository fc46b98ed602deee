//! TFVC data model: changesets, changes, and the change-type mask.

use chrono::{DateTime, FixedOffset};

bitflags::bitflags! {
    /// The per-change action mask, using the TFVC wire values. Multiple bits
    /// combine freely (`RENAME | EDIT | MERGE` is common in real histories).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChangeType: u32 {
        const ADD           = 0x0002;
        const EDIT          = 0x0004;
        const ENCODING      = 0x0008;
        const RENAME        = 0x0010;
        const DELETE        = 0x0020;
        const UNDELETE      = 0x0040;
        const BRANCH        = 0x0080;
        const MERGE         = 0x0100;
        const LOCK          = 0x0200;
        const ROLLBACK      = 0x0400;
        const SOURCE_RENAME = 0x0800;
        const TARGET_RENAME = 0x1000;
        const PROPERTY      = 0x2000;
    }
}

impl ChangeType {
    /// Parse the REST representation, a comma-separated list of lowercase
    /// flag names (`"rename, edit, merge"`). Unknown names are ignored.
    pub fn parse_list(list: &str) -> Self {
        let mut mask = ChangeType::empty();
        for name in list.split(',') {
            mask |= match name.trim() {
                "add" => ChangeType::ADD,
                "edit" => ChangeType::EDIT,
                "encoding" => ChangeType::ENCODING,
                "rename" => ChangeType::RENAME,
                "delete" => ChangeType::DELETE,
                "undelete" => ChangeType::UNDELETE,
                "branch" => ChangeType::BRANCH,
                "merge" => ChangeType::MERGE,
                "lock" => ChangeType::LOCK,
                "rollback" => ChangeType::ROLLBACK,
                "sourceRename" => ChangeType::SOURCE_RENAME,
                "targetRename" => ChangeType::TARGET_RENAME,
                "property" => ChangeType::PROPERTY,
                _ => ChangeType::empty(),
            };
        }
        mask
    }

    /// Lowercase `a+b` rendering for log lines.
    pub fn describe(self) -> String {
        let names: Vec<String> = self
            .iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect();
        if names.is_empty() {
            "none".to_string()
        } else {
            names.join("+")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    File,
    Folder,
}

/// Provenance of a Branch, Merge, or Rename operation.
#[derive(Debug, Clone)]
pub struct MergeSource {
    pub source_path: String,
    pub version_from: u32,
    pub version_to: u32,
}

/// One per-path entry inside a changeset.
#[derive(Debug, Clone)]
pub struct Change {
    pub server_path: String,
    pub item_type: ItemType,
    pub change_type: ChangeType,
    pub merge_sources: Vec<MergeSource>,
}

/// History enumeration result; details are fetched per changeset.
#[derive(Debug, Clone)]
pub struct ChangesetSummary {
    pub id: u32,
    pub created: DateTime<FixedOffset>,
}

#[derive(Debug, Clone)]
pub struct Changeset {
    pub id: u32,
    pub author: String,
    pub created: DateTime<FixedOffset>,
    pub comment: String,
}

/// A first-class branch object on the server.
#[derive(Debug, Clone)]
pub struct BranchObject {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct ServerItem {
    pub path: String,
}
