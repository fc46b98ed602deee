//! Replay state persistence.
//!
//! The whole resumable state — branch descriptors, the hash tracker, and the
//! changeset being processed — serializes to one JSON file at the output
//! root. It is written after every completed changeset and on every failure
//! path, so a multi-hour run can always pick up where it stopped.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::branches::BranchDescriptor;

pub const STATE_FILE: &str = "laststate.json";

/// `(branch, changeset) -> commit hash`, populated as each changeset commits.
/// Insertion order per branch is ascending changeset order, so the last
/// entry is always the branch's latest replayed commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashTracker {
    commits: IndexMap<String, IndexMap<u32, String>>,
}

impl HashTracker {
    pub fn get(&self, branch: &str, cid: u32) -> Option<&str> {
        self.commits.get(branch)?.get(&cid).map(String::as_str)
    }

    pub fn record(&mut self, branch: &str, cid: u32, hash: String) {
        self.commits
            .entry(branch.to_string())
            .or_default()
            .insert(cid, hash);
    }

    pub fn commit_count(&self) -> usize {
        self.commits.values().map(IndexMap::len).sum()
    }

    /// Drop every entry at or after `cid` and report, per affected branch,
    /// the latest commit that survives (`None` when the branch loses all of
    /// its history). Used by resume to roll back an interrupted changeset.
    pub fn rollback_from(&mut self, cid: u32) -> Vec<(String, Option<String>)> {
        let mut rolled_back = Vec::new();
        for (branch, commits) in &mut self.commits {
            let before = commits.len();
            commits.retain(|recorded, _| *recorded < cid);
            if commits.len() != before {
                rolled_back.push((branch.clone(), commits.values().last().cloned()));
            }
        }
        rolled_back
    }
}

/// Everything resume needs, serialized as `laststate.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayState {
    pub processed_changesets: u64,
    pub processed_items: u64,
    pub branches: Vec<BranchDescriptor>,
    pub hash_tracker: HashTracker,
    /// The changeset to (re)start from. While a changeset is being replayed
    /// this is its id; after it completes, the id of the next one.
    pub processing_cid: u32,
}

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(output_root: &Path) -> Self {
        CheckpointStore {
            path: output_root.join(STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write via a sibling temp file and rename, so a crash mid-write never
    /// leaves a truncated state file behind.
    pub fn save(&self, state: &ReplayState) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .with_context(|| format!("writing checkpoint {}", self.path.display()))
    }

    pub fn load(&self) -> anyhow::Result<Option<ReplayState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("reading checkpoint {}", self.path.display()))?;
        let state = serde_json::from_str(&json)
            .with_context(|| format!("parsing checkpoint {}", self.path.display()))?;
        Ok(Some(state))
    }
}
