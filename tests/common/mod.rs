// Helpers are shared across the integration test binaries; not every binary
// uses every helper, so allow dead_code at the module level.
#![allow(dead_code)]

//! Test harness: an in-memory TFVC server built from declarative changeset
//! fixtures, plus direct git invocation for asserting on the produced
//! repositories.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use chrono::{DateTime, FixedOffset, TimeZone as _};

use tfvc2git::MigrationConfig;
use tfvc2git::tfvc::{
    BranchObject, Change, ChangeType, Changeset, ChangesetSummary, ItemType, MergeSource,
    ServerItem, TfvcClient, TfvcError,
};

/// Deterministic creation timestamp: one minute per changeset id, fixed
/// +02:00 offset.
pub fn created(id: u32) -> DateTime<FixedOffset> {
    let base = FixedOffset::east_opt(7200)
        .unwrap()
        .with_ymd_and_hms(2016, 7, 13, 12, 0, 0)
        .unwrap();
    base + chrono::Duration::minutes(i64::from(id))
}

pub struct FakeChangeset {
    pub id: u32,
    pub author: String,
    pub comment: String,
    pub changes: Vec<Change>,
}

/// What the fake server does when a file is downloaded a second time for the
/// same changeset (the integrity verifier's re-download).
#[derive(Clone, Copy)]
pub enum RedownloadQuirk {
    /// Serve zero bytes, like a known server-side corruption.
    Blank,
    /// Fail the request.
    Fail,
    /// Serve different content.
    Corrupt,
}

/// In-memory TFVC server. Content is versioned per path; downloads resolve
/// to the latest version at or below the requested changeset, like the real
/// server does.
#[derive(Default)]
pub struct FakeTfvc {
    changesets: Vec<FakeChangeset>,
    contents: HashMap<String, Vec<(u32, Vec<u8>)>>,
    branch_objects: Vec<(String, u32)>,
    poison_download: RefCell<Option<(String, u32)>>,
    redownload_quirks: HashMap<(String, u32), RedownloadQuirk>,
    downloads_seen: RefCell<HashMap<(String, u32), u32>>,
}

impl FakeTfvc {
    pub fn new() -> Self {
        FakeTfvc::default()
    }

    pub fn changeset(&mut self, id: u32, author: &str, comment: &str, changes: Vec<Change>) {
        self.changesets.push(FakeChangeset {
            id,
            author: author.to_string(),
            comment: comment.to_string(),
            changes,
        });
    }

    pub fn content(&mut self, path: &str, cid: u32, bytes: &str) {
        self.contents
            .entry(path.to_ascii_lowercase())
            .or_default()
            .push((cid, bytes.as_bytes().to_vec()));
    }

    pub fn branch_object(&mut self, path: &str, created_at: u32) {
        self.branch_objects.push((path.to_string(), created_at));
    }

    /// Make the next download of `path@cid` fail once.
    pub fn poison_download(&self, path: &str, cid: u32) {
        *self.poison_download.borrow_mut() = Some((path.to_ascii_lowercase(), cid));
    }

    /// Misbehave on the second and later downloads of `path@cid`.
    pub fn quirk_redownload(&mut self, path: &str, cid: u32, quirk: RedownloadQuirk) {
        self.redownload_quirks
            .insert((path.to_ascii_lowercase(), cid), quirk);
    }
}

fn prefix_of(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    path.len() >= prefix.len()
        && path[..prefix.len()].eq_ignore_ascii_case(prefix)
        && (path.len() == prefix.len() || path.as_bytes()[prefix.len()] == b'/')
}

impl TfvcClient for FakeTfvc {
    fn get_team_project(&self, name: &str) -> Result<ServerItem, TfvcError> {
        Ok(ServerItem {
            path: format!("$/{name}"),
        })
    }

    fn query_history(
        &self,
        project_root: &str,
        from_cid: Option<u32>,
    ) -> Result<Vec<ChangesetSummary>, TfvcError> {
        let from = from_cid.unwrap_or(0);
        let mut summaries: Vec<ChangesetSummary> = self
            .changesets
            .iter()
            .filter(|cs| cs.id >= from)
            .filter(|cs| {
                cs.changes
                    .iter()
                    .any(|c| prefix_of(project_root, &c.server_path))
            })
            .map(|cs| ChangesetSummary {
                id: cs.id,
                created: created(cs.id),
            })
            .collect();
        // The real server enumerates newest-first; the wrapper must sort.
        summaries.reverse();
        Ok(summaries)
    }

    fn get_changeset(&self, cid: u32) -> Result<Changeset, TfvcError> {
        self.changesets
            .iter()
            .find(|cs| cs.id == cid)
            .map(|cs| Changeset {
                id: cs.id,
                author: cs.author.clone(),
                created: created(cs.id),
                comment: cs.comment.clone(),
            })
            .ok_or_else(|| TfvcError::NotFound(format!("changeset {cid}")))
    }

    fn get_changes(&self, cid: u32) -> Result<Vec<Change>, TfvcError> {
        self.changesets
            .iter()
            .find(|cs| cs.id == cid)
            .map(|cs| cs.changes.clone())
            .ok_or_else(|| TfvcError::NotFound(format!("changeset {cid}")))
    }

    fn query_branch_objects(&self, path: &str, cid: u32) -> Result<Vec<BranchObject>, TfvcError> {
        Ok(self
            .branch_objects
            .iter()
            .filter(|(branch_path, created_at)| *created_at <= cid && prefix_of(branch_path, path))
            .map(|(branch_path, _)| BranchObject {
                path: branch_path.clone(),
            })
            .collect())
    }

    fn download(&self, server_path: &str, cid: u32, dest: &Path) -> Result<u64, TfvcError> {
        let key = server_path.to_ascii_lowercase();
        if self
            .poison_download
            .borrow()
            .as_ref()
            .is_some_and(|(path, at)| *path == key && *at == cid)
        {
            self.poison_download.borrow_mut().take();
            return Err(TfvcError::Connection(
                "injected download failure".to_string(),
            ));
        }
        let seen = {
            let mut counts = self.downloads_seen.borrow_mut();
            let entry = counts.entry((key.clone(), cid)).or_insert(0);
            *entry += 1;
            *entry
        };
        if seen > 1 {
            match self.redownload_quirks.get(&(key.clone(), cid)) {
                Some(RedownloadQuirk::Blank) => {
                    std::fs::write(dest, b"")?;
                    return Ok(0);
                }
                Some(RedownloadQuirk::Fail) => {
                    return Err(TfvcError::Connection(
                        "injected re-download failure".to_string(),
                    ));
                }
                Some(RedownloadQuirk::Corrupt) => {
                    std::fs::write(dest, b"CORRUPTED")?;
                    return Ok(9);
                }
                None => {}
            }
        }
        let versions = self
            .contents
            .get(&key)
            .ok_or_else(|| TfvcError::NotFound(format!("{server_path}@{cid}")))?;
        let bytes = versions
            .iter()
            .filter(|(version, _)| *version <= cid)
            .max_by_key(|(version, _)| *version)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| TfvcError::NotFound(format!("{server_path}@{cid}")))?;
        std::fs::write(dest, &bytes)?;
        Ok(bytes.len() as u64)
    }
}

// Change constructors

pub fn file(path: &str, mask: ChangeType) -> Change {
    Change {
        server_path: path.to_string(),
        item_type: ItemType::File,
        change_type: mask,
        merge_sources: vec![],
    }
}

pub fn folder(path: &str, mask: ChangeType) -> Change {
    Change {
        server_path: path.to_string(),
        item_type: ItemType::Folder,
        change_type: mask,
        merge_sources: vec![],
    }
}

pub fn sourced(mut change: Change, source_path: &str, from: u32, to: u32) -> Change {
    change.merge_sources.push(MergeSource {
        source_path: source_path.to_string(),
        version_from: from,
        version_to: to,
    });
    change
}

// Migration driving

pub fn config_for(out: &Path) -> MigrationConfig {
    MigrationConfig {
        endpoint: "http://tfs.local/DefaultCollection".to_string(),
        project: "$/P".to_string(),
        output_dir: out.to_path_buf(),
        primary_branch: "main".to_string(),
        from_cid: None,
        with_integrity_check: false,
        resume: false,
        git_binary: "git".into(),
        log_path: None,
    }
}

pub fn migrate(fake: FakeTfvc, out: &Path) -> anyhow::Result<()> {
    tfvc2git::run(config_for(out), Box::new(fake))
}

// Git assertions

/// Run git in a produced worktree, isolated from host configuration, and
/// return stdout. Panics on failure so assertions stay terse.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let null_config = if cfg!(windows) { "NUL" } else { "/dev/null" };
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_CONFIG_GLOBAL", null_config)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("LC_ALL", "C")
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Commit subjects, newest first.
pub fn subjects(dir: &Path) -> Vec<String> {
    git(dir, &["log", "--format=%s"])
        .lines()
        .map(str::to_owned)
        .collect()
}

pub fn tree_hash(dir: &Path) -> String {
    git(dir, &["rev-parse", "HEAD^{tree}"]).trim().to_string()
}

pub fn head_hash(dir: &Path) -> String {
    git(dir, &["rev-parse", "HEAD"]).trim().to_string()
}

pub fn blob(dir: &Path, spec: &str) -> String {
    git(dir, &["show", spec])
}

pub fn tracked_files(dir: &Path) -> Vec<String> {
    git(dir, &["ls-tree", "-r", "--name-only", "HEAD"])
        .lines()
        .map(str::to_owned)
        .collect()
}
