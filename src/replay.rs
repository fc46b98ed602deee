//! The changeset replay engine.
//!
//! Streams changesets in chronological order, dispatches each change into
//! the right branch worktree, and closes every touched branch out with one
//! commit carrying the changeset's author, dates, and comment. Progress is
//! checkpointed after every changeset and on every failure path, so an
//! interrupted run resumes where it stopped.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use indexmap::IndexSet;

use crate::branches::{BranchDescriptor, BranchRegistry};
use crate::checkpoint::{CheckpointStore, HashTracker, ReplayState};
use crate::classify::{self, Noop};
use crate::config::MigrationConfig;
use crate::git::{CommitSignature, GitDriver};
use crate::paths;
use crate::source::{ResolvedSource, SourceContext, SourceResolver};
use crate::tfvc::{Change, ChangeType, Changeset, ProjectClient, TfvcClient};
use crate::verify::IntegrityVerifier;

/// Run a migration end to end. State is checkpointed on every exit path.
pub fn run(config: MigrationConfig, client: Box<dyn TfvcClient>) -> anyhow::Result<()> {
    let project_root = if config.project.starts_with("$/") {
        paths::to_slash(&config.project)
            .trim_end_matches('/')
            .to_string()
    } else {
        client
            .get_team_project(&config.project)
            .with_context(|| format!("looking up team project '{}'", config.project))?
            .path
    };
    log::info!("migrating {} into {}", project_root, config.output_dir.display());

    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating {}", config.output_dir.display()))?;
    let out_dir = paths::canonical_dir(&config.output_dir);

    let git = GitDriver::new(&config.git_binary, &out_dir);
    git.write_run_config()?;
    let store = CheckpointStore::new(&out_dir);
    let client = ProjectClient::new(client, project_root.clone());
    let mut registry = BranchRegistry::new(&project_root, &out_dir, &config.primary_branch);
    let primary_dir = out_dir.join(&config.primary_branch);

    let mut tracker = HashTracker::default();
    let mut processed_changesets = 0u64;
    let mut processed_items = 0u64;
    let mut from_cid = config.from_cid;

    if config.resume {
        let state = store.load()?.with_context(|| {
            format!("--resume given but {} does not exist", store.path().display())
        })?;
        registry.restore(state.branches);
        tracker = state.hash_tracker;
        processed_changesets = state.processed_changesets;
        processed_items = state.processed_items;
        if state.processing_cid > 0 {
            from_cid = Some(state.processing_cid);
            for (branch, surviving) in tracker.rollback_from(state.processing_cid) {
                let dir = out_dir.join(&branch);
                match surviving {
                    Some(hash) => {
                        git.reset_hard(&dir, Some(&hash))?;
                        git.clean_untracked(&dir)?;
                    }
                    None => git.clear_branch(&dir, &branch)?,
                }
                log::warn!(
                    "rolled back partial commit on {branch} from interrupted changeset {}",
                    state.processing_cid
                );
            }
        }
        let dirty = git.status_porcelain(&primary_dir)?;
        if !dirty.is_empty() {
            log::info!("discarding {} leftover working-tree entries", dirty.len());
        }
        if git.rev_parse_head(&primary_dir).is_ok() {
            git.reset_hard(&primary_dir, None)?;
        }
        git.clean_untracked(&primary_dir)?;
        git.pack_refs(&primary_dir)?;
        log::info!("resuming from changeset {}", from_cid.unwrap_or(1));
    } else {
        if store.path().exists() || primary_dir.join(".git").exists() {
            bail!(
                "{} already contains a migration; pass --resume to continue it",
                out_dir.display()
            );
        }
        git.init_repo(&primary_dir, &config.primary_branch)?;
    }

    let verifier = if config.with_integrity_check {
        Some(IntegrityVerifier::new()?)
    } else {
        None
    };

    let mut session = ReplaySession {
        out_dir,
        client,
        git,
        registry,
        tracker,
        store,
        verifier,
        processed_changesets,
        processed_items,
        processing_cid: from_cid.unwrap_or(0),
    };

    let result = session.replay(from_cid);
    if result.is_err() {
        session.verifier = None;
    }
    if let Err(err) = session.checkpoint() {
        log::warn!("failed to write the final checkpoint: {err:#}");
    }
    result
}

/// All mutable replay state, threaded explicitly; nothing in the crate is
/// process-global.
pub struct ReplaySession {
    out_dir: PathBuf,
    client: ProjectClient,
    git: GitDriver,
    registry: BranchRegistry,
    tracker: HashTracker,
    store: CheckpointStore,
    verifier: Option<IntegrityVerifier>,
    processed_changesets: u64,
    processed_items: u64,
    processing_cid: u32,
}

impl ReplaySession {
    fn replay(&mut self, from_cid: Option<u32>) -> anyhow::Result<()> {
        let history = self.client.query_history(from_cid)?;
        if history.is_empty() {
            log::info!("no changesets to replay");
            return Ok(());
        }
        log::info!("replaying {} changesets", history.len());

        for summary in history {
            self.processing_cid = summary.id;
            self.process_changeset(summary.id)
                .with_context(|| format!("replaying changeset {}", summary.id))?;
            self.processed_changesets += 1;
            self.processing_cid = summary.id + 1;
            self.checkpoint()?;
        }
        log::info!(
            "replay complete: {} changesets, {} changes, {} commits",
            self.processed_changesets,
            self.processed_items,
            self.tracker.commit_count()
        );
        Ok(())
    }

    fn process_changeset(&mut self, cid: u32) -> anyhow::Result<()> {
        let changeset = self.client.get_changeset(cid)?;
        let mut changes = self.client.get_changes(cid)?;
        classify::sort_changes(&mut changes);
        log::debug!("changeset {cid}: {} changes", changes.len());

        let mut touched: IndexSet<String> = IndexSet::new();
        for change in &changes {
            self.apply_change(&changeset, change, &mut touched)
                .with_context(|| {
                    format!(
                        "applying {} ({})",
                        change.server_path,
                        change.change_type.describe()
                    )
                })?;
            self.processed_items += 1;
        }
        for branch in touched {
            self.commit_branch(&branch, &changeset)?;
        }
        Ok(())
    }

    fn apply_change(
        &mut self,
        changeset: &Changeset,
        change: &Change,
        touched: &mut IndexSet<String>,
    ) -> anyhow::Result<()> {
        let root = self.client.project_root().to_string();
        let path = paths::to_slash(&change.server_path);
        if path.eq_ignore_ascii_case(&root) {
            return Ok(());
        }
        if !paths::is_within(&root, &path) {
            log::warn!("skipping change outside the project root: {path}");
            return Ok(());
        }

        let descriptor = self.branch_for(&path, changeset.id)?;
        let dir = self.out_dir.join(&descriptor.name);
        let rel = path[descriptor.server_path.len()..]
            .trim_start_matches('/')
            .to_string();
        let mask = change.change_type;

        match classify::noop_class(change.item_type, mask) {
            Some(Noop::EnsureDirectory) => {
                fs::create_dir_all(dir.join(&rel))?;
                return Ok(());
            }
            Some(kind) => {
                log::debug!("{path}: {} is a no-op ({kind:?})", mask.describe());
                return Ok(());
            }
            None => {}
        }
        let Some(action) = classify::classify(mask) else {
            log::debug!("{path}: nothing to replay for {}", mask.describe());
            return Ok(());
        };
        log::debug!("{path}: {action} on {}", descriptor.name);
        touched.insert(descriptor.name.clone());

        let mut ensure_deleted = false;
        let mut force_add = false;
        let mut realized = false;

        if let Some(source) = change.merge_sources.first() {
            if change.merge_sources.len() > 1 {
                log::warn!(
                    "{path}: {} merge sources; using the first",
                    change.merge_sources.len()
                );
            }
            self.early_commit_for(changeset, source, &descriptor.name, touched)?;

            let resolver = SourceResolver {
                registry: &self.registry,
                tracker: &self.tracker,
                git: &self.git,
            };
            let ctx = SourceContext {
                cid: changeset.id,
                branch: &descriptor.name,
                worktree: &dir,
            };
            match resolver.resolve(&ctx, source)? {
                ResolvedSource::Foreign => {
                    log::warn!(
                        "{path}: merge source {} is outside the project root; treating as a plain add",
                        source.source_path
                    );
                    force_add = true;
                }
                ResolvedSource::Deleted { .. } => {
                    log::debug!(
                        "{path}: merge source ceased to exist; deleting the target instead"
                    );
                    ensure_deleted = true;
                }
                ResolvedSource::WorkingTree { rel_path } => {
                    if rel_path != rel {
                        ensure_parent(&dir.join(&rel))?;
                        self.git.mv(&dir, &rel_path, &rel)?;
                    }
                    realized = true;
                }
                ResolvedSource::Commit {
                    branch: source_branch,
                    commit,
                    rel_path,
                    ..
                } => {
                    let backup_head = self.git.rev_parse_head(&dir).ok();
                    self.git.checkout_file(&dir, &commit, &rel_path)?;
                    if rel_path != rel {
                        ensure_parent(&dir.join(&rel))?;
                        self.git.mv(&dir, &rel_path, &rel)?;
                        // The checkout may have clobbered this branch's own
                        // file at the source path; put it back. Restoring is
                        // only correct for cross-branch sources — on the same
                        // branch the source path is the rename's old name,
                        // which must stay gone.
                        if source_branch != descriptor.name
                            && !rel_path.eq_ignore_ascii_case(&rel)
                            && let Some(head) = backup_head
                            && self.tree_entry(&dir, &head, &rel_path)?.is_some()
                        {
                            self.git.checkout_file(&dir, &head, &rel_path)?;
                        }
                    }
                    realized = true;
                }
            }
        } else if mask
            .intersects(ChangeType::BRANCH | ChangeType::UNDELETE | ChangeType::ROLLBACK)
        {
            // Branched, undeleted, or rolled back without a usable source:
            // the server blob is the only place the content exists.
            force_add = true;
        }

        if !ensure_deleted
            && (force_add
                || mask.intersects(
                    ChangeType::ADD
                        | ChangeType::EDIT
                        | ChangeType::ENCODING
                        | ChangeType::RENAME,
                ))
        {
            // Resolve the on-disk spelling first so existing directory and
            // file casing wins over the server's spelling of the path.
            let cased = paths::true_casing(&dir, &rel);
            let dest = dir.join(&cased);
            ensure_parent(&dest)?;
            self.client.download(&path, changeset.id, &dest)?;
            self.git.add(&dir, &cased, force_add)?;
            realized = true;
        }

        if ensure_deleted || (mask.contains(ChangeType::DELETE) && !mask.contains(ChangeType::SOURCE_RENAME)) {
            match self.head_entry(&dir, &rel)? {
                Some(tracked) => self.git.rm(&dir, &tracked)?,
                None if ensure_deleted => {
                    log::debug!("{path}: already absent, nothing to delete");
                }
                None => bail!(
                    "delete of {path} at changeset {}, but the file is not tracked",
                    changeset.id
                ),
            }
            realized = false;
        }

        if realized && let Some(verifier) = &self.verifier {
            let local = paths::true_casing(&dir, &rel);
            verifier.check(&self.client, &self.git, &dir, &path, changeset.id, &local)?;
        }
        Ok(())
    }

    /// Close out the source branch's commit early when a change references
    /// the current changeset on another branch that has not committed yet.
    /// Without this, the resolver could not find a commit hash for the
    /// source, and the checkout would have nothing to read from.
    fn early_commit_for(
        &mut self,
        changeset: &Changeset,
        source: &crate::tfvc::MergeSource,
        current_branch: &str,
        touched: &mut IndexSet<String>,
    ) -> anyhow::Result<()> {
        let source_path = paths::to_slash(&source.source_path);
        if !paths::is_within(self.registry.project_root(), &source_path) {
            return Ok(());
        }
        let source_branch = self.registry.lookup(&source_path).name.clone();
        if source.version_to == changeset.id
            && source_branch != current_branch
            && self.tracker.get(&source_branch, changeset.id).is_none()
            && touched.shift_remove(&source_branch)
        {
            log::debug!(
                "early commit on {source_branch}: cross-branch reference within changeset {}",
                changeset.id
            );
            self.commit_branch(&source_branch, changeset)?;
        }
        Ok(())
    }

    /// Map a server path to its branch, registering a descriptor (and
    /// allocating a worktree) when the server has a branch object this
    /// registry has not seen yet.
    fn branch_for(&mut self, path: &str, cid: u32) -> anyhow::Result<BranchDescriptor> {
        let objects = self.client.query_branch_objects(path, cid)?;
        let root = self.registry.project_root().to_string();
        let candidate = objects
            .iter()
            .map(|o| paths::to_slash(&o.path).trim_end_matches('/').to_string())
            .filter(|p| {
                paths::is_within(&root, p)
                    && paths::is_within(p, path)
                    && !p.eq_ignore_ascii_case(&root)
            })
            .max_by_key(String::len);
        if let Some(server_path) = candidate
            && self.registry.get(&server_path).is_none()
        {
            let descriptor = self.registry.register(&server_path, &self.git)?;
            log::info!("new branch {} for {}", descriptor.name, server_path);
        }
        Ok(self.registry.lookup(path).clone())
    }

    fn commit_branch(&mut self, branch: &str, changeset: &Changeset) -> anyhow::Result<()> {
        let dir = self.out_dir.join(branch);
        self.git.add_all(&dir)?;

        // The comment goes through a file so multi-line text and special
        // characters survive untouched.
        let message = format!("{} [CVCS-{}]", changeset.comment, changeset.id);
        let mut message_file = tempfile::NamedTempFile::new()?;
        message_file.write_all(message.as_bytes())?;
        message_file.flush()?;

        let signature = CommitSignature::new(&changeset.author, changeset.created);
        self.git.commit(&dir, message_file.path(), &signature)?;

        let hash = self.git.rev_parse_head(&dir)?;
        log::info!(
            "{branch} @ CVCS-{} -> {}",
            changeset.id,
            &hash[..12.min(hash.len())]
        );
        self.tracker.record(branch, changeset.id, hash);
        Ok(())
    }

    /// Locate `rel` in the branch's HEAD tree, case-insensitively, returning
    /// the committed spelling. `None` when HEAD is unborn or the path is not
    /// tracked.
    fn head_entry(&self, dir: &Path, rel: &str) -> anyhow::Result<Option<String>> {
        if self.git.rev_parse_head(dir).is_err() {
            return Ok(None);
        }
        self.tree_entry(dir, "HEAD", rel)
    }

    fn tree_entry(
        &self,
        dir: &Path,
        commit: &str,
        rel: &str,
    ) -> anyhow::Result<Option<String>> {
        let exact = self.git.ls_tree_names(dir, commit, Some(rel))?;
        if exact.iter().any(|name| name == rel) {
            return Ok(Some(rel.to_string()));
        }
        let all = self.git.ls_tree_names(dir, commit, None)?;
        Ok(all.into_iter().find(|name| name.eq_ignore_ascii_case(rel)))
    }

    fn checkpoint(&self) -> anyhow::Result<()> {
        let state = ReplayState {
            processed_changesets: self.processed_changesets,
            processed_items: self.processed_items,
            branches: self.registry.descriptors().cloned().collect(),
            hash_tracker: self.tracker.clone(),
            processing_cid: self.processing_cid,
        };
        self.store.save(&state)
    }
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}
