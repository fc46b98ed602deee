//! Source resolution for changes carrying a cross-branch or cross-version
//! provenance.
//!
//! Given a merge source, the resolver locates the concrete snapshot to read
//! from: a replayed commit on the source branch, the current working tree
//! (when a preceding change in the same changeset produced the file), a
//! tombstone (the source ceased to exist), or a foreign path outside the
//! project root. Range sources walk downward from `versionTo` — a range
//! merge merges "up to and including" its latest reachable version.
//!
//! The resolver never mutates state; the intra-changeset early commit that
//! makes same-changeset cross-branch lookups succeed is the engine's job and
//! happens before the resolver is invoked.

use std::path::Path;

use anyhow::bail;

use crate::branches::BranchRegistry;
use crate::checkpoint::HashTracker;
use crate::git::GitDriver;
use crate::paths;
use crate::tfvc::MergeSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    /// A concrete historical snapshot: read `rel_path` out of `commit`.
    Commit {
        branch: String,
        cid: u32,
        commit: String,
        rel_path: String,
    },
    /// A preceding change in this changeset already produced the file on
    /// this branch; read it from the working tree.
    WorkingTree { rel_path: String },
    /// The source ceased to exist within the referenced range; the operation
    /// degrades to a local delete.
    Deleted { rel_path: String },
    /// The source lies outside the project root; the operation degrades to a
    /// plain add from the downloaded blob.
    Foreign,
}

/// The change being replayed, as the resolver needs to see it.
pub struct SourceContext<'a> {
    pub cid: u32,
    pub branch: &'a str,
    pub worktree: &'a Path,
}

pub struct SourceResolver<'a> {
    pub registry: &'a BranchRegistry,
    pub tracker: &'a HashTracker,
    pub git: &'a GitDriver,
}

impl SourceResolver<'_> {
    pub fn resolve(
        &self,
        ctx: &SourceContext<'_>,
        source: &MergeSource,
    ) -> anyhow::Result<ResolvedSource> {
        let source_path = paths::to_slash(&source.source_path);
        if !paths::is_within(self.registry.project_root(), &source_path) {
            return Ok(ResolvedSource::Foreign);
        }

        let branch = self.registry.lookup(&source_path).clone();
        let rel_path = source_path[branch.server_path.len()..]
            .trim_start_matches('/')
            .to_string();

        if source.version_to == ctx.cid
            && branch.name == ctx.branch
            && ctx.worktree.join(&rel_path).exists()
        {
            return Ok(ResolvedSource::WorkingTree { rel_path });
        }

        if source.version_from == source.version_to {
            let cid = source.version_to;
            let Some(commit) = self.tracker.get(&branch.name, cid) else {
                bail!(
                    "merge source {source_path}@{cid} has no replayed commit on branch {}",
                    branch.name
                );
            };
            return match self.probe(ctx, &branch.name, cid, commit, rel_path)? {
                Some(resolved) => Ok(resolved),
                None => bail!(
                    "merge source {source_path}@{cid} does not exist in the replayed commit on branch {}",
                    branch.name
                ),
            };
        }

        // Version range: latest reachable version within the range wins.
        for cid in (source.version_from..=source.version_to).rev() {
            let Some(commit) = self.tracker.get(&branch.name, cid) else {
                continue;
            };
            if let Some(resolved) = self.probe(ctx, &branch.name, cid, commit, rel_path.clone())? {
                return Ok(resolved);
            }
        }
        bail!(
            "merge source {source_path} is unreachable in range [{}..{}] on branch {}",
            source.version_from,
            source.version_to,
            branch.name
        );
    }

    /// Probe one replayed commit for the file. Present: that is the source.
    /// Absent but listed among the commit's changed paths: the commit
    /// removed it, so the source is a tombstone. Otherwise: not here.
    fn probe(
        &self,
        ctx: &SourceContext<'_>,
        branch: &str,
        cid: u32,
        commit: &str,
        rel_path: String,
    ) -> anyhow::Result<Option<ResolvedSource>> {
        if let Some(actual) = self.tree_entry(ctx.worktree, commit, &rel_path)? {
            return Ok(Some(ResolvedSource::Commit {
                branch: branch.to_string(),
                cid,
                commit: commit.to_string(),
                rel_path: actual,
            }));
        }
        let touched = self
            .git
            .changed_names(ctx.worktree, commit)?
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&rel_path));
        if touched {
            return Ok(Some(ResolvedSource::Deleted { rel_path }));
        }
        Ok(None)
    }

    /// Find `rel_path` in a commit's tree, case-insensitively, returning its
    /// committed spelling. The exact spelling is tried first to keep the
    /// common case to a single plumbing call.
    fn tree_entry(
        &self,
        worktree: &Path,
        commit: &str,
        rel_path: &str,
    ) -> anyhow::Result<Option<String>> {
        let exact = self.git.ls_tree_names(worktree, commit, Some(rel_path))?;
        if exact.iter().any(|name| name == rel_path) {
            return Ok(Some(rel_path.to_string()));
        }
        let all = self.git.ls_tree_names(worktree, commit, None)?;
        Ok(all
            .into_iter()
            .find(|name| name.eq_ignore_ascii_case(rel_path)))
    }
}
