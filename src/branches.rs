//! Branch registry: server-path prefixes mapped to git branches, one
//! worktree per branch.
//!
//! Every branch lives in its own directory under the output root, named by
//! its slug and mirroring its server paths, so the filesystem state is always
//! inspectable and changes are realized with ordinary file operations.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::git::{GitDriver, GitError};

/// One git branch backing a server-path subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchDescriptor {
    /// Filesystem-safe slug; also the worktree directory name.
    pub name: String,
    /// The server path this branch is rooted at.
    pub server_path: String,
    /// Portion of `server_path` beyond the project root; empty for the
    /// primary branch.
    pub rewrite_prefix: String,
}

/// Mapping from server-path prefixes to branch descriptors. The primary
/// branch is registered at construction and is the catch-all for any path no
/// more specific prefix claims.
pub struct BranchRegistry {
    project_root: String,
    output_root: PathBuf,
    branches: IndexMap<String, BranchDescriptor>,
}

impl BranchRegistry {
    pub fn new(project_root: &str, output_root: &Path, primary_name: &str) -> Self {
        let project_root = project_root.trim_end_matches('/').to_string();
        let primary = BranchDescriptor {
            name: primary_name.to_string(),
            server_path: project_root.clone(),
            rewrite_prefix: String::new(),
        };
        let mut branches = IndexMap::new();
        branches.insert(project_root.clone(), primary);
        BranchRegistry {
            project_root,
            output_root: output_root.to_path_buf(),
            branches,
        }
    }

    pub fn project_root(&self) -> &str {
        &self.project_root
    }

    pub fn primary(&self) -> &BranchDescriptor {
        &self.branches[0]
    }

    pub fn get(&self, server_path: &str) -> Option<&BranchDescriptor> {
        self.branches.get(server_path.trim_end_matches('/'))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &BranchDescriptor> {
        self.branches.values()
    }

    /// Longest-prefix lookup: walk upward one segment at a time, falling back
    /// to the primary branch at the project root.
    pub fn lookup(&self, server_path: &str) -> &BranchDescriptor {
        let mut prefix = server_path.trim_end_matches('/');
        while prefix.len() >= self.project_root.len() {
            if let Some(descriptor) = self.branches.get(prefix) {
                return descriptor;
            }
            match prefix.rsplit_once('/') {
                Some((head, _)) => prefix = head,
                None => break,
            }
        }
        self.primary()
    }

    pub fn worktree_dir(&self, descriptor: &BranchDescriptor) -> PathBuf {
        self.output_root.join(&descriptor.name)
    }

    /// Register a branch for `server_path`, allocating its worktree on first
    /// use. Registration is idempotent: a path whose slug collides with an
    /// existing branch yields that branch.
    pub fn register(
        &mut self,
        server_path: &str,
        git: &GitDriver,
    ) -> Result<BranchDescriptor, GitError> {
        let (descriptor, created) = self.allocate(server_path);
        if created {
            let dir = self.output_root.join(&descriptor.name);
            if !dir.exists() {
                let primary_dir = self.output_root.join(&self.primary().name);
                git.worktree_add_orphan(&primary_dir, &dir)?;
            }
        }
        Ok(descriptor)
    }

    /// Restore descriptors from a checkpoint; their worktrees already exist
    /// on disk.
    pub fn restore(&mut self, descriptors: Vec<BranchDescriptor>) {
        for descriptor in descriptors {
            self.branches
                .insert(descriptor.server_path.clone(), descriptor);
        }
    }

    fn allocate(&mut self, server_path: &str) -> (BranchDescriptor, bool) {
        let server_path = server_path.trim_end_matches('/').to_string();
        if let Some(existing) = self.branches.get(&server_path) {
            return (existing.clone(), false);
        }
        let rewrite_prefix = server_path[self.project_root.len()..]
            .trim_matches('/')
            .to_string();
        let name = if rewrite_prefix.is_empty() {
            self.primary().name.clone()
        } else {
            rewrite_prefix.replace(['/', '.', ' '], "-")
        };
        if let Some(existing) = self.branches.values().find(|d| d.name == name) {
            return (existing.clone(), false);
        }
        let descriptor = BranchDescriptor {
            name,
            server_path: server_path.clone(),
            rewrite_prefix,
        };
        self.branches.insert(server_path, descriptor.clone());
        (descriptor, true)
    }
}
