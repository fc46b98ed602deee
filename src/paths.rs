//! Server-path and working-tree path handling.
//!
//! The working tree may live on a case-insensitive filesystem while the git
//! index is case-sensitive, so any path newly handed to the index must carry
//! its on-disk spelling. [`true_casing`] recovers that spelling segment by
//! segment; paths that do not exist come back unchanged.

use std::fs;
use std::path::{Path, PathBuf};

use path_slash::PathExt as _;

/// Normalize separators to `/`.
pub fn to_slash(path: &str) -> String {
    if path.contains('\\') {
        PathBuf::from(path).to_slash_lossy().into_owned()
    } else {
        path.to_string()
    }
}

/// True if `path` equals `root` or sits beneath it, compared per segment and
/// ignoring ASCII case (server paths are case-insensitive).
pub fn is_within(root: &str, path: &str) -> bool {
    let root = root.trim_end_matches('/');
    path.len() >= root.len()
        && path
            .get(..root.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(root))
        && (path.len() == root.len() || path.as_bytes()[root.len()] == b'/')
}

/// Resolve the on-disk spelling of `rel` under `root`. Each existing segment
/// is replaced by its directory-entry name (matched case-insensitively);
/// once a segment no longer exists, the remainder passes through unchanged.
pub fn true_casing(root: &Path, rel: &str) -> String {
    let mut dir = root.to_path_buf();
    let mut resolved: Vec<String> = Vec::new();
    let mut walking = true;

    for segment in rel.split('/').filter(|s| !s.is_empty()) {
        if !walking {
            resolved.push(segment.to_string());
            continue;
        }
        match on_disk_name(&dir, segment) {
            Some(actual) => {
                dir = dir.join(&actual);
                resolved.push(actual);
            }
            None => {
                walking = false;
                resolved.push(segment.to_string());
            }
        }
    }
    resolved.join("/")
}

fn on_disk_name(dir: &Path, segment: &str) -> Option<String> {
    let entries = fs::read_dir(dir).ok()?;
    let mut fallback = None;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == segment {
            return Some(name);
        }
        if fallback.is_none() && name.eq_ignore_ascii_case(segment) {
            fallback = Some(name);
        }
    }
    fallback
}

/// Canonicalize a directory path without producing Windows verbatim prefixes
/// git cannot handle. Falls back to the input when canonicalization fails.
pub fn canonical_dir(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
