//! Optional integrity verification: after a change is realized, the blob is
//! downloaded again and compared against the working tree with a
//! whitespace-insensitive diff.

use std::cell::Cell;
use std::fs;
use std::path::Path;

use anyhow::bail;
use tempfile::TempDir;

use crate::git::GitDriver;
use crate::tfvc::ProjectClient;

pub struct IntegrityVerifier {
    scratch: TempDir,
    seq: Cell<u64>,
}

impl IntegrityVerifier {
    pub fn new() -> anyhow::Result<Self> {
        Ok(IntegrityVerifier {
            scratch: TempDir::new()?,
            seq: Cell::new(0),
        })
    }

    /// Re-download `server_path@cid` and compare it with the realized file.
    ///
    /// A failed download is logged and skipped. A zero-byte download against
    /// a non-empty working file is a known server-side corruption, logged as
    /// `Failed & Ignored`. Any other mismatch is fatal.
    pub fn check(
        &self,
        client: &ProjectClient,
        git: &GitDriver,
        worktree: &Path,
        server_path: &str,
        cid: u32,
        rel_path: &str,
    ) -> anyhow::Result<()> {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        let scratch = self.scratch.path().join(format!("blob-{seq}"));

        let downloaded = match client.download(server_path, cid, &scratch) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("integrity check skipped for {server_path}@{cid}: {err}");
                return Ok(());
            }
        };

        let local = worktree.join(rel_path);
        let local_len = fs::metadata(&local).map(|m| m.len()).unwrap_or(0);
        if downloaded == 0 && local_len > 0 {
            log::warn!("integrity check Failed & Ignored for {server_path}@{cid}: zero-byte re-download");
            return Ok(());
        }

        if !git.files_identical(worktree, &scratch, &local)? {
            bail!("integrity check failed for {server_path}@{cid}: content differs from the working tree");
        }
        Ok(())
    }
}
