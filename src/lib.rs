//! Replay a TFVC changeset history into a Git repository.
//!
//! The replay preserves linear history, per-change authorship, timestamps,
//! commit messages, branch topology, and file content bit-for-bit. Each
//! discovered branch lives in its own worktree under the output directory,
//! and progress is checkpointed so an interrupted run can resume.
//!
//! The library API exists for the `tfvc2git` binary and the test suite; it
//! is not a stable interface.

pub mod branches;
pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod git;
pub mod paths;
pub mod replay;
pub mod source;
pub mod tfvc;
pub mod verify;

pub use config::{AuthMethod, Credential, MigrationConfig};
pub use replay::run;
