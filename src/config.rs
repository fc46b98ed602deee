//! Flat run configuration and the authentication selector.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// How to authenticate against the TFVC server.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Platform-integrated authentication, optionally with an explicit
    /// credential.
    Integrated(Option<Credential>),
    /// Basic authentication; a personal access token goes in the password.
    Basic(Credential),
    /// Bearer token.
    Token(String),
}

/// Everything a migration run needs, as one explicit record.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Collection URL, e.g. `https://tfs.example.com/DefaultCollection`.
    pub endpoint: String,
    /// Team project name or a `$/…` server path to use as the project root.
    pub project: String,
    pub output_dir: PathBuf,
    /// Name of the branch backing the project root.
    pub primary_branch: String,
    /// First changeset to replay; `None` replays from the beginning.
    pub from_cid: Option<u32>,
    pub with_integrity_check: bool,
    pub resume: bool,
    pub git_binary: PathBuf,
    pub log_path: Option<PathBuf>,
}
