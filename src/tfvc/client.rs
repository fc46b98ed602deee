//! Client seam for the TFVC server, plus the project-scoped wrapper the
//! replay engine consumes.

use std::path::Path;

use super::types::{BranchObject, Change, Changeset, ChangesetSummary, ServerItem};

#[derive(Debug)]
pub enum TfvcError {
    /// The server could not be reached at all
    Connection(String),
    /// The server answered with a failure status
    Api {
        status: u16,
        url: String,
        message: String,
    },
    /// A named object does not exist on the server
    NotFound(String),
    /// The requested operation is not available on this transport
    Unsupported(String),
    /// The server's answer did not decode
    Decode(String),
    Io(std::io::Error),
}

impl std::fmt::Display for TfvcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TfvcError::Connection(msg) => write!(f, "cannot reach the TFVC server: {msg}"),
            TfvcError::Api {
                status,
                url,
                message,
            } => {
                write!(f, "TFVC request failed with status {status} ({url})")?;
                let trimmed = message.trim();
                if !trimmed.is_empty() {
                    write!(f, ": {trimmed}")?;
                }
                Ok(())
            }
            TfvcError::NotFound(what) => write!(f, "{what} not found on the server"),
            TfvcError::Unsupported(msg) => write!(f, "{msg}"),
            TfvcError::Decode(msg) => write!(f, "unexpected TFVC response: {msg}"),
            TfvcError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for TfvcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TfvcError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TfvcError {
    fn from(err: std::io::Error) -> Self {
        TfvcError::Io(err)
    }
}

/// Remote operations the replay needs from a TFVC server.
///
/// Implemented by the REST client for real runs and by an in-memory fake in
/// the test suite.
pub trait TfvcClient {
    fn get_team_project(&self, name: &str) -> Result<ServerItem, TfvcError>;

    /// All changesets touching `project_root` with an id at or above
    /// `from_cid`. Callers must not rely on the ordering.
    fn query_history(
        &self,
        project_root: &str,
        from_cid: Option<u32>,
    ) -> Result<Vec<ChangesetSummary>, TfvcError>;

    fn get_changeset(&self, cid: u32) -> Result<Changeset, TfvcError>;

    fn get_changes(&self, cid: u32) -> Result<Vec<Change>, TfvcError>;

    /// Branch objects relevant to a server path as of the given changeset.
    fn query_branch_objects(&self, path: &str, cid: u32) -> Result<Vec<BranchObject>, TfvcError>;

    /// Download the content of `server_path` as of changeset `cid` into
    /// `dest`, returning the number of bytes written.
    fn download(&self, server_path: &str, cid: u32, dest: &Path) -> Result<u64, TfvcError>;
}

/// Project-scoped client: prefixes unrooted paths with the project root and
/// hands history to the engine sorted by creation date.
pub struct ProjectClient {
    inner: Box<dyn TfvcClient>,
    project_root: String,
}

impl ProjectClient {
    pub fn new(inner: Box<dyn TfvcClient>, project_root: String) -> Self {
        ProjectClient {
            inner,
            project_root,
        }
    }

    pub fn project_root(&self) -> &str {
        &self.project_root
    }

    fn rooted(&self, path: &str) -> String {
        if path.starts_with("$/") {
            path.to_string()
        } else {
            format!("{}/{}", self.project_root, path.trim_start_matches('/'))
        }
    }

    /// Changesets to replay, sorted by creation date ascending (ties break on
    /// the changeset id, which the server allocates monotonically).
    pub fn query_history(&self, from_cid: Option<u32>) -> Result<Vec<ChangesetSummary>, TfvcError> {
        let mut history = self.inner.query_history(&self.project_root, from_cid)?;
        history.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        Ok(history)
    }

    pub fn get_changeset(&self, cid: u32) -> Result<Changeset, TfvcError> {
        self.inner.get_changeset(cid)
    }

    pub fn get_changes(&self, cid: u32) -> Result<Vec<Change>, TfvcError> {
        self.inner.get_changes(cid)
    }

    pub fn query_branch_objects(
        &self,
        path: &str,
        cid: u32,
    ) -> Result<Vec<BranchObject>, TfvcError> {
        self.inner.query_branch_objects(&self.rooted(path), cid)
    }

    pub fn download(&self, server_path: &str, cid: u32, dest: &Path) -> Result<u64, TfvcError> {
        self.inner.download(&self.rooted(server_path), cid, dest)
    }
}
