//! Git error types and formatting

#[derive(Debug)]
pub enum GitError {
    /// The git binary could not be spawned at all
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// Git ran and exited with a non-zero status
    Exited {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    /// Git produced output we could not make sense of
    Parse(String),
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitError::Spawn { command, source } => {
                write!(f, "failed to run {command}: {source}")
            }
            GitError::Exited {
                command,
                code,
                stderr,
            } => {
                match code {
                    Some(code) => write!(f, "{command} exited with code {code}")?,
                    None => write!(f, "{command} was killed by a signal")?,
                }
                let trimmed = stderr.trim();
                if !trimmed.is_empty() {
                    write!(f, ": {trimmed}")?;
                }
                Ok(())
            }
            GitError::Parse(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for GitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GitError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}
