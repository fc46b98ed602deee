//! Process-invocation layer over the git binary.
//!
//! Every plumbing call runs the configured git executable in the worktree it
//! targets and comes back as a [`GitOutput`] (stdout lines, stderr lines,
//! exit code). Stderr is classified three ways: `warning:` lines are logged
//! and ignored, a narrow table of transient failures earns exactly one retry,
//! and everything else on a failing exit becomes a [`GitError`].
//!
//! The driver never touches host git configuration: each invocation pins
//! `GIT_CONFIG_GLOBAL` to a config file owned by this run and sets
//! `GIT_CONFIG_NOSYSTEM`, so the repository behaves identically on every
//! machine that replays or resumes the migration.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};

use super::GitError;

/// Stderr substrings that indicate a transient failure worth one retry.
/// Keep this list narrow; a broad match would mask real errors.
const TRANSIENT_PATTERNS: &[&str] = &[
    "unable to write new index file",
    "Resource temporarily unavailable",
    "failed to run pack-refs",
];

const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Per-run configuration written to the isolated config file.
const RUN_CONFIG: &[(&str, &str)] = &[
    ("core.autocrlf", "false"),
    ("core.longpaths", "true"),
    ("core.ignorecase", "true"),
    ("core.quotepath", "false"),
    ("safe.directory", "*"),
];

/// Captured result of one git invocation.
#[derive(Debug)]
pub struct GitOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub code: Option<i32>,
}

impl GitOutput {
    fn from_output(output: std::process::Output) -> Self {
        let lines = |bytes: &[u8]| {
            String::from_utf8_lossy(bytes)
                .lines()
                .map(str::to_owned)
                .collect()
        };
        GitOutput {
            stdout: lines(&output.stdout),
            stderr: lines(&output.stderr),
            code: output.status.code(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn is_transient(&self) -> bool {
        self.stderr
            .iter()
            .any(|line| TRANSIENT_PATTERNS.iter().any(|p| line.contains(p)))
    }
}

/// Authoring metadata for a single commit.
///
/// Applied as environment variables scoped to the one `commit` child process,
/// so no global state needs clearing on any exit path. The email is the
/// display name with spaces replaced by dots, matching what the changeset
/// history carries.
#[derive(Debug, Clone)]
pub struct CommitSignature {
    pub name: String,
    pub email: String,
    pub when: DateTime<FixedOffset>,
}

impl CommitSignature {
    pub fn new(display_name: &str, when: DateTime<FixedOffset>) -> Self {
        let name = display_name.trim().to_string();
        CommitSignature {
            email: name.replace(' ', "."),
            name,
            when,
        }
    }

    fn env(&self) -> Vec<(&'static str, String)> {
        let date = self.when.to_rfc3339();
        vec![
            ("GIT_AUTHOR_NAME", self.name.clone()),
            ("GIT_AUTHOR_EMAIL", self.email.clone()),
            ("GIT_AUTHOR_DATE", date.clone()),
            ("GIT_COMMITTER_NAME", self.name.clone()),
            ("GIT_COMMITTER_EMAIL", self.email.clone()),
            ("GIT_COMMITTER_DATE", date),
        ]
    }
}

/// Driver for the git plumbing verbs the replay needs.
#[derive(Debug, Clone)]
pub struct GitDriver {
    git: PathBuf,
    config_file: PathBuf,
}

impl GitDriver {
    pub fn new(git: impl Into<PathBuf>, output_root: &Path) -> Self {
        GitDriver {
            git: git.into(),
            config_file: output_root.join("tfvc2git.gitconfig"),
        }
    }

    /// Write the per-run configuration. Called once before any repository
    /// work; the file doubles as the global config for every invocation.
    pub fn write_run_config(&self) -> Result<(), GitError> {
        let dir = self
            .config_file
            .parent()
            .unwrap_or(Path::new("."))
            .to_path_buf();
        let file = self.config_file.to_string_lossy().into_owned();
        for (key, value) in RUN_CONFIG {
            self.run(&dir, &["config", "--file", &file, key, value])?;
        }
        Ok(())
    }

    pub fn init_repo(&self, dir: &Path, initial_branch: &str) -> Result<(), GitError> {
        std::fs::create_dir_all(dir).map_err(|e| GitError::Spawn {
            command: format!("mkdir {}", dir.display()),
            source: e,
        })?;
        self.run(dir, &["init", "--initial-branch", initial_branch])?;
        Ok(())
    }

    /// Create an orphan worktree at `path`; git names the unborn branch after
    /// the directory. Falls back to `--detach` plus `checkout --orphan` on
    /// git versions that predate `worktree add --orphan`.
    pub fn worktree_add_orphan(&self, primary: &Path, path: &Path) -> Result<(), GitError> {
        let path_str = path.to_string_lossy().into_owned();
        let first = match self.run(primary, &["worktree", "add", "-f", "--orphan", &path_str]) {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Err(first);
        };
        self.run(primary, &["worktree", "add", "-f", "--detach", &path_str])
            .map_err(|_| first)?;
        self.run(path, &["checkout", "--orphan", &name])?;
        self.run(path, &["read-tree", "--empty"])?;
        self.run(path, &["clean", "-fd"])?;
        Ok(())
    }

    pub fn add(&self, dir: &Path, path: &str, force: bool) -> Result<(), GitError> {
        let spec = literal_pathspec(path);
        let mut args = vec!["add"];
        if force {
            args.push("-f");
        }
        args.push("--");
        args.push(&spec);
        self.run(dir, &args)?;
        Ok(())
    }

    pub fn add_all(&self, dir: &Path) -> Result<(), GitError> {
        self.run(dir, &["add", "-A"])?;
        Ok(())
    }

    pub fn rm(&self, dir: &Path, path: &str) -> Result<(), GitError> {
        let spec = literal_pathspec(path);
        self.run(dir, &["rm", "-f", "--", &spec])?;
        Ok(())
    }

    pub fn mv(&self, dir: &Path, from: &str, to: &str) -> Result<(), GitError> {
        self.run(dir, &["mv", "-f", from, to])?;
        Ok(())
    }

    /// Materialize `path` from `commit` into the working tree and index.
    pub fn checkout_file(&self, dir: &Path, commit: &str, path: &str) -> Result<(), GitError> {
        let spec = literal_pathspec(path);
        self.run(dir, &["checkout", "-f", commit, "--", &spec])?;
        Ok(())
    }

    pub fn commit(
        &self,
        dir: &Path,
        message_file: &Path,
        sig: &CommitSignature,
    ) -> Result<(), GitError> {
        let file = message_file.to_string_lossy().into_owned();
        self.run_with_env(
            dir,
            &["commit", "-F", &file, "--allow-empty"],
            &sig.env(),
        )?;
        Ok(())
    }

    pub fn rev_parse_head(&self, dir: &Path) -> Result<String, GitError> {
        let out = self.run(dir, &["rev-parse", "HEAD"])?;
        out.stdout
            .first()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GitError::Parse("rev-parse HEAD produced no output".to_string()))
    }

    /// Recursive blob listing of a commit, optionally narrowed to one path.
    pub fn ls_tree_names(
        &self,
        dir: &Path,
        commit: &str,
        path: Option<&str>,
    ) -> Result<Vec<String>, GitError> {
        let spec = path.map(literal_pathspec);
        let mut args = vec!["ls-tree", "-r", "--name-only", commit];
        if let Some(spec) = spec.as_deref() {
            args.push("--");
            args.push(spec);
        }
        Ok(self.run(dir, &args)?.stdout)
    }

    /// Paths touched by a commit, deletions included.
    pub fn changed_names(&self, dir: &Path, commit: &str) -> Result<Vec<String>, GitError> {
        let out = self.run(dir, &["show", "--name-only", "--format=", commit])?;
        Ok(out
            .stdout
            .into_iter()
            .filter(|l| !l.trim().is_empty())
            .collect())
    }

    /// Whitespace-insensitive content comparison of two files on disk.
    pub fn files_identical(&self, dir: &Path, a: &Path, b: &Path) -> Result<bool, GitError> {
        let (a, b) = (
            a.to_string_lossy().into_owned(),
            b.to_string_lossy().into_owned(),
        );
        let args: [&str; 6] = ["diff", "--no-index", "--exit-code", "-w", &a, &b];
        let out = self.invoke(dir, &args, &[])?;
        match out.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => Err(GitError::Exited {
                command: format!("git {}", args.join(" ")),
                code,
                stderr: out.stderr.join("\n"),
            }),
        }
    }

    pub fn status_porcelain(&self, dir: &Path) -> Result<Vec<String>, GitError> {
        Ok(self.run(dir, &["status", "--porcelain"])?.stdout)
    }

    pub fn reset_hard(&self, dir: &Path, target: Option<&str>) -> Result<(), GitError> {
        self.run(dir, &["reset", "--hard", target.unwrap_or("HEAD")])?;
        Ok(())
    }

    pub fn clean_untracked(&self, dir: &Path) -> Result<(), GitError> {
        self.run(dir, &["clean", "-fd"])?;
        Ok(())
    }

    pub fn pack_refs(&self, dir: &Path) -> Result<(), GitError> {
        self.run(dir, &["pack-refs", "--all"])?;
        Ok(())
    }

    /// Return a branch worktree to the unborn state: drop the ref, empty the
    /// index, remove the files. Used when resume rolls back a branch whose
    /// only commit belonged to the interrupted changeset.
    pub fn clear_branch(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        let refname = format!("refs/heads/{branch}");
        self.run(dir, &["update-ref", "-d", &refname])?;
        self.run(dir, &["read-tree", "--empty"])?;
        self.run(dir, &["clean", "-fd"])?;
        Ok(())
    }

    pub fn run(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        self.run_with_env(dir, args, &[])
    }

    fn run_with_env(
        &self,
        dir: &Path,
        args: &[&str],
        extra_env: &[(&str, String)],
    ) -> Result<GitOutput, GitError> {
        let mut out = self.invoke(dir, args, extra_env)?;
        if !out.success() && out.is_transient() {
            log::warn!(
                "transient git failure, retrying once: git {}",
                args.join(" ")
            );
            thread::sleep(RETRY_DELAY);
            out = self.invoke(dir, args, extra_env)?;
        }
        for line in &out.stderr {
            if line.starts_with("warning:") {
                log::warn!("git: {line}");
            }
        }
        if out.success() {
            Ok(out)
        } else {
            Err(GitError::Exited {
                command: format!("git {}", args.join(" ")),
                code: out.code,
                stderr: out.stderr.join("\n"),
            })
        }
    }

    fn invoke(
        &self,
        dir: &Path,
        args: &[&str],
        extra_env: &[(&str, String)],
    ) -> Result<GitOutput, GitError> {
        log::debug!("$ git {} [{}]", args.join(" "), dir.display());
        let mut cmd = Command::new(&self.git);
        cmd.args(args)
            .current_dir(dir)
            .env("GIT_CONFIG_GLOBAL", &self.config_file)
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C");
        for (key, value) in extra_env {
            cmd.env(key, value);
        }
        let output = cmd.output().map_err(|e| GitError::Spawn {
            command: format!("git {}", args.join(" ")),
            source: e,
        })?;
        Ok(GitOutput::from_output(output))
    }
}

/// Guard a pathspec argument against git's glob matching. Plain paths pass
/// through; anything carrying a metacharacter is wrapped in `:(literal)`.
fn literal_pathspec(path: &str) -> String {
    if path
        .bytes()
        .any(|b| matches!(b, b'*' | b'?' | b'[' | b']' | b'{' | b'}'))
    {
        format!(":(literal){path}")
    } else {
        path.to_string()
    }
}
