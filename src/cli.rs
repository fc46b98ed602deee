use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;

use tfvc2git::{AuthMethod, Credential, MigrationConfig};

#[derive(Parser)]
#[command(name = "tfvc2git")]
#[command(about = "Replay TFVC changeset history into a Git repository")]
#[command(version)]
pub struct Cli {
    /// Collection URL, e.g. https://tfs.example.com/DefaultCollection
    #[arg(long, value_name = "URL")]
    pub endpoint: String,

    /// Team project name, or a $/… server path to use as the project root
    #[arg(long, value_name = "NAME_OR_PATH")]
    pub project: String,

    /// Output directory; one worktree per branch plus the checkpoint file
    #[arg(long, value_name = "DIR")]
    pub out: PathBuf,

    /// Branch name for the project root
    #[arg(long, value_name = "NAME", default_value = "main")]
    pub primary_branch: String,

    /// First changeset to replay
    #[arg(long, value_name = "CID")]
    pub from: Option<u32>,

    /// Re-download every file after replaying it and verify the content
    #[arg(long)]
    pub check: bool,

    /// Continue an interrupted migration from its checkpoint
    #[arg(long)]
    pub resume: bool,

    /// How to authenticate against the server
    #[arg(long, value_enum, default_value = "integrated")]
    pub auth: AuthKind,

    /// Username for basic or explicit integrated authentication
    #[arg(long, value_name = "USER")]
    pub username: Option<String>,

    /// Password or personal access token for --auth basic
    #[arg(long, value_name = "SECRET")]
    pub password: Option<String>,

    /// Bearer token for --auth token
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Git binary to drive
    #[arg(long, value_name = "PATH", default_value = "git")]
    pub git: PathBuf,

    /// Write the log transcript to a file instead of stderr
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Log every plumbing invocation
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AuthKind {
    /// Platform-integrated authentication
    Integrated,
    /// Basic authentication (use a personal access token as the password)
    Basic,
    /// Bearer token
    Token,
}

impl Cli {
    /// Split the parsed arguments into the run configuration and the
    /// authentication selector, validating the flag combinations.
    pub fn into_parts(self) -> anyhow::Result<(MigrationConfig, AuthMethod)> {
        let auth = match self.auth {
            AuthKind::Integrated => {
                let credential = match (self.username, self.password) {
                    (Some(username), Some(password)) => Some(Credential { username, password }),
                    (None, None) => None,
                    _ => bail!("--auth integrated takes --username and --password together or not at all"),
                };
                AuthMethod::Integrated(credential)
            }
            AuthKind::Basic => {
                let (Some(username), Some(password)) = (self.username, self.password) else {
                    bail!("--auth basic requires --username and --password");
                };
                AuthMethod::Basic(Credential { username, password })
            }
            AuthKind::Token => {
                let Some(token) = self.token else {
                    bail!("--auth token requires --token");
                };
                AuthMethod::Token(token)
            }
        };

        let config = MigrationConfig {
            endpoint: self.endpoint,
            project: self.project,
            output_dir: self.out,
            primary_branch: self.primary_branch,
            from_cid: self.from,
            with_integrity_check: self.check,
            resume: self.resume,
            git_binary: self.git,
            log_path: self.log_file,
        };
        Ok((config, auth))
    }
}
