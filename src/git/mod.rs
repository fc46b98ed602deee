//! Git plumbing layer

mod driver;
mod error;

pub use driver::{CommitSignature, GitDriver, GitOutput};
pub use error::GitError;
