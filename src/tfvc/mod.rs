//! TFVC server access: data model, client seam, REST implementation

mod client;
mod rest;
mod types;

pub use client::{ProjectClient, TfvcClient, TfvcError};
pub use rest::RestClient;
pub use types::{
    BranchObject, Change, ChangeType, Changeset, ChangesetSummary, ItemType, MergeSource,
    ServerItem,
};
