//! TFVC REST API client.
//!
//! Speaks the `_apis/tfvc` surface of a Team Foundation Server / Azure DevOps
//! collection with blocking HTTP. The engine is single-threaded around its
//! plumbing calls, so a blocking client is the right shape; no runtime is
//! dragged in.

use std::fs;
use std::path::Path;

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::AuthMethod;

use super::client::{TfvcClient, TfvcError};
use super::types::{
    BranchObject, Change, ChangeType, Changeset, ChangesetSummary, ItemType, MergeSource,
    ServerItem,
};

const API_VERSION: &str = "6.0";
const PAGE_SIZE: usize = 256;

pub struct RestClient {
    http: reqwest::blocking::Client,
    base: String,
    auth: AuthMethod,
}

impl RestClient {
    /// Build a client and validate endpoint plus credentials with one cheap
    /// request. Integrated authentication needs NTLM negotiation, which this
    /// transport does not speak; it is rejected here rather than failing with
    /// an opaque 401 mid-replay.
    pub fn connect(endpoint: &str, auth: AuthMethod) -> Result<Self, TfvcError> {
        if matches!(auth, AuthMethod::Integrated(_)) {
            return Err(TfvcError::Unsupported(
                "integrated authentication is not available over the REST transport; \
                 use --auth basic with a personal access token, or --auth token"
                    .to_string(),
            ));
        }
        // Individual calls carry no deadline; the caller owns cancellation.
        let http = reqwest::blocking::Client::builder()
            .timeout(None::<std::time::Duration>)
            .build()
            .map_err(|e| TfvcError::Connection(e.to_string()))?;
        let client = RestClient {
            http,
            base: endpoint.trim_end_matches('/').to_string(),
            auth,
        };
        client.get_json::<ListResponse<serde_json::Value>>(
            "_apis/projects",
            &[("$top".to_string(), "1".to_string())],
        )?;
        Ok(client)
    }

    fn authed(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.auth {
            AuthMethod::Basic(cred) => builder.basic_auth(&cred.username, Some(&cred.password)),
            AuthMethod::Token(token) => builder.bearer_auth(token),
            // rejected in connect()
            AuthMethod::Integrated(_) => builder,
        }
    }

    fn get(&self, path: &str, query: &[(String, String)]) -> Result<reqwest::blocking::Response, TfvcError> {
        let url = format!("{}/{}", self.base, path);
        let request = self
            .authed(self.http.get(&url))
            .query(query)
            .query(&[("api-version", API_VERSION)]);
        let response = request
            .send()
            .map_err(|e| TfvcError::Connection(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TfvcError::NotFound(url));
        }
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(TfvcError::Api {
                status: status.as_u16(),
                url,
                message,
            });
        }
        Ok(response)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T, TfvcError> {
        let url = format!("{}/{}", self.base, path);
        self.get(path, query)?
            .json()
            .map_err(|e| TfvcError::Decode(format!("{url}: {e}")))
    }
}

impl TfvcClient for RestClient {
    fn get_team_project(&self, name: &str) -> Result<ServerItem, TfvcError> {
        let path = format!("_apis/projects/{name}");
        match self.get_json::<ProjectDto>(&path, &[]) {
            Ok(project) => Ok(ServerItem {
                path: format!("$/{}", project.name),
            }),
            Err(TfvcError::NotFound(_)) => {
                Err(TfvcError::NotFound(format!("team project '{name}'")))
            }
            Err(err) => Err(err),
        }
    }

    fn query_history(
        &self,
        project_root: &str,
        from_cid: Option<u32>,
    ) -> Result<Vec<ChangesetSummary>, TfvcError> {
        let mut history = Vec::new();
        let mut skip = 0usize;
        loop {
            let mut query = vec![
                (
                    "searchCriteria.itemPath".to_string(),
                    project_root.to_string(),
                ),
                ("$top".to_string(), PAGE_SIZE.to_string()),
                ("$skip".to_string(), skip.to_string()),
            ];
            if let Some(from) = from_cid {
                query.push(("searchCriteria.fromId".to_string(), from.to_string()));
            }
            let page: ListResponse<ChangesetDto> =
                self.get_json("_apis/tfvc/changesets", &query)?;
            let fetched = page.value.len();
            history.extend(page.value.into_iter().map(|c| ChangesetSummary {
                id: c.changeset_id,
                created: c.created_date,
            }));
            if fetched < PAGE_SIZE {
                return Ok(history);
            }
            skip += fetched;
        }
    }

    fn get_changeset(&self, cid: u32) -> Result<Changeset, TfvcError> {
        let dto: ChangesetDto = self.get_json(&format!("_apis/tfvc/changesets/{cid}"), &[])?;
        Ok(Changeset {
            id: dto.changeset_id,
            author: dto
                .author
                .map(|a| a.display_name)
                .unwrap_or_else(|| "unknown".to_string()),
            created: dto.created_date,
            comment: dto.comment.unwrap_or_default(),
        })
    }

    fn get_changes(&self, cid: u32) -> Result<Vec<Change>, TfvcError> {
        let mut changes = Vec::new();
        let mut skip = 0usize;
        loop {
            let query = vec![
                ("$top".to_string(), PAGE_SIZE.to_string()),
                ("$skip".to_string(), skip.to_string()),
            ];
            let page: ListResponse<ChangeDto> =
                self.get_json(&format!("_apis/tfvc/changesets/{cid}/changes"), &query)?;
            let fetched = page.value.len();
            changes.extend(page.value.into_iter().map(|dto| dto.into_change(cid)));
            if fetched < PAGE_SIZE {
                return Ok(changes);
            }
            skip += fetched;
        }
    }

    fn query_branch_objects(&self, path: &str, _cid: u32) -> Result<Vec<BranchObject>, TfvcError> {
        let roots: ListResponse<BranchDto> = self.get_json(
            "_apis/tfvc/branches",
            &[("includeChildren".to_string(), "true".to_string())],
        )?;
        let mut flat = Vec::new();
        for root in roots.value {
            flatten_branches(root, &mut flat);
        }
        Ok(flat
            .into_iter()
            .filter(|b| path_has_prefix(path, &b.path))
            .collect())
    }

    fn download(&self, server_path: &str, cid: u32, dest: &Path) -> Result<u64, TfvcError> {
        let query = vec![
            ("path".to_string(), server_path.to_string()),
            (
                "versionDescriptor.versionType".to_string(),
                "changeset".to_string(),
            ),
            ("versionDescriptor.version".to_string(), cid.to_string()),
            ("download".to_string(), "true".to_string()),
        ];
        let mut response = self.get("_apis/tfvc/items", &query)?;
        let mut file = fs::File::create(dest)?;
        response
            .copy_to(&mut file)
            .map_err(|e| TfvcError::Connection(e.to_string()))
    }
}

fn flatten_branches(branch: BranchDto, out: &mut Vec<BranchObject>) {
    out.push(BranchObject {
        path: branch.path,
    });
    for child in branch.children.unwrap_or_default() {
        flatten_branches(child, out);
    }
}

fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    path.len() >= prefix.len()
        && path
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        && (path.len() == prefix.len() || path.as_bytes()[prefix.len()] == b'/')
}

// ---------------------------------------------------------------------------
// Wire DTOs

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDto {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangesetDto {
    changeset_id: u32,
    author: Option<IdentityDto>,
    created_date: DateTime<FixedOffset>,
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityDto {
    display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeDto {
    item: ItemDto,
    change_type: String,
    #[serde(default)]
    merge_sources: Vec<MergeSourceDto>,
    source_server_item: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemDto {
    path: String,
    #[serde(default)]
    is_folder: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeSourceDto {
    server_item: String,
    version_from: u32,
    version_to: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchDto {
    path: String,
    #[serde(default)]
    children: Option<Vec<BranchDto>>,
}

impl ChangeDto {
    fn into_change(self, cid: u32) -> Change {
        let mask = ChangeType::parse_list(&self.change_type);
        let mut merge_sources: Vec<MergeSource> = self
            .merge_sources
            .into_iter()
            .map(|m| MergeSource {
                source_path: m.server_item,
                version_from: m.version_from,
                version_to: m.version_to,
            })
            .collect();
        // Renames come back with a bare sourceServerItem instead of a merge
        // source; synthesize one spanning everything before this changeset so
        // the resolver can walk to the latest replayed version of the source.
        if merge_sources.is_empty()
            && mask.intersects(ChangeType::RENAME | ChangeType::SOURCE_RENAME)
            && cid > 1
            && let Some(source_path) = self.source_server_item
        {
            merge_sources.push(MergeSource {
                source_path,
                version_from: 1,
                version_to: cid - 1,
            });
        }
        Change {
            server_path: self.item.path,
            item_type: if self.item.is_folder {
                ItemType::Folder
            } else {
                ItemType::File
            },
            change_type: mask,
            merge_sources,
        }
    }
}
