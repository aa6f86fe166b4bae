//! GitHub, through the REST v3 git data API.

use crate::blobs::{BlobApi, create_blobs};
use crate::error::{ErrorKind, Result};
use crate::host::{GitHost, Head, Manifest, StagedBlob, publish_to_host};
use crate::http::{self, api_message, rejection, rejection_from, send};
use crate::pacing::Pacing;
use crate::{PublishContext, PublishReport, Publisher};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use exn::ResultExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use stillpress_config::{BranchMode, Destination, GitHubTarget};
use stillpress_storage::backend::LocalBackend;

const API_URL: &str = "https://api.github.com";
const TIMEOUT: Duration = Duration::from_secs(300);
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

#[derive(Debug, Deserialize)]
struct Sha {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitCommit {
    sha: String,
    tree: Sha,
}

#[derive(Debug, Deserialize)]
struct Contents {
    commit: GitCommit,
}

#[derive(Debug, Deserialize)]
struct Tree {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Debug, Serialize)]
struct TreeItem<'a> {
    path: &'a str,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    sha: &'a str,
}

#[derive(Debug, Deserialize)]
struct Repository {
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

/// Publishes to a GitHub repository branch, one commit per batch.
pub struct GitHubPublisher {
    client: Client,
    api: String,
    repo: String,
    branch: String,
    branch_mode: BranchMode,
    base_branch: Option<String>,
    pacing: Pacing,
}
impl GitHubPublisher {
    pub fn new(target: &GitHubTarget, pacing: Pacing) -> Result<Self> {
        let mut token = HeaderValue::from_str(&format!("token {}", target.token.expose()))
            .or_raise(|| ErrorKind::Misconfigured("publish.github.token"))?;
        token.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, token);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github.v3+json"));
        Ok(Self {
            client: http::client(headers, TIMEOUT)?,
            api: API_URL.to_string(),
            repo: target.repo.clone(),
            branch: target.branch.clone(),
            branch_mode: target.branch_mode,
            base_branch: target.base_branch.clone(),
            pacing,
        })
    }

    fn repo_url(&self, endpoint: &str) -> String {
        match endpoint {
            "" => format!("{}/repos/{}", self.api, self.repo),
            _ => format!("{}/repos/{}/{endpoint}", self.api, self.repo),
        }
    }

    async fn request(&self, method: Method, url: &str, body: Option<serde_json::Value>) -> Result<Response> {
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = send(request, url).await?;
        if exhausted(response.headers()) {
            exn::bail!(ErrorKind::RateLimited);
        }
        Ok(response)
    }

    async fn get(&self, url: &str) -> Result<Response> {
        self.request(Method::GET, url, None).await
    }

    /// Commit id a branch points at. `None` for a missing branch or an empty
    /// repository.
    async fn branch_commit(&self, branch: &str) -> Result<Option<String>> {
        let url = self.repo_url(&format!("git/refs/heads/{branch}"));
        let response = self.get(&url).await?;
        match response.status() {
            StatusCode::OK => {
                let value: serde_json::Value = http::json(response, &url).await?;
                Ok(ref_commit(&value))
            },
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => Ok(None),
            _ => Err(rejection(response).await),
        }
    }

    async fn head_at(&self, commit: &str) -> Result<Head> {
        let url = self.repo_url(&format!("git/commits/{commit}"));
        let response = self.get(&url).await?;
        if response.status() != StatusCode::OK {
            return Err(rejection(response).await);
        }
        let commit: GitCommit = http::json(response, &url).await?;
        Ok(Head { commit: commit.sha, tree: Some(commit.tree.sha) })
    }

    async fn default_branch(&self) -> Result<Option<String>> {
        let url = self.repo_url("");
        let response = self.get(&url).await?;
        if response.status() != StatusCode::OK {
            return Err(rejection(response).await);
        }
        let repository: Repository = http::json(response, &url).await?;
        Ok(repository.default_branch)
    }

    /// POST a JSON body expecting `201 Created` and a `sha` back.
    async fn post_for_sha(&self, endpoint: &str, body: serde_json::Value) -> Result<String> {
        let url = self.repo_url(endpoint);
        let response = self.request(Method::POST, &url, Some(body)).await?;
        if response.status() != StatusCode::CREATED {
            return Err(rejection(response).await);
        }
        let created: Sha = http::json(response, &url).await?;
        Ok(created.sha)
    }
}

/// True when the response says no requests are left this hour.
fn exhausted(headers: &HeaderMap) -> bool {
    headers.get(RATE_LIMIT_REMAINING).and_then(|v| v.to_str().ok()).is_some_and(|v| v.trim() == "0")
}

fn is_secondary_rate_limit(status: StatusCode, message: &str) -> bool {
    status == StatusCode::FORBIDDEN && message.to_ascii_lowercase().contains("secondary rate limit")
}

/// The ref lookup answers with a list when the name only prefixes other
/// branches; that is not a match.
fn ref_commit(value: &serde_json::Value) -> Option<String> {
    value.pointer("/object/sha").and_then(|sha| sha.as_str()).map(str::to_string)
}

fn blob_manifest(tree: Tree) -> Manifest {
    tree.tree.into_iter().filter(|e| e.kind == "blob").map(|e| (e.path, e.sha)).collect()
}

#[async_trait]
impl BlobApi for GitHubPublisher {
    async fn create_blob(&self, content: &[u8]) -> Result<String> {
        let url = self.repo_url("git/blobs");
        let body = json!({ "content": BASE64.encode(content), "encoding": "base64" });
        let response = self.request(Method::POST, &url, Some(body)).await?;
        let status = response.status();
        if status == StatusCode::CREATED {
            let blob: Sha = http::json(response, &url).await?;
            return Ok(blob.sha);
        }
        let text = response.text().await.or_raise(|| ErrorKind::Transport(url.clone()))?;
        if is_secondary_rate_limit(status, &api_message(&text)) {
            exn::bail!(ErrorKind::SecondaryRateLimit);
        }
        Err(rejection_from(status, &text))
    }
}

#[async_trait]
impl GitHost for GitHubPublisher {
    fn destination(&self) -> Destination {
        Destination::GitHub
    }

    fn batch_pause(&self) -> Duration {
        self.pacing.github_batch_pause
    }

    async fn exists(&self) -> Result<bool> {
        let response = self.get(&self.repo_url("")).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(rejection(response).await),
        }
    }

    async fn create(&self) -> Result<()> {
        let name = self.repo.rsplit('/').next().unwrap_or(&self.repo);
        let url = format!("{}/user/repos", self.api);
        let body = json!({ "name": name, "private": true, "auto_init": false });
        let response = self.request(Method::POST, &url, Some(body)).await?;
        match response.status() {
            StatusCode::CREATED => Ok(()),
            _ => Err(rejection(response).await),
        }
    }

    async fn head(&self) -> Result<Option<Head>> {
        match self.branch_commit(&self.branch).await? {
            Some(commit) => Ok(Some(self.head_at(&commit).await?)),
            None => Ok(None),
        }
    }

    async fn create_branch(&self) -> Result<Option<Head>> {
        let source = match (self.branch_mode, &self.base_branch) {
            (BranchMode::New, Some(base)) => Some(base.clone()),
            _ => self.default_branch().await?,
        };
        let Some(source) = source.filter(|s| *s != self.branch) else {
            return Ok(None);
        };
        let Some(commit) = self.branch_commit(&source).await? else {
            return Ok(None);
        };
        let url = self.repo_url("git/refs");
        let body = json!({ "ref": format!("refs/heads/{}", self.branch), "sha": commit });
        let response = self.request(Method::POST, &url, Some(body)).await?;
        if response.status() != StatusCode::CREATED {
            return Err(rejection(response).await);
        }
        tracing::info!(branch = %self.branch, from = %source, "Created branch");
        Ok(Some(self.head_at(&commit).await?))
    }

    async fn bootstrap(&self, message: &str) -> Result<Head> {
        let url = self.repo_url("contents/index.html");
        let body = json!({ "message": message, "content": "", "branch": self.branch });
        let response = self.request(Method::PUT, &url, Some(body)).await?;
        if response.status() != StatusCode::CREATED {
            return Err(rejection(response).await);
        }
        let contents: Contents = http::json(response, &url).await?;
        Ok(Head { commit: contents.commit.sha, tree: Some(contents.commit.tree.sha) })
    }

    async fn manifest(&self, head: &Head) -> Result<Manifest> {
        let Some(tree) = &head.tree else {
            exn::bail!(ErrorKind::InvalidResponse("tree"));
        };
        let url = format!("{}?recursive=1", self.repo_url(&format!("git/trees/{tree}")));
        let response = self.get(&url).await?;
        if response.status() != StatusCode::OK {
            return Err(rejection(response).await);
        }
        let tree: Tree = http::json(response, &url).await?;
        if tree.truncated {
            tracing::warn!("Remote tree listing was truncated; unlisted files will be uploaded again");
        }
        Ok(blob_manifest(tree))
    }

    async fn commit(
        &self,
        head: &Head,
        files: Vec<StagedBlob>,
        message: &str,
        _: &Manifest,
        ctx: &PublishContext<'_>,
    ) -> Result<Head> {
        let blobs = create_blobs(self, &files, &self.pacing, ctx.cancel, ctx.sink).await?;
        let items: Vec<TreeItem<'_>> = blobs
            .iter()
            .map(|b| TreeItem { path: &b.path, mode: "100644", kind: "blob", sha: &b.sha })
            .collect();
        let mut body = json!({ "tree": items });
        if let Some(base) = &head.tree {
            body["base_tree"] = json!(base);
        }
        let tree = self.post_for_sha("git/trees", body).await?;
        let commit =
            self.post_for_sha("git/commits", json!({ "message": message, "tree": tree, "parents": [head.commit] })).await?;

        // Never forced: a branch that moved meanwhile must fail rather than
        // lose history.
        let url = self.repo_url(&format!("git/refs/heads/{}", self.branch));
        let response = self.request(Method::PATCH, &url, Some(json!({ "sha": commit, "force": false }))).await?;
        if response.status() != StatusCode::OK {
            return Err(rejection(response).await);
        }
        Ok(Head { commit, tree: Some(tree) })
    }
}

#[async_trait]
impl Publisher for GitHubPublisher {
    fn destination(&self) -> Destination {
        Destination::GitHub
    }

    async fn publish(&self, tree: &LocalBackend, ctx: &PublishContext<'_>) -> Result<PublishReport> {
        publish_to_host(self, tree, ctx, self.pacing.batch_size).await
    }

    async fn check(&self) -> Result<Option<String>> {
        let url = format!("{}/user", self.api);
        let response = self.get(&url).await?;
        if response.status() != StatusCode::OK {
            return Err(rejection(response).await);
        }
        let user: User = http::json(response, &url).await?;
        Ok(Some(format!("authenticated as {}", user.login)))
    }
}
