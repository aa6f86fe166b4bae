//! Cloudflare Workers static assets.
//!
//! Three phases: announce a manifest of every file's hash and size, upload
//! the buckets of hashes the edge does not have yet, then deploy a worker
//! script that serves the uploaded assets.

use crate::error::{ErrorKind, Result};
use crate::hash::asset_hash;
use crate::http::{self, rejection, send};
use crate::pacing::{Pacing, ensure_running, pause};
use crate::{PublishContext, PublishReport, Publisher, read_staged, staged_files};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use exn::ResultExt;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use stillpress_config::{CloudflareTarget, Destination, Secret};
use stillpress_storage::FileInfo;
use stillpress_storage::backend::LocalBackend;
use time::OffsetDateTime;
use time::macros::format_description;

const API_URL: &str = "https://api.cloudflare.com/client/v4";
const TIMEOUT: Duration = Duration::from_secs(300);
const MAX_FILES: usize = 20_000;
const MAX_FILE_SIZE: u64 = 26_214_400;
const WORKER_MODULE: &str = "worker.js";
const WORKER_SCRIPT: &str = "export default { async fetch(request, env) { return env.ASSETS.fetch(request); } };";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct AssetEntry {
    hash: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UploadSession {
    jwt: Option<String>,
    #[serde(default)]
    buckets: Vec<Vec<String>>,
}

/// The calls a deployment makes against the edge.
#[async_trait]
trait AssetEdge: Send + Sync {
    /// Announce every asset. The session lists the hashes still missing,
    /// grouped into upload buckets.
    async fn start_session(&self, manifest: &BTreeMap<String, AssetEntry>) -> Result<UploadSession>;

    /// Upload one bucket of `(hash, base64 content)` pairs, returning the
    /// completion token when the edge hands one back.
    async fn upload_bucket(&self, files: Vec<(String, String)>, upload_jwt: &str) -> Result<Option<String>>;

    async fn deploy(&self, completion_jwt: &str, started_at: OffsetDateTime) -> Result<()>;
}

/// Deploys the staged tree as a Workers static-assets site.
pub struct CloudflarePublisher {
    client: Client,
    api: String,
    token: Secret,
    account_id: String,
    script_name: String,
    pacing: Pacing,
}
impl CloudflarePublisher {
    pub fn new(target: &CloudflareTarget, pacing: Pacing) -> Result<Self> {
        if target.account_id.is_empty() {
            exn::bail!(ErrorKind::Misconfigured("publish.cloudflare.account_id"));
        }
        if target.script_name.is_empty() {
            exn::bail!(ErrorKind::Misconfigured("publish.cloudflare.script_name"));
        }
        Ok(Self {
            client: http::client(HeaderMap::new(), TIMEOUT)?,
            api: API_URL.to_string(),
            token: target.api_token.clone(),
            account_id: target.account_id.clone(),
            script_name: target.script_name.clone(),
            pacing,
        })
    }

    fn account_url(&self, endpoint: &str) -> String {
        match endpoint {
            "" => format!("{}/accounts/{}", self.api, self.account_id),
            _ => format!("{}/accounts/{}/{endpoint}", self.api, self.account_id),
        }
    }

    async fn send_with(&self, request: RequestBuilder, bearer: &str, url: &str) -> Result<Response> {
        let response = send(request.bearer_auth(bearer), url).await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            exn::bail!(ErrorKind::RateLimited);
        }
        Ok(response)
    }
}

#[async_trait]
impl AssetEdge for CloudflarePublisher {
    async fn start_session(&self, manifest: &BTreeMap<String, AssetEntry>) -> Result<UploadSession> {
        let url = self.account_url(&format!("workers/scripts/{}/assets-upload-session", self.script_name));
        let request = self.client.post(&url).json(&json!({ "manifest": manifest }));
        let response = self.send_with(request, self.token.expose(), &url).await?;
        if !matches!(response.status(), StatusCode::OK | StatusCode::CREATED) {
            return Err(rejection(response).await);
        }
        let envelope: Envelope<UploadSession> = http::json(response, &url).await?;
        match envelope.result {
            Some(session) if session.jwt.as_deref().is_some_and(|jwt| !jwt.is_empty()) => Ok(session),
            _ => exn::bail!(ErrorKind::InvalidResponse("upload session token")),
        }
    }

    async fn upload_bucket(&self, files: Vec<(String, String)>, upload_jwt: &str) -> Result<Option<String>> {
        let url = self.account_url("workers/assets/upload?base64=true");
        let form = files.into_iter().fold(Form::new(), |form, (hash, content)| form.text(hash, content));
        let request = self.client.post(&url).multipart(form);
        let response = self.send_with(request, upload_jwt, &url).await?;
        if !matches!(response.status(), StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED) {
            return Err(rejection(response).await);
        }
        let text = response.text().await.or_raise(|| ErrorKind::Transport(url.clone()))?;
        Ok(serde_json::from_str::<serde_json::Value>(&text).ok().and_then(|v| completion_jwt(&v)))
    }

    async fn deploy(&self, completion_jwt: &str, started_at: OffsetDateTime) -> Result<()> {
        let url = self.account_url(&format!("workers/scripts/{}", self.script_name));
        let metadata = Part::text(worker_metadata(completion_jwt, started_at).to_string())
            .mime_str("application/json")
            .or_raise(|| ErrorKind::Client)?;
        let script = Part::text(WORKER_SCRIPT)
            .file_name(WORKER_MODULE)
            .mime_str("application/javascript+module")
            .or_raise(|| ErrorKind::Client)?;
        let form = Form::new().part("metadata", metadata).part(WORKER_MODULE, script);
        let request = self.client.put(&url).multipart(form);
        let response = self.send_with(request, self.token.expose(), &url).await?;
        if !matches!(response.status(), StatusCode::OK | StatusCode::CREATED) {
            return Err(rejection(response).await);
        }
        Ok(())
    }
}

/// Hash every staged file, dropping those over the size limit.
async fn scan(
    tree: &LocalBackend,
    account_id: &str,
    ctx: &PublishContext<'_>,
) -> Result<Vec<(FileInfo, AssetEntry)>> {
    let files = staged_files(tree).await?;
    if files.len() > MAX_FILES {
        exn::bail!(ErrorKind::TooManyFiles(files.len(), MAX_FILES));
    }
    let mut scanned = Vec::with_capacity(files.len());
    for file in files {
        ensure_running(ctx.cancel)?;
        if file.size > MAX_FILE_SIZE {
            ctx.sink.warning(&format!(
                "{}: skipping {} ({} bytes exceeds the per-file limit)",
                Destination::Cloudflare,
                file.slash_path(),
                file.size
            ));
            continue;
        }
        let content = read_staged(tree, &file).await?;
        let entry = AssetEntry { hash: asset_hash(account_id, &content), size: content.len() as u64 };
        scanned.push((file, entry));
    }
    Ok(scanned)
}

/// Announce, upload the missing buckets in order, then deploy with the last
/// token the edge handed out. A failed bucket aborts before anything is
/// deployed.
async fn deploy_assets(
    edge: &dyn AssetEdge,
    account_id: &str,
    bucket_pause: Duration,
    tree: &LocalBackend,
    ctx: &PublishContext<'_>,
) -> Result<PublishReport> {
    let mut report = PublishReport::new(Destination::Cloudflare);
    let scanned = scan(tree, account_id, ctx).await?;
    let session = edge.start_session(&asset_manifest(&scanned)).await?;
    // With nothing to upload the session token already completes the upload.
    let mut token = session.jwt.unwrap_or_default();

    let by_hash: HashMap<&str, &FileInfo> = scanned.iter().map(|(f, e)| (e.hash.as_str(), f)).collect();
    let total = session.buckets.len();
    for (index, bucket) in session.buckets.iter().enumerate() {
        if index > 0 {
            pause(bucket_pause, ctx.cancel).await?;
        }
        ensure_running(ctx.cancel)?;
        let mut files = Vec::with_capacity(bucket.len());
        for hash in bucket {
            let Some(file) = by_hash.get(hash.as_str()) else {
                ctx.sink.warning(&format!("{}: no staged file for hash {hash}", Destination::Cloudflare));
                continue;
            };
            let content = read_staged(tree, file).await?;
            files.push((hash.clone(), BASE64.encode(&content)));
        }
        let uploaded = files.len();
        if let Some(completion) = edge.upload_bucket(files, &token).await? {
            token = completion;
        }
        report.uploaded += uploaded;
        report.batches += 1;
        ctx.sink.debug(&format!("{}: uploaded bucket {}/{total}", Destination::Cloudflare, index + 1));
    }
    report.skipped = scanned.len().saturating_sub(report.uploaded);

    ensure_running(ctx.cancel)?;
    edge.deploy(&token, ctx.started_at).await?;
    Ok(report)
}

/// Manifest keys are absolute asset paths.
fn asset_manifest(scanned: &[(FileInfo, AssetEntry)]) -> BTreeMap<String, AssetEntry> {
    scanned.iter().map(|(file, entry)| (format!("/{}", file.slash_path()), entry.clone())).collect()
}

/// The completion token sits at the top level or inside `result`.
fn completion_jwt(body: &serde_json::Value) -> Option<String> {
    ["/jwt", "/result/jwt"]
        .iter()
        .find_map(|pointer| body.pointer(pointer).and_then(|v| v.as_str()).filter(|jwt| !jwt.is_empty()))
        .map(str::to_string)
}

fn compatibility_date(at: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]");
    at.format(&format).unwrap_or_else(|_| "2024-01-01".to_string())
}

fn worker_metadata(completion_jwt: &str, started_at: OffsetDateTime) -> serde_json::Value {
    json!({
        "main_module": WORKER_MODULE,
        "compatibility_date": compatibility_date(started_at),
        "assets": { "jwt": completion_jwt },
    })
}

#[async_trait]
impl Publisher for CloudflarePublisher {
    fn destination(&self) -> Destination {
        Destination::Cloudflare
    }

    #[tracing::instrument(skip_all, fields(script = %self.script_name))]
    async fn publish(&self, tree: &LocalBackend, ctx: &PublishContext<'_>) -> Result<PublishReport> {
        let report = deploy_assets(self, &self.account_id, self.pacing.bucket_pause, tree, ctx).await?;
        ctx.sink.info(&format!(
            "{}: deployed {} ({} uploaded, {} already present)",
            Destination::Cloudflare,
            self.script_name,
            report.uploaded,
            report.skipped
        ));
        Ok(report)
    }

    async fn check(&self) -> Result<Option<String>> {
        let url = self.account_url("");
        let response = self.send_with(self.client.get(&url), self.token.expose(), &url).await?;
        if response.status() != StatusCode::OK {
            return Err(rejection(response).await);
        }
        let envelope: Envelope<serde_json::Value> = http::json(response, &url).await?;
        if !envelope.success {
            exn::bail!(ErrorKind::InvalidResponse("account lookup"));
        }
        let name = envelope.result.as_ref().and_then(|r| r.get("name")).and_then(|n| n.as_str());
        Ok(Some(format!("account {}", name.unwrap_or(&self.account_id))))
    }
}
