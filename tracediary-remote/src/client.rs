//! HTTP client for the Gitee v5 contents API.
//!
//! Reads return the stored file text (base64 transport encoding removed)
//! together with its blob sha. Writes create with `POST` and update with
//! `PUT` + `sha`, which the server enforces as a compare-and-swap.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::files::{BranchSelector, FileWrite, RemoteFile, VersionedFiles, WriteReceipt};
use crate::repo::RepoRef;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use zeroize::Zeroizing;

pub struct ContentStoreClient {
    http: Client,
    config: StoreConfig,
    repo: RepoRef,
    token: Zeroizing<String>,
    branches: BranchSelector,
}

#[derive(Serialize)]
struct WriteBody<'a> {
    content: String,
    message: &'a str,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Deserialize)]
struct ContentsEntry {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    sha: Option<String>,
}

#[derive(Deserialize)]
struct ShaHolder {
    #[serde(default)]
    sha: Option<String>,
}

#[derive(Deserialize)]
struct WriteResponse {
    #[serde(default)]
    content: Option<ShaHolder>,
    #[serde(default)]
    commit: Option<ShaHolder>,
}

impl ContentStoreClient {
    /// Builds a client for `repo`, starting on `branch` (or the configured default).
    pub fn new(
        config: StoreConfig,
        repo: RepoRef,
        token: &str,
        branch: Option<&str>,
    ) -> StoreResult<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(StoreError::InvalidInput("access token is empty".into()));
        }
        let http = Client::builder().timeout(config.request_timeout()).build()?;
        let branches = BranchSelector::new(config.resolve_branch(branch), &config.fallback_branches);
        Ok(Self {
            http,
            config,
            repo,
            token: Zeroizing::new(token.to_string()),
            branches,
        })
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    pub fn active_branch(&self) -> String {
        self.branches.active()
    }

    // ── URLs ────────────────────────────────────────────────────────

    fn url(&self, tail: &[&str]) -> StoreResult<Url> {
        let mut url = Url::parse(self.config.normalized_api_base())
            .map_err(|_| StoreError::InvalidInput("API base is not a valid URL".into()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::InvalidInput("API base cannot carry a path".into()))?;
            segments
                .pop_if_empty()
                .extend(["repos", self.repo.owner.as_str(), self.repo.repo.as_str()])
                .extend(tail.iter().copied());
        }
        Ok(url)
    }

    fn contents_url(&self, path: &str) -> StoreResult<Url> {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.is_empty() {
            return Err(StoreError::InvalidInput("file path is empty".into()));
        }
        let mut tail = vec!["contents"];
        tail.extend(parts);
        self.url(&tail)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut req = self
            .http
            .request(method, url)
            .header("Authorization", format!("token {}", self.token.as_str()))
            .header("Accept", "application/json");
        if self.config.use_access_token_query {
            req = req.query(&[("access_token", self.token.as_str())]);
        }
        req
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Checks that the token can see the repository.
    pub async fn validate_access(&self) -> StoreResult<()> {
        let url = self.url(&[])?;
        debug!(repo = %self.repo, "validating repository access");
        let resp = self.request(Method::GET, url).send().await?;
        let status = resp.status().as_u16();
        if resp.status().is_success() {
            return Ok(());
        }
        let message = read_error_message(resp).await;
        match status {
            404 => Err(StoreError::NotFound),
            _ => Err(StoreError::from_status(status, message)),
        }
    }

    async fn fetch(&self, path: &str, branch: &str) -> StoreResult<RemoteFile> {
        let url = self.contents_url(path)?;
        let resp = self
            .request(Method::GET, url)
            .query(&[("ref", branch)])
            .send()
            .await?;
        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let message = read_error_message(resp).await;
            let err = StoreError::from_status(status, message);
            if status == 404 && !err.is_branch_missing() {
                return Ok(RemoteFile::Missing);
            }
            return Err(err);
        }

        let body: Value = resp.json().await?;
        match body {
            Value::Array(items) if items.is_empty() => Ok(RemoteFile::Missing),
            Value::Array(_) => Err(StoreError::Decode(format!("{path} is a directory"))),
            Value::Object(_) => {
                let entry: ContentsEntry = serde_json::from_value(body)?;
                let version = entry
                    .sha
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| StoreError::Decode("file entry has no sha".into()))?;
                let content = decode_content(entry.content.unwrap_or_default(), entry.encoding)?;
                Ok(RemoteFile::Found { content, version })
            }
            _ => Err(StoreError::Decode("unexpected contents payload".into())),
        }
    }

    async fn put(&self, write: &FileWrite<'_>, branch: &str) -> StoreResult<WriteReceipt> {
        let url = self.contents_url(write.path)?;
        let expected = write.expected_version.map(str::trim).filter(|s| !s.is_empty());
        let method = if expected.is_some() {
            Method::PUT
        } else {
            Method::POST
        };
        let body = WriteBody {
            content: STANDARD.encode(write.content.as_bytes()),
            message: write.message,
            branch,
            sha: expected,
        };

        debug!(path = write.path, %branch, update = expected.is_some(), "writing file");
        let resp = self.request(method, url).json(&body).send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = read_error_message(resp).await;
            let err = StoreError::from_status(status, message);
            if err.is_conflict() {
                warn!(path = write.path, status, "write conflict");
            }
            return Err(err);
        }

        let parsed: WriteResponse = resp.json().await?;
        let version = parsed
            .content
            .and_then(|c| c.sha)
            .or_else(|| parsed.commit.and_then(|c| c.sha))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StoreError::Decode("write response has no sha".into()))?;
        Ok(WriteReceipt { version })
    }
}

#[async_trait]
impl VersionedFiles for ContentStoreClient {
    fn branches(&self) -> &BranchSelector {
        &self.branches
    }

    async fn read_file(&self, path: &str, branch: &str) -> StoreResult<RemoteFile> {
        self.fetch(path, branch).await
    }

    async fn write_file(&self, write: &FileWrite<'_>, branch: &str) -> StoreResult<WriteReceipt> {
        self.put(write, branch).await
    }
}

fn decode_content(content: String, encoding: Option<String>) -> StoreResult<String> {
    match encoding.as_deref() {
        Some(enc) if enc.eq_ignore_ascii_case("base64") => {
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = STANDARD
                .decode(compact.as_bytes())
                .map_err(|_| StoreError::Decode("file content is not valid base64".into()))?;
            String::from_utf8(bytes)
                .map_err(|_| StoreError::Decode("file content is not valid UTF-8".into()))
        }
        _ => Ok(content),
    }
}

/// Pulls `message` (or `error`) out of a JSON error body, else the raw text.
async fn read_error_message(resp: Response) -> Option<String> {
    let is_json = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("application/json"));
    let text = resp.text().await.ok()?;
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if is_json {
        let value: Value = serde_json::from_str(text).ok()?;
        return ["message", "error"].iter().find_map(|field| {
            value
                .get(field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        });
    }
    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_handles_wrapped_base64() {
        let encoded = STANDARD.encode("hello world");
        let wrapped = format!("{}\n{}", &encoded[..6], &encoded[6..]);
        assert_eq!(
            decode_content(wrapped, Some("base64".into())).unwrap(),
            "hello world"
        );
    }

    #[test]
    fn decode_passes_through_plain_content() {
        assert_eq!(decode_content("raw".into(), None).unwrap(), "raw");
    }

    #[test]
    fn empty_token_is_rejected() {
        let repo = RepoRef::new("alice", "diary").unwrap();
        let err = ContentStoreClient::new(StoreConfig::default(), repo, "  ", None)
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }
}
