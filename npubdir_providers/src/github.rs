//! Remote store backed by the GitHub repository contents API.
//!
//! The blob `sha` GitHub reports for the file is the version token; a `PUT`
//! carrying a stale `sha` is rejected, which gives compare-and-write.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use npubdir_core::{RemoteError, RemoteFile, RemoteStore, VersionToken};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, info};

const USER_AGENT: &str = concat!("npubdir/", env!("CARGO_PKG_VERSION"));
const COMMIT_MESSAGE: &str = "Update npub directory";

pub struct GitHubContentsStore {
    client: Client,
    token: String,
    repo: String,
    path: String,
    branch: String,
    base_url: String,
}

impl GitHubContentsStore {
    pub fn new(token: String, repo: String, path: String, branch: String) -> anyhow::Result<Self> {
        info!("Creating GitHubContentsStore for {}:{}", repo, path);
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            token,
            repo,
            path,
            branch,
            base_url: "https://api.github.com".to_string(),
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn contents_url(&self) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.base_url.trim_end_matches('/'),
            self.repo,
            self.path.trim_start_matches('/')
        )
    }

    async fn read_error(response: reqwest::Response) -> RemoteError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_status(status, &body)
    }
}

/// Map a non-success status to the error the syncer reasons about.
fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let detail = format!("{status}: {}", body.trim());
    match status {
        // 409: sha mismatch, 422: sha missing for an existing file
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => RemoteError::VersionConflict,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(detail),
        _ => RemoteError::Transport(detail),
    }
}

/// Decode the body of a contents `GET`.
fn decode_file(body: &Value) -> Result<RemoteFile, RemoteError> {
    let sha = body["sha"]
        .as_str()
        .ok_or_else(|| RemoteError::Malformed("missing sha".to_string()))?;
    match body["encoding"].as_str() {
        None | Some("base64") => {}
        Some(other) => {
            return Err(RemoteError::Malformed(format!(
                "unsupported encoding '{other}'"
            )));
        }
    }
    let encoded: String = body["content"]
        .as_str()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| RemoteError::Malformed(format!("content is not base64: {e}")))?;
    let content = String::from_utf8(bytes)
        .map_err(|e| RemoteError::Malformed(format!("content is not UTF-8: {e}")))?;

    Ok(RemoteFile {
        content: Some(content),
        version: Some(VersionToken(sha.to_string())),
    })
}

fn put_body(content: &str, branch: &str, expected: Option<&VersionToken>) -> Value {
    let mut body = json!({
        "message": COMMIT_MESSAGE,
        "content": BASE64.encode(content),
        "branch": branch,
    });
    if let Some(version) = expected {
        body["sha"] = Value::String(version.0.clone());
    }
    body
}

fn transport(e: &reqwest::Error) -> RemoteError {
    RemoteError::Transport(e.to_string())
}

#[async_trait]
impl RemoteStore for GitHubContentsStore {
    async fn fetch(&self) -> Result<RemoteFile, RemoteError> {
        let response = self
            .client
            .get(format!("{}?ref={}", self.contents_url(), self.branch))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| transport(&e))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("{} does not exist yet on {}", self.path, self.branch);
            return Ok(RemoteFile::default());
        }
        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        decode_file(&body)
    }

    async fn put(
        &self,
        content: &str,
        expected: Option<&VersionToken>,
    ) -> Result<VersionToken, RemoteError> {
        let response = self
            .client
            .put(self.contents_url())
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&put_body(content, &self.branch, expected))
            .send()
            .await
            .map_err(|e| transport(&e))?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        body["content"]["sha"]
            .as_str()
            .map(|sha| VersionToken(sha.to_string()))
            .ok_or_else(|| RemoteError::Malformed("missing content.sha in response".to_string()))
    }
}
