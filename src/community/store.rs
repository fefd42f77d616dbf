use crate::config::CommunityConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::types::CommunityCatalog;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// The catalog together with the version token it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct VersionedDocument {
    pub catalog: CommunityCatalog,
    pub token: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteReceipt {
    pub commit: Option<String>,
}

/// Compare-and-swap access to the shared catalog document.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn read(&self) -> GatewayResult<VersionedDocument>;

    /// Replaces the document only if `token` still names its current
    /// version. A stale token fails with [`GatewayError::Conflict`].
    async fn write(
        &self,
        catalog: &CommunityCatalog,
        token: &str,
        message: &str,
    ) -> GatewayResult<WriteReceipt>;
}

fn encode_catalog(catalog: &CommunityCatalog) -> GatewayResult<String> {
    serde_json::to_string_pretty(catalog)
        .map_err(|e| GatewayError::malformed(format!("encode community catalog: {e}")))
}

// ============================================
// GitHub contents API
// ============================================

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const CLIENT_USER_AGENT: &str = "wizard-gateway";

#[derive(Deserialize)]
struct ContentsResponse {
    content: String,
    sha: String,
}

#[derive(Serialize)]
struct UpdateContentsRequest<'a> {
    message: &'a str,
    content: String,
    sha: &'a str,
    branch: &'a str,
}

#[derive(Deserialize)]
struct UpdateContentsResponse {
    #[serde(default)]
    commit: Option<CommitRef>,
}

#[derive(Deserialize)]
struct CommitRef {
    sha: Option<String>,
}

/// Catalog stored as a file in a GitHub repository; the blob sha is the
/// version token.
pub struct GitHubContentStore {
    http: Client,
    contents_url: String,
    branch: String,
    token: String,
}

impl GitHubContentStore {
    pub fn new(
        api_base: &str,
        repo: &str,
        file_path: &str,
        branch: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            contents_url: format!(
                "{}/repos/{}/contents/{}",
                api_base.trim_end_matches('/'),
                repo.trim_matches('/'),
                file_path.trim_start_matches('/')
            ),
            branch: branch.into(),
            token: token.into(),
        }
    }

    /// On failure, names the first setting still missing.
    pub fn from_config(config: &CommunityConfig, timeout: Duration) -> Result<Self, &'static str> {
        if let Some(missing) = config.missing_setting() {
            return Err(missing);
        }
        let (Some(repo), Some(token)) = (&config.repo, &config.token) else {
            return Err("GITHUB_TOKEN");
        };
        Ok(Self::new(
            &config.api_base,
            repo,
            &config.file_path,
            config.branch.clone(),
            token.clone(),
            timeout,
        ))
    }

    async fn upstream_error(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        GatewayError::Upstream {
            service: "content host",
            status,
            body,
        }
    }
}

#[async_trait]
impl ContentStore for GitHubContentStore {
    async fn read(&self) -> GatewayResult<VersionedDocument> {
        let response = self
            .http
            .get(&self.contents_url)
            .query(&[("ref", self.branch.as_str())])
            .bearer_auth(&self.token)
            .header(ACCEPT, GITHUB_ACCEPT)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .send()
            .await?;
        if !response.status().is_success() {
            let err = Self::upstream_error(response).await;
            warn!("failed to fetch community catalog: {}", err);
            return Err(err);
        }

        let contents: ContentsResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::malformed(format!("contents response: {e}")))?;

        // The API wraps base64 at 60 columns.
        let packed: String = contents
            .content
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let bytes = STANDARD
            .decode(packed)
            .map_err(|e| GatewayError::malformed(format!("catalog base64: {e}")))?;
        let catalog = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::malformed(format!("catalog json: {e}")))?;

        debug!(sha = %contents.sha, "fetched community catalog");
        Ok(VersionedDocument {
            catalog,
            token: contents.sha,
        })
    }

    async fn write(
        &self,
        catalog: &CommunityCatalog,
        token: &str,
        message: &str,
    ) -> GatewayResult<WriteReceipt> {
        let body = UpdateContentsRequest {
            message,
            content: STANDARD.encode(encode_catalog(catalog)?),
            sha: token,
            branch: &self.branch,
        };
        let response = self
            .http
            .put(&self.contents_url)
            .bearer_auth(&self.token)
            .header(ACCEPT, GITHUB_ACCEPT)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED {
            let detail = response.text().await.unwrap_or_default();
            warn!(%status, "community catalog changed since it was read");
            return Err(GatewayError::Conflict(format!(
                "community catalog changed since sha {token}; re-read and retry ({detail})"
            )));
        }
        if !status.is_success() {
            let err = Self::upstream_error(response).await;
            warn!("failed to update community catalog: {}", err);
            return Err(err);
        }

        let commit = response
            .json::<UpdateContentsResponse>()
            .await
            .ok()
            .and_then(|updated| updated.commit)
            .and_then(|commit| commit.sha);
        Ok(WriteReceipt { commit })
    }
}

// ============================================
// In-memory store
// ============================================

/// Process-local store with the same compare-and-swap contract. The token
/// is a hash of the serialized document.
#[derive(Default)]
pub struct MemoryContentStore {
    document: Mutex<CommunityCatalog>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryContentStore {
    pub fn new(catalog: CommunityCatalog) -> Self {
        Self {
            document: Mutex::new(catalog),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CommunityCatalog> {
        self.document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn token_of(catalog: &CommunityCatalog) -> GatewayResult<String> {
        let mut hasher = DefaultHasher::new();
        encode_catalog(catalog)?.hash(&mut hasher);
        Ok(format!("{:016x}", hasher.finish()))
    }

    /// Current document and token, without counting as a read.
    pub fn snapshot(&self) -> GatewayResult<VersionedDocument> {
        let catalog = self.lock().clone();
        let token = Self::token_of(&catalog)?;
        Ok(VersionedDocument { catalog, token })
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Successful writes only.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn read(&self) -> GatewayResult<VersionedDocument> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.snapshot()
    }

    async fn write(
        &self,
        catalog: &CommunityCatalog,
        token: &str,
        _message: &str,
    ) -> GatewayResult<WriteReceipt> {
        let mut current = self.lock();
        let current_token = Self::token_of(&current)?;
        if current_token != token {
            return Err(GatewayError::Conflict(format!(
                "community catalog is at {current_token}, write was based on {token}"
            )));
        }
        *current = catalog.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteReceipt {
            commit: Some(Self::token_of(&current)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_rejects_stale_token() {
        let store = MemoryContentStore::default();
        let first = store.read().await.unwrap();

        let mut changed = first.catalog.clone();
        changed.last_updated = Some("2024-05-01T00:00:00.000Z".into());
        store.write(&changed, &first.token, "update").await.unwrap();

        let err = store
            .write(&first.catalog, &first.token, "stale")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
        assert_eq!(store.snapshot().unwrap().catalog, changed);
        assert_eq!(store.writes(), 1);
    }

    #[test]
    fn contents_url_is_normalized() {
        let store = GitHubContentStore::new(
            "https://api.github.com/",
            "acme/wizard",
            "/community-agents.json",
            "main",
            "token",
            Duration::from_secs(5),
        );
        assert_eq!(
            store.contents_url,
            "https://api.github.com/repos/acme/wizard/contents/community-agents.json"
        );
    }

    #[test]
    fn from_config_names_missing_setting() {
        let config = CommunityConfig {
            api_base: "https://api.github.com".into(),
            repo: None,
            token: Some("t".into()),
            file_path: "community-agents.json".into(),
            branch: "main".into(),
        };
        assert_eq!(
            GitHubContentStore::from_config(&config, Duration::from_secs(1)).err(),
            Some("GITHUB_REPO")
        );
    }
}
