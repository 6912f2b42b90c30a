//! reqwest client for the Manylla blob server.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{RemoteBlob, RemoteError, RemoteStore, ShareRequest, ShareStore};

/// Where the server lives and how long to wait for it.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// API root, e.g. `https://manylla.com/qual/api`.
    pub base_url: String,
    pub timeout: Duration,
}

/// HTTP implementation of [`RemoteStore`] and [`ShareStore`].
#[derive(Debug, Clone)]
pub struct HttpRemote {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct ShareResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

const fn default_success() -> bool {
    true
}

impl HttpRemote {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        if config.base_url.is_empty() {
            return Err(RemoteError::Config("base_url is empty".into()));
        }
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(RemoteError::Config(format!(
                "base_url must be http(s): {}",
                config.base_url
            )));
        }

        // reqwest is built with rustls-no-provider; Err means a provider is
        // already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Config(format!("failed to build HTTP client: {e}")))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check_status(resp: &reqwest::Response) -> Result<(), RemoteError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Api {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").into(),
            });
        }
        Ok(())
    }

    /// `GET /health`; `true` only for `{"status": "healthy"}`.
    pub async fn check_health(&self) -> bool {
        let Ok(resp) = self.http.get(self.api_url("/health")).send().await else {
            return false;
        };
        if Self::check_status(&resp).is_err() {
            return false;
        }
        resp.json::<HealthResponse>()
            .await
            .is_ok_and(|h| h.status == "healthy")
    }
}

impl RemoteStore for HttpRemote {
    async fn put_blob(&self, sync_id: &str, encrypted_blob: &str) -> Result<(), RemoteError> {
        let url = self.api_url(&format!("/sync/{sync_id}"));
        let resp = self
            .http
            .put(&url)
            .json(&json!({ "encrypted_blob": encrypted_blob }))
            .send()
            .await?;
        Self::check_status(&resp)?;
        debug!(sync_id = %sync_id, bytes = encrypted_blob.len(), "Blob stored");
        Ok(())
    }

    async fn fetch_blob(&self, sync_id: &str) -> Result<Option<RemoteBlob>, RemoteError> {
        let url = self.api_url(&format!("/sync/{sync_id}"));
        let resp = self.http.get(&url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::check_status(&resp)?;
        let blob = resp
            .json::<RemoteBlob>()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        Ok(Some(blob))
    }
}

impl ShareStore for HttpRemote {
    async fn create_share(&self, request: &ShareRequest) -> Result<(), RemoteError> {
        let resp = self
            .http
            .post(self.api_url("/share"))
            .json(request)
            .send()
            .await?;
        Self::check_status(&resp)?;
        // An empty 2xx body counts as success.
        let body = resp.bytes().await?;
        if body.is_empty() {
            return Ok(());
        }
        let parsed: ShareResponse =
            serde_json::from_slice(&body).map_err(|e| RemoteError::Malformed(e.to_string()))?;
        if !parsed.success {
            return Err(RemoteError::Api {
                status: 200,
                message: parsed
                    .error
                    .unwrap_or_else(|| "share was not stored".to_string()),
            });
        }
        Ok(())
    }
}
