//! Where bytes come from: URL resolution and the HTTP transfer itself.

use crate::destination::FileSink;
use crate::error::TransferError;
use crate::models::Task;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `(loaded, total)` callback fired while a body streams in.
pub type ProgressFn = dyn Fn(u64, Option<u64>) + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub database_id: Option<String>,
    pub asset_id: Option<String>,
    pub key: String,
    pub version_id: Option<String>,
}

impl From<&Task> for ResolveRequest {
    fn from(task: &Task) -> Self {
        Self {
            database_id: task.asset.as_ref().map(|a| a.database_id.clone()),
            asset_id: task.asset.as_ref().map(|a| a.asset_id.clone()),
            key: task.source_key.clone(),
            version_id: task.version_id.clone(),
        }
    }
}

#[async_trait]
pub trait UrlResolver: Send + Sync {
    async fn resolve(&self, request: &ResolveRequest) -> Result<String, TransferError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Streams `url` into `sink`, returning the number of bytes received.
    async fn fetch(
        &self,
        url: &str,
        sink: &mut dyn FileSink,
        progress: &ProgressFn,
    ) -> Result<u64, TransferError>;
}

/// The key already is the download URL (link files).
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectResolver;

#[async_trait]
impl UrlResolver for DirectResolver {
    async fn resolve(&self, request: &ResolveRequest) -> Result<String, TransferError> {
        if request.key.starts_with("http://") || request.key.starts_with("https://") {
            Ok(request.key.clone())
        } else {
            Err(TransferError::Resolve(format!(
                "'{}' is not an http(s) url",
                request.key
            )))
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadRequest<'a> {
    download_type: &'static str,
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadResponse {
    download_url: Option<String>,
    message: Option<String>,
}

/// Asks the asset API for a presigned download URL.
#[derive(Debug, Clone)]
pub struct ApiResolver {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiResolver {
    pub fn new(client: Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn endpoint(&self, database_id: &str, asset_id: &str) -> String {
        format!(
            "{}/database/{}/assets/{}/download",
            self.base_url, database_id, asset_id
        )
    }
}

#[async_trait]
impl UrlResolver for ApiResolver {
    async fn resolve(&self, request: &ResolveRequest) -> Result<String, TransferError> {
        let (Some(database_id), Some(asset_id)) = (&request.database_id, &request.asset_id) else {
            return Err(TransferError::Resolve(format!(
                "no database/asset for '{}'",
                request.key
            )));
        };

        let body = DownloadRequest {
            download_type: "assetFile",
            key: &request.key,
            version_id: request.version_id.as_deref(),
        };
        let mut call = self
            .client
            .post(self.endpoint(database_id, asset_id))
            .json(&body);
        if let Some(token) = &self.token {
            call = call.bearer_auth(token);
        }

        let response = call.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let parsed: Option<DownloadResponse> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let message = parsed
                .and_then(|p| p.message)
                .unwrap_or_else(|| format!("status {status}"));
            return Err(TransferError::Resolve(message));
        }

        match parsed.and_then(|p| p.download_url) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(TransferError::Resolve(format!(
                "response for '{}' carried no downloadUrl",
                request.key
            ))),
        }
    }
}

/// Plain GET over reqwest, body streamed chunk by chunk.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        url: &str,
        sink: &mut dyn FileSink,
        progress: &ProgressFn,
    ) -> Result<u64, TransferError> {
        let mut response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(TransferError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let total = response.content_length();
        let mut loaded = 0u64;
        progress(0, total);

        while let Some(chunk) = response.chunk().await? {
            if chunk.is_empty() {
                continue;
            }
            sink.write(&chunk).await?;
            loaded += chunk.len() as u64;
            progress(loaded, total);
        }

        Ok(loaded)
    }
}

/// Shared HTTP client, optionally behind a proxy.
pub fn build_client(proxy: Option<&str>) -> anyhow::Result<Client> {
    let mut builder = Client::builder().connect_timeout(Duration::from_secs(30));

    if let Some(proxy_url) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url).context("Invalid proxy url")?);
    }

    builder.build().context("Failed to build HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str) -> ResolveRequest {
        ResolveRequest {
            database_id: None,
            asset_id: None,
            key: key.to_string(),
            version_id: None,
        }
    }

    #[tokio::test]
    async fn direct_resolver_passes_urls_through() {
        let url = DirectResolver
            .resolve(&request("https://cdn.example.com/a.glb"))
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/a.glb");
    }

    #[tokio::test]
    async fn direct_resolver_rejects_bare_keys() {
        let err = DirectResolver.resolve(&request("a.glb")).await.unwrap_err();
        assert!(matches!(err, TransferError::Resolve(_)));
    }

    #[tokio::test]
    async fn api_resolver_needs_an_asset() {
        let resolver = ApiResolver::new(Client::new(), "http://localhost", None);
        let err = resolver.resolve(&request("a.glb")).await.unwrap_err();
        assert!(matches!(err, TransferError::Resolve(_)));
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let resolver = ApiResolver::new(Client::new(), "https://api.example.com/", None);
        assert_eq!(
            resolver.endpoint("db1", "as1"),
            "https://api.example.com/database/db1/assets/as1/download"
        );
    }
}
