/// Model file download from HuggingFace.
///
/// Lists `.gguf` files in a repository and streams individual files to
/// disk. Transfers land in a `.part` file that is renamed into place only
/// after the whole body has been written.
use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::EmbedderError;

/// Default HuggingFace endpoint.
pub const HF_ENDPOINT: &str = "https://huggingface.co/";

/// A `.gguf` file published in a HuggingFace repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GgufFileDetails {
    pub filename: String,
    pub content_length: u64,
    pub object_id: Option<String>,
}

/// Remote repository that model and vocabulary files are fetched from.
pub trait ModelDownloader: Send + Sync {
    /// List the `.gguf` files in a repository, in listing order.
    fn list_gguf_files(
        &self,
        model_id: &str,
        api_key: Option<&str>,
    ) -> impl Future<Output = Result<Vec<GgufFileDetails>, EmbedderError>> + Send;

    /// Download `remote_filename` from `model_id` to `local_path`,
    /// overwriting any existing file.
    fn download_file(
        &self,
        model_id: &str,
        remote_filename: &str,
        local_path: &Path,
        api_key: Option<&str>,
    ) -> impl Future<Output = Result<(), EmbedderError>> + Send;
}

/// One entry of `api/models/{id}/tree/main`.
#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    oid: Option<String>,
}

/// HTTP client for the HuggingFace hub.
#[derive(Clone)]
pub struct HuggingFaceClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    cancel: CancellationToken,
}

impl HuggingFaceClient {
    /// Create a client for `endpoint`.
    ///
    /// `api_key` is used for requests that don't carry their own key.
    /// Cancelling `cancel` aborts any transfer in progress.
    pub fn new(endpoint: &str, api_key: Option<String>, cancel: CancellationToken) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("embedserve/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        let mut endpoint = endpoint.to_string();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }

        Ok(Self {
            http,
            endpoint,
            api_key: api_key.filter(|k| !k.is_empty()),
            cancel,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn tree_url(&self, model_id: &str) -> String {
        format!("{}api/models/{model_id}/tree/main", self.endpoint)
    }

    fn resolve_url(&self, model_id: &str, filename: &str) -> String {
        format!("{}{model_id}/resolve/main/{filename}", self.endpoint)
    }

    fn get(&self, url: &str, api_key: Option<&str>) -> reqwest::RequestBuilder {
        let request = self.http.get(url);
        match api_key.filter(|k| !k.is_empty()).or(self.api_key.as_deref()) {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Stream the response body into `dest`, returning the byte count.
    async fn stream_to_file(
        &self,
        mut resp: reqwest::Response,
        dest: &Path,
        url: &str,
    ) -> Result<u64, EmbedderError> {
        let total = resp.content_length().unwrap_or(0);

        let pb = if total > 0 {
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {percent}% ({bytes}/{total_bytes}) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▓░"),
            );
            pb
        } else {
            ProgressBar::new_spinner()
        };

        let mut file = tokio::fs::File::create(dest).await.map_err(|e| {
            EmbedderError::Download(format!("failed to create {}: {e}", dest.display()))
        })?;

        let mut written = 0u64;
        loop {
            let chunk = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    pb.abandon_with_message("cancelled");
                    return Err(EmbedderError::Download(format!("download of {url} cancelled")));
                }
                chunk = resp.chunk() => chunk,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    file.write_all(&bytes).await.map_err(|e| {
                        EmbedderError::Download(format!("failed to write {}: {e}", dest.display()))
                    })?;
                    written += bytes.len() as u64;
                    pb.set_position(written);
                }
                Ok(None) => break,
                Err(e) => {
                    pb.abandon();
                    return Err(EmbedderError::Download(format!(
                        "failed reading body of {url}: {e}"
                    )));
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| EmbedderError::Download(format!("failed to flush {}: {e}", dest.display())))?;
        pb.finish_and_clear();

        Ok(written)
    }
}

impl ModelDownloader for HuggingFaceClient {
    async fn list_gguf_files(
        &self,
        model_id: &str,
        api_key: Option<&str>,
    ) -> Result<Vec<GgufFileDetails>, EmbedderError> {
        let url = self.tree_url(model_id);
        debug!("Listing files at {url}");

        let resp = self
            .get(&url, api_key)
            .send()
            .await
            .map_err(|e| EmbedderError::Download(format!("HTTP request failed: {url}: {e}")))?;

        if !resp.status().is_success() {
            return Err(EmbedderError::Download(format!(
                "bad status: {} for {url}",
                resp.status()
            )));
        }

        let entries: Vec<TreeEntry> = resp
            .json()
            .await
            .map_err(|e| EmbedderError::Download(format!("invalid listing from {url}: {e}")))?;

        Ok(gguf_files(entries))
    }

    async fn download_file(
        &self,
        model_id: &str,
        remote_filename: &str,
        local_path: &Path,
        api_key: Option<&str>,
    ) -> Result<(), EmbedderError> {
        let url = self.resolve_url(model_id, remote_filename);
        if self.cancel.is_cancelled() {
            return Err(EmbedderError::Download(format!("download of {url} cancelled")));
        }

        info!("Downloading {url} -> {}", local_path.display());

        let resp = self
            .get(&url, api_key)
            .send()
            .await
            .map_err(|e| EmbedderError::Download(format!("HTTP request failed: {url}: {e}")))?;

        if !resp.status().is_success() {
            return Err(EmbedderError::Download(format!(
                "bad status: {} for {url}",
                resp.status()
            )));
        }

        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EmbedderError::Download(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let part = part_path(local_path);
        let written = match self.stream_to_file(resp, &part, &url).await {
            Ok(0) => Err(EmbedderError::Download(format!("empty response body from {url}"))),
            other => other,
        };

        let written = match written {
            Ok(n) => n,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&part).await {
                    warn!("Failed to remove partial download {}: {rm}", part.display());
                }
                return Err(e);
            }
        };

        tokio::fs::rename(&part, local_path).await.map_err(|e| {
            EmbedderError::Download(format!("failed to move into {}: {e}", local_path.display()))
        })?;

        info!("Downloaded {written} bytes to {}", local_path.display());
        Ok(())
    }
}

/// Keep only `.gguf` entries of a repository listing.
fn gguf_files(entries: Vec<TreeEntry>) -> Vec<GgufFileDetails> {
    entries
        .into_iter()
        .filter(|e| e.path.ends_with(".gguf"))
        .map(|e| GgufFileDetails {
            filename: e.path,
            content_length: e.size,
            object_id: e.oid,
        })
        .collect()
}

/// Temporary path a download is written to before the final rename.
fn part_path(local_path: &Path) -> PathBuf {
    let mut name = local_path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
