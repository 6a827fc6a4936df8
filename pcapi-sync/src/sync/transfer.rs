use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures_util::StreamExt;
use pcapi_core::{PcapiClient, PcapiError};
use reqwest::header::CACHE_CONTROL;
use reqwest::multipart::Part;
use reqwest::{Body, Client, StatusCode};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Api(#[from] PcapiError),
    #[error("local asset is missing: {}", .0.display())]
    SourceMissing(PathBuf),
    #[error("concurrency limiter is closed")]
    ConcurrencyClosed,
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Request(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.status().is_some_and(|status| {
                        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
                    })
            }
            TransferError::Api(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Moves asset and editor files between the cloud and the device. Each
/// direction has its own concurrency limit, shared by every worker.
#[derive(Clone)]
pub struct TransferClient {
    http: Client,
    download_limit: Arc<Semaphore>,
    upload_limit: Arc<Semaphore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    pub download_concurrency: usize,
    pub upload_concurrency: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_concurrency: 4,
            upload_concurrency: 2,
        }
    }
}

impl TransferClient {
    pub fn new() -> Self {
        Self::with_http(Client::new(), TransferConfig::default())
    }

    pub fn with_http(http: Client, config: TransferConfig) -> Self {
        Self {
            http,
            download_limit: Arc::new(Semaphore::new(config.download_concurrency.max(1))),
            upload_limit: Arc::new(Semaphore::new(config.upload_concurrency.max(1))),
        }
    }

    /// Streams `url` into `target`. The body lands in a `.partial` sibling
    /// first so an interrupted download never leaves a truncated file.
    pub async fn download_to_path(&self, url: &Url, target: &Path) -> Result<(), TransferError> {
        let _permit = self
            .download_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::ConcurrencyClosed)?;
        debug!("download: {url} to {}", target.display());
        let response = self
            .http
            .get(url.clone())
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?
            .error_for_status()?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(target);
        let written = write_stream(response, &partial).await;
        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }

        tokio::fs::rename(partial, target).await?;
        Ok(())
    }

    /// Posts `source` as the multipart `file` field of `url`.
    pub async fn upload_asset(
        &self,
        client: &PcapiClient,
        url: &Url,
        source: &Path,
        file_name: &str,
        mime: &str,
    ) -> Result<(), TransferError> {
        let _permit = self
            .upload_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::ConcurrencyClosed)?;
        let part = file_part(source, file_name, mime).await?;
        debug!("upload: {} to {url}", source.display());
        client.upload_asset(url.clone(), part).await?;
        Ok(())
    }
}

impl Default for TransferClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_stream(response: reqwest::Response, partial: &Path) -> Result<(), TransferError> {
    let mut file = tokio::fs::File::create(partial).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

async fn file_part(source: &Path, file_name: &str, mime: &str) -> Result<Part, TransferError> {
    let file = match tokio::fs::File::open(source).await {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(TransferError::SourceMissing(source.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    };
    let length = file.metadata().await?.len();
    let body = Body::wrap_stream(ReaderStream::new(file));
    let part = Part::stream_with_length(body, length)
        .file_name(file_name.to_string())
        .mime_str(mime)?;
    Ok(part)
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
