use std::future::Future;
use std::io;
use std::path::Path;

use pcapi_core::{Account, PcapiClient, PcapiError};
use thiserror::Error;
use tracing::{error, info};

use super::backoff::{Backoff, Retryable};
use super::index::{IndexError, IndexStore, LocalRecord, now_unix};
use super::paths::{DataLayout, PathError};
use super::transfer::{TransferClient, TransferError};
use super::upload::UploadReport;

pub const DEFAULT_WORKERS: usize = 3;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("api error: {0}")]
    Api(#[from] PcapiError),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("no user is logged in")]
    NotLoggedIn,
    #[error("no sync cursor is stored")]
    MissingCursor,
    #[error("no anonymous user is configured for public editors")]
    MissingAnonymousUser,
    #[error("record {0} has no location")]
    MissingLocation(String),
}

impl EngineError {
    /// A local asset file referenced by the record is gone.
    pub fn is_missing_asset(&self) -> bool {
        matches!(self, EngineError::Transfer(TransferError::SourceMissing(_)))
    }
}

/// Local record changes produced by a sync, for whoever shows the records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Added { id: String, name: String },
    Removed { id: String, name: String },
}

impl SyncEvent {
    pub fn added(local: &LocalRecord) -> Self {
        SyncEvent::Added {
            id: local.id.clone(),
            name: local.name().to_string(),
        }
    }

    pub fn removed(local: &LocalRecord) -> Self {
        SyncEvent::Removed {
            id: local.id.clone(),
            name: local.name().to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncReport {
    /// Whether the run started from scratch rather than from a cursor.
    pub full: bool,
    pub editors: Vec<String>,
    pub events: Vec<SyncEvent>,
    pub upload: UploadReport,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Jobs in flight per sync phase.
    pub workers: usize,
    /// Extra attempts for requests failing with a transient error.
    pub retry_attempts: u32,
    /// Owner of the public editors.
    pub anonymous_user: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retry_attempts: 2,
            anonymous_user: None,
        }
    }
}

/// Keeps the on-device records and editors in step with the user's cloud
/// storage.
pub struct SyncEngine {
    pub(super) client: PcapiClient,
    pub(super) index: IndexStore,
    pub(super) transfer: TransferClient,
    pub(super) layout: DataLayout,
    pub(super) settings: EngineSettings,
    backoff: Backoff,
}

impl SyncEngine {
    pub fn new(client: PcapiClient, index: IndexStore, layout: DataLayout) -> Self {
        Self {
            client,
            index,
            transfer: TransferClient::new(),
            layout,
            settings: EngineSettings::default(),
            backoff: Backoff::default(),
        }
    }

    pub fn with_transfer(mut self, transfer: TransferClient) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// One sync run. Without a stored cursor this replaces every synced
    /// record and editor with the cloud copies; with one it applies the
    /// changes made since. Local records are uploaded afterwards and a fresh
    /// cursor is stored.
    pub async fn sync(&self) -> Result<SyncReport, EngineError> {
        let session = self.index.get_session().await?;
        if session.account().is_none() {
            return Err(EngineError::NotLoggedIn);
        }

        let mut report = SyncReport::default();
        if session.cursor.is_some() {
            report.events = self.sync_with_cursor().await?;
        } else {
            info!("no cursor stored, running a full sync");
            report.full = true;
            report.editors = self.download_editors().await?;
            report.events = self.download_records().await?;
        }

        report.upload = self.upload_records().await?;

        report.cursor = match self.store_cursor().await {
            Ok(cursor) => Some(cursor),
            Err(err) => {
                error!("problem fetching sync cursor: {err}");
                None
            }
        };
        Ok(report)
    }

    /// Fetches the current cloud cursor and stores it with the sync time.
    pub async fn store_cursor(&self) -> Result<String, EngineError> {
        let account = self.account().await?;
        let cursor = self
            .retry(|| self.client.sync_cursor(&account))
            .await?;
        self.index.set_cursor(Some(&cursor), Some(now_unix())).await?;
        info!("stored sync cursor: {cursor}");
        Ok(cursor)
    }

    pub(super) async fn account(&self) -> Result<Account, EngineError> {
        self.index
            .get_session()
            .await?
            .account()
            .ok_or(EngineError::NotLoggedIn)
    }

    pub(super) async fn retry<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.backoff.retry(self.settings.retry_attempts, op).await
    }

    /// Drops a record and its asset directory from the device.
    pub(super) async fn remove_local_record(&self, local: &LocalRecord) -> Result<(), EngineError> {
        self.index.delete_record(&local.id).await?;
        match self.layout.record_assets_dir(local.name()) {
            Ok(dir) => remove_dir_if_exists(&dir).await?,
            Err(err) => error!("no asset directory for {}: {err}", local.name()),
        }
        Ok(())
    }
}

pub(super) async fn remove_dir_if_exists(dir: &Path) -> Result<(), io::Error> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

pub(super) async fn remove_file_if_exists(file: &Path) -> Result<(), io::Error> {
    match tokio::fs::remove_file(file).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
