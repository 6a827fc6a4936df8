use futures_util::future::join_all;
use pcapi_core::{Account, Record};
use tracing::{debug, error, info, warn};

use super::conflict::{detect_rename, sanitize_record_name};
use super::engine::{EngineError, SyncEngine};
use super::index::LocalRecord;
use super::queue::run_pool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Synced,
    /// An asset file is missing; the record will not be offered again.
    Incomplete,
}

/// Record ids grouped by how their upload ended.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub synced: Vec<String>,
    pub incomplete: Vec<String>,
    pub failed: Vec<String>,
}

impl UploadReport {
    pub fn is_empty(&self) -> bool {
        self.synced.is_empty() && self.incomplete.is_empty() && self.failed.is_empty()
    }
}

impl SyncEngine {
    /// Uploads every record that is neither synced nor incomplete.
    pub async fn upload_records(&self) -> Result<UploadReport, EngineError> {
        let account = self.account().await?;
        let pending = self.index.list_pending_uploads().await?;
        let mut report = UploadReport::default();
        if pending.is_empty() {
            info!("nothing to upload");
            return Ok(report);
        }
        debug!("{} records to upload", pending.len());

        let account = &account;
        let results = run_pool(pending, self.settings.workers, |local| async move {
            let id = local.id.clone();
            (id, self.upload_record(account, local).await)
        })
        .await;

        for (id, outcome) in results {
            match outcome {
                Ok(UploadOutcome::Synced) => report.synced.push(id),
                Ok(UploadOutcome::Incomplete) => report.incomplete.push(id),
                Err(err) => {
                    warn!("upload of {id} failed: {err}");
                    report.failed.push(id);
                }
            }
        }
        Ok(report)
    }

    /// Uploads one record and updates its flags. Other failures leave the
    /// stored record untouched so the next sync tries again.
    pub async fn upload_record(
        &self,
        account: &Account,
        mut local: LocalRecord,
    ) -> Result<UploadOutcome, EngineError> {
        match self.create_remote_record(account, &mut local.record).await {
            Ok(()) => {
                local.is_synced = true;
                self.index.save_record(&local).await?;
                debug!("record {} uploaded as {}", local.id, local.name());
                Ok(UploadOutcome::Synced)
            }
            Err(err) if err.is_missing_asset() => {
                error!("record {} is incomplete: {err}", local.id);
                local.is_incomplete = true;
                self.index.save_record(&local).await?;
                Ok(UploadOutcome::Incomplete)
            }
            Err(err) => Err(err),
        }
    }

    /// Posts the record and then each of its assets. `record` is renamed in
    /// place when the name had to be sanitised or the server chose another.
    pub async fn create_remote_record(
        &self,
        account: &Account,
        record: &mut Record,
    ) -> Result<(), EngineError> {
        record.name = sanitize_record_name(&record.name);
        if !record.has_location() {
            error!("record {} has no location", record.name);
            return Err(EngineError::MissingLocation(record.name.clone()));
        }

        // Not retried: a repeated POST makes the server store a renamed copy.
        let created = self
            .client
            .create_record(account, &record.name, &record.to_remote())
            .await?;
        if let Some(stored) = detect_rename(&record.name, &created.path) {
            info!("record {} renamed to {stored}", record.name);
            record.name = stored;
        }

        let record = &*record;
        let uploads = record.assets().filter_map(|(field, kind)| {
            let value = field.asset_value()?;
            let file_name = field.asset_file_name()?;
            Some(async move {
                let source = self.layout.resolve_asset(value);
                let url = self.client.record_asset_url(account, &record.name, file_name)?;
                let (url, source) = (&url, &source);
                self.retry(|| {
                    self.transfer
                        .upload_asset(&self.client, url, source, file_name, kind.mime())
                })
                .await?;
                Ok::<_, EngineError>(())
            })
        });

        let mut first_error = None;
        for outcome in join_all(uploads).await {
            if let Err(err) = outcome {
                if err.is_missing_asset() {
                    return Err(err);
                }
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
