use std::path::{Path, PathBuf};

use futures_util::future::join_all;
use pcapi_core::{Account, PcapiError};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::engine::{EngineError, SyncEngine, SyncEvent, remove_file_if_exists};
use super::index::{EditorGroup, LocalRecord};
use super::paths::local_path_for;
use super::queue::run_pool;

const EDITORS_DIR: &str = "editors";

impl SyncEngine {
    /// Replaces the private editors on the device with the ones in the
    /// user's cloud storage. Returns the names that were fetched.
    pub async fn download_editors(&self) -> Result<Vec<String>, EngineError> {
        let local_dir = self.layout.editors_dir(EditorGroup::Private);
        for entry in self.index.clear_editors(EditorGroup::Private).await? {
            remove_file_if_exists(Path::new(&entry.path)).await?;
        }

        let downloaded = self.download_items(EDITORS_DIR, &local_dir).await?;
        for (name, path) in &downloaded {
            self.index
                .register_editor(EditorGroup::Private, name, &path.to_string_lossy())
                .await?;
        }
        Ok(downloaded.into_iter().map(|(name, _)| name).collect())
    }

    /// Mirrors a remote directory into `local_dir`, whose files are removed
    /// first. Subdirectories are left alone.
    ///
    /// A listing the server refuses, or an empty one, leaves nothing to do.
    /// Files that fail to download are logged and left out of the result.
    pub async fn download_items(
        &self,
        remote_dir: &str,
        local_dir: &Path,
    ) -> Result<Vec<(String, PathBuf)>, EngineError> {
        info!("sync {remote_dir}");
        let account = self.account().await?;
        remove_files_in(local_dir).await?;

        let listing = match self.retry(|| self.client.fs_items(&account, remote_dir)).await {
            Ok(listing) => listing,
            Err(err) => {
                warn!("no {remote_dir} to sync: {err}");
                return Ok(Vec::new());
            }
        };
        let names = listing.file_names();
        if names.is_empty() {
            info!("no {remote_dir} to sync");
            return Ok(Vec::new());
        }
        debug!("{} {remote_dir} to download", names.len());

        let account = &account;
        let results = run_pool(names, self.settings.workers, |name| async move {
            let outcome = self
                .download_item(account, None, remote_dir, &name, local_dir)
                .await;
            (name, outcome)
        })
        .await;

        let mut downloaded = Vec::with_capacity(results.len());
        for (name, outcome) in results {
            match outcome {
                Ok(path) => downloaded.push((name, path)),
                Err(err) => warn!("problem downloading {remote_dir}/{name}: {err}"),
            }
        }
        Ok(downloaded)
    }

    /// Fetches one file of `remote_dir` into `local_dir`. `owner` selects a
    /// user other than the logged in one, e.g. for public editors.
    pub async fn download_item(
        &self,
        account: &Account,
        owner: Option<&str>,
        remote_dir: &str,
        file_name: &str,
        local_dir: &Path,
    ) -> Result<PathBuf, EngineError> {
        let url = match owner {
            Some(owner) => self.client.build_user_url(
                &account.provider,
                owner,
                remote_dir,
                Some(file_name),
            )?,
            None => self.client.build_fs_url(account, remote_dir, file_name)?,
        };
        let target = local_path_for(local_dir, file_name)?;
        let (url, target_ref) = (&url, &target);
        self.retry(|| self.transfer.download_to_path(url, target_ref))
            .await?;
        Ok(target)
    }

    /// Fetches a single editor into its group's directory and registers it.
    /// Public editors belong to the configured anonymous user.
    pub async fn download_editor(
        &self,
        group: EditorGroup,
        editor: &str,
    ) -> Result<PathBuf, EngineError> {
        let account = self.account().await?;
        let owner = match group {
            EditorGroup::Private => None,
            EditorGroup::Public => Some(
                self.settings
                    .anonymous_user
                    .as_deref()
                    .ok_or(EngineError::MissingAnonymousUser)?,
            ),
        };
        let file_name = editor.rsplit('/').next().unwrap_or(editor);
        let local_dir = self.layout.editors_dir(group);
        let path = self
            .download_item(&account, owner, EDITORS_DIR, file_name, &local_dir)
            .await?;
        self.index
            .register_editor(group, file_name, &path.to_string_lossy())
            .await?;
        debug!("downloaded {} editor {file_name}", group.as_str());
        Ok(path)
    }

    /// Removes an editor file and its registration.
    pub async fn delete_editor(&self, group: EditorGroup, editor: &str) -> Result<bool, EngineError> {
        let file_name = editor.rsplit('/').next().unwrap_or(editor);
        let Some(entry) = self.index.delete_editor(group, file_name).await? else {
            return Ok(false);
        };
        remove_file_if_exists(Path::new(&entry.path)).await?;
        Ok(true)
    }

    /// Editor file names published by `user_id` on the current provider.
    pub async fn list_editors(&self, user_id: &str) -> Result<Vec<String>, EngineError> {
        let account = self.account().await?;
        let listing = self
            .retry(|| self.client.list_editors(&account.provider, user_id))
            .await?;
        Ok(listing.file_names())
    }

    /// Replaces the public editors with those of the anonymous user.
    pub async fn download_public_editors(&self) -> Result<Vec<String>, EngineError> {
        let owner = self
            .settings
            .anonymous_user
            .clone()
            .ok_or(EngineError::MissingAnonymousUser)?;
        for entry in self.index.clear_editors(EditorGroup::Public).await? {
            remove_file_if_exists(Path::new(&entry.path)).await?;
        }

        let names = self.list_editors(&owner).await?;
        let results = run_pool(names, self.settings.workers, |name| async move {
            let outcome = self.download_editor(EditorGroup::Public, &name).await;
            (name, outcome)
        })
        .await;

        let mut downloaded = Vec::new();
        for (name, outcome) in results {
            match outcome {
                Ok(_) => downloaded.push(name),
                Err(err) => warn!("problem downloading public editor {name}: {err}"),
            }
        }
        Ok(downloaded)
    }

    /// Drops every synced record from the device and downloads all records
    /// in the cloud. Unsynced local records are kept for upload.
    pub async fn download_records(&self) -> Result<Vec<SyncEvent>, EngineError> {
        info!("sync download all records");
        let account = self.account().await?;
        let mut events = Vec::new();

        for local in self.index.list_records().await? {
            if local.is_synced {
                debug!("delete synced record: {}", local.id);
                self.remove_local_record(&local).await?;
                events.push(SyncEvent::removed(&local));
            }
        }

        let listing = match self.retry(|| self.client.records(&account)).await {
            Ok(listing) => listing,
            Err(PcapiError::Rejected { msg, .. }) => {
                error!("error with fetching records: {msg}");
                return Ok(events);
            }
            Err(err) => return Err(err.into()),
        };
        let names = listing.names();
        debug!("{} records to download", names.len());

        let results = run_pool(names, self.settings.workers, |name| async move {
            let outcome = self.download_record(&name, None).await;
            (name, outcome)
        })
        .await;

        for (name, outcome) in results {
            match outcome {
                Ok(local) => events.push(SyncEvent::added(&local)),
                Err(err) => warn!("problem syncing {name}: {err}"),
            }
        }
        Ok(events)
    }

    /// Fetches the record `name` and its assets.
    ///
    /// Asset fields end up pointing at the downloaded files. With `existing`
    /// the local record keeps its id and flags and gets the new content;
    /// otherwise a new synced record is stored. Nothing is stored unless
    /// every asset arrived, and the assets that did arrive are removed.
    pub async fn download_record(
        &self,
        name: &str,
        existing: Option<LocalRecord>,
    ) -> Result<LocalRecord, EngineError> {
        let account = self.account().await?;
        let mut record = self.retry(|| self.client.record(&account, name)).await?;

        let assets: Vec<(usize, String)> = record
            .properties
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.asset_kind().is_some())
            .filter_map(|(index, field)| {
                field.asset_file_name().map(|file| (index, file.to_string()))
            })
            .collect();

        let account = &account;
        let downloads = assets.iter().map(|(index, file_name)| async move {
            let url = self.client.record_asset_url(account, name, file_name)?;
            let target = self.layout.asset_path(name, file_name)?;
            let (url_ref, target_ref) = (&url, &target);
            self.retry(|| self.transfer.download_to_path(url_ref, target_ref))
                .await?;
            Ok::<_, EngineError>((*index, target))
        });
        let mut fetched = Vec::with_capacity(assets.len());
        let mut failure = None;
        for outcome in join_all(downloads).await {
            match outcome {
                Ok((index, target)) => {
                    record.properties.fields[index].val =
                        Value::String(target.to_string_lossy().into_owned());
                    fetched.push(target);
                }
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        if let Some(err) = failure {
            for path in &fetched {
                remove_file_if_exists(path).await?;
            }
            let dir = self.layout.record_assets_dir(name)?;
            if tokio::fs::remove_dir(&dir).await.is_ok() {
                debug!("removed empty asset dir {}", dir.display());
            }
            return Err(err);
        }

        record.name = name.to_string();
        let local = match existing {
            Some(mut local) => {
                local.record = record;
                self.index.save_record(&local).await?;
                local
            }
            None => self.index.insert_record(&record, true).await?,
        };
        debug!("saved record {name} as {}", local.id);
        Ok(local)
    }
}

async fn remove_files_in(dir: &Path) -> Result<(), std::io::Error> {
    tokio::fs::create_dir_all(dir).await?;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            remove_file_if_exists(&entry.path()).await?;
        }
    }
    Ok(())
}
