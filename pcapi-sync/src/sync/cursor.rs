use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::engine::{EngineError, SyncEngine, SyncEvent};
use super::index::EditorGroup;
use super::queue::run_pool;

/// What a path reported by the sync delta refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaKind {
    Records,
    Editors,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathDetails {
    pub kind: DeltaKind,
    /// Record name or editor file name.
    pub value: String,
}

/// Splits a delta path such as `/records/Oak/record.json` into its top level
/// kind and the name right below it.
pub fn path_details(path: &str) -> PathDetails {
    let kind: String = path.chars().skip(1).take(7).collect();
    let start = path
        .get(1..)
        .and_then(|rest| rest.find('/'))
        .map_or(path.len(), |slash| slash + 2);
    let rest = &path[start..];
    let value = rest.split('/').next().unwrap_or(rest);

    let kind = match kind.as_str() {
        "records" => DeltaKind::Records,
        "editors" => DeltaKind::Editors,
        _ => DeltaKind::Other(kind),
    };
    PathDetails {
        kind,
        value: value.to_string(),
    }
}

enum DeltaJob {
    Record(String),
    Editor(String),
}

impl SyncEngine {
    /// Applies the cloud changes made since the stored cursor: deleted
    /// records and editors are removed locally, updated ones downloaded.
    /// A failed download is logged and does not stop the others.
    pub async fn sync_with_cursor(&self) -> Result<Vec<SyncEvent>, EngineError> {
        let session = self.index.get_session().await?;
        let account = session.account().ok_or(EngineError::NotLoggedIn)?;
        let cursor = session.cursor.ok_or(EngineError::MissingCursor)?;
        info!("sync with cursor {cursor}");
        let delta = self
            .retry(|| self.client.sync_delta(&account, &cursor))
            .await?;

        let mut events = Vec::new();
        let mut seen = HashSet::new();
        for path in &delta.deleted {
            let details = path_details(path);
            match details.kind {
                DeltaKind::Records => {
                    if !seen.insert(details.value.clone()) {
                        continue;
                    }
                    if let Some(local) = self.index.get_record_by_name(&details.value).await? {
                        debug!("remove record {} deleted in the cloud", local.id);
                        self.remove_local_record(&local).await?;
                        events.push(SyncEvent::removed(&local));
                    }
                }
                DeltaKind::Editors => {
                    self.delete_editor(EditorGroup::Private, &details.value)
                        .await?;
                }
                DeltaKind::Other(kind) => warn!("no such record type: {kind}"),
            }
        }

        let jobs = collect_updates(&delta.updated);
        if jobs.is_empty() {
            debug!("nothing updated since {cursor}");
            return Ok(events);
        }

        let results = run_pool(jobs, self.settings.workers, |job| async move {
            match job {
                DeltaJob::Record(name) => {
                    let outcome = self.update_record(&name).await;
                    (name, outcome)
                }
                DeltaJob::Editor(name) => {
                    let outcome = self
                        .download_editor(EditorGroup::Private, &name)
                        .await
                        .map(|_| None);
                    (name, outcome)
                }
            }
        })
        .await;

        for (name, outcome) in results {
            match outcome {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(err) => warn!("problem syncing {name}: {err}"),
            }
        }
        Ok(events)
    }

    /// Downloads `name` over the local record of that name, if any. Only a
    /// record that was not on the device yet yields an event.
    async fn update_record(&self, name: &str) -> Result<Option<SyncEvent>, EngineError> {
        let existing = self.index.get_record_by_name(name).await?;
        let is_new = existing.is_none();
        let local = self.download_record(name, existing).await?;
        Ok(is_new.then(|| SyncEvent::added(&local)))
    }
}

fn collect_updates(updated: &[String]) -> Vec<DeltaJob> {
    let mut records = HashSet::new();
    let mut editors = HashSet::new();
    let mut jobs = Vec::new();
    for path in updated {
        let details = path_details(path);
        if details.value.is_empty() {
            continue;
        }
        match details.kind {
            DeltaKind::Records => {
                if records.insert(details.value.clone()) {
                    jobs.push(DeltaJob::Record(details.value));
                }
            }
            DeltaKind::Editors => {
                if editors.insert(details.value.clone()) {
                    jobs.push(DeltaJob::Editor(details.value));
                }
            }
            DeltaKind::Other(kind) => warn!("no such record type: {kind}"),
        }
    }
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_of_record_asset_path() {
        let details = path_details("/records/Oak/oak.jpg");
        assert_eq!(details.kind, DeltaKind::Records);
        assert_eq!(details.value, "Oak");
    }

    #[test]
    fn details_of_editor_path() {
        let details = path_details("/editors/trees.edtr");
        assert_eq!(details.kind, DeltaKind::Editors);
        assert_eq!(details.value, "trees.edtr");
    }

    #[test]
    fn details_of_unknown_or_short_paths() {
        let details = path_details("/features/x.json");
        assert_eq!(details.kind, DeltaKind::Other("feature".to_string()));
        assert_eq!(details.value, "x.json");

        let details = path_details("/records");
        assert_eq!(details.kind, DeltaKind::Records);
        assert_eq!(details.value, "");
    }

    #[test]
    fn updates_are_deduplicated() {
        let updated = vec![
            "/records/Oak/record.json".to_string(),
            "/records/Oak/oak.jpg".to_string(),
            "/editors/trees.edtr".to_string(),
            "/editors/trees.edtr".to_string(),
            "/records/Pond/record.json".to_string(),
        ];
        let jobs = collect_updates(&updated);
        let names: Vec<_> = jobs
            .iter()
            .map(|job| match job {
                DeltaJob::Record(name) => format!("record:{name}"),
                DeltaJob::Editor(name) => format!("editor:{name}"),
            })
            .collect();
        assert_eq!(names, vec!["record:Oak", "editor:trees.edtr", "record:Pond"]);
    }
}
