use std::{fs, path::Path};

use pcapi_core::{Account, Record};
use sqlx::{
    Row, SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteRow},
};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored record is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid editor group: {0}")]
    InvalidEditorGroup(String),
    #[error("record not found after save")]
    MissingRecord,
}

/// A record kept on the device together with its sync flags.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRecord {
    pub id: String,
    pub record: Record,
    pub is_synced: bool,
    pub is_incomplete: bool,
}

impl LocalRecord {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn is_pending_upload(&self) -> bool {
        !self.is_synced && !self.is_incomplete
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditorGroup {
    Private,
    Public,
}

impl EditorGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditorGroup::Private => "private",
            EditorGroup::Public => "public",
        }
    }

    fn parse(value: &str) -> Result<Self, IndexError> {
        match value {
            "private" => Ok(EditorGroup::Private),
            "public" => Ok(EditorGroup::Public),
            other => Err(IndexError::InvalidEditorGroup(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorEntry {
    pub group: EditorGroup,
    pub name: String,
    pub path: String,
}

/// Login and sync bookkeeping. There is only ever one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub provider: Option<String>,
    pub user_id: Option<String>,
    pub cursor: Option<String>,
    pub last_sync: Option<i64>,
}

impl Session {
    pub fn account(&self) -> Option<Account> {
        match (&self.provider, &self.user_id) {
            (Some(provider), Some(user_id)) => Some(Account::new(provider, user_id)),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct IndexStore {
    pool: SqlitePool,
}

impl IndexStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, IndexError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn open(db_path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), IndexError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Stores a new record under a fresh id.
    pub async fn insert_record(
        &self,
        record: &Record,
        is_synced: bool,
    ) -> Result<LocalRecord, IndexError> {
        let local = LocalRecord {
            id: Uuid::new_v4().to_string(),
            record: record.clone(),
            is_synced,
            is_incomplete: false,
        };
        self.save_record(&local).await?;
        Ok(local)
    }

    pub async fn save_record(&self, local: &LocalRecord) -> Result<(), IndexError> {
        let body = serde_json::to_string(&local.record)?;
        sqlx::query(
            "
            INSERT INTO records (id, name, record, is_synced, is_incomplete, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                record = excluded.record,
                is_synced = excluded.is_synced,
                is_incomplete = excluded.is_incomplete,
                updated_at = excluded.updated_at;
            ",
        )
        .bind(&local.id)
        .bind(&local.record.name)
        .bind(body)
        .bind(if local.is_synced { 1 } else { 0 })
        .bind(if local.is_incomplete { 1 } else { 0 })
        .bind(now_unix())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_record(&self, id: &str) -> Result<Option<LocalRecord>, IndexError> {
        let row = sqlx::query(
            "SELECT id, record, is_synced, is_incomplete FROM records WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| record_from_row(&row)).transpose()
    }

    /// Most recently saved record carrying `name`.
    pub async fn get_record_by_name(&self, name: &str) -> Result<Option<LocalRecord>, IndexError> {
        let row = sqlx::query(
            "SELECT id, record, is_synced, is_incomplete FROM records
             WHERE name = ?1
             ORDER BY updated_at DESC, rowid DESC
             LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| record_from_row(&row)).transpose()
    }

    pub async fn list_records(&self) -> Result<Vec<LocalRecord>, IndexError> {
        let rows = sqlx::query(
            "SELECT id, record, is_synced, is_incomplete FROM records ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Records that are neither synced nor flagged incomplete.
    pub async fn list_pending_uploads(&self) -> Result<Vec<LocalRecord>, IndexError> {
        let rows = sqlx::query(
            "SELECT id, record, is_synced, is_incomplete FROM records
             WHERE is_synced = 0 AND is_incomplete = 0
             ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn set_flags(
        &self,
        id: &str,
        is_synced: bool,
        is_incomplete: bool,
    ) -> Result<(), IndexError> {
        sqlx::query(
            "UPDATE records SET is_synced = ?2, is_incomplete = ?3, updated_at = ?4 WHERE id = ?1",
        )
        .bind(id)
        .bind(if is_synced { 1 } else { 0 })
        .bind(if is_incomplete { 1 } else { 0 })
        .bind(now_unix())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_record(&self, id: &str) -> Result<bool, IndexError> {
        let result = sqlx::query("DELETE FROM records WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes the record found by [`Self::get_record_by_name`] and returns it.
    pub async fn delete_record_by_name(
        &self,
        name: &str,
    ) -> Result<Option<LocalRecord>, IndexError> {
        let Some(local) = self.get_record_by_name(name).await? else {
            return Ok(None);
        };
        self.delete_record(&local.id).await?;
        Ok(Some(local))
    }

    pub async fn register_editor(
        &self,
        group: EditorGroup,
        name: &str,
        path: &str,
    ) -> Result<(), IndexError> {
        sqlx::query(
            "
            INSERT INTO editors (grp, name, path)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(grp, name) DO UPDATE SET
                path = excluded.path;
            ",
        )
        .bind(group.as_str())
        .bind(name)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_editor(
        &self,
        group: EditorGroup,
        name: &str,
    ) -> Result<Option<EditorEntry>, IndexError> {
        let row = sqlx::query("SELECT grp, name, path FROM editors WHERE grp = ?1 AND name = ?2")
            .bind(group.as_str())
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let entry = editor_from_row(&row)?;
        sqlx::query("DELETE FROM editors WHERE grp = ?1 AND name = ?2")
            .bind(group.as_str())
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(Some(entry))
    }

    pub async fn list_editors(&self, group: EditorGroup) -> Result<Vec<EditorEntry>, IndexError> {
        let rows =
            sqlx::query("SELECT grp, name, path FROM editors WHERE grp = ?1 ORDER BY name ASC")
                .bind(group.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(editor_from_row).collect()
    }

    /// Forgets every editor of `group` and returns what was registered.
    pub async fn clear_editors(&self, group: EditorGroup) -> Result<Vec<EditorEntry>, IndexError> {
        let entries = self.list_editors(group).await?;
        sqlx::query("DELETE FROM editors WHERE grp = ?1")
            .bind(group.as_str())
            .execute(&self.pool)
            .await?;
        Ok(entries)
    }

    pub async fn get_session(&self) -> Result<Session, IndexError> {
        let row =
            sqlx::query("SELECT provider, user_id, cursor, last_sync FROM session WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        if let Some(row) = row {
            Ok(Session {
                provider: row.try_get("provider")?,
                user_id: row.try_get("user_id")?,
                cursor: row.try_get("cursor")?,
                last_sync: row.try_get("last_sync")?,
            })
        } else {
            Ok(Session::default())
        }
    }

    pub async fn set_provider(&self, provider: &str) -> Result<(), IndexError> {
        sqlx::query(
            "
            INSERT INTO session (id, provider)
            VALUES (1, ?1)
            ON CONFLICT(id) DO UPDATE SET
                provider = excluded.provider;
            ",
        )
        .bind(provider)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_login(&self, user_id: &str, cursor: Option<&str>) -> Result<(), IndexError> {
        sqlx::query(
            "
            INSERT INTO session (id, user_id, cursor)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                cursor = excluded.cursor;
            ",
        )
        .bind(user_id)
        .bind(cursor)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_cursor(&self, cursor: Option<&str>, last_sync: Option<i64>) -> Result<(), IndexError> {
        sqlx::query(
            "
            INSERT INTO session (id, cursor, last_sync)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                cursor = excluded.cursor,
                last_sync = excluded.last_sync;
            ",
        )
        .bind(cursor)
        .bind(last_sync)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drops the user id and cursor. The provider is kept so the next login
    /// can default to it.
    pub async fn clear_login(&self) -> Result<(), IndexError> {
        sqlx::query("UPDATE session SET user_id = NULL, cursor = NULL WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<LocalRecord, IndexError> {
    let body: String = row.try_get("record")?;
    let is_synced: i64 = row.try_get("is_synced")?;
    let is_incomplete: i64 = row.try_get("is_incomplete")?;
    Ok(LocalRecord {
        id: row.try_get("id")?,
        record: serde_json::from_str(&body)?,
        is_synced: is_synced != 0,
        is_incomplete: is_incomplete != 0,
    })
}

fn editor_from_row(row: &SqliteRow) -> Result<EditorEntry, IndexError> {
    let group: String = row.try_get("grp")?;
    Ok(EditorEntry {
        group: EditorGroup::parse(&group)?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
    })
}

pub(crate) fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
