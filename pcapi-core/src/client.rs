use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::records::Record;

pub const DEFAULT_API_VERSION: &str = "1.3";
pub const LOCAL_PROVIDER: &str = "local";

#[derive(Debug, Error)]
pub enum PcapiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("url cannot carry path segments: {0}")]
    InvalidBase(String),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("pcapi rejected the request: {msg}")]
    Rejected { code: i64, msg: String },
    #[error("unexpected payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("non json response")]
    NonJson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Identifies whose storage a request addresses: the storage provider plus
/// the user id PCAPI handed out at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub provider: String,
    pub user_id: String,
}

impl Account {
    pub fn new(provider: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            user_id: user_id.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.provider == LOCAL_PROVIDER
    }
}

#[derive(Clone)]
pub struct PcapiClient {
    pub(crate) http: Client,
    base_url: Url,
}

impl PcapiClient {
    /// `root` is the server root (`http://host:port`); requests go to
    /// `{root}/{version}/pcapi/...`.
    pub fn new(root: &str, version: &str) -> Result<Self, PcapiError> {
        Self::with_http(Client::new(), root, version)
    }

    pub fn with_http(http: Client, root: &str, version: &str) -> Result<Self, PcapiError> {
        Ok(Self {
            http,
            base_url: cloud_provider_url(root, version)?,
        })
    }

    pub fn cloud_provider_url(&self) -> &Url {
        &self.base_url
    }

    pub fn set_cloud_provider_url(&mut self, root: &str, version: &str) -> Result<(), PcapiError> {
        self.base_url = cloud_provider_url(root, version)?;
        Ok(())
    }

    pub async fn fs_items(
        &self,
        account: &Account,
        remote_dir: &str,
    ) -> Result<FsListing, PcapiError> {
        let mut segments = fs_segments(account);
        segments.extend(split_dir(remote_dir));
        segments.push("");
        let url = self.endpoint(segments)?;
        debug!("get items of {remote_dir} with {url}");
        let listing: FsListing = self.get_json(url).await?;
        check_api_status(listing.error, listing.msg.as_deref())?;
        Ok(listing)
    }

    pub fn build_fs_url(
        &self,
        account: &Account,
        remote_dir: &str,
        file_name: &str,
    ) -> Result<Url, PcapiError> {
        let mut segments = fs_segments(account);
        segments.extend(split_dir(remote_dir));
        segments.push(file_name);
        self.endpoint(segments)
    }

    pub fn build_user_url(
        &self,
        provider: &str,
        user_id: &str,
        remote_dir: &str,
        file_name: Option<&str>,
    ) -> Result<Url, PcapiError> {
        let mut segments = vec!["fs", provider, user_id];
        segments.extend(split_dir(remote_dir));
        segments.push(file_name.unwrap_or(""));
        self.endpoint(segments)
    }

    /// Editors published under `user_id`; anything that is not a JSON object
    /// or carries a non-zero `error` is rejected.
    pub async fn list_editors(
        &self,
        provider: &str,
        user_id: &str,
    ) -> Result<FsListing, PcapiError> {
        let url = self.build_user_url(provider, user_id, "editors", None)?;
        debug!("list editors with {url}");
        let response = self
            .http
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let value = Self::handle_json_value(response).await?;
        if !value.is_object() {
            return Err(PcapiError::NonJson);
        }
        let listing: FsListing = serde_json::from_value(value)?;
        check_api_status(listing.error, listing.msg.as_deref())?;
        Ok(listing)
    }

    pub async fn records(&self, account: &Account) -> Result<RecordsListing, PcapiError> {
        let url = self.endpoint([
            "records",
            account.provider.as_str(),
            account.user_id.as_str(),
            "",
        ])?;
        debug!("fetch current records: {url}");
        let listing: RecordsListing = self.get_json(url).await?;
        check_api_status(listing.error, listing.msg.as_deref())?;
        Ok(listing)
    }

    pub fn record_url(&self, account: &Account, name: &str) -> Result<Url, PcapiError> {
        self.endpoint([
            "records",
            account.provider.as_str(),
            account.user_id.as_str(),
            name,
        ])
    }

    pub fn record_asset_url(
        &self,
        account: &Account,
        name: &str,
        file_name: &str,
    ) -> Result<Url, PcapiError> {
        self.endpoint([
            "records",
            account.provider.as_str(),
            account.user_id.as_str(),
            name,
            file_name,
        ])
    }

    pub async fn record(&self, account: &Account, name: &str) -> Result<Record, PcapiError> {
        let url = self.record_asset_url(account, name, "record.json")?;
        debug!("fetch {url}");
        self.get_json(url).await
    }

    /// Posts the record under `name`. The server may store it under a
    /// different name; the returned path tells which.
    pub async fn create_record(
        &self,
        account: &Account,
        name: &str,
        record: &Record,
    ) -> Result<CreatedRecord, PcapiError> {
        let url = self.record_url(account, name)?;
        debug!("post: {url}");
        let body = serde_json::to_string_pretty(record)?;
        let response = self
            .http
            .post(url)
            .header(CACHE_CONTROL, "no-cache")
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let value = Self::handle_json_value(response).await?;
        if !value.is_object() {
            return Err(PcapiError::NonJson);
        }
        let created: CreatedRecord = serde_json::from_value(value)?;
        check_api_status(created.error, created.msg.as_deref())?;
        Ok(created)
    }

    pub async fn upload_asset(&self, url: Url, part: Part) -> Result<(), PcapiError> {
        let form = Form::new().part("file", part);
        let response = self
            .http
            .post(url)
            .header(CACHE_CONTROL, "no-cache")
            .multipart(form)
            .send()
            .await?;
        let value = Self::handle_json_value(response).await?;
        let status: ApiStatus = serde_json::from_value(value)?;
        check_api_status(status.error, status.msg.as_deref())
    }

    pub async fn sync_cursor(&self, account: &Account) -> Result<String, PcapiError> {
        let url = self.endpoint(["sync", account.provider.as_str(), account.user_id.as_str()])?;
        let payload: CursorResponse = self.get_json(url).await?;
        Ok(payload.cursor)
    }

    /// Changes since `cursor`. The cursor is opaque and travels as a single
    /// percent-encoded path segment, so a `/` inside it is sent as `%2F`.
    pub async fn sync_delta(
        &self,
        account: &Account,
        cursor: &str,
    ) -> Result<SyncDelta, PcapiError> {
        let url = self.endpoint([
            "sync",
            account.provider.as_str(),
            account.user_id.as_str(),
            cursor,
        ])?;
        debug!("sync download with cursor: {url}");
        self.get_json(url).await
    }

    pub(crate) fn endpoint<I, S>(&self, segments: I) -> Result<Url, PcapiError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PcapiError::InvalidBase(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, PcapiError> {
        let response = self
            .http
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PcapiError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(PcapiError::Api { status, body })
        }
    }

    async fn handle_json_value(
        response: reqwest::Response,
    ) -> Result<serde_json::Value, PcapiError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PcapiError::Api { status, body });
        }
        serde_json::from_str(&body).map_err(|_| PcapiError::NonJson)
    }
}

impl PcapiError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            PcapiError::Api { status, .. } => Some(classify_api_status(*status)),
            PcapiError::Request(err) if err.is_timeout() || err.is_connect() => {
                Some(ApiErrorClass::Transient)
            }
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn check_api_status(code: i64, msg: Option<&str>) -> Result<(), PcapiError> {
    if code == 0 {
        Ok(())
    } else {
        Err(PcapiError::Rejected {
            code,
            msg: msg.unwrap_or("unspecified error").to_string(),
        })
    }
}

fn cloud_provider_url(root: &str, version: &str) -> Result<Url, PcapiError> {
    let mut url = Url::parse(root)?;
    url.path_segments_mut()
        .map_err(|_| PcapiError::InvalidBase(root.to_string()))?
        .pop_if_empty()
        .push(version)
        .push("pcapi");
    Ok(url)
}

/// `fs/{provider}/{user}`; the server's own storage has no user segment.
fn fs_segments(account: &Account) -> Vec<&str> {
    let mut segments = vec!["fs", account.provider.as_str()];
    if !account.is_local() {
        segments.push(account.user_id.as_str());
    }
    segments
}

fn split_dir(remote_dir: &str) -> impl Iterator<Item = &str> {
    remote_dir.split('/').filter(|part| !part.is_empty())
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FsListing {
    #[serde(default)]
    pub error: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub metadata: Vec<String>,
}

impl FsListing {
    /// File names of the listed paths (`/editors/a.edtr` -> `a.edtr`).
    pub fn file_names(&self) -> Vec<String> {
        self.metadata
            .iter()
            .map(|item| item.rsplit('/').next().unwrap_or(item).to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RecordsListing {
    #[serde(default)]
    pub error: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub records: Vec<serde_json::Map<String, serde_json::Value>>,
}

impl RecordsListing {
    /// The first key of each entry is the record name.
    pub fn names(&self) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|entry| entry.keys().next().cloned())
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreatedRecord {
    #[serde(default)]
    pub error: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct ApiStatus {
    #[serde(default)]
    error: i64,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct CursorResponse {
    cursor: String,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SyncDelta {
    #[serde(default)]
    pub deleted: Vec<String>,
    #[serde(default)]
    pub updated: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_provider_url_appends_version_and_pcapi() {
        let client = PcapiClient::new("http://example.org:8080", "1.3").unwrap();
        assert_eq!(
            client.cloud_provider_url().as_str(),
            "http://example.org:8080/1.3/pcapi"
        );

        let client = PcapiClient::new("http://example.org/", "2").unwrap();
        assert_eq!(
            client.cloud_provider_url().as_str(),
            "http://example.org/2/pcapi"
        );
    }

    #[test]
    fn set_cloud_provider_url_replaces_root() {
        let mut client = PcapiClient::new("http://a.example", "1.3").unwrap();
        client
            .set_cloud_provider_url("https://b.example", "1.3")
            .unwrap();
        assert_eq!(
            client.cloud_provider_url().as_str(),
            "https://b.example/1.3/pcapi"
        );
    }

    #[test]
    fn asset_url_escapes_record_name() {
        let client = PcapiClient::new("http://example.org", "1.3").unwrap();
        let account = Account::new("dropbox", "u1");
        let url = client
            .record_asset_url(&account, "My Record", "photo.jpg")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://example.org/1.3/pcapi/records/dropbox/u1/My%20Record/photo.jpg"
        );
    }

    #[test]
    fn fs_url_omits_user_for_local_provider() {
        let client = PcapiClient::new("http://example.org", "1.3").unwrap();
        let url = client
            .build_fs_url(&Account::new("local", "u1"), "editors", "a.edtr")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://example.org/1.3/pcapi/fs/local/editors/a.edtr"
        );
        let url = client
            .build_fs_url(&Account::new("dropbox", "u1"), "/editors/", "a.edtr")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://example.org/1.3/pcapi/fs/dropbox/u1/editors/a.edtr"
        );
    }

    #[test]
    fn user_url_ends_with_slash_without_file() {
        let client = PcapiClient::new("http://example.org", "1.3").unwrap();
        let url = client
            .build_user_url("dropbox", "anon", "editors", None)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://example.org/1.3/pcapi/fs/dropbox/anon/editors/"
        );
    }

    #[test]
    fn records_listing_names_take_first_key() {
        let listing: RecordsListing = serde_json::from_value(serde_json::json!({
            "error": 0,
            "records": [
                {"Tree 1": {"name": "Tree 1"}},
                {"Pond": {"name": "Pond"}}
            ]
        }))
        .unwrap();
        assert_eq!(listing.names(), vec!["Tree 1", "Pond"]);
    }

    #[test]
    fn classifies_statuses() {
        let err = PcapiError::Api {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert!(err.is_retryable());
        let err = PcapiError::Api {
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        };
        assert_eq!(err.classification(), Some(ApiErrorClass::Permanent));
        assert!(!err.is_retryable());
        let err = PcapiError::Api {
            status: StatusCode::CONFLICT,
            body: String::new(),
        };
        assert!(!err.is_retryable());
    }
}
