use std::time::Duration;

use anyhow::Context;
use pcapi_core::{Account, LOCAL_PROVIDER, PcapiClient};
use reqwest::Client;
use tracing::info;

use crate::config::SyncConfig;
use crate::login::LoginFlow;
use crate::sync::engine::{SyncEngine, SyncReport};
use crate::sync::index::{IndexStore, Session};
use crate::sync::paths::DataLayout;
use crate::sync::transfer::TransferClient;
use crate::sync::upload::UploadReport;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// What `status` reports about the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub session: Session,
    /// Set when the server still accepts the stored user.
    pub active_user: Option<String>,
    pub records: usize,
    pub pending_uploads: usize,
    pub incomplete: usize,
}

pub struct SyncRuntime {
    config: SyncConfig,
    engine: SyncEngine,
    login: LoginFlow,
}

impl SyncRuntime {
    pub async fn bootstrap(config: SyncConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("failed to create data dir at {:?}", config.data_dir))?;
        let layout = DataLayout::new(&config.data_dir);

        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        let client = PcapiClient::with_http(http.clone(), &config.pcapi_url, &config.pcapi_version)
            .with_context(|| format!("invalid PCAPI_URL {}", config.pcapi_url))?;
        let index = IndexStore::open(&layout.database_path())
            .await
            .context("failed to initialize index store")?;

        let engine = SyncEngine::new(client.clone(), index.clone(), layout)
            .with_transfer(TransferClient::with_http(http, config.transfer))
            .with_settings(config.engine_settings());
        let login = LoginFlow::new(client, index)
            .with_poll(config.poll_settings())
            .with_allowed_providers(config.providers.clone());

        info!(
            "using {} with data in {}",
            config.pcapi_url,
            config.data_dir.display()
        );
        Ok(Self {
            config,
            engine,
            login,
        })
    }

    pub async fn providers(&self) -> anyhow::Result<Vec<String>> {
        self.login
            .providers()
            .await
            .context("failed to fetch providers")
    }

    /// Logs in to `provider`, or to the only configured provider when none is
    /// named. The local provider logs in as `username`.
    pub async fn login(
        &self,
        provider: Option<String>,
        username: Option<String>,
    ) -> anyhow::Result<String> {
        let provider = match provider {
            Some(provider) => provider,
            None if username.is_some() => LOCAL_PROVIDER.to_string(),
            None => {
                let mut providers = self.providers().await?;
                if providers.len() != 1 {
                    anyhow::bail!("choose a provider: {}", providers.join(", "));
                }
                providers.remove(0)
            }
        };

        if provider == LOCAL_PROVIDER {
            let username = username.context("--username is required for the local provider")?;
            return self
                .login
                .login_local(&username)
                .await
                .context("local login failed");
        }
        self.login
            .login(&provider)
            .await
            .with_context(|| format!("login to {provider} failed"))
    }

    pub async fn logout(&self) -> anyhow::Result<()> {
        self.login.logout().await.context("failed to log out")
    }

    pub async fn status(&self) -> anyhow::Result<StatusReport> {
        let active_user = self.login.check_login().await?;
        let index = self.engine.index();
        let session = index.get_session().await?;
        let records = index.list_records().await?;
        Ok(StatusReport {
            session,
            active_user,
            pending_uploads: records.iter().filter(|record| record.is_pending_upload()).count(),
            incomplete: records.iter().filter(|record| record.is_incomplete).count(),
            records: records.len(),
        })
    }

    pub async fn sync(&self) -> anyhow::Result<SyncReport> {
        self.require_login().await?;
        self.engine.sync().await.context("sync failed")
    }

    pub async fn upload(&self) -> anyhow::Result<UploadReport> {
        self.require_login().await?;
        self.engine
            .upload_records()
            .await
            .context("upload failed")
    }

    pub async fn download_editors(&self) -> anyhow::Result<Vec<String>> {
        self.require_login().await?;
        let mut names = self
            .engine
            .download_editors()
            .await
            .context("problem syncing editors")?;
        if self.config.anonymous_user.is_some() {
            names.extend(
                self.engine
                    .download_public_editors()
                    .await
                    .context("problem syncing public editors")?,
            );
        }
        Ok(names)
    }

    /// Editors published by `user`, the anonymous user or the logged in user,
    /// whichever is known first.
    pub async fn editors(&self, user: Option<String>) -> anyhow::Result<Vec<String>> {
        let session = self.engine.index().get_session().await?;
        let user = user
            .or_else(|| self.config.anonymous_user.clone())
            .or(session.user_id)
            .context("no user to list editors for")?;
        self.engine
            .list_editors(&user)
            .await
            .with_context(|| format!("failed to list editors of {user}"))
    }

    /// The stored session. The server is only asked by `status`, so a
    /// dropped connection never logs the user out mid-sync.
    async fn require_login(&self) -> anyhow::Result<Account> {
        self.engine
            .index()
            .get_session()
            .await?
            .account()
            .context("not logged in, run `pcapi-sync login` first")
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn make_runtime(server: &MockServer, data_dir: &std::path::Path) -> SyncRuntime {
        let data_dir = data_dir.to_string_lossy().into_owned();
        let config = SyncConfig::from_vars(|name| match name {
            "PCAPI_URL" => Some(server.uri()),
            "PCAPI_DATA_DIR" => Some(data_dir.clone()),
            "PCAPI_RETRY_ATTEMPTS" => Some("0".to_string()),
            _ => None,
        })
        .unwrap();
        SyncRuntime::bootstrap(config).await.unwrap()
    }

    #[tokio::test]
    async fn upload_keeps_session_when_server_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        let dir = tempdir().unwrap();
        let runtime = make_runtime(&server, dir.path()).await;
        let index = runtime.engine.index();
        index.set_provider("dropbox").await.unwrap();
        index.set_login("user-1", Some("c-1")).await.unwrap();

        let report = runtime.upload().await.unwrap();

        assert!(report.is_empty());
        let session = index.get_session().await.unwrap();
        assert_eq!(session.user_id.as_deref(), Some("user-1"));
        assert_eq!(session.cursor.as_deref(), Some("c-1"));
    }

    #[tokio::test]
    async fn sync_without_session_asks_for_login() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let runtime = make_runtime(&server, dir.path()).await;

        let err = runtime.sync().await.unwrap_err();

        assert!(err.to_string().contains("not logged in"));
    }
}
