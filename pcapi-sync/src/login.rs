use std::time::Duration;

use pcapi_core::{LOCAL_PROVIDER, PcapiClient, PcapiError};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::sync::index::{IndexError, IndexStore};

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("api error: {0}")]
    Api(#[from] PcapiError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("unable to login, the cloud provider cannot be reached")]
    Offline,
    #[error("server did not return an authorization url")]
    MissingAuthorizationUrl,
    #[error("authorization timed out")]
    Timeout,
}

/// Shows the user where to authorise this device.
pub trait AuthorizationPrompt: Send + Sync {
    fn open(&self, url: &str);
}

/// Prints the authorization url on the terminal.
pub struct ConsolePrompt;

impl AuthorizationPrompt for ConsolePrompt {
    fn open(&self, url: &str) {
        println!("Open this URL in your browser to authorise pcapi-sync:\n{url}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_wait: Duration::from_secs(5 * 60),
        }
    }
}

/// Login state of the device against a PCAPI provider. The session lives in
/// the index so it survives restarts.
pub struct LoginFlow<P = ConsolePrompt> {
    client: PcapiClient,
    index: IndexStore,
    prompt: P,
    poll: PollSettings,
    allowed_providers: Option<Vec<String>>,
}

impl LoginFlow<ConsolePrompt> {
    pub fn new(client: PcapiClient, index: IndexStore) -> Self {
        Self::with_prompt(client, index, ConsolePrompt)
    }
}

impl<P: AuthorizationPrompt> LoginFlow<P> {
    pub fn with_prompt(client: PcapiClient, index: IndexStore, prompt: P) -> Self {
        Self {
            client,
            index,
            prompt,
            poll: PollSettings::default(),
            allowed_providers: None,
        }
    }

    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_allowed_providers(mut self, providers: Option<Vec<String>>) -> Self {
        self.allowed_providers = providers;
        self
    }

    /// Providers offered by the server, narrowed to the configured ones.
    pub async fn providers(&self) -> Result<Vec<String>, LoginError> {
        let all = self.client.providers().await?;
        Ok(filter_providers(all, self.allowed_providers.as_deref()))
    }

    /// Runs the asynchronous login against `provider` and returns the new
    /// user id once the user authorised this device.
    ///
    /// A previously stored user id is offered to the server for reuse and
    /// then cleared, so a failed login leaves nobody logged in.
    pub async fn login(&self, provider: &str) -> Result<String, LoginError> {
        self.index.set_provider(provider).await?;
        let previous = self.index.get_session().await?.user_id;
        if let Some(previous) = &previous {
            debug!("got a user id: {previous}");
        }
        self.index.clear_login().await?;

        let ticket = self
            .client
            .login_start(provider, previous.as_deref())
            .await
            .map_err(offline_or_api)?;
        let url = ticket.url.ok_or(LoginError::MissingAuthorizationUrl)?;
        debug!("redirect to: {url}");
        self.prompt.open(&url);

        let mut waited = Duration::ZERO;
        loop {
            tokio::time::sleep(self.poll.interval).await;
            waited += self.poll.interval;

            let status = self
                .client
                .login_status(provider, &ticket.userid, true)
                .await
                .map_err(|err| {
                    error!("problem polling api: {err}");
                    err
                })?;
            if status.is_authorized() {
                self.index.set_login(&ticket.userid, None).await?;
                info!("logged in to {provider} as {}", ticket.userid);
                return Ok(ticket.userid);
            }
            if waited >= self.poll.max_wait {
                error!("login to {provider} not authorised in {:?}", self.poll.max_wait);
                return Err(LoginError::Timeout);
            }
        }
    }

    /// Logs in to the server's own storage, which needs no authorization.
    pub async fn login_local(&self, username: &str) -> Result<String, LoginError> {
        self.index.set_provider(LOCAL_PROVIDER).await?;
        let ticket = self
            .client
            .login_local(username)
            .await
            .map_err(offline_or_api)?;
        self.index.set_login(&ticket.userid, None).await?;
        info!("logged in to local storage as {}", ticket.userid);
        Ok(ticket.userid)
    }

    /// Checks the stored session with the server.
    ///
    /// Returns the user id when it is still authorised. A session the server
    /// no longer accepts is kept, so the next login can reuse the id, but
    /// `None` is returned. A failed request logs the user out.
    pub async fn check_login(&self) -> Result<Option<String>, LoginError> {
        let session = self.index.get_session().await?;
        let Some(account) = session.account() else {
            debug!("no user session saved");
            self.logout().await?;
            return Ok(None);
        };

        debug!("check user with: {}/{}", account.provider, account.user_id);
        match self
            .client
            .login_status(&account.provider, &account.user_id, false)
            .await
        {
            Ok(status) if status.is_authorized() => {
                self.index
                    .set_login(&account.user_id, session.cursor.as_deref())
                    .await?;
                Ok(Some(account.user_id))
            }
            Ok(_) => Ok(None),
            Err(err) => {
                error!("error with user {}: {err}", account.user_id);
                self.logout().await?;
                Ok(None)
            }
        }
    }

    /// Forgets the user id and sync cursor.
    pub async fn logout(&self) -> Result<(), LoginError> {
        self.index.clear_login().await?;
        Ok(())
    }
}

fn offline_or_api(err: PcapiError) -> LoginError {
    match err {
        PcapiError::Request(ref inner) if inner.is_timeout() || inner.is_connect() => {
            error!("login request failed: {inner}");
            LoginError::Offline
        }
        other => LoginError::Api(other),
    }
}

/// Keeps the providers named in `allowed`, in server order. Without an
/// allow-list every provider is kept.
pub fn filter_providers(all: Vec<String>, allowed: Option<&[String]>) -> Vec<String> {
    match allowed {
        Some(allowed) => all
            .into_iter()
            .filter(|provider| allowed.contains(provider))
            .collect(),
        None => all,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_follow_allow_list() {
        let all = vec!["local".to_string(), "dropbox".to_string()];
        let allowed = vec!["dropbox".to_string(), "gdrive".to_string()];
        assert_eq!(filter_providers(all.clone(), Some(&allowed)), vec!["dropbox"]);
        assert_eq!(filter_providers(all.clone(), None), all);
    }

    #[test]
    fn default_poll_is_every_three_seconds_for_five_minutes() {
        let poll = PollSettings::default();
        assert_eq!(poll.interval, Duration::from_secs(3));
        assert_eq!(poll.max_wait, Duration::from_secs(300));
    }
}
