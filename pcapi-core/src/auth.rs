use reqwest::header::CACHE_CONTROL;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::client::{LOCAL_PROVIDER, PcapiClient, PcapiError};

/// Answer to a login request: where the user should authorise the app and
/// the user id to poll with.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginTicket {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub userid: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct LoginStatus {
    #[serde(default)]
    pub state: i64,
}

impl LoginStatus {
    pub fn is_authorized(&self) -> bool {
        self.state == 1
    }
}

impl PcapiClient {
    /// Provider names in the order the server lists them.
    pub async fn providers(&self) -> Result<Vec<String>, PcapiError> {
        let url = self.endpoint(["auth", "providers"])?;
        let providers: serde_json::Map<String, Value> = self.get_json(url).await?;
        Ok(providers.keys().cloned().collect())
    }

    pub fn login_url(&self, provider: &str, user_id: Option<&str>) -> Result<Url, PcapiError> {
        let mut segments = vec!["auth", provider];
        if let Some(user_id) = user_id {
            segments.push(user_id);
        }
        self.endpoint(segments)
    }

    /// Starts an asynchronous login. Passing the previous user id lets the
    /// server reuse it.
    pub async fn login_start(
        &self,
        provider: &str,
        previous_user_id: Option<&str>,
    ) -> Result<LoginTicket, PcapiError> {
        let url = with_async(self.login_url(provider, previous_user_id)?);
        debug!("login with: {url}");
        self.get_json(url).await
    }

    pub async fn login_local(&self, username: &str) -> Result<LoginTicket, PcapiError> {
        let url = with_async(self.login_url(LOCAL_PROVIDER, Some(username))?);
        debug!("login with: {url}");
        self.get_json(url).await
    }

    /// `asynchronous` marks the request as a poll of a pending login rather
    /// than a check of a stored session.
    pub async fn login_status(
        &self,
        provider: &str,
        user_id: &str,
        asynchronous: bool,
    ) -> Result<LoginStatus, PcapiError> {
        let mut url = self.login_url(provider, Some(user_id))?;
        if asynchronous {
            url = with_async(url);
        }
        let response = self
            .http
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PcapiError::Api { status, body });
        }
        Ok(response.json::<LoginStatus>().await?)
    }
}

fn with_async(mut url: Url) -> Url {
    url.query_pairs_mut().append_pair("async", "true");
    url
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unexpected user id: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_url_includes_previous_user() {
        let client = PcapiClient::new("http://example.org", "1.3").unwrap();
        let url = with_async(client.login_url("dropbox", Some("u-1")).unwrap());
        assert_eq!(
            url.as_str(),
            "http://example.org/1.3/pcapi/auth/dropbox/u-1?async=true"
        );
    }

    #[test]
    fn ticket_accepts_numeric_user_id() {
        let ticket: LoginTicket =
            serde_json::from_value(serde_json::json!({"url": "https://x", "userid": 42}))
                .unwrap();
        assert_eq!(ticket.userid, "42");
    }
}
