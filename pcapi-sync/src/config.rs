use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use pcapi_core::DEFAULT_API_VERSION;

use crate::login::PollSettings;
use crate::sync::engine::{DEFAULT_WORKERS, EngineSettings};
use crate::sync::transfer::TransferConfig;

const DEFAULT_DATA_DIR_NAME: &str = "pcapi-sync";
const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_POLL_MAX_SECS: u64 = 300;
const DEFAULT_RETRY_ATTEMPTS: u64 = 2;
const DEFAULT_DOWNLOAD_CONCURRENCY: u64 = 4;
const DEFAULT_UPLOAD_CONCURRENCY: u64 = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// Server root, e.g. `https://pcapi.example.org`.
    pub pcapi_url: String,
    pub pcapi_version: String,
    /// Providers offered for login; every provider the server lists when unset.
    pub providers: Option<Vec<String>>,
    pub anonymous_user: Option<String>,
    pub data_dir: PathBuf,
    pub workers: usize,
    pub poll_interval: Duration,
    pub poll_max: Duration,
    pub retry_attempts: u32,
    pub transfer: TransferConfig,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pcapi_url = var("PCAPI_URL")
            .filter(|value| !value.trim().is_empty())
            .context("PCAPI_URL is not set")?;
        let pcapi_version = var("PCAPI_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.to_string());
        let providers = var("PCAPI_PROVIDERS").map(|value| split_list(&value));
        let anonymous_user = var("PCAPI_ANONYMOUS_USER").filter(|value| !value.is_empty());
        let data_dir = match var("PCAPI_DATA_DIR") {
            Some(value) if value.starts_with('~') => {
                let home = dirs::home_dir().context("home directory is unavailable")?;
                expand_with_home(&value, &home)
            }
            Some(value) => PathBuf::from(value),
            None => default_data_dir(),
        };
        let read = |name: &str, default: u64| read_u64(var(name), default);

        Ok(Self {
            pcapi_url,
            pcapi_version,
            providers,
            anonymous_user,
            data_dir,
            workers: read("PCAPI_WORKERS", DEFAULT_WORKERS as u64) as usize,
            poll_interval: Duration::from_millis(read(
                "PCAPI_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )),
            poll_max: Duration::from_secs(read("PCAPI_POLL_MAX_SECS", DEFAULT_POLL_MAX_SECS)),
            retry_attempts: var("PCAPI_RETRY_ATTEMPTS")
                .and_then(|value| value.parse::<u32>().ok())
                .unwrap_or(DEFAULT_RETRY_ATTEMPTS as u32),
            transfer: TransferConfig {
                download_concurrency: read(
                    "PCAPI_DOWNLOAD_CONCURRENCY",
                    DEFAULT_DOWNLOAD_CONCURRENCY,
                ) as usize,
                upload_concurrency: read("PCAPI_UPLOAD_CONCURRENCY", DEFAULT_UPLOAD_CONCURRENCY)
                    as usize,
            },
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            workers: self.workers,
            retry_attempts: self.retry_attempts,
            anonymous_user: self.anonymous_user.clone(),
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.poll_interval,
            max_wait: self.poll_max,
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DEFAULT_DATA_DIR_NAME)
}

fn read_u64(value: Option<String>, default: u64) -> u64 {
    value
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<SyncConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        SyncConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn requires_server_url() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("PCAPI_URL", " ")]).is_err());
    }

    #[test]
    fn applies_defaults() {
        let config = config_from(&[("PCAPI_URL", "http://pcapi.test")]).unwrap();
        assert_eq!(config.pcapi_version, "1.3");
        assert_eq!(config.workers, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.poll_max, Duration::from_secs(300));
        assert_eq!(config.retry_attempts, 2);
        assert!(config.providers.is_none());
        assert!(config.anonymous_user.is_none());
        assert!(config.data_dir.ends_with("pcapi-sync"));
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("PCAPI_URL", "http://pcapi.test"),
            ("PCAPI_VERSION", "2"),
            ("PCAPI_PROVIDERS", "dropbox, local,,"),
            ("PCAPI_ANONYMOUS_USER", "anon"),
            ("PCAPI_DATA_DIR", "/tmp/pcapi"),
            ("PCAPI_WORKERS", "5"),
            ("PCAPI_RETRY_ATTEMPTS", "0"),
        ])
        .unwrap();
        assert_eq!(config.pcapi_version, "2");
        assert_eq!(
            config.providers,
            Some(vec!["dropbox".to_string(), "local".to_string()])
        );
        assert_eq!(config.engine_settings().anonymous_user.as_deref(), Some("anon"));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/pcapi"));
        assert_eq!(config.workers, 5);
        assert_eq!(config.retry_attempts, 0);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("PCAPI_URL", "http://pcapi.test"),
            ("PCAPI_WORKERS", "0"),
            ("PCAPI_POLL_INTERVAL_MS", "soon"),
        ])
        .unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.poll_settings().interval, Duration::from_secs(3));
    }

    #[test]
    fn expands_home_prefix() {
        let home = Path::new("/home/u");
        assert_eq!(expand_with_home("~", home), PathBuf::from("/home/u"));
        assert_eq!(
            expand_with_home("~/pcapi", home),
            PathBuf::from("/home/u/pcapi")
        );
        assert_eq!(expand_with_home("/var/x", home), PathBuf::from("/var/x"));
    }
}
