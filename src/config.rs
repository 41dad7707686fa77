use std::path::PathBuf;

use crate::cli::Cli;
use crate::retry::RetryConfig;
use crate::store::config::DEFAULT_OAUTH_CLIENT_ID;
use crate::store::{ConfigFile, JsonConfigStore};
use crate::types::{Domain, LogLevel};

/// Settings for one run: `app_config.json` from the data directory with
/// command-line flags taking precedence.
pub struct Config {
    pub username: String,
    pub password: Option<String>,
    pub directory: PathBuf,
    pub data_dir: PathBuf,
    pub oauth_client_id: String,

    pub retry: RetryConfig,
    pub max_parallel: usize,

    pub domain: Domain,
    pub log_level: LogLevel,

    pub auth_only: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("directory", &self.directory)
            .field("data_dir", &self.data_dir)
            .field("max_parallel", &self.max_parallel)
            .field("domain", &self.domain)
            .field("auth_only", &self.auth_only)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    /// Read `app_config.json` from the CLI's data directory and overlay the
    /// flags that were given.
    pub async fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let data_dir = expand_tilde(&cli.data_dir);
        let file = JsonConfigStore::new(&data_dir).load().await?;
        Self::merge(cli, data_dir, file)
    }

    fn merge(cli: Cli, data_dir: PathBuf, file: ConfigFile) -> anyhow::Result<Self> {
        let max_parallel = cli.max_parallel.unwrap_or(file.max_parallel);
        if max_parallel == 0 {
            anyhow::bail!("max parallel must be at least 1");
        }

        let oauth_client_id = cli
            .oauth_client_id
            .filter(|id| !id.is_empty())
            .or(Some(file.oauth_client_id).filter(|id| !id.is_empty()))
            .unwrap_or_else(|| DEFAULT_OAUTH_CLIENT_ID.to_string());

        let directory = cli
            .directory
            .map(|d| expand_tilde(&d))
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            username: cli.username,
            password: cli.password,
            directory,
            data_dir,
            oauth_client_id,
            retry: RetryConfig {
                max_retries: cli.max_retries,
                base_delay_secs: cli.retry_delay,
                max_delay_secs: RetryConfig::default().max_delay_secs,
            },
            max_parallel,
            domain: cli.domain,
            log_level: cli.log_level,
            auth_only: cli.auth_only,
            no_progress_bar: cli.no_progress_bar,
        })
    }
}
