use clap::Parser;

use crate::types::{Domain, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "icloud-bulk-dl",
    version,
    about = "Download every original photo in an iCloud library, deduplicated by checksum"
)]
pub struct Cli {
    /// Apple ID email address
    #[arg(short = 'u', long)]
    pub username: String,

    /// iCloud password (if not provided, will prompt).
    /// WARNING: passing via --password is visible in process listings.
    /// Prefer the ICLOUD_PASSWORD environment variable instead.
    #[arg(short = 'p', long, env = "ICLOUD_PASSWORD")]
    pub password: Option<String>,

    /// Local directory for downloads (default: current directory)
    #[arg(short = 'd', long)]
    pub directory: Option<String>,

    /// Directory holding app_config.json and persisted cookies
    #[arg(long, default_value = "~/.config/icloud-bulk-dl")]
    pub data_dir: String,

    /// Archive preparations and transfers in flight at once
    /// (default: app_config.json, else 3)
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// OAuth client id sent to Apple (default: app_config.json, else the
    /// iCloud web widget key)
    #[arg(long)]
    pub oauth_client_id: Option<String>,

    /// iCloud domain (com or cn)
    #[arg(long, value_enum, default_value = "com")]
    pub domain: Domain,

    /// Retries per file on transient download failures
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Base delay in seconds between download retries
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Only authenticate (create/update the persisted session)
    #[arg(long)]
    pub auth_only: bool,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}
