use std::path::Path;
use std::time::Duration;

use futures_util::stream::{self, TryStreamExt};
use reqwest::Client;
use uuid::Uuid;

use super::error::DownloadError;
use super::{extract, file};
use crate::context::RequestContext;
use crate::retry::{self, RetryAction, RetryConfig};
use crate::session::DEFAULT_USER_AGENT;

/// A resolved unit of network work handed to a [`Downloader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    /// Name to store the payload under; derived from the response when absent.
    pub filename: Option<String>,
    pub expected_size: Option<u64>,
    /// The payload is a zip to unpack into the target directory.
    pub archive: bool,
}

impl DownloadTask {
    pub fn file(url: &str, filename: &str, expected_size: u64) -> Self {
        Self {
            url: url.to_string(),
            filename: Some(filename.to_string()),
            expected_size: Some(expected_size),
            archive: false,
        }
    }

    pub fn archive(url: &str, filename: &str, expected_size: u64) -> Self {
        Self {
            url: url.to_string(),
            filename: Some(filename.to_string()),
            expected_size: Some(expected_size),
            archive: true,
        }
    }
}

/// Bulk fetch collaborator driven by the orchestrator.
#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch every task into `dir` with at most `parallelism` transfers in
    /// flight. Stops at the first failure.
    async fn fetch_many(
        &self,
        ctx: &RequestContext,
        dir: &Path,
        tasks: Vec<DownloadTask>,
        parallelism: usize,
    ) -> Result<(), DownloadError>;
}

/// [`Downloader`] over plain HTTPS. Each task reports progress under its
/// own random key, retries transient failures and unpacks archives.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    retry: RetryConfig,
}

impl HttpDownloader {
    pub fn new(retry: RetryConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, retry })
    }

    async fn fetch_one(
        &self,
        ctx: &RequestContext,
        dir: &Path,
        task: DownloadTask,
    ) -> Result<(), DownloadError> {
        let key = Uuid::new_v4().to_string();
        let path = retry::retry_with_backoff(
            &self.retry,
            |e: &DownloadError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || file::download_once(ctx, &self.client, dir, &task, &key),
        );
        let path = ctx.guard(path).await.ok_or(DownloadError::Cancelled)??;

        let target_dir = dir.to_path_buf();
        let flagged = task.archive;
        let unpacked = tokio::task::spawn_blocking(move || {
            extract::unpack_if_archive(&path, &target_dir, flagged)
        })
        .await??;
        if let Some(count) = unpacked {
            tracing::info!("Unpacked {} files", count);
        }

        ctx.count(&key, 1.0).await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Downloader for HttpDownloader {
    async fn fetch_many(
        &self,
        ctx: &RequestContext,
        dir: &Path,
        tasks: Vec<DownloadTask>,
        parallelism: usize,
    ) -> Result<(), DownloadError> {
        if tasks.is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(dir).await?;
        tracing::debug!(
            "Fetching {} items into {} ({} at a time)",
            tasks.len(),
            dir.display(),
            parallelism
        );
        stream::iter(tasks.into_iter().map(Ok::<_, DownloadError>))
            .try_for_each_concurrent(parallelism.max(1), |task| self.fetch_one(ctx, dir, task))
            .await
    }
}
