use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::{Client, Response};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use super::error::DownloadError;
use super::paths;
use super::DownloadTask;
use crate::context::RequestContext;

/// Minimum gap between two progress reports for the same file.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Fraction reported while a transfer is still streaming. Scaled so a body
/// that lands slightly short of the expected size still approaches 1, and
/// capped below 1 so only completion reports a whole unit.
pub fn partial_fraction(bytes: u64, expected: u64) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    (bytes as f64 / (expected as f64 * 0.95)).min(0.999_999)
}

/// Name the payload is stored under: the task's own filename, else the
/// server's `Content-Disposition`, else the last URL segment. Always
/// sanitised to a single path component.
fn resolve_filename(task: &DownloadTask, response: &Response) -> Option<String> {
    task.filename
        .clone()
        .or_else(|| {
            response
                .headers()
                .get(CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok())
                .and_then(paths::filename_from_content_disposition)
        })
        .or_else(|| paths::filename_from_url(&task.url))
        .map(|name| paths::clean_filename(&name))
        .filter(|name| !name.is_empty())
}

/// One download attempt: stream the body into `<name>.<key>.part` next to
/// the target, then rename it into place. The `.part` file is removed on
/// failure.
pub(crate) async fn download_once(
    ctx: &RequestContext,
    client: &Client,
    dir: &Path,
    task: &DownloadTask,
    key: &str,
) -> Result<PathBuf, DownloadError> {
    tracing::debug!("GET {}", task.url);
    let response = ctx
        .guard(client.get(&task.url).send())
        .await
        .ok_or(DownloadError::Cancelled)?
        .map_err(|e| DownloadError::Http {
            source: e,
            url: task.url.clone(),
            bytes_written: 0,
        })?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus {
            status: response.status().as_u16(),
            url: task.url.clone(),
        });
    }

    let name = resolve_filename(task, &response)
        .ok_or_else(|| DownloadError::NoFilename(task.url.clone()))?;
    let target = dir.join(&name);
    let part = paths::part_path(&target, key);
    let expected = task
        .expected_size
        .or(response.content_length())
        .filter(|n| *n > 0);

    match stream_to_file(ctx, response, &part, task, key, expected).await {
        Ok(bytes) => {
            fs::rename(&part, &target).await?;
            tracing::debug!("Wrote {} ({} bytes)", target.display(), bytes);
            Ok(target)
        }
        Err(e) => {
            let _ = fs::remove_file(&part).await;
            Err(e)
        }
    }
}

async fn stream_to_file(
    ctx: &RequestContext,
    response: Response,
    part: &Path,
    task: &DownloadTask,
    key: &str,
    expected: Option<u64>,
) -> Result<u64, DownloadError> {
    let mut file = File::create(part).await?;
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;
    let mut last_report = Instant::now();

    while let Some(chunk) = ctx
        .guard(stream.next())
        .await
        .ok_or(DownloadError::Cancelled)?
    {
        let chunk = chunk.map_err(|e| DownloadError::Http {
            source: e,
            url: task.url.clone(),
            bytes_written,
        })?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;

        if let Some(expected) = expected {
            if last_report.elapsed() >= PROGRESS_INTERVAL {
                ctx.count(key, partial_fraction(bytes_written, expected))
                    .await;
                last_report = Instant::now();
            }
        }
    }
    file.flush().await?;
    Ok(bytes_written)
}
