//! Download pipeline: turns the full catalog into the smallest set of
//! transfers. Duplicate content is fetched per record from its own URL,
//! unique content in server-built archives of up to 1000 records, with at
//! most `parallelism` archive preparations and transfers in flight.

pub mod downloader;
pub mod error;
pub mod extract;
pub mod file;
pub mod paths;

pub use downloader::{DownloadTask, Downloader, HttpDownloader};

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::try_join_all;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::icloud::photos::queries::MAX_BATCH_RECORDS;
use crate::icloud::{PhotoCatalog, PhotoRecord};
use crate::progress::Phase;

/// Split `records` into first occurrences of each checksum (catalog order
/// preserved) and every later occurrence.
pub fn dedupe(records: Vec<PhotoRecord>) -> (Vec<PhotoRecord>, Vec<PhotoRecord>) {
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .partition(|record| seen.insert(record.checksum.clone()))
}

/// Consecutive groups of at most `size` items; concatenated they give back
/// `items` in order. A zero size is treated as one.
pub fn chunk<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut groups = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter();
    loop {
        let group: Vec<T> = iter.by_ref().take(size).collect();
        if group.is_empty() {
            break;
        }
        groups.push(group);
    }
    groups
}

fn archive_filename(index: usize) -> String {
    format!("icloud-batch-{:04}.zip", index)
}

/// What one `download_all` run moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub photos: usize,
    pub unique: usize,
    pub duplicates: usize,
    pub batches: usize,
}

#[derive(Clone)]
pub struct DownloadOrchestrator {
    catalog: Arc<dyn PhotoCatalog>,
    downloader: Arc<dyn Downloader>,
    parallelism: usize,
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

impl DownloadOrchestrator {
    pub fn new(
        catalog: Arc<dyn PhotoCatalog>,
        downloader: Arc<dyn Downloader>,
        parallelism: usize,
    ) -> Self {
        Self {
            catalog,
            downloader,
            parallelism: parallelism.max(1),
        }
    }

    /// Download the whole catalog into `dir`. The first failure aborts the
    /// run. The context's progress stream is closed on return either way.
    pub async fn run(&self, ctx: &RequestContext, dir: &Path) -> Result<DownloadSummary> {
        let result = self.run_phases(ctx, dir).await;
        if let Some(progress) = &ctx.progress {
            progress.close().await;
        }
        result
    }

    fn check_cancelled(ctx: &RequestContext) -> Result<()> {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    async fn run_phases(&self, ctx: &RequestContext, dir: &Path) -> Result<DownloadSummary> {
        let started = Instant::now();
        Self::check_cancelled(ctx)?;

        ctx.set_phase(Phase::CatalogScan, 1).await;
        let records = self.catalog.list_all(ctx).await?;
        let photos = records.len();
        let (unique, duplicate) = dedupe(records);
        tracing::info!(
            "{} photos: {} unique, {} duplicates",
            photos,
            unique.len(),
            duplicate.len()
        );

        Self::check_cancelled(ctx)?;
        self.download_duplicates(ctx, dir, &duplicate).await?;

        let batches = chunk(unique, MAX_BATCH_RECORDS);
        let summary = DownloadSummary {
            photos,
            unique: batches.iter().map(Vec::len).sum(),
            duplicates: duplicate.len(),
            batches: batches.len(),
        };
        self.download_batches(ctx, dir, batches).await?;

        tracing::info!(
            "Downloaded {} photos in {:.1}s",
            photos,
            started.elapsed().as_secs_f64()
        );
        Ok(summary)
    }

    async fn download_duplicates(
        &self,
        ctx: &RequestContext,
        dir: &Path,
        duplicate: &[PhotoRecord],
    ) -> Result<()> {
        ctx.set_phase(Phase::DuplicateDownload, duplicate.len()).await;
        if duplicate.is_empty() {
            return Ok(());
        }
        let tasks = duplicate
            .iter()
            .map(|r| DownloadTask::file(&r.url, &r.filename, r.size))
            .collect();
        self.downloader
            .fetch_many(ctx, dir, tasks, self.parallelism)
            .await?;
        Ok(())
    }

    /// Prepare and fetch archives one set of `parallelism` batches at a
    /// time: every preparation of a set completes before its transfers
    /// start.
    async fn download_batches(
        &self,
        ctx: &RequestContext,
        dir: &Path,
        batches: Vec<Vec<PhotoRecord>>,
    ) -> Result<()> {
        ctx.set_phase(Phase::BatchDownload, batches.len()).await;
        let mut index = 0;
        for set in chunk(batches, self.parallelism) {
            Self::check_cancelled(ctx)?;
            let urls = try_join_all(
                set.iter()
                    .map(|batch| self.catalog.make_batch_download_url(ctx, batch)),
            )
            .await?;

            let tasks: Vec<DownloadTask> = set
                .iter()
                .zip(urls)
                .map(|(batch, url)| {
                    let size = batch.iter().map(|r| r.size).sum();
                    let task = DownloadTask::archive(&url, &archive_filename(index), size);
                    index += 1;
                    task
                })
                .collect();
            tracing::debug!("Fetching {} archives", tasks.len());
            self.downloader
                .fetch_many(ctx, dir, tasks, self.parallelism)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::error::DownloadError;
    use super::*;
    use crate::icloud::CatalogError;
    use crate::progress::ProgressTracker;
    use crate::types::UserIdentity;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_stream::StreamExt;
    use tokio_util::sync::CancellationToken;

    fn record(id: &str, checksum: &str) -> PhotoRecord {
        PhotoRecord {
            id: id.to_string(),
            master_id: format!("M{}", id),
            checksum: checksum.to_string(),
            url: format!("https://cvws.icloud-content.com/{}", id),
            filename: format!("IMG_{}.JPG", id),
            size: 100,
            zone: None,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(
            UserIdentity::from_credentials("alice", "pw"),
            CancellationToken::new(),
        )
    }

    #[derive(Default)]
    struct FakeCatalog {
        records: Vec<PhotoRecord>,
        prepared: Mutex<Vec<Vec<String>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_prepare: bool,
    }

    #[async_trait::async_trait]
    impl PhotoCatalog for FakeCatalog {
        async fn list_all(
            &self,
            _ctx: &RequestContext,
        ) -> std::result::Result<Vec<PhotoRecord>, CatalogError> {
            Ok(self.records.clone())
        }

        async fn make_batch_download_url(
            &self,
            _ctx: &RequestContext,
            records: &[PhotoRecord],
        ) -> std::result::Result<String, CatalogError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_prepare {
                return Err(CatalogError::ApiError {
                    code: 500,
                    message: "prepare failed".into(),
                });
            }
            let mut prepared = self.prepared.lock().unwrap();
            prepared.push(records.iter().map(|r| r.id.clone()).collect());
            Ok(format!("https://zip.example/{}", prepared.len()))
        }
    }

    #[derive(Default)]
    struct FakeDownloader {
        calls: Mutex<Vec<(Vec<DownloadTask>, usize)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Downloader for FakeDownloader {
        async fn fetch_many(
            &self,
            _ctx: &RequestContext,
            _dir: &Path,
            tasks: Vec<DownloadTask>,
            parallelism: usize,
        ) -> std::result::Result<(), DownloadError> {
            self.calls.lock().unwrap().push((tasks, parallelism));
            if self.fail {
                return Err(DownloadError::HttpStatus {
                    status: 403,
                    url: "https://cvws.icloud-content.com/x".into(),
                });
            }
            Ok(())
        }
    }

    fn orchestrator(
        catalog: Arc<FakeCatalog>,
        downloader: Arc<FakeDownloader>,
        parallelism: usize,
    ) -> DownloadOrchestrator {
        DownloadOrchestrator::new(catalog, downloader, parallelism)
    }

    fn checksums_example() -> Vec<PhotoRecord> {
        vec![
            record("1", "a"),
            record("2", "b"),
            record("3", "a"),
            record("4", "c"),
            record("5", "a"),
        ]
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let (unique, duplicate) = dedupe(checksums_example());
        let ids = |v: &[PhotoRecord]| v.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&unique), vec!["1", "2", "4"]);
        assert_eq!(ids(&duplicate), vec!["3", "5"]);
    }

    #[test]
    fn test_dedupe_partitions_input() {
        let records: Vec<PhotoRecord> = (0..50)
            .map(|i| record(&i.to_string(), &(i % 7).to_string()))
            .collect();
        let (unique, duplicate) = dedupe(records);
        assert_eq!(unique.len() + duplicate.len(), 50);
        assert_eq!(unique.len(), 7);
        let distinct: HashSet<&str> = unique.iter().map(|r| r.checksum.as_str()).collect();
        assert_eq!(distinct.len(), unique.len());
        // First occurrences are ids 0..7
        let ids: Vec<&str> = unique.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4", "5", "6"]);
    }

    #[test]
    fn test_chunk_bounds_and_order() {
        let items: Vec<usize> = (0..2500).collect();
        let inner = chunk(items.clone(), 1000);
        assert_eq!(
            inner.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![1000, 1000, 500]
        );
        let outer = chunk(inner, 2);
        assert_eq!(outer.len(), 2);
        assert!(outer.iter().all(|set| set.len() <= 2));
        let flat: Vec<usize> = outer.into_iter().flatten().flatten().collect();
        assert_eq!(flat, items);
    }

    #[test]
    fn test_chunk_edge_cases() {
        assert!(chunk(Vec::<u8>::new(), 3).is_empty());
        assert_eq!(chunk(vec![1, 2, 3], 0), vec![vec![1], vec![2], vec![3]]);
        assert_eq!(chunk(vec![1, 2], 5), vec![vec![1, 2]]);
    }

    #[tokio::test]
    async fn test_run_downloads_duplicates_individually_and_uniques_in_one_archive() {
        let catalog = Arc::new(FakeCatalog {
            records: checksums_example(),
            ..Default::default()
        });
        let downloader = Arc::new(FakeDownloader::default());
        let dir = tempfile::tempdir().unwrap();

        let summary = orchestrator(catalog.clone(), downloader.clone(), 3)
            .run(&ctx(), dir.path())
            .await
            .unwrap();
        assert_eq!(
            summary,
            DownloadSummary {
                photos: 5,
                unique: 3,
                duplicates: 2,
                batches: 1
            }
        );

        assert_eq!(
            *catalog.prepared.lock().unwrap(),
            vec![vec!["1".to_string(), "2".to_string(), "4".to_string()]]
        );

        let calls = downloader.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        let (dups, parallelism) = &calls[0];
        assert_eq!(*parallelism, 3);
        assert_eq!(
            dups,
            &vec![
                DownloadTask::file("https://cvws.icloud-content.com/3", "IMG_3.JPG", 100),
                DownloadTask::file("https://cvws.icloud-content.com/5", "IMG_5.JPG", 100),
            ]
        );
        let (archives, _) = &calls[1];
        assert_eq!(
            archives,
            &vec![DownloadTask::archive(
                "https://zip.example/1",
                "icloud-batch-0000.zip",
                300
            )]
        );
    }

    #[tokio::test]
    async fn test_run_bounds_archive_preparation_by_parallelism() {
        let records: Vec<PhotoRecord> = (0..2500)
            .map(|i| record(&i.to_string(), &format!("ck{}", i)))
            .collect();
        let catalog = Arc::new(FakeCatalog {
            records,
            ..Default::default()
        });
        let downloader = Arc::new(FakeDownloader::default());
        let dir = tempfile::tempdir().unwrap();

        let summary = orchestrator(catalog.clone(), downloader.clone(), 2)
            .run(&ctx(), dir.path())
            .await
            .unwrap();
        assert_eq!(summary.batches, 3);

        let prepared = catalog.prepared.lock().unwrap();
        assert_eq!(prepared.len(), 3);
        assert!(prepared.iter().all(|ids| ids.len() <= MAX_BATCH_RECORDS));
        assert!(catalog.max_in_flight.load(Ordering::SeqCst) <= 2);

        // No duplicates, so only archive calls: one per set of two batches
        let calls = downloader.calls.lock().unwrap();
        let sizes: Vec<usize> = calls.iter().map(|(t, _)| t.len()).collect();
        assert_eq!(sizes, vec![2, 1]);
        let names: Vec<String> = calls
            .iter()
            .flat_map(|(t, _)| t.iter().filter_map(|t| t.filename.clone()))
            .collect();
        assert_eq!(
            names,
            vec![
                "icloud-batch-0000.zip",
                "icloud-batch-0001.zip",
                "icloud-batch-0002.zip"
            ]
        );
        assert!(calls.iter().flat_map(|(t, _)| t).all(|t| t.archive));
    }

    #[tokio::test]
    async fn test_run_reports_phases_in_order_and_closes_stream() {
        let catalog = Arc::new(FakeCatalog {
            records: checksums_example(),
            ..Default::default()
        });
        let downloader = Arc::new(FakeDownloader::default());
        let dir = tempfile::tempdir().unwrap();
        let (tracker, stream) = ProgressTracker::channel();
        let ctx = ctx().with_progress(tracker);

        orchestrator(catalog, downloader, 3)
            .run(&ctx, dir.path())
            .await
            .unwrap();

        // Stream ends because the orchestrator closed it
        let phases: Vec<Phase> = stream.map(|u| u.phase).collect().await;
        assert_eq!(
            phases,
            vec![
                Phase::CatalogScan,
                Phase::DuplicateDownload,
                Phase::BatchDownload
            ]
        );
    }

    #[tokio::test]
    async fn test_prepare_failure_aborts_before_archive_download() {
        let catalog = Arc::new(FakeCatalog {
            records: checksums_example(),
            fail_prepare: true,
            ..Default::default()
        });
        let downloader = Arc::new(FakeDownloader::default());
        let dir = tempfile::tempdir().unwrap();

        let err = orchestrator(catalog, downloader.clone(), 3)
            .run(&ctx(), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Catalog(CatalogError::ApiError { code: 500, .. })
        ));
        // Only the duplicate download ran
        let calls = downloader.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.iter().all(|t| !t.archive));
    }

    #[tokio::test]
    async fn test_download_failure_stops_before_batches() {
        let catalog = Arc::new(FakeCatalog {
            records: checksums_example(),
            ..Default::default()
        });
        let downloader = Arc::new(FakeDownloader {
            fail: true,
            ..Default::default()
        });
        let dir = tempfile::tempdir().unwrap();

        let err = orchestrator(catalog.clone(), downloader, 3)
            .run(&ctx(), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Download(DownloadError::HttpStatus { status: 403, .. })
        ));
        assert!(catalog.prepared.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_catalog_downloads_nothing() {
        let catalog = Arc::new(FakeCatalog::default());
        let downloader = Arc::new(FakeDownloader::default());
        let dir = tempfile::tempdir().unwrap();

        let summary = orchestrator(catalog, downloader.clone(), 3)
            .run(&ctx(), dir.path())
            .await
            .unwrap();
        assert_eq!(summary, DownloadSummary::default());
        assert!(downloader.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_does_nothing() {
        let catalog = Arc::new(FakeCatalog {
            records: checksums_example(),
            ..Default::default()
        });
        let downloader = Arc::new(FakeDownloader::default());
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        ctx.cancel.cancel();

        let err = orchestrator(catalog, downloader.clone(), 3)
            .run(&ctx, dir.path())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(downloader.calls.lock().unwrap().is_empty());
    }

    struct PanickingCatalog;

    #[async_trait::async_trait]
    impl PhotoCatalog for PanickingCatalog {
        async fn list_all(
            &self,
            _ctx: &RequestContext,
        ) -> std::result::Result<Vec<PhotoRecord>, CatalogError> {
            panic!("catalog exploded");
        }

        async fn make_batch_download_url(
            &self,
            _ctx: &RequestContext,
            _records: &[PhotoRecord],
        ) -> std::result::Result<String, CatalogError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_run_guarded_turns_panic_into_fault() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = DownloadOrchestrator::new(
            Arc::new(PanickingCatalog),
            Arc::new(FakeDownloader::default()),
            1,
        );
        let ctx = ctx();
        let path = dir.path().to_path_buf();
        let err = crate::fault::run_guarded(async move { orchestrator.run(&ctx, &path).await })
            .await
            .unwrap_err();
        match err {
            Error::Fault { message } => assert!(message.contains("catalog exploded")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
