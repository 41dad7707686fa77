//! Phase-scoped progress aggregation.
//!
//! Workers report named sub-counts; the tracker publishes the phase's
//! completion fraction to a single bounded channel. Publishing waits at most
//! [`PUBLISH_TIMEOUT`] for room in the channel and otherwise drops the
//! update, so a slow or absent subscriber never stalls a download.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

pub const PUBLISH_TIMEOUT: Duration = Duration::from_millis(100);
pub const CHANNEL_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    CatalogScan,
    DuplicateDownload,
    BatchDownload,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::CatalogScan => "catalog scan",
            Phase::DuplicateDownload => "duplicate download",
            Phase::BatchDownload => "batch download",
        }
    }

    /// The catalog scan has no known end; its value is a raw record count.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Phase::CatalogScan)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub phase: Phase,
    pub value: f64,
}

/// Subscriber side: ends once the tracker is closed and drained.
pub type ProgressStream = ReceiverStream<ProgressUpdate>;

#[derive(Debug)]
struct PhaseState {
    phase: Option<Phase>,
    total: usize,
    counts: HashMap<String, f64>,
    tx: Option<mpsc::Sender<ProgressUpdate>>,
    /// Bumped for every computed aggregate.
    seq: u64,
}

impl PhaseState {
    fn value(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.counts.values().sum::<f64>() / self.total as f64
    }

    /// Number the aggregate and pair it with a sender, if anyone listens.
    fn stage(&mut self, value: f64) -> Option<Staged> {
        let tx = self.tx.clone()?;
        let phase = self.phase?;
        self.seq += 1;
        Some(Staged {
            seq: self.seq,
            update: ProgressUpdate { phase, value },
            tx,
        })
    }
}

struct Staged {
    seq: u64,
    update: ProgressUpdate,
    tx: mpsc::Sender<ProgressUpdate>,
}

enum Sent {
    Delivered,
    Superseded,
    Closed,
}

#[derive(Debug)]
struct Inner {
    state: std::sync::Mutex<PhaseState>,
    // Serialises sends; holds the sequence number of the last one delivered
    sent: tokio::sync::Mutex<u64>,
    dropped: AtomicU64,
    timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    inner: Arc<Inner>,
}

impl ProgressTracker {
    pub fn channel() -> (Self, ProgressStream) {
        Self::with_options(CHANNEL_CAPACITY, PUBLISH_TIMEOUT)
    }

    pub fn with_options(capacity: usize, timeout: Duration) -> (Self, ProgressStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let tracker = Self {
            inner: Arc::new(Inner {
                state: std::sync::Mutex::new(PhaseState {
                    phase: None,
                    total: 0,
                    counts: HashMap::new(),
                    tx: Some(tx),
                    seq: 0,
                }),
                sent: tokio::sync::Mutex::new(0),
                dropped: AtomicU64::new(0),
                timeout,
            }),
        };
        (tracker, ReceiverStream::new(rx))
    }

    fn state(&self) -> MutexGuard<'_, PhaseState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new phase: clears all sub-counts and publishes 0.
    pub async fn set_phase(&self, phase: Phase, total: usize) {
        let deadline = Instant::now() + self.inner.timeout;
        let staged = {
            let mut state = self.state();
            state.phase = Some(phase);
            state.total = total;
            state.counts.clear();
            state.stage(0.0)
        };
        tracing::info!("Phase: {} ({})", phase, total);
        self.publish(staged, deadline).await;
    }

    /// Upsert the sub-count for `key` and publish the new aggregate. The
    /// sub-count is always recorded; only the publish can be dropped.
    pub async fn count(&self, key: &str, value: f64) {
        let deadline = Instant::now() + self.inner.timeout;
        let staged = {
            let mut state = self.state();
            state.counts.insert(key.to_string(), value);
            let aggregate = state.value();
            state.stage(aggregate)
        };
        self.publish(staged, deadline).await;
    }

    /// Terminate the subscriber stream. Later calls are no-ops.
    pub async fn close(&self) {
        if self.state().tx.take().is_some() {
            tracing::debug!(
                "Progress closed ({} updates dropped)",
                self.inner.dropped.load(Ordering::Relaxed)
            );
        }
    }

    /// Updates discarded because nobody drained them in time.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Send `staged` unless a later aggregate already went out. Waiting for
    /// the send lock and for channel room share one deadline.
    async fn publish(&self, staged: Option<Staged>, deadline: Instant) {
        let Some(Staged { seq, update, tx }) = staged else {
            return;
        };
        let outcome = tokio::time::timeout_at(deadline, async {
            let mut last = self.inner.sent.lock().await;
            if seq <= *last {
                return Sent::Superseded;
            }
            match tx.send(update).await {
                Ok(()) => {
                    *last = seq;
                    Sent::Delivered
                }
                Err(_) => Sent::Closed,
            }
        })
        .await;

        match outcome {
            Ok(Sent::Delivered) | Ok(Sent::Superseded) => {}
            Ok(Sent::Closed) => {
                // No subscriber left
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                let n = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    "Dropped progress update {:.3} for {} (total dropped: {})",
                    update.value,
                    update.phase,
                    n
                );
            }
        }
    }
}
